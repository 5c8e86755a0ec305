//! Console rendering
//!
//! Turns ReactEvents into indented progress lines, streams the answer, and prints the
//! session views (context line, locations, compare table, tool failures). Line building is
//! separated from painting so the text can be tested without a terminal.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::time::Instant;

use crossterm::style::{Color, Stylize};
use serde_json::Value;

use crate::react::ReactEvent;
use crate::session::{CompareRow, LocationContext};

const LOGO: &str = "\
██      ██ ██    ██ ██████  ██████  ██████  ██      ██████
██      ██ ██    ██ ██      ██  ██  ██  ██  ██      ██
██      ██  ██  ██  ████    ██████  ██████  ██      ████
██      ██   ████   ██      ██  ██  ██  ██  ██      ██
██████  ██    ██    ██████  ██  ██  ██████  ██████  ██████";

fn display_name(tool: &str) -> &str {
    match tool {
        "geocode_zip" | "get_geo_profile" => "Geocoding",
        "search_nearby_amenities" => "Amenity Search",
        "get_census_demographics" => "Census Data",
        "get_walkscore" => "Walk Score",
        "get_hud_fmr" => "HUD FMR",
        "get_rentcast_market" => "RentCast Market",
        "get_rentcast_sale_listings" => "RentCast Listings",
        "search_housing_prices" => "Housing Prices",
        "search_new_developments" => "Development Search",
        "search_crime_safety" => "Crime & Safety Search",
        "search_noise_proxies" => "Noise Proxy Search",
        "search_osm_amenities" => "OSM Amenity Search",
        "search_overpass_amenities" => "Overpass Amenity Search",
        other => other,
    }
}

fn result_summary(tool: &str) -> &'static str {
    match tool {
        "geocode_zip" | "get_geo_profile" => "Resolved",
        "search_nearby_amenities" => "Fetched amenities",
        "get_census_demographics" => "Loaded demographics",
        "get_walkscore" => "Loaded scores",
        "get_hud_fmr" => "Loaded rents",
        "get_rentcast_market" => "Loaded market stats",
        "get_rentcast_sale_listings" => "Loaded listings",
        "search_housing_prices" => "Loaded rent benchmarks",
        "search_new_developments" => "Loaded permit records",
        "search_crime_safety" => "Loaded crime rates",
        "search_noise_proxies" => "Loaded noise proxies",
        "search_osm_amenities" | "search_overpass_amenities" => "Loaded amenity counts",
        _ => "Completed",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Accent,
    Dim,
    Error,
}

struct ToolRun {
    name: String,
    started: Instant,
}

pub struct Console {
    verbose: bool,
    runs: HashMap<u64, ToolRun>,
    active: BTreeMap<u64, String>,
    answer_line_start: bool,
    last_context_line: Option<String>,
}

impl Console {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            runs: HashMap::new(),
            active: BTreeMap::new(),
            answer_line_start: true,
            last_context_line: None,
        }
    }

    pub fn paint(&self, tone: Tone, text: &str) {
        match tone {
            Tone::Plain => println!("{text}"),
            Tone::Accent => println!("{}", text.with(Color::Cyan)),
            Tone::Dim => println!("{}", text.dark_grey()),
            Tone::Error => println!("{}", text.red()),
        }
    }

    pub fn header(&self, version: &str) {
        self.paint(Tone::Accent, &format!(" liveable {version} "));
        println!("{}", LOGO.with(Color::Rgb { r: 0, g: 47, b: 167 }));
        self.paint(Tone::Dim, "Your AI neighborhood analyst.");
        println!();
    }

    pub fn help(&self) {
        self.paint(
            Tone::Accent,
            "Commands: /set ZIP  /compare ZIP1 ZIP2  /locations  /clear  /help  /exit",
        );
    }

    pub fn locations(&self, contexts: &[LocationContext]) {
        if contexts.is_empty() {
            self.paint(Tone::Plain, "No locations loaded.");
            return;
        }
        for ctx in contexts {
            self.paint(Tone::Plain, &format!("- {}: {}", ctx.zip_code, ctx.label));
        }
    }

    /// Print the context line only when it differs from the last one printed
    pub fn maybe_print_context(&mut self, line: Option<String>) {
        let Some(line) = line else {
            return;
        };
        if self.last_context_line.as_deref() == Some(line.as_str()) {
            return;
        }
        self.paint(Tone::Plain, &line);
        self.last_context_line = Some(line);
    }

    pub fn compare_table(&self, a_label: &str, b_label: &str, rows: &[CompareRow]) {
        println!("{}", format_compare_table(a_label, b_label, rows));
    }

    pub fn tool_failures(&self, errors: &[Value]) {
        if errors.is_empty() {
            return;
        }
        self.paint(
            Tone::Error,
            &format!("⚠ {} tool failures recorded.", errors.len()),
        );
        self.paint(Tone::Plain, "Tool Failures (System):");
        let body = serde_json::to_string_pretty(errors).unwrap_or_else(|_| "[]".to_string());
        self.paint(Tone::Plain, &format!("```json\n{body}\n```"));
    }

    pub fn begin_answer(&mut self) {
        self.answer_line_start = true;
    }

    pub fn end_answer(&mut self) {
        println!();
        self.answer_line_start = true;
        self.active.clear();
        self.runs.clear();
    }

    pub fn handle_event(&mut self, event: &ReactEvent) {
        if let ReactEvent::MessageChunk { text } = event {
            let piece = self.answer_piece(text);
            print!("{piece}");
            let _ = std::io::stdout().flush();
            return;
        }
        for (tone, line) in self.event_lines(event) {
            self.paint(tone, &line);
        }
    }

    /// Indent streamed answer text two spaces, tracking line starts across chunks
    pub fn answer_piece(&mut self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let prefix = if self.answer_line_start { "  " } else { "" };
        let mut body = text.replace('\n', "\n  ");
        if text.ends_with('\n') {
            body.truncate(body.len() - 2);
        }
        self.answer_line_start = text.ends_with('\n');
        format!("{prefix}{body}")
    }

    /// Progress lines for one event; empty when the event is not shown
    pub fn event_lines(&mut self, event: &ReactEvent) -> Vec<(Tone, String)> {
        let mut lines = Vec::new();
        match event {
            ReactEvent::ToolStart { call_id, tool, preview } => {
                let display = display_name(tool).to_string();
                self.runs.insert(
                    *call_id,
                    ToolRun {
                        name: tool.clone(),
                        started: Instant::now(),
                    },
                );
                self.active.insert(*call_id, display.clone());
                if !self.verbose {
                    return lines;
                }
                if !self.answer_line_start {
                    lines.push((Tone::Plain, String::new()));
                    self.answer_line_start = true;
                }
                lines.push((Tone::Accent, format!("  ● {display}(\"{preview}\")")));
                lines.extend(self.active_line());
            }
            ReactEvent::ToolEnd { call_id, status, elapsed_ms, .. } => {
                self.active.remove(call_id);
                // failed runs stay until their ToolError reports the elapsed time
                if status == "error" {
                    return lines;
                }
                let Some(run) = self.runs.remove(call_id) else {
                    return lines;
                };
                if !self.verbose {
                    return lines;
                }
                let secs = *elapsed_ms as f64 / 1000.0;
                lines.push((
                    Tone::Dim,
                    format!("    └ {} in {secs:.1}s", result_summary(&run.name)),
                ));
                lines.extend(self.active_line());
            }
            ReactEvent::ToolError { call_id, message, .. } => {
                let elapsed = call_id
                    .and_then(|id| {
                        self.active.remove(&id);
                        self.runs.remove(&id)
                    })
                    .map(|run| run.started.elapsed().as_secs_f64());
                if !self.verbose {
                    return lines;
                }
                let mut line = format!("    └ ✗ Failed: {message}");
                if let Some(secs) = elapsed {
                    line.push_str(&format!(" ({secs:.1}s)"));
                }
                lines.push((Tone::Error, line));
            }
            ReactEvent::Delegation { analyst } if self.verbose => {
                lines.push((Tone::Accent, format!("  ◆ Delegating to the {analyst} analyst")));
            }
            ReactEvent::Recovery { action, .. } if self.verbose && action != "RetryWithPrompt" => {
                lines.push((Tone::Dim, format!("    ↻ {action}")));
            }
            ReactEvent::TokenUsage { total_tokens, .. } if self.verbose && *total_tokens > 0 => {
                lines.push((Tone::Plain, String::new()));
                lines.push((Tone::Dim, format!("  ({total_tokens} tokens)")));
            }
            ReactEvent::Error { text } => {
                lines.push((Tone::Error, format!("  {text}")));
            }
            _ => {}
        }
        lines
    }

    fn active_line(&self) -> Option<(Tone, String)> {
        if self.active.len() < 2 {
            return None;
        }
        let names: Vec<&str> = self.active.values().map(String::as_str).collect();
        Some((Tone::Dim, format!("    ⏳ Active: {}", names.join(", "))))
    }
}

/// Box-drawn three-column table: metric, location A, location B
pub fn format_compare_table(a_label: &str, b_label: &str, rows: &[CompareRow]) -> String {
    let width = |s: &str| s.chars().count();
    let w0 = rows.iter().map(|r| width(r.0)).max().unwrap_or(0);
    let w1 = rows
        .iter()
        .map(|r| width(&r.1))
        .chain([width(a_label)])
        .max()
        .unwrap_or(0);
    let w2 = rows
        .iter()
        .map(|r| width(&r.2))
        .chain([width(b_label)])
        .max()
        .unwrap_or(0);
    let pad = |s: &str, w: usize| format!("{s}{}", " ".repeat(w - width(s)));
    let rule = |l: &str, m: &str, r: &str| {
        format!(
            "{l}{}{m}{}{m}{}{r}",
            "─".repeat(w0 + 2),
            "─".repeat(w1 + 2),
            "─".repeat(w2 + 2)
        )
    };
    let row = |a: &str, b: &str, c: &str| {
        format!("│ {} │ {} │ {} │", pad(a, w0), pad(b, w1), pad(c, w2))
    };

    let mut out = vec![rule("┌", "┬", "┐"), row("", a_label, b_label)];
    for (label, a, b) in rows {
        out.push(rule("├", "┼", "┤"));
        out.push(row(label, a, b));
    }
    out.push(rule("└", "┴", "┘"));
    out.join("\n")
}
