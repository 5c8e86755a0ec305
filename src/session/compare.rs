//! `/compare`: lazily completes two contexts and lays their numbers side by side

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::observability::ToolLedger;
use crate::session::{tracked, until_cancelled, LocationContext};
use crate::tools::DataSources;

pub type CompareRow = (&'static str, String, String);

const NA: &str = "n/a";

/// Fetch housing and crime once per context; failures are recorded and the row stays n/a.
/// A fetch interrupted by `cancel` leaves its field empty.
pub async fn ensure_compare_data(
    sources: &DataSources,
    ledger: &ToolLedger,
    ctx: &mut LocationContext,
    cancel: &CancellationToken,
) -> Result<(), AgentError> {
    let args = json!({ "zip_code": ctx.zip_code });
    if ctx.housing.is_none() {
        let fetched = until_cancelled(cancel, async {
            Ok(tracked(
                ledger,
                "search_housing_prices",
                args.clone(),
                sources.fetch_housing_prices(&ctx.zip_code, None),
            )
            .await)
        })
        .await?;
        if let Ok(housing) = fetched {
            ctx.housing = Some(housing);
        }
    }
    if ctx.crime.is_none() {
        let fetched = until_cancelled(cancel, async {
            Ok(tracked(
                ledger,
                "search_crime_safety",
                args,
                sources.fetch_crime_safety(&ctx.zip_code),
            )
            .await)
        })
        .await?;
        if let Ok(crime) = fetched {
            ctx.crime = Some(crime);
        }
    }
    Ok(())
}

fn show_f64(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v}")
    }
}

fn show_value(v: Option<&Value>) -> String {
    match v {
        Some(Value::Number(n)) => n.as_f64().map(show_f64).unwrap_or_else(|| n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => NA.to_string(),
    }
}

fn show<T: ToString>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_else(|| NA.to_string())
}

/// Housing rent first, census median rent otherwise
fn rent(ctx: &LocationContext) -> String {
    if let Some(housing) = &ctx.housing {
        return show_value(housing.median_rent.as_ref());
    }
    show(ctx.census.as_ref().and_then(|c| c.median_rent))
}

pub fn compare_rows(a: &LocationContext, b: &LocationContext) -> Vec<CompareRow> {
    let income = |c: &LocationContext| show(c.census.as_ref().and_then(|c| c.median_household_income));
    let walk = |c: &LocationContext| show(c.walkscore.as_ref().and_then(|w| w.walkscore));
    let transit = |c: &LocationContext| show(c.walkscore.as_ref().and_then(|w| w.transit_score));
    let violent = |c: &LocationContext| show_value(c.crime.as_ref().and_then(|r| r.violent_crime_rate.as_ref()));
    let property = |c: &LocationContext| show_value(c.crime.as_ref().and_then(|r| r.property_crime_rate.as_ref()));
    let owners = |c: &LocationContext| show(c.census.as_ref().and_then(|c| c.pct_owner_occupied));

    vec![
        ("Median Rent", rent(a), rent(b)),
        ("Median Income", income(a), income(b)),
        ("Walk Score", walk(a), walk(b)),
        ("Transit Score", transit(a), transit(b)),
        ("Violent Crime (per 100k)", violent(a), violent(b)),
        ("Property Crime (per 100k)", property(a), property(b)),
        ("Homeownership %", owners(a), owners(b)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::sample_context;
    use crate::tools::test_support::sources_for;
    use crate::tools::{CrimeStats, HousingPrices};
    use std::time::{Duration, Instant};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn rows_fill_missing_values_with_na() {
        let mut a = sample_context("20001", "DC", Some(98), Some(101_722));
        let b = sample_context("22201", "VA", None, None);
        a.crime = Some(CrimeStats {
            zip_code: "20001".into(),
            city: Some("Washington".into()),
            state: Some("DC".into()),
            violent_crime_rate: Some(json!(812.5)),
            property_crime_rate: Some(json!("3,900")),
            rate_unit: Some("per 100,000".into()),
            comparison_to_national: None,
            year: Some(json!(2023)),
            sources: Vec::new(),
            note: None,
            raw_output: None,
        });

        let rows = compare_rows(&a, &b);
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0], ("Median Rent", "1900".to_string(), "n/a".to_string()));
        assert_eq!(rows[1], ("Median Income", "101722".to_string(), "n/a".to_string()));
        assert_eq!(rows[2].1, "98");
        assert_eq!(rows[3].1, "80");
        assert_eq!(rows[4], ("Violent Crime (per 100k)", "812.5".to_string(), "n/a".to_string()));
        assert_eq!(rows[5].1, "3,900");
        assert_eq!(rows[6], ("Homeownership %", "38.5".to_string(), "n/a".to_string()));
    }

    #[test]
    fn housing_rent_wins_over_census() {
        let mut a = sample_context("20001", "DC", None, Some(90_000));
        a.housing = Some(HousingPrices {
            zip_code: "20001".into(),
            median_home_price: Some(650_000.0),
            median_rent: Some(json!(2450.0)),
            yoy_change: None,
            price_per_sqft: None,
            source: "RentCast".into(),
            note: String::new(),
        });
        let b = a.clone();
        assert_eq!(compare_rows(&a, &b)[0].1, "2450");
    }

    #[tokio::test]
    async fn missing_keys_leave_compare_rows_empty() {
        let mut providers = crate::tools::test_support::providers_for("http://127.0.0.1:9");
        providers.rentcast_api_key = None;
        providers.hud_api_key = None;
        providers.browser_use_api_key = None;
        let sources = DataSources::new(providers);
        let ledger = ToolLedger::new();
        let mut ctx = sample_context("20001", "DC", None, None);

        ensure_compare_data(&sources, &ledger, &mut ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert!(ctx.housing.is_none());
        assert!(ctx.crime.is_none());
        let codes: Vec<Value> = ledger.pop_errors().into_iter().map(|e| e["error"].clone()).collect();
        assert_eq!(codes, vec![json!("housing_data_unavailable"), json!("missing_api_key")]);
    }

    #[tokio::test]
    async fn cancelled_compare_fetch_leaves_rows_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(8)))
            .mount(&server)
            .await;
        let sources = sources_for(&server.uri());
        let ledger = ToolLedger::new();
        let mut ctx = sample_context("20001", "DC", None, None);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let result = ensure_compare_data(&sources, &ledger, &mut ctx, &cancel).await;

        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(ctx.housing.is_none());
        assert!(ctx.crime.is_none());
    }
}
