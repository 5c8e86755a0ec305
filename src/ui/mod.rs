//! Terminal layer: crossterm-styled line output for the REPL

pub mod console;

pub use console::{format_compare_table, Console, Tone};
