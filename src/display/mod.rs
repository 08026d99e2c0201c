//! Terminal output for the CLI: theme, tables, spinners and help text.

pub mod help;
pub mod progress;
pub mod tables;
pub mod theme;

pub use help::create_help_text;
pub use progress::{create_spinner, with_spinner};
pub use tables::{TableBuilder, create_results_table, create_snapshots_table, create_status_table};
pub use theme::{THEME, Theme};
