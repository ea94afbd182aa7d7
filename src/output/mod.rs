//! Output formatters for duplicate stores.
//!
//! Currently a single format:
//! - CSV for spreadsheet import and scripting

pub mod csv;

pub use csv::{CsvOutput, CsvOutputError};
