//! CSV export of a duplicate store.
//!
//! The layout is line oriented rather than one row per file:
//!
//! ```text
//! #size,crc,filepath
//! #paths are not comma-escaped; a comma inside a path shifts columns
//! 4096,3f786850e387550fdab836ed7e6dc881de23001b,
//! ,,/data/a/report.pdf
//! ,,/data/b/report (copy).pdf
//! ```
//!
//! One `size,crc,` line opens each group and one `,,path` line follows per
//! member. Paths are written raw; a reader splits at the first two commas
//! only. Similar-image groups have an empty `crc` column.
//!
//! # Example
//!
//! ```no_run
//! use dupehound::duplicates::DuplicateStore;
//! use dupehound::output::csv::CsvOutput;
//!
//! # let store = DuplicateStore::default();
//! CsvOutput::new(&store).write_to(std::io::stdout())?;
//! # Ok::<(), dupehound::output::csv::CsvOutputError>(())
//! ```

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, Terminator, WriterBuilder};
use thiserror::Error;

use crate::duplicates::DuplicateStore;

/// First line of every export.
pub const HEADER_LINE: &str = "#size,crc,filepath";

/// Second line of every export.
pub const DISCLAIMER_LINE: &str =
    "#paths are not comma-escaped; a comma inside a path shifts columns";

/// Errors that can occur during CSV output generation.
#[derive(Debug, Error)]
pub enum CsvOutputError {
    /// The output file could not be created.
    #[error("cannot create {path}: {source}")]
    Create {
        /// Output file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// CSV output formatter.
pub struct CsvOutput<'a> {
    store: &'a DuplicateStore,
}

impl<'a> CsvOutput<'a> {
    /// Create a formatter over `store`.
    #[must_use]
    pub fn new(store: &'a DuplicateStore) -> Self {
        Self { store }
    }

    /// Write the export to `writer`, groups in display order.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if writing fails.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), CsvOutputError> {
        let mut out = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .quote_style(QuoteStyle::Never)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(writer);

        out.write_record([HEADER_LINE])?;
        out.write_record([DISCLAIMER_LINE])?;

        for group in self.store.groups() {
            let size = group.size().to_string();
            let crc = group.key.hash().unwrap_or_default();
            out.write_record([size.as_str(), crc, ""])?;

            for member in &group.members {
                let path = self.store.full_path(member);
                out.write_record([&b""[..], &b""[..], path.as_os_str().as_encoded_bytes()])?;
            }
        }

        out.flush()?;
        Ok(())
    }

    /// Write the export to a new file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if the file cannot be created or written.
    pub fn write_file(&self, path: &Path) -> Result<(), CsvOutputError> {
        let file = File::create(path).map_err(|source| CsvOutputError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_to(BufWriter::new(file))?;
        log::info!(
            "Exported {} group(s) to {}",
            self.store.len(),
            path.display()
        );
        Ok(())
    }

    /// Render the export as a string.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if serialization fails.
    pub fn to_string(&self) -> Result<String, CsvOutputError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
