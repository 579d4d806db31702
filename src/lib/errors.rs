use std::fmt::Display;

use thiserror::Error;

/// The optional line number in an input file where an error occurred.
#[derive(Debug)]
pub struct ErrorLine(pub Option<usize>);

impl Display for ErrorLine {
    /// Writes the line number if present, nothing if it is not None.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(number) => write!(f, " (line {})", number),
            None => Ok(()),
        }
    }
}

/// The errors that may occur when counting barcodes or guessing barcodes.
#[derive(Error, Debug)]
pub enum BarcodeError {
    #[error("Io error occurred")]
    Io(#[from] std::io::Error),

    #[error("Io error occurred")]
    FgError(#[from] fgoxide::FgError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// A tile file, metrics file, or barcode table could not be parsed into the expected fields.
    #[error("Malformed input in {path}{line}: {reason}")]
    InputFormat { path: String, reason: String, line: ErrorLine },

    /// Mutually exclusive options were given, or an option has an invalid value.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Too few reads were assigned to any sample; the demultiplexing as a whole is suspect.
    #[error(
        "Only {fraction:.4} of reads were assigned to samples, below the expected minimum of {minimum:.4}"
    )]
    PoolAssignment { fraction: f64, minimum: f64 },

    /// A counting worker failed; the whole aggregation is aborted.
    #[error("Failed counting barcodes in tile file {tile}")]
    WorkerFailure {
        tile: String,
        #[source]
        source: Box<BarcodeError>,
    },
}

impl BarcodeError {
    /// Builds an [`BarcodeError::InputFormat`] for the given path and optional line number.
    pub fn input_format<P: AsRef<std::path::Path>, S: Into<String>>(
        path: P,
        line: Option<usize>,
        reason: S,
    ) -> Self {
        Self::InputFormat {
            path: path.as_ref().to_string_lossy().to_string(),
            reason: reason.into(),
            line: ErrorLine(line),
        }
    }
}
