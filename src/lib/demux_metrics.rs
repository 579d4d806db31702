//! Reading of Picard `ExtractIlluminaBarcodes` metrics.

use std::path::Path;

use ahash::AHashSet;
use fgoxide::io::Io;
use itertools::Itertools;
use serde::Deserialize;

use crate::errors::BarcodeError;

/// Separates index read 1 from index read 2 in a Picard barcode.
const BARCODE_DELIMITER: char = '-';

/// A row of the metrics table, only the columns that are used.
#[derive(Debug, Deserialize)]
struct BarcodeMetricRecord {
    #[serde(rename = "BARCODE")]
    barcode: String,
    #[serde(rename = "BARCODE_NAME", default)]
    barcode_name: String,
    #[serde(rename = "READS")]
    reads: u64,
}

/// A demultiplexed sample, the barcodes it was expected to carry and the reads assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleExpectation {
    pub sample_name: String,
    /// Index read 1 barcode, upper case.
    pub barcode1: String,
    /// Index read 2 barcode, upper case; empty for single-index samples.
    pub barcode2: String,
    pub read_count: u64,
}

impl SampleExpectation {
    pub fn is_dual_index(&self) -> bool {
        !self.barcode2.is_empty()
    }
}

/// The samples of a demultiplexing run and the reads that were assigned to none of them.
#[derive(Debug, Clone, Default)]
pub struct DemuxMetrics {
    pub samples: Vec<SampleExpectation>,
    pub unassigned_reads: u64,
}

impl DemuxMetrics {
    /// Reads assigned to any sample.
    pub fn assigned_reads(&self) -> u64 {
        self.samples.iter().map(|s| s.read_count).sum()
    }

    pub fn total_reads(&self) -> u64 {
        self.assigned_reads() + self.unassigned_reads
    }

    /// The fraction of all reads assigned to a sample, zero when there are no reads.
    pub fn assigned_fraction(&self) -> f64 {
        let total = self.total_reads();
        if total == 0 {
            0.0
        } else {
            self.assigned_reads() as f64 / total as f64
        }
    }

    /// True if the barcode pair is the expected pair of any sample.
    pub fn is_expected_pair(&self, barcode1: &str, barcode2: &str) -> bool {
        self.samples.iter().any(|s| s.barcode1 == barcode1 && s.barcode2 == barcode2)
    }

    pub fn sample(&self, name: &str) -> Option<&SampleExpectation> {
        self.samples.iter().find(|s| s.sample_name == name)
    }
}

/// Read a Picard `ExtractIlluminaBarcodes` metrics file.
///
/// Comment (`#`) and blank lines before the table are skipped, and the table ends at the first
/// blank line after it.  The row with no `BARCODE_NAME` holds the reads matching no sample.
///
/// # Errors
///
/// - [`BarcodeError::InputFormat`] if the table is missing, lacks the `BARCODE` or `READS`
///   columns, holds an unparsable count, or names a sample twice
pub fn read_demux_metrics<P: AsRef<Path>>(path: P) -> Result<DemuxMetrics, BarcodeError> {
    let lines = Io::default().read_lines(&path)?;

    let header_index = lines
        .iter()
        .position(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .ok_or_else(|| BarcodeError::input_format(&path, None, "no metrics table found"))?;
    let table = lines[header_index..]
        .iter()
        .take_while(|line| !line.trim().is_empty())
        .join("\n");

    let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(table.as_bytes());
    let mut metrics = DemuxMetrics::default();
    let mut seen = AHashSet::new();
    for (i, record) in reader.deserialize().enumerate() {
        // Header is at header_index + 1 (1-based), the first record on the line after it
        let line_number = header_index + i + 2;
        let record: BarcodeMetricRecord = record
            .map_err(|e| BarcodeError::input_format(&path, Some(line_number), e.to_string()))?;

        let name = record.barcode_name.trim();
        if name.is_empty() {
            metrics.unassigned_reads += record.reads;
            continue;
        }
        if !seen.insert(name.to_string()) {
            return Err(BarcodeError::input_format(
                &path,
                Some(line_number),
                format!("sample {} is listed more than once", name),
            ));
        }

        let barcode = record.barcode.trim().to_ascii_uppercase();
        let (barcode1, barcode2) = match barcode.split_once(BARCODE_DELIMITER) {
            Some((barcode1, barcode2)) => (barcode1.to_string(), barcode2.to_string()),
            None => (barcode, String::new()),
        };
        metrics.samples.push(SampleExpectation {
            sample_name: name.to_string(),
            barcode1,
            barcode2,
            read_count: record.reads,
        });
    }
    Ok(metrics)
}
