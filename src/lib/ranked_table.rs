//! The ranked barcode count table: barcodes split into their two index reads, annotated with
//! likely index names and ordered by decreasing count.

use std::path::Path;

use bstr::ByteSlice;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::AggregatorConfig, count_index::CountIndex, errors::BarcodeError,
    index_reference::IndexLookup,
};

/// Progress is logged after this many rows are written.
const LOG_EVERY_N_ROWS: usize = 50_000;

/// The header of the ranked table.
pub const RANKED_TABLE_HEADER: [&str; 5] =
    ["Barcode1", "Likely_Index_Names1", "Barcode2", "Likely_Index_Names2", "Count"];

/// A row of the ranked barcode count table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedBarcodeRow {
    #[serde(rename = "Barcode1")]
    pub barcode1: String,
    #[serde(rename = "Likely_Index_Names1")]
    pub likely_index_names1: String,
    #[serde(rename = "Barcode2")]
    pub barcode2: String,
    #[serde(rename = "Likely_Index_Names2")]
    pub likely_index_names2: String,
    #[serde(rename = "Count")]
    pub count: u64,
}

/// Split a barcode into its first `barcode1_len` bases and the remainder.
///
/// A barcode shorter than `barcode1_len` is returned whole as the first segment.
pub fn split_barcode(barcode: &[u8], barcode1_len: usize) -> (&[u8], &[u8]) {
    barcode.split_at(barcode1_len.min(barcode.len()))
}

/// The rows of the ranked table for `index`, most abundant first with ties ordered by barcode,
/// truncated to [`AggregatorConfig::truncate_to_length`] rows.
pub fn ranked_rows<'a>(
    index: &'a dyn CountIndex,
    config: &'a AggregatorConfig,
    reference: &'a dyn IndexLookup,
) -> impl Iterator<Item = RankedBarcodeRow> + 'a {
    let limit = config.truncate_to_length.unwrap_or(usize::MAX);
    index.iter_sorted_desc().take(limit).map(move |(barcode, count)| {
        let (barcode1, barcode2) = split_barcode(barcode, config.barcode1_len);
        RankedBarcodeRow {
            barcode1: barcode1.to_str_lossy().to_string(),
            likely_index_names1: reference.likely_names(barcode1),
            barcode2: barcode2.to_str_lossy().to_string(),
            likely_index_names2: reference.likely_names(barcode2),
            count,
        }
    })
}

/// Write ranked rows as a tab-delimited table, preceded by a header unless `omit_header`.
///
/// Returns the number of rows written, excluding the header.
pub fn write_ranked_table<P, I>(path: P, rows: I, omit_header: bool) -> Result<usize, BarcodeError>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = RankedBarcodeRow>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_path(path.as_ref())?;
    if !omit_header {
        writer.write_record(&RANKED_TABLE_HEADER)?;
    }

    let mut written = 0;
    for row in rows {
        writer.serialize(row)?;
        written += 1;
        if written % LOG_EVERY_N_ROWS == 0 {
            debug!("Wrote {} barcode rows", written);
        }
    }
    writer.flush()?;
    Ok(written)
}

/// Read at most `rows_limit` rows of a ranked table, with or without a header line.
///
/// # Errors
///
/// - [`BarcodeError::InputFormat`] if a row does not have the five expected columns
pub fn read_ranked_table<P: AsRef<Path>>(
    path: P,
    rows_limit: usize,
) -> Result<Vec<RankedBarcodeRow>, BarcodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path.as_ref())?;

    let mut rows = vec![];
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if i == 0 && record.get(0) == Some(RANKED_TABLE_HEADER[0]) {
            continue;
        }
        if rows.len() >= rows_limit {
            break;
        }
        if record.len() != RANKED_TABLE_HEADER.len() {
            return Err(BarcodeError::input_format(
                &path,
                Some(i + 1),
                format!("expected {} columns, found {}", RANKED_TABLE_HEADER.len(), record.len()),
            ));
        }
        let row: RankedBarcodeRow = record
            .deserialize(None)
            .map_err(|e| BarcodeError::input_format(&path, Some(i + 1), e.to_string()))?;
        rows.push(row);
    }
    Ok(rows)
}
