//! Lookup of index names for observed barcode segments.

use std::path::Path;

use ahash::AHashMap;
use bstr::{BString, ByteSlice};
use fgoxide::io::DelimFile;
use itertools::Itertools;
use lazy_static::lazy_static;
use serde::Deserialize;

use crate::{
    errors::BarcodeError,
    utils::{hamming_distance, reverse_complement},
};

/// Reported when no known index is close to a barcode segment.
pub const UNKNOWN_INDEX_NAME: &str = "Unknown";

/// The maximum hamming distance used when attaching likely index names to barcodes.
pub const LIKELY_NAME_MAX_DISTANCE: usize = 1;

/// Nextera XT v2 i7 indexes.
const NEXTERA_I7: &[(&str, &str)] = &[
    ("N701", "TAAGGCGA"),
    ("N702", "CGTACTAG"),
    ("N703", "AGGCAGAA"),
    ("N704", "TCCTGAGC"),
    ("N705", "GGACTCCT"),
    ("N706", "TAGGCATG"),
    ("N707", "CTCTCTAC"),
    ("N708", "CAGAGAGG"),
    ("N709", "GCTACGCT"),
    ("N710", "CGAGGCTG"),
    ("N711", "AAGAGGCA"),
    ("N712", "GTAGAGGA"),
];

/// Nextera XT v2 i5 indexes, in forward strand orientation.
const NEXTERA_I5: &[(&str, &str)] = &[
    ("S502", "CTCTCTAT"),
    ("S503", "TATCCTCT"),
    ("S504", "AGAGTAGA"),
    ("S505", "GTAAGGAG"),
    ("S506", "ACTGCATA"),
    ("S507", "AAGGAGTA"),
    ("S508", "CTAAGCCT"),
    ("S510", "CGTCTAAT"),
    ("S511", "TCTCTCCG"),
    ("S513", "TCGACTAG"),
    ("S515", "TTCTAGCT"),
    ("S516", "CCTAGAGT"),
    ("S517", "GCGTAAGA"),
];

lazy_static! {
    static ref ILLUMINA: IndexReference = IndexReference::build_illumina();
}

/// Resolves an observed barcode segment to the names of known indexes.
pub trait IndexLookup {
    /// Names of the known indexes within `max_distance` mismatches of `segment`.
    ///
    /// An exact match wins over inexact matches.  Names are sorted and de-duplicated.
    fn guess_index(&self, segment: &[u8], max_distance: usize) -> Vec<String>;

    /// The likely index names of a barcode segment as a comma-joined string, or
    /// [`UNKNOWN_INDEX_NAME`] if no known index is within one mismatch.
    fn likely_names(&self, segment: &[u8]) -> String {
        let names = self.guess_index(segment, LIKELY_NAME_MAX_DISTANCE);
        if names.is_empty() {
            UNKNOWN_INDEX_NAME.to_string()
        } else {
            names.join(",")
        }
    }
}

/// A row of a custom index reference file.
#[derive(Debug, Deserialize)]
struct IndexReferenceRecord {
    name: String,
    sequence: String,
}

/// A table of known index sequences and their names.
#[derive(Debug, Clone, Default)]
pub struct IndexReference {
    by_sequence: AHashMap<BString, Vec<String>>,
}

impl IndexReference {
    /// An empty reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in reference of common Illumina indexes.
    ///
    /// The i5 indexes are registered both as given and reverse complemented, since some
    /// instruments read index 2 on the opposite strand.
    pub fn illumina() -> &'static IndexReference {
        &ILLUMINA
    }

    fn build_illumina() -> Self {
        let mut reference = Self::new();
        for (name, sequence) in NEXTERA_I7 {
            reference.insert(name, sequence.as_bytes());
        }
        for (name, sequence) in NEXTERA_I5 {
            reference.insert(name, sequence.as_bytes());
            reference.insert(name, &reverse_complement(sequence.as_bytes()));
        }
        reference
    }

    /// Register `sequence` under `name`.  Sequences are stored upper case.
    pub fn insert(&mut self, name: &str, sequence: &[u8]) {
        let names = self.by_sequence.entry(BString::from(sequence.to_ascii_uppercase())).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    /// The number of distinct sequences known.
    pub fn len(&self) -> usize {
        self.by_sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sequence.is_empty()
    }

    /// Load a reference from a tab-delimited file with `name` and `sequence` columns.
    ///
    /// # Errors
    ///
    /// - [`BarcodeError::InputFormat`] if a sequence is empty or holds bases other than `ACGTN`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, BarcodeError> {
        let records: Vec<IndexReferenceRecord> = DelimFile::default().read_tsv(&path)?;
        let mut reference = Self::new();
        for (i, record) in records.iter().enumerate() {
            let sequence = record.sequence.trim().as_bytes();
            if sequence.is_empty()
                || !sequence.iter().all(|b| b"ACGTN".contains(&b.to_ascii_uppercase()))
            {
                // Header is line 1
                return Err(BarcodeError::input_format(
                    &path,
                    Some(i + 2),
                    format!("invalid index sequence '{}' for {}", record.sequence, record.name),
                ));
            }
            reference.insert(record.name.trim(), sequence);
        }
        Ok(reference)
    }
}

impl IndexLookup for IndexReference {
    fn guess_index(&self, segment: &[u8], max_distance: usize) -> Vec<String> {
        if segment.is_empty() {
            return vec![];
        }
        let segment = segment.to_ascii_uppercase();

        if let Some(names) = self.by_sequence.get(segment.as_bstr()) {
            return names.iter().cloned().sorted().dedup().collect();
        }

        self.by_sequence
            .iter()
            .filter(|(sequence, _)| {
                sequence.len() == segment.len()
                    && hamming_distance(sequence, &segment) <= max_distance
            })
            .flat_map(|(_, names)| names.iter().cloned())
            .sorted()
            .dedup()
            .collect()
    }
}
