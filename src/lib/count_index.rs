//! Barcode count indexes.
//!
//! A [`CountIndex`] maps a raw barcode (the concatenated index reads of one cluster) to the number
//! of times it has been observed. Two forms exist:
//!
//! - [`MemoryCountIndex`] holds counts in a hash map. Each counting worker fills its own, and the
//!   caller keeps a single one as the reduction index.
//! - [`PersistedCountIndex`] is the on-disk hand-off form of a worker's index: a TSV of
//!   `barcode<TAB>count` rows sorted by barcode. It is streamed into the reduction index with
//!   [`PersistedCountIndex::merge_into`] and removed from disk once merged (or dropped).
//!
//! Merging is a per-key sum, so the final counts do not depend on the order in which worker
//! indexes are merged.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use bstr::ByteSlice;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::BarcodeError;

/// Helper type for raw barcode keys.
pub type RawBarcode = Vec<u8>;

/// A barcode and the number of times it was observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarcodeCount {
    /// The barcode.
    pub barcode: String,
    /// The count of the barcode.
    pub count: u64,
}

impl BarcodeCount {
    /// Create a new [`BarcodeCount`] instance.
    pub fn new(barcode: &[u8], count: u64) -> Self {
        Self { barcode: barcode.to_str_lossy().to_string(), count }
    }
}

/// Key to count mapping used to aggregate barcode observations.
pub trait CountIndex {
    /// Add `count` observations of `barcode`, inserting the barcode if it is new.
    fn add(&mut self, barcode: &[u8], count: u64);

    /// Add a single observation of `barcode`.
    fn increment(&mut self, barcode: &[u8]) {
        self.add(barcode, 1);
    }

    /// The number of observations of `barcode`, zero if never seen.
    fn count(&self, barcode: &[u8]) -> u64;

    /// The number of distinct barcodes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The sum of all counts.
    fn total(&self) -> u64;

    /// All (barcode, count) entries in no particular order.
    fn entries(&self) -> Box<dyn Iterator<Item = (&[u8], u64)> + '_>;

    /// Add every count in `other` into this index.
    fn merge_from(&mut self, other: &dyn CountIndex) {
        for (barcode, count) in other.entries() {
            self.add(barcode, count);
        }
    }

    /// Entries ordered by count descending, ties broken by ascending barcode.
    fn iter_sorted_desc(&self) -> std::vec::IntoIter<(&[u8], u64)> {
        self.entries().sorted_unstable_by(|(barcode_a, count_a), (barcode_b, count_b)| {
            count_b.cmp(count_a).then_with(|| barcode_a.cmp(barcode_b))
        })
    }
}

/// A [`CountIndex`] held in memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryCountIndex {
    counts: AHashMap<RawBarcode, u64>,
}

impl MemoryCountIndex {
    /// Create a new, empty [`MemoryCountIndex`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Write this index to `path` so that it can be handed off to another thread and merged
    /// later.  Rows are sorted by barcode.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<PersistedCountIndex, BarcodeError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .from_path(path.as_ref())?;
        for (barcode, count) in self.counts.iter().sorted_unstable_by(|a, b| a.0.cmp(b.0)) {
            writer.serialize(BarcodeCount::new(barcode, *count))?;
        }
        writer.flush()?;
        Ok(PersistedCountIndex {
            path: path.as_ref().to_path_buf(),
            num_barcodes: self.len(),
            total: self.total(),
        })
    }
}

impl CountIndex for MemoryCountIndex {
    fn add(&mut self, barcode: &[u8], count: u64) {
        // Only allocate a key when the barcode is new
        if let Some(counter) = self.counts.get_mut(barcode) {
            *counter += count;
        } else {
            self.counts.insert(barcode.to_vec(), count);
        }
    }

    fn count(&self, barcode: &[u8]) -> u64 {
        self.counts.get(barcode).copied().unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.counts.len()
    }

    fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&[u8], u64)> + '_> {
        Box::new(self.counts.iter().map(|(barcode, count)| (barcode.as_slice(), *count)))
    }
}

/// A worker's [`CountIndex`] persisted to disk.
///
/// The backing file is removed when the index is merged or dropped.
#[derive(Debug)]
pub struct PersistedCountIndex {
    path: PathBuf,
    num_barcodes: usize,
    total: u64,
}

impl PersistedCountIndex {
    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of distinct barcodes in the index.
    pub fn len(&self) -> usize {
        self.num_barcodes
    }

    pub fn is_empty(&self) -> bool {
        self.num_barcodes == 0
    }

    /// The sum of all counts in the index.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Stream every count into `dest`, then delete the backing file.
    ///
    /// Returns the number of observations merged.  Fails if the file does not hold the counts
    /// that were persisted.
    pub fn merge_into(self, dest: &mut dyn CountIndex) -> Result<u64, BarcodeError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .from_path(&self.path)?;

        let mut merged = 0;
        for record in reader.deserialize() {
            let record: BarcodeCount = record?;
            dest.add(record.barcode.as_bytes(), record.count);
            merged += record.count;
        }

        if merged != self.total {
            return Err(BarcodeError::input_format(
                &self.path,
                None,
                format!("expected {} barcode observations but read {}", self.total, merged),
            ));
        }

        std::fs::remove_file(&self.path)?;
        debug!("Merged {} observations from {}", merged, self.path.to_string_lossy());
        Ok(merged)
    }
}

impl Drop for PersistedCountIndex {
    fn drop(&mut self) {
        // Already removed when merged
        let _ = std::fs::remove_file(&self.path);
    }
}
