//! Scatter-gather counting of Picard per-tile barcode files.
//!
//! Each tile file is counted by its own task in a dedicated thread pool.  A task fills a private
//! [`MemoryCountIndex`], persists it to a scratch directory and sends the handle back over a
//! channel.  The calling thread merges worker indexes into a single reduction index in the order
//! they complete, deleting each worker file as soon as it has been merged.  The first failure
//! cancels tasks that have not started yet and aborts the aggregation; the scratch directory and
//! every partial index in it are removed whether the aggregation succeeds or fails.

use std::{
    io::BufRead,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bstr::ByteSlice;
use fgoxide::io::Io;
use log::{debug, info, warn};
use read_structure::ReadStructure;

use crate::{
    count_index::{CountIndex, MemoryCountIndex, PersistedCountIndex},
    errors::BarcodeError,
    index_reference::IndexLookup,
    ranked_table::{ranked_rows, write_ranked_table},
    utils::s,
};

/// Bases allowed in a called barcode.  `.` marks a base that could not be called.
const ALLOWED_BARCODE_BASES: &[u8] = b"ACGTN.";

/// Marker of a base call that was filtered as noise.
const NOISE_BASE: u8 = b'.';

/// Configuration of a barcode count aggregation.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Number of bases of index read 1 at the start of each barcode.
    pub barcode1_len: usize,
    /// Number of bases of index read 2 following index read 1.
    pub barcode2_len: usize,
    /// Keep only this many of the most abundant barcodes in the output.
    pub truncate_to_length: Option<usize>,
    /// Count barcodes that contain uncalled (`.`) bases.
    pub include_noise: bool,
    /// Do not write a header line to the output.
    pub omit_header: bool,
    /// Number of counting threads, all available CPUs if `None`.
    pub threads: Option<usize>,
    /// Directory in which to create the scratch directory for worker indexes, the system
    /// temporary directory if `None`.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            barcode1_len: 8,
            barcode2_len: 8,
            truncate_to_length: None,
            include_noise: false,
            omit_header: false,
            threads: None,
            scratch_dir: None,
        }
    }
}

impl AggregatorConfig {
    /// Build a configuration with barcode lengths taken from the sample barcode segments of a
    /// read structure, e.g. `151T8B8B151T`.  A missing second (or first) barcode segment has
    /// length zero.
    ///
    /// # Errors
    ///
    /// - [`BarcodeError::Configuration`] if the read structure has more than two sample barcode
    ///   segments, or a sample barcode segment of variable length
    pub fn from_read_structure(read_structure: &ReadStructure) -> Result<Self, BarcodeError> {
        let lengths: Vec<usize> = read_structure
            .sample_barcodes()
            .map(|segment| {
                segment.length().ok_or_else(|| {
                    BarcodeError::Configuration(format!(
                        "Sample barcode segments must have a fixed length: {}",
                        read_structure
                    ))
                })
            })
            .collect::<Result<_, _>>()?;

        if lengths.len() > 2 {
            return Err(BarcodeError::Configuration(format!(
                "Expected at most two sample barcode segments, found {}: {}",
                lengths.len(),
                read_structure
            )));
        }

        Ok(Self {
            barcode1_len: lengths.first().copied().unwrap_or(0),
            barcode2_len: lengths.get(1).copied().unwrap_or(0),
            ..Self::default()
        })
    }

    /// The expected length of a barcode, zero if barcodes are not length checked.
    pub fn barcode_len(&self) -> usize {
        self.barcode1_len + self.barcode2_len
    }
}

/// Resolve the requested number of counting threads.
///
/// `None` uses every CPU; requests beyond the number of CPUs are clamped.
///
/// # Errors
///
/// - [`BarcodeError::Configuration`] if zero threads are requested
pub fn sanitize_thread_count(requested: Option<usize>) -> Result<usize, BarcodeError> {
    let available = num_cpus::get();
    match requested {
        None => Ok(available),
        Some(0) => Err(BarcodeError::Configuration(
            "The number of threads must be at least 1".to_string(),
        )),
        Some(threads) if threads > available => {
            warn!(
                "Requested {} threads but only {} CPUs are available, using {}",
                threads, available, available
            );
            Ok(available)
        }
        Some(threads) => Ok(threads),
    }
}

/// List the per-tile barcode files in a directory, sorted by path.
pub fn tile_files_in_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, BarcodeError> {
    let mut files = vec![];
    for entry in std::fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// The counts of a single tile file, persisted for hand-off to the reduction.
#[derive(Debug)]
pub struct TileCounts {
    /// The tile file that was counted.
    pub tile: PathBuf,
    /// The tile's barcode counts.
    pub index: PersistedCountIndex,
    /// Non-empty lines read.
    pub lines_read: u64,
    /// Barcodes added to the index.
    pub barcodes_counted: u64,
    /// Barcodes skipped because they contain uncalled bases.
    pub noise_skipped: u64,
}

/// Count the barcodes of a single tile file into a private index persisted in `scratch_dir`.
///
/// The barcode is the first tab-delimited field of each line.  Blank lines are skipped, as are
/// barcodes with uncalled bases unless [`AggregatorConfig::include_noise`] is set.
///
/// # Errors
///
/// - [`BarcodeError::InputFormat`] if a barcode is empty, holds bases other than `ACGTN.`, or
///   (when barcode lengths are configured) has the wrong length
pub fn count_tile_file(
    tile: &Path,
    config: &AggregatorConfig,
    scratch_dir: &Path,
    worker_id: usize,
) -> Result<TileCounts, BarcodeError> {
    let expected_len = config.barcode_len();
    let mut reader = Io::default().new_reader(&tile)?;
    let mut index = MemoryCountIndex::new();
    let mut buffer = Vec::with_capacity(128);
    let (mut line_number, mut lines_read, mut barcodes_counted, mut noise_skipped) = (0, 0, 0, 0);

    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            break;
        }
        line_number += 1;

        let line = buffer.trim_end_with(|c| c == '\n' || c == '\r');
        if line.is_empty() {
            continue;
        }
        lines_read += 1;

        let barcode = match line.find_byte(b'\t') {
            Some(end) => &line[..end],
            None => line,
        };
        if barcode.is_empty() {
            return Err(BarcodeError::input_format(tile, Some(line_number), "empty barcode"));
        }
        if let Some(base) = barcode.iter().find(|b| !ALLOWED_BARCODE_BASES.contains(b)) {
            return Err(BarcodeError::input_format(
                tile,
                Some(line_number),
                format!("invalid base '{}' in barcode {}", *base as char, s(barcode)),
            ));
        }
        if expected_len > 0 && barcode.len() != expected_len {
            return Err(BarcodeError::input_format(
                tile,
                Some(line_number),
                format!(
                    "barcode {} has length {}, expected {}",
                    s(barcode),
                    barcode.len(),
                    expected_len
                ),
            ));
        }

        if !config.include_noise && barcode.contains(&NOISE_BASE) {
            noise_skipped += 1;
            continue;
        }
        index.increment(barcode);
        barcodes_counted += 1;
    }

    let file_name = format!("tile_{:06}.counts.tsv", worker_id);
    let index = index.persist(scratch_dir.join(file_name))?;
    Ok(TileCounts { tile: tile.to_path_buf(), index, lines_read, barcodes_counted, noise_skipped })
}

/// What a counting task reports back to the reduction.
enum WorkerMessage {
    Counted(TileCounts),
    Failed { tile: PathBuf, error: BarcodeError },
    /// The task was cancelled before it started.
    Skipped,
}

/// Count the barcodes of every tile file into a single index.
///
/// # Errors
///
/// - [`BarcodeError::Configuration`] if the thread count is invalid
/// - [`BarcodeError::WorkerFailure`] naming the first tile that failed to be counted or merged
pub fn count_barcodes<P: AsRef<Path>>(
    tile_files: &[P],
    config: &AggregatorConfig,
) -> Result<MemoryCountIndex, BarcodeError> {
    let mut reduction = MemoryCountIndex::new();
    if tile_files.is_empty() {
        warn!("No tile files were given, no barcodes will be counted");
        return Ok(reduction);
    }

    let threads = sanitize_thread_count(config.threads)?;
    let scratch = match &config.scratch_dir {
        Some(dir) => tempfile::Builder::new().prefix("barcode_counts-").tempdir_in(dir)?,
        None => tempfile::Builder::new().prefix("barcode_counts-").tempdir()?,
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    info!("Counting barcodes in {} tile files using {} threads", tile_files.len(), threads);
    let (tx, rx) = flume::unbounded();
    let cancelled = Arc::new(AtomicBool::new(false));
    for (worker_id, tile) in tile_files.iter().enumerate() {
        let tile = tile.as_ref().to_path_buf();
        let config = config.clone();
        let scratch_dir = scratch.path().to_path_buf();
        let cancelled = Arc::clone(&cancelled);
        let tx = tx.clone();
        pool.spawn(move || {
            let message = if cancelled.load(Ordering::SeqCst) {
                WorkerMessage::Skipped
            } else {
                match count_tile_file(&tile, &config, &scratch_dir, worker_id) {
                    Ok(counts) => WorkerMessage::Counted(counts),
                    Err(error) => {
                        cancelled.store(true, Ordering::SeqCst);
                        WorkerMessage::Failed { tile, error }
                    }
                }
            };
            // The receiver outlives every sender, a failed send means the caller is unwinding
            let _ = tx.send(message);
        });
    }
    drop(tx);

    // Every task sends exactly one message, so this drains until all tasks are finished
    let mut failure: Option<BarcodeError> = None;
    let (mut tiles_merged, mut tiles_skipped, mut noise_skipped) = (0, 0, 0);
    for message in rx.iter() {
        match message {
            WorkerMessage::Counted(counts) if failure.is_none() => {
                debug!(
                    "Counted {} barcodes ({} distinct, {} noise skipped) from {}",
                    counts.barcodes_counted,
                    counts.index.len(),
                    counts.noise_skipped,
                    counts.tile.to_string_lossy()
                );
                noise_skipped += counts.noise_skipped;
                let tile = counts.tile;
                match counts.index.merge_into(&mut reduction) {
                    Ok(_) => tiles_merged += 1,
                    Err(error) => {
                        cancelled.store(true, Ordering::SeqCst);
                        failure = Some(worker_failure(&tile, error));
                    }
                }
            }
            // Dropping the handle removes the worker's file
            WorkerMessage::Counted(_) => tiles_skipped += 1,
            WorkerMessage::Failed { tile, error } => {
                if failure.is_none() {
                    failure = Some(worker_failure(&tile, error));
                } else {
                    debug!("Ignoring later failure of {}: {:#}", tile.to_string_lossy(), error);
                }
            }
            WorkerMessage::Skipped => tiles_skipped += 1,
        }
    }

    if let Some(failure) = failure {
        debug!("Aborted barcode counting, {} tiles were not merged", tiles_skipped);
        drop(scratch);
        return Err(failure);
    }
    scratch.close()?;

    info!(
        "Counted {} barcodes ({} distinct) from {} tiles, skipped {} noise barcodes",
        reduction.total(),
        reduction.len(),
        tiles_merged,
        noise_skipped
    );
    Ok(reduction)
}

fn worker_failure(tile: &Path, error: BarcodeError) -> BarcodeError {
    BarcodeError::WorkerFailure { tile: tile.to_string_lossy().to_string(), source: Box::new(error) }
}

/// Count the barcodes of every tile file and write them, most abundant first, to `output`.
///
/// Returns the number of rows written, excluding the header.
pub fn count_and_sort_barcodes<P: AsRef<Path>, Q: AsRef<Path>>(
    tile_files: &[P],
    output: Q,
    config: &AggregatorConfig,
    reference: &dyn IndexLookup,
) -> Result<usize, BarcodeError> {
    let index = count_barcodes(tile_files, config)?;
    info!("Found {} distinct barcodes", index.len());

    info!("Writing ranked barcode counts to {}", output.as_ref().to_string_lossy());
    let rows = ranked_rows(&index, config, reference);
    let written = write_ranked_table(&output, rows, config.omit_header)?;
    debug!("Wrote {} of {} barcodes", written, index.len());
    Ok(written)
}
