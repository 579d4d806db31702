//! A library for counting Illumina barcodes and guessing the barcodes of under-represented samples.
//!
//! # Overview
//!
//! The flow of data is as follows:
//!
//! - [`aggregate::count_barcodes`] counts each per-tile barcode file into its own
//!   [`count_index::MemoryCountIndex`] on a worker thread, hands it back as a
//!   [`count_index::PersistedCountIndex`] and merges it into a single reduction index.
//! - [`ranked_table`] writes the reduction index most abundant first, splitting barcodes into
//!   their two index reads and naming them with an [`index_reference::IndexLookup`].
//! - [`guesser::BarcodeGuesser`] combines the ranked table with the Picard metrics read by
//!   [`demux_metrics`] to propose barcodes for samples that received too few reads.
#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod aggregate;
pub mod count_index;
pub mod demux_metrics;
pub mod errors;
pub mod guesser;
pub mod index_reference;
pub mod opts;
pub mod ranked_table;
pub mod run;
pub mod utils;
