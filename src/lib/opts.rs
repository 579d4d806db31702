#![forbid(unsafe_code)]

use std::{path::PathBuf, vec::Vec};

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use read_structure::ReadStructure;

use crate::{
    aggregate::AggregatorConfig,
    errors::BarcodeError,
    guesser::{GuesserConfig, NegativeControls, SampleSelection},
    utils::built_info,
};

pub static TOOL_NAME: &str = "bcguess";

static SHORT_USAGE: &str =
    "Counts Illumina barcodes across tiles and guesses the barcodes of under-represented samples.";

static LONG_USAGE: &str = "
Counts Illumina barcodes across tiles and guesses the barcodes of under-represented samples.

`count-barcodes` reads the per-tile barcode files written by Picard's ExtractIlluminaBarcodes
(one line per cluster, the called barcode in the first column) and writes a table of every
observed barcode pair, most abundant first, annotated with the names of known indexes within
one mismatch.

`guess-barcodes` reads that table together with the ExtractIlluminaBarcodes metrics and, for
samples that received too few reads, proposes the barcode pair they were most likely sequenced
with.  The `match_type` column of its report is one of:

  exact           shares index 1 with the expected pair, and index 2 is the expected index 2
                  reverse complemented (i5 read on the other strand)
  partial         shares exactly one index with the expected pair
  abundance-only  the most abundant pair sharing no index with any other sample
  none            no candidate pair was found

`exact` and `partial` pairs are both chosen by abundance alone; `exact` only labels the choice.

Example invocation:

bcguess count-barcodes \\
  --barcodes-dir barcodes/ \\
  --read-structure 151T8B8B151T \\
  --output barcodes.tsv

bcguess guess-barcodes \\
  --barcodes barcodes.tsv \\
  --picard-metrics barcode_metrics.txt \\
  --output guessed_barcodes.tsv
";

#[derive(Parser, Debug, Clone)]
#[clap(name = TOOL_NAME, version = built_info::VERSION.as_str(), about=SHORT_USAGE, long_about=LONG_USAGE, term_width=0)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Count the barcodes of per-tile barcode files into a ranked table.
    CountBarcodes(CountBarcodesOpts),
    /// Guess the true barcodes of samples that received too few reads.
    ///
    /// Each guess has a match type: `exact` (index 1 shared, index 2 reverse complemented),
    /// `partial` (one index shared), `abundance-only` or `none`.
    GuessBarcodes(GuessBarcodesOpts),
}

#[derive(Args, Debug, Clone)]
pub struct CountBarcodesOpts {
    /// Directory of per-tile barcode files; every file in it is counted.
    #[clap(long, short = 'b', display_order = 1)]
    pub barcodes_dir: Option<PathBuf>,

    /// Per-tile barcode files, instead of `--barcodes-dir`.
    #[clap(long, display_order = 1, multiple_values = true)]
    pub tile_files: Vec<PathBuf>,

    /// The ranked barcode table to write.
    ///
    /// This tool will overwrite an existing file.
    #[clap(long, short = 'o', display_order = 2)]
    pub output: PathBuf,

    /// Read structure from which barcode lengths are taken, e.g. `151T8B8B151T`.
    #[clap(long, short = 'r', display_order = 11)]
    pub read_structure: Option<ReadStructure>,

    /// Length of index read 1, if no read structure is given.
    ///
    /// [default: 8]
    #[clap(long, display_order = 11)]
    pub barcode1_len: Option<usize>,

    /// Length of index read 2, if no read structure is given.
    ///
    /// [default: 8]
    #[clap(long, display_order = 11)]
    pub barcode2_len: Option<usize>,

    /// Write only this many of the most abundant barcodes.
    #[clap(long, short = 'n', display_order = 21)]
    pub truncate_to_length: Option<usize>,

    /// Count barcodes containing uncalled (`.`) bases.
    #[clap(long, display_order = 21)]
    pub include_noise: bool,

    /// Do not write a header line.
    #[clap(long, display_order = 21)]
    pub omit_header: bool,

    /// Tab-delimited file of known indexes with `name` and `sequence` columns, used instead of
    /// the built-in Illumina indexes.
    #[clap(long, display_order = 21)]
    pub index_reference: Option<PathBuf>,

    /// Number of counting threads.
    ///
    /// [default: all CPUs]
    #[clap(long, short = 't', display_order = 31)]
    pub threads: Option<usize>,

    /// Directory in which per-tile counts are staged before they are merged.
    ///
    /// [default: the system temporary directory]
    #[clap(long, display_order = 31)]
    pub scratch_dir: Option<PathBuf>,
}

impl CountBarcodesOpts {
    /// The tile files to count, from `--barcodes-dir` or `--tile-files`.
    pub fn tile_files(&self) -> Result<Vec<PathBuf>, BarcodeError> {
        match (&self.barcodes_dir, self.tile_files.is_empty()) {
            (Some(_), false) => Err(BarcodeError::Configuration(
                "--barcodes-dir and --tile-files cannot both be given".to_string(),
            )),
            (Some(dir), true) => crate::aggregate::tile_files_in_dir(dir),
            (None, false) => Ok(self.tile_files.clone()),
            (None, true) => Err(BarcodeError::Configuration(
                "One of --barcodes-dir or --tile-files must be given".to_string(),
            )),
        }
    }

    /// Build the [`AggregatorConfig`] from the CLI opts.
    pub fn as_aggregator_config(&self) -> Result<AggregatorConfig, BarcodeError> {
        let defaults = AggregatorConfig::default();
        let config = match &self.read_structure {
            Some(_) if self.barcode1_len.is_some() || self.barcode2_len.is_some() => {
                return Err(BarcodeError::Configuration(
                    "--read-structure and barcode lengths cannot both be given".to_string(),
                ))
            }
            Some(read_structure) => AggregatorConfig::from_read_structure(read_structure)?,
            None => AggregatorConfig {
                barcode1_len: self.barcode1_len.unwrap_or(defaults.barcode1_len),
                barcode2_len: self.barcode2_len.unwrap_or(defaults.barcode2_len),
                ..defaults
            },
        };
        Ok(AggregatorConfig {
            truncate_to_length: self.truncate_to_length,
            include_noise: self.include_noise,
            omit_header: self.omit_header,
            threads: self.threads,
            scratch_dir: self.scratch_dir.clone(),
            ..config
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct GuessBarcodesOpts {
    /// The ranked barcode table written by `count-barcodes`.
    #[clap(long, short = 'b', display_order = 1)]
    pub barcodes: PathBuf,

    /// The metrics written by Picard's ExtractIlluminaBarcodes.
    #[clap(long, short = 'm', display_order = 1)]
    pub picard_metrics: PathBuf,

    /// The guessed barcode report to write.
    #[clap(long, short = 'o', display_order = 2)]
    pub output: PathBuf,

    /// Guess barcodes for these samples.
    #[clap(long, short = 's', display_order = 11, multiple_values = true)]
    pub sample_names: Option<Vec<String>>,

    /// Guess barcodes for samples with fewer reads than this.
    ///
    /// When neither sample names nor a threshold are given, samples are chosen by comparing their
    /// reads to their share of a balanced pool.
    #[clap(long, display_order = 11)]
    pub readcount_threshold: Option<u64>,

    /// Flag samples with fewer than this fraction of their share of a balanced pool.
    #[clap(long, default_value = "0.775", display_order = 21)]
    pub outlier_threshold: f64,

    /// Fail if less than this fraction of reads was assigned to samples.
    #[clap(long, default_value = "0.7", display_order = 21)]
    pub expected_assigned_fraction: f64,

    /// The number of negative control samples, left out of the balanced pool share.  No sample
    /// is excluded from flagging.
    #[clap(long, display_order = 21)]
    pub number_of_negative_controls: Option<usize>,

    /// Treat samples whose names start with these prefixes (ignoring case) as negative controls.
    ///
    /// [default: neg water NTC H2O]
    #[clap(long, display_order = 21, multiple_values = true)]
    pub neg_control_prefixes: Option<Vec<String>>,

    /// Number of the most abundant barcode rows searched for candidates.
    #[clap(long, default_value = "1000", display_order = 31)]
    pub rows_limit: usize,

    /// Tab-delimited file of known indexes with `name` and `sequence` columns, used instead of
    /// the built-in Illumina indexes.
    #[clap(long, display_order = 31)]
    pub index_reference: Option<PathBuf>,
}

impl GuessBarcodesOpts {
    /// Build the [`GuesserConfig`] from the CLI opts.
    pub fn as_guesser_config(&self) -> Result<GuesserConfig, BarcodeError> {
        let config = GuesserConfig {
            selection: SampleSelection::from_options(
                self.sample_names.clone(),
                self.readcount_threshold,
            )?,
            outlier_threshold: self.outlier_threshold,
            expected_assigned_fraction: self.expected_assigned_fraction,
            negative_controls: NegativeControls::from_options(
                self.number_of_negative_controls,
                self.neg_control_prefixes.clone(),
            )?,
            rows_limit: self.rows_limit,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Implement defaults that match the CLI options to allow for easier testing.
///
/// Note that these defaults exist only within test code.
#[cfg(test)]
impl Default for CountBarcodesOpts {
    fn default() -> Self {
        Self {
            barcodes_dir: None,
            tile_files: vec![],
            output: PathBuf::default(),
            read_structure: None,
            barcode1_len: None,
            barcode2_len: None,
            truncate_to_length: None,
            include_noise: false,
            omit_header: false,
            index_reference: None,
            threads: None,
            scratch_dir: None,
        }
    }
}

#[cfg(test)]
impl Default for GuessBarcodesOpts {
    fn default() -> Self {
        Self {
            barcodes: PathBuf::default(),
            picard_metrics: PathBuf::default(),
            output: PathBuf::default(),
            sample_names: None,
            readcount_threshold: None,
            outlier_threshold: 0.775,
            expected_assigned_fraction: 0.7,
            number_of_negative_controls: None,
            neg_control_prefixes: None,
            rows_limit: 1000,
            index_reference: None,
        }
    }
}

/// Parse args and set up logging / tracing
pub fn setup() -> Opts {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    Opts::parse()
}

#[cfg(test)]
mod test {
    use std::{path::PathBuf, str::FromStr};

    use clap::Parser;
    use matches::assert_matches;
    use read_structure::ReadStructure;
    use tempfile::tempdir;

    use crate::{
        errors::BarcodeError,
        guesser::{NegativeControls, SampleSelection},
        utils::test_commons::write_tile_file,
    };

    use super::{Command, CountBarcodesOpts, GuessBarcodesOpts, Opts};

    #[test]
    fn test_parse_count_barcodes() {
        let opts = Opts::try_parse_from([
            "bcguess",
            "count-barcodes",
            "--tile-files",
            "t1.txt",
            "t2.txt",
            "--output",
            "barcodes.tsv",
            "--read-structure",
            "151T8B10B151T",
            "--truncate-to-length",
            "100",
            "--omit-header",
        ])
        .unwrap();
        let opts = match opts.command {
            Command::CountBarcodes(opts) => opts,
            other => panic!("Expected count-barcodes, found {:?}", other),
        };
        assert_eq!(opts.tile_files().unwrap(), vec![PathBuf::from("t1.txt"), PathBuf::from("t2.txt")]);

        let config = opts.as_aggregator_config().unwrap();
        assert_eq!(config.barcode1_len, 8);
        assert_eq!(config.barcode2_len, 10);
        assert_eq!(config.truncate_to_length, Some(100));
        assert!(config.omit_header);
        assert!(!config.include_noise);
        assert_eq!(config.threads, None);
    }

    #[test]
    fn test_parse_guess_barcodes_defaults() {
        let opts = Opts::try_parse_from([
            "bcguess",
            "guess-barcodes",
            "--barcodes",
            "barcodes.tsv",
            "--picard-metrics",
            "metrics.txt",
            "--output",
            "guessed.tsv",
        ])
        .unwrap();
        let opts = match opts.command {
            Command::GuessBarcodes(opts) => opts,
            other => panic!("Expected guess-barcodes, found {:?}", other),
        };
        let config = opts.as_guesser_config().unwrap();
        assert_eq!(config.selection, SampleSelection::Automatic);
        assert_eq!(config.negative_controls, NegativeControls::default());
        assert_eq!(config.outlier_threshold, 0.775);
        assert_eq!(config.expected_assigned_fraction, 0.7);
        assert_eq!(config.rows_limit, 1000);
    }

    #[test]
    fn test_barcode_lengths_default_to_eight() {
        let opts = CountBarcodesOpts { barcode2_len: Some(6), ..CountBarcodesOpts::default() };
        let config = opts.as_aggregator_config().unwrap();
        assert_eq!(config.barcode1_len, 8);
        assert_eq!(config.barcode2_len, 6);
    }

    #[test]
    fn test_read_structure_and_lengths_are_exclusive() {
        let opts = CountBarcodesOpts {
            read_structure: Some(ReadStructure::from_str("151T8B8B151T").unwrap()),
            barcode1_len: Some(8),
            ..CountBarcodesOpts::default()
        };
        assert_matches!(opts.as_aggregator_config(), Err(BarcodeError::Configuration(_)));
    }

    #[test]
    fn test_tile_sources_are_exclusive() {
        let dir = tempdir().unwrap();
        let tile = write_tile_file(dir.path(), "s_1_1101_barcode.txt", &["AAAAAAAACCCCCCCC"]);

        let both = CountBarcodesOpts {
            barcodes_dir: Some(dir.path().to_path_buf()),
            tile_files: vec![tile.clone()],
            ..CountBarcodesOpts::default()
        };
        assert_matches!(both.tile_files(), Err(BarcodeError::Configuration(_)));
        assert_matches!(CountBarcodesOpts::default().tile_files(), Err(BarcodeError::Configuration(_)));

        let from_dir = CountBarcodesOpts {
            barcodes_dir: Some(dir.path().to_path_buf()),
            ..CountBarcodesOpts::default()
        };
        assert_eq!(from_dir.tile_files().unwrap(), vec![tile]);
    }

    #[test]
    fn test_guess_selection_options_are_exclusive() {
        let opts = GuessBarcodesOpts {
            sample_names: Some(vec!["sample1".to_string()]),
            readcount_threshold: Some(1000),
            ..GuessBarcodesOpts::default()
        };
        assert_matches!(opts.as_guesser_config(), Err(BarcodeError::Configuration(_)));

        let opts = GuessBarcodesOpts {
            number_of_negative_controls: Some(2),
            neg_control_prefixes: Some(vec!["blank".to_string()]),
            ..GuessBarcodesOpts::default()
        };
        assert_matches!(opts.as_guesser_config(), Err(BarcodeError::Configuration(_)));

        let opts = GuessBarcodesOpts { outlier_threshold: -1.0, ..GuessBarcodesOpts::default() };
        assert_matches!(opts.as_guesser_config(), Err(BarcodeError::Configuration(_)));
    }
}
