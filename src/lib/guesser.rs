//! Guessing the true barcodes of under-represented samples.
//!
//! A sample that received far fewer reads than its share of a balanced pool was often
//! demultiplexed with the wrong barcodes.  Its reads then show up in the ranked barcode table as
//! an abundant *novel* pair, one that is no sample's expected pair.  [`BarcodeGuesser`] flags such
//! samples and proposes, for each, the novel pair most likely to be its true barcodes:
//!
//! 1. the most abundant pair sharing exactly one barcode with the expected pair, reported as
//!    `exact` when it is the expected pair with index 2 reverse complemented (i5 read on the
//!    other strand) and as `partial` otherwise;
//! 2. `abundance-only`: the most abundant pair sharing no barcode with any other sample;
//! 3. `none`: nothing to propose.
//!
//! Samples are matched independently, so the same novel pair may be proposed for several
//! samples.

use std::path::Path;

use ahash::AHashSet;
use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    demux_metrics::{read_demux_metrics, DemuxMetrics, SampleExpectation},
    errors::BarcodeError,
    index_reference::IndexLookup,
    ranked_table::{read_ranked_table, RankedBarcodeRow},
    utils::{has_no_call, reverse_complement, s},
};

/// Default sensitivity of automatic low-abundance detection.
pub const DEFAULT_OUTLIER_THRESHOLD: f64 = 0.775;

/// Default minimum fraction of reads assigned to any sample.
pub const DEFAULT_EXPECTED_ASSIGNED_FRACTION: f64 = 0.7;

/// Default number of ranked barcode rows searched for novel pairs.
pub const DEFAULT_ROWS_LIMIT: usize = 1000;

/// Default name prefixes of negative control samples.
pub const DEFAULT_NEGATIVE_CONTROL_PREFIXES: [&str; 4] = ["neg", "water", "NTC", "H2O"];

/// The header of the guessed barcode report.
pub const GUESS_REPORT_HEADER: [&str; 12] = [
    "sample_name",
    "expected_barcode_1",
    "expected_barcode_2",
    "expected_barcode_1_name",
    "expected_barcode_2_name",
    "expected_barcodes_read_count",
    "guessed_barcode_1",
    "guessed_barcode_2",
    "guessed_barcode_1_name",
    "guessed_barcode_2_name",
    "guessed_barcodes_read_count",
    "match_type",
];

/// Which samples to guess barcodes for.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleSelection {
    /// The named samples.
    Names(Vec<String>),
    /// Samples with fewer reads than the threshold.
    ReadCountThreshold(u64),
    /// Samples with far fewer reads than their share of a balanced pool.
    Automatic,
}

impl SampleSelection {
    /// Select samples from the mutually exclusive command line options.
    ///
    /// # Errors
    ///
    /// - [`BarcodeError::Configuration`] if both names and a threshold are given
    pub fn from_options(
        names: Option<Vec<String>>,
        threshold: Option<u64>,
    ) -> Result<Self, BarcodeError> {
        match (names, threshold) {
            (Some(_), Some(_)) => Err(BarcodeError::Configuration(
                "Sample names and a read count threshold cannot both be given".to_string(),
            )),
            (Some(names), None) if names.is_empty() => Err(BarcodeError::Configuration(
                "At least one sample name must be given".to_string(),
            )),
            (Some(names), None) => Ok(Self::Names(names)),
            (None, Some(threshold)) => Ok(Self::ReadCountThreshold(threshold)),
            (None, None) => Ok(Self::Automatic),
        }
    }
}

/// How negative control samples are identified during automatic selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegativeControls {
    /// The given number of samples are controls.  Only the balanced pool share is adjusted, no
    /// particular sample is excluded from flagging.
    Count(usize),
    /// Samples whose names start with any of the prefixes, ignoring case.
    Prefixes(Vec<String>),
}

impl Default for NegativeControls {
    fn default() -> Self {
        Self::Prefixes(DEFAULT_NEGATIVE_CONTROL_PREFIXES.iter().map(|p| p.to_string()).collect())
    }
}

impl NegativeControls {
    /// Identify negative controls from the mutually exclusive command line options, falling back
    /// to the default prefixes.
    ///
    /// # Errors
    ///
    /// - [`BarcodeError::Configuration`] if both a count and prefixes are given
    pub fn from_options(
        count: Option<usize>,
        prefixes: Option<Vec<String>>,
    ) -> Result<Self, BarcodeError> {
        match (count, prefixes) {
            (Some(_), Some(_)) => Err(BarcodeError::Configuration(
                "A number of negative controls and negative control prefixes cannot both be given"
                    .to_string(),
            )),
            (Some(count), None) => Ok(Self::Count(count)),
            (None, Some(prefixes)) => Ok(Self::Prefixes(prefixes)),
            (None, None) => Ok(Self::default()),
        }
    }
}

/// Configuration of the barcode guesser.
#[derive(Debug, Clone)]
pub struct GuesserConfig {
    pub selection: SampleSelection,
    /// A sample is flagged when it has fewer than this fraction of its balanced pool share.
    pub outlier_threshold: f64,
    /// The minimum fraction of all reads that must be assigned to a sample.
    pub expected_assigned_fraction: f64,
    pub negative_controls: NegativeControls,
    /// The number of most abundant ranked barcode rows searched.
    pub rows_limit: usize,
}

impl Default for GuesserConfig {
    fn default() -> Self {
        Self {
            selection: SampleSelection::Automatic,
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
            expected_assigned_fraction: DEFAULT_EXPECTED_ASSIGNED_FRACTION,
            negative_controls: NegativeControls::default(),
            rows_limit: DEFAULT_ROWS_LIMIT,
        }
    }
}

impl GuesserConfig {
    /// # Errors
    ///
    /// - [`BarcodeError::Configuration`] if a threshold or the row limit is out of range
    pub fn validate(&self) -> Result<(), BarcodeError> {
        if !(self.outlier_threshold > 0.0) {
            return Err(BarcodeError::Configuration(format!(
                "The outlier threshold must be positive, found {}",
                self.outlier_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.expected_assigned_fraction) {
            return Err(BarcodeError::Configuration(format!(
                "The expected assigned fraction must be between 0 and 1, found {}",
                self.expected_assigned_fraction
            )));
        }
        if self.rows_limit == 0 {
            return Err(BarcodeError::Configuration(
                "The rows limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a guessed pair relates to the expected pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MatchType {
    /// A partial match that is the expected pair with index 2 reverse complemented.
    Exact,
    /// Exactly one barcode in common with the expected pair.
    Partial,
    /// No barcode in common, chosen by abundance.
    AbundanceOnly,
    /// Nothing found.
    None,
}

/// A row of the guessed barcode report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuessResult {
    pub sample_name: String,
    pub expected_barcode_1: String,
    pub expected_barcode_2: String,
    pub expected_barcode_1_name: String,
    pub expected_barcode_2_name: String,
    pub expected_barcodes_read_count: u64,
    pub guessed_barcode_1: Option<String>,
    pub guessed_barcode_2: Option<String>,
    pub guessed_barcode_1_name: Option<String>,
    pub guessed_barcode_2_name: Option<String>,
    pub guessed_barcodes_read_count: Option<u64>,
    pub match_type: MatchType,
}

/// A candidate barcode pair from the ranked table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NovelPair {
    barcode1: String,
    barcode2: String,
    count: u64,
}

impl NovelPair {
    fn shares_barcode_with(&self, sample: &SampleExpectation) -> bool {
        self.barcode1 == sample.barcode1
            || (sample.is_dual_index() && self.barcode2 == sample.barcode2)
    }
}

/// Proposes corrected barcode pairs for under-represented samples.
pub struct BarcodeGuesser<'a> {
    metrics: DemuxMetrics,
    ranked: Vec<RankedBarcodeRow>,
    reference: &'a dyn IndexLookup,
}

impl<'a> BarcodeGuesser<'a> {
    pub fn new(
        metrics: DemuxMetrics,
        ranked: Vec<RankedBarcodeRow>,
        reference: &'a dyn IndexLookup,
    ) -> Self {
        Self { metrics, ranked, reference }
    }

    /// Load the ranked barcode table (at most `rows_limit` rows) and Picard metrics.
    pub fn from_paths<P: AsRef<Path>, Q: AsRef<Path>>(
        barcodes: P,
        picard_metrics: Q,
        rows_limit: usize,
        reference: &'a dyn IndexLookup,
    ) -> Result<Self, BarcodeError> {
        let ranked = read_ranked_table(barcodes, rows_limit)?;
        let metrics = read_demux_metrics(picard_metrics)?;
        info!(
            "Loaded {} ranked barcode rows and {} samples",
            ranked.len(),
            metrics.samples.len()
        );
        Ok(Self::new(metrics, ranked, reference))
    }

    pub fn metrics(&self) -> &DemuxMetrics {
        &self.metrics
    }

    /// Guess barcodes for every sample chosen by the configured selection.
    ///
    /// # Errors
    ///
    /// - [`BarcodeError::Configuration`] if the configuration is invalid, names an unknown
    ///   sample, or leaves no samples that are not negative controls
    /// - [`BarcodeError::PoolAssignment`] if too few reads were assigned to samples, checked
    ///   before any sample is examined
    pub fn find_uncertain_barcodes(
        &self,
        config: &GuesserConfig,
    ) -> Result<Vec<GuessResult>, BarcodeError> {
        config.validate()?;

        let fraction = self.metrics.assigned_fraction();
        if fraction < config.expected_assigned_fraction {
            return Err(BarcodeError::PoolAssignment {
                fraction,
                minimum: config.expected_assigned_fraction,
            });
        }

        let targets = self.target_samples(config)?;
        info!(
            "Guessing barcodes for {} of {} samples: {}",
            targets.len(),
            self.metrics.samples.len(),
            targets.iter().map(|sample| &sample.sample_name).join(", ")
        );

        let novel = self.novel_pairs(config.rows_limit);
        info!("Found {} novel barcode pairs", novel.len());

        Ok(targets.into_iter().map(|sample| self.guess(sample, &novel)).collect())
    }

    fn target_samples(
        &self,
        config: &GuesserConfig,
    ) -> Result<Vec<&SampleExpectation>, BarcodeError> {
        let samples = &self.metrics.samples;
        match &config.selection {
            SampleSelection::Names(names) => {
                if let Some(unknown) = names.iter().find(|n| self.metrics.sample(n).is_none()) {
                    return Err(BarcodeError::Configuration(format!(
                        "Sample {} is not in the demultiplexing metrics",
                        unknown
                    )));
                }
                Ok(samples.iter().filter(|s| names.contains(&s.sample_name)).collect())
            }
            SampleSelection::ReadCountThreshold(threshold) => {
                Ok(samples.iter().filter(|s| s.read_count < *threshold).collect())
            }
            SampleSelection::Automatic => {
                let (controls, positives) = self.negative_controls(&config.negative_controls)?;
                if positives == 0 {
                    return Err(BarcodeError::Configuration(
                        "Every sample is a negative control, no pool share can be computed"
                            .to_string(),
                    ));
                }
                let expected_share = self.metrics.assigned_reads() as f64 / positives as f64;
                let minimum = config.outlier_threshold * expected_share;
                info!(
                    "Expecting {} samples to share the pool, flagging samples with fewer than {:.1} \
                     reads",
                    positives, minimum
                );
                Ok(samples
                    .iter()
                    .filter(|s| !controls.contains(s.sample_name.as_str()))
                    .filter(|s| (s.read_count as f64) < minimum)
                    .collect())
            }
        }
    }

    /// The samples excluded from flagging and the number of samples sharing the pool.
    fn negative_controls(
        &self,
        controls: &NegativeControls,
    ) -> Result<(AHashSet<&str>, usize), BarcodeError> {
        let samples = &self.metrics.samples;
        match controls {
            NegativeControls::Count(count) => {
                if *count > samples.len() {
                    return Err(BarcodeError::Configuration(format!(
                        "{} negative controls were requested but there are only {} samples",
                        count,
                        samples.len()
                    )));
                }
                Ok((AHashSet::new(), samples.len() - count))
            }
            NegativeControls::Prefixes(prefixes) => {
                let prefixes = prefixes.iter().map(|p| p.to_lowercase()).collect_vec();
                let controls: AHashSet<&str> = samples
                    .iter()
                    .map(|s| s.sample_name.as_str())
                    .filter(|name| {
                        let name = name.to_lowercase();
                        prefixes.iter().any(|p| name.starts_with(p.as_str()))
                    })
                    .collect();
                let positives = samples.len() - controls.len();
                Ok((controls, positives))
            }
        }
    }

    /// Called barcode pairs of the top ranked rows that are no sample's expected pair, most
    /// abundant first.
    fn novel_pairs(&self, rows_limit: usize) -> Vec<NovelPair> {
        self.ranked
            .iter()
            .take(rows_limit)
            .map(|row| NovelPair {
                barcode1: row.barcode1.to_ascii_uppercase(),
                barcode2: row.barcode2.to_ascii_uppercase(),
                count: row.count,
            })
            .filter(|pair| {
                !has_no_call(pair.barcode1.as_bytes()) && !has_no_call(pair.barcode2.as_bytes())
            })
            .filter(|pair| !self.metrics.is_expected_pair(&pair.barcode1, &pair.barcode2))
            // Stable, keeps the table order among equal counts
            .sorted_by(|a, b| b.count.cmp(&a.count))
            .collect()
    }

    fn guess(&self, sample: &SampleExpectation, novel: &[NovelPair]) -> GuessResult {
        let (candidate, match_type) = if sample.is_dual_index() {
            let partial = novel
                .iter()
                .find(|p| (p.barcode1 == sample.barcode1) != (p.barcode2 == sample.barcode2));
            match partial {
                Some(pair) => {
                    // The label only; abundance alone decides which pair is chosen
                    let swapped = s(&reverse_complement(sample.barcode2.as_bytes()));
                    if pair.barcode1 == sample.barcode1 && pair.barcode2 == swapped {
                        (Some(pair), MatchType::Exact)
                    } else {
                        (Some(pair), MatchType::Partial)
                    }
                }
                None => self.most_abundant_unclaimed(sample, novel),
            }
        } else {
            self.most_abundant_unclaimed(sample, novel)
        };

        let mut result = GuessResult {
            sample_name: sample.sample_name.clone(),
            expected_barcode_1: sample.barcode1.clone(),
            expected_barcode_2: sample.barcode2.clone(),
            expected_barcode_1_name: self.names(&sample.barcode1),
            expected_barcode_2_name: self.names(&sample.barcode2),
            expected_barcodes_read_count: sample.read_count,
            guessed_barcode_1: None,
            guessed_barcode_2: None,
            guessed_barcode_1_name: None,
            guessed_barcode_2_name: None,
            guessed_barcodes_read_count: None,
            match_type,
        };

        match candidate {
            Some(pair) => {
                info!(
                    "Sample {} ({} reads): guessed {}-{} ({} reads, {} match)",
                    sample.sample_name,
                    sample.read_count,
                    pair.barcode1,
                    pair.barcode2,
                    pair.count,
                    match_type
                );
                result.guessed_barcode_1 = Some(pair.barcode1.clone());
                result.guessed_barcode_2 = Some(pair.barcode2.clone());
                result.guessed_barcode_1_name = Some(self.names(&pair.barcode1));
                result.guessed_barcode_2_name = Some(self.names(&pair.barcode2));
                result.guessed_barcodes_read_count = Some(pair.count);
            }
            None => warn!(
                "No novel barcode pair found for sample {} ({} reads)",
                sample.sample_name, sample.read_count
            ),
        }
        result
    }

    fn most_abundant_unclaimed<'p>(
        &self,
        sample: &SampleExpectation,
        novel: &'p [NovelPair],
    ) -> (Option<&'p NovelPair>, MatchType) {
        let candidate = novel.iter().find(|pair| {
            self.metrics
                .samples
                .iter()
                .filter(|other| other.sample_name != sample.sample_name)
                .all(|other| !pair.shares_barcode_with(other))
        });
        match candidate {
            Some(pair) => (Some(pair), MatchType::AbundanceOnly),
            None => (None, MatchType::None),
        }
    }

    /// Likely names of a barcode, empty for the missing index 2 of single-index samples.
    fn names(&self, barcode: &str) -> String {
        if barcode.is_empty() {
            String::new()
        } else {
            self.reference.likely_names(barcode.as_bytes())
        }
    }
}

/// Write the guessed barcode report as a tab-delimited table with a header.
pub fn write_guessed_barcodes<P: AsRef<Path>>(
    path: P,
    results: &[GuessResult],
) -> Result<(), BarcodeError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_path(path.as_ref())?;
    writer.write_record(&GUESS_REPORT_HEADER)?;
    for result in results {
        writer.serialize(result)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use fgoxide::io::{DelimFile, Io};
    use matches::assert_matches;
    use rstest::rstest;
    use tempfile::tempdir;

    use crate::{
        demux_metrics::{DemuxMetrics, SampleExpectation},
        errors::BarcodeError,
        index_reference::IndexReference,
        ranked_table::RankedBarcodeRow,
    };

    use super::{
        write_guessed_barcodes, BarcodeGuesser, GuessResult, GuesserConfig, MatchType,
        NegativeControls, SampleSelection,
    };

    fn sample(name: &str, barcode1: &str, barcode2: &str, read_count: u64) -> SampleExpectation {
        SampleExpectation {
            sample_name: name.to_string(),
            barcode1: barcode1.to_string(),
            barcode2: barcode2.to_string(),
            read_count,
        }
    }

    fn row(barcode1: &str, barcode2: &str, count: u64) -> RankedBarcodeRow {
        RankedBarcodeRow {
            barcode1: barcode1.to_string(),
            likely_index_names1: "Unknown".to_string(),
            barcode2: barcode2.to_string(),
            likely_index_names2: "Unknown".to_string(),
            count,
        }
    }

    /// Four Nextera samples, one of them badly under-represented, plus a negative control.
    fn metrics() -> DemuxMetrics {
        DemuxMetrics {
            samples: vec![
                sample("sample1", "TAAGGCGA", "TATCCTCT", 1000),
                sample("sample2", "CGTACTAG", "AGAGTAGA", 1000),
                sample("sample3", "AGGCAGAA", "GTAAGGAG", 1000),
                sample("sample4", "TCCTGAGC", "ACTGCATA", 100),
                sample("NTC-1", "GGACTCCT", "AAGGAGTA", 5),
            ],
            unassigned_reads: 300,
        }
    }

    fn threshold(reads: u64) -> GuesserConfig {
        GuesserConfig {
            selection: SampleSelection::ReadCountThreshold(reads),
            ..GuesserConfig::default()
        }
    }

    fn guess(ranked: Vec<RankedBarcodeRow>, config: &GuesserConfig) -> Vec<GuessResult> {
        let guesser = BarcodeGuesser::new(metrics(), ranked, IndexReference::illumina());
        guesser.find_uncertain_barcodes(config).unwrap()
    }

    #[test]
    fn test_sample_selection_is_mutually_exclusive() {
        assert_matches!(
            SampleSelection::from_options(Some(vec!["sample1".to_string()]), Some(10)),
            Err(BarcodeError::Configuration(_))
        );
        assert_matches!(
            SampleSelection::from_options(Some(vec![]), None),
            Err(BarcodeError::Configuration(_))
        );
        assert_eq!(
            SampleSelection::from_options(None, Some(10)).unwrap(),
            SampleSelection::ReadCountThreshold(10)
        );
        assert_eq!(SampleSelection::from_options(None, None).unwrap(), SampleSelection::Automatic);
    }

    #[test]
    fn test_negative_controls_are_mutually_exclusive() {
        assert_matches!(
            NegativeControls::from_options(Some(1), Some(vec!["neg".to_string()])),
            Err(BarcodeError::Configuration(_))
        );
        assert_eq!(NegativeControls::from_options(Some(2), None).unwrap(), NegativeControls::Count(2));
        assert_eq!(NegativeControls::from_options(None, None).unwrap(), NegativeControls::default());
    }

    #[rstest]
    #[case(0.0, 0.7, 1000)]
    #[case(0.775, 1.5, 1000)]
    #[case(0.775, -0.1, 1000)]
    #[case(0.775, 0.7, 0)]
    fn test_invalid_config(
        #[case] outlier_threshold: f64,
        #[case] expected_assigned_fraction: f64,
        #[case] rows_limit: usize,
    ) {
        let config = GuesserConfig {
            outlier_threshold,
            expected_assigned_fraction,
            rows_limit,
            ..GuesserConfig::default()
        };
        assert_matches!(config.validate(), Err(BarcodeError::Configuration(_)));
    }

    #[rstest]
    #[case("exact", MatchType::Exact)]
    #[case("partial", MatchType::Partial)]
    #[case("abundance-only", MatchType::AbundanceOnly)]
    #[case("none", MatchType::None)]
    fn test_match_type_names(#[case] name: &str, #[case] match_type: MatchType) {
        assert_eq!(match_type.to_string(), name);
        assert_eq!(MatchType::from_str(name).unwrap(), match_type);
    }

    #[test]
    fn test_partial_match_preferred_over_abundance() {
        let ranked = vec![
            row("TAAGGCGA", "TATCCTCT", 1000),
            row("ACACACAC", "GTGTGTGT", 200),
            row("TCCTGAGC", "CACACACA", 50),
        ];
        let results = guess(ranked, &threshold(500));
        let result = results.iter().find(|r| r.sample_name == "sample4").unwrap();
        assert_eq!(result.match_type, MatchType::Partial);
        assert_eq!(result.guessed_barcode_1.as_deref(), Some("TCCTGAGC"));
        assert_eq!(result.guessed_barcode_2.as_deref(), Some("CACACACA"));
        assert_eq!(result.guessed_barcodes_read_count, Some(50));
        assert_eq!(result.guessed_barcode_1_name.as_deref(), Some("N704"));
        assert_eq!(result.guessed_barcode_2_name.as_deref(), Some("Unknown"));
    }

    #[test]
    fn test_index2_orientation_swap_is_exact() {
        // ACTGCATA reverse complemented
        let ranked = vec![row("TCCTGAGC", "TATGCAGT", 400), row("TCCTGAGC", "CACACACA", 300)];
        let results = guess(ranked, &threshold(500));
        let result = results.iter().find(|r| r.sample_name == "sample4").unwrap();
        assert_eq!(result.match_type, MatchType::Exact);
        assert_eq!(result.guessed_barcode_2.as_deref(), Some("TATGCAGT"));
        assert_eq!(result.guessed_barcode_2_name.as_deref(), Some("S506"));
    }

    #[test]
    fn test_more_abundant_partial_match_beats_index2_orientation_swap() {
        let ranked = vec![row("TCCTGAGC", "CACACACA", 5000), row("TCCTGAGC", "TATGCAGT", 3)];
        let results = guess(ranked, &threshold(500));
        let result = results.iter().find(|r| r.sample_name == "sample4").unwrap();
        assert_eq!(result.match_type, MatchType::Partial);
        assert_eq!(result.guessed_barcode_1.as_deref(), Some("TCCTGAGC"));
        assert_eq!(result.guessed_barcode_2.as_deref(), Some("CACACACA"));
        assert_eq!(result.guessed_barcodes_read_count, Some(5000));
    }

    #[test]
    fn test_abundance_only_skips_pairs_claimed_by_other_samples() {
        let ranked = vec![
            // Shares index 1 with sample1
            row("TAAGGCGA", "GTGTGTGT", 900),
            // Has a no-call
            row("ACACANAC", "CACACACA", 800),
            row("ACACACAC", "CACACACA", 300),
        ];
        let results = guess(ranked, &threshold(500));
        let result = results.iter().find(|r| r.sample_name == "sample4").unwrap();
        assert_eq!(result.match_type, MatchType::AbundanceOnly);
        assert_eq!(result.guessed_barcode_1.as_deref(), Some("ACACACAC"));
        assert_eq!(result.guessed_barcodes_read_count, Some(300));
    }

    #[test]
    fn test_no_novel_pairs_gives_none() {
        let ranked = vec![row("TAAGGCGA", "TATCCTCT", 1000), row("CGTACTAG", "AGAGTAGA", 1000)];
        let results = guess(ranked, &threshold(500));
        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result.match_type, MatchType::None);
            assert_eq!(result.guessed_barcode_1, None);
            assert_eq!(result.guessed_barcodes_read_count, None);
        }
    }

    #[test]
    fn test_same_pair_may_be_guessed_for_several_samples() {
        let ranked = vec![row("ACACACAC", "CACACACA", 300)];
        let results = guess(ranked, &threshold(500));
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.guessed_barcode_1.as_deref() == Some("ACACACAC")));
    }

    #[rstest]
    #[case(NegativeControls::default())]
    #[case(NegativeControls::Prefixes(vec!["ntc".to_string()]))]
    fn test_automatic_selection(#[case] negative_controls: NegativeControls) {
        let config = GuesserConfig { negative_controls, ..GuesserConfig::default() };
        let results = guess(vec![], &config);
        assert_eq!(results.iter().map(|r| r.sample_name.as_str()).collect::<Vec<_>>(), vec!["sample4"]);
        assert_eq!(results[0].expected_barcode_1_name, "N704");
        assert_eq!(results[0].expected_barcode_2_name, "S506");
        assert_eq!(results[0].expected_barcodes_read_count, 100);
    }

    #[test]
    fn test_negative_control_count_adjusts_pool_share() {
        // 3105 reads over 4 samples, flagged below 0.775 * 776.25 = 601.6 reads
        let config =
            GuesserConfig { negative_controls: NegativeControls::Count(1), ..GuesserConfig::default() };
        let results = guess(vec![], &config);
        assert_eq!(
            results.iter().map(|r| r.sample_name.as_str()).collect::<Vec<_>>(),
            vec!["sample4", "NTC-1"]
        );
    }

    #[test]
    fn test_negative_control_count_keeps_least_abundant_sample_flaggable() {
        let metrics = DemuxMetrics {
            samples: vec![
                sample("sample1", "TAAGGCGA", "TATCCTCT", 1000),
                sample("sample2", "CGTACTAG", "AGAGTAGA", 1000),
                sample("sample3", "AGGCAGAA", "GTAAGGAG", 1000),
                sample("low", "TCCTGAGC", "ACTGCATA", 20),
                sample("blank", "GGACTCCT", "AAGGAGTA", 60),
            ],
            unassigned_reads: 0,
        };
        let config =
            GuesserConfig { negative_controls: NegativeControls::Count(1), ..GuesserConfig::default() };
        let guesser = BarcodeGuesser::new(metrics, vec![], IndexReference::illumina());
        let results = guesser.find_uncertain_barcodes(&config).unwrap();
        assert_eq!(
            results.iter().map(|r| r.sample_name.as_str()).collect::<Vec<_>>(),
            vec!["low", "blank"]
        );
    }

    #[rstest]
    #[case(NegativeControls::Count(5))]
    #[case(NegativeControls::Count(6))]
    fn test_automatic_selection_needs_positive_samples(#[case] negative_controls: NegativeControls) {
        let config = GuesserConfig { negative_controls, ..GuesserConfig::default() };
        let guesser = BarcodeGuesser::new(metrics(), vec![], IndexReference::illumina());
        assert_matches!(
            guesser.find_uncertain_barcodes(&config),
            Err(BarcodeError::Configuration(_))
        );
    }

    #[test]
    fn test_named_selection() {
        let config = GuesserConfig {
            selection: SampleSelection::Names(vec!["sample3".to_string(), "sample1".to_string()]),
            ..GuesserConfig::default()
        };
        let results = guess(vec![], &config);
        assert_eq!(
            results.iter().map(|r| r.sample_name.as_str()).collect::<Vec<_>>(),
            vec!["sample1", "sample3"]
        );

        let config = GuesserConfig {
            selection: SampleSelection::Names(vec!["sample9".to_string()]),
            ..GuesserConfig::default()
        };
        let guesser = BarcodeGuesser::new(metrics(), vec![], IndexReference::illumina());
        assert_matches!(
            guesser.find_uncertain_barcodes(&config),
            Err(BarcodeError::Configuration(_))
        );
    }

    #[test]
    fn test_pool_assignment_checked_first() {
        let mut metrics = metrics();
        metrics.unassigned_reads = 5000;
        let guesser = BarcodeGuesser::new(metrics, vec![], IndexReference::illumina());
        // An unknown sample name would be a configuration error if samples were examined
        let config = GuesserConfig {
            selection: SampleSelection::Names(vec!["sample9".to_string()]),
            ..GuesserConfig::default()
        };
        match guesser.find_uncertain_barcodes(&config) {
            Err(BarcodeError::PoolAssignment { fraction, minimum }) => {
                assert!((fraction - 3105.0 / 8105.0).abs() < 1e-9);
                assert_eq!(minimum, 0.7);
            }
            other => panic!("Expected a pool assignment error, found {:?}", other),
        }
    }

    #[test]
    fn test_single_index_samples() {
        let metrics = DemuxMetrics {
            samples: vec![sample("s1", "TAAGGCGA", "", 1000), sample("s2", "CGTACTAG", "", 10)],
            unassigned_reads: 0,
        };
        let ranked = vec![row("TAAGGCGA", "", 1000), row("GGGGGGGG", "", 40)];
        let guesser = BarcodeGuesser::new(metrics, ranked, IndexReference::illumina());
        let results = guesser.find_uncertain_barcodes(&threshold(100)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].expected_barcode_2_name, "");
        assert_eq!(results[0].match_type, MatchType::AbundanceOnly);
        assert_eq!(results[0].guessed_barcode_1.as_deref(), Some("GGGGGGGG"));
        assert_eq!(results[0].guessed_barcode_2_name.as_deref(), Some(""));
    }

    #[test]
    fn test_write_guessed_barcodes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guessed.tsv");
        let ranked = vec![row("TCCTGAGC", "CACACACA", 50)];
        let results = guess(ranked, &threshold(500));
        write_guessed_barcodes(&path, &results).unwrap();

        let lines = Io::default().read_lines(&path).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("sample_name\texpected_barcode_1\t"));
        assert!(lines[0].ends_with("guessed_barcodes_read_count\tmatch_type"));

        let read_back: Vec<GuessResult> = DelimFile::default().read_tsv(&path).unwrap();
        assert_eq!(read_back, results);
        assert_eq!(read_back[0].match_type, MatchType::Partial);
        assert_eq!(read_back[1].match_type, MatchType::None);
    }
}
