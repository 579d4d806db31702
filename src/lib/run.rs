use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::info;

use crate::{
    aggregate::count_and_sort_barcodes,
    guesser::{write_guessed_barcodes, BarcodeGuesser, MatchType},
    index_reference::{IndexLookup, IndexReference},
    opts::{Command, CountBarcodesOpts, GuessBarcodesOpts, Opts},
};

/// Run the subcommand given on the command line.
pub fn run(opts: Opts) -> Result<(), anyhow::Error> {
    match opts.command {
        Command::CountBarcodes(opts) => run_count_barcodes(&opts),
        Command::GuessBarcodes(opts) => run_guess_barcodes(&opts),
    }
}

/// Count the barcodes of every tile file and write the ranked table.
pub fn run_count_barcodes(opts: &CountBarcodesOpts) -> Result<(), anyhow::Error> {
    let config = opts.as_aggregator_config()?;
    let tile_files = opts.tile_files()?;
    ensure_parent_exists(&opts.output)?;

    let custom_reference;
    let reference: &dyn IndexLookup = match &opts.index_reference {
        Some(path) => {
            custom_reference = load_reference(path)?;
            &custom_reference
        }
        None => IndexReference::illumina(),
    };

    info!("Reading {} tile files", tile_files.len());
    let written = count_and_sort_barcodes(&tile_files, &opts.output, &config, reference)
        .context("Failed to count barcodes")?;
    info!("Wrote {} barcodes to {}", written, opts.output.to_string_lossy());
    Ok(())
}

/// Guess the barcodes of under-represented samples and write the report.
pub fn run_guess_barcodes(opts: &GuessBarcodesOpts) -> Result<(), anyhow::Error> {
    let config = opts.as_guesser_config()?;
    ensure_parent_exists(&opts.output)?;

    let custom_reference;
    let reference: &dyn IndexLookup = match &opts.index_reference {
        Some(path) => {
            custom_reference = load_reference(path)?;
            &custom_reference
        }
        None => IndexReference::illumina(),
    };

    let guesser =
        BarcodeGuesser::from_paths(&opts.barcodes, &opts.picard_metrics, config.rows_limit, reference)
            .with_context(|| {
                format!(
                    "Failed to read {} or {}",
                    opts.barcodes.to_string_lossy(),
                    opts.picard_metrics.to_string_lossy()
                )
            })?;
    let results = guesser.find_uncertain_barcodes(&config)?;

    let guessed = results.iter().filter(|r| r.match_type != MatchType::None).count();
    info!("Guessed barcodes for {} of {} samples", guessed, results.len());
    write_guessed_barcodes(&opts.output, &results)
        .with_context(|| format!("Failed to write {}", opts.output.to_string_lossy()))?;
    Ok(())
}

fn load_reference(path: &Path) -> Result<IndexReference> {
    let reference = IndexReference::from_path(path)
        .with_context(|| format!("Failed to read index reference {}", path.to_string_lossy()))?;
    info!("Loaded {} index sequences from {}", reference.len(), path.to_string_lossy());
    Ok(reference)
}

fn ensure_parent_exists(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        ensure!(
            parent.as_os_str().is_empty() || parent.exists(),
            "Output directory does not exist: {}",
            parent.to_string_lossy()
        );
    }
    Ok(())
}
