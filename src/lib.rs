pub mod config;
pub mod dispatch;
pub mod logging;
pub mod merge;
pub mod shard;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use config::{load_config, BatchConfig, DEFAULT_CONFIG_FILE};
use dispatch::{dispatch, Extractor};
use merge::{merge_parts, MergeSummary};

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Run the metadata extractor over every input shard, then merge the CSVs"
)]
pub struct Cli {
    /// TOML config file. Defaults to ./metabatch.toml when present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Working directory containing the `output/` data folder.
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Extractor command, e.g. "python eu_rules_metadata_extractor.py".
    #[arg(long)]
    pub extractor: Option<String>,

    /// Explicit shard ids (e.g. 00 03 07) instead of the numbered range.
    #[arg(long, num_args = 1..)]
    pub shards: Vec<String>,

    /// Number of numbered shards (00..N-1).
    #[arg(long)]
    pub count: Option<usize>,

    /// Take shard ids from the input files present in the data folder.
    #[arg(long)]
    pub discover: bool,

    /// Flag passed before each input path.
    #[arg(long)]
    pub input_flag: Option<String>,

    /// Flag passed before each output path.
    #[arg(long)]
    pub output_flag: Option<String>,

    /// Merge without waiting for extractors to finish (legacy behaviour).
    #[arg(long)]
    pub no_wait: bool,

    /// Run the extractors only.
    #[arg(long)]
    pub skip_merge: bool,

    /// Keep only the first header row in the merged CSV.
    #[arg(long)]
    pub dedupe_header: bool,

    /// Print the extractor commands without running them.
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Overlay command-line values on a loaded config.
    pub fn apply(&self, config: &mut BatchConfig) {
        if let Some(workdir) = &self.workdir {
            config.workdir = workdir.clone();
        }
        if let Some(extractor) = &self.extractor {
            config.extractor = extractor.clone();
        }
        if !self.shards.is_empty() {
            config.shards = self.shards.clone();
        }
        if let Some(count) = self.count {
            config.shard_count = count;
        }
        if let Some(flag) = &self.input_flag {
            config.input_flag = flag.clone();
        }
        if let Some(flag) = &self.output_flag {
            config.output_flag = flag.clone();
        }
        config.discover |= self.discover;
        config.dedupe_header |= self.dedupe_header;
        if self.no_wait {
            config.wait = false;
        }
    }

    fn load(&self) -> Result<BatchConfig> {
        let mut config = match &self.config {
            Some(path) if !path.exists() => {
                bail!("config file does not exist: {}", path.display())
            }
            Some(path) => load_config(path)?,
            None => load_config(Path::new(DEFAULT_CONFIG_FILE))?,
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// What a run did.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub launched: Vec<String>,
    pub skipped: Vec<PathBuf>,
    /// Shards whose extractor could not start or exited non-zero.
    pub failed: Vec<String>,
    /// Extractors still running when the merge started (`--no-wait`).
    pub detached: usize,
    pub merged: Option<MergeSummary>,
}

pub fn run(cli: Cli) -> Result<RunSummary> {
    let config = cli.load()?;
    run_with_config(&config, cli.dry_run, cli.skip_merge)
}

pub fn run_with_config(config: &BatchConfig, dry_run: bool, skip_merge: bool) -> Result<RunSummary> {
    let extractor = Extractor::new(
        config.extractor_argv()?,
        &config.input_flag,
        &config.output_flag,
    )
    .ok_or_else(|| anyhow!("extractor command cannot be empty"))?;

    let shards = shard::plan(config)?;
    info!(
        "{} shard(s) under {}",
        shards.len(),
        config.data_dir().display()
    );

    let mut dispatched = dispatch(&shards, &extractor, dry_run);
    let mut summary = RunSummary {
        launched: dispatched.launched(),
        skipped: dispatched.skipped.clone(),
        failed: dispatched.spawn_failed.clone(),
        ..RunSummary::default()
    };

    if dry_run {
        if !skip_merge {
            println!(
                "[dry-run] merge {} -> {}",
                config.data_dir().join(config.layout.part_pattern()).display(),
                config.data_dir().join(&config.layout.combined).display()
            );
        }
        return Ok(summary);
    }

    if config.wait {
        for done in dispatched.join() {
            if !done.succeeded() {
                summary.failed.push(done.shard.id);
            }
        }
    } else {
        summary.detached = dispatched.detach();
    }

    if !skip_merge {
        summary.merged = Some(merge_parts(
            &config.data_dir(),
            &config.layout.part_pattern(),
            &config.layout.combined,
            config.dedupe_header,
        )?);
    }

    if summary.failed.is_empty() {
        info!(
            "done: {} launched, {} skipped",
            summary.launched.len(),
            summary.skipped.len()
        );
    } else {
        warn!(
            "done: {} launched, {} skipped, {} failed ({})",
            summary.launched.len(),
            summary.skipped.len(),
            summary.failed.len(),
            summary.failed.join(", ")
        );
    }
    Ok(summary)
}
