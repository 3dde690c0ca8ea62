//! Shard ids and the input/output paths derived from them.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use tracing::debug;

use crate::config::{BatchConfig, Layout};

/// One batch of extractor work: an input id list and the CSV it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: String,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Shard {
    pub fn new(data_dir: &Path, id: &str, layout: &Layout) -> Self {
        Self {
            id: id.to_string(),
            input: data_dir.join(format!("{}{}", layout.input_prefix, id)),
            output: data_dir.join(format!(
                "{}{}.{}",
                layout.output_prefix, id, layout.output_extension
            )),
        }
    }
}

/// `"00"`, `"01"`, ... for `0..count`, padded to `width` digits.
pub fn numbered_ids(count: usize, width: usize) -> Vec<String> {
    (0..count).map(|i| format!("{:0width$}", i)).collect()
}

/// Ids of the input files currently present in `data_dir`, sorted.
pub fn discover_ids(data_dir: &Path, layout: &Layout) -> Result<Vec<String>> {
    let dir = data_dir.to_string_lossy();
    let pattern = format!(
        "{}/{}*",
        glob::Pattern::escape(&dir),
        glob::Pattern::escape(&layout.input_prefix)
    );

    let mut ids = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("bad glob pattern {}", pattern))? {
        let path = entry?;
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(id) = name.strip_prefix(&layout.input_prefix) {
            if !id.is_empty() {
                ids.push(id.to_string());
            }
        }
    }
    ids.sort();
    debug!(count = ids.len(), dir = %data_dir.display(), "discovered shard inputs");
    Ok(ids)
}

/// Shard ids for this run: explicit list, then discovery, then the numbered range.
///
/// Duplicate ids are dropped, keeping the first occurrence, so every
/// shard writes a distinct output.
pub fn resolve_ids(config: &BatchConfig) -> Result<Vec<String>> {
    let ids = if !config.shards.is_empty() {
        config.shards.clone()
    } else if config.discover {
        let data_dir = config.data_dir();
        if !data_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "data directory does not exist: {}",
                data_dir.display()
            ));
        }
        discover_ids(&data_dir, &config.layout)?
    } else {
        numbered_ids(config.shard_count, config.pad_width)
    };

    let mut seen = HashSet::new();
    Ok(ids.into_iter().filter(|id| seen.insert(id.clone())).collect())
}

pub fn plan(config: &BatchConfig) -> Result<Vec<Shard>> {
    let data_dir = config.data_dir();
    Ok(resolve_ids(config)?
        .iter()
        .map(|id| Shard::new(&data_dir, id, &config.layout))
        .collect())
}

/// Read and count the non-empty lines of an input list (for log output).
pub fn count_entries(input: &Path) -> Result<usize> {
    let text = fs::read_to_string(input).with_context(|| format!("read {}", input.display()))?;
    Ok(text.lines().filter(|l| !l.trim().is_empty()).count())
}
