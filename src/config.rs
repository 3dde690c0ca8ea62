//! Batch configuration, read from an optional `metabatch.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "metabatch.toml";

/// Runner configuration (TOML).
///
/// Every field is optional; missing fields fall back to the layout the
/// extraction pipeline has always used (eight shards under `output/`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Working directory the data directory is resolved against.
    pub workdir: PathBuf,

    /// Extractor command line, split with shell rules.
    pub extractor: String,

    pub input_flag: String,
    pub output_flag: String,

    /// Number of numbered shards when no explicit list is given.
    pub shard_count: usize,

    /// Zero-padding width of numbered shard ids.
    pub pad_width: usize,

    /// Explicit shard ids. Takes precedence over `shard_count` and `discover`.
    pub shards: Vec<String>,

    /// Derive shard ids from the input files present in the data directory.
    pub discover: bool,

    /// Block on every extractor before merging.
    pub wait: bool,

    /// Keep only the first part's header line in the combined file.
    pub dedupe_header: bool,

    pub layout: Layout,
}

/// File naming inside the data directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    /// Sub-directory of `workdir` holding inputs and outputs.
    pub data_dir: String,
    pub input_prefix: String,
    pub output_prefix: String,
    pub output_extension: String,
    /// File name of the merged output.
    pub combined: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            data_dir: "output".to_string(),
            input_prefix: "celex_list-".to_string(),
            output_prefix: "metadata-".to_string(),
            output_extension: "csv".to_string(),
            combined: "metadata.csv".to_string(),
        }
    }
}

impl Layout {
    /// Glob pattern (relative to the data directory) matching every part file.
    pub fn part_pattern(&self) -> String {
        format!(
            "{}*.{}",
            glob::Pattern::escape(&self.output_prefix),
            glob::Pattern::escape(&self.output_extension)
        )
    }

    fn combined_matches_parts(&self) -> bool {
        glob::Pattern::new(&self.part_pattern())
            .map(|p| p.matches(&self.combined))
            .unwrap_or(false)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            extractor: "python eu_rules_metadata_extractor.py".to_string(),
            input_flag: "--input".to_string(),
            output_flag: "--output".to_string(),
            shard_count: 8,
            pad_width: 2,
            shards: Vec::new(),
            discover: false,
            wait: true,
            dedupe_header: false,
            layout: Layout::default(),
        }
    }
}

impl BatchConfig {
    /// `{workdir}/{layout.data_dir}`.
    pub fn data_dir(&self) -> PathBuf {
        self.workdir.join(&self.layout.data_dir)
    }

    /// Split the extractor command into program and leading arguments.
    pub fn extractor_argv(&self) -> Result<Vec<String>> {
        let parts = shlex::split(&self.extractor).ok_or_else(|| {
            anyhow!(
                "could not parse extractor command (check shell quoting): {}",
                self.extractor
            )
        })?;
        if parts.is_empty() {
            return Err(anyhow!("extractor command cannot be empty"));
        }
        Ok(parts)
    }

    pub fn validate(&self) -> Result<()> {
        self.extractor_argv()?;
        if self.input_flag.trim().is_empty() || self.output_flag.trim().is_empty() {
            return Err(anyhow!("input_flag and output_flag must be non-empty"));
        }
        if self.shards.is_empty() && !self.discover && self.shard_count == 0 {
            return Err(anyhow!("shard_count must be > 0"));
        }
        if self.pad_width == 0 {
            return Err(anyhow!("pad_width must be > 0"));
        }

        let layout = &self.layout;
        for (name, value) in [
            ("layout.data_dir", &layout.data_dir),
            ("layout.input_prefix", &layout.input_prefix),
            ("layout.output_prefix", &layout.output_prefix),
            ("layout.output_extension", &layout.output_extension),
            ("layout.combined", &layout.combined),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must be non-empty"));
            }
        }
        if layout.combined_matches_parts() {
            return Err(anyhow!(
                "layout.combined ({}) must not match the part pattern {}",
                layout.combined,
                layout.part_pattern()
            ));
        }

        for id in &self.shards {
            if id.is_empty() || id.contains('/') || id.contains('\\') {
                return Err(anyhow!("invalid shard id: {:?}", id));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BatchConfig::default()`.
pub fn load_config(path: &Path) -> Result<BatchConfig> {
    if !path.exists() {
        return Ok(BatchConfig::default());
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_config(&text).with_context(|| format!("parse {}", path.display()))
}

pub fn parse_config(text: &str) -> Result<BatchConfig> {
    let config: BatchConfig = toml::from_str(text)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_historical_layout() {
        let config = BatchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.shard_count, 8);
        assert_eq!(config.pad_width, 2);
        assert_eq!(config.data_dir(), Path::new(".").join("output"));
        assert_eq!(config.layout.part_pattern(), "metadata-*.csv");
        assert!(config.wait);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = parse_config(
            r#"
workdir = "/data/eu"
shard_count = 4

[layout]
combined = "all.csv"
"#,
        )
        .unwrap();
        assert_eq!(config.workdir, PathBuf::from("/data/eu"));
        assert_eq!(config.shard_count, 4);
        assert_eq!(config.layout.combined, "all.csv");
        assert_eq!(config.layout.input_prefix, "celex_list-");
        assert_eq!(config.extractor, BatchConfig::default().extractor);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config("shard_cnt = 3").is_err());
    }

    #[test]
    fn missing_file_yields_default() {
        let temp = tempfile::tempdir().unwrap();
        let config = load_config(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(config, BatchConfig::default());
    }

    #[test]
    fn extractor_is_split_with_shell_rules() {
        let config = BatchConfig {
            extractor: "python 'my extractor.py' -v".to_string(),
            ..BatchConfig::default()
        };
        assert_eq!(
            config.extractor_argv().unwrap(),
            vec!["python", "my extractor.py", "-v"]
        );
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad = [
            BatchConfig {
                extractor: "  ".to_string(),
                ..BatchConfig::default()
            },
            BatchConfig {
                extractor: "python 'unterminated".to_string(),
                ..BatchConfig::default()
            },
            BatchConfig {
                shard_count: 0,
                ..BatchConfig::default()
            },
            BatchConfig {
                pad_width: 0,
                ..BatchConfig::default()
            },
            BatchConfig {
                shards: vec!["../etc".to_string()],
                ..BatchConfig::default()
            },
            BatchConfig {
                layout: Layout {
                    combined: "metadata-all.csv".to_string(),
                    ..Layout::default()
                },
                ..BatchConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn part_pattern_matches_literal_prefix() {
        let layout = Layout {
            output_prefix: "meta[v2]?-".to_string(),
            ..Layout::default()
        };
        let pattern = glob::Pattern::new(&layout.part_pattern()).unwrap();
        assert!(pattern.matches("meta[v2]?-03.csv"));
        assert!(!pattern.matches("metav-03.csv"));
    }

    #[test]
    fn zero_count_is_fine_with_explicit_shards() {
        let config = BatchConfig {
            shard_count: 0,
            shards: vec!["03".to_string()],
            ..BatchConfig::default()
        };
        config.validate().unwrap();
    }
}
