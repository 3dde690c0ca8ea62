//! Concatenating the per-shard CSVs into the combined file.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub combined: PathBuf,
    /// Part files in the order they were appended.
    pub parts: Vec<PathBuf>,
    pub bytes: u64,
}

/// Replace `dir/combined_name` with the concatenation of every file in `dir`
/// matching `part_pattern`, in filename order.
///
/// With `dedupe_header` the first line of a part is dropped once an earlier
/// part has written something.
pub fn merge_parts(
    dir: &Path,
    part_pattern: &str,
    combined_name: &str,
    dedupe_header: bool,
) -> Result<MergeSummary> {
    let combined = dir.join(combined_name);
    remove_if_exists(&combined)?;

    let parts = collect_parts(dir, part_pattern, &combined)?;

    let file =
        File::create(&combined).with_context(|| format!("create {}", combined.display()))?;
    let mut writer = BufWriter::new(file);
    let mut bytes = 0u64;
    // Set once a part has contributed bytes, so an empty first part keeps the header.
    let mut header_written = false;

    for part in &parts {
        let file = File::open(part).with_context(|| format!("open {}", part.display()))?;
        let mut reader = BufReader::new(file);
        if dedupe_header && header_written {
            let mut header = Vec::new();
            reader
                .read_until(b'\n', &mut header)
                .with_context(|| format!("read {}", part.display()))?;
        }
        let n = io::copy(&mut reader, &mut writer)
            .with_context(|| format!("append {}", part.display()))?;
        debug!(part = %part.display(), bytes = n, "appended");
        header_written |= n > 0;
        bytes += n;
    }
    writer
        .flush()
        .with_context(|| format!("write {}", combined.display()))?;

    info!(
        "merged {} file(s) into {} ({} bytes)",
        parts.len(),
        combined.display(),
        bytes
    );
    Ok(MergeSummary {
        combined,
        parts,
        bytes,
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

fn collect_parts(dir: &Path, part_pattern: &str, combined: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        part_pattern
    );
    let mut parts = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("bad glob pattern {}", pattern))? {
        let path = entry?;
        if path.is_file() && path != combined {
            parts.push(path);
        }
    }
    parts.sort();
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(dir: &Path, dedupe: bool) -> MergeSummary {
        merge_parts(dir, "metadata-*.csv", "metadata.csv", dedupe).unwrap()
    }

    #[test]
    fn concatenates_in_filename_order_and_drops_old_content() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        fs::write(dir.join("metadata.csv"), "stale\n").unwrap();
        fs::write(dir.join("metadata-02.csv"), "c\n").unwrap();
        fs::write(dir.join("metadata-00.csv"), "a\n").unwrap();
        fs::write(dir.join("metadata-01.csv"), "b\n").unwrap();
        fs::write(dir.join("celex_list-00"), "ignored\n").unwrap();

        let summary = merge(dir, false);
        assert_eq!(
            fs::read_to_string(dir.join("metadata.csv")).unwrap(),
            "a\nb\nc\n"
        );
        assert_eq!(summary.parts.len(), 3);
        assert_eq!(summary.bytes, 6);
        assert!(summary.parts[0].ends_with("metadata-00.csv"));
    }

    #[test]
    fn empty_directory_gives_empty_file() {
        let temp = tempfile::tempdir().unwrap();
        let summary = merge(temp.path(), false);
        assert!(summary.parts.is_empty());
        assert_eq!(fs::read(temp.path().join("metadata.csv")).unwrap(), b"");
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        fs::write(dir.join("metadata-00.csv"), "celex,title\n1,x\n").unwrap();
        fs::write(dir.join("metadata-01.csv"), "celex,title\n2,y\n").unwrap();

        merge(dir, false);
        let first = fs::read(dir.join("metadata.csv")).unwrap();
        merge(dir, false);
        let second = fs::read(dir.join("metadata.csv")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn dedupe_keeps_only_first_header() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        fs::write(dir.join("metadata-00.csv"), "celex,title\n1,x\n").unwrap();
        fs::write(dir.join("metadata-01.csv"), "celex,title\n2,y\n").unwrap();
        fs::write(dir.join("metadata-02.csv"), "celex,title\n").unwrap();

        merge(dir, true);
        assert_eq!(
            fs::read_to_string(dir.join("metadata.csv")).unwrap(),
            "celex,title\n1,x\n2,y\n"
        );
    }

    #[test]
    fn dedupe_keeps_header_after_empty_first_part() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        fs::write(dir.join("metadata-00.csv"), "").unwrap();
        fs::write(dir.join("metadata-01.csv"), "celex,title\n2,y\n").unwrap();
        fs::write(dir.join("metadata-02.csv"), "celex,title\n3,z\n").unwrap();

        merge(dir, true);
        assert_eq!(
            fs::read_to_string(dir.join("metadata.csv")).unwrap(),
            "celex,title\n2,y\n3,z\n"
        );
    }

    #[test]
    fn missing_directory_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(merge_parts(
            &temp.path().join("absent"),
            "metadata-*.csv",
            "metadata.csv",
            false
        )
        .is_err());
    }
}
