//! Launching one extractor per shard and collecting the results.

use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use tracing::{debug, info, warn};

use crate::shard::{count_entries, Shard};

/// Extractor command line, already split into program and leading args.
#[derive(Debug, Clone)]
pub struct Extractor {
    pub program: String,
    pub args: Vec<String>,
    pub input_flag: String,
    pub output_flag: String,
}

impl Extractor {
    pub fn new(argv: Vec<String>, input_flag: &str, output_flag: &str) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            input_flag: input_flag.to_string(),
            output_flag: output_flag.to_string(),
        })
    }

    pub fn command(&self, shard: &Shard) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&self.input_flag)
            .arg(&shard.input)
            .arg(&self.output_flag)
            .arg(&shard.output)
            .stdin(Stdio::null());
        cmd
    }

    /// The command as it would be typed in a shell.
    pub fn display(&self, shard: &Shard) -> String {
        let input = shard.input.to_string_lossy();
        let output = shard.output.to_string_lossy();
        let mut words = vec![self.program.as_str()];
        words.extend(self.args.iter().map(String::as_str));
        words.extend([
            self.input_flag.as_str(),
            input.as_ref(),
            self.output_flag.as_str(),
            output.as_ref(),
        ]);
        // Only fails on interior NUL, which `Command` rejects anyway.
        shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
    }
}

/// A launched extractor whose completion has not been observed yet.
#[derive(Debug)]
pub struct Running {
    pub shard: Shard,
    child: Child,
}

/// Result of the fan-out loop.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub running: Vec<Running>,
    /// Inputs that were not regular files.
    pub skipped: Vec<PathBuf>,
    /// Shards whose extractor could not be started.
    pub spawn_failed: Vec<String>,
    /// Command lines printed instead of launched.
    pub dry_run: Vec<String>,
}

/// How one launched shard ended.
#[derive(Debug)]
pub struct Completion {
    pub shard: Shard,
    pub status: Option<ExitStatus>,
}

impl Completion {
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Start the extractor for every shard whose input exists. Does not wait.
pub fn dispatch(shards: &[Shard], extractor: &Extractor, dry_run: bool) -> Dispatched {
    let mut out = Dispatched::default();

    for shard in shards {
        if !shard.input.is_file() {
            warn!("input file {} not found, skipping", shard.input.display());
            out.skipped.push(shard.input.clone());
            continue;
        }

        if dry_run {
            let line = extractor.display(shard);
            println!("[dry-run] {}", line);
            out.dry_run.push(line);
            continue;
        }

        match count_entries(&shard.input) {
            Ok(n) => info!("processing {} ({} ids)", shard.input.display(), n),
            Err(_) => info!("processing {}", shard.input.display()),
        }

        match extractor.command(shard).spawn() {
            Ok(child) => {
                debug!(shard = %shard.id, pid = child.id(), "extractor started");
                out.running.push(Running {
                    shard: shard.clone(),
                    child,
                });
            }
            Err(e) => {
                warn!(shard = %shard.id, err = %e, "failed to start {}", extractor.program);
                out.spawn_failed.push(shard.id.clone());
            }
        }
    }

    out
}

impl Dispatched {
    pub fn launched(&self) -> Vec<String> {
        self.running.iter().map(|r| r.shard.id.clone()).collect()
    }

    /// Block on every running extractor. Failures are logged, never returned.
    pub fn join(&mut self) -> Vec<Completion> {
        let mut done = Vec::with_capacity(self.running.len());
        for Running { shard, mut child } in self.running.drain(..) {
            let status = match child.wait() {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(shard = %shard.id, err = %e, "could not wait for extractor");
                    None
                }
            };
            match status {
                Some(s) if s.success() => debug!(shard = %shard.id, "extractor finished"),
                Some(s) => warn!(
                    shard = %shard.id,
                    exit_code = ?s.code(),
                    "extractor failed for {}",
                    shard.input.display()
                ),
                None => {}
            }
            done.push(Completion { shard, status });
        }
        done
    }

    /// Leave the extractors running in the background.
    pub fn detach(&mut self) -> usize {
        let n = self.running.len();
        if n > 0 {
            warn!(
                running = n,
                "not waiting for extractors; the merged file may be incomplete"
            );
        }
        self.running.clear();
        n
    }
}
