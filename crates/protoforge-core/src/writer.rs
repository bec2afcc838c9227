//! Concurrent, idempotent output stage.
//!
//! Rendered output is handed to an [`OutputWriter`] as independent
//! [`WriteUnit`]s. Each unit runs on a shared worker pool: it optionally
//! pipes the content through an external formatter, then writes only when
//! the content hash differs from what is already on disk, so an unchanged
//! generation run performs no file modifications.
//!
//! `submit` never blocks; the orchestrator calls [`OutputWriter::drain`]
//! exactly once at the end of the run to join every outstanding unit and
//! collect the aggregate [`WriteReport`]. A unit's failure is isolated: it
//! is reported with its path and does not stop sibling units.

use crate::error::{Error, Result};
use regex::RegexBuilder;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use tracing::debug;

/// Default filename rule for the external formatter: C/C++ family sources
/// plus `.proto`.
pub const DEFAULT_FORMAT_RULE: &str =
    r"\.(c|cc|cpp|cxx|h|hpp|hxx|i|ii|ixx|tcc|cppm|c\+\+|proto)$";

/// External source formatter invoked for matching output paths.
#[derive(Debug, Clone)]
pub struct CodeFormatter {
    program: PathBuf,
    file_rule: regex::Regex,
}

impl CodeFormatter {
    /// Create a formatter gated by a case-insensitive filename rule.
    pub fn new(program: impl Into<PathBuf>, file_rule: &str) -> Result<Self> {
        let file_rule = RegexBuilder::new(file_rule)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::invalid_pattern(file_rule, e))?;
        Ok(Self {
            program: program.into(),
            file_rule,
        })
    }

    /// True when the output path matches the filename rule.
    pub fn matches(&self, path: &Path) -> bool {
        self.file_rule.is_match(&path.to_string_lossy())
    }

    /// Pipe content through the formatter, returning the formatted bytes.
    fn format(&self, path: &Path, content: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .arg(format!("--assume-filename={}", path.display()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::format(
                    path,
                    format!("failed to spawn '{}': {}", self.program.display(), e),
                )
            })?;

        let Some(mut stdin) = child.stdin.take() else {
            return Err(Error::format(path, "formatter stdin unavailable"));
        };
        stdin
            .write_all(content)
            .map_err(|e| Error::format(path, format!("failed to feed formatter: {}", e)))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .map_err(|e| Error::format(path, format!("failed to wait for formatter: {}", e)))?;
        if !output.status.success() {
            return Err(Error::format(path, format!("{}", output.status)));
        }
        Ok(output.stdout)
    }
}

/// One independent unit of output work.
#[derive(Debug, Clone)]
pub struct WriteUnit {
    /// Absolute or output-directory-relative target path
    pub path: PathBuf,
    /// Encoded file content
    pub content: Vec<u8>,
    /// Formatter applied when its filename rule matches the path
    pub formatter: Option<CodeFormatter>,
}

/// Outcome of one completed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Content differed (or the file was missing) and was written
    Written,
    /// Content was identical; no I/O performed
    Unchanged,
}

/// Aggregate outcome of a drained writer.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Paths that were written
    pub written: Vec<PathBuf>,
    /// Paths left untouched because the content was identical
    pub unchanged: Vec<PathBuf>,
    /// Failed units with their errors
    pub failures: Vec<(PathBuf, Error)>,
}

impl WriteReport {
    /// True when every unit completed without error.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total number of completed units.
    pub fn total(&self) -> usize {
        self.written.len() + self.unchanged.len() + self.failures.len()
    }
}

struct Outcome {
    path: PathBuf,
    result: Result<WriteStatus>,
}

/// Fire-and-forget write stage backed by a rayon worker pool.
pub struct OutputWriter {
    pool: rayon::ThreadPool,
    tx: mpsc::Sender<Outcome>,
    rx: mpsc::Receiver<Outcome>,
}

impl OutputWriter {
    /// Create a writer with one worker per available core.
    pub fn new() -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("protoforge-write-{}", i))
            .build()
            .map_err(|e| Error::internal(format!("failed to build write pool: {}", e)))?;
        let (tx, rx) = mpsc::channel();
        Ok(Self { pool, tx, rx })
    }

    /// Enqueue a unit; returns immediately.
    pub fn submit(&self, unit: WriteUnit) {
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            let path = unit.path.clone();
            let result = execute(&unit);
            // the receiver outlives every worker; a send failure would mean
            // drain already returned, which drain's join order rules out
            let _ = tx.send(Outcome { path, result });
        });
    }

    /// Join every outstanding unit and aggregate the outcomes.
    pub fn drain(self) -> WriteReport {
        let OutputWriter { pool, tx, rx } = self;
        drop(tx);

        let mut report = WriteReport::default();
        for outcome in rx.iter() {
            match outcome.result {
                Ok(WriteStatus::Written) => report.written.push(outcome.path),
                Ok(WriteStatus::Unchanged) => report.unchanged.push(outcome.path),
                Err(error) => report.failures.push((outcome.path, error)),
            }
        }
        drop(pool);
        report
    }
}

/// Format, compare and conditionally write one unit.
fn execute(unit: &WriteUnit) -> Result<WriteStatus> {
    let data = match &unit.formatter {
        Some(formatter) if formatter.matches(&unit.path) => {
            formatter.format(&unit.path, &unit.content)?
        }
        _ => unit.content.clone(),
    };

    if let Some(parent) = unit.path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::directory_create(parent, e))?;
        }
    }

    if unit.path.exists() {
        let existing = fs::read(&unit.path).map_err(|e| Error::file_read(&unit.path, e))?;
        if blake3::hash(&existing) == blake3::hash(&data) {
            debug!(path = %unit.path.display(), "content unchanged, skipping write");
            return Ok(WriteStatus::Unchanged);
        }
    }

    fs::write(&unit.path, &data).map_err(|e| Error::file_write(&unit.path, e))?;
    debug!(path = %unit.path.display(), bytes = data.len(), "written");
    Ok(WriteStatus::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn unit(path: PathBuf, content: &str) -> WriteUnit {
        WriteUnit {
            path,
            content: content.as_bytes().to_vec(),
            formatter: None,
        }
    }

    #[test]
    fn test_write_then_identical_rewrite_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/task_auth.h");

        let writer = OutputWriter::new().unwrap();
        writer.submit(unit(path.clone(), "struct Auth {};\n"));
        let report = writer.drain();
        assert!(report.is_success());
        assert_eq!(report.written, vec![path.clone()]);

        let writer = OutputWriter::new().unwrap();
        writer.submit(unit(path.clone(), "struct Auth {};\n"));
        let report = writer.drain();
        assert!(report.is_success());
        assert_eq!(report.unchanged, vec![path.clone()]);
        assert!(report.written.is_empty());
    }

    #[test]
    fn test_changed_content_is_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen.cc");

        let writer = OutputWriter::new().unwrap();
        writer.submit(unit(path.clone(), "int a;\n"));
        assert!(writer.drain().is_success());

        let writer = OutputWriter::new().unwrap();
        writer.submit(unit(path.clone(), "int b;\n"));
        let report = writer.drain();
        assert_eq!(report.written, vec![path.clone()]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "int b;\n");
    }

    #[test]
    fn test_failure_is_isolated_from_siblings() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let good = dir.path().join("ok.txt");
        let bad = blocker.join("sub/out.txt");

        let writer = OutputWriter::new().unwrap();
        writer.submit(unit(bad.clone(), "x"));
        writer.submit(unit(good.clone(), "y"));
        let report = writer.drain();

        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, bad);
        assert_eq!(report.written, vec![good.clone()]);
        assert!(good.exists());
    }

    #[test]
    fn test_many_concurrent_units() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new().unwrap();
        for i in 0..64 {
            writer.submit(unit(dir.path().join(format!("f{}.txt", i)), "data"));
        }
        let report = writer.drain();
        assert!(report.is_success());
        assert_eq!(report.total(), 64);
        assert_eq!(report.written.len(), 64);
    }

    #[test]
    fn test_formatter_rule_gating() {
        let formatter = CodeFormatter::new("clang-format", DEFAULT_FORMAT_RULE).unwrap();
        assert!(formatter.matches(Path::new("out/task_auth.h")));
        assert!(formatter.matches(Path::new("out/TASK_AUTH.CPP")));
        assert!(formatter.matches(Path::new("svc.proto")));
        assert!(!formatter.matches(Path::new("README.md")));
        assert!(!formatter.matches(Path::new("mod.rs")));
    }

    #[test]
    fn test_formatter_invalid_rule() {
        assert!(CodeFormatter::new("clang-format", "(").is_err());
    }
}
