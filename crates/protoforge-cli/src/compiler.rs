//! External schema-compiler invocation.
//!
//! When no precompiled descriptor set is supplied, `protoc` is run over the
//! configured proto files to produce one. The subprocess is watched with a
//! bounded wait-and-kill policy, and a generated payload is deleted on exit
//! unless explicitly retained.

use anyhow::{bail, Context as _, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Upper bound on one schema-compiler run before forced termination.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(300);

/// Expand `--proto-files` values: literal paths, directories (searched for
/// `.proto` files) and basename patterns with `*` wildcards.
pub fn expand_proto_patterns(patterns: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pattern in patterns {
        let path = Path::new(pattern);
        if path.is_file() {
            files.push(path.to_path_buf());
            continue;
        }
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "proto")
                {
                    files.push(entry.path().to_path_buf());
                }
            }
            continue;
        }
        if pattern.contains('*') {
            expand_wildcard(path, &mut files);
            continue;
        }
        warn!(pattern = %pattern, "proto file pattern matched nothing");
    }
    files
}

/// Match a `dir/base*.proto`-style pattern one directory deep.
fn expand_wildcard(path: &Path, files: &mut Vec<PathBuf>) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Some(name_pattern) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return;
    };
    let regex_text = format!("^{}$", regex_escape_with_wildcards(&name_pattern));
    let Ok(matcher) = regex::Regex::new(&regex_text) else {
        warn!(pattern = %path.display(), "unusable proto file pattern");
        return;
    };

    let mut matched: Vec<PathBuf> = std::fs::read_dir(&dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .map(|n| matcher.is_match(&n.to_string_lossy()))
                    .unwrap_or(false)
        })
        .collect();
    matched.sort();
    files.append(&mut matched);
}

fn regex_escape_with_wildcards(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            c if "\\.+?()[]{}|^$".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// One schema-compiler run producing a descriptor-set payload.
#[derive(Debug)]
pub struct ProtocInvocation {
    pub protoc: PathBuf,
    pub flags: Vec<String>,
    pub includes: Vec<PathBuf>,
    pub proto_files: Vec<PathBuf>,
    pub output: PathBuf,
}

impl ProtocInvocation {
    /// Run the compiler, waiting at most [`COMPILE_TIMEOUT`] before killing
    /// it and aborting the run.
    pub fn run(&self) -> Result<()> {
        if self.proto_files.is_empty() {
            bail!("no proto files matched; nothing to compile");
        }
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create output directory {}", parent.display())
                })?;
            }
        }

        let mut command = Command::new(&self.protoc);
        command
            .arg("-o")
            .arg(&self.output)
            .stdin(Stdio::null());

        // directories of the proto files themselves are implicit includes
        let mut seen_dirs = std::collections::HashSet::new();
        for file in &self.proto_files {
            let dir = file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            if seen_dirs.insert(dir.to_path_buf()) {
                command.arg(format!("-I{}", dir.display()));
            }
        }
        for include in &self.includes {
            if seen_dirs.insert(include.clone()) {
                command.arg(format!("-I{}", include.display()));
            }
        }
        command.args(&self.proto_files);
        command.args(&self.flags);

        debug!(command = ?command, "running schema compiler");
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to run schema compiler '{}'", self.protoc.display()))?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait().context("failed to poll schema compiler")? {
                Some(status) => break status,
                None if started.elapsed() >= COMPILE_TIMEOUT => {
                    warn!("schema compiler timed out, killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!(
                        "schema compiler timed out after {}s",
                        COMPILE_TIMEOUT.as_secs()
                    );
                }
                None => std::thread::sleep(Duration::from_millis(100)),
            }
        };

        if !status.success() {
            bail!("schema compiler failed with {}", status);
        }
        if !self.output.exists() {
            bail!(
                "schema compiler reported success but produced no payload at {}",
                self.output.display()
            );
        }
        Ok(())
    }
}

/// Generated descriptor-set payload, deleted on drop unless retained.
#[derive(Debug)]
pub struct TempPayload {
    path: PathBuf,
    keep: bool,
}

impl TempPayload {
    /// Track a generated payload; `keep` disables the exit-time cleanup.
    pub fn new(path: PathBuf, keep: bool) -> Self {
        Self { path, keep }
    }

    /// Path of the payload.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPayload {
    fn drop(&mut self) {
        if !self.keep && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove generated payload");
            }
        }
    }
}
