use crate::app::ports::FetcherPort;
use crate::domain::{ExternalFileId, FetchResult, FetchedContent};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Phrases download tools print when the item itself does not exist upstream.
static NOT_FOUND_OUTPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfile not found\b|\bno such item\b").expect("static regex is valid")
});

/// Shell exit codes for "tool not executable" and "tool not found".
const SHELL_CANNOT_EXECUTE: i32 = 126;
const SHELL_COMMAND_NOT_FOUND: i32 = 127;

/// Downloads workshop files by running a local command-line tool.
///
/// The tool receives `args` with `{id}` and `{out}` substituted; `{out}` is a
/// fresh scratch directory the tool must write the item into. The directory
/// is removed when the fetch finishes or its future is dropped.
pub struct CliFetcher {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
    not_found_exit_code: i32,
}

impl CliFetcher {
    pub fn new(program: &str, args: Vec<String>, work_dir: &Path, not_found_exit_code: i32) -> Self {
        Self {
            program: program.to_string(),
            args,
            work_dir: work_dir.to_path_buf(),
            not_found_exit_code,
        }
    }

    fn render_args(&self, id: &ExternalFileId, out: &Path) -> Vec<String> {
        let out = out.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{id}", id.as_str()).replace("{out}", &out))
            .collect()
    }

    async fn run(&self, id: &ExternalFileId, out: &Path) -> Result<FetchResult> {
        let output = Command::new(&self.program)
            .args(self.render_args(id, out))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| IngestError::transient(id.as_str(), format!("failed to run {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(external_file_id = %id, status = ?output.status, "download tool finished");

        if output.status.success() {
            return match largest_file(out).await? {
                Some(path) => {
                    let bytes = fs::read(&path).await?;
                    let display_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| id.to_string());
                    Ok(FetchResult::Found(FetchedContent { bytes, display_name }))
                }
                None => Err(IngestError::transient(id.as_str(), "download tool succeeded but wrote no file")),
            };
        }

        if is_not_found(output.status.code(), self.not_found_exit_code, &stdout, &stderr) {
            return Ok(FetchResult::NotFound);
        }

        Err(IngestError::transient(
            id.as_str(),
            format!("download tool exited with {}: {}", output.status, stderr.trim()),
        ))
    }
}

/// Whether a failed run means upstream has no such item.
///
/// Signal deaths and shell launch failures are environment problems, never
/// an upstream answer, whatever the output says.
fn is_not_found(code: Option<i32>, not_found_exit_code: i32, stdout: &str, stderr: &str) -> bool {
    match code {
        None | Some(SHELL_CANNOT_EXECUTE) | Some(SHELL_COMMAND_NOT_FOUND) => false,
        Some(c) if c == not_found_exit_code => true,
        Some(_) => NOT_FOUND_OUTPUT.is_match(stdout) || NOT_FOUND_OUTPUT.is_match(stderr),
    }
}

/// The largest regular file directly inside `dir`, if any.
async fn largest_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut best: Option<(u64, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        if best.as_ref().map_or(true, |(size, _)| meta.len() > *size) {
            best = Some((meta.len(), entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}

#[async_trait]
impl FetcherPort for CliFetcher {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn fetch(&self, id: &ExternalFileId) -> Result<FetchResult> {
        fs::create_dir_all(&self.work_dir).await?;
        let scratch: TempDir = tempfile::Builder::new()
            .prefix(&format!("{}-", id))
            .tempdir_in(&self.work_dir)?;
        self.run(id, scratch.path()).await
    }
}
