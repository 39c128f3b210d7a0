//! Local working copy of a platform repository.
//!
//! One directory per repository name under a configured root. Handles
//! clone-or-update, allow-listed file enumeration, window-bounded change
//! listing via `git log`, and content reads with a lossy fallback for
//! non-UTF-8 bytes.
//!
//! A sync invocation is the sole writer to its checkout path: the git
//! operations here are not atomic and concurrent syncs of the same
//! repository would corrupt the checkout.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use chrono::SecondsFormat;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::models::SyncWindow;

/// Allow-list over repository-relative paths: configured extensions and
/// exact filenames, minus the exclude globs. `.git` internals never match.
pub struct FileAllowList {
    extensions: Vec<String>,
    filenames: Vec<String>,
    exclude: GlobSet,
}

impl FileAllowList {
    pub fn new(
        extensions: &[String],
        filenames: &[String],
        exclude_globs: &[String],
    ) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new("**/.git/**")?);
        for pattern in exclude_globs {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            extensions: extensions.to_vec(),
            filenames: filenames.to_vec(),
            exclude: builder.build()?,
        })
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        if self.exclude.is_match(relative_path) {
            return false;
        }
        let path = Path::new(relative_path);
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if self.filenames.iter().any(|f| f == name) {
            return true;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(extension) => {
                let dotted = format!(".{}", extension.to_ascii_lowercase());
                self.extensions.iter().any(|e| *e == dotted)
            }
            None => false,
        }
    }
}

pub struct Workcopy {
    dir: PathBuf,
    branch: String,
}

impl Workcopy {
    pub fn new(root: &Path, repository: &str, branch: &str) -> Self {
        Self {
            dir: root.join(repository),
            branch: branch.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Clone the repository or update an existing checkout to the remote
    /// branch. Returns `true` when this created a fresh clone, meaning no
    /// baseline exists for history-based change detection.
    pub fn ensure(&self, clone_url: &str) -> Result<bool, SyncError> {
        if self.dir.join(".git").exists() {
            self.pull()?;
            Ok(false)
        } else {
            self.clone_from(clone_url)?;
            Ok(true)
        }
    }

    fn clone_from(&self, clone_url: &str) -> Result<(), SyncError> {
        if let Some(parent) = self.dir.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::vcs("clone", e.to_string()))?;
        }

        let mut cmd = Command::new("git");
        cmd.args(["clone", "--branch", &self.branch, "--single-branch", clone_url]);
        cmd.arg(&self.dir);

        // git may echo the URL, credentials included, into its errors.
        run_git(cmd, "clone").map(|_| ()).map_err(|err| match err {
            SyncError::VcsOperationFailed { operation, detail } => SyncError::VcsOperationFailed {
                operation,
                detail: scrub_credentials(&detail, clone_url),
            },
            other => other,
        })
    }

    /// Fetch and hard-reset to the remote branch.
    fn pull(&self) -> Result<(), SyncError> {
        let mut fetch = Command::new("git");
        fetch
            .args(["fetch", "origin", &self.branch])
            .current_dir(&self.dir);
        run_git(fetch, "fetch")?;

        // What the fetch brought in, before the reset makes it current.
        if let Ok(incoming) = self.diff_names("HEAD", "FETCH_HEAD") {
            if !incoming.is_empty() {
                debug!(files = incoming.len(), "fetched changes");
            }
        }

        let remote_ref = format!("origin/{}", self.branch);
        let mut reset = Command::new("git");
        reset
            .args(["reset", "--hard", &remote_ref])
            .current_dir(&self.dir);
        run_git(reset, "reset")?;
        Ok(())
    }

    /// Repository-relative paths that differ between two revisions.
    fn diff_names(&self, from: &str, to: &str) -> Result<Vec<String>, SyncError> {
        let mut cmd = Command::new("git");
        cmd.args(["diff", "--name-only", from, to])
            .current_dir(&self.dir);
        let stdout = run_git(cmd, "diff")?;
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Repository-relative paths touched by commits inside `window`.
    pub fn changed_files(&self, window: SyncWindow) -> Result<BTreeSet<String>, SyncError> {
        let since = window.start.to_rfc3339_opts(SecondsFormat::Secs, false);
        let until = window.end.to_rfc3339_opts(SecondsFormat::Secs, false);

        let mut cmd = Command::new("git");
        cmd.args([
            "log",
            &format!("--since={since}"),
            &format!("--until={until}"),
            "--name-only",
            "--pretty=format:",
        ])
        .current_dir(&self.dir);

        let stdout = run_git(cmd, "log")?;
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// All allow-listed files in the checkout, repository-relative, sorted
    /// for deterministic emission order. Unreadable directory entries are
    /// skipped, not fatal.
    pub fn tracked_files(&self, allow: &FileAllowList) -> Vec<String> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.dir).unwrap_or(entry.path());
            let relative = relative.to_string_lossy().to_string();
            if allow.matches(&relative) {
                files.push(relative);
            }
        }
        files.sort();
        files
    }

    /// Read a file as text. Invalid UTF-8 is replaced rather than fatal; a
    /// file that cannot be read at all is an [`SyncError::UnreadableFile`].
    pub fn read_file(&self, relative_path: &str) -> Result<String, SyncError> {
        let path = self.dir.join(relative_path);
        let bytes = std::fs::read(&path).map_err(|source| SyncError::UnreadableFile {
            path: path.clone(),
            source,
        })?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        })
    }
}

fn run_git(mut cmd: Command, operation: &str) -> Result<String, SyncError> {
    let output = cmd
        .output()
        .map_err(|e| SyncError::vcs(operation, format!("failed to execute git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SyncError::vcs(operation, stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Strip the userinfo portion of the clone URL out of git's error output so
/// an access token never reaches the logs.
fn scrub_credentials(detail: &str, clone_url: &str) -> String {
    if let Some(rest) = clone_url.strip_prefix("https://") {
        let authority = rest.split('/').next().unwrap_or(rest);
        if let Some((userinfo, _)) = authority.rsplit_once('@') {
            if !userinfo.is_empty() {
                return detail.replace(userinfo, "***");
            }
        }
    }
    detail.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_list() -> FileAllowList {
        FileAllowList::new(
            &[".cs".to_string(), ".md".to_string()],
            &["README".to_string(), "Makefile".to_string()],
            &["vendor/**".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let allow = allow_list();
        assert!(allow.matches("src/Program.cs"));
        assert!(allow.matches("src/Program.CS"));
        assert!(allow.matches("docs/guide.md"));
        assert!(!allow.matches("src/main.rs"));
    }

    #[test]
    fn test_exact_filenames_match_without_extension() {
        let allow = allow_list();
        assert!(allow.matches("README"));
        assert!(allow.matches("sub/dir/Makefile"));
        assert!(!allow.matches("NOTES"));
    }

    #[test]
    fn test_git_internals_and_excludes_never_match() {
        let allow = allow_list();
        assert!(!allow.matches(".git/config.cs"));
        assert!(!allow.matches("sub/.git/hooks/pre-commit.cs"));
        assert!(!allow.matches("vendor/lib/code.cs"));
    }

    #[test]
    fn test_scrub_credentials_removes_token() {
        let detail = "fatal: unable to access 'https://pat123@dev.azure.com/org/proj/_git/repo'";
        let scrubbed =
            scrub_credentials(detail, "https://pat123@dev.azure.com/org/proj/_git/repo");
        assert!(!scrubbed.contains("pat123"));
        assert!(scrubbed.contains("***@dev.azure.com"));
    }

    #[test]
    fn test_scrub_credentials_leaves_plain_urls_alone() {
        let detail = "fatal: repository not found";
        assert_eq!(
            scrub_credentials(detail, "/tmp/fixtures/repo"),
            "fatal: repository not found"
        );
    }
}
