use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::workcopy::FileAllowList;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub project: ProjectConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub code: CodeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    /// Azure DevOps project name.
    pub name: String,
    /// Repository to harvest within the project.
    pub repository: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Documents per emitted batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Work-item lookback for a full load, in days.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// Pull-request status and work-item state filter; `"all"` disables it.
    #[serde(default = "default_state_filter")]
    pub state_filter: String,
    /// Emit a repository overview document (README body) at the head of the
    /// code segment.
    #[serde(default = "default_true")]
    pub include_repository: bool,
    #[serde(default = "default_true")]
    pub include_code: bool,
    #[serde(default = "default_true")]
    pub include_pull_requests: bool,
    #[serde(default = "default_true")]
    pub include_work_items: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            window_days: default_window_days(),
            state_filter: default_state_filter(),
            include_repository: true,
            include_code: true,
            include_pull_requests: true,
            include_work_items: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodeConfig {
    /// File extensions to harvest. Normalized to lowercase with a leading
    /// dot at load time.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Exact filenames harvested regardless of extension.
    #[serde(default = "default_allow_filenames")]
    pub allow_filenames: Vec<String>,
    /// Glob patterns excluded from the file walk (`**/.git/**` always is).
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Parent directory for local checkouts, one subdirectory per
    /// repository name.
    #[serde(default = "default_workcopy_root")]
    pub workcopy_root: PathBuf,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            allow_filenames: default_allow_filenames(),
            exclude_globs: Vec::new(),
            workcopy_root: default_workcopy_root(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_window_days() -> i64 {
    180
}
fn default_state_filter() -> String {
    "all".to_string()
}
fn default_true() -> bool {
    true
}
fn default_extensions() -> Vec<String> {
    vec![".cs".to_string()]
}
fn default_allow_filenames() -> Vec<String> {
    vec![
        "README".to_string(),
        "README.md".to_string(),
        "README.txt".to_string(),
    ]
}
fn default_workcopy_root() -> PathBuf {
    PathBuf::from("./workcopies")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.project.name.trim().is_empty() {
        anyhow::bail!("project.name must not be empty");
    }
    if config.project.repository.trim().is_empty() {
        anyhow::bail!("project.repository must not be empty");
    }
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be >= 1");
    }
    if config.sync.window_days < 1 {
        anyhow::bail!("sync.window_days must be >= 1");
    }

    // ".CS", "cs", and ".cs" in config all mean the same thing.
    for extension in &mut config.code.extensions {
        let mut normalized = extension.to_ascii_lowercase();
        if !normalized.starts_with('.') {
            normalized.insert(0, '.');
        }
        *extension = normalized;
    }

    // Surface a bad exclude glob at startup instead of mid-sync.
    FileAllowList::new(
        &config.code.extensions,
        &config.code.allow_filenames,
        &config.code.exclude_globs,
    )
    .with_context(|| "Failed to compile code.exclude_globs")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("azh.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[project]
name = "codat"
repository = "Infrastructure-As-Code"
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.project.branch, "main");
        assert_eq!(config.sync.batch_size, 16);
        assert_eq!(config.sync.window_days, 180);
        assert!(config.sync.include_work_items);
        assert_eq!(config.code.extensions, vec![".cs".to_string()]);
    }

    #[test]
    fn test_extensions_are_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[project]
name = "codat"
repository = "repo"

[code]
extensions = ["CS", ".Md", "ts"]
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.code.extensions, vec![".cs", ".md", ".ts"]);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[project]
name = "codat"
repository = "repo"

[sync]
batch_size = 0
"#,
        );

        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_bad_exclude_glob_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[project]
name = "codat"
repository = "repo"

[code]
exclude_globs = ["vendor/{**"]
"#,
        );

        assert!(load_config(&path).is_err());
    }
}
