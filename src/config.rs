use std::path::Path;
use std::time::Duration;

use crate::error::Error;

/// Name of the project configuration file, looked up in the project root.
pub const CONFIG_FILE: &str = ".mdmove.toml";

/// Project configuration loaded from `.mdmove.toml`.
/// Include/exclude patterns are path prefixes applied to markdown files
/// relative to the project root.
#[derive(Debug, Clone)]
pub struct Config {
    /// Permit sources and destinations outside the project root.
    pub allow_outside_root: bool,
    /// Path prefixes never scanned.
    pub exclude: Vec<String>,
    /// Path prefixes scanned; empty means everything.
    pub include: Vec<String>,
    /// Upper bound on documents indexed by one scan.
    pub max_files: usize,
    /// Step execution policy.
    pub transaction: TransactionConfig,
}

/// `[transaction]` table.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransactionConfig {
    /// Skip a failing step instead of rolling everything back.
    pub continue_on_error: bool,
    /// Total attempts per step, including the first.
    pub retry_attempts: u32,
    /// Backoff before the first retry; doubles each retry.
    pub retry_backoff_ms: u64,
}

/// Raw TOML structure for `.mdmove.toml`.
#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct MdmoveTomlConfig {
    #[serde(default)]
    allow_outside_root: bool,
    #[serde(default = "default_exclude")]
    exclude: Vec<String>,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default = "default_max_files")]
    max_files: usize,
    #[serde(default)]
    transaction: TransactionConfig,
}

/// Options for one top-level operation, resolved once from the config file
/// and command-line flags. Nothing downstream consults config directly.
#[allow(clippy::struct_excessive_bools, reason = "each flag is an independent user switch")]
#[derive(Debug, Clone)]
pub struct MoveOptions {
    /// Permit paths outside the project root.
    pub allow_outside_root: bool,
    /// Skip failing steps instead of rolling back.
    pub continue_on_error: bool,
    /// Create missing destination directories.
    pub create_directories: bool,
    /// Plan and report only; never execute.
    pub dry_run: bool,
    /// Overwrite existing destinations.
    pub force: bool,
    /// Retry policy for transaction steps.
    pub retry: RetryPolicy,
    /// Include per-reference change records in human output.
    pub verbose: bool,
    /// Run the link validator over touched files afterwards.
    pub verify: bool,
}

/// Exponential backoff for transient step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never zero.
    pub attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based), doubling each time.
    pub fn backoff(self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry);
        return self.initial_backoff.saturating_mul(factor);
    }

    /// A policy that tries once and never sleeps.
    pub const fn no_retry() -> Self {
        return Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
        };
    }
}

impl Default for Config {
    fn default() -> Self {
        return Self {
            allow_outside_root: false,
            exclude: default_exclude(),
            include: Vec::new(),
            max_files: default_max_files(),
            transaction: TransactionConfig::default(),
        };
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        return Self {
            continue_on_error: false,
            retry_attempts: 3,
            retry_backoff_ms: 25,
        };
    }
}

impl Config {
    /// Load config from `.mdmove.toml` in the given root directory.
    /// Returns defaults if the file doesn't exist.
    /// Returns an error if the file exists but is malformed; never silently
    /// falls back to defaults when the user wrote a config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails (other than not-found),
    /// or `Error::TomlDe` if the TOML is malformed.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::Io(e)),
        };

        let raw: MdmoveTomlConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded config");
        return Ok(Self {
            allow_outside_root: raw.allow_outside_root,
            exclude: raw.exclude,
            include: raw.include,
            max_files: raw.max_files,
            transaction: raw.transaction,
        });
    }

    /// The retry policy described by the `[transaction]` table.
    pub fn retry_policy(&self) -> RetryPolicy {
        return RetryPolicy {
            attempts: self.transaction.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(self.transaction.retry_backoff_ms),
        };
    }

    /// Check whether a markdown file path should be scanned.
    ///
    /// A path is included if no include patterns are set (scan everything),
    /// or if the path starts with at least one include pattern.
    /// An included path is then excluded if it starts with any exclude pattern.
    pub fn should_scan(&self, relative_path: &str) -> bool {
        let included = self.include.is_empty()
            || self.include.iter().any(|p| return relative_path.starts_with(p.as_str()));

        if !included {
            return false;
        }

        return !self.exclude.iter().any(|p| return relative_path.starts_with(p.as_str()));
    }
}

/// Directories nobody wants rewritten.
fn default_exclude() -> Vec<String> {
    return vec![".git/".to_string(), "node_modules/".to_string()];
}

/// Default scan bound.
const fn default_max_files() -> usize {
    return 10_000;
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.max_files, 10_000);
        assert!(!config.transaction.continue_on_error);
        assert_eq!(config.retry_policy().attempts, 3);
        assert!(!config.should_scan(".git/HEAD.md"));
        assert!(config.should_scan("docs/a.md"));
    }

    #[test]
    fn reads_transaction_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "include = [\"docs/\"]\nmax_files = 5\n\n[transaction]\nretry_attempts = 0\ncontinue_on_error = true\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.max_files, 5);
        assert!(config.transaction.continue_on_error);
        assert_eq!(config.retry_policy().attempts, 1);
        assert!(config.should_scan("docs/a.md"));
        assert!(!config.should_scan("notes/a.md"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "max_files = \"lots\"").unwrap();
        assert!(matches!(Config::load(dir.path()), Err(Error::TomlDe(_))));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 4,
            initial_backoff: Duration::from_millis(10),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
    }
}
