use crate::error::{Result, RolloutError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const ROLLOUT_DIR: &str = ".rollout";
pub const DESCRIPTORS_DIR: &str = ".rollout/descriptors";
pub const OBSERVABILITY_DIR: &str = ".rollout/descriptors/observability";

pub const CONFIG_FILE: &str = ".rollout/config.yaml";
pub const SUMMARY_FILE: &str = ".rollout/last-run.md";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn rollout_dir(root: &Path) -> PathBuf {
    root.join(ROLLOUT_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn summary_path(root: &Path) -> PathBuf {
    root.join(SUMMARY_FILE)
}

pub fn descriptors_dir(root: &Path) -> PathBuf {
    root.join(DESCRIPTORS_DIR)
}

/// Resolve a config-relative path against the project root.
pub fn resolve(root: &Path, relative: &Path) -> PathBuf {
    if relative.is_absolute() {
        relative.to_path_buf()
    } else {
        root.join(relative)
    }
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

/// Workload, artifact, and secret names must be valid DNS-1123 labels.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 || !name_re().is_match(name) {
        return Err(RolloutError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
