use crate::error::ConfigError;
use crate::profile::Profile;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const STATE_DIR: &str = ".stackctl";
pub const SSL_LOCK_FILE: &str = ".stackctl/ssl.lock";

pub const CONFIG_FILE: &str = "stackctl.yaml";
pub const ENV_FILE: &str = ".env";

pub const DEFAULT_CERT_DIR: &str = "nginx/ssl";
pub const DEFAULT_CERT_FILE: &str = "cert.pem";
pub const DEFAULT_KEY_FILE: &str = "key.pem";

pub const BASE_COMPOSE_FILE: &str = "docker-compose.yml";
pub const LOCAL_COMPOSE_FILE: &str = "docker-compose.local.yml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn env_path(root: &Path) -> PathBuf {
    root.join(ENV_FILE)
}

/// Optional per-profile overlay, e.g. `.env.local`.
pub fn env_overlay_path(root: &Path, profile: Profile) -> PathBuf {
    root.join(format!("{ENV_FILE}.{}", profile.as_str()))
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn ssl_lock_path(root: &Path) -> PathBuf {
    root.join(SSL_LOCK_FILE)
}

// ---------------------------------------------------------------------------
// Project name validation
// ---------------------------------------------------------------------------

static PROJECT_RE: OnceLock<Regex> = OnceLock::new();

fn project_re() -> &'static Regex {
    PROJECT_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").unwrap())
}

/// Compose project names scope every container the launcher touches.
pub fn validate_project_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.len() > 63 || !project_re().is_match(name) {
        return Err(ConfigError::InvalidProjectName(name.to_string()));
    }
    Ok(())
}

/// Derive a compose-safe project name from an arbitrary label
/// (lowercased, anything outside `[a-z0-9_-]` replaced by `-`).
pub fn sanitize_project_name(raw: &str) -> String {
    let mut out: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    while out.starts_with(['-', '_']) {
        out.remove(0);
    }
    if out.is_empty() {
        "stack".to_string()
    } else {
        out
    }
}
