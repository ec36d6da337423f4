//! Where stackctl itself is running: on the host, or inside one of the
//! stack's containers. Decided once at startup.

use serde::Serialize;
use std::path::Path;

pub const CONTEXT_ENV: &str = "STACKCTL_CONTEXT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    /// Inside a container: collaborator commands run as direct child processes.
    Containerized,
    /// On the host: collaborator commands run through the backend's `exec`.
    Bare,
}

impl ExecutionContext {
    /// Detect the context from `STACKCTL_CONTEXT` or the runtime marker files.
    pub fn detect() -> Self {
        let forced = std::env::var(CONTEXT_ENV).ok();
        Self::detect_from(forced.as_deref(), Path::new("/"))
    }

    fn detect_from(forced: Option<&str>, fs_root: &Path) -> Self {
        match forced.map(str::trim) {
            Some("containerized") => return ExecutionContext::Containerized,
            Some("bare") => return ExecutionContext::Bare,
            Some(other) if !other.is_empty() => {
                tracing::warn!(value = other, "ignoring unrecognised {CONTEXT_ENV}");
            }
            _ => {}
        }
        let markers = [".dockerenv", "run/.containerenv"];
        if markers.iter().any(|m| fs_root.join(m).exists()) {
            ExecutionContext::Containerized
        } else {
            ExecutionContext::Bare
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionContext::Containerized => "containerized",
            ExecutionContext::Bare => "bare",
        }
    }
}
