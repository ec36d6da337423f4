//! The seam between stackctl and the container orchestration backend.
//!
//! Everything the launcher and the health gate know about running services
//! comes through [`ComposeBackend`]: exit codes and `ps` output are the only
//! source of truth.

use crate::error::BackendError;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ContainerState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Other(String),
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "restarting" => ContainerState::Restarting,
            "paused" => ContainerState::Paused,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            other => ContainerState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Restarting => "restarting",
            ContainerState::Paused => "paused",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Other(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// ContainerStatus
// ---------------------------------------------------------------------------

/// One service's container as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub service: String,
    pub state: ContainerState,
    /// Backend-reported health (`healthy`, `starting`, `unhealthy`), if the
    /// service defines a healthcheck.
    pub health: Option<String>,
}

#[derive(Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Health", default)]
    health: String,
}

impl From<PsEntry> for ContainerStatus {
    fn from(e: PsEntry) -> Self {
        let health = e.health.trim().to_ascii_lowercase();
        ContainerStatus {
            service: e.service,
            state: ContainerState::parse(&e.state),
            health: if health.is_empty() { None } else { Some(health) },
        }
    }
}

/// Parse `compose ps --format json`, which is a JSON array in older releases
/// and one object per line in newer ones.
pub fn parse_ps_json(output: &str) -> Result<Vec<ContainerStatus>, BackendError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }
    if trimmed.starts_with('[') {
        let entries: Vec<PsEntry> =
            serde_json::from_str(trimmed).map_err(|e| BackendError::Parse(e.to_string()))?;
        return Ok(entries.into_iter().map(Into::into).collect());
    }
    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str::<PsEntry>(l)
                .map(Into::into)
                .map_err(|e| BackendError::Parse(format!("{e}: {l}")))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ComposeBackend
// ---------------------------------------------------------------------------

pub trait ComposeBackend {
    /// Stop and remove every container of the project namespace.
    fn down(&self) -> Result<(), BackendError>;

    /// Build the image of one service.
    fn build(&self, service: &str, no_cache: bool) -> Result<(), BackendError>;

    /// Create and start one service, detached, without its dependencies.
    fn up(&self, service: &str) -> Result<(), BackendError>;

    /// Status of every container in the project namespace.
    fn ps(&self) -> Result<Vec<ContainerStatus>, BackendError>;

    /// Run a check inside a running service; `Ok(true)` on exit 0.
    fn probe(&self, service: &str, argv: &[String]) -> Result<bool, BackendError>;

    /// Run a command inside a running service with inherited stdio and return
    /// its exit code.
    fn exec(&self, service: &str, argv: &[String], interactive: bool)
        -> Result<i32, BackendError>;
}
