use crate::health::HealthReport;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment file not found: {0}")]
    MissingEnvFile(PathBuf),

    #[error("required key '{key}' missing from {file}")]
    MissingEnvKey { key: String, file: PathBuf },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to parse {file}: {reason}")]
    Parse { file: PathBuf, reason: String },

    #[error("invalid deployment profile '{0}': expected 'local' or 'production'")]
    InvalidProfile(String),

    #[error("invalid project name '{0}': must be lowercase alphanumeric with '-' or '_'")]
    InvalidProjectName(String),

    #[error("service '{service}' has no descriptor (referenced by {referenced_by})")]
    MissingDescriptor {
        service: String,
        referenced_by: String,
    },

    #[error("service '{service}' requires '{dependency}', which is not part of the {profile} profile")]
    DependencyOutsideProfile {
        service: String,
        dependency: String,
        profile: String,
    },

    #[error("dependency cycle between services: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("compose file not found: {0}")]
    MissingComposeFile(PathBuf),

    #[error("no collaborator command configured for '{0}'")]
    MissingCommand(String),
}

// ---------------------------------------------------------------------------
// ProvisionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("certificate generation failed: {0}")]
    GenerationFailed(String),

    #[error("corrupt certificate material at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("certificate provisioning already in progress (lock held: {0})")]
    Locked(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("container backend not found: install docker (with compose) or docker-compose")]
    Unavailable,

    #[error("failed to run '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("'{command}' exited with {}:\n{output}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("unreadable backend status output: {0}")]
    Parse(String),
}

impl BackendError {
    /// Backend output suitable for surfacing to the operator verbatim.
    pub fn diagnostic(&self) -> String {
        match self {
            BackendError::CommandFailed { output, .. } if !output.trim().is_empty() => {
                output.trim_end().to_string()
            }
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// LaunchError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("build failed for service '{service}':\n{diagnostic}")]
    BuildFailed { service: String, diagnostic: String },

    #[error("start failed for service '{service}':\n{diagnostic}")]
    StartFailed { service: String, diagnostic: String },

    #[error("teardown of previous stack failed:\n{diagnostic}")]
    TeardownFailed { diagnostic: String },
}

// ---------------------------------------------------------------------------
// HealthError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("services not healthy after {}s: {}", .elapsed.as_secs(), .report.describe_unhealthy())]
    TimedOut {
        elapsed: Duration,
        report: HealthReport,
    },

    #[error("interrupted while waiting for services: {}", .report.describe_unhealthy())]
    Interrupted { report: HealthReport },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

// ---------------------------------------------------------------------------
// StackError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error("service '{0}' is not running: start the stack first")]
    NotRunning(String),

    #[error("'{command}' exited with status {code}")]
    CollaboratorFailed { command: String, code: i32 },

    /// A host-side collaborator was dispatched without a compose backend.
    #[error("collaborator '{0}' runs on the host but was dispatched without a compose backend")]
    BackendRequired(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StackError {
    /// Operator-facing error category name.
    pub fn category(&self) -> &'static str {
        match self {
            StackError::Config(_) => "ConfigError",
            StackError::Provision(_) => "ProvisionError",
            StackError::Backend(_) | StackError::Launch(_) => "LaunchError",
            StackError::Health(HealthError::Backend(_)) => "LaunchError",
            StackError::Health(_) => "TimeoutError",
            StackError::NotRunning(_) => "NotRunningError",
            StackError::CollaboratorFailed { .. } => "CollaboratorFailed",
            StackError::BackendRequired(_) => "InternalError",
            StackError::Io(_) => "IoError",
        }
    }

    /// Process exit code, following sysexits(3) where one fits.
    pub fn exit_code(&self) -> i32 {
        match self {
            StackError::Config(_) => 78,
            StackError::Provision(_) => 73,
            StackError::Backend(_) | StackError::Launch(_) => 70,
            StackError::Health(HealthError::Backend(_)) => 70,
            StackError::Health(_) => 75,
            StackError::NotRunning(_) => 69,
            StackError::CollaboratorFailed { .. } => 1,
            StackError::BackendRequired(_) => 70,
            StackError::Io(_) => 74,
        }
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
