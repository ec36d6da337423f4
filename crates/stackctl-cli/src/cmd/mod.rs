pub mod collaborator;
pub mod lifecycle;
pub mod ssl;

use anyhow::Context;
use stackctl_core::compose::DockerCompose;
use stackctl_core::config::Settings;
use stackctl_core::context::ExecutionContext;
use stackctl_core::profile::Profile;
use stackctl_core::StackError;
use std::path::Path;

/// Parse the mode and load settings once for the whole invocation.
pub(crate) fn load_settings(root: &Path, mode: &str) -> anyhow::Result<Settings> {
    let profile: Profile = mode.parse().map_err(StackError::from)?;
    let context = ExecutionContext::detect();
    Settings::load(root, profile, context)
        .map_err(StackError::from)
        .with_context(|| format!("failed to load settings from {}", root.display()))
}

pub(crate) fn backend(settings: &Settings) -> anyhow::Result<DockerCompose> {
    Ok(DockerCompose::from_settings(settings)?)
}
