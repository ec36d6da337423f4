use stackctl_core::backend::ComposeBackend;
use stackctl_core::context::ExecutionContext;
use stackctl_core::workflow;
use std::path::Path;

/// Delegate `name` to the API service. The backend is only located when the
/// command has to go through it.
pub fn run(root: &Path, mode: &str, name: &str) -> anyhow::Result<()> {
    let settings = super::load_settings(root, mode)?;
    match settings.context {
        ExecutionContext::Bare => {
            let backend = super::backend(&settings)?;
            workflow::run_collaborator(&settings, Some(&backend as &dyn ComposeBackend), name)?;
        }
        ExecutionContext::Containerized => {
            workflow::run_collaborator(&settings, None, name)?;
        }
    }
    Ok(())
}
