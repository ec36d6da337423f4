//! Stack launcher: tear down, optionally rebuild, then start services one at
//! a time in dependency order.

use crate::backend::{ComposeBackend, ContainerState, ContainerStatus};
use crate::descriptor::ServiceSet;
use crate::error::LaunchError;

/// Stop and remove every container in the project namespace.
pub fn teardown(backend: &dyn ComposeBackend) -> Result<(), LaunchError> {
    tracing::info!("tearing down previous stack");
    backend.down().map_err(|e| LaunchError::TeardownFailed {
        diagnostic: e.diagnostic(),
    })
}

/// Build the image of every locally built service in `set`.
pub fn build(
    backend: &dyn ComposeBackend,
    set: &ServiceSet,
    no_cache: bool,
) -> Result<Vec<String>, LaunchError> {
    let mut built = Vec::new();
    for svc in set.iter().filter(|s| s.build) {
        tracing::info!(service = %svc.name, no_cache, "building image");
        backend
            .build(&svc.name, no_cache)
            .map_err(|e| LaunchError::BuildFailed {
                service: svc.name.clone(),
                diagnostic: e.diagnostic(),
            })?;
        built.push(svc.name.clone());
    }
    if built.is_empty() {
        tracing::info!(profile = %set.profile, "no locally built services");
    }
    Ok(built)
}

/// Container exists and has not stopped or failed its healthcheck.
fn accepted(container: &ContainerStatus) -> bool {
    let failed = matches!(
        container.state,
        ContainerState::Exited | ContainerState::Dead | ContainerState::Paused
    );
    !failed && container.health.as_deref() != Some("unhealthy")
}

fn check_dependencies(
    backend: &dyn ComposeBackend,
    service: &str,
    deps: &[&str],
) -> Result<(), LaunchError> {
    let containers = backend.ps().map_err(|e| LaunchError::StartFailed {
        service: service.to_string(),
        diagnostic: e.diagnostic(),
    })?;
    for dep in deps {
        let state = match containers.iter().find(|c| c.service == *dep) {
            Some(c) if accepted(c) => continue,
            Some(c) => match &c.health {
                Some(h) => format!("{} ({h})", c.state.as_str()),
                None => c.state.as_str().to_string(),
            },
            None => "absent".to_string(),
        };
        return Err(LaunchError::StartFailed {
            service: service.to_string(),
            diagnostic: format!("dependency '{dep}' was not accepted by the backend: {state}"),
        });
    }
    Ok(())
}

/// Start `set` from a clean slate.
///
/// Calling this twice leaves exactly one container per service: the
/// teardown removes everything in the project namespace first.
pub fn launch(
    backend: &dyn ComposeBackend,
    set: &ServiceSet,
    rebuild: bool,
) -> Result<(), LaunchError> {
    teardown(backend)?;
    if rebuild {
        build(backend, set, true)?;
    }
    for svc in set.iter() {
        let deps = set.required_dependencies(svc);
        if !deps.is_empty() {
            check_dependencies(backend, &svc.name, &deps)?;
        }
        tracing::info!(service = %svc.name, restart = svc.restart.as_str(), "starting service");
        backend.up(&svc.name).map_err(|e| LaunchError::StartFailed {
            service: svc.name.clone(),
            diagnostic: e.diagnostic(),
        })?;
    }
    tracing::info!(services = %set.names().join(","), "stack started");
    Ok(())
}
