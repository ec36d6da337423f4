//! Health gate: poll every started service until all are healthy or the
//! timeout elapses.

use crate::backend::{ComposeBackend, ContainerState, ContainerStatus};
use crate::descriptor::{ServiceDescriptor, ServiceSet};
use crate::error::{BackendError, HealthError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on a single sleep between interrupt checks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    fn from_backend(health: &str) -> Option<Self> {
        match health {
            "healthy" => Some(HealthStatus::Healthy),
            "starting" => Some(HealthStatus::Starting),
            "unhealthy" => Some(HealthStatus::Unhealthy),
            _ => None,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: HealthStatus,
    /// Container state as reported by the backend; `None` when absent.
    pub state: Option<String>,
}

/// Derived health of a service set on one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub services: Vec<ServiceHealth>,
    pub polls: u32,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.services
            .iter()
            .all(|s| s.status == HealthStatus::Healthy)
    }

    pub fn unhealthy(&self) -> Vec<&ServiceHealth> {
        self.services
            .iter()
            .filter(|s| s.status != HealthStatus::Healthy)
            .collect()
    }

    pub fn status_of(&self, service: &str) -> Option<HealthStatus> {
        self.services
            .iter()
            .find(|s| s.service == service)
            .map(|s| s.status)
    }

    /// `api (starting), proxy (unknown)`; `none` when everything is healthy
    /// or nothing was polled yet.
    pub fn describe_unhealthy(&self) -> String {
        let pending = self.unhealthy();
        if pending.is_empty() {
            return "none".to_string();
        }
        pending
            .iter()
            .map(|s| format!("{} ({})", s.service, s.status))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ---------------------------------------------------------------------------
// Interrupt
// ---------------------------------------------------------------------------

/// Flag set by the Ctrl-C listener and read by the gate between polls.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

fn derive_status(
    backend: &dyn ComposeBackend,
    desc: &ServiceDescriptor,
    container: Option<&ContainerStatus>,
) -> Result<HealthStatus, BackendError> {
    let Some(container) = container else {
        return Ok(HealthStatus::Unknown);
    };
    if let Some(status) = container
        .health
        .as_deref()
        .and_then(HealthStatus::from_backend)
    {
        return Ok(status);
    }
    Ok(match &container.state {
        ContainerState::Running => match desc.health.probe_argv() {
            Some(argv) => {
                if backend.probe(&desc.name, &argv)? {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Starting
                }
            }
            None => HealthStatus::Healthy,
        },
        ContainerState::Created | ContainerState::Restarting => HealthStatus::Starting,
        ContainerState::Paused | ContainerState::Exited | ContainerState::Dead => {
            HealthStatus::Unhealthy
        }
        ContainerState::Other(_) => HealthStatus::Unknown,
    })
}

/// One status read for the whole set.
pub fn poll_once(
    backend: &dyn ComposeBackend,
    set: &ServiceSet,
) -> Result<HealthReport, BackendError> {
    let containers = backend.ps()?;
    let mut services = Vec::with_capacity(set.len());
    for desc in set.iter() {
        let container = containers.iter().find(|c| c.service == desc.name);
        services.push(ServiceHealth {
            service: desc.name.clone(),
            status: derive_status(backend, desc, container)?,
            state: container.map(|c| c.state.as_str().to_string()),
        });
    }
    Ok(HealthReport { services, polls: 1 })
}

/// Sleep for `total` in short slices; `false` if interrupted meanwhile.
fn sleep_sliced(total: Duration, interrupt: &Interrupt) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if interrupt.is_set() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Block until every service in `set` reports healthy on the same poll.
///
/// The last poll happens at or after the deadline, so a service that turns
/// healthy just in time is still accepted. Nothing is retried afterwards.
pub fn wait_healthy(
    backend: &dyn ComposeBackend,
    set: &ServiceSet,
    poll_interval: Duration,
    timeout: Duration,
    interrupt: &Interrupt,
) -> Result<HealthReport, HealthError> {
    let started = Instant::now();
    let mut polls = 0u32;
    let mut last = HealthReport::default();

    tracing::info!(
        services = %set.names().join(","),
        poll_secs = poll_interval.as_secs_f64(),
        timeout_secs = timeout.as_secs(),
        "waiting for services to become healthy"
    );

    loop {
        if interrupt.is_set() {
            return Err(HealthError::Interrupted { report: last });
        }

        let mut report = poll_once(backend, set)?;
        polls += 1;
        report.polls = polls;

        if report.all_healthy() {
            tracing::info!(
                polls,
                elapsed_secs = started.elapsed().as_secs(),
                "all services healthy"
            );
            return Ok(report);
        }
        tracing::info!(pending = %report.describe_unhealthy(), polls, "services not ready");

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            tracing::warn!(pending = %report.describe_unhealthy(), "health gate timed out");
            return Err(HealthError::TimedOut { elapsed, report });
        }

        if !sleep_sliced(poll_interval.min(timeout - elapsed), interrupt) {
            return Err(HealthError::Interrupted { report });
        }
        last = report;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::resolve;
    use crate::profile::Profile;
    use crate::testing::{status, FakeBackend};

    #[test]
    fn immediately_healthy_returns_within_one_interval() {
        let backend = FakeBackend::new().with_ps(vec![vec![
            status("api", ContainerState::Running, Some("healthy")),
            status("proxy", ContainerState::Running, Some("healthy")),
        ]]);
        let set = resolve(Profile::Production).unwrap();
        let started = Instant::now();
        let report = wait_healthy(
            &backend,
            &set,
            Duration::from_secs(5),
            Duration::from_secs(300),
            &Interrupt::new(),
        )
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.polls, 1);
        assert!(report.all_healthy());
    }

    #[test]
    fn stuck_service_times_out_naming_only_it() {
        let backend = FakeBackend::new().with_ps(vec![vec![
            status("api", ContainerState::Running, Some("healthy")),
            status("proxy", ContainerState::Running, Some("starting")),
        ]]);
        let set = resolve(Profile::Production).unwrap();
        let err = wait_healthy(
            &backend,
            &set,
            Duration::from_millis(10),
            Duration::from_millis(60),
            &Interrupt::new(),
        )
        .unwrap_err();
        match err {
            HealthError::TimedOut { report, elapsed } => {
                assert!(elapsed >= Duration::from_millis(60));
                let pending: Vec<_> = report.unhealthy().iter().map(|s| s.service.clone()).collect();
                assert_eq!(pending, vec!["proxy"]);
                assert_eq!(report.describe_unhealthy(), "proxy (starting)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn becomes_healthy_after_a_few_polls() {
        let backend = FakeBackend::new().with_ps(vec![
            vec![status("api", ContainerState::Created, None)],
            vec![
                status("api", ContainerState::Running, Some("starting")),
                status("proxy", ContainerState::Restarting, None),
            ],
            vec![
                status("api", ContainerState::Running, Some("healthy")),
                status("proxy", ContainerState::Running, Some("healthy")),
            ],
        ]);
        let set = resolve(Profile::Production).unwrap();
        let report = wait_healthy(
            &backend,
            &set,
            Duration::from_millis(5),
            Duration::from_secs(5),
            &Interrupt::new(),
        )
        .unwrap();
        assert_eq!(report.polls, 3);
    }

    #[test]
    fn interrupt_returns_partial_report() {
        let backend = FakeBackend::new().with_ps(vec![vec![status(
            "api",
            ContainerState::Running,
            Some("starting"),
        )]]);
        let set = resolve(Profile::Production).unwrap();
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });
        let started = Instant::now();
        let err = wait_healthy(
            &backend,
            &set,
            Duration::from_secs(30),
            Duration::from_secs(300),
            &interrupt,
        )
        .unwrap_err();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            HealthError::Interrupted { report } => {
                assert_eq!(report.status_of("api"), Some(HealthStatus::Starting));
                assert_eq!(report.status_of("proxy"), Some(HealthStatus::Unknown));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn running_without_backend_health_uses_descriptor_probe() {
        let backend = FakeBackend::new()
            .with_ps(vec![vec![
                status("db", ContainerState::Running, None),
                status("pgadmin", ContainerState::Running, None),
                status("api", ContainerState::Running, None),
                status("proxy", ContainerState::Running, None),
            ]])
            .with_probe("api", false)
            .with_probe("db", true)
            .with_probe("proxy", true);
        let set = resolve(Profile::Local).unwrap();
        let report = poll_once(&backend, &set).unwrap();
        assert_eq!(report.status_of("db"), Some(HealthStatus::Healthy));
        // no check declared: running is enough
        assert_eq!(report.status_of("pgadmin"), Some(HealthStatus::Healthy));
        assert_eq!(report.status_of("api"), Some(HealthStatus::Starting));
        assert_eq!(report.status_of("proxy"), Some(HealthStatus::Healthy));
        assert!(backend.calls().iter().all(|c| !c.starts_with("probe pgadmin")));
    }

    #[test]
    fn exited_and_absent_containers() {
        let backend = FakeBackend::new().with_ps(vec![vec![status(
            "api",
            ContainerState::Exited,
            None,
        )]]);
        let set = resolve(Profile::Production).unwrap();
        let report = poll_once(&backend, &set).unwrap();
        assert_eq!(report.status_of("api"), Some(HealthStatus::Unhealthy));
        assert_eq!(report.status_of("proxy"), Some(HealthStatus::Unknown));
        assert_eq!(report.describe_unhealthy(), "api (unhealthy), proxy (unknown)");
    }

    #[test]
    fn backend_failure_propagates() {
        let backend = FakeBackend::new().fail("ps", "", "Cannot connect to the Docker daemon");
        let set = resolve(Profile::Production).unwrap();
        let err = wait_healthy(
            &backend,
            &set,
            Duration::from_millis(5),
            Duration::from_millis(20),
            &Interrupt::new(),
        )
        .unwrap_err();
        assert!(matches!(err, HealthError::Backend(_)));
    }
}
