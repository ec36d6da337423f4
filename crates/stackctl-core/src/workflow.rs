//! Subcommand sequences composed from the provisioner, resolver, launcher
//! and health gate. Each function runs to completion or returns the first
//! error; nothing is retried.

use crate::backend::{ComposeBackend, ContainerState};
use crate::certs::{self, CertOptions, CertPaths, CertificateRecord};
use crate::config::Settings;
use crate::context::ExecutionContext;
use crate::descriptor::{self, ServiceSet};
use crate::error::{HealthError, Result, StackError};
use crate::health::{self, HealthReport, Interrupt};
use crate::launcher;
use crate::liveness::{self, LivenessReport};
use crate::paths;
use crate::profile::Profile;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Command;

/// Opaque entry points delegated to the API service.
pub const COLLABORATOR_COMMANDS: &[&str] = &[
    "seed",
    "initdb",
    "createsuperuser",
    "checkdb",
    "runserver",
    "shell",
    "bash",
];

/// Collaborators `setup` runs after the stack is healthy, in order.
pub const SETUP_COLLABORATORS: &[&str] = &["initdb", "seed", "createsuperuser"];

const INTERACTIVE_COMMANDS: &[&str] = &["shell", "bash"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceUrl {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub profile: Profile,
    pub project: String,
    pub certificate: CertificateRecord,
    pub services: Vec<String>,
    pub health: HealthReport,
    pub collaborators: Vec<String>,
    pub liveness: LivenessReport,
    pub urls: Vec<ServiceUrl>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub profile: Profile,
    pub project: String,
    /// `None` when provisioning failed but an existing pair was kept.
    pub certificate: Option<CertificateRecord>,
    pub services: Vec<String>,
    pub health: Option<HealthReport>,
    pub urls: Vec<ServiceUrl>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub profile: Profile,
    pub built: Vec<String>,
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

pub fn resolve_services(settings: &Settings) -> Result<ServiceSet> {
    Ok(descriptor::resolve_with(&settings.catalog(), settings.profile)?)
}

/// Create the configured working directories, the certificate directory and
/// the state directory. Returns the ones that did not exist before.
pub fn ensure_directories(settings: &Settings) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = settings
        .stack
        .directories
        .iter()
        .map(|d| settings.root.join(d))
        .collect();
    dirs.push(settings.cert_dir());
    dirs.push(paths::state_dir(&settings.root));

    let mut created = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            crate::io::ensure_dir(&dir)?;
            tracing::info!(dir = %dir.display(), "created directory");
            created.push(dir);
        }
    }
    Ok(created)
}

pub fn provision_certificate(settings: &Settings) -> Result<CertificateRecord> {
    let paths = CertPaths::from_settings(settings);
    let opts = CertOptions::from_settings(settings);
    Ok(certs::ensure_with(&paths, &opts, chrono::Utc::now())?)
}

pub fn service_urls(settings: &Settings, set: &ServiceSet) -> Vec<ServiceUrl> {
    let proxy = &settings.stack.proxy;
    let host = match proxy.https_port {
        443 => settings.domain().to_string(),
        port => format!("{}:{port}", settings.domain()),
    };
    let mut urls = vec![
        ServiceUrl {
            name: "api".to_string(),
            url: format!("https://{host}/api/v1"),
        },
        ServiceUrl {
            name: "docs".to_string(),
            url: format!("https://{host}/docs"),
        },
        ServiceUrl {
            name: "health".to_string(),
            url: liveness::proxy_health_url(proxy),
        },
    ];
    if set.contains("pgadmin") {
        urls.push(ServiceUrl {
            name: "pgadmin".to_string(),
            url: format!("http://localhost:{}", proxy.pgadmin_port),
        });
    }
    urls
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

/// `ssl`: make sure a valid pair is on disk.
pub fn ssl(settings: &Settings) -> Result<CertificateRecord> {
    provision_certificate(settings)
}

/// `build`: rebuild images of locally built services without starting them.
pub fn build(settings: &Settings, backend: &dyn ComposeBackend) -> Result<BuildReport> {
    let set = resolve_services(settings)?;
    let built = launcher::build(backend, &set, true)?;
    Ok(BuildReport {
        profile: settings.profile,
        built,
    })
}

/// `setup`: first-time provisioning of the whole stack.
pub fn setup(
    settings: &Settings,
    backend: &dyn ComposeBackend,
    interrupt: &Interrupt,
) -> Result<SetupReport> {
    let set = resolve_services(settings)?;
    ensure_directories(settings)?;
    let certificate = provision_certificate(settings)?;

    bail_if_interrupted(interrupt, &HealthReport::default())?;
    launcher::launch(backend, &set, true)?;
    let health = health::wait_healthy(
        backend,
        &set,
        settings.stack.health.poll_interval(),
        settings.stack.health.timeout(),
        interrupt,
    )?;

    let mut collaborators = Vec::new();
    for name in SETUP_COLLABORATORS {
        bail_if_interrupted(interrupt, &health)?;
        run_collaborator(settings, Some(backend), name)?;
        collaborators.push(name.to_string());
    }

    let url = liveness::proxy_health_url(&settings.stack.proxy);
    let liveness = liveness::probe(&url, liveness::DEFAULT_TIMEOUT);
    if liveness.healthy {
        tracing::info!(%url, "proxy liveness confirmed");
    } else {
        tracing::warn!(%url, detail = %liveness.detail, "proxy liveness check failed");
    }

    Ok(SetupReport {
        profile: settings.profile,
        project: settings.project_name(),
        certificate,
        services: set.names().iter().map(|s| s.to_string()).collect(),
        health,
        collaborators,
        liveness,
        urls: service_urls(settings, &set),
    })
}

/// `start`: launch without rebuilding. A provisioning failure is tolerated
/// when a pair already exists on disk.
pub fn start(
    settings: &Settings,
    backend: &dyn ComposeBackend,
    wait: bool,
    interrupt: &Interrupt,
) -> Result<StartReport> {
    let set = resolve_services(settings)?;

    let certificate = match provision_certificate(settings) {
        Ok(record) => Some(record),
        Err(e) if CertPaths::from_settings(settings).pair_exists() => {
            tracing::warn!(error = %e, "keeping existing certificate pair");
            None
        }
        Err(e) => return Err(e),
    };

    bail_if_interrupted(interrupt, &HealthReport::default())?;
    launcher::launch(backend, &set, false)?;
    let health = if wait {
        Some(health::wait_healthy(
            backend,
            &set,
            settings.stack.health.poll_interval(),
            settings.stack.health.timeout(),
            interrupt,
        )?)
    } else {
        None
    };

    Ok(StartReport {
        profile: settings.profile,
        project: settings.project_name(),
        certificate,
        services: set.names().iter().map(|s| s.to_string()).collect(),
        health,
        urls: service_urls(settings, &set),
    })
}

/// `stop`: remove every container of the project namespace.
pub fn stop(backend: &dyn ComposeBackend) -> Result<()> {
    Ok(launcher::teardown(backend)?)
}

/// `status`: a single health poll.
pub fn status(settings: &Settings, backend: &dyn ComposeBackend) -> Result<HealthReport> {
    let set = resolve_services(settings)?;
    Ok(health::poll_once(backend, &set)?)
}

/// Run collaborator `name` in the API service's execution context.
///
/// On the host the service must already be running and each command goes
/// through the backend's `exec`. Inside a container the commands run as
/// direct child processes.
pub fn run_collaborator(
    settings: &Settings,
    backend: Option<&dyn ComposeBackend>,
    name: &str,
) -> Result<()> {
    let commands = settings.stack.commands.get(name)?;
    let service = settings.stack.commands.service.as_str();
    let interactive = INTERACTIVE_COMMANDS.contains(&name);

    match settings.context {
        ExecutionContext::Bare => {
            let backend = backend.ok_or_else(|| StackError::BackendRequired(name.to_string()))?;
            let running = backend
                .ps()?
                .iter()
                .any(|c| c.service == service && c.state == ContainerState::Running);
            if !running {
                return Err(StackError::NotRunning(service.to_string()));
            }
            for argv in commands {
                tracing::info!(collaborator = name, %service, command = %argv.join(" "), "running");
                let code = backend.exec(service, argv, interactive)?;
                check_exit(name, argv, code)?;
            }
        }
        ExecutionContext::Containerized => {
            for argv in commands {
                tracing::info!(collaborator = name, command = %argv.join(" "), "running locally");
                let code = run_local(settings, argv)?;
                check_exit(name, argv, code)?;
            }
        }
    }
    Ok(())
}

/// Stop between steps once Ctrl-C has been seen, carrying the last report.
fn bail_if_interrupted(interrupt: &Interrupt, report: &HealthReport) -> Result<()> {
    if interrupt.is_set() {
        tracing::warn!("interrupted; not starting the next step");
        return Err(HealthError::Interrupted {
            report: report.clone(),
        }
        .into());
    }
    Ok(())
}

fn run_local(settings: &Settings, argv: &[String]) -> Result<i32> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| crate::error::ConfigError::MissingCommand(String::new()))?;
    let status = Command::new(program)
        .args(args)
        .current_dir(&settings.root)
        .status()
        .map_err(|e| std::io::Error::new(e.kind(), format!("failed to run '{program}': {e}")))?;
    Ok(status.code().unwrap_or(-1))
}

fn check_exit(name: &str, argv: &[String], code: i32) -> Result<()> {
    if code == 0 {
        return Ok(());
    }
    tracing::error!(collaborator = name, code, "collaborator failed");
    Err(StackError::CollaboratorFailed {
        command: format!("{name} ({})", argv.join(" ")),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvFile, StackConfig};
    use crate::error::{ConfigError, HealthError};
    use crate::testing::FakeBackend;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, profile: Profile, context: ExecutionContext) -> Settings {
        let mut stack = StackConfig::default();
        stack.health.poll_interval_secs = 1;
        stack.health.timeout_secs = 1;
        Settings {
            root: dir.path().to_path_buf(),
            profile,
            context,
            env: EnvFile::from_pairs([("DOMAIN", "parish.localhost")]),
            stack,
        }
    }

    fn serve_health_once() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let body = r#"{"status":"healthy"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        port
    }

    #[test]
    fn setup_local_runs_the_full_sequence() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(&dir, Profile::Local, ExecutionContext::Bare);
        s.stack.proxy.health_port = serve_health_once();
        let backend = FakeBackend::new();

        let report = setup(&s, &backend, &Interrupt::new()).unwrap();

        assert!(dir.path().join("logs").is_dir());
        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("nginx/ssl/cert.pem").is_file());
        assert!(dir.path().join("nginx/ssl/key.pem").is_file());
        assert_eq!(report.certificate.action, certs::ProvisionAction::Created);
        assert_eq!(backend.started(), vec!["db", "pgadmin", "api", "proxy"]);
        assert!(report.health.all_healthy());
        assert_eq!(report.collaborators, vec!["initdb", "seed", "createsuperuser"]);
        assert!(report.liveness.healthy, "{:?}", report.liveness);
        assert!(report.urls.iter().any(|u| u.name == "pgadmin"));

        let execs: Vec<_> = backend
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("exec"))
            .collect();
        assert_eq!(execs.len(), 7);
        assert_eq!(execs[0], "exec api python -m app.scripts.init_db");
        assert_eq!(execs[1], "exec api python -m app.scripts.seed_languages");
        assert_eq!(execs[6], "exec api python -m app.scripts.create_superuser");
        // lock released
        assert!(!paths::ssl_lock_path(dir.path()).exists());
    }

    #[test]
    fn setup_times_out_and_skips_collaborators() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let backend = FakeBackend::new().with_up_status(
            "proxy",
            ContainerState::Running,
            Some("starting"),
        );
        let err = setup(&s, &backend, &Interrupt::new()).unwrap_err();
        assert_eq!(err.category(), "TimeoutError");
        match err {
            StackError::Health(HealthError::TimedOut { report, .. }) => {
                assert_eq!(report.describe_unhealthy(), "proxy (starting)");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!backend.calls().iter().any(|c| c.starts_with("exec")));
    }

    #[test]
    fn setup_interrupted_before_launch_touches_no_containers() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let backend = FakeBackend::new();
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let err = setup(&s, &backend, &interrupt).unwrap_err();
        assert_eq!(err.category(), "TimeoutError");
        assert!(matches!(err, StackError::Health(HealthError::Interrupted { .. })));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn setup_interrupted_during_collaborators_stops_before_the_next() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let interrupt = Interrupt::new();
        let backend = FakeBackend::new().interrupt_on_exec(&interrupt);

        let err = setup(&s, &backend, &interrupt).unwrap_err();
        match err {
            StackError::Health(HealthError::Interrupted { report }) => {
                assert!(report.all_healthy());
            }
            other => panic!("unexpected error: {other}"),
        }
        let execs: Vec<_> = backend
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("exec"))
            .collect();
        assert_eq!(execs, vec!["exec api python -m app.scripts.init_db"]);
    }

    #[test]
    fn start_interrupted_before_launch_touches_no_containers() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let backend = FakeBackend::new();
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let err = start(&s, &backend, true, &interrupt).unwrap_err();
        assert!(matches!(err, StackError::Health(HealthError::Interrupted { .. })));
        assert!(backend.started().is_empty());
    }

    #[test]
    fn start_production_launches_without_rebuild() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let backend = FakeBackend::new();
        let report = start(&s, &backend, false, &Interrupt::new()).unwrap();
        assert_eq!(backend.started(), vec!["api", "proxy"]);
        assert!(!backend.calls().iter().any(|c| c.starts_with("build")));
        assert!(report.health.is_none());
        assert!(report.certificate.is_some());
        assert!(!report.urls.iter().any(|u| u.name == "pgadmin"));
    }

    #[test]
    fn start_keeps_existing_pair_when_provisioning_fails() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let cert_dir = dir.path().join("nginx/ssl");
        std::fs::create_dir_all(&cert_dir).unwrap();
        std::fs::write(cert_dir.join("cert.pem"), "garbage").unwrap();
        std::fs::write(cert_dir.join("key.pem"), "garbage").unwrap();

        let backend = FakeBackend::new();
        let report = start(&s, &backend, true, &Interrupt::new()).unwrap();
        assert!(report.certificate.is_none());
        assert!(report.health.unwrap().all_healthy());
        assert_eq!(backend.started().len(), 2);
    }

    #[test]
    fn ssl_failure_is_fatal_without_pair() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        s.stack.certs.key_bits = 1024;
        let err = ssl(&s).unwrap_err();
        assert_eq!(err.category(), "ProvisionError");
        assert_eq!(err.exit_code(), 73);
    }

    #[test]
    fn collaborator_requires_running_service_on_host() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let backend = FakeBackend::new();
        let err = run_collaborator(&s, Some(&backend), "seed").unwrap_err();
        assert!(matches!(err, StackError::NotRunning(ref svc) if svc == "api"));
        assert!(!backend.calls().iter().any(|c| c.starts_with("exec")));
    }

    #[test]
    fn collaborator_failure_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let backend = FakeBackend::new().with_running(&["api"]).with_exec_code(3);
        let err = run_collaborator(&s, Some(&backend), "seed").unwrap_err();
        match err {
            StackError::CollaboratorFailed { command, code } => {
                assert_eq!(code, 3);
                assert!(command.starts_with("seed (python -m app.scripts.seed_languages"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // stops at the first failing module
        let execs = backend.calls().iter().filter(|c| c.starts_with("exec")).count();
        assert_eq!(execs, 1);
    }

    #[cfg(unix)]
    #[test]
    fn containerized_collaborator_runs_directly() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(&dir, Profile::Local, ExecutionContext::Containerized);
        s.stack.commands.entries.insert(
            "checkdb".to_string(),
            vec![vec!["sh".into(), "-c".into(), "touch checked".into()]],
        );
        s.stack.commands.entries.insert(
            "initdb".to_string(),
            vec![vec!["sh".into(), "-c".into(), "exit 4".into()]],
        );
        let backend = FakeBackend::new();

        run_collaborator(&s, Some(&backend), "checkdb").unwrap();
        assert!(dir.path().join("checked").exists());
        let err = run_collaborator(&s, None, "initdb").unwrap_err();
        assert!(matches!(err, StackError::CollaboratorFailed { code: 4, .. }));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn host_collaborator_without_backend_is_internal_error() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let err = run_collaborator(&s, None, "seed").unwrap_err();
        assert!(matches!(err, StackError::BackendRequired(ref name) if name == "seed"));
        assert_eq!(err.category(), "InternalError");
        assert!(err.to_string().contains("without a compose backend"));
    }

    #[test]
    fn unknown_collaborator_is_config_error() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Local, ExecutionContext::Containerized);
        let err = run_collaborator(&s, None, "migrate").unwrap_err();
        assert!(matches!(err, StackError::Config(ConfigError::MissingCommand(_))));
    }

    #[test]
    fn status_is_a_single_poll() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let backend = FakeBackend::new().with_running(&["api"]);
        let report = status(&s, &backend).unwrap();
        assert_eq!(report.describe_unhealthy(), "proxy (unknown)");
        assert_eq!(backend.calls(), vec!["ps"]);
    }

    #[test]
    fn service_urls_include_non_default_https_port() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        s.stack.proxy.https_port = 8443;
        let set = resolve_services(&s).unwrap();
        let urls = service_urls(&s, &set);
        assert_eq!(urls[0].url, "https://parish.localhost:8443/api/v1");
    }

    #[test]
    fn stop_tears_down() {
        let backend = FakeBackend::new().with_running(&["api", "proxy"]);
        stop(&backend).unwrap();
        assert_eq!(backend.calls(), vec!["down"]);
        assert!(backend.ps().unwrap().is_empty());
    }

    #[test]
    fn build_only_builds() {
        let dir = TempDir::new().unwrap();
        let s = settings(&dir, Profile::Production, ExecutionContext::Bare);
        let backend = FakeBackend::new();
        let report = build(&s, &backend).unwrap();
        assert_eq!(report.built, vec!["api", "proxy"]);
        assert!(backend.started().is_empty());
    }
}
