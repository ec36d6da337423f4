//! Scripted in-memory backend for unit tests.

use crate::backend::{ComposeBackend, ContainerState, ContainerStatus};
use crate::error::BackendError;
use crate::health::Interrupt;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

pub fn status(service: &str, state: ContainerState, health: Option<&str>) -> ContainerStatus {
    ContainerStatus {
        service: service.to_string(),
        state,
        health: health.map(str::to_string),
    }
}

/// Records every call as a short string (`"up api"`, `"build api --no-cache"`)
/// and keeps a container table that `up` and `down` mutate.
///
/// When `ps` output is scripted, each call pops the next entry and the last
/// entry repeats; otherwise `ps` returns the table.
#[derive(Default)]
pub struct FakeBackend {
    calls: RefCell<Vec<String>>,
    table: RefCell<Vec<ContainerStatus>>,
    ps_script: RefCell<VecDeque<Vec<ContainerStatus>>>,
    up_status: HashMap<String, ContainerStatus>,
    failures: HashMap<String, String>,
    probes: HashMap<String, bool>,
    exec_code: i32,
    interrupt_on_exec: Option<Interrupt>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ps(self, script: Vec<Vec<ContainerStatus>>) -> Self {
        *self.ps_script.borrow_mut() = script.into();
        self
    }

    /// Status a container takes when `up` starts it. Defaults to running and
    /// healthy.
    pub fn with_up_status(mut self, service: &str, state: ContainerState, health: Option<&str>) -> Self {
        self.up_status
            .insert(service.to_string(), status(service, state, health));
        self
    }

    /// Make `op` (`down`, `build`, `up`, `ps`, `exec`) fail for `service`
    /// (empty for project-wide operations) with `output`.
    pub fn fail(mut self, op: &str, service: &str, output: &str) -> Self {
        self.failures
            .insert(format!("{op}:{service}"), output.to_string());
        self
    }

    pub fn with_probe(mut self, service: &str, healthy: bool) -> Self {
        self.probes.insert(service.to_string(), healthy);
        self
    }

    pub fn with_exec_code(mut self, code: i32) -> Self {
        self.exec_code = code;
        self
    }

    /// Trigger `interrupt` from inside every `exec`, as a Ctrl-C during a
    /// collaborator would.
    pub fn interrupt_on_exec(mut self, interrupt: &Interrupt) -> Self {
        self.interrupt_on_exec = Some(interrupt.clone());
        self
    }

    pub fn with_running(self, services: &[&str]) -> Self {
        self.table.borrow_mut().extend(
            services
                .iter()
                .map(|s| status(s, ContainerState::Running, Some("healthy"))),
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Services passed to `up`, in order.
    pub fn started(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("up ").map(str::to_string))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn check(&self, op: &str, service: &str) -> Result<(), BackendError> {
        match self.failures.get(&format!("{op}:{service}")) {
            Some(output) => Err(BackendError::CommandFailed {
                command: format!("docker compose {op} {service}").trim_end().to_string(),
                code: Some(1),
                output: output.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl ComposeBackend for FakeBackend {
    fn down(&self) -> Result<(), BackendError> {
        self.record("down".to_string());
        self.check("down", "")?;
        self.table.borrow_mut().clear();
        Ok(())
    }

    fn build(&self, service: &str, no_cache: bool) -> Result<(), BackendError> {
        let flag = if no_cache { " --no-cache" } else { "" };
        self.record(format!("build {service}{flag}"));
        self.check("build", service)
    }

    fn up(&self, service: &str) -> Result<(), BackendError> {
        self.record(format!("up {service}"));
        self.check("up", service)?;
        let started = self
            .up_status
            .get(service)
            .cloned()
            .unwrap_or_else(|| status(service, ContainerState::Running, Some("healthy")));
        let mut table = self.table.borrow_mut();
        table.retain(|c| c.service != service);
        table.push(started);
        Ok(())
    }

    fn ps(&self) -> Result<Vec<ContainerStatus>, BackendError> {
        self.record("ps".to_string());
        self.check("ps", "")?;
        let mut script = self.ps_script.borrow_mut();
        match script.len() {
            0 => Ok(self.table.borrow().clone()),
            1 => Ok(script[0].clone()),
            _ => Ok(script.pop_front().unwrap_or_default()),
        }
    }

    fn probe(&self, service: &str, _argv: &[String]) -> Result<bool, BackendError> {
        self.record(format!("probe {service}"));
        Ok(self.probes.get(service).copied().unwrap_or(true))
    }

    fn exec(&self, service: &str, argv: &[String], _interactive: bool) -> Result<i32, BackendError> {
        self.record(format!("exec {service} {}", argv.join(" ")));
        self.check("exec", service)?;
        if let Some(interrupt) = &self.interrupt_on_exec {
            interrupt.trigger();
        }
        Ok(self.exec_code)
    }
}
