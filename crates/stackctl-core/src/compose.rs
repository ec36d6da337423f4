//! `docker compose` implementation of [`ComposeBackend`].
//!
//! Prefers the compose plugin (`docker compose`) and falls back to the
//! standalone `docker-compose` binary. `STACKCTL_DOCKER` points at an
//! explicit docker binary.

use crate::backend::{parse_ps_json, ComposeBackend, ContainerStatus};
use crate::config::Settings;
use crate::error::{BackendError, ConfigError, StackError};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

pub const DOCKER_ENV: &str = "STACKCTL_DOCKER";

#[derive(Debug, Clone)]
pub struct DockerCompose {
    program: PathBuf,
    /// `["compose"]` for the plugin, empty for standalone docker-compose.
    prefix: Vec<String>,
    project: String,
    files: Vec<PathBuf>,
    env_files: Vec<PathBuf>,
    cwd: PathBuf,
}

impl DockerCompose {
    /// Build a backend for the settings' project namespace and profile.
    ///
    /// Compose files are checked before the backend binary is looked up so
    /// that configuration problems surface first.
    pub fn from_settings(settings: &Settings) -> Result<Self, StackError> {
        let files = settings.compose_files();
        if files.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("compose_files.{}", settings.profile),
                reason: "no compose files configured".to_string(),
            }
            .into());
        }
        if let Some(missing) = files.iter().find(|f| !f.exists()) {
            return Err(ConfigError::MissingComposeFile(missing.clone()).into());
        }
        let (program, prefix) = detect_program()?;
        tracing::debug!(program = %program.display(), ?prefix, "using compose backend");
        Ok(Self {
            program,
            prefix,
            project: settings.project_name(),
            files,
            env_files: settings.env.files.clone(),
            cwd: settings.root.clone(),
        })
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = self.prefix.clone();
        args.push("--project-name".to_string());
        args.push(self.project.clone());
        for f in &self.files {
            args.push("--file".to_string());
            args.push(f.display().to_string());
        }
        for f in &self.env_files {
            args.push("--env-file".to_string());
            args.push(f.display().to_string());
        }
        args
    }

    fn command(&self, args: &[String]) -> (Command, String) {
        let mut full = self.base_args();
        full.extend(args.iter().cloned());
        let command_line = format!("{} {}", self.program.display(), full.join(" "));
        let mut cmd = Command::new(&self.program);
        cmd.args(&full).current_dir(&self.cwd).stdin(Stdio::null());
        (cmd, command_line)
    }

    /// Run to completion with captured output; non-zero exit is an error
    /// carrying the combined output.
    fn run_captured(&self, args: &[String]) -> Result<String, BackendError> {
        let (mut cmd, command_line) = self.command(args);
        tracing::debug!(command = %command_line, "running backend command");
        let output = cmd.output().map_err(|e| BackendError::Spawn {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: command_line,
                code: output.status.code(),
                output: combined_output(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, _) => stderr.into_owned(),
        (false, true) => stdout.into_owned(),
        (false, false) => format!("{stdout}{stderr}"),
    }
}

fn detect_program() -> Result<(PathBuf, Vec<String>), BackendError> {
    if let Ok(explicit) = std::env::var(DOCKER_ENV) {
        if !explicit.trim().is_empty() {
            return Ok((PathBuf::from(explicit), vec!["compose".to_string()]));
        }
    }
    if let Ok(docker) = which::which("docker") {
        if plugin_available(&docker) {
            return Ok((docker, vec!["compose".to_string()]));
        }
    }
    if let Ok(standalone) = which::which("docker-compose") {
        return Ok((standalone, vec![]));
    }
    Err(BackendError::Unavailable)
}

fn plugin_available(docker: &Path) -> bool {
    Command::new(docker)
        .args(["compose", "version"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl ComposeBackend for DockerCompose {
    fn down(&self) -> Result<(), BackendError> {
        self.run_captured(&strings(&["down", "--remove-orphans"]))
            .map(|_| ())
    }

    fn build(&self, service: &str, no_cache: bool) -> Result<(), BackendError> {
        let mut args = strings(&["build"]);
        if no_cache {
            args.push("--no-cache".to_string());
        }
        args.push(service.to_string());
        self.run_captured(&args).map(|_| ())
    }

    fn up(&self, service: &str) -> Result<(), BackendError> {
        self.run_captured(&strings(&["up", "--detach", "--no-deps", "--no-build", service]))
            .map(|_| ())
    }

    fn ps(&self) -> Result<Vec<ContainerStatus>, BackendError> {
        let out = self.run_captured(&strings(&["ps", "--all", "--format", "json"]))?;
        parse_ps_json(&out)
    }

    fn probe(&self, service: &str, argv: &[String]) -> Result<bool, BackendError> {
        let mut args = strings(&["exec", "-T", service]);
        args.extend(argv.iter().cloned());
        let (mut cmd, command_line) = self.command(&args);
        let status = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| BackendError::Spawn {
                command: command_line,
                reason: e.to_string(),
            })?;
        Ok(status.success())
    }

    fn exec(
        &self,
        service: &str,
        argv: &[String],
        interactive: bool,
    ) -> Result<i32, BackendError> {
        let tty = interactive && std::io::stdin().is_terminal();
        let mut args = strings(&["exec"]);
        if !tty {
            args.push("-T".to_string());
        }
        args.push(service.to_string());
        args.extend(argv.iter().cloned());
        let (mut cmd, command_line) = self.command(&args);
        tracing::info!(%service, command = %argv.join(" "), "exec");
        let status = cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| BackendError::Spawn {
                command: command_line,
                reason: e.to_string(),
            })?;
        Ok(status.code().unwrap_or(-1))
    }
}
