use crate::context::ExecutionContext;
use crate::descriptor::{Catalog, ServiceDescriptor};
use crate::error::ConfigError;
use crate::paths;
use crate::profile::Profile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keys the API collaborator cannot start without.
pub const REQUIRED_ENV_KEYS: &[&str] = &[
    "DOMAIN",
    "POSTGRES_SERVER",
    "POSTGRES_USER",
    "POSTGRES_PASSWORD",
    "POSTGRES_DB",
    "SECRET_KEY",
];

// ---------------------------------------------------------------------------
// CertConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertConfig {
    pub dir: PathBuf,
    pub cert_file: String,
    pub key_file: String,
    pub validity_days: u32,
    pub renewal_threshold_days: u32,
    pub key_bits: usize,
    /// Overrides `DOMAIN` as the subject common name.
    pub common_name: Option<String>,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(paths::DEFAULT_CERT_DIR),
            cert_file: paths::DEFAULT_CERT_FILE.to_string(),
            key_file: paths::DEFAULT_KEY_FILE.to_string(),
            validity_days: 365,
            renewal_threshold_days: 30,
            key_bits: 2048,
            common_name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// HealthConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            timeout_secs: 300,
        }
    }
}

impl HealthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ProxyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub https_port: u16,
    pub health_port: u16,
    pub health_path: String,
    pub pgadmin_port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            https_port: 443,
            health_port: 8080,
            health_path: "/health".to_string(),
            pgadmin_port: 5050,
        }
    }
}

// ---------------------------------------------------------------------------
// CommandsConfig
// ---------------------------------------------------------------------------

/// Opaque collaborator entry points, run inside the API service.
/// Each entry is a list of argv vectors run in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Service the commands are delegated to.
    pub service: String,
    pub entries: BTreeMap<String, Vec<Vec<String>>>,
}

fn python_module(module: &str) -> Vec<String> {
    vec!["python".to_string(), "-m".to_string(), module.to_string()]
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "initdb".to_string(),
            vec![python_module("app.scripts.init_db")],
        );
        entries.insert(
            "createsuperuser".to_string(),
            vec![python_module("app.scripts.create_superuser")],
        );
        entries.insert(
            "seed".to_string(),
            [
                "app.scripts.seed_languages",
                "app.scripts.seed_sacraments",
                "app.scripts.seed_church_societies",
                "app.scripts.seed_church_communities",
                "app.scripts.seed_place_of_worship",
            ]
            .iter()
            .map(|m| python_module(m))
            .collect(),
        );
        entries.insert(
            "checkdb".to_string(),
            vec![vec![
                "python".to_string(),
                "-c".to_string(),
                "import asyncio, sys; from app.core.database import db; \
                 sys.exit(0 if asyncio.run(db.check_connection()) else 1)"
                    .to_string(),
            ]],
        );
        entries.insert(
            "runserver".to_string(),
            vec![[
                "uvicorn",
                "app.main:app",
                "--host",
                "0.0.0.0",
                "--port",
                "8000",
                "--reload",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()],
        );
        entries.insert("shell".to_string(), vec![vec!["python".to_string()]]);
        entries.insert("bash".to_string(), vec![vec!["bash".to_string()]]);
        Self {
            service: "api".to_string(),
            entries,
        }
    }
}

impl CommandsConfig {
    /// Layer these entries over the built-in ones; a name given here
    /// replaces the default for that name only.
    pub fn over_defaults(self) -> Self {
        let mut entries = Self::default().entries;
        entries.extend(self.entries);
        Self {
            service: self.service,
            entries,
        }
    }

    pub fn get(&self, name: &str) -> Result<&[Vec<String>], ConfigError> {
        self.entries
            .get(name)
            .filter(|cmds| !cmds.is_empty() && cmds.iter().all(|c| !c.is_empty()))
            .map(|v| v.as_slice())
            .ok_or_else(|| ConfigError::MissingCommand(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// StackConfig (stackctl.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Compose project name; defaults to `PROJECT_NAME` or the root dir name.
    pub project: Option<String>,
    pub compose_files: BTreeMap<Profile, Vec<PathBuf>>,
    pub certs: CertConfig,
    pub health: HealthConfig,
    pub proxy: ProxyConfig,
    /// Directories `setup` creates under the root.
    pub directories: Vec<PathBuf>,
    pub commands: CommandsConfig,
    /// Extra or replacement service descriptors.
    pub services: Vec<ServiceDescriptor>,
}

impl Default for StackConfig {
    fn default() -> Self {
        let mut compose_files = BTreeMap::new();
        compose_files.insert(
            Profile::Local,
            vec![
                PathBuf::from(paths::BASE_COMPOSE_FILE),
                PathBuf::from(paths::LOCAL_COMPOSE_FILE),
            ],
        );
        compose_files.insert(
            Profile::Production,
            vec![PathBuf::from(paths::BASE_COMPOSE_FILE)],
        );
        Self {
            project: None,
            compose_files,
            certs: CertConfig::default(),
            health: HealthConfig::default(),
            proxy: ProxyConfig::default(),
            directories: vec![PathBuf::from("logs"), PathBuf::from("uploads")],
            commands: CommandsConfig::default(),
            services: vec![],
        }
    }
}

impl StackConfig {
    /// Load `stackctl.yaml`; a missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path).map_err(|e| ConfigError::Parse {
            file: path.clone(),
            reason: e.to_string(),
        })?;
        let mut cfg: StackConfig = serde_yaml::from_str(&data).map_err(|e| ConfigError::Parse {
            file: path.clone(),
            reason: e.to_string(),
        })?;
        cfg.commands = cfg.commands.over_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(project) = &self.project {
            paths::validate_project_name(project)?;
        }
        if self.health.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "health.poll_interval_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.certs.validity_days == 0 {
            return Err(ConfigError::InvalidValue {
                key: "certs.validity_days".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn compose_files_for(&self, profile: Profile) -> &[PathBuf] {
        self.compose_files
            .get(&profile)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::builtin().merged(&self.services)
    }
}

// ---------------------------------------------------------------------------
// EnvFile
// ---------------------------------------------------------------------------

/// Merged KEY=VALUE pairs from `.env` and the optional profile overlay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvFile {
    /// Files actually read, in load order.
    pub files: Vec<PathBuf>,
    vars: BTreeMap<String, String>,
}

impl EnvFile {
    pub fn load(root: &Path, profile: Profile) -> Result<Self, ConfigError> {
        let base = paths::env_path(root);
        if !base.exists() {
            return Err(ConfigError::MissingEnvFile(base));
        }
        let mut env = EnvFile::default();
        env.merge_file(&base)?;
        let overlay = paths::env_overlay_path(root, profile);
        if overlay.exists() {
            env.merge_file(&overlay)?;
        }

        for key in REQUIRED_ENV_KEYS {
            if env.get(key).map_or(true, |v| v.trim().is_empty()) {
                return Err(ConfigError::MissingEnvKey {
                    key: key.to_string(),
                    file: base.clone(),
                });
            }
        }
        if let Some(port) = env.get("POSTGRES_PORT") {
            port.trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "POSTGRES_PORT".to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(env)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let parse_err = |reason: String| ConfigError::Parse {
            file: path.to_path_buf(),
            reason,
        };
        let iter = dotenvy::from_path_iter(path).map_err(|e| parse_err(e.to_string()))?;
        for item in iter {
            let (key, value) = item.map_err(|e| parse_err(e.to_string()))?;
            self.vars.insert(key, value);
        }
        self.files.push(path.to_path_buf());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Construct from literal pairs, bypassing the filesystem.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            files: vec![],
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything an invocation needs, loaded once and passed by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub profile: Profile,
    pub context: ExecutionContext,
    pub env: EnvFile,
    pub stack: StackConfig,
}

impl Settings {
    pub fn load(
        root: &Path,
        profile: Profile,
        context: ExecutionContext,
    ) -> Result<Self, ConfigError> {
        let stack = StackConfig::load(root)?;
        let env = EnvFile::load(root, profile)?;
        let settings = Self {
            root: root.to_path_buf(),
            profile,
            context,
            env,
            stack,
        };
        paths::validate_project_name(&settings.project_name())?;
        tracing::debug!(
            root = %settings.root.display(),
            %profile,
            context = context.as_str(),
            project = %settings.project_name(),
            "settings loaded"
        );
        Ok(settings)
    }

    /// Compose project namespace shared by every backend call.
    pub fn project_name(&self) -> String {
        if let Some(p) = &self.stack.project {
            return p.clone();
        }
        if let Some(p) = self.env.get("PROJECT_NAME") {
            return paths::sanitize_project_name(p);
        }
        let dir = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        paths::sanitize_project_name(&dir)
    }

    pub fn domain(&self) -> &str {
        self.env.get("DOMAIN").unwrap_or("localhost")
    }

    pub fn common_name(&self) -> &str {
        self.stack
            .certs
            .common_name
            .as_deref()
            .unwrap_or_else(|| self.domain())
    }

    pub fn cert_dir(&self) -> PathBuf {
        self.root.join(&self.stack.certs.dir)
    }

    pub fn compose_files(&self) -> Vec<PathBuf> {
        self.stack
            .compose_files_for(self.profile)
            .iter()
            .map(|f| self.root.join(f))
            .collect()
    }

    pub fn catalog(&self) -> Catalog {
        self.stack.catalog()
    }
}
