//! Service descriptors and the profile resolver.
//!
//! The built-in catalog declares the four services of the stack. A project
//! can replace or extend entries through `services:` in `stackctl.yaml`;
//! entries are matched by name.

use crate::error::ConfigError;
use crate::profile::Profile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// HealthCheck
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthCheck {
    /// Command run inside the container; exit 0 means healthy.
    Command { command: Vec<String> },
    /// HTTP endpoint served inside the container.
    Http { port: u16, path: String },
    /// No check: a running container counts as healthy.
    None,
}

impl HealthCheck {
    /// Command used to probe the service from inside its container.
    pub fn probe_argv(&self) -> Option<Vec<String>> {
        match self {
            HealthCheck::Command { command } if !command.is_empty() => Some(command.clone()),
            HealthCheck::Command { .. } | HealthCheck::None => None,
            HealthCheck::Http { port, path } => Some(vec![
                "wget".to_string(),
                "-q".to_string(),
                "-O".to_string(),
                "/dev/null".to_string(),
                format!("http://127.0.0.1:{port}{path}"),
            ]),
        }
    }
}

// ---------------------------------------------------------------------------
// RestartPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    #[default]
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub service: String,
    /// A required dependency must be in the same profile and accepted by the
    /// backend before the dependent starts. Optional ones may live outside
    /// the stack (e.g. a hosted database in production).
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default = "default_health")]
    pub health: HealthCheck,
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
    #[serde(default)]
    pub restart: RestartPolicy,
    pub profiles: Vec<Profile>,
    /// Whether the image is built from the project (true) or pulled (false).
    #[serde(default)]
    pub build: bool,
}

fn default_health() -> HealthCheck {
    HealthCheck::None
}

impl ServiceDescriptor {
    pub fn in_profile(&self, profile: Profile) -> bool {
        self.profiles.contains(&profile)
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    services: Vec<ServiceDescriptor>,
}

impl Catalog {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self { services }
    }

    /// Database, admin UI, API and reverse proxy.
    pub fn builtin() -> Self {
        Self::new(vec![
            ServiceDescriptor {
                name: "db".to_string(),
                health: HealthCheck::Command {
                    command: argv(&["sh", "-c", "pg_isready -U \"$POSTGRES_USER\""]),
                },
                depends_on: vec![],
                restart: RestartPolicy::UnlessStopped,
                profiles: vec![Profile::Local],
                build: false,
            },
            ServiceDescriptor {
                name: "pgadmin".to_string(),
                health: HealthCheck::None,
                depends_on: vec![Dependency {
                    service: "db".to_string(),
                    required: true,
                }],
                restart: RestartPolicy::UnlessStopped,
                profiles: vec![Profile::Local],
                build: false,
            },
            ServiceDescriptor {
                name: "api".to_string(),
                health: HealthCheck::Command {
                    command: argv(&[
                        "python",
                        "-c",
                        "import urllib.request; urllib.request.urlopen('http://127.0.0.1:8000/api/v1/health', timeout=5)",
                    ]),
                },
                depends_on: vec![Dependency {
                    service: "db".to_string(),
                    required: false,
                }],
                restart: RestartPolicy::UnlessStopped,
                profiles: vec![Profile::Local, Profile::Production],
                build: true,
            },
            ServiceDescriptor {
                name: "proxy".to_string(),
                health: HealthCheck::Http {
                    port: 8080,
                    path: "/health".to_string(),
                },
                depends_on: vec![Dependency {
                    service: "api".to_string(),
                    required: true,
                }],
                restart: RestartPolicy::Always,
                profiles: vec![Profile::Local, Profile::Production],
                build: true,
            },
        ])
    }

    /// Replace entries with the same name and append new ones.
    pub fn merged(mut self, overrides: &[ServiceDescriptor]) -> Self {
        for desc in overrides {
            match self.services.iter_mut().find(|s| s.name == desc.name) {
                Some(existing) => *existing = desc.clone(),
                None => self.services.push(desc.clone()),
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }
}

// ---------------------------------------------------------------------------
// ServiceSet
// ---------------------------------------------------------------------------

/// Descriptors active for one profile, in dependency order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSet {
    pub profile: Profile,
    services: Vec<ServiceDescriptor>,
}

impl ServiceSet {
    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Required dependencies of `service` that are part of this set.
    pub fn required_dependencies<'a>(&'a self, service: &'a ServiceDescriptor) -> Vec<&'a str> {
        service
            .depends_on
            .iter()
            .filter(|d| d.required && self.contains(&d.service))
            .map(|d| d.service.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolve the built-in catalog for `profile`.
pub fn resolve(profile: Profile) -> Result<ServiceSet, ConfigError> {
    resolve_with(&Catalog::builtin(), profile)
}

/// Select the descriptors of `profile` from `catalog` and order them so every
/// service follows its in-profile dependencies.
pub fn resolve_with(catalog: &Catalog, profile: Profile) -> Result<ServiceSet, ConfigError> {
    let members: Vec<&ServiceDescriptor> =
        catalog.iter().filter(|s| s.in_profile(profile)).collect();
    let member_names: HashSet<&str> = members.iter().map(|s| s.name.as_str()).collect();

    // Edges restricted to the profile; anything else is external or an error.
    let mut edges: Vec<(&ServiceDescriptor, Vec<&str>)> = Vec::with_capacity(members.len());
    for svc in &members {
        let mut deps = Vec::new();
        for dep in &svc.depends_on {
            let known = catalog.get(&dep.service).is_some();
            let in_profile = member_names.contains(dep.service.as_str());
            match (known, in_profile, dep.required) {
                (_, true, _) => deps.push(dep.service.as_str()),
                (false, false, true) => {
                    return Err(ConfigError::MissingDescriptor {
                        service: dep.service.clone(),
                        referenced_by: svc.name.clone(),
                    })
                }
                (true, false, true) => {
                    return Err(ConfigError::DependencyOutsideProfile {
                        service: svc.name.clone(),
                        dependency: dep.service.clone(),
                        profile: profile.to_string(),
                    })
                }
                (_, false, false) => {
                    tracing::debug!(
                        service = %svc.name,
                        dependency = %dep.service,
                        %profile,
                        "optional dependency treated as external"
                    );
                }
            }
        }
        edges.push((svc, deps));
    }

    // Stable topological order: repeatedly take the first service whose
    // dependencies are already placed.
    let mut ordered: Vec<ServiceDescriptor> = Vec::with_capacity(edges.len());
    let mut placed: HashSet<&str> = HashSet::new();
    while !edges.is_empty() {
        let Some(pos) = edges
            .iter()
            .position(|(_, deps)| deps.iter().all(|d| placed.contains(d)))
        else {
            let mut stuck: Vec<String> = edges.iter().map(|(s, _)| s.name.clone()).collect();
            stuck.sort();
            return Err(ConfigError::DependencyCycle(stuck));
        };
        let (svc, _) = edges.remove(pos);
        placed.insert(svc.name.as_str());
        ordered.push(svc.clone());
    }

    Ok(ServiceSet {
        profile,
        services: ordered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(name: &str, deps: &[(&str, bool)], profiles: &[Profile]) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            health: HealthCheck::None,
            depends_on: deps
                .iter()
                .map(|(s, r)| Dependency {
                    service: s.to_string(),
                    required: *r,
                })
                .collect(),
            restart: RestartPolicy::default(),
            profiles: profiles.to_vec(),
            build: false,
        }
    }

    #[test]
    fn local_has_all_four_services_in_dependency_order() {
        let set = resolve(Profile::Local).unwrap();
        assert_eq!(set.names(), vec!["db", "pgadmin", "api", "proxy"]);
    }

    #[test]
    fn production_excludes_database_and_admin() {
        let set = resolve(Profile::Production).unwrap();
        assert_eq!(set.names(), vec!["api", "proxy"]);
        assert!(!set.contains("db"));
        assert!(!set.contains("pgadmin"));
    }

    #[test]
    fn local_is_superset_of_production() {
        let local = resolve(Profile::Local).unwrap();
        let prod = resolve(Profile::Production).unwrap();
        for name in prod.names() {
            assert!(local.contains(name), "{name} missing from local");
        }
    }

    #[test]
    fn missing_required_descriptor_is_an_error() {
        let catalog = Catalog::new(vec![svc(
            "api",
            &[("cache", true)],
            &[Profile::Production],
        )]);
        let err = resolve_with(&catalog, Profile::Production).unwrap_err();
        match err {
            ConfigError::MissingDescriptor {
                service,
                referenced_by,
            } => {
                assert_eq!(service, "cache");
                assert_eq!(referenced_by, "api");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn optional_unknown_dependency_is_external() {
        let catalog = Catalog::new(vec![svc(
            "api",
            &[("hosted-db", false)],
            &[Profile::Production],
        )]);
        let set = resolve_with(&catalog, Profile::Production).unwrap();
        assert_eq!(set.names(), vec!["api"]);
    }

    #[test]
    fn required_dependency_outside_profile_rejected() {
        let catalog = Catalog::new(vec![
            svc("db", &[], &[Profile::Local]),
            svc("worker", &[("db", true)], &[Profile::Production]),
        ]);
        let err = resolve_with(&catalog, Profile::Production).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyOutsideProfile { .. }));
    }

    #[test]
    fn cycle_detected() {
        let catalog = Catalog::new(vec![
            svc("a", &[("b", true)], &[Profile::Local]),
            svc("b", &[("a", true)], &[Profile::Local]),
            svc("c", &[], &[Profile::Local]),
        ]);
        match resolve_with(&catalog, Profile::Local).unwrap_err() {
            ConfigError::DependencyCycle(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn declaration_order_does_not_matter() {
        let catalog = Catalog::new(vec![
            svc("proxy", &[("api", true)], &[Profile::Local]),
            svc("api", &[("db", true)], &[Profile::Local]),
            svc("db", &[], &[Profile::Local]),
        ]);
        let set = resolve_with(&catalog, Profile::Local).unwrap();
        assert_eq!(set.names(), vec!["db", "api", "proxy"]);
    }

    #[test]
    fn merged_replaces_by_name_and_appends() {
        let extra = vec![
            svc("api", &[], &[Profile::Production]),
            svc("worker", &[("api", true)], &[Profile::Production]),
        ];
        let catalog = Catalog::builtin().merged(&extra);
        let set = resolve_with(&catalog, Profile::Production).unwrap();
        assert_eq!(set.names(), vec!["api", "proxy", "worker"]);
        assert!(set.get("api").unwrap().depends_on.is_empty());
    }

    #[test]
    fn required_dependencies_filtered_to_set() {
        let set = resolve(Profile::Local).unwrap();
        let api = set.get("api").unwrap();
        // db is optional for the api, so nothing gates its start
        assert!(set.required_dependencies(api).is_empty());
        let proxy = set.get("proxy").unwrap();
        assert_eq!(set.required_dependencies(proxy), vec!["api"]);
    }

    #[test]
    fn http_check_probes_loopback() {
        let check = HealthCheck::Http {
            port: 8080,
            path: "/health".into(),
        };
        let argv = check.probe_argv().unwrap();
        assert_eq!(argv.last().unwrap(), "http://127.0.0.1:8080/health");
        assert!(HealthCheck::None.probe_argv().is_none());
    }

    #[test]
    fn descriptor_yaml_defaults() {
        let yaml = "name: worker\nprofiles: [local]\n";
        let desc: ServiceDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.health, HealthCheck::None);
        assert_eq!(desc.restart, RestartPolicy::UnlessStopped);
        assert!(!desc.build);
        let yaml = "name: worker\nprofiles: [local]\ndepends_on:\n  - service: db\n";
        let desc: ServiceDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert!(desc.depends_on[0].required);
    }
}
