use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Deployment profile, chosen once per invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Local,
    #[default]
    Production,
}

impl Profile {
    pub fn all() -> &'static [Profile] {
        &[Profile::Local, Profile::Production]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Local => "local",
            Profile::Production => "production",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Profile::Local),
            "production" => Ok(Profile::Production),
            _ => Err(ConfigError::InvalidProfile(s.to_string())),
        }
    }
}
