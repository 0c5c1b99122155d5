//! Deployment environment selecting the configuration layer

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    pub const ENV_VAR: &'static str = "TRIBUTARY_APP_ENV";

    /// Read `TRIBUTARY_APP_ENV`, falling back to `Development` when it is
    /// unset or unparsable.
    pub fn from_env() -> Self {
        match std::env::var(Self::ENV_VAR) {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                eprintln!("Ignoring {}: {}", Self::ENV_VAR, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// An explicit choice (e.g. `--env`) wins over the environment variable.
    pub fn resolve(explicit: Option<Environment>) -> Self {
        explicit.unwrap_or_else(Self::from_env)
    }

    /// Stem of the environment-specific configuration file
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.toml", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::EnvVarError(format!(
                "invalid environment '{}', expected one of: development, test, staging, production",
                s
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_and_aliases() {
        for (input, expected) in [
            ("development", Environment::Development),
            ("dev", Environment::Development),
            ("test", Environment::Test),
            ("stage", Environment::Staging),
            ("PROD", Environment::Production),
            (" production ", Environment::Production),
        ] {
            assert_eq!(input.parse::<Environment>().unwrap(), expected, "{}", input);
        }
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(Environment::Staging.file_name(), "staging.toml");
        assert_eq!(Environment::default().to_string(), "development");
    }

    #[test]
    fn test_explicit_choice_wins() {
        assert_eq!(
            Environment::resolve(Some(Environment::Test)),
            Environment::Test
        );
    }
}
