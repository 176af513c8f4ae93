//! Runtime settings.
//!
//! Loaded from an optional JSON file, then overridden from the environment:
//!
//! | variable | field |
//! |---|---|
//! | `RANDOMTRUST_ENV` | `environment` |
//! | `RANDOMTRUST_DATA_DIR` | `data_dir` |
//!
//! Missing keys fall back to [`Settings::default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chaos::LorenzConfig;
use crate::error::{InvalidInput, StoreError};
use crate::noise::NoiseConfig;
use crate::store::CounterKeyspace;

pub const ENV_ENVIRONMENT: &str = "RANDOMTRUST_ENV";
pub const ENV_DATA_DIR: &str = "RANDOMTRUST_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deployment name; prefixes every counter key.
    pub environment: String,
    pub counter_namespace: String,
    /// Root of the artifact, record and counter files.
    pub data_dir: PathBuf,
    pub default_min_export_bits: usize,
    pub noise: NoiseConfig,
    pub chaos: LorenzConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            counter_namespace: "rng_runs".to_string(),
            data_dir: PathBuf::from("randomtrust-data"),
            default_min_export_bits: 1_000_000,
            noise: NoiseConfig::default(),
            chaos: LorenzConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path)?;
        let settings: Settings = serde_json::from_slice(&bytes)?;
        Ok(settings)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(env) = var(ENV_ENVIRONMENT).filter(|v| !v.is_empty()) {
            self.environment = env;
        }
        if let Some(dir) = var(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn validate(&self) -> Result<(), InvalidInput> {
        // Both name a directory below the counter root.
        for (field, value) in [
            ("environment", &self.environment),
            ("counter_namespace", &self.counter_namespace),
        ] {
            if value.is_empty() {
                return Err(InvalidInput::new(field, "must not be empty"));
            }
            if !is_plain_name(value) {
                return Err(InvalidInput::new(
                    field,
                    "must not contain path separators or be '.' or '..'",
                ));
            }
        }
        self.noise.validate()?;
        self.chaos.validate()
    }

    pub fn keyspace(&self) -> CounterKeyspace {
        CounterKeyspace::new(&self.environment, &self.counter_namespace)
    }

    /// Directory holding one counter document per run.
    pub fn counters_dir(&self) -> PathBuf {
        self.data_dir.join("counters")
    }
}

fn is_plain_name(value: &str) -> bool {
    value != "." && value != ".." && !value.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.environment, "development");
        assert_eq!(s.counter_namespace, "rng_runs");
        assert_eq!(s.default_min_export_bits, 1_000_000);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"environment": "staging", "chaos": {{"steps": 500}}}}"#
        )
        .unwrap();
        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.environment, "staging");
        assert_eq!(s.chaos.steps, 500);
        assert_eq!(s.chaos.sigma, 10.0);
        assert_eq!(s.noise, NoiseConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_env_overrides() {
        let s = Settings::default().apply_vars(|name| match name {
            ENV_ENVIRONMENT => Some("prod".into()),
            ENV_DATA_DIR => Some(String::new()),
            _ => None,
        });
        assert_eq!(s.environment, "prod");
        assert_eq!(s.data_dir, PathBuf::from("randomtrust-data"));
        assert_eq!(
            s.keyspace().key(uuid::Uuid::nil()),
            "prod:rng_runs:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_validate_rejects_bad_chaos() {
        let s = Settings {
            chaos: LorenzConfig {
                steps: 0,
                ..LorenzConfig::default()
            },
            ..Settings::default()
        };
        assert_eq!(s.validate().unwrap_err().field, "steps");
    }

    #[test]
    fn test_validate_rejects_path_like_keyspace() {
        for bad in ["..", ".", "a/b", "a\\b"] {
            let s = Settings {
                environment: bad.to_string(),
                ..Settings::default()
            };
            assert_eq!(s.validate().unwrap_err().field, "environment", "{bad:?}");
        }
        let s = Settings {
            counter_namespace: "../runs".to_string(),
            ..Settings::default()
        };
        assert_eq!(s.validate().unwrap_err().field, "counter_namespace");
        let s = Settings {
            environment: "prod-eu.1".to_string(),
            ..Settings::default()
        };
        assert!(s.validate().is_ok());
    }
}
