#![forbid(unsafe_code)]

//! Coordinator configuration: defaults, then an optional JSON file, then `CELLMIND_*`
//! environment variables.

use cm_core::ids::ProjectKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_PREFIX: &str = "CELLMIND_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid project key: {0}")]
    ProjectKey(&'static str),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "CONFIG_READ",
            Self::Parse { .. } => "CONFIG_PARSE",
            Self::InvalidEnv { .. } => "CONFIG_ENV",
            Self::ProjectKey(_) => "CONFIG_PROJECT_KEY",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub storage_dir: PathBuf,
    pub project: String,
    /// Agent id that receives failure notifications.
    pub coordinator_agent: String,
    pub max_review_attempts: u32,
    pub skip_review: bool,
    pub skip_verification: bool,
    /// JSONL mirror refreshed after each close; `None` disables the export post-condition.
    pub export_path: Option<PathBuf>,
    pub verification: VerificationConfig,
    pub log: LogConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".cellmind"),
            project: "default".to_string(),
            coordinator_agent: "coordinator".to_string(),
            max_review_attempts: 3,
            skip_review: false,
            skip_verification: false,
            export_path: None,
            verification: VerificationConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// argv, e.g. `["cargo", "check"]`. Empty skips the step.
    pub typecheck: Vec<String>,
    pub tests: Vec<String>,
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            typecheck: Vec::new(),
            tests: Vec::new(),
            timeout_ms: 300_000,
            working_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SwarmConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, overlaid by `path` when given, overlaid by the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading configuration");
                Self::from_json_file(path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(std::env::vars())?;
        Ok(config)
    }

    pub fn apply_env_overrides(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "STORAGE_DIR" => self.storage_dir = PathBuf::from(&value),
                "PROJECT" => self.project = value.trim().to_string(),
                "COORDINATOR" => self.coordinator_agent = value.trim().to_string(),
                "MAX_REVIEW_ATTEMPTS" => self.max_review_attempts = parse_num(&key, &value)?,
                "SKIP_REVIEW" => self.skip_review = parse_bool(&key, &value)?,
                "SKIP_VERIFICATION" => self.skip_verification = parse_bool(&key, &value)?,
                "EXPORT_PATH" => {
                    self.export_path = Some(value.trim())
                        .filter(|v| !v.is_empty())
                        .map(PathBuf::from);
                }
                "VERIFY_TIMEOUT_MS" => self.verification.timeout_ms = parse_num(&key, &value)?,
                "TYPECHECK_CMD" => self.verification.typecheck = split_command(&value),
                "TEST_CMD" => self.verification.tests = split_command(&value),
                "LOG" => self.log.level = value.trim().to_string(),
                "LOG_JSON" => self.log.json = parse_bool(&key, &value)?,
                _ => {
                    tracing::debug!(key = %key, "ignoring unknown configuration variable");
                    continue;
                }
            }
            tracing::debug!(key = %key, "environment override applied");
        }
        Ok(())
    }

    pub fn project_key(&self) -> Result<ProjectKey, ConfigError> {
        ProjectKey::try_new(self.project.as_str()).map_err(|err| ConfigError::ProjectKey(err.message()))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn file_values_fill_in_over_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cellmind.json");
        std::fs::write(
            &path,
            r#"{ "project": "acme/web", "verification": { "tests": ["cargo", "test"] } }"#,
        )
        .expect("write config");

        let config = SwarmConfig::from_json_file(&path).expect("load");
        assert_eq!(config.project, "acme/web");
        assert_eq!(config.verification.tests, vec!["cargo", "test"]);
        assert_eq!(config.verification.timeout_ms, 300_000);
        assert_eq!(config.max_review_attempts, 3);
    }

    #[test]
    fn environment_overrides_win() {
        let mut config = SwarmConfig::default();
        config
            .apply_env_overrides(vars(&[
                ("CELLMIND_PROJECT", "acme/api"),
                ("CELLMIND_SKIP_REVIEW", "yes"),
                ("CELLMIND_MAX_REVIEW_ATTEMPTS", "5"),
                ("CELLMIND_TYPECHECK_CMD", "tsc --noEmit"),
                ("CELLMIND_EXPORT_PATH", ""),
                ("PATH", "/usr/bin"),
            ]))
            .expect("overrides");
        assert_eq!(config.project, "acme/api");
        assert!(config.skip_review);
        assert_eq!(config.max_review_attempts, 5);
        assert_eq!(config.verification.typecheck, vec!["tsc", "--noEmit"]);
        assert_eq!(config.export_path, None);
        assert!(config.project_key().is_ok());
    }

    #[test]
    fn malformed_environment_values_are_errors() {
        let mut config = SwarmConfig::default();
        let err = config
            .apply_env_overrides(vars(&[("CELLMIND_SKIP_VERIFICATION", "maybe")]))
            .expect_err("bad bool");
        assert_eq!(err.code(), "CONFIG_ENV");

        let err = config
            .apply_env_overrides(vars(&[("CELLMIND_VERIFY_TIMEOUT_MS", "soon")]))
            .expect_err("bad number");
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ project: ").expect("write");
        match SwarmConfig::from_json_file(&path) {
            Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
