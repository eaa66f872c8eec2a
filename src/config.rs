//! Process configuration
//!
//! Settings are loaded from environment variables with defaults:
//!
//! - `M2K_PLANNER_TRANSFORMERS_DIR`: extra directory of transformer YAML files
//! - `M2K_PLANNER_EXEC_TIMEOUT`: seconds a transformer command may run, default 300
//! - `M2K_PLANNER_LOG_LEVEL`: logging level, default "info"
//! - `M2K_PLANNER_BUILTIN_TRANSFORMERS`: load the embedded transformers, default true
//!
//! ```no_run
//! use m2k_planner::PlannerConfig;
//!
//! let config = PlannerConfig::from_env().expect("Malformed environment");
//! config.validate().expect("Invalid configuration");
//! ```

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const TRANSFORMERS_DIR_ENV: &str = "M2K_PLANNER_TRANSFORMERS_DIR";
pub const EXEC_TIMEOUT_ENV: &str = "M2K_PLANNER_EXEC_TIMEOUT";
pub const LOG_LEVEL_ENV: &str = "M2K_PLANNER_LOG_LEVEL";
pub const BUILTIN_TRANSFORMERS_ENV: &str = "M2K_PLANNER_BUILTIN_TRANSFORMERS";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;
const MAX_EXEC_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    /// Directory searched for transformer configs before the built-in ones
    pub transformers_dir: Option<PathBuf>,

    pub exec_timeout_secs: u64,

    pub log_level: String,

    pub builtin_transformers: bool,
}

impl Default for PlannerConfig {
    /// Loads from the environment, falling back to defaults for unset or
    /// unparsable values
    fn default() -> Self {
        let transformers_dir = env::var(TRANSFORMERS_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let exec_timeout_secs = env::var(EXEC_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_EXEC_TIMEOUT_SECS);

        let log_level = env::var(LOG_LEVEL_ENV)
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let builtin_transformers = env::var(BUILTIN_TRANSFORMERS_ENV)
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        Self {
            transformers_dir,
            exec_timeout_secs,
            log_level,
            builtin_transformers,
        }
    }
}

impl PlannerConfig {
    /// Strict variant of [`Default::default`]: a set but unparsable variable
    /// is an error
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default();
        if let Ok(raw) = env::var(EXEC_TIMEOUT_ENV) {
            raw.parse::<u64>().map_err(|e| ConfigError::ParseError {
                field: EXEC_TIMEOUT_ENV.to_string(),
                error: e.to_string(),
            })?;
        }
        if let Ok(raw) = env::var(BUILTIN_TRANSFORMERS_ENV) {
            raw.parse::<bool>().map_err(|e| ConfigError::ParseError {
                field: BUILTIN_TRANSFORMERS_ENV.to_string(),
                error: e.to_string(),
            })?;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exec_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Exec timeout must be at least 1 second".to_string(),
            ));
        }
        if self.exec_timeout_secs > MAX_EXEC_TIMEOUT_SECS {
            return Err(ConfigError::ValidationFailed(
                "Exec timeout cannot exceed 1 hour".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        if let Some(dir) = &self.transformers_dir {
            if !dir.is_dir() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Transformers directory does not exist: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(dir) = &self.transformers_dir {
            map.insert("transformers_dir".to_string(), dir.display().to_string());
        }
        map.insert(
            "exec_timeout_secs".to_string(),
            self.exec_timeout_secs.to_string(),
        );
        map.insert("log_level".to_string(), self.log_level.clone());
        map.insert(
            "builtin_transformers".to_string(),
            self.builtin_transformers.to_string(),
        );
        map
    }
}

impl fmt::Display for PlannerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Planner Configuration:")?;
        if let Some(dir) = &self.transformers_dir {
            writeln!(f, "  Transformers Dir: {}", dir.display())?;
        }
        writeln!(f, "  Exec Timeout: {}s", self.exec_timeout_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        writeln!(f, "  Built-in Transformers: {}", self.builtin_transformers)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn valid() -> PlannerConfig {
        PlannerConfig {
            transformers_dir: None,
            exec_timeout_secs: 60,
            log_level: "info".to_string(),
            builtin_transformers: true,
        }
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _guards = vec![
            EnvGuard::unset(TRANSFORMERS_DIR_ENV),
            EnvGuard::unset(EXEC_TIMEOUT_ENV),
            EnvGuard::unset(LOG_LEVEL_ENV),
            EnvGuard::unset(BUILTIN_TRANSFORMERS_ENV),
        ];

        let config = PlannerConfig::default();
        assert_eq!(config.transformers_dir, None);
        assert_eq!(config.exec_timeout_secs, DEFAULT_EXEC_TIMEOUT_SECS);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.builtin_transformers);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().display().to_string();
        let _guards = vec![
            EnvGuard::set(TRANSFORMERS_DIR_ENV, &dir),
            EnvGuard::set(EXEC_TIMEOUT_ENV, "45"),
            EnvGuard::set(LOG_LEVEL_ENV, "DEBUG"),
            EnvGuard::set(BUILTIN_TRANSFORMERS_ENV, "false"),
        ];

        let config = PlannerConfig::from_env().unwrap();
        assert_eq!(config.transformers_dir, Some(tmp.path().to_path_buf()));
        assert_eq!(config.exec_timeout(), Duration::from_secs(45));
        assert_eq!(config.log_level, "debug");
        assert!(!config.builtin_transformers);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        let _guard = EnvGuard::set(EXEC_TIMEOUT_ENV, "soon");
        assert!(matches!(
            PlannerConfig::from_env(),
            Err(ConfigError::ParseError { .. })
        ));
        assert_eq!(PlannerConfig::default().exec_timeout_secs, DEFAULT_EXEC_TIMEOUT_SECS);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = valid();
        config.exec_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.exec_timeout_secs = MAX_EXEC_TIMEOUT_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.transformers_dir = Some(PathBuf::from("/definitely/not/here"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_display_and_map() {
        let config = valid();
        let display = config.to_string();
        assert!(display.contains("Planner Configuration:"));
        assert!(display.contains("Exec Timeout: 60s"));

        let map = config.to_display_map();
        assert_eq!(map["log_level"], "info");
        assert!(!map.contains_key("transformers_dir"));
    }
}
