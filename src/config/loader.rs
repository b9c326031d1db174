//! Configuration Loader
//!
//! Layered loading on top of the `config` crate. The environment is read
//! through a snapshot map so tests can supply variables without touching the
//! process environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::WorkerConfig;
use crate::constants::defaults;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_VAR: &str = "BETA_WORKER_CONFIG";

/// Prefix for structured overrides, e.g. `BETA_WORKER__RETRY__MAX_RETRIES`
pub const ENV_PREFIX: &str = "BETA_WORKER";

/// Flat variable names honoured for compatibility, mapped to their keys
const LEGACY_VARIABLES: &[(&str, &str)] = &[
    ("MAX_RETRIES", "retry.max_retries"),
    ("BASE_BACKOFF_SECONDS", "retry.base_backoff_seconds"),
    ("DATABASE_URL", "broker_url"),
];

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit configuration file; it must exist
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read variables from `vars` instead of the process environment
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    /// Load from the process environment and the default file locations
    pub fn load_default() -> ConfigResult<WorkerConfig> {
        Self::new().load()
    }

    /// Merge all layers, deserialize and validate
    pub fn load(&self) -> ConfigResult<WorkerConfig> {
        let env = self
            .env
            .clone()
            .unwrap_or_else(|| std::env::vars().collect());

        let mut builder = Config::builder();

        // Layer 1: defaults
        let defaults_json = serde_json::to_string(&WorkerConfig::default())?;
        builder = builder.add_source(File::from_str(&defaults_json, FileFormat::Json));

        // Layer 2: TOML file
        if let Some(path) = self.resolve_config_file(&env)? {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        // Layer 3: BETA_WORKER__SECTION__FIELD
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(Some(env.clone())),
        );

        // Layer 4: legacy flat names
        for (variable, key) in LEGACY_VARIABLES {
            if let Some(value) = env.get(*variable) {
                builder = builder.set_override(*key, value.as_str())?;
            }
        }

        let config: WorkerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&config.sanitized())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        Ok(config)
    }

    fn resolve_config_file(&self, env: &HashMap<String, String>) -> ConfigResult<Option<PathBuf>> {
        let explicit = self
            .config_path
            .clone()
            .or_else(|| env.get(CONFIG_PATH_VAR).map(PathBuf::from));

        match explicit {
            Some(path) if path.exists() => Ok(Some(path)),
            Some(path) => Err(ConfigurationError::config_file_not_found(path)),
            None => {
                let fallback = PathBuf::from(defaults::CONFIG_FILE);
                Ok(fallback.exists().then_some(fallback))
            }
        }
    }
}
