//! Configuration Loader
//!
//! Layers compiled defaults, an optional configuration file and `SAGA__*` environment
//! variables through the `config` crate, then validates the merged result.

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;
use crate::constants::CONFIG_ENV_PREFIX;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Loaded and validated engine configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: EngineConfig,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Defaults plus environment overrides
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::build(None, None)
    }

    /// Defaults, then the given file, then environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(Some(path.as_ref()), None)
    }

    /// Same as [`ConfigManager::load_from_file`] but reads overrides from `env` instead of the
    /// process environment. Keys use the `SAGA__SECTION__FIELD` form.
    pub fn load_with_env(
        path: Option<&Path>,
        env: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(path, Some(env))
    }

    /// Wrap an already constructed configuration after validating it
    pub fn from_config(config: EngineConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            source_file: None,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    fn build(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let defaults = Config::try_from(&EngineConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::load_failed(
                    path.display().to_string(),
                    "file does not exist",
                ));
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: EngineConfig = builder
            .build()
            .and_then(|merged| merged.try_deserialize())
            .map_err(|e| {
                ConfigurationError::load_failed(
                    path.map(|p| p.display().to_string())
                        .unwrap_or_else(|| "defaults".to_string()),
                    e,
                )
            })?;

        config.validate()?;

        info!(
            source = ?path,
            max_concurrent_actions = config.scheduler.max_concurrent_actions,
            max_retry_attempts = config.retry.max_retry_attempts,
            action_timeout_ms = config.saga.action_timeout_ms,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            source_file: path.map(Path::to_path_buf),
        }))
    }
}
