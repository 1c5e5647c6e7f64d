use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration from {source_name}: {reason}")]
    LoadFailed { source_name: String, reason: String },
}

impl ConfigurationError {
    pub fn invalid_value(field: &str, value: impl ToString, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn load_failed(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::LoadFailed {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::load_failed("configuration sources", error)
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
