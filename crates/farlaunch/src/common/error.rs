use thiserror::Error;

use crate::resolve::ResolveError;

#[derive(Debug, Error)]
pub enum FarlaunchError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error(transparent)]
    ResolveError(#[from] ResolveError),
}

impl From<serde_json::error::Error> for FarlaunchError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for FarlaunchError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}
