use thiserror::Error;

use crate::resolve::ArgKind;

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Layer labels used in argument messages.
pub(crate) const ARG_REQUEST_LAYER: &str = "job";
pub(crate) const ARG_APP_LAYER: &str = "application";

/// Layer labels used in environment variable messages.
pub(crate) const ENV_REQUEST_LAYER: &str = "job request";
pub(crate) const ENV_APP_LAYER: &str = "application definition";
pub(crate) const ENV_SYSTEM_LAYER: &str = "system definition";

/// Errors detected while resolving job parameters.
///
/// All of them are caused by an invalid submission (or application/system definition), so they
/// are reported back to the submitter and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("{kind} name '{name}' is defined more than once in the {layer} layer")]
    DuplicateName {
        kind: ArgKind,
        layer: &'static str,
        name: String,
    },
    #[error(
        "{kind} '{name}' is FIXED in the {base_layer} layer and cannot be changed by the {layer} layer"
    )]
    FixedArgOverride {
        kind: ArgKind,
        name: String,
        layer: &'static str,
        base_layer: &'static str,
    },
    #[error("{kind} '{name}' has no value")]
    MissingValue { kind: ArgKind, name: String },
    #[error("{kind} '{name}' contains disallowed sequence '{sequence}' in its {field}")]
    DangerousCharacter {
        kind: ArgKind,
        name: String,
        field: &'static str,
        sequence: String,
    },
    #[error("notes of '{name}' are not a JSON object: {reason}")]
    InvalidNotes { name: String, reason: String },
    #[error("environment variable '{key}' in the {layer} uses the reserved prefix '{prefix}'")]
    ReservedEnvName {
        layer: &'static str,
        key: String,
        prefix: String,
    },
    #[error("environment variable name '{key}' in the {layer} is not a valid identifier")]
    InvalidEnvName { layer: &'static str, key: String },
    #[error("environment variable '{key}' is defined more than once in the {layer}")]
    DuplicateEnvName { layer: &'static str, key: String },
    #[error(
        "environment variable '{key}' is FIXED in the {base_layer} and cannot be changed by the {layer}"
    )]
    FixedEnvOverride {
        key: String,
        layer: &'static str,
        base_layer: &'static str,
    },
    #[error("FIXED environment variable '{key}' in the {layer} has no value")]
    FixedEnvUnset { layer: &'static str, key: String },
    #[error("REQUIRED environment variable '{key}' in the {layer} must not define a value")]
    RequiredEnvHasValue { layer: &'static str, key: String },
    #[error("environment variable '{key}' has no value")]
    MissingEnvValue { key: String },
    #[error("unknown scheduler option '{option}'")]
    UnknownSchedulerOption { option: String },
    #[error("invalid value for scheduler option '{option}': {reason}")]
    InvalidSchedulerOption { option: String, reason: String },
}

impl ResolveError {
    /// Stable identifier of the message, independent of the concrete names in the error.
    pub fn message_id(&self) -> &'static str {
        match self {
            ResolveError::DuplicateName { .. } => "duplicate named argument",
            ResolveError::FixedArgOverride { .. } => "fixed argument override",
            ResolveError::MissingValue { .. } => "missing argument value",
            ResolveError::DangerousCharacter { .. } => "dangerous argument character",
            ResolveError::InvalidNotes { .. } => "invalid notes",
            ResolveError::ReservedEnvName { .. } => "reserved environment variable name",
            ResolveError::InvalidEnvName { .. } => "invalid environment variable name",
            ResolveError::DuplicateEnvName { .. } => "duplicate environment variable",
            ResolveError::FixedEnvOverride { .. } => "fixed environment variable override",
            ResolveError::FixedEnvUnset { .. } => "fixed environment variable without value",
            ResolveError::RequiredEnvHasValue { .. } => "required environment variable with value",
            ResolveError::MissingEnvValue { .. } => "missing environment variable value",
            ResolveError::UnknownSchedulerOption { .. } => "unknown scheduler option",
            ResolveError::InvalidSchedulerOption { .. } => "invalid scheduler option",
        }
    }
}
