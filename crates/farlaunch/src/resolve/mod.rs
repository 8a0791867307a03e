//! Resolution of the final parameter set of a job.
//!
//! A job's command-line arguments and environment variables are defined in up to three layers:
//! the execution system (lowest precedence), the application and the submission request
//! (highest precedence). The resolvers in this module merge these layers once, at submission
//! time, and the result is stored with the job for the rest of its life.
//!
//! Application (and system) entries carry an [`InputMode`] that decides whether the entry is
//! included silently, only on request, or whether it is immutable.
mod argspec;
mod env;
mod error;
mod notes;
mod sanitize;
pub mod scheduler;
pub mod submission;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::common::config::ResolverConfig;

pub use argspec::resolve_arg_specs;
pub use env::{EnvValue, EnvVar, EnvVarDefinition, resolve_env_variables};
pub use error::{ResolveError, ResolveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputMode {
    /// Always included, a value has to be provided by some layer.
    Required,
    /// Always included, the value cannot be changed by any higher layer.
    Fixed,
    /// Included unless a higher layer explicitly excludes it.
    IncludeByDefault,
    /// Excluded unless a higher layer references it.
    IncludeOnDemand,
}

impl InputMode {
    pub fn is_include_mode(self) -> bool {
        matches!(self, InputMode::IncludeByDefault | InputMode::IncludeOnDemand)
    }
}

impl Display for InputMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InputMode::Required => "REQUIRED",
            InputMode::Fixed => "FIXED",
            InputMode::IncludeByDefault => "INCLUDE_BY_DEFAULT",
            InputMode::IncludeOnDemand => "INCLUDE_ON_DEMAND",
        };
        f.write_str(name)
    }
}

/// Which argument list is being resolved. Only used to label messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    AppArgs,
    ContainerArgs,
    SchedulerOptions,
}

impl Display for ArgKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArgKind::AppArgs => "application argument",
            ArgKind::ContainerArgs => "container argument",
            ArgKind::SchedulerOptions => "scheduler option",
        };
        f.write_str(name)
    }
}

/// A single command-line argument.
///
/// Request entries without a name are anonymous, they are always appended to the resolved list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArgSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form JSON object, stored as text.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "notes::deserialize_notes"
    )]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<bool>,
}

impl ArgSpec {
    pub fn named(name: &str, value: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    pub fn anonymous(value: &str) -> Self {
        Self {
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    /// Reference to a named argument without a value.
    pub fn reference(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_include(mut self, include: bool) -> Self {
        self.include = Some(include);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    fn has_value(&self) -> bool {
        self.value.as_deref().is_some_and(|value| !value.trim().is_empty())
    }
}

/// Argument defined by an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppArgSpec {
    #[serde(rename = "inputMode")]
    pub mode: InputMode,
    #[serde(flatten)]
    pub arg: ArgSpec,
}

impl AppArgSpec {
    pub fn new(mode: InputMode, arg: ArgSpec) -> Self {
        Self { mode, arg }
    }
}

/// Entry point of parameter resolution, parametrized by the runtime configuration.
pub struct ParameterResolver<'a> {
    config: &'a ResolverConfig,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(config: &'a ResolverConfig) -> Self {
        Self { config }
    }

    /// Merges application arguments into the request argument list.
    /// On success, `request` contains the resolved list.
    pub fn merge_arg_spec_list(
        &self,
        request: &mut Vec<ArgSpec>,
        app: &[AppArgSpec],
        kind: ArgKind,
    ) -> ResolveResult<()> {
        *request = resolve_arg_specs(request, app, kind)?;
        Ok(())
    }

    /// Merges application and system environment variables into the request variables.
    /// On success, `request` contains the resolved list.
    pub fn merge_env_variables(
        &self,
        request: &mut Vec<EnvVar>,
        app: Option<&[EnvVarDefinition]>,
        system: Option<&[EnvVarDefinition]>,
    ) -> ResolveResult<()> {
        *request = resolve_env_variables(
            self.config,
            request,
            app.unwrap_or_default(),
            system.unwrap_or_default(),
        )?;
        Ok(())
    }
}

/// Descriptions of lower layers are kept, the description of the higher layer is appended.
fn concat_description(base: Option<&str>, addition: Option<&str>) -> Option<String> {
    let addition = addition.filter(|text| !text.trim().is_empty());
    match (base, addition) {
        (Some(base), Some(addition)) if !base.trim().is_empty() => {
            Some(format!("{base}\n\n{addition}"))
        }
        (_, Some(addition)) => Some(addition.to_string()),
        (base, None) => base.map(|base| base.to_string()),
    }
}
