use serde::{Deserialize, Serialize};

use crate::Set;
use crate::common::config::ResolverConfig;
use crate::resolve::error::{ENV_APP_LAYER, ENV_REQUEST_LAYER, ENV_SYSTEM_LAYER};
use crate::resolve::notes::{canonicalize_notes, notes_equivalent};
use crate::resolve::sanitize::escape_control_chars;
use crate::resolve::{InputMode, ResolveError, ResolveResult, concat_description};

/// Value of an environment variable.
///
/// `Unset` means that no layer has provided a value yet, which is different from an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum EnvValue {
    Concrete(String),
    #[default]
    Unset,
}

impl EnvValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, EnvValue::Unset)
    }

    pub fn as_concrete(&self) -> Option<&str> {
        match self {
            EnvValue::Concrete(value) => Some(value),
            EnvValue::Unset => None,
        }
    }
}

impl From<Option<String>> for EnvValue {
    fn from(value: Option<String>) -> Self {
        value.map(EnvValue::Concrete).unwrap_or_default()
    }
}

impl From<EnvValue> for Option<String> {
    fn from(value: EnvValue) -> Self {
        match value {
            EnvValue::Concrete(value) => Some(value),
            EnvValue::Unset => None,
        }
    }
}

impl From<&str> for EnvValue {
    fn from(value: &str) -> Self {
        EnvValue::Concrete(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvVar {
    pub key: String,
    #[serde(skip_serializing_if = "EnvValue::is_unset")]
    pub value: EnvValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::resolve::notes::deserialize_notes"
    )]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<bool>,
}

impl EnvVar {
    pub fn new(key: &str, value: impl Into<EnvValue>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn unset(key: &str) -> Self {
        Self::new(key, EnvValue::Unset)
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
}

/// Environment variable defined by an application or by an execution system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarDefinition {
    #[serde(rename = "inputMode")]
    pub mode: InputMode,
    #[serde(flatten)]
    pub var: EnvVar,
}

impl EnvVarDefinition {
    pub fn new(mode: InputMode, var: EnvVar) -> Self {
        Self { mode, var }
    }
}

/// Merges system, application and request environment variables into the resolved list.
///
/// Precedence is system < application < request. A system REQUIRED variable promotes an
/// application variable that is only conditionally included to REQUIRED.
pub fn resolve_env_variables(
    config: &ResolverConfig,
    request: &[EnvVar],
    app: &[EnvVarDefinition],
    system: &[EnvVarDefinition],
) -> ResolveResult<Vec<EnvVar>> {
    let prefix = config.reserved_env_prefix.as_str();
    validate_names(request.iter(), prefix, ENV_REQUEST_LAYER)?;

    let mut resolved: Vec<EnvVar> = request
        .iter()
        .map(|var| EnvVar {
            include: Some(var.include.unwrap_or(true)),
            ..var.clone()
        })
        .collect();
    if app.is_empty() && system.is_empty() {
        return finalize(resolved);
    }

    validate_names(system.iter().map(|def| &def.var), prefix, ENV_SYSTEM_LAYER)?;
    validate_definitions(system, ENV_SYSTEM_LAYER)?;
    validate_names(app.iter().map(|def| &def.var), prefix, ENV_APP_LAYER)?;
    validate_definitions(app, ENV_APP_LAYER)?;

    let mut survivors: Vec<LayeredDefinition> = merge_sys_into_app(app, system)?
        .into_iter()
        .filter(|entry| {
            let key = &entry.definition.var.key;
            is_included(
                &entry.definition,
                resolved.iter().find(|var| &var.key == key),
            )
        })
        .collect();

    for var in resolved.iter_mut() {
        let Some(index) = survivors
            .iter()
            .position(|entry| entry.definition.var.key == var.key)
        else {
            continue;
        };
        let LayeredDefinition { definition, layer } = survivors.remove(index);
        if definition.mode == InputMode::Fixed {
            check_fixed_override(&definition.var, var, ENV_REQUEST_LAYER, layer)?;
        }
        if matches!(definition.mode, InputMode::Required | InputMode::Fixed)
            && var.include == Some(false)
        {
            log::warn!(
                "Ignoring exclusion of {} environment variable '{}', it is always included",
                definition.mode,
                var.key
            );
            var.include = Some(true);
        }
        fill_from(var, definition.var);
    }

    resolved.extend(survivors.into_iter().map(|entry| EnvVar {
        include: Some(true),
        ..entry.definition.var
    }));
    finalize(resolved)
}

fn is_valid_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_names<'a, I: Iterator<Item = &'a EnvVar>>(
    vars: I,
    prefix: &str,
    layer: &'static str,
) -> ResolveResult<()> {
    let mut keys = Set::default();
    for var in vars {
        let key = var.key.as_str();
        if !prefix.is_empty() && key.starts_with(prefix) {
            return Err(ResolveError::ReservedEnvName {
                layer,
                key: key.to_string(),
                prefix: prefix.to_string(),
            });
        }
        if !is_valid_env_name(key) {
            return Err(ResolveError::InvalidEnvName {
                layer,
                key: key.to_string(),
            });
        }
        if !keys.insert(key) {
            return Err(ResolveError::DuplicateEnvName {
                layer,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_definitions(definitions: &[EnvVarDefinition], layer: &'static str) -> ResolveResult<()> {
    for def in definitions {
        match def.mode {
            InputMode::Fixed if def.var.value.is_unset() => {
                return Err(ResolveError::FixedEnvUnset {
                    layer,
                    key: def.var.key.clone(),
                });
            }
            InputMode::Required if !def.var.value.is_unset() => {
                return Err(ResolveError::RequiredEnvHasValue {
                    layer,
                    key: def.var.key.clone(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

/// Only the description of a FIXED variable may be changed by a higher layer.
fn check_fixed_override(
    fixed: &EnvVar,
    var: &EnvVar,
    layer: &'static str,
    base_layer: &'static str,
) -> ResolveResult<()> {
    let value_changed = !var.value.is_unset() && var.value != fixed.value;
    let notes_changed =
        var.notes.is_some() && !notes_equivalent(fixed.notes.as_deref(), var.notes.as_deref());
    if value_changed || notes_changed {
        return Err(ResolveError::FixedEnvOverride {
            key: var.key.clone(),
            layer,
            base_layer,
        });
    }
    Ok(())
}

/// Fills the unset parts of `var` from a lower layer.
fn fill_from(var: &mut EnvVar, lower: EnvVar) {
    if var.value.is_unset() {
        var.value = lower.value;
    }
    if var.notes.is_none() {
        var.notes = lower.notes;
    }
    var.description = concat_description(lower.description.as_deref(), var.description.as_deref());
}

/// Definition together with the layer that defined it.
struct LayeredDefinition {
    definition: EnvVarDefinition,
    layer: &'static str,
}

/// Produces a single working list of application and system variables without duplicate keys.
fn merge_sys_into_app(
    app: &[EnvVarDefinition],
    system: &[EnvVarDefinition],
) -> ResolveResult<Vec<LayeredDefinition>> {
    let mut merged = Vec::with_capacity(app.len() + system.len());
    for def in app {
        let mut def = def.clone();
        if let Some(sys) = system.iter().find(|sys| sys.var.key == def.var.key) {
            match sys.mode {
                InputMode::Fixed => {
                    check_fixed_override(&sys.var, &def.var, ENV_APP_LAYER, ENV_SYSTEM_LAYER)?;
                    def.mode = InputMode::Fixed;
                }
                InputMode::Required if def.mode.is_include_mode() => {
                    log::debug!(
                        "Environment variable '{}' is promoted to REQUIRED by the system definition",
                        def.var.key
                    );
                    def.mode = InputMode::Required;
                    def.var.value = EnvValue::Unset;
                }
                _ => {}
            }
            if def.mode == InputMode::Required {
                // A REQUIRED variable stays a placeholder for the request
                def.var.description = concat_description(
                    sys.var.description.as_deref(),
                    def.var.description.as_deref(),
                );
                if def.var.notes.is_none() {
                    def.var.notes.clone_from(&sys.var.notes);
                }
            } else {
                fill_from(&mut def.var, sys.var.clone());
            }
        }
        merged.push(LayeredDefinition {
            definition: def,
            layer: ENV_APP_LAYER,
        });
    }
    merged.extend(
        system
            .iter()
            .filter(|sys| !app.iter().any(|def| def.var.key == sys.var.key))
            .map(|sys| LayeredDefinition {
                definition: sys.clone(),
                layer: ENV_SYSTEM_LAYER,
            }),
    );
    Ok(merged)
}

fn is_included(def: &EnvVarDefinition, request: Option<&EnvVar>) -> bool {
    match def.mode {
        InputMode::Required | InputMode::Fixed => true,
        InputMode::IncludeByDefault => match request {
            Some(var) => var.include != Some(false),
            None => {
                if def.var.value.is_unset() {
                    log::debug!(
                        "Skipping environment variable '{}', it has no value and is not referenced",
                        def.var.key
                    );
                    false
                } else {
                    true
                }
            }
        },
        InputMode::IncludeOnDemand => request.is_some_and(|var| var.include != Some(false)),
    }
}

fn finalize(vars: Vec<EnvVar>) -> ResolveResult<Vec<EnvVar>> {
    let mut resolved = Vec::with_capacity(vars.len());
    for mut var in vars {
        if var.include == Some(false) {
            log::debug!("Dropping excluded environment variable '{}'", var.key);
            continue;
        }
        let EnvValue::Concrete(value) = &var.value else {
            return Err(ResolveError::MissingEnvValue { key: var.key });
        };
        let escaped = escape_control_chars(value);
        if escaped != value.as_str() {
            log::warn!(
                "Control characters in the value of environment variable '{}' were escaped",
                var.key
            );
            var.value = EnvValue::Concrete(escaped.into_owned());
        }
        let notes = canonicalize_notes(var.notes.as_deref()).map_err(|reason| {
            ResolveError::InvalidNotes {
                name: var.key.clone(),
                reason,
            }
        })?;
        var.notes = Some(notes);
        var.include = None;
        resolved.push(var);
    }
    Ok(resolved)
}
