use serde::{Deserialize, Deserializer};

/// Canonical form of absent notes.
pub(crate) const EMPTY_NOTES: &str = "{}";

fn is_empty_notes(notes: Option<&str>) -> bool {
    match notes {
        None => true,
        Some(notes) => {
            let notes = notes.trim();
            notes.is_empty() || notes == EMPTY_NOTES
        }
    }
}

/// Null, empty and `{}` notes are equivalent, anything else has to match byte by byte.
pub(crate) fn notes_equivalent(a: Option<&str>, b: Option<&str>) -> bool {
    (is_empty_notes(a) && is_empty_notes(b)) || a == b
}

/// Normalizes notes into compact JSON text with sorted keys.
pub(crate) fn canonicalize_notes(notes: Option<&str>) -> Result<String, String> {
    if is_empty_notes(notes) {
        return Ok(EMPTY_NOTES.to_string());
    }
    let notes = notes.unwrap_or(EMPTY_NOTES);
    let value: serde_json::Value =
        serde_json::from_str(notes).map_err(|error| error.to_string())?;
    if !value.is_object() {
        return Err(format!("found `{notes}`"));
    }
    serde_json::to_string(&value).map_err(|error| error.to_string())
}

/// Notes can be written either as a JSON object or as a string containing JSON text.
pub(crate) fn deserialize_notes<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(value) => Some(value.to_string()),
    })
}
