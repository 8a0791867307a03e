use std::borrow::Cow;

/// Sequences that could change the meaning of a generated shell command line.
const SHELL_HAZARDS: &[&str] = &[";", "&", "|", "`", "<", ">", "$("];

/// Returns the first disallowed sequence found in `text`, in a printable form.
pub(crate) fn find_dangerous_sequence(text: &str) -> Option<String> {
    if let Some(c) = text.chars().find(|c| c.is_control()) {
        return Some(c.escape_default().to_string());
    }
    SHELL_HAZARDS
        .iter()
        .find(|hazard| text.contains(*hazard))
        .map(|hazard| hazard.to_string())
}

/// Replaces control characters with their escaped form (e.g. a newline becomes `\n`).
pub(crate) fn escape_control_chars(value: &str) -> Cow<'_, str> {
    if !value.chars().any(|c| c.is_control()) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if c.is_control() {
            escaped.extend(c.escape_default());
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}
