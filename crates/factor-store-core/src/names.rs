//! Validation of table and factor names before they become path components.

use crate::error::{InvalidNameSnafu, StoreError};

/// Reject names that cannot safely map to a single storage path component.
///
/// Identifier strings are exempt: they live inside chunk payloads and never
/// touch the filesystem.
pub(crate) fn validate_component_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is a reserved path component")
    } else if name.starts_with('_') {
        Some("names starting with '_' are reserved for metadata")
    } else if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0')
    {
        Some("name contains a path separator or NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => InvalidNameSnafu { name, reason }.fail(),
        None => Ok(()),
    }
}
