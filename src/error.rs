//! Error types.
//!
//! Navigational misses (nothing to go back to, target not on the stack) are not errors; they are
//! reported as `false` so callers can chain delegation. Everything here indicates either a
//! programming mistake or a broken saved state.

use crate::id::EntryId;
use thiserror::Error;

/// Configuration and misuse errors.
///
/// None of these are transient; retrying the same call will fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavError {
    /// Two declared destinations share a name.
    #[error("duplicate destination name `{name}`")]
    DuplicateDestination { name: String },

    /// The destination has not been declared for the controller.
    #[error("unknown destination `{name}` for controller {}", describe_key(.controller))]
    UnknownDestination {
        name: String,
        controller: Option<String>,
    },

    /// The entry already belongs to a controller.
    #[error("entry {entry} (`{destination}`) is already attached to a nav controller")]
    AlreadyAttached { entry: EntryId, destination: String },

    /// A route step could not be resolved.
    #[error("cannot resolve route step `{step}` in controller {}", describe_key(.controller))]
    UnresolvedRoute {
        controller: Option<String>,
        step: String,
    },

    /// A view model was requested with a type other than the one stored under its key.
    #[error("view model `{key}` is not a `{expected}`")]
    ViewModelTypeMismatch { key: String, expected: &'static str },

    /// The controller has been closed.
    #[error("controller {} is closed", describe_key(.controller))]
    Closed { controller: Option<String> },

    #[error("back stack index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Errors raised while saving a controller tree.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The payload was created with [`Payload::transient`](crate::Payload::transient).
    #[error("{field} of `{destination}` in controller {} cannot be saved: `{type_name}` is transient", describe_key(.controller))]
    Unsaveable {
        field: &'static str,
        destination: String,
        controller: Option<String>,
        type_name: &'static str,
    },

    /// The payload's serializer failed.
    #[error("failed to encode {field} of `{destination}` in controller {}", describe_key(.controller))]
    Encode {
        field: &'static str,
        destination: String,
        controller: Option<String>,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while restoring a controller tree.
///
/// A restore either succeeds completely or fails; hosts should fall back to a fresh controller.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("missing key `{key}` at `{path}`")]
    MissingKey { key: String, path: String },

    #[error("key `{key}` at `{path}` should be {expected}, found {found}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
        path: String,
    },

    #[error("invalid entry uuid `{value}` at `{path}`")]
    InvalidUuid {
        value: String,
        path: String,
        #[source]
        source: uuid::Error,
    },

    #[error("failed to decode saved state")]
    Decode {
        #[source]
        source: serde_json::Error,
    },
}

fn describe_key(key: &Option<String>) -> String {
    match key {
        Some(key) => format!("`{}`", key),
        None => "<unkeyed>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_controller() {
        let err = NavError::UnknownDestination {
            name: "settings".into(),
            controller: Some("root".into()),
        };
        assert_eq!(err.to_string(), "unknown destination `settings` for controller `root`");

        let err = NavError::Closed { controller: None };
        assert_eq!(err.to_string(), "controller <unkeyed> is closed");
    }
}
