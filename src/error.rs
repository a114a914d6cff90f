//! Error types for the container runtime

use crate::key::Key;
use thiserror::Error;

/// Errors that can occur while registering, binding, or resolving.
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No provider could serve the requested key
    #[error("{}", unresolved_message(.key, .suggestions))]
    Unresolved {
        key: Key,
        /// Registered keys with a similar display name, for diagnostics
        suggestions: Vec<Key>,
    },

    /// An alias chain revisited a key while binding
    #[error("alias cycle detected: {}", join_keys(.chain))]
    AliasCycle { chain: Vec<Key> },

    /// A factory's dependency graph revisited a key while binding
    #[error("dependency cycle detected: {}", join_keys(.chain))]
    DependencyCycle { chain: Vec<Key> },

    /// Two providers for one key produced an incompatible substitution
    #[error("conflicting providers for {key}: {reason}")]
    BindingConflict { key: Key, reason: String },

    /// The container inclusion graph is not acyclic
    #[error("container inclusion cycle: {}", .chain.join(" -> "))]
    InclusionCycle { chain: Vec<String> },

    /// Injection was attempted with no active context on this thread
    #[error("no active context (enter a scope before resolving)")]
    NoContext,

    /// A synchronous call site met an async binding or async teardown
    #[error("async {what} cannot be driven from a synchronous call site")]
    AsyncFromSync { what: String },

    /// A resolved value did not downcast to the requested type
    #[error("type mismatch for {key}: expected {expected}")]
    TypeMismatch { key: Key, expected: &'static str },

    /// The key is on the never-injectable blacklist
    #[error("key {key} is not injectable")]
    NotInjectable { key: Key },

    /// Registration was attempted against a sealed container
    #[error("container '{container}' is sealed; scopes are open against it")]
    ConcurrentMutation { container: String },

    /// A blueprint's declared signature and partial arguments disagree
    #[error("invalid blueprint '{name}': {reason}")]
    InvalidBlueprint { name: String, reason: String },

    /// A callable received a missing or mistyped call argument
    #[error("bad call argument {what}: {reason}")]
    BadArgument { what: String, reason: String },

    /// A factory callable reported a failure
    #[error("factory for {key} failed: {reason}")]
    CreationFailed { key: Key, reason: String },

    /// One or more exit-stack callbacks failed while unwinding
    #[error(
        "teardown failed with {} error(s), first: {}",
        .failures.len(),
        .failures.first().map(|e| e.to_string()).unwrap_or_default()
    )]
    TeardownFailure {
        /// Every failure observed during the unwind, in teardown order
        failures: Vec<DiError>,
        /// The error that was already propagating when the unwind began
        source: Option<Box<DiError>>,
    },
}

impl DiError {
    /// Create an `Unresolved` error without suggestions.
    #[inline]
    pub fn unresolved(key: Key) -> Self {
        Self::Unresolved {
            key,
            suggestions: Vec::new(),
        }
    }

    /// Create a `CreationFailed` error for a key.
    #[inline]
    pub fn creation_failed(key: Key, reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            key,
            reason: reason.into(),
        }
    }

    /// Create a `TypeMismatch` error for the requested type `T`.
    #[inline]
    pub fn type_mismatch<T: ?Sized>(key: Key) -> Self {
        Self::TypeMismatch {
            key,
            expected: std::any::type_name::<T>(),
        }
    }

    /// The key this error is about, when there is one.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Unresolved { key, .. }
            | Self::BindingConflict { key, .. }
            | Self::TypeMismatch { key, .. }
            | Self::NotInjectable { key }
            | Self::CreationFailed { key, .. } => Some(key),
            _ => None,
        }
    }
}

fn unresolved_message(key: &Key, suggestions: &[Key]) -> String {
    if suggestions.is_empty() {
        format!("no provider for {key}")
    } else {
        format!(
            "no provider for {key} (similar keys: {})",
            join_keys(suggestions)
        )
    }
}

fn join_keys(keys: &[Key]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_lists_suggestions() {
        let err = DiError::Unresolved {
            key: Key::token("db"),
            suggestions: vec![Key::token("db-primary"), Key::token("db-replica")],
        };
        let msg = err.to_string();
        assert!(msg.contains("db"));
        assert!(msg.contains("db-primary"));
        assert!(msg.contains("db-replica"));
    }

    #[test]
    fn teardown_reports_first_failure() {
        let err = DiError::TeardownFailure {
            failures: vec![DiError::NoContext, DiError::unresolved(Key::token("x"))],
            source: None,
        };
        assert!(err.to_string().contains("2 error(s)"));
        assert!(err.to_string().contains("no active context"));
    }

    #[test]
    fn key_accessor() {
        let key = Key::token("svc");
        assert_eq!(DiError::unresolved(key.clone()).key(), Some(&key));
        assert_eq!(DiError::NoContext.key(), None);
    }
}
