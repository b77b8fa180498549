//! Error types for Tessera
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the resource kind or field path that was being processed
//! alongside the underlying cause.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for object store and resource operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A field path could not be parsed or traversed
    #[error("field path error at {path:?}: {message}")]
    FieldPath {
        /// The offending field path
        path: String,
        /// Description of what's wrong
        message: String,
    },

    /// An object is missing something it must have
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name or kind of the invalid resource
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "store", "publisher")
        context: String,
    },
}

impl Error {
    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a field path error
    pub fn field_path(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::FieldPath {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error without resource context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a named resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the API server reported that the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Whether the API server rejected a write because of a stale resourceVersion
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Check if this error is retryable
    ///
    /// Serialization, field path, and validation errors are not retryable
    /// (they require a template or spec fix). Conflicts are retried by the
    /// outer reconcile loop; other 4xx API errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Serialization { .. } => false,
            Error::FieldPath { .. } => false,
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "boom".to_string(),
                reason: "Boom".to_string(),
                code,
            }),
        }
    }

    /// Story: the association step needs to tell "gone" apart from "broken"
    #[test]
    fn story_not_found_is_distinguished_from_other_api_errors() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!api_error(409).is_not_found());
        assert!(!Error::internal("boom").is_not_found());
    }

    /// Story: the outer reconcile loop retries transient failures only
    #[test]
    fn story_error_retryability() {
        assert!(api_error(500).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(!api_error(422).is_retryable());
        assert!(!api_error(404).is_retryable());

        assert!(!Error::serialization("bad json").is_retryable());
        assert!(!Error::field_path("spec[", "unterminated bracket").is_retryable());
        assert!(!Error::validation("missing label").is_retryable());
        assert!(Error::internal("unexpected").is_retryable());
    }

    #[test]
    fn conflict_detection() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(404).is_conflict());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::serialization_for_kind("Bucket", "missing field 'spec'");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Bucket")),
            _ => panic!("Expected Serialization variant"),
        }

        let err = Error::field_path("spec.tags[x", "unterminated bracket");
        assert!(err.to_string().contains("spec.tags[x"));

        let err = Error::internal_with_context("store", "no api resource");
        assert!(err.to_string().contains("[store]"));

        let err = Error::validation_for("my-xr", "no uid");
        assert!(err.to_string().contains("my-xr"));
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("olala");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
