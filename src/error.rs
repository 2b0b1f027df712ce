//! Error types for the VWA operator
//!
//! Errors carry enough context to decide the requeue strategy: the
//! `error_policy` of each controller calls [`Error::is_retryable`] to choose
//! between a backoff requeue and awaiting a spec change.

use thiserror::Error;

/// Main error type for VWA operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.allowedUpdateWindows[0].startTime")
        field: Option<String>,
    },

    /// Another VWA in the namespace already references the same VPA
    #[error("VPA '{vpa}' is already referenced by VWA '{other}'")]
    DuplicateVpaReference {
        /// Name of the contested VPA
        vpa: String,
        /// Name of the other VWA holding the reference
        other: String,
    },

    /// The VPA targets a kind this controller cannot mutate
    #[error("unsupported target resource kind: {kind}")]
    UnsupportedTargetKind {
        /// The kind from the VPA's targetRef
        kind: String,
    },

    /// A reconcile pass exceeded its deadline
    #[error("reconcile deadline of {timeout_secs}s exceeded")]
    Timeout {
        /// Configured deadline in seconds
        timeout_secs: u64,
    },

    /// A reconcile pass panicked; the key is requeued with backoff
    #[error("reconcile panicked: {message}")]
    Panic {
        /// The panic payload, when it carried one
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a duplicate VPA reference error
    pub fn duplicate_vpa_reference(vpa: impl Into<String>, other: impl Into<String>) -> Self {
        Self::DuplicateVpaReference {
            vpa: vpa.into(),
            other: other.into(),
        }
    }

    /// Create an unsupported target kind error
    pub fn unsupported_target_kind(kind: impl Into<String>) -> Self {
        Self::UnsupportedTargetKind { kind: kind.into() }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration errors (duplicate reference, unsupported kind) are
    /// retryable because the user may fix the cluster state without touching
    /// the VWA spec. Validation and serialization errors require a spec
    /// change. Kubernetes errors depend on the status code; write conflicts
    /// (409) are transient by definition.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) => false,
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::DuplicateVpaReference { .. } => true,
            Error::UnsupportedTargetKind { .. } => true,
            Error::Timeout { .. } => true,
            Error::Panic { .. } => true,
            Error::Serialization { .. } => false,
        }
    }
}
