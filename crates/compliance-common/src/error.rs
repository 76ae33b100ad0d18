//! Error types for the compliance checker
//!
//! Errors are structured with fields to aid debugging against a live cluster.
//! Each variant carries the resource, dependency or check it concerns so the
//! execution engine can decide at which scope a failure is contained.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for compliance checker operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed manifest or configuration input
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the manifest or configuration entry being validated
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.resources.requests.storage")
        field: Option<String>,
    },

    /// A dependency factory failed
    #[error("failed to resolve dependency {dependency}: {message}")]
    DependencyResolution {
        /// Name of the dependency key
        dependency: String,
        /// Description of what failed
        message: String,
        /// Whether the run cannot continue without this dependency
        foundational: bool,
    },

    /// A cluster resource failed to create or never became ready
    #[error("failed to acquire {kind} {name}: {message}")]
    Acquisition {
        /// Resource kind (StatefulSet, Service, ...)
        kind: String,
        /// Resource name
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Teardown of a spawned resource failed after bounded retries
    #[error("failed to clean up {kind} {name}: {message}")]
    Cleanup {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Unexpected failure inside a check's perform operation
    #[error("check {check} failed unexpectedly: {message}")]
    CheckFault {
        /// Name of the check
        check: String,
        /// Description of what failed
        message: String,
    },

    /// An operation did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// The elapsed bound
        after: Duration,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// The run was cancelled before every check finished
    #[error("interrupted: {reason}")]
    Interrupted {
        /// What interrupted the run
        reason: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "exec", "poll_until")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named manifest or setting
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a dependency resolution error scoped to the checks that need it
    pub fn dependency(dependency: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::DependencyResolution {
            dependency: dependency.into(),
            message: msg.into(),
            foundational: false,
        }
    }

    /// Create a dependency resolution error that aborts the run
    pub fn foundational_dependency(dependency: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::DependencyResolution {
            dependency: dependency.into(),
            message: msg.into(),
            foundational: true,
        }
    }

    /// Create an acquisition error for a cluster resource
    pub fn acquisition(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Acquisition {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a cleanup error for a cluster resource
    pub fn cleanup(kind: impl Into<String>, name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cleanup {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a check fault
    pub fn check_fault(check: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CheckFault {
            check: check.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an interruption error
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::Interrupted {
            reason: reason.into(),
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

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (require input fix).
    /// Kubernetes errors are retried unless the API server answered with a 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::DependencyResolution { .. } => false,
            Error::Acquisition { .. } => true,
            Error::Cleanup { .. } => true,
            Error::CheckFault { .. } => false,
            Error::Timeout { .. } => true,
            Error::Serialization { .. } => false,
            Error::Interrupted { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error means the run cannot meaningfully continue
    pub fn is_foundational(&self) -> bool {
        matches!(
            self,
            Error::DependencyResolution {
                foundational: true,
                ..
            }
        )
    }

    /// Whether this is a 404 from the API server
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}
