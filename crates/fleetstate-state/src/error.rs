//! Error types for the state layer.
//!
//! Transient conflicts are resolved inside the entity operations; what
//! reaches callers is either a domain rule violation, a missing entity, or an
//! abort whose cause could not be attributed.

use fleetstate_core::IdError;
use fleetstate_store::StoreError;
use thiserror::Error;

/// A result type using `StateError`.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur in state operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The entity is no longer in the store.
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Entity kind, e.g. "service".
        kind: &'static str,
        /// Entity identity.
        name: String,
    },

    /// The operation requires the entity to be Alive.
    #[error("{kind} {name:?} is not alive")]
    NotAlive {
        /// Entity kind.
        kind: &'static str,
        /// Entity identity.
        name: String,
    },

    /// The operation requires the entity to be Dead.
    #[error("{kind} {name:?} is not dead")]
    NotDead {
        /// Entity kind.
        kind: &'static str,
        /// Entity identity.
        name: String,
    },

    /// The entity cannot become Dead while others depend on it.
    #[error("{kind} {name:?} {reason}")]
    HasDependents {
        /// Entity kind.
        kind: &'static str,
        /// Entity identity.
        name: String,
        /// What still depends on the entity.
        reason: &'static str,
    },

    /// A reference between entities is not allowed.
    #[error("{0}")]
    InvalidReference(String),

    /// The entity being created already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A transaction aborted for no cause that could be found.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// The retry policy ran out before the transaction could commit.
    #[error("state changing too quickly; gave up after {attempts} attempts")]
    ExcessiveContention {
        /// How many attempts were made.
        attempts: u32,
    },

    /// A name failed validation.
    #[error(transparent)]
    InvalidName(#[from] IdError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// An error annotated with the operation and entity it came from.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted.
        context: String,
        /// The underlying error.
        source: Box<StateError>,
    },
}

impl StateError {
    /// Wrap this error with a description of the failed operation.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Return the innermost error, skipping context wrappers.
    #[must_use]
    pub fn cause(&self) -> &Self {
        let mut err = self;
        while let Self::Context { source, .. } = err {
            err = source;
        }
        err
    }

    /// Returns true if the entity was not found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.cause(), Self::NotFound { .. })
    }

    /// Returns true if an entity was required to be Alive and was not.
    #[must_use]
    pub fn is_not_alive(&self) -> bool {
        matches!(self.cause(), Self::NotAlive { .. })
    }

    /// Returns true if the operation was refused because of dependents.
    #[must_use]
    pub fn is_has_dependents(&self) -> bool {
        matches!(self.cause(), Self::HasDependents { .. })
    }

    /// Returns true if an abort could not be explained.
    #[must_use]
    pub fn is_inconsistent_state(&self) -> bool {
        matches!(self.cause(), Self::InconsistentState(_))
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self.cause() {
            Self::NotFound { .. } => 404,
            Self::NotAlive { .. }
            | Self::NotDead { .. }
            | Self::HasDependents { .. }
            | Self::AlreadyExists(_) => 409,
            Self::InvalidReference(_) | Self::InvalidName(_) => 400,
            Self::ExcessiveContention { .. } => 503,
            Self::InconsistentState(_) | Self::Store(_) | Self::Context { .. } => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.cause(),
            Self::ExcessiveContention { .. } | Self::Store(StoreError::Database(_))
        )
    }
}

/// Attach context to the error side of a result.
pub(crate) trait ResultExt<T> {
    /// Wrap any error with the context produced by `f`.
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<StateError>> ResultExt<T> for std::result::Result<T, E> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().context(f()))
    }
}

/// Translate a store error, replacing the abort signal with `on_abort`.
pub(crate) fn on_abort(err: StoreError, on_abort: StateError) -> StateError {
    match err {
        StoreError::Aborted => on_abort,
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_alive() -> StateError {
        StateError::NotAlive {
            kind: "service",
            name: "wordpress".to_string(),
        }
    }

    #[test]
    fn context_chain() {
        let err = not_alive()
            .context("cannot add unit to service \"wordpress\"")
            .context("deploy failed");

        assert_eq!(
            err.to_string(),
            "deploy failed: cannot add unit to service \"wordpress\": service \"wordpress\" is not alive"
        );
        assert!(err.is_not_alive());
        assert!(!err.is_not_found());
        assert_eq!(err.http_status_code(), 409);
    }

    #[test]
    fn result_context() {
        let result: std::result::Result<(), StoreError> = Err(StoreError::NotFound);
        let err = result.context(|| "cannot refresh".to_string()).unwrap_err();
        assert!(matches!(err.cause(), StateError::Store(StoreError::NotFound)));
        assert_eq!(err.http_status_code(), 500);
    }

    #[test]
    fn abort_translation() {
        let err = on_abort(StoreError::Aborted, not_alive());
        assert!(err.is_not_alive());

        let err = on_abort(StoreError::Database("disk".to_string()), not_alive());
        assert!(err.is_retriable());
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(
            StateError::NotFound {
                kind: "unit",
                name: "wordpress/0".to_string()
            }
            .http_status_code(),
            404
        );
        assert_eq!(
            StateError::InvalidReference("service is subordinate".to_string()).http_status_code(),
            400
        );
        assert_eq!(
            StateError::ExcessiveContention { attempts: 3 }.http_status_code(),
            503
        );
        assert_eq!(
            StateError::InconsistentState("unit remains".to_string()).http_status_code(),
            500
        );
    }
}
