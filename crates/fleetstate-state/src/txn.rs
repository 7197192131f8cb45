//! Transaction runner.
//!
//! Every state change goes through [`Runner::run`]: the caller supplies a
//! closure that inspects current state and returns the batch to submit. When
//! the store aborts the batch, the closure is called again with the next
//! attempt number so it can refresh and rebuild.

use std::sync::Arc;

use fleetstate_store::{Op, Store, StoreError};
use uuid::Uuid;

use crate::error::{Result, StateError};
use crate::types::RetryPolicy;

/// What a transaction builder wants the runner to do next.
#[derive(Debug)]
pub enum Step {
    /// Submit these operations.
    Apply(Vec<Op>),
    /// Nothing to do; the desired state already holds.
    Done,
    /// Cached state was found stale; call the builder again.
    Retry,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A batch was committed.
    Committed,
    /// The builder reported nothing to do.
    Unchanged,
}

/// Submits operation batches to the store under a retry policy.
#[derive(Clone)]
pub struct Runner {
    store: Arc<dyn Store>,
    policy: RetryPolicy,
}

impl Runner {
    /// Create a runner over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// The retry policy in force.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit one batch.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Aborted` if any assertion failed; the caller is
    /// responsible for explaining the abort.
    pub fn apply(&self, ops: &[Op]) -> std::result::Result<(), StoreError> {
        let token = Uuid::new_v4();
        tracing::debug!(txn = %token, ops = ops.len(), "Submitting transaction");
        let result = self.store.apply(ops);
        match &result {
            Ok(()) => tracing::debug!(txn = %token, "Transaction committed"),
            Err(StoreError::Aborted) => tracing::debug!(txn = %token, "Transaction aborted"),
            Err(e) => tracing::warn!(txn = %token, error = %e, "Transaction failed"),
        }
        result
    }

    /// Run a transaction, rebuilding it after every abort.
    ///
    /// `build` receives the zero-based attempt number. On attempts after the
    /// first it should refresh whatever it read before deciding.
    ///
    /// # Errors
    ///
    /// Returns any error `build` returns, any store error other than an
    /// abort, or `StateError::ExcessiveContention` when the policy runs out.
    pub fn run<F>(&self, mut build: F) -> Result<Outcome>
    where
        F: FnMut(u32) -> Result<Step>,
    {
        let mut attempt = 0u32;
        loop {
            if !self.policy.allows(attempt) {
                tracing::warn!(attempts = attempt, "Giving up on contended transaction");
                return Err(StateError::ExcessiveContention { attempts: attempt });
            }
            let delay = self.policy.backoff(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            match build(attempt)? {
                Step::Done => return Ok(Outcome::Unchanged),
                Step::Retry => {
                    tracing::debug!(attempt, "Cached state stale, rebuilding transaction");
                }
                Step::Apply(ops) if ops.is_empty() => return Ok(Outcome::Unchanged),
                Step::Apply(ops) => match self.apply(&ops) {
                    Ok(()) => return Ok(Outcome::Committed),
                    Err(StoreError::Aborted) => {
                        tracing::debug!(attempt, "Transaction aborted, retrying");
                    }
                    Err(e) => return Err(e.into()),
                },
            }
            attempt = attempt.saturating_add(1);
        }
    }
}
