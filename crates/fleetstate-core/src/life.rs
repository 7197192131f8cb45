//! The three-state lifecycle shared by services, units and relations.
//!
//! ```text
//!   ┌───────┐      ┌───────┐      ┌──────┐
//!   │ Alive │─────▶│ Dying │─────▶│ Dead │
//!   └───────┘      └───────┘      └──────┘
//!       │                             ▲
//!       └─────────────────────────────┘
//! ```
//!
//! Transitions only move forward. Dead is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a store-backed entity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Life {
    /// The entity is in use and may gain dependents.
    #[default]
    Alive,
    /// The entity is being torn down and accepts no new dependents.
    Dying,
    /// The entity is finished and waiting to be removed.
    Dead,
}

impl Life {
    /// Return the stored representation of this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Dying => "dying",
            Self::Dead => "dead",
        }
    }

    /// Check if moving from `self` to `to` respects forward-only ordering.
    ///
    /// Staying in the same state is allowed; it is how idempotent operations
    /// report success.
    #[must_use]
    pub const fn can_become(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Alive, _) | (Self::Dying, Self::Dying | Self::Dead) | (Self::Dead, Self::Dead)
        )
    }

    /// Returns true for `Alive`.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Alive)
    }

    /// Returns true for `Dead`.
    #[must_use]
    pub const fn is_dead(self) -> bool {
        matches!(self, Self::Dead)
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
