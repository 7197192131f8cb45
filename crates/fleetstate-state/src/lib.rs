//! Transactional lifecycle engine for services, units and relations.
//!
//! Every entity moves through the lifecycle `Alive → Dying → Dead` and is
//! only removed once Dead. Each change is a batch of assert-then-apply
//! operations against the document store: preconditions are stated as
//! assertions, the batch commits atomically, and when another writer got
//! there first the batch aborts and is rebuilt from fresh state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  fleetstated (HTTP, axum)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           State                             │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Service    │ │    Unit     │ │     Relation        │    │
//! │  │  Settings   │ │   Charm     │ │     Lifecycle       │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌───────────────────┐
//!                    │  Runner (retry)   │
//!                    └───────────────────┘
//!                              │
//!                              ▼
//!                    ┌───────────────────┐
//!                    │ Store (RocksDB)   │
//!                    └───────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetstate_state::{CharmMeta, CharmRelation, CharmUrl, NewUnit, State};
//! use fleetstate_store::RocksStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/fleetstate")?);
//! let state = State::with_defaults(store);
//!
//! let meta = CharmMeta::new("wordpress").requires("db", CharmRelation::global("mysql"));
//! let charm = state.add_charm(CharmUrl::parse("cs:precise/wordpress-3")?, meta)?;
//! let mut wordpress = state.add_service("wordpress", &charm)?;
//!
//! let unit = wordpress.add_unit(NewUnit::Principal)?;
//! println!("Added unit: {}", unit.name());
//!
//! wordpress.ensure_dying()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! - `ensure_dying` moves an Alive entity to Dying; a Dying service also
//!   takes its Alive relations to Dying in the same transaction.
//! - `ensure_dead` moves an entity to Dead once it has no dependents: a
//!   service needs zero units and relations, a unit zero subordinates.
//! - Removal requires Dead and releases the references the entity held.
//!
//! See the [`txn`] module for the retry loop every multi-step operation
//! is built on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod charm;
mod docs;
pub mod error;
mod lifecycle;
pub mod relation;
pub mod service;
pub mod settings;
pub mod state;
#[cfg(test)]
mod testing;
pub mod txn;
pub mod types;
pub mod unit;

pub use charm::Charm;
pub use error::{Result, StateError};
pub use relation::{relation_key, Endpoint, Relation};
pub use service::{NewUnit, Service, IMPLICIT_RELATION};
pub use settings::{ItemChange, Settings};
pub use state::State;
pub use txn::{Outcome, Runner, Step};
pub use types::{RetryPolicy, StateConfig};
pub use unit::{Unit, UnitStatus};

// Re-export commonly used types from dependencies for convenience
pub use fleetstate_core::{
    CharmMeta, CharmRelation, CharmUrl, Life, RelationRole, RelationScope, ServiceName, UnitName,
};
