//! Core types and utilities for fleetstate.
//!
//! This crate provides the foundational types used throughout fleetstate:
//!
//! - **Names**: validated service, unit and charm names
//! - **Life**: the forward-only Alive → Dying → Dead lifecycle
//! - **Charm metadata**: relation declarations and the subordinate flag
//!
//! # Example
//!
//! ```
//! use fleetstate_core::{Life, ServiceName, UnitName};
//!
//! let svc = ServiceName::new("wordpress").unwrap();
//! let unit = svc.unit(0);
//! assert_eq!(unit, UnitName::new("wordpress/0").unwrap());
//! assert!(Life::Alive.can_become(Life::Dying));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod charm;
pub mod ids;
pub mod life;

pub use charm::{CharmMeta, CharmRelation, RelationRole, RelationScope};
pub use ids::{is_service_name, is_unit_name, CharmSchema, CharmUrl, IdError, ServiceName, UnitName};
pub use life::Life;
