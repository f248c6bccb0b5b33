//! Shared type definitions for the Quartermaster scheduling engine.
//!
//! This crate is the single source of truth for the data that flows
//! between the perception layer, the scheduler, the ledger, and the
//! actuation layer.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers (command request identifiers)
//! - [`enums`] -- Currencies, operating modes, overflow levels, roles
//! - [`structs`] -- Costs, facility types, commands and outcomes
//! - [`snapshot`] -- The read-only [`WorldSnapshot`] produced once per tick

pub mod enums;
pub mod ids;
pub mod snapshot;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Currency, DrainClass, OperatingMode, OverflowLevel, Placement, SubsystemRole};
pub use ids::RequestId;
pub use snapshot::{Balances, WorldSnapshot};
pub use structs::{
    Command, CommandOutcome, CommandPayload, FacilityType, OutcomeStatus, ResourceCost,
};

/// A discrete scheduling step. Monotonically increasing for the lifetime
/// of a run.
pub type Tick = u64;
