//! Resource ledger and build reservations for the Quartermaster engine.
//!
//! This crate owns the only genuinely shared mutable state in the engine:
//! the two currency balances, the production-token pool, and the
//! per-facility construction leases. Every other component reaches them
//! through the atomic operations on [`ResourceLedger`].
//!
//! # Architecture
//!
//! - [`ledger`] -- The [`ResourceLedger`]: check-and-reserve spending,
//!   income credit, token regeneration, and running totals.
//! - [`reservation`] -- The [`BuildReservationTable`]: one live lease per
//!   facility type, with stale-lease expiry.
//!
//! # Invariants
//!
//! - Balances and the token count are never negative after any sequence
//!   of reserve, credit and refund calls.
//! - At most one live [`Lease`] exists per facility type.
//!
//! The ledger never panics; failures are returned as typed errors.
//!
//! # Usage
//!
//! ```
//! use quartermaster_ledger::{LedgerSettings, ResourceLedger};
//! use quartermaster_types::{Balances, ResourceCost};
//! use rust_decimal::Decimal;
//!
//! let settings = LedgerSettings {
//!     starting: Balances::new(Decimal::new(1000, 0), Decimal::ZERO),
//!     starting_tokens: 3,
//!     ..LedgerSettings::default()
//! };
//! let mut ledger = ResourceLedger::new(&settings);
//! let cost = ResourceCost::new(Decimal::new(100, 0), Decimal::ZERO, 1);
//!
//! let accepted = (0..6).filter(|_| ledger.try_reserve(&cost).is_ok()).count();
//! assert_eq!(accepted, 3);
//! assert_eq!(ledger.tokens(), 0);
//! ```

pub mod ledger;
pub mod reservation;

// Re-export primary types at crate root.
pub use ledger::{LedgerSettings, LedgerTotals, ProductionTokenPool, ResourceLedger};
pub use reservation::{BuildReservationTable, Lease};

use rust_decimal::Decimal;

use quartermaster_types::{FacilityType, Tick};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a spending reservation was refused.
///
/// These are the `InsufficientResource` family: recoverable, and retried on
/// a later tick through normal re-evaluation rather than backoff.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReserveError {
    /// Not enough fast currency.
    #[error("insufficient fast currency: requested {requested}, available {available}")]
    InsufficientFast {
        /// Amount requested.
        requested: Decimal,
        /// Balance at the time of the request.
        available: Decimal,
    },

    /// Not enough slow currency.
    #[error("insufficient slow currency: requested {requested}, available {available}")]
    InsufficientSlow {
        /// Amount requested.
        requested: Decimal,
        /// Balance at the time of the request.
        available: Decimal,
    },

    /// Not enough production tokens.
    #[error("insufficient production tokens: requested {requested}, available {available}")]
    InsufficientTokens {
        /// Tokens requested.
        requested: u32,
        /// Tokens in the pool at the time of the request.
        available: u32,
    },

    /// A cost component was negative.
    #[error("resource cost must not be negative")]
    NegativeCost,
}

/// Why a facility lease operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    /// Another holder already has a live lease on the facility type.
    #[error("facility {facility} already reserved by {holder} since tick {acquired_at}")]
    Conflict {
        /// The contested facility type.
        facility: FacilityType,
        /// Name of the current holder.
        holder: String,
        /// Tick the current lease was acquired.
        acquired_at: Tick,
    },

    /// No live lease exists for the facility type.
    #[error("no live reservation for facility {facility}")]
    NotHeld {
        /// The facility type that was expected to be reserved.
        facility: FacilityType,
    },
}

/// Combined failure of an atomic construction reservation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The funds check failed; no lease was taken.
    #[error("{source}")]
    Funds {
        /// The underlying funds error.
        #[from]
        source: ReserveError,
    },

    /// The lease could not be acquired; nothing was debited.
    #[error("{source}")]
    Reservation {
        /// The underlying reservation error.
        #[from]
        source: ReservationError,
    },
}
