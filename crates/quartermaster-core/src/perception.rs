//! The perception interface: where world snapshots come from.

use quartermaster_types::{Tick, WorldSnapshot};

/// Errors that can occur while producing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum PerceptionError {
    /// The engine could not produce a snapshot this tick.
    #[error("snapshot unavailable at tick {tick}: {message}")]
    Unavailable {
        /// The tick that was requested.
        tick: Tick,
        /// Description of the failure.
        message: String,
    },
}

/// A source of world snapshots.
///
/// The tick driver calls [`snapshot`](SnapshotSource::snapshot) once per
/// tick and shares the result with every subsystem. An engine may advance
/// its own simulation to reach `tick`, but asking twice for the same tick
/// must return the same snapshot.
pub trait SnapshotSource {
    /// Produce the snapshot for `tick`.
    ///
    /// # Errors
    ///
    /// Returns [`PerceptionError`] if the engine cannot be observed.
    fn snapshot(&mut self, tick: Tick) -> Result<WorldSnapshot, PerceptionError>;

    /// Whether the external session has ended (no more ticks).
    fn finished(&self) -> bool {
        false
    }
}
