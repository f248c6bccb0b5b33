//! The decision-module interface.
//!
//! A [`Subsystem`] is a pluggable policy registered once at startup. Each
//! tick the scheduler hands every eligible subsystem a [`TickContext`]:
//! the shared snapshot, the arbiter's mode, the overflow level, and the
//! only spending operations a subsystem may use. Subsystems never touch
//! the ledger's fields or their own scheduling descriptor.

use quartermaster_ledger::{LedgerError, ReserveError, ResourceLedger};
use quartermaster_types::{
    Command, CommandPayload, FacilityType, OperatingMode, OverflowLevel, Placement, RequestId,
    ResourceCost, SubsystemRole, Tick, WorldSnapshot,
};
use tracing::{debug, warn};

use crate::actuation::CommandSink;
use crate::retry::RetryManager;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a construction request was not issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructError {
    /// The facility type failed recently and is backing off.
    #[error("construction of {facility} backing off until tick {retry_at}")]
    Backoff {
        /// The facility type.
        facility: FacilityType,
        /// First tick a retry is allowed.
        retry_at: Tick,
    },

    /// Every alternate site failed; the attempt was abandoned.
    #[error("construction of {facility} abandoned after exhausting alternate sites")]
    Abandoned {
        /// The facility type.
        facility: FacilityType,
    },

    /// The lease or the funds were refused.
    #[error("{source}")]
    Ledger {
        /// The underlying ledger error.
        #[from]
        source: LedgerError,
    },
}

/// An error raised by a subsystem handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubsystemError {
    /// The handler reported a failure.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// The handler panicked; the panic was caught by the scheduler.
    #[error("subsystem panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// A spend propagated with `?`.
    #[error("spend refused: {source}")]
    Spend {
        /// The underlying ledger error.
        #[from]
        source: ReserveError,
    },

    /// A construction propagated with `?`.
    #[error("construction refused: {source}")]
    Construct {
        /// The underlying construction error.
        #[from]
        source: ConstructError,
    },
}

impl SubsystemError {
    /// Shorthand for [`SubsystemError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Whether the error is an ordinary refusal that resolves itself on a
    /// later tick.
    ///
    /// Refused spends, lease conflicts, backoff and abandoned placements are
    /// re-evaluated next tick or handled by the retry manager. They are not
    /// handler failures and never reach the strict/resilient policy.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Spend { .. } | Self::Construct { .. })
    }
}

// ---------------------------------------------------------------------------
// Subsystem trait
// ---------------------------------------------------------------------------

/// A decision module driven by the frame scheduler.
///
/// Handlers must not block. A run that exceeds the soft time budget is
/// logged but never interrupted.
pub trait Subsystem: Send {
    /// Unique name, used for cadence overrides and reporting.
    fn name(&self) -> &str;

    /// Capability that decides under which mode the subsystem may run.
    fn role(&self) -> SubsystemRole;

    /// Default number of ticks between runs. Config overrides win.
    fn cadence_ticks(&self) -> u64 {
        1
    }

    /// Make this tick's decisions.
    fn run(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError>;
}

// ---------------------------------------------------------------------------
// Tick context
// ---------------------------------------------------------------------------

/// Everything one subsystem invocation may see and do.
pub struct TickContext<'a> {
    tick: Tick,
    snapshot: &'a WorldSnapshot,
    mode: OperatingMode,
    overflow: OverflowLevel,
    subsystem: &'a str,
    ledger: &'a mut ResourceLedger,
    retry: &'a mut RetryManager,
    sink: &'a mut dyn CommandSink,
    commands_issued: u32,
}

impl<'a> TickContext<'a> {
    /// Build a context for one invocation of `subsystem`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tick: Tick,
        snapshot: &'a WorldSnapshot,
        mode: OperatingMode,
        overflow: OverflowLevel,
        subsystem: &'a str,
        ledger: &'a mut ResourceLedger,
        retry: &'a mut RetryManager,
        sink: &'a mut dyn CommandSink,
    ) -> Self {
        Self {
            tick,
            snapshot,
            mode,
            overflow,
            subsystem,
            ledger,
            retry,
            sink,
            commands_issued: 0,
        }
    }

    /// The current tick.
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// The shared, read-only world snapshot.
    pub const fn snapshot(&self) -> &'a WorldSnapshot {
        self.snapshot
    }

    /// The arbiter's mode for this tick.
    pub const fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// The overflow level for this tick.
    pub const fn overflow(&self) -> OverflowLevel {
        self.overflow
    }

    /// Name of the running subsystem.
    pub const fn subsystem(&self) -> &str {
        self.subsystem
    }

    /// Read-only view of the ledger.
    pub fn ledger(&self) -> &ResourceLedger {
        self.ledger
    }

    /// Read-only view of the retry state.
    pub fn retry(&self) -> &RetryManager {
        self.retry
    }

    /// Commands issued through this context so far.
    pub const fn commands_issued(&self) -> u32 {
        self.commands_issued
    }

    /// Whether `cost` is affordable right now.
    pub fn can_afford(&self, cost: &ResourceCost) -> bool {
        self.ledger.can_afford(cost)
    }

    /// Debit `cost` and issue a production command.
    ///
    /// # Errors
    ///
    /// Returns the [`ReserveError`] if the ledger refuses the cost; nothing
    /// is issued in that case.
    pub fn produce(
        &mut self,
        output: &str,
        count: u32,
        cost: &ResourceCost,
    ) -> Result<RequestId, ReserveError> {
        self.spend(
            cost,
            CommandPayload::Produce {
                output: output.to_owned(),
                count,
            },
        )
    }

    /// Debit `cost` and issue a research command.
    ///
    /// # Errors
    ///
    /// Returns the [`ReserveError`] if the ledger refuses the cost.
    pub fn research(&mut self, topic: &str, cost: &ResourceCost) -> Result<RequestId, ReserveError> {
        self.spend(
            cost,
            CommandPayload::Research {
                topic: topic.to_owned(),
            },
        )
    }

    fn spend(
        &mut self,
        cost: &ResourceCost,
        payload: CommandPayload,
    ) -> Result<RequestId, ReserveError> {
        self.ledger.try_reserve(cost)?;
        Ok(self.issue(payload, cost))
    }

    /// Reserve `facility`, debit `cost`, and issue a construction command.
    ///
    /// The facility lease is held until the engine reports an outcome or
    /// the lease goes stale. A facility type that failed recently is held
    /// back by the retry manager, and its placement moves to alternate
    /// sites after repeated failures.
    ///
    /// # Errors
    ///
    /// - [`ConstructError::Backoff`] while the facility is backing off.
    /// - [`ConstructError::Ledger`] on a lease conflict or a shortfall.
    /// - [`ConstructError::Abandoned`] once alternate sites are exhausted;
    ///   the lease and the cost are returned.
    pub fn construct(
        &mut self,
        facility: &FacilityType,
        cost: &ResourceCost,
    ) -> Result<RequestId, ConstructError> {
        if !self.retry.should_retry(facility, self.tick) {
            let retry_at = self.retry.retry_at(facility).unwrap_or(self.tick);
            return Err(ConstructError::Backoff {
                facility: facility.clone(),
                retry_at,
            });
        }

        self.ledger
            .try_reserve_construction(facility, self.subsystem, cost, self.tick)?;

        let placement = self.retry.next_placement(facility);
        if placement == Placement::Exhausted {
            self.ledger.release(facility);
            self.ledger.refund(cost);
            return Err(ConstructError::Abandoned {
                facility: facility.clone(),
            });
        }

        let request_id = self.issue(
            CommandPayload::Construct {
                facility: facility.clone(),
                placement,
            },
            cost,
        );
        if let Err(err) = self.ledger.attach_request(facility, request_id) {
            warn!(tick = self.tick, %facility, error = %err, "Lease vanished before request was attached");
        }
        self.retry.record_attempt(facility, self.tick);
        Ok(request_id)
    }

    fn issue(&mut self, payload: CommandPayload, cost: &ResourceCost) -> RequestId {
        let command = Command {
            tick: self.tick,
            issued_by: self.subsystem.to_owned(),
            payload,
            cost: cost.clone(),
        };
        let request_id = self.sink.issue(command);
        self.commands_issued = self.commands_issued.saturating_add(1);
        debug!(
            tick = self.tick,
            subsystem = self.subsystem,
            %request_id,
            "Command issued"
        );
        request_id
    }
}

impl core::fmt::Debug for TickContext<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickContext")
            .field("tick", &self.tick)
            .field("mode", &self.mode)
            .field("overflow", &self.overflow)
            .field("subsystem", &self.subsystem)
            .field("commands_issued", &self.commands_issued)
            .finish_non_exhaustive()
    }
}
