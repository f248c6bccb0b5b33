//! The frame scheduler: one cooperative pass over every subsystem per tick.
//!
//! # Step order
//!
//! 1. Reject a tick that does not advance.
//! 2. Resolve command outcomes reported in the snapshot: release the
//!    construction lease and update the retry manager.
//! 3. Sweep stale construction leases.
//! 4. Regenerate production tokens.
//! 5. Credit one tick of income from the snapshot.
//! 6. Privileged work: the value arbiter picks the operating mode, then the
//!    overflow controller classifies the fast balance and drains it.
//! 7. Regular subsystems, in registration order, gated by cadence and by
//!    role against the mode and overflow level.
//! 8. Periodic activity report.
//!
//! # Failure isolation
//!
//! Every handler call goes through one wrapper that catches both returned
//! errors and panics. Recoverable refusals propagated with `?` (see
//! [`SubsystemError::is_recoverable`]) end the run as deferred: they are
//! logged at debug and are not counted as errors. Any other failure goes
//! through the error policy. In [`ErrorMode::Strict`] the first failure
//! ends the step with [`SchedulerError::Subsystem`]. In
//! [`ErrorMode::Resilient`] the failure is counted, logged up to
//! `max_error_logs` times per subsystem, and the step moves on.
//!
//! A caught panic still runs the process panic hook. Binaries that rely on
//! the resilient log limit should install a hook that routes the report
//! through `tracing` at debug level, so the wrapper's rate-limited warning
//! is the only visible line per panic.
//!
//! All mutable state other than the descriptors lives in the caller-owned
//! [`SchedulerContext`]; the scheduler keeps no globals.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use quartermaster_ledger::ResourceLedger;
use quartermaster_types::{
    Currency, OperatingMode, OutcomeStatus, OverflowLevel, Tick, WorldSnapshot,
};

use crate::activity::{ActivityReport, ActivityTracker, RunOutcome};
use crate::actuation::CommandSink;
use crate::arbiter::ValueArbiter;
use crate::config::{AgentConfig, ErrorMode, SchedulerConfig};
use crate::overflow::{DrainOutcome, OverflowController};
use crate::registry::{RegistryError, SubsystemRegistry};
use crate::retry::RetryManager;
use crate::subsystem::{Subsystem, SubsystemError, TickContext};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that end a scheduler step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The tick did not advance past the previous step.
    #[error("tick {tick} does not advance past previous tick {previous}")]
    NonMonotonicTick {
        /// The rejected tick.
        tick: Tick,
        /// The last tick stepped.
        previous: Tick,
    },

    /// A subsystem failed in strict mode.
    #[error("subsystem {name} failed at tick {tick}: {source}")]
    Subsystem {
        /// The failing subsystem.
        name: String,
        /// Tick of the failure.
        tick: Tick,
        /// What went wrong.
        source: SubsystemError,
    },
}

// ---------------------------------------------------------------------------
// Context and report
// ---------------------------------------------------------------------------

/// Caller-owned state threaded through every step.
#[derive(Debug, Clone)]
pub struct SchedulerContext {
    /// Balances, tokens and construction leases.
    pub ledger: ResourceLedger,
    /// Construction backoff state.
    pub retry: RetryManager,
    /// Operating-mode selection.
    pub arbiter: ValueArbiter,
    /// Congestion detection and drain.
    pub overflow: OverflowController,
    /// Timing and error aggregation.
    pub activity: ActivityTracker,
}

impl SchedulerContext {
    /// Build every component from configuration.
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            ledger: ResourceLedger::new(&config.economy),
            retry: RetryManager::new(config.backoff.clone()),
            arbiter: ValueArbiter::new(config.arbiter.clone()),
            overflow: OverflowController::new(config.overflow.clone()),
            activity: ActivityTracker::new(config.scheduler.report_interval_ticks),
        }
    }
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// The tick stepped.
    pub tick: Tick,
    /// Mode selected by the arbiter.
    pub mode: OperatingMode,
    /// Overflow level after income.
    pub overflow: OverflowLevel,
    /// Outcomes matched to a construction lease.
    pub outcomes_resolved: u32,
    /// Leases released by the stale sweep.
    pub stale_released: u32,
    /// Overflow drain result.
    pub drain: DrainOutcome,
    /// Subsystems invoked.
    pub ran: u32,
    /// Subsystems skipped because their cadence had not elapsed.
    pub skipped_cadence: u32,
    /// Subsystems skipped because their role was not permitted.
    pub skipped_mode: u32,
    /// Runs that ended on a recoverable refusal.
    pub deferred: u32,
    /// Subsystem failures (resilient mode).
    pub errors: u32,
    /// Commands issued, drains included.
    pub commands_issued: u32,
    /// Periodic activity report, when one was due.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityReport>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives the registered subsystems once per tick.
///
/// Panics raised by a handler are caught and reported through the error
/// policy, but the process panic hook still fires first. Install a hook
/// that logs at debug level (the agent binary does) to keep resilient mode
/// within `max_error_logs` visible reports per subsystem.
#[derive(Debug)]
pub struct FrameScheduler {
    config: SchedulerConfig,
    registry: SubsystemRegistry,
    last_tick: Option<Tick>,
}

impl FrameScheduler {
    /// Create a scheduler with no subsystems.
    pub const fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: SubsystemRegistry::new(),
            last_tick: None,
        }
    }

    /// Register a subsystem, applying any configured cadence override.
    pub fn register(&mut self, handler: Box<dyn Subsystem>) -> Result<(), RegistryError> {
        self.registry
            .register(handler, &self.config.cadence_overrides)
    }

    /// The registered subsystems.
    pub const fn registry(&self) -> &SubsystemRegistry {
        &self.registry
    }

    /// Scheduler settings.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Last tick stepped.
    pub const fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    /// Run one tick.
    ///
    /// A tick is never cancelled half-way; in strict mode a failing
    /// subsystem ends the step after its own invocation, leaving every
    /// earlier effect in place.
    pub fn step(
        &mut self,
        ctx: &mut SchedulerContext,
        tick: Tick,
        snapshot: &WorldSnapshot,
        sink: &mut dyn CommandSink,
    ) -> Result<StepReport, SchedulerError> {
        if let Some(previous) = self.last_tick.filter(|&previous| tick <= previous) {
            return Err(SchedulerError::NonMonotonicTick { tick, previous });
        }
        self.last_tick = Some(tick);

        // --- Housekeeping ---
        let outcomes_resolved = resolve_outcomes(ctx, tick, snapshot);
        let stale = ctx.ledger.sweep(tick, self.config.stale_reservation_ticks);
        let stale_released = u32::try_from(stale.len()).unwrap_or(u32::MAX);
        ctx.ledger.regenerate_tokens(tick);
        ctx.ledger.set_income(snapshot.income);
        ctx.ledger.apply_income();

        // --- Privileged ---
        let mode = ctx.arbiter.update(tick, snapshot);
        let overflow = ctx
            .overflow
            .update(tick, ctx.ledger.balance(Currency::Fast));
        let drain = if overflow > OverflowLevel::None {
            ctx.overflow.drain(tick, &mut ctx.ledger, sink)
        } else {
            DrainOutcome::default()
        };

        let mut report = StepReport {
            tick,
            mode,
            overflow,
            outcomes_resolved,
            stale_released,
            commands_issued: drain.actions,
            drain,
            ran: 0,
            skipped_cadence: 0,
            skipped_mode: 0,
            deferred: 0,
            errors: 0,
            activity: None,
        };

        // --- Subsystems ---
        let budget = Duration::from_micros(self.config.soft_budget_micros);
        for descriptor in self.registry.iter_mut() {
            if !descriptor.is_due(tick) {
                report.skipped_cadence = report.skipped_cadence.saturating_add(1);
                continue;
            }
            if !descriptor.role.permitted(mode, overflow) {
                report.skipped_mode = report.skipped_mode.saturating_add(1);
                continue;
            }

            let mut tick_ctx = TickContext::new(
                tick,
                snapshot,
                mode,
                overflow,
                &descriptor.name,
                &mut ctx.ledger,
                &mut ctx.retry,
                &mut *sink,
            );
            let started = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| descriptor.handler.run(&mut tick_ctx)))
                .unwrap_or_else(|payload| {
                    Err(SubsystemError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                });
            let elapsed = started.elapsed();
            let issued = tick_ctx.commands_issued();

            descriptor.last_run_tick = Some(tick);
            report.ran = report.ran.saturating_add(1);
            report.commands_issued = report.commands_issued.saturating_add(issued);

            let over_budget = elapsed > budget;
            if over_budget {
                warn!(
                    tick,
                    subsystem = %descriptor.name,
                    elapsed_micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
                    budget_micros = self.config.soft_budget_micros,
                    "Subsystem exceeded soft time budget"
                );
            }

            let err = match result {
                Ok(()) => {
                    descriptor.consecutive_errors = 0;
                    ctx.activity
                        .record(&descriptor.name, elapsed, RunOutcome::Completed, over_budget);
                    continue;
                }
                Err(err) if err.is_recoverable() => {
                    descriptor.consecutive_errors = 0;
                    report.deferred = report.deferred.saturating_add(1);
                    debug!(tick, subsystem = %descriptor.name, reason = %err, "Subsystem run deferred");
                    ctx.activity
                        .record(&descriptor.name, elapsed, RunOutcome::Completed, over_budget);
                    continue;
                }
                Err(err) => err,
            };

            descriptor.consecutive_errors = descriptor.consecutive_errors.saturating_add(1);
            descriptor.total_errors = descriptor.total_errors.saturating_add(1);
            report.errors = report.errors.saturating_add(1);

            match self.config.error_mode {
                ErrorMode::Strict => {
                    ctx.activity
                        .record(&descriptor.name, elapsed, RunOutcome::Failed, over_budget);
                    warn!(tick, subsystem = %descriptor.name, error = %err, "Subsystem failed in strict mode");
                    return Err(SchedulerError::Subsystem {
                        name: descriptor.name.clone(),
                        tick,
                        source: err,
                    });
                }
                ErrorMode::Resilient => {
                    let outcome = if descriptor.logged_errors < self.config.max_error_logs {
                        descriptor.logged_errors = descriptor.logged_errors.saturating_add(1);
                        warn!(
                            tick,
                            subsystem = %descriptor.name,
                            consecutive = descriptor.consecutive_errors,
                            error = %err,
                            "Subsystem failed"
                        );
                        if descriptor.logged_errors == self.config.max_error_logs {
                            warn!(
                                subsystem = %descriptor.name,
                                limit = self.config.max_error_logs,
                                "Error log limit reached, further errors suppressed"
                            );
                        }
                        RunOutcome::Failed
                    } else {
                        RunOutcome::Suppressed
                    };
                    ctx.activity
                        .record(&descriptor.name, elapsed, outcome, over_budget);
                }
            }
        }

        report.activity = ctx.activity.maybe_report(tick);
        debug!(
            tick,
            %mode,
            ?overflow,
            ran = report.ran,
            errors = report.errors,
            commands = report.commands_issued,
            "Tick complete"
        );
        Ok(report)
    }
}

/// Match reported outcomes to construction leases.
fn resolve_outcomes(ctx: &mut SchedulerContext, tick: Tick, snapshot: &WorldSnapshot) -> u32 {
    let mut resolved: u32 = 0;
    for outcome in &snapshot.outcomes {
        let Some(lease) = ctx.ledger.release_request(outcome.request_id) else {
            debug!(tick, request_id = %outcome.request_id, "Outcome for unknown request ignored");
            continue;
        };
        resolved = resolved.saturating_add(1);
        match &outcome.status {
            OutcomeStatus::Confirmed => {
                ctx.retry.record_success(&lease.facility);
            }
            OutcomeStatus::Failed { reason } => {
                info!(
                    tick,
                    facility = %lease.facility,
                    holder = %lease.holder,
                    %reason,
                    "Construction reported failed"
                );
                ctx.retry.record_failure(&lease.facility, tick);
            }
        }
    }
    resolved
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::actuation::RecordingSink;

    struct Counter {
        name: &'static str,
        cadence: u64,
        runs: std::sync::Arc<std::sync::atomic::AtomicU64>,
    }

    impl Subsystem for Counter {
        fn name(&self) -> &str {
            self.name
        }

        fn role(&self) -> quartermaster_types::SubsystemRole {
            quartermaster_types::SubsystemRole::Support
        }

        fn cadence_ticks(&self) -> u64 {
            self.cadence
        }

        fn run(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
            self.runs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(())
        }
    }

    struct Panicker;

    impl Subsystem for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        fn role(&self) -> quartermaster_types::SubsystemRole {
            quartermaster_types::SubsystemRole::Emergency
        }

        fn run(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
            panic!("boom");
        }
    }

    fn setup() -> (FrameScheduler, SchedulerContext, RecordingSink) {
        let config = AgentConfig::default();
        (
            FrameScheduler::new(config.scheduler.clone()),
            SchedulerContext::from_config(&config),
            RecordingSink::new(),
        )
    }

    #[test]
    fn rejects_non_advancing_tick() {
        let (mut scheduler, mut ctx, mut sink) = setup();
        scheduler
            .step(&mut ctx, 5, &WorldSnapshot::at(5), &mut sink)
            .unwrap();
        let err = scheduler
            .step(&mut ctx, 5, &WorldSnapshot::at(5), &mut sink)
            .unwrap_err();
        assert_eq!(err, SchedulerError::NonMonotonicTick { tick: 5, previous: 5 });
    }

    #[test]
    fn cadence_gates_runs() {
        let (mut scheduler, mut ctx, mut sink) = setup();
        let runs = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        scheduler
            .register(Box::new(Counter {
                name: "slow",
                cadence: 3,
                runs: std::sync::Arc::clone(&runs),
            }))
            .unwrap();

        for tick in 1..=10 {
            scheduler
                .step(&mut ctx, tick, &WorldSnapshot::at(tick), &mut sink)
                .unwrap();
        }
        // Ticks 1, 4, 7, 10.
        assert_eq!(runs.load(std::sync::atomic::Ordering::Relaxed), 4);
    }

    #[test]
    fn panic_is_caught_in_resilient_mode() {
        let (mut scheduler, mut ctx, mut sink) = setup();
        scheduler.register(Box::new(Panicker)).unwrap();
        let report = scheduler
            .step(&mut ctx, 1, &WorldSnapshot::at(1), &mut sink)
            .unwrap();
        assert_eq!(report.errors, 1);
        let descriptor = scheduler.registry().get("panicker").unwrap();
        assert_eq!(descriptor.consecutive_errors(), 1);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn core::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let owned: Box<dyn core::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn core::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
