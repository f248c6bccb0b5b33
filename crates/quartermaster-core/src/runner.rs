//! Async tick driver.
//!
//! [`run_agent`] is the top-level loop: observe, step, sleep, until the
//! tick bound is reached or the engine reports the session is over. The
//! scheduler itself stays synchronous; the driver only adds pacing and
//! termination around it.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use quartermaster_ledger::LedgerTotals;
use quartermaster_types::{Balances, Tick};

use crate::activity::ActivityReport;
use crate::actuation::CommandSink;
use crate::config::RunConfig;
use crate::perception::{PerceptionError, SnapshotSource};
use crate::scheduler::{FrameScheduler, SchedulerContext, SchedulerError};

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The engine could not be observed.
    #[error("perception error: {source}")]
    Perception {
        /// The underlying perception error.
        #[from]
        source: PerceptionError,
    },

    /// A step failed (non-advancing tick, or a strict-mode failure).
    #[error("scheduler error: {source}")]
    Scheduler {
        /// The underlying scheduler error.
        #[from]
        source: SchedulerError,
    },
}

/// Limits on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBounds {
    /// Stop after this many ticks (0 = until the engine finishes).
    pub max_ticks: u64,
    /// Real-time pause between ticks.
    pub tick_interval: Duration,
}

impl From<&RunConfig> for RunBounds {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_ticks: config.max_ticks,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEndReason {
    /// `max_ticks` ticks were stepped.
    MaxTicksReached,
    /// The engine reported the session over.
    SourceFinished,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Why the run ended.
    pub end_reason: RunEndReason,
    /// Ticks stepped.
    pub total_ticks: u64,
    /// The last tick stepped, if any.
    pub last_tick: Option<Tick>,
    /// Commands issued over the run, drains included.
    pub commands_issued: u64,
    /// Subsystem failures over the run.
    pub errors: u64,
    /// Operating-mode switches over the run.
    pub mode_switches: u64,
    /// Fast currency spent by overflow drains.
    pub drained_fast: Decimal,
    /// Ledger balances at the end of the run.
    pub final_balances: Balances,
    /// Ledger running totals.
    pub ledger: LedgerTotals,
    /// Activity over the whole run.
    pub final_report: ActivityReport,
}

/// Drive `engine` through the scheduler until a bound is reached.
///
/// Ticks start at 1. The engine is both the snapshot source and the
/// command sink.
///
/// # Errors
///
/// Returns [`RunnerError`] if a snapshot cannot be produced or a step
/// fails (strict mode).
pub async fn run_agent<E>(
    scheduler: &mut FrameScheduler,
    ctx: &mut SchedulerContext,
    engine: &mut E,
    bounds: RunBounds,
) -> Result<RunSummary, RunnerError>
where
    E: SnapshotSource + CommandSink,
{
    let mut total_ticks: u64 = 0;
    let mut last_tick: Option<Tick> = None;
    let mut commands_issued: u64 = 0;
    let mut errors: u64 = 0;

    info!(
        max_ticks = bounds.max_ticks,
        tick_interval_ms = u64::try_from(bounds.tick_interval.as_millis()).unwrap_or(u64::MAX),
        subsystems = scheduler.registry().len(),
        "Agent run starting"
    );

    let end_reason = loop {
        if bounds.max_ticks > 0 && total_ticks >= bounds.max_ticks {
            info!(total_ticks, "Tick limit reached");
            break RunEndReason::MaxTicksReached;
        }
        if engine.finished() {
            info!(total_ticks, "Engine session finished");
            break RunEndReason::SourceFinished;
        }

        let tick = last_tick.map_or(1, |t| t.saturating_add(1));
        let snapshot = engine.snapshot(tick)?;
        let report = scheduler.step(ctx, tick, &snapshot, engine)?;

        total_ticks = total_ticks.saturating_add(1);
        last_tick = Some(tick);
        commands_issued = commands_issued.saturating_add(u64::from(report.commands_issued));
        errors = errors.saturating_add(u64::from(report.errors));

        if !bounds.tick_interval.is_zero() {
            tokio::time::sleep(bounds.tick_interval).await;
        }
    };

    let summary = RunSummary {
        end_reason,
        total_ticks,
        last_tick,
        commands_issued,
        errors,
        mode_switches: ctx.arbiter.switches(),
        drained_fast: ctx.overflow.drained_total(),
        final_balances: ctx.ledger.balances(),
        ledger: ctx.ledger.totals().clone(),
        final_report: ctx.activity.report(last_tick.unwrap_or(0)),
    };
    log_run_end(&summary);
    Ok(summary)
}

/// Log the end-of-run summary.
pub fn log_run_end(summary: &RunSummary) {
    info!(
        reason = ?summary.end_reason,
        total_ticks = summary.total_ticks,
        commands = summary.commands_issued,
        errors = summary.errors,
        mode_switches = summary.mode_switches,
        fast = %summary.final_balances.fast,
        slow = %summary.final_balances.slow,
        "Agent run ended"
    );
    if summary.total_ticks == 0 {
        warn!("Agent run ended with no ticks executed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use quartermaster_types::{Command, RequestId, WorldSnapshot};

    use super::*;
    use crate::config::AgentConfig;

    /// Engine that produces empty snapshots and finishes after `limit`.
    struct Scripted {
        limit: Tick,
        served: Tick,
        issued: Vec<Command>,
    }

    impl SnapshotSource for Scripted {
        fn snapshot(&mut self, tick: Tick) -> Result<WorldSnapshot, PerceptionError> {
            self.served = tick;
            Ok(WorldSnapshot::at(tick))
        }

        fn finished(&self) -> bool {
            self.served >= self.limit
        }
    }

    impl CommandSink for Scripted {
        fn issue(&mut self, command: Command) -> RequestId {
            self.issued.push(command);
            RequestId::new()
        }
    }

    fn scheduler_and_ctx() -> (FrameScheduler, SchedulerContext) {
        let config = AgentConfig::default();
        (
            FrameScheduler::new(config.scheduler.clone()),
            SchedulerContext::from_config(&config),
        )
    }

    #[tokio::test]
    async fn stops_at_tick_limit() {
        let (mut scheduler, mut ctx) = scheduler_and_ctx();
        let mut engine = Scripted {
            limit: 100,
            served: 0,
            issued: Vec::new(),
        };
        let bounds = RunBounds {
            max_ticks: 5,
            tick_interval: Duration::ZERO,
        };
        let summary = run_agent(&mut scheduler, &mut ctx, &mut engine, bounds)
            .await
            .unwrap();
        assert_eq!(summary.end_reason, RunEndReason::MaxTicksReached);
        assert_eq!(summary.total_ticks, 5);
        assert_eq!(summary.last_tick, Some(5));
    }

    #[tokio::test]
    async fn stops_when_engine_finishes() {
        let (mut scheduler, mut ctx) = scheduler_and_ctx();
        let mut engine = Scripted {
            limit: 3,
            served: 0,
            issued: Vec::new(),
        };
        let bounds = RunBounds {
            max_ticks: 0,
            tick_interval: Duration::ZERO,
        };
        let summary = run_agent(&mut scheduler, &mut ctx, &mut engine, bounds)
            .await
            .unwrap();
        assert_eq!(summary.end_reason, RunEndReason::SourceFinished);
        assert_eq!(summary.total_ticks, 3);
        assert!(engine.issued.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_ticks() {
        let (mut scheduler, mut ctx) = scheduler_and_ctx();
        let mut engine = Scripted {
            limit: 100,
            served: 0,
            issued: Vec::new(),
        };
        let bounds = RunBounds {
            max_ticks: 3,
            tick_interval: Duration::from_millis(250),
        };
        let started = tokio::time::Instant::now();
        run_agent(&mut scheduler, &mut ctx, &mut engine, bounds)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[test]
    fn bounds_from_config() {
        let bounds = RunBounds::from(&RunConfig {
            max_ticks: 10,
            tick_interval_ms: 40,
            seed: 1,
        });
        assert_eq!(bounds.max_ticks, 10);
        assert_eq!(bounds.tick_interval, Duration::from_millis(40));
    }
}
