//! Per-subsystem activity tracking and periodic reports.
//!
//! The scheduler records every invocation here: wall-clock duration,
//! whether it failed, and whether the failure's log line was suppressed
//! by the per-subsystem log limit. Every report window the tracker emits
//! one "N errors suppressed for module X" line per subsystem that had
//! suppressed errors, then builds an [`ActivityReport`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use quartermaster_types::Tick;

/// How an invocation ended, as far as reporting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The handler returned `Ok`.
    Completed,
    /// The handler failed and the error was logged.
    Failed,
    /// The handler failed and the log line was suppressed.
    Suppressed,
}

/// Accumulated counters for one subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SubsystemStats {
    runs: u64,
    errors: u64,
    suppressed: u64,
    suppressed_in_window: u64,
    total_micros: u64,
    max_micros: u64,
    budget_overruns: u64,
}

/// One subsystem's line in an [`ActivityReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubsystemActivity {
    /// Subsystem name.
    pub name: String,
    /// Invocations so far.
    pub runs: u64,
    /// Failed invocations so far.
    pub errors: u64,
    /// Failures whose log line was suppressed.
    pub suppressed_errors: u64,
    /// Mean invocation time in microseconds.
    pub mean_micros: u64,
    /// Longest invocation time in microseconds.
    pub max_micros: u64,
    /// Invocations that exceeded the soft time budget.
    pub budget_overruns: u64,
}

/// A point-in-time summary of subsystem activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityReport {
    /// Tick the report was generated on.
    pub tick: Tick,
    /// Wall-clock generation time.
    pub generated_at: DateTime<Utc>,
    /// Per-subsystem lines, ordered by name.
    pub subsystems: Vec<SubsystemActivity>,
}

impl ActivityReport {
    /// Total failed invocations across all subsystems.
    pub fn total_errors(&self) -> u64 {
        self.subsystems
            .iter()
            .fold(0_u64, |acc, s| acc.saturating_add(s.errors))
    }

    /// Total invocations across all subsystems.
    pub fn total_runs(&self) -> u64 {
        self.subsystems
            .iter()
            .fold(0_u64, |acc, s| acc.saturating_add(s.runs))
    }
}

/// Aggregates invocation timings and error counts.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    /// Ticks between periodic reports (0 disables them).
    report_interval: u64,
    /// Tick of the last periodic report.
    last_report: Tick,
    stats: BTreeMap<String, SubsystemStats>,
}

impl ActivityTracker {
    /// Create a tracker reporting every `report_interval` ticks.
    pub const fn new(report_interval: u64) -> Self {
        Self {
            report_interval,
            last_report: 0,
            stats: BTreeMap::new(),
        }
    }

    /// Record one invocation.
    pub fn record(&mut self, name: &str, elapsed: Duration, outcome: RunOutcome, over_budget: bool) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let stats = self.stats.entry(name.to_owned()).or_default();

        stats.runs = stats.runs.saturating_add(1);
        stats.total_micros = stats.total_micros.saturating_add(micros);
        stats.max_micros = stats.max_micros.max(micros);
        if over_budget {
            stats.budget_overruns = stats.budget_overruns.saturating_add(1);
        }
        match outcome {
            RunOutcome::Completed => {}
            RunOutcome::Failed => {
                stats.errors = stats.errors.saturating_add(1);
            }
            RunOutcome::Suppressed => {
                stats.errors = stats.errors.saturating_add(1);
                stats.suppressed = stats.suppressed.saturating_add(1);
                stats.suppressed_in_window = stats.suppressed_in_window.saturating_add(1);
            }
        }
    }

    /// Emit a periodic report if the window has elapsed.
    pub fn maybe_report(&mut self, tick: Tick) -> Option<ActivityReport> {
        if self.report_interval == 0 || tick.saturating_sub(self.last_report) < self.report_interval
        {
            return None;
        }
        self.last_report = tick;

        for (name, stats) in &mut self.stats {
            if stats.suppressed_in_window > 0 {
                let suppressed = stats.suppressed_in_window;
                warn!(
                    tick,
                    module = %name,
                    suppressed,
                    "{suppressed} errors suppressed for module {name}"
                );
                stats.suppressed_in_window = 0;
            }
        }

        let report = self.report(tick);
        info!(
            tick,
            subsystems = report.subsystems.len(),
            runs = report.total_runs(),
            errors = report.total_errors(),
            "Activity report"
        );
        Some(report)
    }

    /// Build a report of everything recorded so far.
    pub fn report(&self, tick: Tick) -> ActivityReport {
        let subsystems = self
            .stats
            .iter()
            .map(|(name, stats)| SubsystemActivity {
                name: name.clone(),
                runs: stats.runs,
                errors: stats.errors,
                suppressed_errors: stats.suppressed,
                mean_micros: stats.total_micros.checked_div(stats.runs).unwrap_or(0),
                max_micros: stats.max_micros,
                budget_overruns: stats.budget_overruns,
            })
            .collect();
        ActivityReport {
            tick,
            generated_at: Utc::now(),
            subsystems,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn counts_runs_and_errors() {
        let mut tracker = ActivityTracker::new(0);
        tracker.record("a", Duration::from_micros(10), RunOutcome::Completed, false);
        tracker.record("a", Duration::from_micros(30), RunOutcome::Failed, true);
        tracker.record("a", Duration::from_micros(20), RunOutcome::Suppressed, false);

        let report = tracker.report(5);
        let line = report.subsystems.first().unwrap();
        assert_eq!(line.runs, 3);
        assert_eq!(line.errors, 2);
        assert_eq!(line.suppressed_errors, 1);
        assert_eq!(line.mean_micros, 20);
        assert_eq!(line.max_micros, 30);
        assert_eq!(line.budget_overruns, 1);
    }

    #[test]
    fn reports_on_interval() {
        let mut tracker = ActivityTracker::new(10);
        tracker.record("a", Duration::ZERO, RunOutcome::Completed, false);
        assert!(tracker.maybe_report(5).is_none());
        assert!(tracker.maybe_report(10).is_some());
        assert!(tracker.maybe_report(15).is_none());
        assert_eq!(tracker.maybe_report(20).map(|r| r.tick), Some(20));
    }

    #[test]
    fn disabled_interval_never_reports() {
        let mut tracker = ActivityTracker::new(0);
        assert!(tracker.maybe_report(1_000).is_none());
    }

    #[test]
    fn suppressed_window_resets_after_report() {
        let mut tracker = ActivityTracker::new(1);
        tracker.record("a", Duration::ZERO, RunOutcome::Suppressed, false);
        tracker.maybe_report(1).unwrap();
        assert_eq!(tracker.stats.get("a").unwrap().suppressed_in_window, 0);
        assert_eq!(tracker.stats.get("a").unwrap().suppressed, 1);
    }

    #[test]
    fn report_serializes() {
        let mut tracker = ActivityTracker::new(0);
        tracker.record("a", Duration::from_micros(5), RunOutcome::Completed, false);
        let json = serde_json::to_value(tracker.report(3)).unwrap();
        assert_eq!(json.get("tick"), Some(&serde_json::json!(3)));
        assert_eq!(
            json.pointer("/subsystems/0/name"),
            Some(&serde_json::json!("a"))
        );
    }
}
