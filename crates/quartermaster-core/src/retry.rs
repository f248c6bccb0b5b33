//! Exponential backoff and alternate-site fallback for failed construction.
//!
//! A [`ConstructionAttempt`] is created the first time a facility type is
//! reserved for construction, incremented on every reported failure, and
//! cleared on success or once the alternate-site list is exhausted.
//!
//! With `k` consecutive failures, the next attempt is held back until
//! `min(base * 2^k, max)` ticks have passed since the last failure. After
//! `failure_threshold` failures the placement switches from the primary
//! site to the alternate-site search.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use quartermaster_types::{FacilityType, Placement, Tick};

use crate::config::BackoffConfig;

/// Construction history for one facility type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstructionAttempt {
    /// The facility type being built.
    pub facility: FacilityType,
    /// Commands issued for it since the last success.
    pub attempt_count: u32,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// Tick of the most recent issued attempt.
    pub last_attempt_tick: Tick,
    /// Tick of the most recent failure.
    pub last_failure_tick: Option<Tick>,
}

/// Tracks failed constructions per facility type.
#[derive(Debug, Clone)]
pub struct RetryManager {
    /// Backoff parameters.
    config: BackoffConfig,
    /// Live attempts keyed by facility type.
    attempts: BTreeMap<FacilityType, ConstructionAttempt>,
    /// Attempts abandoned after exhausting alternate sites.
    abandoned: u64,
}

impl RetryManager {
    /// Create a manager with the given backoff parameters.
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: BTreeMap::new(),
            abandoned: 0,
        }
    }

    /// Backoff delay after `failures` consecutive failures:
    /// `min(base * 2^failures, max)`.
    pub fn backoff_delay(&self, failures: u32) -> u64 {
        let factor = 1_u64.checked_shl(failures).unwrap_or(u64::MAX);
        self.config
            .base_delay_ticks
            .saturating_mul(factor)
            .min(self.config.max_delay_ticks)
    }

    /// Note that a construction command was issued for `facility`.
    pub fn record_attempt(&mut self, facility: &FacilityType, tick: Tick) {
        let attempt = self
            .attempts
            .entry(facility.clone())
            .or_insert_with(|| ConstructionAttempt {
                facility: facility.clone(),
                attempt_count: 0,
                failure_count: 0,
                last_attempt_tick: tick,
                last_failure_tick: None,
            });
        attempt.attempt_count = attempt.attempt_count.saturating_add(1);
        attempt.last_attempt_tick = tick;
    }

    /// Record a failed construction. Returns the consecutive failure count.
    pub fn record_failure(&mut self, facility: &FacilityType, tick: Tick) -> u32 {
        let attempt = self
            .attempts
            .entry(facility.clone())
            .or_insert_with(|| ConstructionAttempt {
                facility: facility.clone(),
                attempt_count: 1,
                failure_count: 0,
                last_attempt_tick: tick,
                last_failure_tick: None,
            });
        attempt.failure_count = attempt.failure_count.saturating_add(1);
        attempt.last_failure_tick = Some(tick);
        let failures = attempt.failure_count;

        let delay = self.backoff_delay(failures);
        info!(
            %facility,
            tick,
            failures,
            retry_in = delay,
            "Construction failed, backing off"
        );
        failures
    }

    /// Record a confirmed construction; the failure counter resets.
    pub fn record_success(&mut self, facility: &FacilityType) {
        if let Some(attempt) = self.attempts.remove(facility) {
            debug!(
                %facility,
                attempts = attempt.attempt_count,
                failures = attempt.failure_count,
                "Construction confirmed"
            );
        }
    }

    /// The earliest tick at which `facility` may be retried, if it is
    /// currently backing off.
    pub fn retry_at(&self, facility: &FacilityType) -> Option<Tick> {
        let attempt = self.attempts.get(facility)?;
        let last_failure = attempt.last_failure_tick?;
        Some(last_failure.saturating_add(self.backoff_delay(attempt.failure_count)))
    }

    /// Whether a construction of `facility` may be attempted at `tick`.
    pub fn should_retry(&self, facility: &FacilityType, tick: Tick) -> bool {
        self.retry_at(facility).is_none_or(|ready| tick >= ready)
    }

    /// Placement for the next attempt of `facility`.
    ///
    /// Returns [`Placement::Primary`] below the failure threshold, then
    /// successive [`Placement::AlternateSite`] indices. When the alternate
    /// list is exhausted the attempt is cleared and
    /// [`Placement::Exhausted`] is returned once.
    pub fn next_placement(&mut self, facility: &FacilityType) -> Placement {
        let failures = self.failures(facility);
        if failures < self.config.failure_threshold {
            return Placement::Primary;
        }
        let index = failures.saturating_sub(self.config.failure_threshold);
        if index < self.config.max_alternate_sites {
            return Placement::AlternateSite { index };
        }

        self.attempts.remove(facility);
        self.abandoned = self.abandoned.saturating_add(1);
        warn!(%facility, failures, "Alternate sites exhausted, abandoning construction");
        Placement::Exhausted
    }

    /// Consecutive failures recorded for `facility`.
    pub fn failures(&self, facility: &FacilityType) -> u32 {
        self.attempts
            .get(facility)
            .map_or(0, |attempt| attempt.failure_count)
    }

    /// The live attempt for `facility`, if any.
    pub fn attempt(&self, facility: &FacilityType) -> Option<&ConstructionAttempt> {
        self.attempts.get(facility)
    }

    /// Number of attempts abandoned so far.
    pub const fn abandoned(&self) -> u64 {
        self.abandoned
    }
}
