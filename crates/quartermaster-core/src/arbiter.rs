//! The value arbiter: infrastructure investment versus immediate output.
//!
//! Every evaluation window the arbiter turns world-state signals into two
//! scores in `[0, 100]`, blends them with the previous window, and selects
//! an [`OperatingMode`] that gates which subsystems may spend this tick.
//!
//! # Signals
//!
//! | Signal | Infrastructure | Throughput |
//! |--------|----------------|------------|
//! | baseline | `+infrastructure_baseline` | `+throughput_baseline` |
//! | required facility missing | `+missing_facility_bonus` | |
//! | production tokens exhausted | `+saturated_tokens_bonus` | |
//! | fast balance above threshold | `+bank_bonus * excess` | |
//! | slow balance above threshold | | `+bank_bonus * excess` |
//! | threat level | `-threat_weight * threat` | `+threat_weight * threat` |
//! | army deficit vs opponent | | `+army_deficit_weight * deficit` |
//!
//! `excess` and `deficit` are ratios clamped to `[0, 1]`.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{debug, info};

use quartermaster_types::{OperatingMode, Tick, WorldSnapshot};

use crate::config::ArbiterConfig;

/// Upper bound of a value score.
pub const MAX_SCORE: f64 = 100.0;

/// The two competing priority scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueScore {
    /// Priority of building infrastructure.
    pub infrastructure: f64,
    /// Priority of spending on immediate output.
    pub throughput: f64,
}

impl ValueScore {
    /// Build a score, clamping both components into `[0, 100]`.
    pub fn clamped(infrastructure: f64, throughput: f64) -> Self {
        Self {
            infrastructure: clamp_score(infrastructure),
            throughput: clamp_score(throughput),
        }
    }

    /// Blend `raw` into `self` with exponential decay.
    ///
    /// `decay` is the weight kept from the previous window.
    pub fn blend(self, raw: Self, decay: f64) -> Self {
        let keep = decay.clamp(0.0, 1.0);
        let take = 1.0 - keep;
        Self::clamped(
            self.infrastructure.mul_add(keep, raw.infrastructure * take),
            self.throughput.mul_add(keep, raw.throughput * take),
        )
    }
}

/// Select the operating mode for a score.
///
/// Infrastructure wins when `infrastructure > throughput * hysteresis`.
pub fn select_mode(score: ValueScore, hysteresis: f64) -> OperatingMode {
    if score.infrastructure > score.throughput * hysteresis {
        OperatingMode::Infrastructure
    } else {
        OperatingMode::Throughput
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_SCORE)
    }
}

/// Ratio by which `balance` exceeds `threshold`, clamped to `[0, 1]`.
fn excess_ratio(balance: Decimal, threshold: Decimal) -> f64 {
    if threshold <= Decimal::ZERO || balance <= threshold {
        return 0.0;
    }
    balance
        .checked_sub(threshold)
        .and_then(|excess| excess.checked_div(threshold))
        .and_then(|ratio| ratio.to_f64())
        .map_or(1.0, |ratio| ratio.clamp(0.0, 1.0))
}

/// Chooses between infrastructure and throughput spending.
#[derive(Debug, Clone)]
pub struct ValueArbiter {
    /// Weights and hysteresis.
    config: ArbiterConfig,
    /// Smoothed score from the last evaluation.
    score: Option<ValueScore>,
    /// Mode selected by the last evaluation.
    mode: OperatingMode,
    /// Tick of the last evaluation.
    last_evaluated: Option<Tick>,
    /// Number of mode switches so far.
    switches: u64,
}

impl ValueArbiter {
    /// Create an arbiter. Starts in [`OperatingMode::Infrastructure`]
    /// until the first evaluation.
    pub const fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            score: None,
            mode: OperatingMode::Infrastructure,
            last_evaluated: None,
            switches: 0,
        }
    }

    /// Compute the raw (unsmoothed) scores for a snapshot.
    pub fn evaluate(&self, snapshot: &WorldSnapshot) -> ValueScore {
        let cfg = &self.config;
        let threat = if snapshot.threat_level.is_nan() {
            0.0
        } else {
            snapshot.threat_level.clamp(0.0, 1.0)
        };

        let mut infrastructure = cfg.infrastructure_baseline;
        if snapshot.missing_required().next().is_some() {
            infrastructure += cfg.missing_facility_bonus;
        }
        if snapshot.tokens == 0 {
            infrastructure += cfg.saturated_tokens_bonus;
        }
        infrastructure = cfg.bank_bonus.mul_add(
            excess_ratio(snapshot.balances.fast, cfg.fast_bank_threshold),
            infrastructure,
        );
        infrastructure = cfg.threat_weight.mul_add(-threat, infrastructure);

        let mut throughput = cfg.bank_bonus.mul_add(
            excess_ratio(snapshot.balances.slow, cfg.slow_bank_threshold),
            cfg.throughput_baseline,
        );
        throughput = cfg.threat_weight.mul_add(threat, throughput);

        let own = f64::from(snapshot.own_unit_count());
        let opponent = f64::from(snapshot.opponent_unit_count());
        if opponent > own {
            let deficit = (opponent - own) / opponent;
            throughput = cfg
                .army_deficit_weight
                .mul_add(deficit.clamp(0.0, 1.0), throughput);
        }

        ValueScore::clamped(infrastructure, throughput)
    }

    /// Whether an evaluation is due on `tick`.
    pub fn is_due(&self, tick: Tick) -> bool {
        self.last_evaluated.is_none_or(|last| {
            tick.saturating_sub(last) >= self.config.evaluation_interval_ticks
        })
    }

    /// Re-evaluate if due and return the mode for `tick`.
    pub fn update(&mut self, tick: Tick, snapshot: &WorldSnapshot) -> OperatingMode {
        if !self.is_due(tick) {
            return self.mode;
        }

        let raw = self.evaluate(snapshot);
        let score = self
            .score
            .map_or(raw, |previous| previous.blend(raw, self.config.decay));
        let mode = select_mode(score, self.config.hysteresis_factor);

        debug!(
            tick,
            infrastructure = score.infrastructure,
            throughput = score.throughput,
            %mode,
            "Value scores evaluated"
        );
        if mode != self.mode {
            self.switches = self.switches.saturating_add(1);
            info!(
                tick,
                from = %self.mode,
                to = %mode,
                infrastructure = score.infrastructure,
                throughput = score.throughput,
                "Operating mode switched"
            );
        }

        self.score = Some(score);
        self.mode = mode;
        self.last_evaluated = Some(tick);
        mode
    }

    /// Mode selected by the last evaluation.
    pub const fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Smoothed score from the last evaluation.
    pub const fn score(&self) -> Option<ValueScore> {
        self.score
    }

    /// Number of mode switches so far.
    pub const fn switches(&self) -> u64 {
        self.switches
    }
}
