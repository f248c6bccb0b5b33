//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `quartermaster.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure, and
//! provides a loader that reads and validates the file. Every field has a
//! default, so an empty document is a valid configuration.
//!
//! ```yaml
//! scheduler:
//!   error_mode: resilient
//!   max_error_logs: 5
//!   stale_reservation_ticks: 45
//!   cadence_overrides:
//!     research_planner: 16
//! arbiter:
//!   hysteresis_factor: 0.75
//! overflow:
//!   thresholds: { elevated: 400, critical: 800, extreme: 1500 }
//! backoff:
//!   base_delay_ticks: 2
//!   max_delay_ticks: 64
//!   failure_threshold: 3
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use quartermaster_ledger::LedgerSettings;
use quartermaster_types::{DrainClass, ResourceCost};

/// Environment variable overriding `scheduler.error_mode`.
pub const ERROR_MODE_ENV: &str = "QUARTERMASTER_ERROR_MODE";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// Frame scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Starting economy and token pool.
    #[serde(default)]
    pub economy: LedgerSettings,

    /// Value arbiter weights and hysteresis.
    #[serde(default)]
    pub arbiter: ArbiterConfig,

    /// Overflow thresholds and drain catalog.
    #[serde(default)]
    pub overflow: OverflowConfig,

    /// Construction retry backoff.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Tick driver bounds.
    #[serde(default)]
    pub run: RunConfig,
}

impl AgentConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// `QUARTERMASTER_ERROR_MODE` overrides `scheduler.error_mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] or [`ConfigError::Invalid`].
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.scheduler.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((name, _)) = self
            .scheduler
            .cadence_overrides
            .iter()
            .find(|(_, cadence)| **cadence == 0)
        {
            return invalid(format!("cadence override for {name} must be at least 1"));
        }
        if self.scheduler.stale_reservation_ticks == 0 {
            return invalid("stale_reservation_ticks must be at least 1".to_owned());
        }

        let factor = self.arbiter.hysteresis_factor;
        if !(factor > 0.0 && factor <= 1.0) {
            return invalid(format!("hysteresis_factor must be in (0, 1], got {factor}"));
        }
        let decay = self.arbiter.decay;
        if !(0.0..1.0).contains(&decay) {
            return invalid(format!("arbiter decay must be in [0, 1), got {decay}"));
        }
        if self.arbiter.evaluation_interval_ticks == 0 {
            return invalid("evaluation_interval_ticks must be at least 1".to_owned());
        }

        let t = &self.overflow.thresholds;
        if !(Decimal::ZERO < t.elevated && t.elevated < t.critical && t.critical < t.extreme) {
            return invalid(format!(
                "overflow thresholds must satisfy 0 < elevated < critical < extreme, got {} / {} / {}",
                t.elevated, t.critical, t.extreme
            ));
        }
        if let Some(option) = self
            .overflow
            .catalog
            .iter()
            .find(|option| option.cost.is_negative() || option.cost.fast <= Decimal::ZERO)
        {
            return invalid(format!(
                "drain option {} must have a positive fast cost",
                option.name
            ));
        }

        if self.backoff.base_delay_ticks == 0 {
            return invalid("backoff base_delay_ticks must be at least 1".to_owned());
        }
        if self.backoff.max_delay_ticks < self.backoff.base_delay_ticks {
            return invalid("backoff max_delay_ticks must be >= base_delay_ticks".to_owned());
        }
        if self.backoff.failure_threshold == 0 {
            return invalid("backoff failure_threshold must be at least 1".to_owned());
        }
        Ok(())
    }
}

fn invalid(reason: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid { reason })
}

/// How the scheduler treats an error raised by a subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Propagate the first error and end the step. For development.
    Strict,
    /// Count, rate-limit the logs, and continue with the next subsystem.
    #[default]
    Resilient,
}

impl core::str::FromStr for ErrorMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "resilient" => Ok(Self::Resilient),
            other => Err(ConfigError::Invalid {
                reason: format!("unknown error mode: {other}"),
            }),
        }
    }
}

/// Frame scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Strict or resilient failure handling.
    #[serde(default)]
    pub error_mode: ErrorMode,

    /// Error log lines emitted per subsystem before suppression.
    #[serde(default = "default_max_error_logs")]
    pub max_error_logs: u32,

    /// Age in ticks after which an unresolved reservation is released.
    #[serde(default = "default_stale_reservation_ticks")]
    pub stale_reservation_ticks: u64,

    /// Per-subsystem cadence overrides, by subsystem name.
    #[serde(default)]
    pub cadence_overrides: BTreeMap<String, u64>,

    /// Soft per-invocation time budget in microseconds. Overruns are
    /// logged, never interrupted.
    #[serde(default = "default_soft_budget_micros")]
    pub soft_budget_micros: u64,

    /// Ticks between activity reports.
    #[serde(default = "default_report_interval_ticks")]
    pub report_interval_ticks: u64,
}

impl SchedulerConfig {
    /// Apply the `QUARTERMASTER_ERROR_MODE` environment override.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the variable holds an unknown
    /// mode.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var(ERROR_MODE_ENV) {
            self.error_mode = val.parse()?;
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            error_mode: ErrorMode::default(),
            max_error_logs: default_max_error_logs(),
            stale_reservation_ticks: default_stale_reservation_ticks(),
            cadence_overrides: BTreeMap::new(),
            soft_budget_micros: default_soft_budget_micros(),
            report_interval_ticks: default_report_interval_ticks(),
        }
    }
}

/// Value arbiter configuration.
///
/// Scores are built from weighted signals and clamped to `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArbiterConfig {
    /// Infrastructure wins when `infra > throughput * hysteresis_factor`.
    #[serde(default = "default_hysteresis_factor")]
    pub hysteresis_factor: f64,

    /// Ticks between score recomputations.
    #[serde(default = "default_evaluation_interval_ticks")]
    pub evaluation_interval_ticks: u64,

    /// Weight of the previous window in the blended score.
    #[serde(default = "default_decay")]
    pub decay: f64,

    /// Infrastructure baseline before signals.
    #[serde(default = "default_infrastructure_baseline")]
    pub infrastructure_baseline: f64,

    /// Throughput baseline before signals.
    #[serde(default = "default_throughput_baseline")]
    pub throughput_baseline: f64,

    /// Fixed infrastructure bonus per missing required facility.
    #[serde(default = "default_missing_facility_bonus")]
    pub missing_facility_bonus: f64,

    /// Infrastructure bonus while the token pool sits at its cap.
    #[serde(default = "default_saturated_tokens_bonus")]
    pub saturated_tokens_bonus: f64,

    /// Fast balance above which infrastructure gains a scaled bonus.
    #[serde(default = "default_fast_bank_threshold")]
    pub fast_bank_threshold: Decimal,

    /// Slow balance above which throughput gains a scaled bonus.
    #[serde(default = "default_slow_bank_threshold")]
    pub slow_bank_threshold: Decimal,

    /// Maximum scaled bank bonus.
    #[serde(default = "default_bank_bonus")]
    pub bank_bonus: f64,

    /// Threat weight: subtracted from infrastructure, added to throughput.
    #[serde(default = "default_threat_weight")]
    pub threat_weight: f64,

    /// Throughput bonus at full army deficit against the opponent.
    #[serde(default = "default_army_deficit_weight")]
    pub army_deficit_weight: f64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            hysteresis_factor: default_hysteresis_factor(),
            evaluation_interval_ticks: default_evaluation_interval_ticks(),
            decay: default_decay(),
            infrastructure_baseline: default_infrastructure_baseline(),
            throughput_baseline: default_throughput_baseline(),
            missing_facility_bonus: default_missing_facility_bonus(),
            saturated_tokens_bonus: default_saturated_tokens_bonus(),
            fast_bank_threshold: default_fast_bank_threshold(),
            slow_bank_threshold: default_slow_bank_threshold(),
            bank_bonus: default_bank_bonus(),
            threat_weight: default_threat_weight(),
            army_deficit_weight: default_army_deficit_weight(),
        }
    }
}

/// Fast-currency congestion thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OverflowThresholds {
    /// Start forcing output spending.
    #[serde(default = "default_elevated")]
    pub elevated: Decimal,
    /// Also build production capacity.
    #[serde(default = "default_critical")]
    pub critical: Decimal,
    /// Spend on anything static.
    #[serde(default = "default_extreme")]
    pub extreme: Decimal,
}

impl Default for OverflowThresholds {
    fn default() -> Self {
        Self {
            elevated: default_elevated(),
            critical: default_critical(),
            extreme: default_extreme(),
        }
    }
}

/// One action the overflow controller may take to drain balance.
///
/// For [`DrainClass::Output`] the name is the output unit; for the other
/// classes it is the facility type to construct.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DrainOption {
    /// Output or facility name.
    pub name: String,
    /// Which overflow level unlocks it.
    pub class: DrainClass,
    /// What it costs.
    pub cost: ResourceCost,
}

/// Overflow controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OverflowConfig {
    /// Level thresholds on the fast balance.
    #[serde(default)]
    pub thresholds: OverflowThresholds,

    /// Upper bound on drain actions issued in one tick.
    #[serde(default = "default_max_drain_actions")]
    pub max_drain_actions_per_tick: u32,

    /// Available drain actions.
    #[serde(default = "default_drain_catalog")]
    pub catalog: Vec<DrainOption>,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            thresholds: OverflowThresholds::default(),
            max_drain_actions_per_tick: default_max_drain_actions(),
            catalog: default_drain_catalog(),
        }
    }
}

/// Construction retry backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure, in ticks.
    #[serde(default = "default_base_delay_ticks")]
    pub base_delay_ticks: u64,

    /// Upper bound on the delay, in ticks.
    #[serde(default = "default_max_delay_ticks")]
    pub max_delay_ticks: u64,

    /// Consecutive failures before switching to alternate sites.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Alternate sites tried before the attempt is abandoned.
    #[serde(default = "default_max_alternate_sites")]
    pub max_alternate_sites: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ticks: default_base_delay_ticks(),
            max_delay_ticks: default_max_delay_ticks(),
            failure_threshold: default_failure_threshold(),
            max_alternate_sites: default_max_alternate_sites(),
        }
    }
}

/// Tick driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Stop after this many ticks (0 = until the source finishes).
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Real-time milliseconds between ticks.
    #[serde(default)]
    pub tick_interval_ms: u64,

    /// Seed for the simulated engine.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            tick_interval_ms: 0,
            seed: default_seed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_max_error_logs() -> u32 {
    5
}

const fn default_stale_reservation_ticks() -> u64 {
    45
}

const fn default_soft_budget_micros() -> u64 {
    2_000
}

const fn default_report_interval_ticks() -> u64 {
    100
}

const fn default_hysteresis_factor() -> f64 {
    0.75
}

const fn default_evaluation_interval_ticks() -> u64 {
    4
}

const fn default_decay() -> f64 {
    0.5
}

const fn default_infrastructure_baseline() -> f64 {
    20.0
}

const fn default_throughput_baseline() -> f64 {
    30.0
}

const fn default_missing_facility_bonus() -> f64 {
    40.0
}

const fn default_saturated_tokens_bonus() -> f64 {
    15.0
}

const fn default_fast_bank_threshold() -> Decimal {
    Decimal::from_parts(300, 0, 0, false, 0)
}

const fn default_slow_bank_threshold() -> Decimal {
    Decimal::from_parts(150, 0, 0, false, 0)
}

const fn default_bank_bonus() -> f64 {
    25.0
}

const fn default_threat_weight() -> f64 {
    35.0
}

const fn default_army_deficit_weight() -> f64 {
    20.0
}

const fn default_elevated() -> Decimal {
    Decimal::from_parts(400, 0, 0, false, 0)
}

const fn default_critical() -> Decimal {
    Decimal::from_parts(800, 0, 0, false, 0)
}

const fn default_extreme() -> Decimal {
    Decimal::from_parts(1500, 0, 0, false, 0)
}

const fn default_max_drain_actions() -> u32 {
    4
}

fn default_drain_catalog() -> Vec<DrainOption> {
    vec![
        DrainOption {
            name: "worker".to_owned(),
            class: DrainClass::Output,
            cost: ResourceCost::new(Decimal::new(50, 0), Decimal::ZERO, 1),
        },
        DrainOption {
            name: "guard".to_owned(),
            class: DrainClass::Output,
            cost: ResourceCost::new(Decimal::new(100, 0), Decimal::ZERO, 1),
        },
        DrainOption {
            name: "production_hub".to_owned(),
            class: DrainClass::ProductionCapacity,
            cost: ResourceCost::fast_only(Decimal::new(300, 0)),
        },
        DrainOption {
            name: "watchtower".to_owned(),
            class: DrainClass::Static,
            cost: ResourceCost::fast_only(Decimal::new(100, 0)),
        },
    ]
}

const fn default_base_delay_ticks() -> u64 {
    2
}

const fn default_max_delay_ticks() -> u64 {
    64
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_max_alternate_sites() -> u32 {
    4
}

const fn default_max_ticks() -> u64 {
    2_000
}

const fn default_seed() -> u64 {
    42
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = AgentConfig::default();
        assert_eq!(config.scheduler.stale_reservation_ticks, 45);
        assert_eq!(config.scheduler.error_mode, ErrorMode::Resilient);
        assert_eq!(config.scheduler.max_error_logs, 5);
        assert!((config.arbiter.hysteresis_factor - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.backoff.failure_threshold, 3);
        assert_eq!(config.overflow.thresholds.critical, dec!(800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_is_default() {
        let config = AgentConfig::parse("").unwrap();
        assert_eq!(config.backoff, BackoffConfig::default());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
scheduler:
  error_mode: strict
  max_error_logs: 2
  stale_reservation_ticks: 30
  cadence_overrides:
    research_planner: 16
    depot_builder: 3
economy:
  starting:
    fast: 75
    slow: 10
  starting_tokens: 2
  token_cap: 4
arbiter:
  hysteresis_factor: 0.8
overflow:
  thresholds:
    elevated: 500
    critical: 900
    extreme: 2000
  max_drain_actions_per_tick: 2
  catalog:
    - name: scout
      class: output
      cost: { fast: 25, tokens: 1 }
backoff:
  base_delay_ticks: 3
  max_delay_ticks: 48
  failure_threshold: 2
run:
  max_ticks: 300
";
        let config = AgentConfig::parse(yaml).unwrap();
        assert_eq!(config.scheduler.max_error_logs, 2);
        assert_eq!(config.scheduler.stale_reservation_ticks, 30);
        assert_eq!(
            config.scheduler.cadence_overrides.get("research_planner"),
            Some(&16)
        );
        assert_eq!(config.economy.starting.fast, dec!(75));
        assert_eq!(config.economy.token_cap, 4);
        assert!((config.arbiter.hysteresis_factor - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.overflow.thresholds.extreme, dec!(2000));
        assert_eq!(config.overflow.catalog.len(), 1);
        let scout = config.overflow.catalog.first().unwrap();
        assert_eq!(scout.class, DrainClass::Output);
        assert_eq!(scout.cost.tokens, 1);
        assert_eq!(config.backoff.max_delay_ticks, 48);
        assert_eq!(config.run.max_ticks, 300);
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let yaml = "overflow:\n  thresholds: { elevated: 900, critical: 800, extreme: 1500 }\n";
        let err = AgentConfig::parse(yaml);
        assert!(matches!(err, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_zero_cadence_override() {
        let yaml = "scheduler:\n  cadence_overrides:\n    depot_builder: 0\n";
        assert!(matches!(
            AgentConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_hysteresis_out_of_range() {
        let yaml = "arbiter:\n  hysteresis_factor: 1.5\n";
        assert!(matches!(
            AgentConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_max_delay_below_base() {
        let yaml = "backoff:\n  base_delay_ticks: 10\n  max_delay_ticks: 5\n";
        assert!(matches!(
            AgentConfig::parse(yaml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(
            AgentConfig::parse("scheduler: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn error_mode_from_str() {
        assert_eq!("Strict".parse::<ErrorMode>().unwrap(), ErrorMode::Strict);
        assert_eq!(" resilient ".parse::<ErrorMode>().unwrap(), ErrorMode::Resilient);
        assert!("lenient".parse::<ErrorMode>().is_err());
    }
}
