//! Overflow control: backpressure relief when income outpaces spending.
//!
//! The controller classifies the fast balance into an [`OverflowLevel`]
//! and, while the level is above `None`, forces spending through a
//! configured catalog of drain actions. Each class is unlocked by a level:
//!
//! - `Elevated`: produce the cheapest affordable output.
//! - `Critical`: also construct extra production capacity.
//! - `Extreme`: also construct static facilities purely to burn balance.
//!
//! Drain constructions do not take a build reservation, so they never
//! contend with subsystem leases. Drains run before regular subsystems and
//! ignore the arbiter's mode.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use quartermaster_ledger::ResourceLedger;
use quartermaster_types::{
    Command, CommandPayload, Currency, DrainClass, FacilityType, OverflowLevel, Placement, Tick,
    WorldSnapshot,
};

use crate::actuation::CommandSink;
use crate::config::{DrainOption, OverflowConfig, OverflowThresholds};

/// Name recorded as the issuer of drain commands.
pub const DRAIN_ISSUER: &str = "overflow";

/// What one drain pass did.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DrainOutcome {
    /// Level at the start of the pass.
    pub level: OverflowLevel,
    /// Commands issued.
    pub actions: u32,
    /// Fast currency spent.
    pub spent: Decimal,
}

/// Detects fast-currency congestion and spends it down.
#[derive(Debug, Clone)]
pub struct OverflowController {
    /// Level thresholds.
    thresholds: OverflowThresholds,
    /// Per-tick action bound.
    max_actions: u32,
    /// Drain options, cheapest fast cost first.
    catalog: Vec<DrainOption>,
    /// Level observed on the last update.
    level: OverflowLevel,
    /// Fast currency drained over the whole run.
    drained_total: Decimal,
    /// Drain actions over the whole run.
    actions_total: u64,
}

impl OverflowController {
    /// Create a controller. The catalog is sorted by fast cost, then name.
    pub fn new(config: OverflowConfig) -> Self {
        let mut catalog = config.catalog;
        catalog.sort_by(|a, b| {
            a.cost
                .fast
                .cmp(&b.cost.fast)
                .then_with(|| a.name.cmp(&b.name))
        });
        Self {
            thresholds: config.thresholds,
            max_actions: config.max_drain_actions_per_tick,
            catalog,
            level: OverflowLevel::None,
            drained_total: Decimal::ZERO,
            actions_total: 0,
        }
    }

    /// Classify a fast balance. A level applies once the balance exceeds
    /// its threshold.
    pub fn level_for(&self, fast: Decimal) -> OverflowLevel {
        if fast > self.thresholds.extreme {
            OverflowLevel::Extreme
        } else if fast > self.thresholds.critical {
            OverflowLevel::Critical
        } else if fast > self.thresholds.elevated {
            OverflowLevel::Elevated
        } else {
            OverflowLevel::None
        }
    }

    /// Classify the fast balance a snapshot reports.
    pub fn check_overflow(&self, snapshot: &WorldSnapshot) -> OverflowLevel {
        self.level_for(snapshot.balances.fast)
    }

    /// Record the level for `tick`, logging transitions.
    pub fn update(&mut self, tick: Tick, fast: Decimal) -> OverflowLevel {
        let level = self.level_for(fast);
        if level != self.level {
            info!(tick, from = ?self.level, to = ?level, %fast, "Overflow level changed");
            self.level = level;
        }
        level
    }

    /// Force-spend excess fast currency.
    ///
    /// Issues at most `max_drain_actions_per_tick` commands. Each action
    /// picks the cheapest affordable option whose class is unlocked at the
    /// current level, recomputed after every debit, and the pass stops once
    /// the balance no longer exceeds the elevated threshold.
    pub fn drain(
        &mut self,
        tick: Tick,
        ledger: &mut ResourceLedger,
        sink: &mut dyn CommandSink,
    ) -> DrainOutcome {
        let start_level = self.level_for(ledger.balance(Currency::Fast));
        let mut outcome = DrainOutcome {
            level: start_level,
            ..DrainOutcome::default()
        };

        while outcome.actions < self.max_actions {
            let level = self.level_for(ledger.balance(Currency::Fast));
            if level == OverflowLevel::None {
                break;
            }
            let Some(option) = self
                .catalog
                .iter()
                .find(|option| option.class.unlocked_at() <= level && ledger.can_afford(&option.cost))
            else {
                debug!(tick, ?level, "No affordable drain option");
                break;
            };
            if ledger.try_reserve(&option.cost).is_err() {
                break;
            }

            let payload = match option.class {
                DrainClass::Output => CommandPayload::Produce {
                    output: option.name.clone(),
                    count: 1,
                },
                DrainClass::ProductionCapacity | DrainClass::Static => CommandPayload::Construct {
                    facility: FacilityType::new(option.name.as_str()),
                    placement: Placement::Primary,
                },
            };
            let request_id = sink.issue(Command {
                tick,
                issued_by: DRAIN_ISSUER.to_owned(),
                payload,
                cost: option.cost.clone(),
            });
            debug!(tick, ?level, option = %option.name, %request_id, "Drain action issued");

            outcome.actions = outcome.actions.saturating_add(1);
            outcome.spent = outcome.spent.saturating_add(option.cost.fast);
        }

        if outcome.actions > 0 {
            self.actions_total = self.actions_total.saturating_add(u64::from(outcome.actions));
            self.drained_total = self.drained_total.saturating_add(outcome.spent);
            info!(
                tick,
                level = ?start_level,
                actions = outcome.actions,
                spent = %outcome.spent,
                remaining = %ledger.balance(Currency::Fast),
                "Overflow drained"
            );
        }
        outcome
    }

    /// Level observed on the last update.
    pub const fn level(&self) -> OverflowLevel {
        self.level
    }

    /// Fast currency drained over the run.
    pub const fn drained_total(&self) -> Decimal {
        self.drained_total
    }

    /// Drain actions issued over the run.
    pub const fn actions_total(&self) -> u64 {
        self.actions_total
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use quartermaster_ledger::LedgerSettings;
    use quartermaster_types::{Balances, ResourceCost};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::actuation::RecordingSink;

    fn ledger(fast: Decimal, tokens: u32) -> ResourceLedger {
        ResourceLedger::new(&LedgerSettings {
            starting: Balances::new(fast, Decimal::ZERO),
            starting_tokens: tokens,
            token_cap: 10,
            ..LedgerSettings::default()
        })
    }

    #[test]
    fn levels_follow_thresholds() {
        let controller = OverflowController::new(OverflowConfig::default());
        assert_eq!(controller.level_for(dec!(400)), OverflowLevel::None);
        assert_eq!(controller.level_for(dec!(401)), OverflowLevel::Elevated);
        assert_eq!(controller.level_for(dec!(801)), OverflowLevel::Critical);
        assert_eq!(controller.level_for(dec!(1501)), OverflowLevel::Extreme);

        let mut snapshot = WorldSnapshot::at(3);
        snapshot.balances = Balances::new(dec!(900), dec!(0));
        assert_eq!(controller.check_overflow(&snapshot), OverflowLevel::Critical);
    }

    #[test]
    fn elevated_only_produces_output() {
        let mut controller = OverflowController::new(OverflowConfig::default());
        let mut ledger = ledger(dec!(500), 0);
        let mut sink = RecordingSink::new();

        // No tokens: outputs are unaffordable and capacity is still locked.
        let outcome = controller.drain(1, &mut ledger, &mut sink);
        assert_eq!(outcome.actions, 0);
        assert_eq!(ledger.balance(Currency::Fast), dec!(500));
    }

    #[test]
    fn drain_stops_below_elevated() {
        let mut controller = OverflowController::new(OverflowConfig::default());
        let mut ledger = ledger(dec!(480), 5);
        let mut sink = RecordingSink::new();

        let outcome = controller.drain(1, &mut ledger, &mut sink);
        assert_eq!(outcome.actions, 2);
        assert_eq!(outcome.spent, dec!(100));
        assert_eq!(ledger.balance(Currency::Fast), dec!(380));
        assert!(sink.issued_by(DRAIN_ISSUER).all(|c| matches!(
            c.payload,
            CommandPayload::Produce { ref output, .. } if output == "worker"
        )));
    }

    #[test]
    fn drain_respects_action_bound() {
        let config = OverflowConfig {
            max_drain_actions_per_tick: 2,
            ..OverflowConfig::default()
        };
        let mut controller = OverflowController::new(config);
        let mut ledger = ledger(dec!(5000), 10);
        let mut sink = RecordingSink::new();

        let outcome = controller.drain(1, &mut ledger, &mut sink);
        assert_eq!(outcome.actions, 2);
        assert_eq!(sink.commands.len(), 2);
    }

    #[test]
    fn critical_builds_capacity_without_lease() {
        let mut controller = OverflowController::new(OverflowConfig::default());
        let mut ledger = ledger(dec!(1000), 0);
        let mut sink = RecordingSink::new();

        let outcome = controller.drain(1, &mut ledger, &mut sink);
        assert_eq!(outcome.level, OverflowLevel::Critical);
        assert!(outcome.actions >= 1);
        assert!(sink.commands.iter().any(|(_, c)| matches!(
            c.payload.facility(),
            Some(f) if f.as_str() == "production_hub"
        )));
        assert!(ledger.reservations().is_empty());
        assert!(ledger.balance(Currency::Fast) <= dec!(800));
    }

    #[test]
    fn static_drains_only_at_extreme() {
        let config = OverflowConfig {
            catalog: vec![DrainOption {
                name: "wall".to_owned(),
                class: DrainClass::Static,
                cost: ResourceCost::fast_only(dec!(100)),
            }],
            ..OverflowConfig::default()
        };
        let mut controller = OverflowController::new(config);
        let mut sink = RecordingSink::new();

        let mut critical = ledger(dec!(1200), 0);
        assert_eq!(controller.drain(1, &mut critical, &mut sink).actions, 0);

        let mut extreme = ledger(dec!(1700), 0);
        let outcome = controller.drain(1, &mut extreme, &mut sink);
        assert_eq!(outcome.actions, 2);
        assert_eq!(extreme.balance(Currency::Fast), dec!(1500));
    }

    #[test]
    fn totals_accumulate() {
        let mut controller = OverflowController::new(OverflowConfig::default());
        let mut ledger = ledger(dec!(480), 5);
        let mut sink = RecordingSink::new();
        controller.drain(1, &mut ledger, &mut sink);
        assert_eq!(controller.actions_total(), 2);
        assert_eq!(controller.drained_total(), dec!(100));
    }
}
