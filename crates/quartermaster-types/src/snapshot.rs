//! The read-only world snapshot delivered to the scheduler once per tick.
//!
//! A [`WorldSnapshot`] is created by the perception layer, shared by every
//! subsystem invoked during the tick, and never mutated. It carries the
//! perceived economy, entity counts, external signals, and the outcomes of
//! commands issued on earlier ticks.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::structs::{CommandOutcome, FacilityType};
use crate::Tick;

/// An amount of each currency. Used for both balances and per-tick income.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Fast-currency amount.
    #[serde(default)]
    pub fast: Decimal,
    /// Slow-currency amount.
    #[serde(default)]
    pub slow: Decimal,
}

impl Balances {
    /// Build a balance pair.
    pub const fn new(fast: Decimal, slow: Decimal) -> Self {
        Self { fast, slow }
    }
}

/// Everything the scheduler and its subsystems may observe on one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// The tick this snapshot describes.
    pub tick: Tick,
    /// Game time elapsed since start, in seconds.
    #[serde(default)]
    pub elapsed_seconds: f64,
    /// Currency balances as perceived by the engine.
    #[serde(default)]
    pub balances: Balances,
    /// Exogenous income per tick for each currency.
    #[serde(default)]
    pub income: Balances,
    /// Production tokens as perceived by the engine.
    #[serde(default)]
    pub tokens: u32,
    /// Completed facilities by type.
    #[serde(default)]
    pub facilities: BTreeMap<FacilityType, u32>,
    /// Facilities under construction by type.
    #[serde(default)]
    pub facilities_pending: BTreeMap<FacilityType, u32>,
    /// Facility types the current strategy needs at least one of.
    #[serde(default)]
    pub required_facilities: Vec<FacilityType>,
    /// Own output units by name.
    #[serde(default)]
    pub units: BTreeMap<String, u32>,
    /// Observed opponent units by name.
    #[serde(default)]
    pub opponent_units: BTreeMap<String, u32>,
    /// Aggregate threat signal in `[0, 1]`.
    #[serde(default)]
    pub threat_level: f64,
    /// Number of hostile units near owned facilities.
    #[serde(default)]
    pub hostiles_nearby: u32,
    /// Outcomes of commands issued on earlier ticks.
    #[serde(default)]
    pub outcomes: Vec<CommandOutcome>,
}

impl WorldSnapshot {
    /// An otherwise empty snapshot for the given tick.
    pub fn at(tick: Tick) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    /// Completed plus pending count for a facility type.
    pub fn facility_count(&self, facility: &FacilityType) -> u32 {
        let built = self.facilities.get(facility).copied().unwrap_or(0);
        let pending = self.facilities_pending.get(facility).copied().unwrap_or(0);
        built.saturating_add(pending)
    }

    /// Required facility types with neither a completed nor a pending
    /// instance.
    pub fn missing_required(&self) -> impl Iterator<Item = &FacilityType> {
        self.required_facilities
            .iter()
            .filter(|facility| self.facility_count(facility) == 0)
    }

    /// Total own output units.
    pub fn own_unit_count(&self) -> u32 {
        self.units.values().fold(0_u32, |acc, n| acc.saturating_add(*n))
    }

    /// Total observed opponent units.
    pub fn opponent_unit_count(&self) -> u32 {
        self.opponent_units
            .values()
            .fold(0_u32, |acc, n| acc.saturating_add(*n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_ignores_pending() {
        let mut snapshot = WorldSnapshot::at(3);
        let depot = FacilityType::from("depot");
        let hub = FacilityType::from("production_hub");
        snapshot.required_facilities = vec![depot.clone(), hub.clone()];
        snapshot.facilities_pending.insert(depot, 1);

        let missing: Vec<&FacilityType> = snapshot.missing_required().collect();
        assert_eq!(missing, vec![&hub]);
    }

    #[test]
    fn unit_totals_saturate() {
        let mut snapshot = WorldSnapshot::at(0);
        snapshot.units.insert("worker".to_owned(), u32::MAX);
        snapshot.units.insert("guard".to_owned(), 5);
        snapshot.opponent_units.insert("raider".to_owned(), 7);
        assert_eq!(snapshot.own_unit_count(), u32::MAX);
        assert_eq!(snapshot.opponent_unit_count(), 7);
    }

    #[test]
    fn snapshot_deserializes_with_defaults() {
        let json = r#"{"tick": 12, "threat_level": 0.25}"#;
        let snapshot: Result<WorldSnapshot, _> = serde_json::from_str(json);
        assert!(snapshot.is_ok());
        let snapshot = snapshot.unwrap_or_default();
        assert_eq!(snapshot.tick, 12);
        assert!(snapshot.outcomes.is_empty());
    }
}
