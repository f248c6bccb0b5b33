//! A seeded, in-process stand-in for the external game engine.
//!
//! The [`SimulatedEngine`] implements both sides of the engine boundary:
//! it produces a [`WorldSnapshot`] per tick and accepts fire-and-forget
//! commands. Construction takes a random number of ticks and may fail or
//! be lost outright; failures arrive as outcomes on a later snapshot, lost
//! commands never resolve and are left for the stale-lease sweep.
//! Opponent waves arrive periodically and raise the threat signal.
//!
//! All randomness comes from one `StdRng` seeded from config, so a run is
//! reproducible per seed (request IDs aside).

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use quartermaster_core::actuation::CommandSink;
use quartermaster_core::perception::{PerceptionError, SnapshotSource};
use quartermaster_types::{
    Balances, Command, CommandOutcome, CommandPayload, FacilityType, OutcomeStatus, Placement,
    RequestId, Tick, WorldSnapshot,
};

use crate::error::AgentError;

/// Facility that adds production slots and fast income.
pub const PRODUCTION_HUB: &str = "production_hub";

/// Output unit that adds fast income.
pub const WORKER: &str = "worker";

/// Output unit that fends off raiders.
pub const GUARD: &str = "guard";

/// Opponent unit name.
pub const RAIDER: &str = "raider";

// -----------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------

/// Simulated engine parameters, read from the `simulation` section of
/// `quartermaster.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Ticks until the session ends.
    #[serde(default = "default_session_ticks")]
    pub session_ticks: u64,

    /// Fast income per tick before workers and hubs.
    #[serde(default = "default_base_fast_income")]
    pub base_fast_income: Decimal,

    /// Slow income per tick.
    #[serde(default = "default_base_slow_income")]
    pub base_slow_income: Decimal,

    /// Extra fast income per worker.
    #[serde(default = "default_income_per_worker")]
    pub income_per_worker: Decimal,

    /// Extra fast income per completed production hub.
    #[serde(default = "default_income_per_hub")]
    pub income_per_hub: Decimal,

    /// Shortest construction time in ticks.
    #[serde(default = "default_build_ticks_min")]
    pub build_ticks_min: u64,

    /// Longest construction time in ticks.
    #[serde(default = "default_build_ticks_max")]
    pub build_ticks_max: u64,

    /// Probability that a primary-site construction fails.
    #[serde(default = "default_construction_failure_rate")]
    pub construction_failure_rate: f64,

    /// Probability that a construction command is silently lost.
    #[serde(default = "default_lost_command_rate")]
    pub lost_command_rate: f64,

    /// Production slots per hub (plus one base hub).
    #[serde(default = "default_slots_per_hub")]
    pub slots_per_hub: u32,

    /// Ticks a production order occupies its slot.
    #[serde(default = "default_production_ticks")]
    pub production_ticks: u64,

    /// Ticks between opponent waves.
    #[serde(default = "default_wave_interval_ticks")]
    pub wave_interval_ticks: u64,

    /// Ticks a wave stays near owned facilities.
    #[serde(default = "default_wave_duration_ticks")]
    pub wave_duration_ticks: u64,

    /// Raiders added per wave.
    #[serde(default = "default_wave_strength")]
    pub wave_strength: u32,

    /// Facility types the strategy needs at least one of.
    #[serde(default = "default_required_facilities")]
    pub required_facilities: Vec<String>,
}

impl SimulationConfig {
    /// Reject parameters the engine cannot run with.
    ///
    /// Rates feed straight into `random_bool`, so they must be finite
    /// probabilities.
    pub fn validate(&self) -> Result<(), AgentError> {
        for (name, rate) in [
            ("construction_failure_rate", self.construction_failure_rate),
            ("lost_command_rate", self.lost_command_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(AgentError::Simulation {
                    message: format!("{name} must be within [0, 1], got {rate}"),
                });
            }
        }
        if self.build_ticks_min > self.build_ticks_max {
            return Err(AgentError::Simulation {
                message: format!(
                    "build_ticks_min ({}) exceeds build_ticks_max ({})",
                    self.build_ticks_min, self.build_ticks_max
                ),
            });
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            session_ticks: default_session_ticks(),
            base_fast_income: default_base_fast_income(),
            base_slow_income: default_base_slow_income(),
            income_per_worker: default_income_per_worker(),
            income_per_hub: default_income_per_hub(),
            build_ticks_min: default_build_ticks_min(),
            build_ticks_max: default_build_ticks_max(),
            construction_failure_rate: default_construction_failure_rate(),
            lost_command_rate: default_lost_command_rate(),
            slots_per_hub: default_slots_per_hub(),
            production_ticks: default_production_ticks(),
            wave_interval_ticks: default_wave_interval_ticks(),
            wave_duration_ticks: default_wave_duration_ticks(),
            wave_strength: default_wave_strength(),
            required_facilities: default_required_facilities(),
        }
    }
}

const fn default_session_ticks() -> u64 {
    3000
}

fn default_base_fast_income() -> Decimal {
    Decimal::new(8, 0)
}

fn default_base_slow_income() -> Decimal {
    Decimal::new(2, 0)
}

fn default_income_per_worker() -> Decimal {
    Decimal::new(5, 1)
}

fn default_income_per_hub() -> Decimal {
    Decimal::new(3, 0)
}

const fn default_build_ticks_min() -> u64 {
    6
}

const fn default_build_ticks_max() -> u64 {
    14
}

const fn default_construction_failure_rate() -> f64 {
    0.2
}

const fn default_lost_command_rate() -> f64 {
    0.02
}

const fn default_slots_per_hub() -> u32 {
    2
}

const fn default_production_ticks() -> u64 {
    8
}

const fn default_wave_interval_ticks() -> u64 {
    150
}

const fn default_wave_duration_ticks() -> u64 {
    30
}

const fn default_wave_strength() -> u32 {
    6
}

fn default_required_facilities() -> Vec<String> {
    vec!["depot".to_owned(), PRODUCTION_HUB.to_owned()]
}

// -----------------------------------------------------------------------
// Engine
// -----------------------------------------------------------------------

/// A construction in progress.
#[derive(Debug, Clone)]
struct PendingBuild {
    request_id: RequestId,
    facility: FacilityType,
    complete_at: Tick,
    fails: bool,
}

/// The simulated external engine.
#[derive(Debug)]
pub struct SimulatedEngine {
    config: SimulationConfig,
    rng: StdRng,
    /// Last tick the world was advanced to.
    tick: Tick,
    balances: Balances,
    income: Balances,
    facilities: BTreeMap<FacilityType, u32>,
    pending: Vec<PendingBuild>,
    units: BTreeMap<String, u32>,
    raiders: u32,
    research: BTreeSet<String>,
    /// Completion ticks of production orders still occupying a slot.
    busy_slots: VecDeque<Tick>,
    /// Outcomes not yet delivered in a snapshot.
    outcomes: Vec<CommandOutcome>,
    last: Option<WorldSnapshot>,
    lost_commands: u64,
}

impl SimulatedEngine {
    /// Create an engine with the agent's starting balances.
    pub fn new(config: SimulationConfig, seed: u64, starting: Balances) -> Self {
        info!(
            seed,
            session_ticks = config.session_ticks,
            failure_rate = config.construction_failure_rate,
            "Simulated engine created"
        );
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
            balances: starting,
            income: Balances::default(),
            facilities: BTreeMap::new(),
            pending: Vec::new(),
            units: BTreeMap::new(),
            raiders: 0,
            research: BTreeSet::new(),
            busy_slots: VecDeque::new(),
            outcomes: Vec::new(),
            last: None,
            lost_commands: 0,
        }
    }

    /// Completed research topics.
    pub const fn research(&self) -> &BTreeSet<String> {
        &self.research
    }

    /// Construction commands that were silently dropped.
    pub const fn lost_commands(&self) -> u64 {
        self.lost_commands
    }

    fn count(map: &BTreeMap<String, u32>, key: &str) -> u32 {
        map.get(key).copied().unwrap_or(0)
    }

    fn hubs(&self) -> u32 {
        self.facilities
            .get(&FacilityType::from(PRODUCTION_HUB))
            .copied()
            .unwrap_or(0)
    }

    fn current_income(&self) -> Balances {
        let workers = Decimal::from(Self::count(&self.units, WORKER));
        let hubs = Decimal::from(self.hubs());
        let fast = self
            .config
            .base_fast_income
            .saturating_add(self.config.income_per_worker.saturating_mul(workers))
            .saturating_add(self.config.income_per_hub.saturating_mul(hubs));
        Balances::new(fast, self.config.base_slow_income)
    }

    fn slots(&self) -> u32 {
        self.hubs()
            .saturating_add(1)
            .saturating_mul(self.config.slots_per_hub)
    }

    fn free_slots(&self) -> u32 {
        let busy = u32::try_from(self.busy_slots.len()).unwrap_or(u32::MAX);
        self.slots().saturating_sub(busy)
    }

    fn wave_active(&self, tick: Tick) -> bool {
        let interval = self.config.wave_interval_ticks.max(1);
        tick >= interval
            && tick
                .checked_rem(interval)
                .is_some_and(|phase| phase < self.config.wave_duration_ticks)
    }

    fn hostiles_nearby(&self, tick: Tick) -> u32 {
        if self.wave_active(tick) {
            self.raiders
                .saturating_sub(Self::count(&self.units, GUARD))
        } else {
            0
        }
    }

    /// Advance the world by one tick.
    fn advance(&mut self, tick: Tick) {
        self.income = self.current_income();
        self.balances = Balances::new(
            self.balances.fast.saturating_add(self.income.fast),
            self.balances.slow.saturating_add(self.income.slow),
        );

        while self.busy_slots.front().is_some_and(|&done| done <= tick) {
            self.busy_slots.pop_front();
        }

        let (done, still): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|build| build.complete_at <= tick);
        self.pending = still;
        for build in done {
            let status = if build.fails {
                OutcomeStatus::Failed {
                    reason: "placement blocked".to_owned(),
                }
            } else {
                let count = self.facilities.entry(build.facility.clone()).or_insert(0);
                *count = count.saturating_add(1);
                OutcomeStatus::Confirmed
            };
            debug!(tick, facility = %build.facility, ?status, "Construction resolved");
            self.outcomes.push(CommandOutcome {
                request_id: build.request_id,
                status,
            });
        }

        let interval = self.config.wave_interval_ticks.max(1);
        if tick >= interval && tick.checked_rem(interval) == Some(0) {
            self.raiders = self.raiders.saturating_add(self.config.wave_strength);
            info!(tick, raiders = self.raiders, "Opponent wave arriving");
        }
    }

    fn snapshot_at(&mut self, tick: Tick) -> WorldSnapshot {
        let mut facilities_pending: BTreeMap<FacilityType, u32> = BTreeMap::new();
        for build in &self.pending {
            let count = facilities_pending.entry(build.facility.clone()).or_insert(0);
            *count = count.saturating_add(1);
        }

        let hostiles_nearby = self.hostiles_nearby(tick);
        let guards = Self::count(&self.units, GUARD);
        let threat_level = if hostiles_nearby == 0 {
            0.0
        } else {
            f64::from(hostiles_nearby) / f64::from(hostiles_nearby.saturating_add(guards))
        };

        // Converted for display only; bounded by session length.
        #[allow(clippy::cast_precision_loss)]
        let elapsed_seconds = tick as f64 / 16.0;

        WorldSnapshot {
            tick,
            elapsed_seconds,
            balances: self.balances,
            income: self.income,
            tokens: self.free_slots(),
            facilities: self.facilities.clone(),
            facilities_pending,
            required_facilities: self
                .config
                .required_facilities
                .iter()
                .map(|name| FacilityType::new(name.as_str()))
                .collect(),
            units: self.units.clone(),
            opponent_units: BTreeMap::from([(RAIDER.to_owned(), self.raiders)]),
            threat_level,
            hostiles_nearby,
            outcomes: std::mem::take(&mut self.outcomes),
        }
    }

    fn issue_construct(&mut self, request_id: RequestId, facility: FacilityType, placement: Placement) {
        let lost_rate = self.config.lost_command_rate.clamp(0.0, 1.0);
        if self.rng.random_bool(lost_rate) {
            self.lost_commands = self.lost_commands.saturating_add(1);
            debug!(%request_id, %facility, "Construction command lost");
            return;
        }

        // Alternate sites are picked for being clear, so they fail less.
        let base_rate = self.config.construction_failure_rate.clamp(0.0, 1.0);
        let failure_rate = match placement {
            Placement::Primary => base_rate,
            Placement::AlternateSite { .. } | Placement::Exhausted => base_rate / 2.0,
        };
        let fails = self.rng.random_bool(failure_rate);

        let min = self.config.build_ticks_min;
        let max = self.config.build_ticks_max.max(min);
        let build_ticks = self.rng.random_range(min..=max);
        self.pending.push(PendingBuild {
            request_id,
            facility,
            complete_at: self.tick.saturating_add(build_ticks),
            fails,
        });
    }
}

impl SnapshotSource for SimulatedEngine {
    fn snapshot(&mut self, tick: Tick) -> Result<WorldSnapshot, PerceptionError> {
        if let Some(last) = self.last.as_ref().filter(|last| last.tick == tick) {
            return Ok(last.clone());
        }
        if tick < self.tick {
            return Err(PerceptionError::Unavailable {
                tick,
                message: format!("engine already advanced to tick {}", self.tick),
            });
        }

        let from = self.tick.saturating_add(1);
        for step in from..=tick {
            self.advance(step);
        }
        self.tick = tick;

        let snapshot = self.snapshot_at(tick);
        self.last = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn finished(&self) -> bool {
        self.tick >= self.config.session_ticks
    }
}

impl CommandSink for SimulatedEngine {
    fn issue(&mut self, command: Command) -> RequestId {
        let request_id = RequestId::new();
        self.balances = Balances::new(
            self.balances
                .fast
                .saturating_sub(command.cost.fast)
                .max(Decimal::ZERO),
            self.balances
                .slow
                .saturating_sub(command.cost.slow)
                .max(Decimal::ZERO),
        );

        match command.payload {
            CommandPayload::Construct {
                facility,
                placement,
            } => self.issue_construct(request_id, facility, placement),
            CommandPayload::Produce { output, count } => {
                let units = self.units.entry(output).or_insert(0);
                *units = units.saturating_add(count);
                let done = self.tick.saturating_add(self.config.production_ticks);
                for _ in 0..command.cost.tokens {
                    self.busy_slots.push_back(done);
                }
            }
            CommandPayload::Research { topic } => {
                self.research.insert(topic);
            }
        }
        request_id
    }
}
