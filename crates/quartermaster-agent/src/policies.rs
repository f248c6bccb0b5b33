//! Sample decision policies.
//!
//! Five small subsystems that exercise every scheduling path: a
//! throughput spender, two competing infrastructure builders, a slow
//! cadence planner, and an emergency responder that ignores the mode.
//! Refusals from the ledger are normal and end the policy's turn quietly;
//! only unexpected states are reported as errors.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use quartermaster_core::subsystem::{ConstructError, Subsystem, SubsystemError, TickContext};
use quartermaster_types::{FacilityType, ResourceCost, SubsystemRole};

use crate::sim::{GUARD, PRODUCTION_HUB, WORKER};

/// Facility that raises the worker cap.
pub const DEPOT: &str = "depot";

/// Static defense facility.
pub const WATCHTOWER: &str = "watchtower";

/// Workers supported by the base plus each depot.
const WORKERS_PER_DEPOT: u32 = 8;

/// Workers that justify one more production hub.
const WORKERS_PER_HUB: u32 = 10;

/// Guards trained per tick at most.
const MAX_GUARDS_PER_TICK: u32 = 3;

/// Threat above which a watchtower is requested.
const WATCHTOWER_THREAT: f64 = 0.8;

fn worker_cost() -> ResourceCost {
    ResourceCost::new(Decimal::new(50, 0), Decimal::ZERO, 1)
}

fn guard_cost() -> ResourceCost {
    ResourceCost::new(Decimal::new(100, 0), Decimal::ZERO, 1)
}

fn hub_cost() -> ResourceCost {
    ResourceCost::fast_only(Decimal::new(300, 0))
}

fn depot_cost() -> ResourceCost {
    ResourceCost::fast_only(Decimal::new(100, 0))
}

fn watchtower_cost() -> ResourceCost {
    ResourceCost::fast_only(Decimal::new(150, 0))
}

fn research_cost() -> ResourceCost {
    ResourceCost::new(Decimal::new(100, 0), Decimal::new(100, 0), 0)
}

/// Try one construction and treat the expected refusals as a quiet no-op.
fn try_construct(
    ctx: &mut TickContext<'_>,
    facility: &FacilityType,
    cost: &ResourceCost,
) -> Result<(), SubsystemError> {
    match ctx.construct(facility, cost) {
        Ok(_) => Ok(()),
        Err(ConstructError::Abandoned { facility }) => {
            warn!(tick = ctx.tick(), %facility, "Construction abandoned, will retry from primary site");
            Ok(())
        }
        Err(err) => {
            debug!(tick = ctx.tick(), %facility, error = %err, "Construction deferred");
            Ok(())
        }
    }
}

// -----------------------------------------------------------------------
// Worker trainer
// -----------------------------------------------------------------------

/// Trains workers up to the depot-supported cap.
#[derive(Debug, Default)]
pub struct WorkerTrainer;

impl Subsystem for WorkerTrainer {
    fn name(&self) -> &str {
        "worker_trainer"
    }

    fn role(&self) -> SubsystemRole {
        SubsystemRole::Throughput
    }

    fn run(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let snapshot = ctx.snapshot();
        let depots = snapshot
            .facilities
            .get(&FacilityType::from(DEPOT))
            .copied()
            .unwrap_or(0);
        let cap = depots.saturating_add(1).saturating_mul(WORKERS_PER_DEPOT);
        let workers = snapshot.units.get(WORKER).copied().unwrap_or(0);
        let wanted = cap.saturating_sub(workers).min(snapshot.tokens);

        let cost = worker_cost();
        for _ in 0..wanted {
            if ctx.produce(WORKER, 1, &cost).is_err() {
                break;
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Production hub builder
// -----------------------------------------------------------------------

/// Adds production hubs as the workforce grows.
#[derive(Debug, Default)]
pub struct ProductionHubBuilder;

impl Subsystem for ProductionHubBuilder {
    fn name(&self) -> &str {
        "production_hub_builder"
    }

    fn role(&self) -> SubsystemRole {
        SubsystemRole::Infrastructure
    }

    fn cadence_ticks(&self) -> u64 {
        4
    }

    fn run(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let hub = FacilityType::from(PRODUCTION_HUB);
        let snapshot = ctx.snapshot();
        let workers = snapshot.units.get(WORKER).copied().unwrap_or(0);
        let wanted = workers.checked_div(WORKERS_PER_HUB).unwrap_or(0).saturating_add(1);
        if snapshot.facility_count(&hub) >= wanted {
            return Ok(());
        }
        try_construct(ctx, &hub, &hub_cost())
    }
}

// -----------------------------------------------------------------------
// Depot builder
// -----------------------------------------------------------------------

/// Builds depots when workers approach the cap.
///
/// Competes with [`ProductionHubBuilder`] for fast currency, and with any
/// other depot builder for the depot lease.
#[derive(Debug, Default)]
pub struct DepotBuilder;

impl Subsystem for DepotBuilder {
    fn name(&self) -> &str {
        "depot_builder"
    }

    fn role(&self) -> SubsystemRole {
        SubsystemRole::Infrastructure
    }

    fn cadence_ticks(&self) -> u64 {
        2
    }

    fn run(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let depot = FacilityType::from(DEPOT);
        let snapshot = ctx.snapshot();
        let depots = snapshot.facility_count(&depot);
        let cap = depots.saturating_add(1).saturating_mul(WORKERS_PER_DEPOT);
        let workers = snapshot.units.get(WORKER).copied().unwrap_or(0);
        if depots > 0 && workers.saturating_add(2) < cap {
            return Ok(());
        }
        try_construct(ctx, &depot, &depot_cost())
    }
}

// -----------------------------------------------------------------------
// Research planner
// -----------------------------------------------------------------------

/// Works through a fixed research order on a slow cadence.
#[derive(Debug)]
pub struct ResearchPlanner {
    topics: Vec<String>,
    next: usize,
}

impl ResearchPlanner {
    /// Create a planner for the given research order.
    pub fn new(topics: &[&str]) -> Self {
        Self {
            topics: topics.iter().map(|t| (*t).to_owned()).collect(),
            next: 0,
        }
    }
}

impl Default for ResearchPlanner {
    fn default() -> Self {
        Self::new(&["logistics", "armor", "weapons", "fortification"])
    }
}

impl Subsystem for ResearchPlanner {
    fn name(&self) -> &str {
        "research_planner"
    }

    fn role(&self) -> SubsystemRole {
        SubsystemRole::Infrastructure
    }

    fn cadence_ticks(&self) -> u64 {
        16
    }

    fn run(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let Some(topic) = self.topics.get(self.next) else {
            return Ok(());
        };
        let cost = research_cost();
        if !ctx.can_afford(&cost) {
            return Ok(());
        }
        ctx.research(topic, &cost)?;
        self.next = self.next.saturating_add(1);
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Emergency defense
// -----------------------------------------------------------------------

/// Trains guards against nearby hostiles and requests a watchtower under
/// heavy threat. Runs in every mode.
#[derive(Debug, Default)]
pub struct EmergencyDefense;

impl Subsystem for EmergencyDefense {
    fn name(&self) -> &str {
        "emergency_defense"
    }

    fn role(&self) -> SubsystemRole {
        SubsystemRole::Emergency
    }

    fn run(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let snapshot = ctx.snapshot();
        let hostiles = snapshot.hostiles_nearby;
        if hostiles == 0 {
            return Ok(());
        }
        let threat = snapshot.threat_level;
        let tower = FacilityType::from(WATCHTOWER);
        let has_tower = snapshot.facility_count(&tower) > 0;

        let cost = guard_cost();
        for _ in 0..hostiles.min(MAX_GUARDS_PER_TICK) {
            if ctx.produce(GUARD, 1, &cost).is_err() {
                break;
            }
        }

        if threat > WATCHTOWER_THREAT && !has_tower {
            try_construct(ctx, &tower, &watchtower_cost())?;
        }
        Ok(())
    }
}

/// The sample policy set, in registration (priority) order.
pub fn sample_policies() -> Vec<Box<dyn Subsystem>> {
    vec![
        Box::new(EmergencyDefense),
        Box::new(WorkerTrainer),
        Box::new(ProductionHubBuilder),
        Box::new(DepotBuilder),
        Box::new(ResearchPlanner::default()),
    ]
}
