//! Ordered subsystem registry.
//!
//! Subsystems register once at startup. Registration order is the
//! invocation order for every tick, and the effective cadence (the
//! subsystem's default or a configured override) is fixed at registration.
//! Only the scheduler mutates a descriptor after that.

use std::collections::BTreeMap;

use tracing::info;

use quartermaster_types::{SubsystemRole, Tick};

use crate::subsystem::Subsystem;

/// Errors raised while registering a subsystem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A subsystem with the same name is already registered.
    #[error("subsystem {name} is already registered")]
    Duplicate {
        /// The duplicated name.
        name: String,
    },

    /// The effective cadence was zero.
    #[error("subsystem {name} has a cadence of zero ticks")]
    ZeroCadence {
        /// The offending subsystem.
        name: String,
    },
}

/// Scheduling state for one registered subsystem.
pub struct SubsystemDescriptor {
    pub(crate) name: String,
    pub(crate) cadence_ticks: u64,
    pub(crate) role: SubsystemRole,
    pub(crate) handler: Box<dyn Subsystem>,
    pub(crate) consecutive_errors: u32,
    pub(crate) total_errors: u64,
    pub(crate) logged_errors: u32,
    pub(crate) last_run_tick: Option<Tick>,
}

impl SubsystemDescriptor {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective cadence in ticks.
    pub const fn cadence_ticks(&self) -> u64 {
        self.cadence_ticks
    }

    /// Declared role.
    pub const fn role(&self) -> SubsystemRole {
        self.role
    }

    /// Errors since the last successful run.
    pub const fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Errors over the whole run.
    pub const fn total_errors(&self) -> u64 {
        self.total_errors
    }

    /// Tick of the last attempted run.
    pub const fn last_run_tick(&self) -> Option<Tick> {
        self.last_run_tick
    }

    /// Whether the cadence allows a run on `tick`. A subsystem that never
    /// ran is always due.
    pub fn is_due(&self, tick: Tick) -> bool {
        self.last_run_tick
            .is_none_or(|last| tick.saturating_sub(last) >= self.cadence_ticks)
    }
}

impl core::fmt::Debug for SubsystemDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubsystemDescriptor")
            .field("name", &self.name)
            .field("cadence_ticks", &self.cadence_ticks)
            .field("role", &self.role)
            .field("consecutive_errors", &self.consecutive_errors)
            .field("total_errors", &self.total_errors)
            .field("last_run_tick", &self.last_run_tick)
            .finish_non_exhaustive()
    }
}

/// The typed, ordered list of subsystems.
#[derive(Debug, Default)]
pub struct SubsystemRegistry {
    descriptors: Vec<SubsystemDescriptor>,
}

impl SubsystemRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Append a subsystem. `overrides` maps subsystem names to cadences
    /// that replace the handler's default.
    pub fn register(
        &mut self,
        handler: Box<dyn Subsystem>,
        overrides: &BTreeMap<String, u64>,
    ) -> Result<(), RegistryError> {
        let name = handler.name().to_owned();
        if self.get(&name).is_some() {
            return Err(RegistryError::Duplicate { name });
        }
        let cadence_ticks = overrides
            .get(&name)
            .copied()
            .unwrap_or_else(|| handler.cadence_ticks());
        if cadence_ticks == 0 {
            return Err(RegistryError::ZeroCadence { name });
        }
        let role = handler.role();

        info!(
            subsystem = %name,
            cadence_ticks,
            ?role,
            position = self.descriptors.len(),
            "Subsystem registered"
        );
        self.descriptors.push(SubsystemDescriptor {
            name,
            cadence_ticks,
            role,
            handler,
            consecutive_errors: 0,
            total_errors: 0,
            logged_errors: 0,
            last_run_tick: None,
        });
        Ok(())
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&SubsystemDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SubsystemDescriptor> {
        self.descriptors.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SubsystemDescriptor> {
        self.descriptors.iter_mut()
    }

    /// Number of registered subsystems.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::subsystem::{SubsystemError, TickContext};

    struct Idle {
        name: &'static str,
        cadence: u64,
    }

    impl Subsystem for Idle {
        fn name(&self) -> &str {
            self.name
        }

        fn role(&self) -> SubsystemRole {
            SubsystemRole::Support
        }

        fn cadence_ticks(&self) -> u64 {
            self.cadence
        }

        fn run(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
            Ok(())
        }
    }

    fn idle(name: &'static str, cadence: u64) -> Box<dyn Subsystem> {
        Box::new(Idle { name, cadence })
    }

    #[test]
    fn registration_order_is_kept() {
        let mut registry = SubsystemRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(idle(name, 1), &BTreeMap::new()).unwrap();
        }
        let names: Vec<&str> = registry.iter().map(SubsystemDescriptor::name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = SubsystemRegistry::new();
        registry.register(idle("a", 1), &BTreeMap::new()).unwrap();
        let err = registry.register(idle("a", 2), &BTreeMap::new()).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate { name: "a".to_owned() });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn override_replaces_default_cadence() {
        let mut registry = SubsystemRegistry::new();
        let overrides = BTreeMap::from([("planner".to_owned(), 16)]);
        registry.register(idle("planner", 4), &overrides).unwrap();
        assert_eq!(registry.get("planner").unwrap().cadence_ticks(), 16);
    }

    #[test]
    fn zero_cadence_rejected() {
        let mut registry = SubsystemRegistry::new();
        let err = registry.register(idle("a", 0), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, RegistryError::ZeroCadence { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn due_from_last_run() {
        let mut registry = SubsystemRegistry::new();
        registry.register(idle("a", 5), &BTreeMap::new()).unwrap();
        let descriptor = registry.iter_mut().next().unwrap();
        assert!(descriptor.is_due(0));

        descriptor.last_run_tick = Some(10);
        assert!(!descriptor.is_due(14));
        assert!(descriptor.is_due(15));
    }
}
