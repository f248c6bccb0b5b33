//! Per-facility mutual-exclusion leases.
//!
//! The [`BuildReservationTable`] prevents two subsystems from issuing a
//! construction command for the same facility type in the same or adjacent
//! ticks. A lease is released when the construction is confirmed, when it
//! fails, or when [`BuildReservationTable::sweep`] finds it older than the
//! stale threshold (the command was sent but never resolved).
//!
//! Competition inside a single tick is resolved by call order: subsystems
//! run in registration order, so the first registered caller wins.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use quartermaster_types::{FacilityType, RequestId, Tick};

use crate::ReservationError;

/// A live construction lease on one facility type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    /// The reserved facility type.
    pub facility: FacilityType,
    /// Name of the subsystem holding the lease.
    pub holder: String,
    /// Tick on which the lease was acquired.
    pub acquired_at: Tick,
    /// Request issued under this lease, once known.
    pub request_id: Option<RequestId>,
}

impl Lease {
    /// Whether the lease is at least `stale_after` ticks old at `tick`.
    pub const fn is_stale(&self, tick: Tick, stale_after: u64) -> bool {
        tick.saturating_sub(self.acquired_at) >= stale_after
    }
}

/// The lease table: at most one entry per facility type.
#[derive(Debug, Clone, Default)]
pub struct BuildReservationTable {
    /// Live leases keyed by facility type.
    leases: BTreeMap<FacilityType, Lease>,
}

impl BuildReservationTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            leases: BTreeMap::new(),
        }
    }

    /// Acquire the lease on `facility` for `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Conflict`] if a live lease already
    /// exists, whoever holds it. Leases are not re-entrant.
    pub fn try_acquire(
        &mut self,
        facility: &FacilityType,
        holder: &str,
        tick: Tick,
    ) -> Result<(), ReservationError> {
        if let Some(existing) = self.leases.get(facility) {
            debug!(
                %facility,
                holder,
                current_holder = existing.holder,
                acquired_at = existing.acquired_at,
                "Reservation conflict"
            );
            return Err(ReservationError::Conflict {
                facility: facility.clone(),
                holder: existing.holder.clone(),
                acquired_at: existing.acquired_at,
            });
        }

        self.leases.insert(
            facility.clone(),
            Lease {
                facility: facility.clone(),
                holder: holder.to_owned(),
                acquired_at: tick,
                request_id: None,
            },
        );
        Ok(())
    }

    /// Bind the request issued under a lease so its outcome can release it.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::NotHeld`] if no lease exists.
    pub fn attach_request(
        &mut self,
        facility: &FacilityType,
        request_id: RequestId,
    ) -> Result<(), ReservationError> {
        let lease = self
            .leases
            .get_mut(facility)
            .ok_or_else(|| ReservationError::NotHeld {
                facility: facility.clone(),
            })?;
        lease.request_id = Some(request_id);
        Ok(())
    }

    /// Release the lease on `facility`, returning it if one was live.
    pub fn release(&mut self, facility: &FacilityType) -> Option<Lease> {
        self.leases.remove(facility)
    }

    /// Release whichever lease carries `request_id`.
    pub fn release_request(&mut self, request_id: RequestId) -> Option<Lease> {
        let facility = self
            .leases
            .values()
            .find(|lease| lease.request_id == Some(request_id))
            .map(|lease| lease.facility.clone())?;
        self.leases.remove(&facility)
    }

    /// Silently release every lease at least `stale_after` ticks old.
    ///
    /// Returns the released leases. Calling it again on the same tick
    /// releases nothing more.
    pub fn sweep(&mut self, tick: Tick, stale_after: u64) -> Vec<Lease> {
        let stale: Vec<FacilityType> = self
            .leases
            .values()
            .filter(|lease| lease.is_stale(tick, stale_after))
            .map(|lease| lease.facility.clone())
            .collect();

        let released: Vec<Lease> = stale
            .iter()
            .filter_map(|facility| self.leases.remove(facility))
            .collect();

        for lease in &released {
            info!(
                tick,
                facility = %lease.facility,
                holder = lease.holder,
                acquired_at = lease.acquired_at,
                "Stale reservation released"
            );
        }
        released
    }

    /// Whether a live lease exists for `facility`.
    pub fn is_reserved(&self, facility: &FacilityType) -> bool {
        self.leases.contains_key(facility)
    }

    /// The live lease for `facility`, if any.
    pub fn lease(&self, facility: &FacilityType) -> Option<&Lease> {
        self.leases.get(facility)
    }

    /// Number of live leases.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Whether no lease is live.
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Iterate live leases in facility-type order.
    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn facility(name: &str) -> FacilityType {
        FacilityType::from(name)
    }

    #[test]
    fn second_acquire_conflicts() {
        let mut table = BuildReservationTable::new();
        table.try_acquire(&facility("depot"), "supply", 4).unwrap();

        let err = table.try_acquire(&facility("depot"), "expansion", 4);
        assert_eq!(
            err,
            Err(ReservationError::Conflict {
                facility: facility("depot"),
                holder: "supply".to_owned(),
                acquired_at: 4,
            })
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn same_holder_is_not_reentrant() {
        let mut table = BuildReservationTable::new();
        table.try_acquire(&facility("depot"), "supply", 1).unwrap();
        assert!(table.try_acquire(&facility("depot"), "supply", 2).is_err());
    }

    #[test]
    fn different_facilities_do_not_conflict() {
        let mut table = BuildReservationTable::new();
        table.try_acquire(&facility("depot"), "supply", 1).unwrap();
        table.try_acquire(&facility("hub"), "supply", 1).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn release_allows_reacquire() {
        let mut table = BuildReservationTable::new();
        table.try_acquire(&facility("depot"), "supply", 1).unwrap();
        let lease = table.release(&facility("depot")).unwrap();
        assert_eq!(lease.holder, "supply");
        assert!(table.try_acquire(&facility("depot"), "expansion", 2).is_ok());
    }

    #[test]
    fn sweep_releases_only_stale_leases() {
        let mut table = BuildReservationTable::new();
        table.try_acquire(&facility("X"), "builder", 10).unwrap();

        // 54 - 10 = 44 < 45: kept.
        assert!(table.sweep(54, 45).is_empty());
        assert!(table.is_reserved(&facility("X")));

        // 56 - 10 = 46 >= 45: released.
        let released = table.sweep(56, 45);
        assert_eq!(released.len(), 1);
        assert!(!table.is_reserved(&facility("X")));
    }

    #[test]
    fn sweep_boundary_is_inclusive() {
        let mut table = BuildReservationTable::new();
        table.try_acquire(&facility("X"), "builder", 10).unwrap();
        assert_eq!(table.sweep(55, 45).len(), 1);
    }

    #[test]
    fn sweep_is_idempotent_within_a_tick() {
        let mut table = BuildReservationTable::new();
        table.try_acquire(&facility("a"), "one", 0).unwrap();
        table.try_acquire(&facility("b"), "two", 30).unwrap();

        let first = table.sweep(50, 45);
        assert_eq!(first.len(), 1);
        let second = table.sweep(50, 45);
        assert!(second.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn release_by_request_id() {
        let mut table = BuildReservationTable::new();
        let request = RequestId::new();
        table.try_acquire(&facility("depot"), "supply", 1).unwrap();
        table.attach_request(&facility("depot"), request).unwrap();

        assert!(table.release_request(RequestId::new()).is_none());
        let lease = table.release_request(request).unwrap();
        assert_eq!(lease.facility, facility("depot"));
        assert!(table.is_empty());
    }

    #[test]
    fn attach_without_lease_fails() {
        let mut table = BuildReservationTable::new();
        let err = table.attach_request(&facility("depot"), RequestId::new());
        assert!(matches!(err, Err(ReservationError::NotHeld { .. })));
    }
}
