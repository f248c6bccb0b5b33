//! The resource ledger: two currencies and a production-token pool.
//!
//! Spending is immediate: [`ResourceLedger::try_reserve`] checks every
//! component of a cost and, only if all of them are covered, debits them in
//! the same call. There is no two-phase commit and no deferred debit.
//!
//! # Design
//!
//! - **Exact arithmetic**: balances are [`Decimal`]; the never-negative
//!   invariant is checked exactly, not within a float epsilon.
//! - **Single owner**: balances, tokens and leases are private; callers go
//!   through the methods here.
//! - **No panics**: every refusal is a [`ReserveError`] or
//!   [`ReservationError`](crate::ReservationError).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use quartermaster_types::{Balances, Currency, FacilityType, RequestId, ResourceCost, Tick};

use crate::reservation::{BuildReservationTable, Lease};
use crate::{LedgerError, ReservationError, ReserveError};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Initial economy and token-pool parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerSettings {
    /// Balances at tick 0.
    #[serde(default = "default_starting")]
    pub starting: Balances,

    /// Production tokens at tick 0.
    #[serde(default = "default_starting_tokens")]
    pub starting_tokens: u32,

    /// Tokens added per regeneration.
    #[serde(default = "default_token_regen_rate")]
    pub token_regen_rate: u32,

    /// Ticks between regenerations.
    #[serde(default = "default_token_regen_interval")]
    pub token_regen_interval_ticks: u64,

    /// Hard cap on the token pool.
    #[serde(default = "default_token_cap")]
    pub token_cap: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            starting: default_starting(),
            starting_tokens: default_starting_tokens(),
            token_regen_rate: default_token_regen_rate(),
            token_regen_interval_ticks: default_token_regen_interval(),
            token_cap: default_token_cap(),
        }
    }
}

fn default_starting() -> Balances {
    Balances::new(Decimal::new(50, 0), Decimal::ZERO)
}

const fn default_starting_tokens() -> u32 {
    3
}

const fn default_token_regen_rate() -> u32 {
    1
}

const fn default_token_regen_interval() -> u64 {
    8
}

const fn default_token_cap() -> u32 {
    6
}

// ---------------------------------------------------------------------------
// Token pool
// ---------------------------------------------------------------------------

/// A discrete, periodically regenerating capacity pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionTokenPool {
    /// Tokens currently available.
    count: u32,
    /// Tokens added per regeneration.
    regen_rate: u32,
    /// Ticks between regenerations.
    regen_interval: u64,
    /// Hard cap.
    cap: u32,
    /// Tick of the last regeneration.
    last_regen_tick: Tick,
}

impl ProductionTokenPool {
    /// Create a pool. The starting count is clamped to the cap, and a zero
    /// interval is treated as one.
    pub fn new(count: u32, regen_rate: u32, regen_interval: u64, cap: u32) -> Self {
        Self {
            count: count.min(cap),
            regen_rate,
            regen_interval: regen_interval.max(1),
            cap,
            last_regen_tick: 0,
        }
    }

    /// Tokens currently available.
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// The hard cap.
    pub const fn cap(&self) -> u32 {
        self.cap
    }

    /// Whether the pool is at its cap (regeneration is being wasted).
    pub const fn is_saturated(&self) -> bool {
        self.count >= self.cap
    }

    /// Add `regen_rate` tokens, up to the cap, if a full interval has passed
    /// since the last regeneration. Returns the number of tokens added.
    pub fn regenerate(&mut self, tick: Tick) -> u32 {
        if tick.saturating_sub(self.last_regen_tick) < self.regen_interval {
            return 0;
        }
        self.last_regen_tick = tick;
        let room = self.cap.saturating_sub(self.count);
        let added = self.regen_rate.min(room);
        self.count = self.count.saturating_add(added);
        added
    }

    fn take(&mut self, tokens: u32) {
        self.count = self.count.saturating_sub(tokens);
    }

    fn give_back(&mut self, tokens: u32) {
        self.count = self.count.saturating_add(tokens).min(self.cap);
    }
}

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

/// Running totals since the ledger was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerTotals {
    /// Fast currency credited.
    pub fast_credited: Decimal,
    /// Slow currency credited.
    pub slow_credited: Decimal,
    /// Fast currency spent (net of refunds).
    pub fast_spent: Decimal,
    /// Slow currency spent (net of refunds).
    pub slow_spent: Decimal,
    /// Tokens consumed (net of refunds).
    pub tokens_spent: u64,
    /// Tokens added by regeneration.
    pub tokens_regenerated: u64,
    /// Reservations accepted.
    pub reservations_accepted: u64,
    /// Reservations refused for lack of funds or tokens.
    pub reservations_refused: u64,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The authoritative economy for one agent run.
///
/// Owns the currency balances, the [`ProductionTokenPool`], and the
/// [`BuildReservationTable`]. Balances and tokens never go negative.
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    /// Current balances.
    balances: Balances,
    /// Exogenous income credited by [`apply_income`](Self::apply_income).
    income: Balances,
    /// Production capacity.
    tokens: ProductionTokenPool,
    /// Construction leases.
    reservations: BuildReservationTable,
    /// Running totals.
    totals: LedgerTotals,
}

impl ResourceLedger {
    /// Create a ledger from settings.
    pub fn new(settings: &LedgerSettings) -> Self {
        Self {
            balances: Balances::new(
                settings.starting.fast.max(Decimal::ZERO),
                settings.starting.slow.max(Decimal::ZERO),
            ),
            income: Balances::default(),
            tokens: ProductionTokenPool::new(
                settings.starting_tokens,
                settings.token_regen_rate,
                settings.token_regen_interval_ticks,
                settings.token_cap,
            ),
            reservations: BuildReservationTable::new(),
            totals: LedgerTotals::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Spending
    // -----------------------------------------------------------------------

    /// Check that every component of `cost` is covered and, if so, debit
    /// all of them.
    ///
    /// Components are checked in the order fast, slow, tokens; the first
    /// shortfall is reported. On error nothing is debited.
    ///
    /// # Errors
    ///
    /// Returns the [`ReserveError`] for the first uncovered component, or
    /// [`ReserveError::NegativeCost`].
    pub fn try_reserve(&mut self, cost: &ResourceCost) -> Result<(), ReserveError> {
        if let Err(err) = self.check(cost) {
            self.totals.reservations_refused = self.totals.reservations_refused.saturating_add(1);
            debug!(error = %err, "Reservation refused");
            return Err(err);
        }

        self.balances.fast = self.balances.fast.saturating_sub(cost.fast);
        self.balances.slow = self.balances.slow.saturating_sub(cost.slow);
        self.tokens.take(cost.tokens);

        self.totals.fast_spent = self.totals.fast_spent.saturating_add(cost.fast);
        self.totals.slow_spent = self.totals.slow_spent.saturating_add(cost.slow);
        self.totals.tokens_spent = self.totals.tokens_spent.saturating_add(u64::from(cost.tokens));
        self.totals.reservations_accepted = self.totals.reservations_accepted.saturating_add(1);
        Ok(())
    }

    /// Whether `cost` could be reserved right now, without debiting.
    pub fn can_afford(&self, cost: &ResourceCost) -> bool {
        self.check(cost).is_ok()
    }

    fn check(&self, cost: &ResourceCost) -> Result<(), ReserveError> {
        if cost.is_negative() {
            return Err(ReserveError::NegativeCost);
        }
        if self.balances.fast < cost.fast {
            return Err(ReserveError::InsufficientFast {
                requested: cost.fast,
                available: self.balances.fast,
            });
        }
        if self.balances.slow < cost.slow {
            return Err(ReserveError::InsufficientSlow {
                requested: cost.slow,
                available: self.balances.slow,
            });
        }
        if self.tokens.count() < cost.tokens {
            return Err(ReserveError::InsufficientTokens {
                requested: cost.tokens,
                available: self.tokens.count(),
            });
        }
        Ok(())
    }

    /// Return a previously debited cost (the caller aborted before issuing
    /// its command). Tokens are capped at the pool cap.
    pub fn refund(&mut self, cost: &ResourceCost) {
        if cost.is_negative() {
            warn!("Ignoring refund of negative cost");
            return;
        }
        self.balances.fast = self.balances.fast.saturating_add(cost.fast);
        self.balances.slow = self.balances.slow.saturating_add(cost.slow);
        self.tokens.give_back(cost.tokens);

        self.totals.fast_spent = self.totals.fast_spent.saturating_sub(cost.fast);
        self.totals.slow_spent = self.totals.slow_spent.saturating_sub(cost.slow);
        self.totals.tokens_spent = self.totals.tokens_spent.saturating_sub(u64::from(cost.tokens));
    }

    // -----------------------------------------------------------------------
    // Income and regeneration
    // -----------------------------------------------------------------------

    /// Credit exogenous income. Negative components are ignored.
    pub fn credit(&mut self, fast: Decimal, slow: Decimal) {
        if fast < Decimal::ZERO || slow < Decimal::ZERO {
            warn!(%fast, %slow, "Negative credit component ignored");
        }
        let fast = fast.max(Decimal::ZERO);
        let slow = slow.max(Decimal::ZERO);

        self.balances.fast = self.balances.fast.saturating_add(fast);
        self.balances.slow = self.balances.slow.saturating_add(slow);
        self.totals.fast_credited = self.totals.fast_credited.saturating_add(fast);
        self.totals.slow_credited = self.totals.slow_credited.saturating_add(slow);
    }

    /// Set the per-tick income rate (as perceived this tick).
    pub const fn set_income(&mut self, income: Balances) {
        self.income = income;
    }

    /// Credit one tick of the current income rate.
    pub fn apply_income(&mut self) {
        let income = self.income;
        self.credit(income.fast, income.slow);
    }

    /// Regenerate production tokens for `tick`. Returns tokens added.
    pub fn regenerate_tokens(&mut self, tick: Tick) -> u32 {
        let added = self.tokens.regenerate(tick);
        self.totals.tokens_regenerated = self
            .totals
            .tokens_regenerated
            .saturating_add(u64::from(added));
        added
    }

    // -----------------------------------------------------------------------
    // Construction reservations
    // -----------------------------------------------------------------------

    /// Acquire the lease on `facility` without spending.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Conflict`] if the facility is reserved.
    pub fn try_acquire(
        &mut self,
        facility: &FacilityType,
        holder: &str,
        tick: Tick,
    ) -> Result<(), ReservationError> {
        self.reservations.try_acquire(facility, holder, tick)
    }

    /// Acquire the lease on `facility` and debit `cost` as one step.
    ///
    /// If the lease is taken but the debit fails, the lease is released
    /// again before returning, so a failed call leaves no trace.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Reservation`] on a lease conflict (nothing is
    /// debited) or [`LedgerError::Funds`] on a shortfall (no lease is kept).
    pub fn try_reserve_construction(
        &mut self,
        facility: &FacilityType,
        holder: &str,
        cost: &ResourceCost,
        tick: Tick,
    ) -> Result<(), LedgerError> {
        self.reservations.try_acquire(facility, holder, tick)?;
        if let Err(err) = self.try_reserve(cost) {
            self.reservations.release(facility);
            return Err(err.into());
        }
        Ok(())
    }

    /// Bind an issued request to the lease on `facility`.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::NotHeld`] if no lease exists.
    pub fn attach_request(
        &mut self,
        facility: &FacilityType,
        request_id: RequestId,
    ) -> Result<(), ReservationError> {
        self.reservations.attach_request(facility, request_id)
    }

    /// Release the lease on `facility`.
    pub fn release(&mut self, facility: &FacilityType) -> Option<Lease> {
        self.reservations.release(facility)
    }

    /// Release the lease carrying `request_id`.
    pub fn release_request(&mut self, request_id: RequestId) -> Option<Lease> {
        self.reservations.release_request(request_id)
    }

    /// Release every lease at least `stale_after` ticks old.
    pub fn sweep(&mut self, tick: Tick, stale_after: u64) -> Vec<Lease> {
        self.reservations.sweep(tick, stale_after)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current balances.
    pub const fn balances(&self) -> Balances {
        self.balances
    }

    /// Current balance of one currency.
    pub const fn balance(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Fast => self.balances.fast,
            Currency::Slow => self.balances.slow,
        }
    }

    /// Current per-tick income rate.
    pub const fn income(&self) -> Balances {
        self.income
    }

    /// Tokens currently available.
    pub const fn tokens(&self) -> u32 {
        self.tokens.count()
    }

    /// The token pool.
    pub const fn token_pool(&self) -> &ProductionTokenPool {
        &self.tokens
    }

    /// The reservation table.
    pub const fn reservations(&self) -> &BuildReservationTable {
        &self.reservations
    }

    /// Running totals.
    pub const fn totals(&self) -> &LedgerTotals {
        &self.totals
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn ledger(fast: Decimal, slow: Decimal, tokens: u32) -> ResourceLedger {
        ResourceLedger::new(&LedgerSettings {
            starting: Balances::new(fast, slow),
            starting_tokens: tokens,
            token_regen_rate: 1,
            token_regen_interval_ticks: 1,
            token_cap: 10,
        })
    }

    #[test]
    fn token_limited_reservations() {
        let mut ledger = ledger(dec!(1000), dec!(0), 3);
        let cost = ResourceCost::new(dec!(100), dec!(0), 1);

        let results: Vec<Result<(), ReserveError>> =
            (0..6).map(|_| ledger.try_reserve(&cost)).collect();

        assert!(results.iter().take(3).all(Result::is_ok));
        for result in results.iter().skip(3) {
            assert_eq!(
                result,
                &Err(ReserveError::InsufficientTokens {
                    requested: 1,
                    available: 0,
                })
            );
        }
        assert_eq!(ledger.balance(Currency::Fast), dec!(700));
        assert_eq!(ledger.tokens(), 0);
        assert_eq!(ledger.totals().reservations_accepted, 3);
        assert_eq!(ledger.totals().reservations_refused, 3);
    }

    #[test]
    fn shortfall_debits_nothing() {
        let mut ledger = ledger(dec!(100), dec!(10), 2);
        let err = ledger.try_reserve(&ResourceCost::new(dec!(50), dec!(25), 1));
        assert_eq!(
            err,
            Err(ReserveError::InsufficientSlow {
                requested: dec!(25),
                available: dec!(10),
            })
        );
        assert_eq!(ledger.balances(), Balances::new(dec!(100), dec!(10)));
        assert_eq!(ledger.tokens(), 2);
    }

    #[test]
    fn fast_is_checked_first() {
        let mut ledger = ledger(dec!(10), dec!(0), 0);
        let err = ledger.try_reserve(&ResourceCost::new(dec!(50), dec!(25), 1));
        assert!(matches!(err, Err(ReserveError::InsufficientFast { .. })));
    }

    #[test]
    fn exact_balance_can_be_spent() {
        let mut ledger = ledger(dec!(75.5), dec!(0), 0);
        assert!(ledger.try_reserve(&ResourceCost::fast_only(dec!(75.5))).is_ok());
        assert_eq!(ledger.balance(Currency::Fast), Decimal::ZERO);
    }

    #[test]
    fn negative_cost_rejected() {
        let mut ledger = ledger(dec!(10), dec!(0), 0);
        let err = ledger.try_reserve(&ResourceCost::fast_only(dec!(-5)));
        assert_eq!(err, Err(ReserveError::NegativeCost));
        assert_eq!(ledger.balance(Currency::Fast), dec!(10));
    }

    #[test]
    fn credit_ignores_negative_components() {
        let mut ledger = ledger(dec!(10), dec!(5), 0);
        ledger.credit(dec!(-100), dec!(3));
        assert_eq!(ledger.balances(), Balances::new(dec!(10), dec!(8)));
        assert_eq!(ledger.totals().slow_credited, dec!(3));
    }

    #[test]
    fn income_is_credited_per_tick() {
        let mut ledger = ledger(dec!(0), dec!(0), 0);
        ledger.set_income(Balances::new(dec!(12.5), dec!(4)));
        ledger.apply_income();
        ledger.apply_income();
        assert_eq!(ledger.balances(), Balances::new(dec!(25), dec!(8)));
    }

    #[test]
    fn regeneration_respects_interval_and_cap() {
        let mut pool = ProductionTokenPool::new(4, 2, 5, 5);
        assert_eq!(pool.regenerate(3), 0);
        assert_eq!(pool.regenerate(5), 1);
        assert_eq!(pool.count(), 5);
        assert!(pool.is_saturated());
        assert_eq!(pool.regenerate(10), 0);
    }

    #[test]
    fn starting_tokens_clamped_to_cap() {
        let pool = ProductionTokenPool::new(50, 1, 1, 6);
        assert_eq!(pool.count(), 6);
    }

    #[test]
    fn refund_restores_spend() {
        let mut ledger = ledger(dec!(100), dec!(50), 2);
        let cost = ResourceCost::new(dec!(60), dec!(20), 1);
        ledger.try_reserve(&cost).unwrap();
        ledger.refund(&cost);
        assert_eq!(ledger.balances(), Balances::new(dec!(100), dec!(50)));
        assert_eq!(ledger.tokens(), 2);
        assert_eq!(ledger.totals().fast_spent, Decimal::ZERO);
    }

    #[test]
    fn construction_reservation_is_atomic() {
        let mut ledger = ledger(dec!(100), dec!(0), 0);
        let depot = FacilityType::from("depot");
        let expensive = ResourceCost::fast_only(dec!(150));

        let err = ledger.try_reserve_construction(&depot, "supply", &expensive, 1);
        assert!(matches!(err, Err(LedgerError::Funds { .. })));
        assert!(!ledger.reservations().is_reserved(&depot));

        let cheap = ResourceCost::fast_only(dec!(100));
        ledger
            .try_reserve_construction(&depot, "supply", &cheap, 1)
            .unwrap();
        assert!(ledger.reservations().is_reserved(&depot));
        assert_eq!(ledger.balance(Currency::Fast), Decimal::ZERO);
    }

    #[test]
    fn construction_conflict_debits_nothing() {
        let mut ledger = ledger(dec!(500), dec!(0), 0);
        let depot = FacilityType::from("depot");
        let cost = ResourceCost::fast_only(dec!(100));
        ledger
            .try_reserve_construction(&depot, "supply", &cost, 1)
            .unwrap();

        let err = ledger.try_reserve_construction(&depot, "expansion", &cost, 1);
        assert!(matches!(err, Err(LedgerError::Reservation { .. })));
        assert_eq!(ledger.balance(Currency::Fast), dec!(400));
    }

    #[test]
    fn settings_parse_from_yaml() {
        let yaml = "starting:\n  fast: 400\n  slow: 25.5\ntoken_cap: 9\n";
        let settings: LedgerSettings = serde_yml::from_str(yaml).unwrap();
        assert_eq!(settings.starting, Balances::new(dec!(400), dec!(25.5)));
        assert_eq!(settings.token_cap, 9);
        assert_eq!(settings.starting_tokens, 3);
    }
}
