//! Enumeration types shared across the scheduler, ledger, and policies.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Currencies
// ---------------------------------------------------------------------------

/// One of the two continuously-accruing currencies.
///
/// `Fast` accrues quickly and is spent on almost everything; `Slow` accrues
/// at a fraction of the rate and gates advanced outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// The high-income primary currency.
    Fast,
    /// The low-income secondary currency.
    Slow,
}

// ---------------------------------------------------------------------------
// Arbitration
// ---------------------------------------------------------------------------

/// The spending mode selected by the value arbiter for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Infrastructure-building subsystems may spend.
    Infrastructure,
    /// Output-producing subsystems may spend.
    Throughput,
}

impl core::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Throughput => write!(f, "throughput"),
        }
    }
}

/// Congestion level of the fast currency.
///
/// Levels are ordered: `None < Elevated < Critical < Extreme`, so callers
/// can gate behavior with `level >= OverflowLevel::Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OverflowLevel {
    /// Balance is below every configured threshold.
    #[default]
    None,
    /// Balance exceeds the elevated threshold: force output spending.
    Elevated,
    /// Balance exceeds the critical threshold: also add production capacity.
    Critical,
    /// Balance exceeds the extreme threshold: spend on anything static.
    Extreme,
}

// ---------------------------------------------------------------------------
// Subsystems
// ---------------------------------------------------------------------------

/// The capability a subsystem declares at registration time.
///
/// The scheduler uses the role, together with the current
/// [`OperatingMode`] and [`OverflowLevel`], to decide whether an eligible
/// subsystem is allowed to run in a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemRole {
    /// Builds facilities. Runs in [`OperatingMode::Infrastructure`], or
    /// whenever overflow reaches [`OverflowLevel::Critical`].
    Infrastructure,
    /// Produces outputs. Runs in [`OperatingMode::Throughput`], or
    /// whenever overflow reaches [`OverflowLevel::Elevated`].
    Throughput,
    /// Reacts to threats. Always runs regardless of mode.
    Emergency,
    /// Non-spending bookkeeping. Always runs.
    Support,
}

impl SubsystemRole {
    /// Whether a subsystem with this role may run under the given mode and
    /// overflow level.
    pub fn permitted(self, mode: OperatingMode, overflow: OverflowLevel) -> bool {
        match self {
            Self::Emergency | Self::Support => true,
            Self::Infrastructure => {
                mode == OperatingMode::Infrastructure || overflow >= OverflowLevel::Critical
            }
            Self::Throughput => {
                mode == OperatingMode::Throughput || overflow >= OverflowLevel::Elevated
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Placement strategy for the next construction attempt of a facility type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// The policy's preferred site.
    Primary,
    /// The n-th site of the alternate-site search (0-based).
    AlternateSite {
        /// Index into the alternate candidate list.
        index: u32,
    },
    /// Every alternate site has been tried; the attempt was abandoned.
    Exhausted,
}

/// Category of a drain option used by the overflow controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainClass {
    /// Produce an output unit. Unlocked at [`OverflowLevel::Elevated`].
    Output,
    /// Build an additional production facility. Unlocked at
    /// [`OverflowLevel::Critical`].
    ProductionCapacity,
    /// Build any static/defensive facility purely to consume balance.
    /// Unlocked at [`OverflowLevel::Extreme`].
    Static,
}

impl DrainClass {
    /// The minimum overflow level at which this class may be used.
    pub const fn unlocked_at(self) -> OverflowLevel {
        match self {
            Self::Output => OverflowLevel::Elevated,
            Self::ProductionCapacity => OverflowLevel::Critical,
            Self::Static => OverflowLevel::Extreme,
        }
    }
}
