//! Core data structs: facility types, costs, commands and their outcomes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::Placement;
use crate::ids::RequestId;
use crate::Tick;

// ---------------------------------------------------------------------------
// Facility type
// ---------------------------------------------------------------------------

/// The kind of constructible facility subsystems compete for.
///
/// Facility types are opaque names supplied by the policy layer (for
/// example `"depot"` or `"production_hub"`). The reservation table keys its
/// leases on this type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacilityType(String);

impl FacilityType {
    /// Create a facility type from any string-like name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the facility name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FacilityType {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl core::fmt::Display for FacilityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

/// The price of one action: amounts of both currencies plus production
/// tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCost {
    /// Fast-currency amount.
    #[serde(default)]
    pub fast: Decimal,
    /// Slow-currency amount.
    #[serde(default)]
    pub slow: Decimal,
    /// Production tokens consumed.
    #[serde(default)]
    pub tokens: u32,
}

impl ResourceCost {
    /// Build a cost from its three components.
    pub const fn new(fast: Decimal, slow: Decimal, tokens: u32) -> Self {
        Self { fast, slow, tokens }
    }

    /// A cost paid in fast currency only.
    pub const fn fast_only(fast: Decimal) -> Self {
        Self {
            fast,
            slow: Decimal::ZERO,
            tokens: 0,
        }
    }

    /// Whether every component is zero.
    pub fn is_free(&self) -> bool {
        self.fast.is_zero() && self.slow.is_zero() && self.tokens == 0
    }

    /// Whether any component is negative. Negative costs are rejected by
    /// the ledger.
    pub fn is_negative(&self) -> bool {
        self.fast < Decimal::ZERO || self.slow < Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// What a command asks the external engine to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandPayload {
    /// Construct a facility.
    Construct {
        /// The facility to build.
        facility: FacilityType,
        /// Where to place it.
        placement: Placement,
    },
    /// Produce output units from an existing facility.
    Produce {
        /// Name of the output unit.
        output: String,
        /// Number of units.
        count: u32,
    },
    /// Start a research or upgrade.
    Research {
        /// Name of the research topic.
        topic: String,
    },
}

impl CommandPayload {
    /// The facility this payload constructs, if it is a construction.
    pub const fn facility(&self) -> Option<&FacilityType> {
        match self {
            Self::Construct { facility, .. } => Some(facility),
            Self::Produce { .. } | Self::Research { .. } => None,
        }
    }
}

/// A command handed to the actuation layer. Fire-and-forget: the result
/// is only visible on a later tick as a [`CommandOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Tick on which the command was issued.
    pub tick: Tick,
    /// Name of the subsystem (or privileged controller) that issued it.
    pub issued_by: String,
    /// What to do.
    pub payload: CommandPayload,
    /// What the ledger debited for it.
    pub cost: ResourceCost,
}

/// Status of a previously issued command as reported by perception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The engine accepted and completed the command.
    Confirmed,
    /// The engine rejected the command or it failed mid-way.
    Failed {
        /// Engine-supplied failure description.
        reason: String,
    },
}

/// The outcome of one issued command, delivered in a later snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// The request this outcome refers to.
    pub request_id: RequestId,
    /// What happened.
    pub status: OutcomeStatus,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn facility_type_display_and_serde() {
        let facility = FacilityType::from("depot");
        assert_eq!(facility.to_string(), "depot");
        let json = serde_json::to_string(&facility).ok();
        assert_eq!(json.as_deref(), Some("\"depot\""));
    }

    #[test]
    fn cost_helpers() {
        assert!(ResourceCost::default().is_free());
        let cost = ResourceCost::fast_only(dec!(50));
        assert!(!cost.is_free());
        assert!(!cost.is_negative());
        assert!(ResourceCost::new(dec!(-1), dec!(0), 0).is_negative());
        assert!(ResourceCost::new(dec!(0), dec!(-0.5), 0).is_negative());
    }

    #[test]
    fn payload_facility_only_for_construction() {
        let build = CommandPayload::Construct {
            facility: FacilityType::from("depot"),
            placement: Placement::Primary,
        };
        assert_eq!(build.facility().map(FacilityType::as_str), Some("depot"));
        let produce = CommandPayload::Produce {
            output: "worker".to_owned(),
            count: 1,
        };
        assert!(produce.facility().is_none());
    }

    #[test]
    fn outcome_status_serializes_with_tag() {
        let status = OutcomeStatus::Failed {
            reason: "blocked".to_owned(),
        };
        let json = serde_json::to_string(&status).ok();
        assert_eq!(
            json.as_deref(),
            Some(r#"{"status":"failed","reason":"blocked"}"#)
        );
    }
}
