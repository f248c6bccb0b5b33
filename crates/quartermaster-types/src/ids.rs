//! The command request identifier.
//!
//! Commands handed to the actuation layer are tracked by a [`RequestId`] so
//! that outcomes observed on later ticks can be matched back to the
//! reservation that produced them. IDs are UUID v7 (time-ordered), so
//! request IDs sort in issue order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier returned by the actuation layer for an issued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let first = RequestId::new();
        let second = RequestId::new();
        assert_ne!(first, second);
        assert_ne!(first.into_inner(), Uuid::nil());
    }

    #[test]
    fn request_ids_sort_in_issue_order() {
        let ids: Vec<RequestId> = (0..16).map(|_| RequestId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn id_display_matches_uuid() {
        let id = RequestId::new();
        assert_eq!(id.to_string(), id.into_inner().to_string());
    }

    #[test]
    fn id_serializes_as_bare_uuid() {
        let id = RequestId::from(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", Uuid::nil()));
    }
}
