//! References held against directory entities.
//!
//! A [`Relation`] is a foreign-key style reference from some other record
//! (a booking, a review, an expense) to a target entity. Merging moves every
//! relation targeting a removed entity onto the keeper. [`Usage`] summarizes
//! how many relations point at an entity and feeds keeper ranking.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityId;

/// Unique identifier for a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(Uuid);

impl RelationId {
    /// Creates a new random relation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a relation ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of record holds the reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// A booking of a vendor.
    Booking,
    /// A review left for a vendor.
    Review,
    /// A signed contract.
    Contract,
    /// A budget expense.
    Expense,
    /// A message thread.
    Message,
    /// A saved favorite.
    Favorite,
    /// A sales lead.
    Lead,
    /// An ownership claim.
    Claim,
    /// A seating assignment.
    Seating,
    /// An RSVP.
    Rsvp,
    /// Any other referencing record.
    Custom(String),
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Booking => write!(f, "booking"),
            Self::Review => write!(f, "review"),
            Self::Contract => write!(f, "contract"),
            Self::Expense => write!(f, "expense"),
            Self::Message => write!(f, "message"),
            Self::Favorite => write!(f, "favorite"),
            Self::Lead => write!(f, "lead"),
            Self::Claim => write!(f, "claim"),
            Self::Seating => write!(f, "seating"),
            Self::Rsvp => write!(f, "rsvp"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// A reference from an external record to a directory entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Unique relation id.
    pub id: RelationId,
    /// What kind of record holds the reference.
    pub kind: RelationKind,
    /// Id of the record holding the reference (booking id, review id, ...).
    pub source_id: Uuid,
    /// The entity being referenced. Rewritten on merge.
    pub target: EntityId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last retarget.
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    /// Creates a relation from a freshly generated source record id.
    #[must_use]
    pub fn new(kind: RelationKind, target: EntityId) -> Self {
        Self::from_source(kind, Uuid::new_v4(), target)
    }

    /// Creates a relation for an existing source record.
    #[must_use]
    pub fn from_source(kind: RelationKind, source_id: Uuid, target: EntityId) -> Self {
        let now = Utc::now();
        Self {
            id: RelationId::new(),
            kind,
            source_id,
            target,
            created_at: now,
            updated_at: now,
        }
    }

    /// Points this relation at a new target.
    pub fn retarget(&mut self, target: EntityId, at: DateTime<Utc>) {
        self.target = target;
        self.updated_at = at;
    }
}

/// Per-kind reference counts for one entity.
///
/// Keyed by the kind's display form so the summary serializes as a plain
/// JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Count per relation kind, keyed by its display form.
    pub counts: BTreeMap<String, u64>,
}

impl Usage {
    /// Creates an empty usage summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one reference of the given kind.
    pub fn record(&mut self, kind: &RelationKind) {
        *self.counts.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Adds `count` references of `kind`.
    #[must_use]
    pub fn with_count(mut self, kind: RelationKind, count: u64) -> Self {
        self.counts.insert(kind.to_string(), count);
        self
    }

    /// Count for a single kind.
    #[must_use]
    pub fn count(&self, kind: &RelationKind) -> u64 {
        self.counts.get(&kind.to_string()).copied().unwrap_or(0)
    }

    /// Sum over all kinds.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// True when nothing references the entity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl<'a> FromIterator<&'a Relation> for Usage {
    fn from_iter<I: IntoIterator<Item = &'a Relation>>(iter: I) -> Self {
        let mut usage = Self::new();
        for relation in iter {
            usage.record(&relation.kind);
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_totals_across_kinds() {
        let target = EntityId::new();
        let relations = vec![
            Relation::new(RelationKind::Booking, target),
            Relation::new(RelationKind::Booking, target),
            Relation::new(RelationKind::Review, target),
        ];
        let usage: Usage = relations.iter().collect();
        assert_eq!(usage.count(&RelationKind::Booking), 2);
        assert_eq!(usage.count(&RelationKind::Expense), 0);
        assert_eq!(usage.total(), 3);
    }

    #[test]
    fn empty_usage_is_zero() {
        assert!(Usage::new().is_empty());
        assert!(!Usage::new().with_count(RelationKind::Lead, 1).is_empty());
    }

    #[test]
    fn retarget_updates_target() {
        let mut r = Relation::new(RelationKind::Contract, EntityId::new());
        let keeper = EntityId::new();
        let at = Utc::now();
        r.retarget(keeper, at);
        assert_eq!(r.target, keeper);
        assert_eq!(r.updated_at, at);
    }

    #[test]
    fn usage_serializes_custom_kinds() {
        let usage = Usage::new().with_count(RelationKind::Custom("gift".into()), 2);
        let json = serde_json::to_value(&usage).unwrap();
        assert_eq!(json["counts"]["custom:gift"], 2);
    }

    #[test]
    fn relation_kind_serde_snake_case() {
        let json = serde_json::to_string(&RelationKind::Rsvp).unwrap();
        assert_eq!(json, "\"rsvp\"");
    }
}
