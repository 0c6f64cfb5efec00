//! Keeper selection for duplicate groups.
//!
//! Members are ordered by, in priority:
//!
//! 1. trusted (verified or claimed) before untrusted
//! 2. higher total usage before lower
//! 3. with an email before without
//! 4. with a website before without
//! 5. earlier position in the group
//!
//! The last key makes the ordering total, so the same group and usage always
//! produce the same keeper.

use std::cmp::{Ordering, Reverse};

use serde::{Deserialize, Serialize};

use crate::detect::{DuplicateGroup, GroupId};
use crate::entity::{EntityId, NamedEntity};

/// A group member with the signals used to rank it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMember {
    /// The ranked entity.
    pub entity: NamedEntity,
    /// Position in the group before ranking.
    pub position: usize,
    /// Zero-based rank; `0` is the suggested keeper.
    pub rank: usize,
    /// Verified or claimed.
    pub trusted: bool,
    /// Number of relations referencing the entity.
    pub total_usage: u64,
    /// A non-blank email is set.
    pub has_email: bool,
    /// A non-blank website is set.
    pub has_website: bool,
}

impl RankedMember {
    fn new(entity: NamedEntity, position: usize, total_usage: u64) -> Self {
        Self {
            trusted: entity.is_trusted(),
            has_email: entity.has_email(),
            has_website: entity.has_website(),
            entity,
            position,
            rank: 0,
            total_usage,
        }
    }

    #[allow(clippy::type_complexity)]
    fn sort_key(&self) -> (Reverse<bool>, Reverse<u64>, Reverse<bool>, Reverse<bool>, usize) {
        (
            Reverse(self.trusted),
            Reverse(self.total_usage),
            Reverse(self.has_email),
            Reverse(self.has_website),
            self.position,
        )
    }
}

/// Compares two members by keeper preference. `Less` means `a` is preferred.
#[must_use]
pub fn keeper_order(a: &RankedMember, b: &RankedMember) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

/// A duplicate group with its members in keeper order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedGroup {
    /// Id of the detected group.
    pub group_id: GroupId,
    /// Match key of the group's first member.
    pub key: String,
    /// Shared secondary key when grouping was scoped by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_key: Option<String>,
    /// Weakest direct match that joined the group.
    pub min_link_score: f64,
    /// Strongest direct match inside the group.
    pub max_link_score: f64,
    /// Id of the top-ranked member.
    pub suggested_keeper_id: EntityId,
    /// Members in keeper order.
    pub members: Vec<RankedMember>,
}

impl RankedGroup {
    /// The suggested keeper, or `None` for a group with no members, which
    /// only a hand-built or deserialized group can have.
    #[must_use]
    pub fn keeper(&self) -> Option<&RankedMember> {
        self.members.first()
    }

    /// Every member except the keeper, in rank order.
    #[must_use]
    pub fn remove_ids(&self) -> Vec<EntityId> {
        self.members.iter().skip(1).map(|m| m.entity.id).collect()
    }
}

/// Ranks members of a group.
///
/// `usage` returns the total reference count for an entity. Returns an empty
/// vector for an empty slice.
pub fn rank_members<F>(members: &[NamedEntity], mut usage: F) -> Vec<RankedMember>
where
    F: FnMut(EntityId) -> u64,
{
    let mut ranked: Vec<RankedMember> = members
        .iter()
        .enumerate()
        .map(|(position, entity)| RankedMember::new(entity.clone(), position, usage(entity.id)))
        .collect();
    ranked.sort_by(keeper_order);
    for (rank, member) in ranked.iter_mut().enumerate() {
        member.rank = rank;
    }
    ranked
}

/// Ranks a duplicate group and records its suggested keeper.
///
/// Returns `None` only for an empty group, which detection never produces.
pub fn rank_group<F>(group: &DuplicateGroup, usage: F) -> Option<RankedGroup>
where
    F: FnMut(EntityId) -> u64,
{
    let members = rank_members(&group.members, usage);
    let keeper = members.first()?.entity.id;
    Some(RankedGroup {
        group_id: group.group_id.clone(),
        key: group.key.clone(),
        secondary_key: group.secondary_key.clone(),
        min_link_score: group.min_link_score,
        max_link_score: group.max_link_score,
        suggested_keeper_id: keeper,
        members,
    })
}

/// Picks the keeper among `members`.
///
/// # Examples
///
/// ```
/// use dedupkit::{select_keeper, EntityKind, NamedEntity};
///
/// let plain = NamedEntity::new("Elegant Events", EntityKind::Vendor);
/// let verified = NamedEntity::new("Elegant Events Co", EntityKind::Vendor).with_verified(true);
/// let keeper = select_keeper(&[plain, verified.clone()], |_| 0).unwrap();
/// assert_eq!(keeper.id, verified.id);
/// ```
pub fn select_keeper<F>(members: &[NamedEntity], usage: F) -> Option<NamedEntity>
where
    F: FnMut(EntityId) -> u64,
{
    rank_members(members, usage)
        .into_iter()
        .next()
        .map(|m| m.entity)
}
