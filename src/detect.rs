//! Duplicate detection.
//!
//! Every unordered pair of entities is scored with
//! [`similarity_normalized`](crate::similarity::similarity_normalized) over
//! their [`match_key`](crate::similarity::match_key)s. A pair at or above the
//! threshold is a match, and matches are closed transitively with a
//! union-find: if A matches B and B matches C, all three form one group even
//! when A and C are below the threshold on their own.
//!
//! Exact-name grouping is the special case of a score of `1.0`. With
//! [`GroupScope::SameSecondaryKey`] only entities sharing a normalized
//! secondary key (a city, a household) are compared, which gives the
//! "same name in the same city" behavior for vendor directories.
//!
//! Entities of different [`EntityKind`]s are never compared.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityKind, NamedEntity};
use crate::error::ValidationError;
use crate::similarity::{match_key, normalize_name, similarity_normalized};

/// Default match threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.9;

/// Which pairs are eligible for comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupScope {
    /// Compare every pair of the same kind.
    #[default]
    All,
    /// Compare only pairs whose normalized secondary keys are equal.
    /// Entities without a secondary key only pair with each other.
    SameSecondaryKey,
}

/// Detection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minimum similarity for a pair to match, in `[0.0, 1.0]`.
    pub threshold: f64,
    /// Which pairs are eligible for comparison.
    #[serde(default)]
    pub scope: GroupScope,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            scope: GroupScope::All,
        }
    }
}

impl DetectionConfig {
    /// Config with the given threshold and the default scope.
    #[must_use]
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Sets the grouping scope.
    #[must_use]
    pub const fn with_scope(mut self, scope: GroupScope) -> Self {
        self.scope = scope;
        self
    }

    /// Validates the threshold range.
    ///
    /// # Errors
    /// `ThresholdOutOfRange` when the threshold is NaN or outside `[0.0, 1.0]`.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ValidationError::ThresholdOutOfRange {
                value: self.threshold,
            });
        }
        Ok(self)
    }
}

/// Stable identifier of a duplicate group.
///
/// Derived from the sorted member ids, so the same membership yields the
/// same id across requests regardless of input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Computes the id for a set of members.
    #[must_use]
    pub fn for_members(ids: &[EntityId]) -> Self {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"dedupkit.group.v1");
        for id in &sorted {
            hasher.update(id.as_uuid().as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        Self(hex[..32].to_string())
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of entities believed to be the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Stable id derived from the sorted member ids.
    pub group_id: GroupId,
    /// Kind shared by every member.
    pub kind: EntityKind,
    /// Match key of the first member.
    pub key: String,
    /// Shared normalized secondary key when grouping was scoped by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_key: Option<String>,
    /// Members in input order. Always at least two.
    pub members: Vec<NamedEntity>,
    /// Weakest direct match that joined this group.
    pub min_link_score: f64,
    /// Strongest direct match inside this group.
    pub max_link_score: f64,
}

impl DuplicateGroup {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when the group has no members. Detection never returns one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member ids in input order.
    #[must_use]
    pub fn member_ids(&self) -> Vec<EntityId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Whether `id` is a member.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

struct Candidate<'a> {
    entity: &'a NamedEntity,
    key: String,
    secondary: Option<String>,
}

/// Finds duplicate groups among a collection of entities.
///
/// # Examples
///
/// ```
/// use dedupkit::{DetectionConfig, DuplicateDetector, EntityKind, NamedEntity};
///
/// let entities = vec![
///     NamedEntity::new("Elegant Events", EntityKind::Vendor),
///     NamedEntity::new("Elegant Events Co", EntityKind::Vendor),
///     NamedEntity::new("Totally Different", EntityKind::Vendor),
/// ];
/// let detector = DuplicateDetector::new(DetectionConfig::default()).unwrap();
/// let groups = detector.find(&entities);
/// assert_eq!(groups.len(), 1);
/// assert_eq!(groups[0].len(), 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DuplicateDetector {
    config: DetectionConfig,
}

impl DuplicateDetector {
    /// Creates a detector after validating the config.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for an invalid threshold.
    pub fn new(config: DetectionConfig) -> Result<Self, ValidationError> {
        Ok(Self {
            config: config.validate()?,
        })
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Returns all groups of two or more matching entities.
    ///
    /// Groups are ordered by the input position of their first member and
    /// members keep input order. An id that appears more than once in the
    /// input is only considered at its first occurrence, and entities with a
    /// blank name are skipped.
    #[must_use]
    pub fn find(&self, entities: &[NamedEntity]) -> Vec<DuplicateGroup> {
        let candidates = self.candidates(entities);
        let n = candidates.len();
        let mut set = DisjointSet::new(n);
        let mut links: Vec<(usize, f64)> = Vec::new();

        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = (&candidates[i], &candidates[j]);
                if !self.comparable(a, b) {
                    continue;
                }
                let score = similarity_normalized(&a.key, &b.key);
                if score >= self.config.threshold {
                    set.union(i, j);
                    links.push((i, score));
                }
            }
        }

        let mut order: Vec<usize> = Vec::new();
        let mut members_by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..n {
            let root = set.find(i);
            let members = members_by_root.entry(root).or_default();
            if members.is_empty() {
                order.push(root);
            }
            members.push(i);
        }

        let mut scores_by_root: HashMap<usize, (f64, f64)> = HashMap::new();
        for (i, score) in links {
            let root = set.find(i);
            let entry = scores_by_root.entry(root).or_insert((score, score));
            entry.0 = entry.0.min(score);
            entry.1 = entry.1.max(score);
        }

        let groups: Vec<DuplicateGroup> = order
            .into_iter()
            .filter_map(|root| {
                let indices = members_by_root.remove(&root)?;
                if indices.len() < 2 {
                    return None;
                }
                let (min_link_score, max_link_score) =
                    scores_by_root.get(&root).copied().unwrap_or((1.0, 1.0));
                let first = &candidates[indices[0]];
                let members: Vec<NamedEntity> =
                    indices.iter().map(|&i| candidates[i].entity.clone()).collect();
                let ids: Vec<EntityId> = members.iter().map(|m| m.id).collect();
                Some(DuplicateGroup {
                    group_id: GroupId::for_members(&ids),
                    kind: first.entity.kind.clone(),
                    key: first.key.clone(),
                    secondary_key: match self.config.scope {
                        GroupScope::All => None,
                        GroupScope::SameSecondaryKey => first.secondary.clone(),
                    },
                    members,
                    min_link_score,
                    max_link_score,
                })
            })
            .collect();

        tracing::debug!(
            entities = entities.len(),
            compared = n,
            groups = groups.len(),
            threshold = self.config.threshold,
            "duplicate detection finished"
        );
        groups
    }

    fn candidates<'a>(&self, entities: &'a [NamedEntity]) -> Vec<Candidate<'a>> {
        let mut seen: HashSet<EntityId> = HashSet::with_capacity(entities.len());
        entities
            .iter()
            .filter(|e| seen.insert(e.id))
            .filter_map(|entity| {
                let key = match_key(&entity.name);
                if key.is_empty() {
                    return None;
                }
                let secondary = entity
                    .secondary_key
                    .as_deref()
                    .map(normalize_name)
                    .filter(|k| !k.is_empty());
                Some(Candidate {
                    entity,
                    key,
                    secondary,
                })
            })
            .collect()
    }

    fn comparable(&self, a: &Candidate<'_>, b: &Candidate<'_>) -> bool {
        if a.entity.kind != b.entity.kind {
            return false;
        }
        match self.config.scope {
            GroupScope::All => true,
            GroupScope::SameSecondaryKey => a.secondary == b.secondary,
        }
    }
}

/// Finds duplicate groups with the default scope.
///
/// # Errors
/// Returns a [`ValidationError`] for an invalid threshold.
pub fn find_duplicates(
    entities: &[NamedEntity],
    threshold: f64,
) -> Result<Vec<DuplicateGroup>, ValidationError> {
    Ok(DuplicateDetector::new(DetectionConfig::with_threshold(threshold))?.find(entities))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vendor(name: &str) -> NamedEntity {
        NamedEntity::new(name, EntityKind::Vendor)
    }

    fn names(group: &DuplicateGroup) -> Vec<&str> {
        group.members.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn groups_near_identical_vendor_names() {
        let entities = vec![
            vendor("Elegant Events"),
            vendor("Elegant Events Co"),
            vendor("Totally Different"),
        ];
        let groups = find_duplicates(&entities, 0.9).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0]), vec!["Elegant Events", "Elegant Events Co"]);
        assert!(!groups[0].contains(entities[2].id));
    }

    #[test]
    fn groups_are_transitive() {
        // a~b and b~c at 0.8, but a and c are further apart.
        let entities = vec![vendor("abcdefghij"), vendor("abcdefghXY"), vendor("abcdefZYXY")];
        assert!(crate::similarity::similarity("abcdefghij", "abcdefZYXY") < 0.75);

        let groups = find_duplicates(&entities, 0.75).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
        assert!(groups[0].min_link_score >= 0.75);
    }

    #[test]
    fn never_pairs_an_entity_with_itself() {
        let e = vendor("Solo Florist");
        let entities = vec![e.clone(), e.clone(), e];
        let groups = find_duplicates(&entities, 0.9).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn kinds_are_not_mixed() {
        let entities = vec![
            NamedEntity::new("Jordan Lee", EntityKind::Guest),
            NamedEntity::new("Jordan Lee", EntityKind::Vendor),
        ];
        assert!(find_duplicates(&entities, 0.9).unwrap().is_empty());
    }

    #[test]
    fn same_secondary_key_scope_splits_cities() {
        let entities = vec![
            vendor("Bloom Florist").with_secondary_key("Austin"),
            vendor("bloom florist").with_secondary_key(" austin "),
            vendor("Bloom Florist").with_secondary_key("Dallas"),
        ];

        let scoped = DuplicateDetector::new(
            DetectionConfig::default().with_scope(GroupScope::SameSecondaryKey),
        )
        .unwrap()
        .find(&entities);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].len(), 2);
        assert_eq!(scoped[0].secondary_key.as_deref(), Some("austin"));

        let unscoped = DuplicateDetector::new(DetectionConfig::default())
            .unwrap()
            .find(&entities);
        assert_eq!(unscoped.len(), 1);
        assert_eq!(unscoped[0].len(), 3);
    }

    #[test]
    fn blank_names_are_skipped() {
        let entities = vec![vendor(""), vendor("   ")];
        assert!(find_duplicates(&entities, 0.0).unwrap().is_empty());
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        assert!(matches!(
            find_duplicates(&[], 1.5),
            Err(ValidationError::ThresholdOutOfRange { .. })
        ));
        assert!(find_duplicates(&[], f64::NAN).is_err());
    }

    #[test]
    fn group_id_ignores_member_order() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert_eq!(GroupId::for_members(&[a, b]), GroupId::for_members(&[b, a]));
        assert_ne!(GroupId::for_members(&[a, b]), GroupId::for_members(&[a]));
    }

    #[test]
    fn groups_follow_input_order() {
        let entities = vec![
            vendor("Zed Photo"),
            vendor("Alpha Cakes"),
            vendor("Zed Photo LLC"),
            vendor("Alpha Cakes Inc"),
        ];
        let groups = find_duplicates(&entities, 0.9).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(names(&groups[0]), vec!["Zed Photo", "Zed Photo LLC"]);
        assert_eq!(names(&groups[1]), vec!["Alpha Cakes", "Alpha Cakes Inc"]);
    }
}
