//! Request execution against a directory store.
//!
//! [`DedupService`] is the synchronous entry point used by embedders and by
//! the gRPC transport. It validates every request before touching storage.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detect::{DetectionConfig, DuplicateDetector, GroupScope};
use crate::entity::{EntityId, EntityKind, NamedEntity};
use crate::error::{DedupError, DedupResult, ValidationError};
use crate::ir::{DedupRequest, Operation};
use crate::merge::MergeResult;
use crate::rank::{rank_group, RankedGroup};
use crate::storage::{DirectoryStore, StorageError};
use crate::usage::Relation;

/// Service configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Detection settings used when a request leaves them unset.
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl ServiceConfig {
    /// Checks that the defaults are usable.
    pub fn validate(self) -> Result<Self, ValidationError> {
        self.detection.validate()?;
        Ok(self)
    }
}

/// Duplicate groups of one entity kind with ranked members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Kind that was scanned.
    pub kind: EntityKind,
    /// Threshold used for matching.
    pub threshold: f64,
    /// Scope used for grouping.
    pub scope: GroupScope,
    /// Number of entities scanned.
    pub scanned: usize,
    /// Groups in order of their first member.
    pub groups: Vec<RankedGroup>,
}

impl DuplicateReport {
    /// Total number of entities that would be removed by merging every
    /// group into its suggested keeper.
    #[must_use]
    pub fn removable_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len() - 1).sum()
    }
}

/// Outcome of an auto-clean run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCleanResult {
    /// Groups merged into their keeper.
    pub groups_cleaned: usize,
    /// Entities deleted across all groups.
    pub total_deleted: usize,
    /// Relations moved across all groups.
    pub total_reassigned: usize,
}

/// Result of executing a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DedupResponse {
    /// Answer to `find_duplicates`.
    DuplicateReport(DuplicateReport),
    /// Answer to `merge`.
    Merge(MergeResult),
    /// Answer to `auto_clean`.
    AutoClean(AutoCleanResult),
}

/// Executes dedupkit requests against a [`DirectoryStore`].
#[derive(Clone)]
pub struct DedupService {
    store: Arc<dyn DirectoryStore>,
    config: ServiceConfig,
}

impl std::fmt::Debug for DedupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DedupService {
    /// Creates a service with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            store,
            config: ServiceConfig::default(),
        }
    }

    /// Creates a service with an explicit configuration.
    ///
    /// # Errors
    /// Returns a `ValidationError` if the default threshold is out of range.
    pub fn with_config(store: Arc<dyn DirectoryStore>, config: ServiceConfig) -> DedupResult<Self> {
        let config = config.validate()?;
        Ok(Self { store, config })
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Execute a request.
    pub fn execute(&self, request: DedupRequest) -> DedupResult<DedupResponse> {
        // Deserialized requests are untrusted.
        request.validate()?;
        debug!(request_id = %request.request_id, "executing request");

        match request.operation {
            Operation::FindDuplicates(payload) => {
                let config = payload.detection_config(self.config.detection);
                self.duplicate_report(&payload.kind, config)
                    .map(DedupResponse::DuplicateReport)
            }
            Operation::Merge(payload) => self
                .merge(payload.keep_id, &payload.remove_ids)
                .map(DedupResponse::Merge),
            Operation::AutoClean(payload) => {
                let config = payload.selection.detection_config(self.config.detection);
                self.auto_clean(&payload.selection.kind, config)
                    .map(DedupResponse::AutoClean)
            }
        }
    }

    /// Validates and stores a new entity.
    pub fn register_entity(&self, entity: NamedEntity) -> DedupResult<EntityId> {
        entity.validate()?;
        let id = entity.id;
        self.store.insert(entity)?;
        Ok(id)
    }

    /// Looks up an entity, reporting a missing one as an error.
    ///
    /// # Errors
    /// `StorageError::EntityNotFound` if no entity has this id, including one
    /// removed by a merge.
    pub fn get_entity(&self, id: EntityId) -> DedupResult<NamedEntity> {
        self.store
            .get(id)?
            .ok_or_else(|| StorageError::EntityNotFound(id).into())
    }

    /// Stores a relation against an existing entity.
    pub fn record_relation(&self, relation: Relation) -> DedupResult<()> {
        self.store.insert_relation(relation)?;
        Ok(())
    }

    /// Detects and ranks duplicate groups of one kind.
    pub fn duplicate_report(
        &self,
        kind: &EntityKind,
        config: DetectionConfig,
    ) -> DedupResult<DuplicateReport> {
        let detector = DuplicateDetector::new(config)?;
        let entities = self.store.list(Some(kind))?;
        let groups = detector.find(&entities);

        let mut totals = HashMap::new();
        for group in &groups {
            for member in &group.members {
                let usage = self.store.usage_for(member.id)?;
                totals.insert(member.id, usage.total());
            }
        }

        let groups: Vec<RankedGroup> = groups
            .iter()
            .filter_map(|g| rank_group(g, |id| totals.get(&id).copied().unwrap_or(0)))
            .collect();

        debug!(
            kind = %kind,
            scanned = entities.len(),
            groups = groups.len(),
            "duplicate report built"
        );

        Ok(DuplicateReport {
            kind: kind.clone(),
            threshold: config.threshold,
            scope: config.scope,
            scanned: entities.len(),
            groups,
        })
    }

    /// Merges `remove_ids` into `keep_id`.
    pub fn merge(&self, keep_id: EntityId, remove_ids: &[EntityId]) -> DedupResult<MergeResult> {
        let result = self.store.merge(keep_id, remove_ids)?;
        info!(
            keep_id = %keep_id,
            deleted = result.deleted_count,
            reassigned = result.reassigned_relation_count,
            "merge committed"
        );
        Ok(result)
    }

    /// Detects duplicates and merges each group into its suggested keeper.
    ///
    /// Each group is merged in its own transaction. If a merge fails the
    /// error is returned and groups merged before it stay merged.
    pub fn auto_clean(
        &self,
        kind: &EntityKind,
        config: DetectionConfig,
    ) -> DedupResult<AutoCleanResult> {
        let report = self.duplicate_report(kind, config)?;
        let mut merged = MergeResult::default();
        let mut groups_cleaned = 0;

        for group in &report.groups {
            let result = self
                .store
                .merge(group.suggested_keeper_id, &group.remove_ids())
                .map_err(|e| {
                    tracing::warn!(group_id = %group.group_id, error = %e, "auto-clean merge failed");
                    DedupError::from(e)
                })?;
            merged.accumulate(result);
            groups_cleaned += 1;
        }

        info!(
            kind = %kind,
            groups = groups_cleaned,
            deleted = merged.deleted_count,
            reassigned = merged.reassigned_relation_count,
            "auto-clean finished"
        );

        Ok(AutoCleanResult {
            groups_cleaned,
            total_deleted: merged.deleted_count,
            total_reassigned: merged.reassigned_relation_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MergeError;
    use crate::ir::{AutoCleanPayload, FindDuplicatesPayload, MergePayload};
    use crate::storage::{EntityStore, InMemoryStore, RelationStore};
    use crate::usage::RelationKind;

    fn service() -> DedupService {
        DedupService::new(Arc::new(InMemoryStore::new()))
    }

    fn vendor(svc: &DedupService, name: &str) -> EntityId {
        svc.register_entity(NamedEntity::new(name, EntityKind::Vendor))
            .unwrap()
    }

    fn book(svc: &DedupService, target: EntityId, n: usize) {
        for _ in 0..n {
            svc.record_relation(Relation::new(RelationKind::Booking, target))
                .unwrap();
        }
    }

    #[test]
    fn report_ranks_by_usage() {
        let svc = service();
        let a = vendor(&svc, "Elegant Events");
        let b = vendor(&svc, "Elegant Events Co");
        vendor(&svc, "Rustic Barn");
        book(&svc, b, 2);

        let report = svc
            .duplicate_report(&EntityKind::Vendor, DetectionConfig::default())
            .unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        assert_eq!(group.suggested_keeper_id, b);
        assert_eq!(group.remove_ids(), vec![a]);
        assert_eq!(group.keeper().unwrap().total_usage, 2);
        assert_eq!(report.removable_count(), 1);
    }

    #[test]
    fn execute_find_duplicates_uses_request_threshold() {
        let svc = service();
        vendor(&svc, "Bloom Florals");
        vendor(&svc, "Blum Florals");

        let strict = svc
            .execute(DedupRequest::new(Operation::FindDuplicates(
                FindDuplicatesPayload::new(EntityKind::Vendor),
            )))
            .unwrap();
        let DedupResponse::DuplicateReport(report) = strict else {
            panic!("expected report");
        };
        assert!(report.groups.is_empty());

        let loose = svc
            .execute(DedupRequest::new(Operation::FindDuplicates(
                FindDuplicatesPayload::new(EntityKind::Vendor).with_threshold(0.8),
            )))
            .unwrap();
        let DedupResponse::DuplicateReport(report) = loose else {
            panic!("expected report");
        };
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.threshold, 0.8);
    }

    #[test]
    fn execute_merge_reports_counts() {
        let svc = service();
        let keep = vendor(&svc, "A");
        let gone = vendor(&svc, "B");
        book(&svc, gone, 3);

        let resp = svc
            .execute(DedupRequest::new(Operation::Merge(MergePayload {
                keep_id: keep,
                remove_ids: vec![gone],
            })))
            .unwrap();
        assert_eq!(
            resp,
            DedupResponse::Merge(MergeResult {
                deleted_count: 1,
                reassigned_relation_count: 3,
            })
        );
        assert!(svc.store().get(gone).unwrap().is_none());
        assert!(svc.get_entity(gone).unwrap_err().is_not_found());
        assert_eq!(svc.get_entity(keep).unwrap().id, keep);
        assert_eq!(svc.store().usage_for(keep).unwrap().total(), 3);
    }

    #[test]
    fn merge_conflict_is_a_merge_error() {
        let svc = service();
        let keep = vendor(&svc, "A");
        let err = svc.merge(keep, &[keep]).unwrap_err();
        assert!(matches!(
            err,
            DedupError::Merge(MergeError::Conflict { keep_id }) if keep_id == keep
        ));
    }

    #[test]
    fn auto_clean_merges_every_group() {
        let svc = service();
        let a = vendor(&svc, "Elegant Events");
        let b = vendor(&svc, "Elegant Events Co");
        let c = vendor(&svc, "Rustic Barn");
        let d = vendor(&svc, "Rustic Barn");
        book(&svc, a, 1);
        book(&svc, d, 1);

        let resp = svc
            .execute(DedupRequest::new(Operation::AutoClean(AutoCleanPayload::new(
                EntityKind::Vendor,
            ))))
            .unwrap();
        assert_eq!(
            resp,
            DedupResponse::AutoClean(AutoCleanResult {
                groups_cleaned: 2,
                total_deleted: 2,
                total_reassigned: 0,
            })
        );

        let left: Vec<EntityId> = svc
            .store()
            .list(Some(&EntityKind::Vendor))
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(left, vec![a, d]);
        assert!(svc.store().get(b).unwrap().is_none());
        assert!(svc.store().get(c).unwrap().is_none());
    }

    #[test]
    fn auto_clean_leaves_other_kinds_alone() {
        let svc = service();
        svc.register_entity(NamedEntity::new("Sam Lee", EntityKind::Guest))
            .unwrap();
        svc.register_entity(NamedEntity::new("Sam Lee", EntityKind::Guest))
            .unwrap();

        let result = svc
            .auto_clean(&EntityKind::Vendor, DetectionConfig::default())
            .unwrap();
        assert_eq!(result, AutoCleanResult::default());
        assert_eq!(svc.store().list(Some(&EntityKind::Guest)).unwrap().len(), 2);
    }

    #[test]
    fn register_rejects_invalid_entity() {
        let svc = service();
        let err = svc
            .register_entity(NamedEntity::new("   ", EntityKind::Vendor))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ServiceConfig {
            detection: DetectionConfig::with_threshold(2.0),
        };
        assert!(DedupService::with_config(Arc::new(InMemoryStore::new()), config).is_err());
    }

    #[test]
    fn response_is_tagged_by_type() {
        let json = serde_json::to_value(DedupResponse::AutoClean(AutoCleanResult::default())).unwrap();
        assert_eq!(json["type"], "auto_clean");
        assert_eq!(json["groups_cleaned"], 0);
    }
}
