// src/engine.rs
//
// Caller-facing surface of the resolution engine. One instance is shared by
// concurrent request handlers; request-scoped identity (submitter,
// resolver) is passed into each call rather than held as ambient state.

use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ResolutionError;
use crate::matching::run_search;
use crate::models::core::{QueueStats, ReviewQueueItem};
use crate::models::matching::{MatchResult, SubmissionOutcome, SubmissionRequest};
use crate::oracle::MatchOracle;
use crate::review;
use crate::storage::EntityStore;
use crate::submission;

pub struct ResolutionEngine {
    store: Arc<dyn EntityStore>,
    oracle: Arc<dyn MatchOracle>,
}

impl ResolutionEngine {
    pub fn new(store: Arc<dyn EntityStore>, oracle: Arc<dyn MatchOracle>) -> Self {
        Self { store, oracle }
    }

    /// Tiered candidate search. Queries shorter than two trimmed characters
    /// return an empty result without touching storage or the oracle.
    pub async fn search(
        &self,
        query: &str,
        include_unapproved: bool,
    ) -> Result<MatchResult, ResolutionError> {
        run_search(
            self.store.as_ref(),
            self.oracle.as_ref(),
            query,
            include_unapproved,
        )
        .await
    }

    /// Registers a submission: provisional entity + pending queue item,
    /// created atomically, returned immediately regardless of what the
    /// duplicate oracle thought.
    pub async fn submit(
        &self,
        request: SubmissionRequest,
    ) -> Result<SubmissionOutcome, ResolutionError> {
        submission::submit(self.store.as_ref(), self.oracle.as_ref(), request).await
    }

    pub async fn list_pending(&self) -> Result<Vec<ReviewQueueItem>, ResolutionError> {
        review::list_pending(self.store.as_ref()).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, ResolutionError> {
        Ok(self.store.queue_stats().await?)
    }

    pub async fn resolve_approve(
        &self,
        item_id: Uuid,
        resolver_id: Uuid,
        formatted_name: Option<String>,
    ) -> Result<ReviewQueueItem, ResolutionError> {
        review::approve(self.store.as_ref(), item_id, resolver_id, formatted_name).await
    }

    pub async fn resolve_merge(
        &self,
        item_id: Uuid,
        target_entity_id: Uuid,
        resolver_id: Uuid,
    ) -> Result<ReviewQueueItem, ResolutionError> {
        review::merge(self.store.as_ref(), item_id, target_entity_id, resolver_id).await
    }

    pub async fn resolve_delete(
        &self,
        item_id: Uuid,
        resolver_id: Uuid,
    ) -> Result<ReviewQueueItem, ResolutionError> {
        review::discard(self.store.as_ref(), item_id, resolver_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::core::{QueueStatus, Recommendation};
    use crate::models::matching::MatchTier;
    use crate::oracle::similarity::SimilarityOracle;
    use crate::oracle::{
        DuplicateAssessment, FuzzyQuery, FuzzyRanking, OracleError, SubmissionCheck,
    };
    use crate::storage::memory::MemoryStore;

    /// Oracle double that fails every call and counts invocations.
    struct FailingOracle {
        calls: AtomicUsize,
    }

    impl FailingOracle {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl crate::oracle::MatchOracle for FailingOracle {
        async fn rank_candidates(
            &self,
            _query: FuzzyQuery<'_>,
        ) -> Result<FuzzyRanking, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OracleError::Timeout)
        }

        async fn assess_submission(
            &self,
            _check: SubmissionCheck<'_>,
        ) -> Result<DuplicateAssessment, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OracleError::Timeout)
        }
    }

    fn engine_with(
        store: Arc<MemoryStore>,
        oracle: Arc<dyn crate::oracle::MatchOracle>,
    ) -> ResolutionEngine {
        ResolutionEngine::new(store, oracle)
    }

    fn similarity_engine() -> (Arc<MemoryStore>, ResolutionEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone(), Arc::new(SimilarityOracle::new()));
        (store, engine)
    }

    async fn seed_approved(engine: &ResolutionEngine, name: &str) -> Uuid {
        let outcome = engine
            .submit(SubmissionRequest::new(name, Uuid::new_v4()))
            .await
            .unwrap();
        engine
            .resolve_approve(outcome.queue_item.id, Uuid::new_v4(), None)
            .await
            .unwrap();
        outcome.entity.id
    }

    #[tokio::test]
    async fn short_queries_invoke_nothing() {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(FailingOracle::new());
        let engine = engine_with(store, oracle.clone());

        for query in ["", " ", "x", " x "] {
            let result = engine.search(query, true).await.unwrap();
            assert!(result.matches.is_empty());
            assert!(!result.likely_new);
        }
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn submission_creates_exactly_one_pair_and_is_searchable() {
        let (_store, engine) = similarity_engine();
        let submitter = Uuid::new_v4();

        let outcome = engine
            .submit(SubmissionRequest::new("Acme Specialty Fabricators LLC", submitter))
            .await
            .unwrap();

        assert!(!outcome.entity.approved);
        assert_eq!(
            outcome.queue_item.provisional_entity_id,
            Some(outcome.entity.id)
        );
        assert_eq!(outcome.queue_item.status, QueueStatus::Pending);
        assert_eq!(outcome.queue_item.submitted_by, submitter);

        let pending = engine.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, outcome.queue_item.id);

        // The provisional entity is immediately usable through search.
        let found = engine
            .search("Acme Specialty Fabricators LLC", true)
            .await
            .unwrap();
        assert!(found.matches.iter().any(|m| m.entity.id == outcome.entity.id));
        assert!(found.exact_match);

        // But hidden from searches that exclude unapproved entities.
        let hidden = engine
            .search("Acme Specialty Fabricators LLC", false)
            .await
            .unwrap();
        assert!(hidden.matches.is_empty());
    }

    #[tokio::test]
    async fn empty_name_submission_is_rejected() {
        let (_store, engine) = similarity_engine();
        let err = engine
            .submit(SubmissionRequest::new("   ", Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_roster_submission_recommends_new_and_approves_cleanly() {
        let (store, engine) = similarity_engine();
        let outcome = engine
            .submit(SubmissionRequest::new(
                "Acme Specialty Fabricators LLC",
                Uuid::new_v4(),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.recommendation, Recommendation::New);
        assert!(!outcome.entity.approved);

        let resolved = engine
            .resolve_approve(outcome.queue_item.id, Uuid::new_v4(), None)
            .await
            .unwrap();
        assert_eq!(resolved.status, QueueStatus::Approved);

        let approved = store.get_entity(outcome.entity.id).await.unwrap().unwrap();
        assert!(approved.approved);
        assert_eq!(approved.name, "Acme Specialty Fabricators LLC");
    }

    #[tokio::test]
    async fn abbreviated_resubmission_merges_into_existing() {
        let (store, engine) = similarity_engine();
        let target_id = seed_approved(&engine, "Turner Construction").await;

        let outcome = engine
            .submit(SubmissionRequest::new("Turner Const", Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(outcome.recommendation, Recommendation::Merge);
        assert!(outcome.confidence >= 0.8);
        assert_eq!(
            outcome.suggested_duplicate.as_ref().map(|e| e.id),
            Some(target_id)
        );

        // The caller attached the provisional entity to a project while the
        // item sat in the queue.
        let project = Uuid::new_v4();
        store.attach_reference(project, outcome.entity.id).await;

        let resolved = engine
            .resolve_merge(outcome.queue_item.id, target_id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(resolved.status, QueueStatus::Merged);

        // Provisional entity is gone, references repointed, alias folded in.
        assert!(store.get_entity(outcome.entity.id).await.unwrap().is_none());
        assert_eq!(store.references_to(target_id).await, vec![project]);
        let target = store.get_entity(target_id).await.unwrap().unwrap();
        assert_eq!(target.name, "Turner Construction");
        assert!(target.has_alias("turner const"));

        // Global invariant: no alias shared by two approved entities.
        assert!(store.approved_alias_overlap().await.is_none());
    }

    #[tokio::test]
    async fn second_resolution_fails_with_invalid_state() {
        let (_store, engine) = similarity_engine();
        let outcome = engine
            .submit(SubmissionRequest::new("Zephyr Glassworks", Uuid::new_v4()))
            .await
            .unwrap();

        engine
            .resolve_approve(outcome.queue_item.id, Uuid::new_v4(), None)
            .await
            .unwrap();

        let err = engine
            .resolve_delete(outcome.queue_item.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::InvalidState {
                status: QueueStatus::Approved,
                ..
            }
        ));

        // No state change from the failed second transition.
        let stats = engine.queue_stats().await.unwrap();
        assert_eq!(stats.approved, 1);
        assert_eq!(stats.deleted, 0);
    }

    #[tokio::test]
    async fn delete_severs_references_and_destroys_entity() {
        let (store, engine) = similarity_engine();
        let outcome = engine
            .submit(SubmissionRequest::new("Totally Fake GC", Uuid::new_v4()))
            .await
            .unwrap();
        store
            .attach_reference(Uuid::new_v4(), outcome.entity.id)
            .await;

        let resolved = engine
            .resolve_delete(outcome.queue_item.id, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(resolved.status, QueueStatus::Deleted);
        assert!(store.get_entity(outcome.entity.id).await.unwrap().is_none());
        assert!(store.references_to(outcome.entity.id).await.is_empty());
    }

    #[tokio::test]
    async fn merge_into_unknown_target_changes_nothing() {
        let (store, engine) = similarity_engine();
        let outcome = engine
            .submit(SubmissionRequest::new("Orphan Builders", Uuid::new_v4()))
            .await
            .unwrap();

        let err = engine
            .resolve_merge(outcome.queue_item.id, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Validation(_)));

        let item = store
            .get_queue_item(outcome.queue_item.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert!(store.get_entity(outcome.entity.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oracle_timeout_degrades_search_to_likely_new() {
        let store = Arc::new(MemoryStore::new());
        // Roster must be non-empty or the fuzzy tier is skipped outright.
        let seed_engine = engine_with(store.clone(), Arc::new(SimilarityOracle::new()));
        seed_approved(&seed_engine, "Turner Construction").await;

        let oracle = Arc::new(FailingOracle::new());
        let engine = engine_with(store, oracle.clone());

        let result = engine.search("zephyr glassworks", false).await.unwrap();
        assert!(result.matches.is_empty());
        assert!(result.likely_new);
        assert_eq!(result.suggested_name, "Zephyr Glassworks");
        assert_eq!(oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn oracle_timeout_never_blocks_submission() {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(FailingOracle::new());
        let engine = engine_with(store, oracle);

        let outcome = engine
            .submit(SubmissionRequest::new("turner const", Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(outcome.recommendation, Recommendation::New);
        assert_eq!(outcome.confidence, 0.5);
        assert_eq!(outcome.entity.name, "Turner Construction");
        assert!(!outcome.warnings.is_empty());
        assert_eq!(outcome.queue_item.status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn direct_tier_short_circuits_the_oracle() {
        let store = Arc::new(MemoryStore::new());
        let seed_engine = engine_with(store.clone(), Arc::new(SimilarityOracle::new()));
        seed_approved(&seed_engine, "Turner Construction").await;

        let oracle = Arc::new(FailingOracle::new());
        let engine = engine_with(store, oracle.clone());

        let result = engine.search("turner", false).await.unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].tier, MatchTier::Direct);
        assert!(!result.exact_match);
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn alias_tier_finds_past_spellings() {
        let (store, engine) = similarity_engine();
        let target_id = seed_approved(&engine, "Turner Construction").await;

        // A reviewer links this ad-hoc submission to the existing entity.
        let outcome = engine
            .submit(SubmissionRequest::new("Turner Bldg Co", Uuid::new_v4()))
            .await
            .unwrap();
        engine
            .resolve_merge(outcome.queue_item.id, target_id, Uuid::new_v4())
            .await
            .unwrap();

        // "turner bldg co" is nobody's substring-name but it is now an alias.
        let result = engine.search("Turner Bldg Co", false).await.unwrap();
        assert!(result.exact_match);
        assert!(result
            .matches
            .iter()
            .any(|m| m.entity.id == target_id && m.tier == MatchTier::Alias));

        assert!(store.approved_alias_overlap().await.is_none());
    }

    #[tokio::test]
    async fn alias_and_name_hits_deduplicate_by_entity_id() {
        let (_store, engine) = similarity_engine();
        let target_id = seed_approved(&engine, "Turner Construction").await;

        // Both the canonical name (tier 1) and the stored alias
        // "turner construction" (tier 2) hit the same entity.
        let result = engine.search("Turner Construction", false).await.unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].entity.id, target_id);
        assert_eq!(result.matches[0].tier, MatchTier::Direct);
        assert!(result.exact_match);
    }

    #[tokio::test]
    async fn concurrent_same_name_submissions_both_land() {
        let (_store, engine) = similarity_engine();
        let engine = Arc::new(engine);

        let a = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit(SubmissionRequest::new("Meridian Builders", Uuid::new_v4()))
                    .await
            })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .submit(SubmissionRequest::new("Meridian Builders", Uuid::new_v4()))
                    .await
            })
        };

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();
        assert_ne!(first.entity.id, second.entity.id);

        // Bounded duplication by design: two pending items, resolved later
        // by a reviewer.
        let pending = engine.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
    }
}
