// src/storage/mod.rs
//
// Durable state behind the engine: the contractor master table, the
// append-only review queue, and the dependent-reference rewrite operation.
// All mutation flows through the named operations below; nothing else
// writes `approved`, `aliases`, or `status`. Each commit_* method is atomic
// with respect to concurrent readers.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::core::{
    ContractorEntity, QueueStats, QueueStatus, ReviewQueueItem,
};
use crate::oracle::RosterEntry;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The queue row is not in `pending`; the transition was refused with
    /// no state change.
    #[error("queue item {item_id} is not pending (status: {status})")]
    NotPending {
        item_id: Uuid,
        status: QueueStatus,
    },

    /// Folding aliases into the merge target would collide with a third
    /// entity's alias set. The merge was aborted before any destructive step.
    #[error("alias \"{alias}\" already belongs to entity {holder}")]
    AliasConflict { alias: String, holder: Uuid },

    #[error("entity {0} not found")]
    MissingEntity(Uuid),

    #[error("queue item {0} not found")]
    MissingItem(Uuid),

    /// Connection, transaction, or query failure. No partial writes are
    /// assumed committed.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// What a merge changed, for audit logging and caller display.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub item: ReviewQueueItem,
    pub target: ContractorEntity,
    pub rewritten_references: u64,
    pub aliases_added: Vec<String>,
}

/// What a discard changed.
#[derive(Debug, Clone)]
pub struct DiscardReport {
    pub item: ReviewQueueItem,
    pub severed_references: u64,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Inserts an already-approved entity (trusted administrative import).
    async fn insert_approved(&self, entity: &ContractorEntity) -> Result<(), StoreError>;

    /// Atomically creates a provisional entity and its pending queue item.
    /// Both rows land or neither does.
    async fn create_submission(
        &self,
        entity: &ContractorEntity,
        item: &ReviewQueueItem,
    ) -> Result<(), StoreError>;

    /// Case-insensitive substring match on canonical names, ordered by name
    /// ascending, capped at `limit`.
    async fn find_by_name_fragment(
        &self,
        fragment: &str,
        include_unapproved: bool,
        limit: i64,
    ) -> Result<Vec<ContractorEntity>, StoreError>;

    /// Approved entities whose alias set contains `alias_key`.
    async fn find_by_alias(
        &self,
        alias_key: &str,
        limit: i64,
    ) -> Result<Vec<ContractorEntity>, StoreError>;

    /// Bounded roster of approved entities for oracle calls, name ascending.
    async fn approved_roster(&self, limit: i64) -> Result<Vec<RosterEntry>, StoreError>;

    async fn get_entity(&self, id: Uuid) -> Result<Option<ContractorEntity>, StoreError>;

    /// Fetch a batch of entities; unknown ids are silently absent.
    async fn get_entities(&self, ids: &[Uuid]) -> Result<Vec<ContractorEntity>, StoreError>;

    async fn get_queue_item(&self, id: Uuid) -> Result<Option<ReviewQueueItem>, StoreError>;

    /// Pending queue items, newest submission first.
    async fn list_pending(&self) -> Result<Vec<ReviewQueueItem>, StoreError>;

    async fn queue_stats(&self) -> Result<QueueStats, StoreError>;

    /// Rewrites every dependent reference from one entity to another, or
    /// severs them when `to` is None. Returns the number of affected rows.
    /// The same rewrite runs inside `commit_merge` / `commit_discard`; this
    /// standalone form exists for administrative repair.
    async fn reassign_references(
        &self,
        from: Uuid,
        to: Option<Uuid>,
    ) -> Result<u64, StoreError>;

    /// pending -> approved: flips the linked entity to approved (optionally
    /// renaming it), stamps approval metadata, resolves the queue item.
    async fn commit_approval(
        &self,
        item_id: Uuid,
        resolver_id: Uuid,
        final_name: Option<&str>,
        resolved_at: DateTime<Utc>,
    ) -> Result<ReviewQueueItem, StoreError>;

    /// pending -> merged: rewrites references from the provisional entity to
    /// the target, folds the provisional alias set (plus both canonical-name
    /// alias keys) into the target, destroys the provisional entity, and
    /// resolves the queue item, all in one atomic unit. Any failure leaves
    /// the item pending and every row untouched.
    async fn commit_merge(
        &self,
        item_id: Uuid,
        target_id: Uuid,
        resolver_id: Uuid,
        resolved_action: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<MergeReport, StoreError>;

    /// pending -> deleted: severs references to the provisional entity,
    /// destroys it, and resolves the queue item atomically.
    async fn commit_discard(
        &self,
        item_id: Uuid,
        resolver_id: Uuid,
        resolved_action: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<DiscardReport, StoreError>;
}
