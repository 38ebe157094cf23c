// src/review.rs
//
// Reviewer-driven state machine over the queue: pending -> approved |
// merged | deleted, one-directional, terminal. The workflow layer validates
// up front and produces typed errors; the store re-verifies inside its
// transaction, so a racing second resolver loses cleanly with
// InvalidStateError and no state change.

use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::errors::ResolutionError;
use crate::models::core::{QueueStatus, ReviewQueueItem};
use crate::storage::EntityStore;

/// Read-only projection of the pending queue, newest first.
pub async fn list_pending(store: &dyn EntityStore) -> Result<Vec<ReviewQueueItem>, ResolutionError> {
    Ok(store.list_pending().await?)
}

/// pending -> approved. Flips the linked provisional entity to approved,
/// optionally renaming it: an explicit reviewer-supplied name wins,
/// otherwise the formatted name captured at submission time is applied.
pub async fn approve(
    store: &dyn EntityStore,
    item_id: Uuid,
    resolver_id: Uuid,
    final_name: Option<String>,
) -> Result<ReviewQueueItem, ResolutionError> {
    let item = require_pending(store, item_id).await?;
    if item.provisional_entity_id.is_none() {
        return Err(ResolutionError::Validation(format!(
            "queue item {} has no linked provisional entity to approve",
            item_id
        )));
    }

    let name = final_name.or_else(|| item.context.formatted_name.clone());
    let resolved = store
        .commit_approval(item_id, resolver_id, name.as_deref(), Utc::now())
        .await?;
    info!(
        "Approved queue item {} (entity {:?}) by {}",
        item_id, item.provisional_entity_id, resolver_id
    );
    Ok(resolved)
}

/// pending -> merged. Atomically rewrites dependent references from the
/// provisional entity to the target, folds the provisional alias set into
/// the target, destroys the provisional entity, and resolves the item.
/// The target may be the oracle's suggestion or any entity the reviewer
/// picked by hand; the contract is the same.
pub async fn merge(
    store: &dyn EntityStore,
    item_id: Uuid,
    target_id: Uuid,
    resolver_id: Uuid,
) -> Result<ReviewQueueItem, ResolutionError> {
    let item = require_pending(store, item_id).await?;
    let provisional_id = item.provisional_entity_id.ok_or_else(|| {
        ResolutionError::Validation(format!(
            "queue item {} has no linked provisional entity to merge",
            item_id
        ))
    })?;
    if provisional_id == target_id {
        return Err(ResolutionError::Validation(
            "cannot merge an entity into itself".to_string(),
        ));
    }

    let target = store
        .get_entity(target_id)
        .await?
        .ok_or_else(|| {
            ResolutionError::Validation(format!("merge target {} does not exist", target_id))
        })?;
    if !target.approved {
        return Err(ResolutionError::Validation(format!(
            "merge target {} is not an approved contractor",
            target_id
        )));
    }

    let action = format!("Merged with {}", target.name);
    let report = store
        .commit_merge(item_id, target_id, resolver_id, &action, Utc::now())
        .await?;
    info!(
        "Merged queue item {}: {} references repointed to {}, aliases added: {:?}",
        item_id, report.rewritten_references, target_id, report.aliases_added
    );
    Ok(report.item)
}

/// pending -> deleted. Severs every dependent reference to the provisional
/// entity, destroys it, and resolves the item. Irreversible; meant for
/// spam and invalid submissions.
pub async fn discard(
    store: &dyn EntityStore,
    item_id: Uuid,
    resolver_id: Uuid,
) -> Result<ReviewQueueItem, ResolutionError> {
    require_pending(store, item_id).await?;

    let report = store
        .commit_discard(
            item_id,
            resolver_id,
            "Deleted - invalid submission",
            Utc::now(),
        )
        .await?;
    info!(
        "Discarded queue item {} ({} references severed)",
        item_id, report.severed_references
    );
    Ok(report.item)
}

async fn require_pending(
    store: &dyn EntityStore,
    item_id: Uuid,
) -> Result<ReviewQueueItem, ResolutionError> {
    let item = store.get_queue_item(item_id).await?.ok_or_else(|| {
        ResolutionError::Validation(format!("queue item {} does not exist", item_id))
    })?;
    if item.status != QueueStatus::Pending {
        return Err(ResolutionError::InvalidState {
            item_id,
            status: item.status,
        });
    }
    Ok(item)
}
