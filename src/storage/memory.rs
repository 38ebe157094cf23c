// src/storage/memory.rs
//
// In-memory store over a single RwLock: every commit operation runs inside
// one write guard, so readers observe either the full pre-transition or the
// full post-transition state, never a partial merge. Backs the test suite
// and offline experimentation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::core::{ContractorEntity, QueueStats, QueueStatus, ReviewQueueItem};
use crate::normalize::alias_key;
use crate::oracle::RosterEntry;
use crate::storage::{DiscardReport, EntityStore, MergeReport, StoreError};

/// One dependent reference: a project row pointing at a contractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectReference {
    pub project_id: Uuid,
    pub contractor_id: Uuid,
}

#[derive(Default)]
struct MemoryState {
    entities: HashMap<Uuid, ContractorEntity>,
    queue: HashMap<Uuid, ReviewQueueItem>,
    references: Vec<ProjectReference>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a dependent reference, standing in for an external record
    /// (a bid/project row) pointing at the entity.
    pub async fn attach_reference(&self, project_id: Uuid, contractor_id: Uuid) {
        let mut state = self.state.write().await;
        state.references.push(ProjectReference {
            project_id,
            contractor_id,
        });
    }

    /// Project ids currently referencing the entity.
    pub async fn references_to(&self, contractor_id: Uuid) -> Vec<Uuid> {
        let state = self.state.read().await;
        state
            .references
            .iter()
            .filter(|r| r.contractor_id == contractor_id)
            .map(|r| r.project_id)
            .collect()
    }

    /// First alias shared by two distinct approved entities, if any.
    /// Exists so tests can assert the global disjointness invariant.
    pub async fn approved_alias_overlap(&self) -> Option<(String, Uuid, Uuid)> {
        let state = self.state.read().await;
        let mut seen: HashMap<&str, Uuid> = HashMap::new();
        for entity in state.entities.values().filter(|e| e.approved) {
            for alias in &entity.aliases {
                if let Some(&holder) = seen.get(alias.as_str()) {
                    return Some((alias.clone(), holder, entity.id));
                }
                seen.insert(alias, entity.id);
            }
        }
        None
    }

    fn pending_item(
        state: &MemoryState,
        item_id: Uuid,
    ) -> Result<ReviewQueueItem, StoreError> {
        let item = state
            .queue
            .get(&item_id)
            .ok_or(StoreError::MissingItem(item_id))?;
        if item.status != QueueStatus::Pending {
            return Err(StoreError::NotPending {
                item_id,
                status: item.status,
            });
        }
        Ok(item.clone())
    }

    fn rewrite_references(state: &mut MemoryState, from: Uuid, to: Option<Uuid>) -> u64 {
        match to {
            Some(target) => {
                let mut count = 0;
                for reference in state.references.iter_mut() {
                    if reference.contractor_id == from {
                        reference.contractor_id = target;
                        count += 1;
                    }
                }
                count
            }
            None => {
                let before = state.references.len();
                state.references.retain(|r| r.contractor_id != from);
                (before - state.references.len()) as u64
            }
        }
    }

    /// Aliases among `candidates` already held by an approved entity other
    /// than `target` (and other than the entity being destroyed).
    fn approved_alias_conflict(
        state: &MemoryState,
        candidates: &[String],
        exclude: &[Uuid],
    ) -> Option<(String, Uuid)> {
        for entity in state.entities.values() {
            if !entity.approved || exclude.contains(&entity.id) {
                continue;
            }
            for alias in candidates {
                if entity.has_alias(alias) {
                    return Some((alias.clone(), entity.id));
                }
            }
        }
        None
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert_approved(&self, entity: &ContractorEntity) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some((alias, holder)) =
            Self::approved_alias_conflict(&state, &entity.aliases, &[entity.id])
        {
            return Err(StoreError::AliasConflict { alias, holder });
        }
        state.entities.insert(entity.id, entity.clone());
        Ok(())
    }

    async fn create_submission(
        &self,
        entity: &ContractorEntity,
        item: &ReviewQueueItem,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.entities.insert(entity.id, entity.clone());
        state.queue.insert(item.id, item.clone());
        Ok(())
    }

    async fn find_by_name_fragment(
        &self,
        fragment: &str,
        include_unapproved: bool,
        limit: i64,
    ) -> Result<Vec<ContractorEntity>, StoreError> {
        let needle = fragment.to_lowercase();
        let state = self.state.read().await;
        let mut matches: Vec<ContractorEntity> = state
            .entities
            .values()
            .filter(|e| (include_unapproved || e.approved) && e.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn find_by_alias(
        &self,
        alias_key: &str,
        limit: i64,
    ) -> Result<Vec<ContractorEntity>, StoreError> {
        let state = self.state.read().await;
        let mut matches: Vec<ContractorEntity> = state
            .entities
            .values()
            .filter(|e| e.approved && e.has_alias(alias_key))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn approved_roster(&self, limit: i64) -> Result<Vec<RosterEntry>, StoreError> {
        let state = self.state.read().await;
        let mut approved: Vec<&ContractorEntity> =
            state.entities.values().filter(|e| e.approved).collect();
        approved.sort_by(|a, b| a.name.cmp(&b.name));
        approved.truncate(limit.max(0) as usize);
        Ok(approved.into_iter().map(RosterEntry::from_entity).collect())
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<ContractorEntity>, StoreError> {
        let state = self.state.read().await;
        Ok(state.entities.get(&id).cloned())
    }

    async fn get_entities(&self, ids: &[Uuid]) -> Result<Vec<ContractorEntity>, StoreError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.entities.get(id).cloned())
            .collect())
    }

    async fn get_queue_item(&self, id: Uuid) -> Result<Option<ReviewQueueItem>, StoreError> {
        let state = self.state.read().await;
        Ok(state.queue.get(&id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<ReviewQueueItem>, StoreError> {
        let state = self.state.read().await;
        let mut pending: Vec<ReviewQueueItem> = state
            .queue
            .values()
            .filter(|i| i.status == QueueStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(pending)
    }

    async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        let state = self.state.read().await;
        let mut stats = QueueStats::default();
        for item in state.queue.values() {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Approved => stats.approved += 1,
                QueueStatus::Merged => stats.merged += 1,
                QueueStatus::Deleted => stats.deleted += 1,
            }
        }
        Ok(stats)
    }

    async fn reassign_references(
        &self,
        from: Uuid,
        to: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        Ok(Self::rewrite_references(&mut state, from, to))
    }

    async fn commit_approval(
        &self,
        item_id: Uuid,
        resolver_id: Uuid,
        final_name: Option<&str>,
        resolved_at: DateTime<Utc>,
    ) -> Result<ReviewQueueItem, StoreError> {
        let mut state = self.state.write().await;
        let item = Self::pending_item(&state, item_id)?;
        let entity_id = item
            .provisional_entity_id
            .ok_or_else(|| StoreError::Unavailable("queue item has no linked entity".into()))?;

        let aliases = state
            .entities
            .get(&entity_id)
            .ok_or(StoreError::MissingEntity(entity_id))?
            .aliases
            .clone();
        if let Some((alias, holder)) =
            Self::approved_alias_conflict(&state, &aliases, &[entity_id])
        {
            return Err(StoreError::AliasConflict { alias, holder });
        }

        {
            let entity = state
                .entities
                .get_mut(&entity_id)
                .ok_or(StoreError::MissingEntity(entity_id))?;
            entity.approved = true;
            entity.approved_at = Some(resolved_at);
            entity.approved_by = Some(resolver_id);
            if let Some(name) = final_name {
                entity.name = name.to_string();
            }
        }

        let stored = state
            .queue
            .get_mut(&item_id)
            .ok_or(StoreError::MissingItem(item_id))?;
        stored.status = QueueStatus::Approved;
        stored.resolved_at = Some(resolved_at);
        stored.resolved_by = Some(resolver_id);
        stored.resolved_action = Some("Approved as new contractor".to_string());
        Ok(stored.clone())
    }

    async fn commit_merge(
        &self,
        item_id: Uuid,
        target_id: Uuid,
        resolver_id: Uuid,
        resolved_action: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<MergeReport, StoreError> {
        let mut state = self.state.write().await;
        let item = Self::pending_item(&state, item_id)?;
        let provisional_id = item
            .provisional_entity_id
            .ok_or_else(|| StoreError::Unavailable("queue item has no linked entity".into()))?;

        let provisional = state
            .entities
            .get(&provisional_id)
            .ok_or(StoreError::MissingEntity(provisional_id))?
            .clone();
        let target = state
            .entities
            .get(&target_id)
            .ok_or(StoreError::MissingEntity(target_id))?
            .clone();

        // The provisional alias set always carries the submitted text; fold
        // its canonical name in as well so past spellings keep resolving.
        let mut aliases_to_add: Vec<String> = Vec::new();
        for alias in provisional
            .aliases
            .iter()
            .cloned()
            .chain(std::iter::once(alias_key(&provisional.name)))
        {
            if !alias.is_empty() && !target.has_alias(&alias) && !aliases_to_add.contains(&alias) {
                aliases_to_add.push(alias);
            }
        }

        if let Some((alias, holder)) = Self::approved_alias_conflict(
            &state,
            &aliases_to_add,
            &[target_id, provisional_id],
        ) {
            return Err(StoreError::AliasConflict { alias, holder });
        }

        let rewritten = Self::rewrite_references(&mut state, provisional_id, Some(target_id));

        let target_entity = state
            .entities
            .get_mut(&target_id)
            .ok_or(StoreError::MissingEntity(target_id))?;
        target_entity.aliases.extend(aliases_to_add.iter().cloned());
        let target_snapshot = target_entity.clone();

        state.entities.remove(&provisional_id);

        let stored = state
            .queue
            .get_mut(&item_id)
            .ok_or(StoreError::MissingItem(item_id))?;
        stored.status = QueueStatus::Merged;
        stored.resolved_at = Some(resolved_at);
        stored.resolved_by = Some(resolver_id);
        stored.resolved_action = Some(resolved_action.to_string());

        Ok(MergeReport {
            item: stored.clone(),
            target: target_snapshot,
            rewritten_references: rewritten,
            aliases_added: aliases_to_add,
        })
    }

    async fn commit_discard(
        &self,
        item_id: Uuid,
        resolver_id: Uuid,
        resolved_action: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<DiscardReport, StoreError> {
        let mut state = self.state.write().await;
        let item = Self::pending_item(&state, item_id)?;

        let severed = match item.provisional_entity_id {
            Some(entity_id) => {
                let count = Self::rewrite_references(&mut state, entity_id, None);
                state.entities.remove(&entity_id);
                count
            }
            // Legacy rows have nothing to destroy.
            None => 0,
        };

        let stored = state
            .queue
            .get_mut(&item_id)
            .ok_or(StoreError::MissingItem(item_id))?;
        stored.status = QueueStatus::Deleted;
        stored.resolved_at = Some(resolved_at);
        stored.resolved_by = Some(resolver_id);
        stored.resolved_action = Some(resolved_action.to_string());

        Ok(DiscardReport {
            item: stored.clone(),
            severed_references: severed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::{Recommendation, SubmissionContext};

    fn entity(name: &str, approved: bool) -> ContractorEntity {
        ContractorEntity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            city: None,
            state: None,
            aliases: vec![alias_key(name)],
            approved,
            risk_tags: vec![],
            star_rating: None,
            created_by: None,
            created_at: Utc::now(),
            approved_at: None,
            approved_by: None,
        }
    }

    fn pending_item_for(entity: &ContractorEntity, submitted: &str) -> ReviewQueueItem {
        ReviewQueueItem {
            id: Uuid::new_v4(),
            submitted_name: submitted.to_string(),
            submitted_by: Uuid::new_v4(),
            provisional_entity_id: Some(entity.id),
            recommendation: Recommendation::New,
            confidence: 0.7,
            suggested_match_id: None,
            reasoning: String::new(),
            context: SubmissionContext::default(),
            status: QueueStatus::Pending,
            submitted_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolved_action: None,
        }
    }

    #[tokio::test]
    async fn merge_rewrites_references_and_folds_aliases() {
        let store = MemoryStore::new();
        let target = entity("Turner Construction", true);
        store.insert_approved(&target).await.unwrap();

        let provisional = entity("Turner Const", false);
        let item = pending_item_for(&provisional, "Turner Const");
        store.create_submission(&provisional, &item).await.unwrap();

        let project = Uuid::new_v4();
        store.attach_reference(project, provisional.id).await;

        let report = store
            .commit_merge(item.id, target.id, Uuid::new_v4(), "Merged", Utc::now())
            .await
            .unwrap();

        assert_eq!(report.rewritten_references, 1);
        assert_eq!(store.references_to(target.id).await, vec![project]);
        assert!(store.get_entity(provisional.id).await.unwrap().is_none());

        let merged_target = store.get_entity(target.id).await.unwrap().unwrap();
        assert!(merged_target.has_alias("turner const"));
        assert_eq!(report.item.status, QueueStatus::Merged);
    }

    #[tokio::test]
    async fn merge_aborts_on_third_entity_alias_collision() {
        let store = MemoryStore::new();
        let target = entity("Turner Construction", true);
        store.insert_approved(&target).await.unwrap();

        // A third approved entity already owns the submitted alias.
        let mut third = entity("Turner Concrete", true);
        third.aliases.push("turner const".to_string());
        store.insert_approved(&third).await.unwrap();

        let provisional = entity("Turner Const", false);
        let item = pending_item_for(&provisional, "Turner Const");
        store.create_submission(&provisional, &item).await.unwrap();
        store.attach_reference(Uuid::new_v4(), provisional.id).await;

        let err = store
            .commit_merge(item.id, target.id, Uuid::new_v4(), "Merged", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AliasConflict { .. }));

        // Nothing changed: entity survives, references intact, item pending.
        assert!(store.get_entity(provisional.id).await.unwrap().is_some());
        assert_eq!(store.references_to(provisional.id).await.len(), 1);
        let item_after = store.get_queue_item(item.id).await.unwrap().unwrap();
        assert_eq!(item_after.status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn discard_severs_references_and_destroys_entity() {
        let store = MemoryStore::new();
        let provisional = entity("Spam Entry", false);
        let item = pending_item_for(&provisional, "Spam Entry");
        store.create_submission(&provisional, &item).await.unwrap();
        store.attach_reference(Uuid::new_v4(), provisional.id).await;
        store.attach_reference(Uuid::new_v4(), provisional.id).await;

        let report = store
            .commit_discard(item.id, Uuid::new_v4(), "Deleted - invalid submission", Utc::now())
            .await
            .unwrap();

        assert_eq!(report.severed_references, 2);
        assert!(store.get_entity(provisional.id).await.unwrap().is_none());
        assert!(store.references_to(provisional.id).await.is_empty());
        assert_eq!(report.item.status, QueueStatus::Deleted);
    }

    #[tokio::test]
    async fn resolved_items_refuse_further_transitions() {
        let store = MemoryStore::new();
        let provisional = entity("Acme Fabricators", false);
        let item = pending_item_for(&provisional, "Acme Fabricators");
        store.create_submission(&provisional, &item).await.unwrap();

        store
            .commit_approval(item.id, Uuid::new_v4(), None, Utc::now())
            .await
            .unwrap();

        let err = store
            .commit_approval(item.id, Uuid::new_v4(), None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotPending {
                status: QueueStatus::Approved,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn approval_renames_when_final_name_given() {
        let store = MemoryStore::new();
        let provisional = entity("acme fabricators", false);
        let item = pending_item_for(&provisional, "acme fabricators");
        store.create_submission(&provisional, &item).await.unwrap();

        store
            .commit_approval(item.id, Uuid::new_v4(), Some("Acme Fabricators"), Utc::now())
            .await
            .unwrap();

        let approved = store.get_entity(provisional.id).await.unwrap().unwrap();
        assert!(approved.approved);
        assert_eq!(approved.name, "Acme Fabricators");
        assert!(approved.approved_at.is_some());
    }

    #[tokio::test]
    async fn name_fragment_search_respects_approval_filter() {
        let store = MemoryStore::new();
        let approved = entity("Turner Construction", true);
        let unapproved = entity("Turner Const", false);
        store.insert_approved(&approved).await.unwrap();
        let item = pending_item_for(&unapproved, "Turner Const");
        store.create_submission(&unapproved, &item).await.unwrap();

        let only_approved = store
            .find_by_name_fragment("turner", false, 10)
            .await
            .unwrap();
        assert_eq!(only_approved.len(), 1);

        let everything = store.find_by_name_fragment("turner", true, 10).await.unwrap();
        assert_eq!(everything.len(), 2);
    }
}
