// src/storage/postgres.rs
//
// Postgres-backed store. Every commit operation runs in a single
// transaction with FOR UPDATE row locks on the queue item and the entities
// it touches, so a concurrent resolver sees NotPending instead of racing
// the first one, and readers never observe a half-applied merge.
//
// Owned tables (see schema.sql): contractor_master, contractor_review_queue.
// project_contractors is the dependent-reference table rewritten on merge
// and discard; its wider schema belongs to the surrounding application.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::models::core::{
    ContractorEntity, QueueStats, QueueStatus, Recommendation, ReviewQueueItem, RiskTag,
};
use crate::normalize::alias_key;
use crate::oracle::RosterEntry;
use crate::storage::{DiscardReport, EntityStore, MergeReport, StoreError};
use crate::utils::db_connect::PgPool;

const ENTITY_COLUMNS: &str = "id, name, city, state, aliases, approved, risk_tags, star_rating, \
     created_by, created_at, approved_at, approved_by";

const QUEUE_COLUMNS: &str = "id, submitted_name, submitted_by, provisional_entity_id, \
     recommendation, confidence, suggested_match_id, reasoning, context, status, submitted_at, \
     resolved_at, resolved_by, resolved_action";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn row_to_entity(row: &Row) -> ContractorEntity {
    let risk_tags: Vec<String> = row.get("risk_tags");
    ContractorEntity {
        id: row.get("id"),
        name: row.get("name"),
        city: row.get("city"),
        state: row.get("state"),
        aliases: row.get("aliases"),
        approved: row.get("approved"),
        risk_tags: risk_tags.iter().filter_map(|t| RiskTag::parse(t)).collect(),
        star_rating: row.get("star_rating"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        approved_at: row.get("approved_at"),
        approved_by: row.get("approved_by"),
    }
}

fn row_to_item(row: &Row) -> ReviewQueueItem {
    let status: String = row.get("status");
    let recommendation: String = row.get("recommendation");
    let context: serde_json::Value = row.get("context");
    ReviewQueueItem {
        id: row.get("id"),
        submitted_name: row.get("submitted_name"),
        submitted_by: row.get("submitted_by"),
        provisional_entity_id: row.get("provisional_entity_id"),
        recommendation: Recommendation::parse(&recommendation).unwrap_or(Recommendation::New),
        confidence: row.get("confidence"),
        suggested_match_id: row.get("suggested_match_id"),
        reasoning: row.get("reasoning"),
        context: serde_json::from_value(context).unwrap_or_default(),
        status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Pending),
        submitted_at: row.get("submitted_at"),
        resolved_at: row.get("resolved_at"),
        resolved_by: row.get("resolved_by"),
        resolved_action: row.get("resolved_action"),
    }
}

fn risk_tags_to_strings(tags: &[RiskTag]) -> Vec<String> {
    tags.iter().map(|t| t.as_str().to_string()).collect()
}

/// Escape ILIKE wildcards so a literal query fragment stays literal.
fn ilike_pattern(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Finds an approved entity other than `exclude` holding any of `aliases`.
async fn alias_conflict_in_tx(
    tx: &tokio_postgres::Transaction<'_>,
    aliases: &[String],
    exclude: &[Uuid],
) -> Result<Option<(String, Uuid)>, StoreError> {
    if aliases.is_empty() {
        return Ok(None);
    }
    let rows = tx
        .query(
            "SELECT id, aliases FROM contractor_master \
             WHERE approved AND id <> ALL($1) AND aliases && $2 LIMIT 1",
            &[&exclude.to_vec(), &aliases.to_vec()],
        )
        .await
        .map_err(db_err)?;

    if let Some(row) = rows.first() {
        let holder: Uuid = row.get("id");
        let holder_aliases: Vec<String> = row.get("aliases");
        let alias = aliases
            .iter()
            .find(|a| holder_aliases.contains(a))
            .cloned()
            .unwrap_or_default();
        return Ok(Some((alias, holder)));
    }
    Ok(None)
}

/// Locks the queue row and verifies it is still pending.
async fn lock_pending_item(
    tx: &tokio_postgres::Transaction<'_>,
    item_id: Uuid,
) -> Result<ReviewQueueItem, StoreError> {
    let row = tx
        .query_opt(
            &format!(
                "SELECT {} FROM contractor_review_queue WHERE id = $1 FOR UPDATE",
                QUEUE_COLUMNS
            ),
            &[&item_id],
        )
        .await
        .map_err(db_err)?
        .ok_or(StoreError::MissingItem(item_id))?;

    let item = row_to_item(&row);
    if item.status != QueueStatus::Pending {
        return Err(StoreError::NotPending {
            item_id,
            status: item.status,
        });
    }
    Ok(item)
}

/// Locks an entity row for the duration of the transaction.
async fn lock_entity(
    tx: &tokio_postgres::Transaction<'_>,
    id: Uuid,
) -> Result<ContractorEntity, StoreError> {
    let row = tx
        .query_opt(
            &format!(
                "SELECT {} FROM contractor_master WHERE id = $1 FOR UPDATE",
                ENTITY_COLUMNS
            ),
            &[&id],
        )
        .await
        .map_err(db_err)?
        .ok_or(StoreError::MissingEntity(id))?;
    Ok(row_to_entity(&row))
}

async fn rewrite_references_in_tx(
    tx: &tokio_postgres::Transaction<'_>,
    from: Uuid,
    to: Option<Uuid>,
) -> Result<u64, StoreError> {
    let count = match to {
        Some(target) => tx
            .execute(
                "UPDATE project_contractors SET contractor_id = $2 WHERE contractor_id = $1",
                &[&from, &target],
            )
            .await
            .map_err(db_err)?,
        None => tx
            .execute(
                "DELETE FROM project_contractors WHERE contractor_id = $1",
                &[&from],
            )
            .await
            .map_err(db_err)?,
    };
    Ok(count)
}

async fn resolve_item_in_tx(
    tx: &tokio_postgres::Transaction<'_>,
    item_id: Uuid,
    status: QueueStatus,
    resolver_id: Uuid,
    resolved_action: &str,
    resolved_at: DateTime<Utc>,
) -> Result<ReviewQueueItem, StoreError> {
    let row = tx
        .query_one(
            &format!(
                "UPDATE contractor_review_queue \
                 SET status = $2, resolved_at = $3, resolved_by = $4, resolved_action = $5 \
                 WHERE id = $1 RETURNING {}",
                QUEUE_COLUMNS
            ),
            &[
                &item_id,
                &status.as_str(),
                &resolved_at,
                &resolver_id,
                &resolved_action,
            ],
        )
        .await
        .map_err(db_err)?;
    Ok(row_to_item(&row))
}

#[async_trait]
impl EntityStore for PgStore {
    async fn insert_approved(&self, entity: &ContractorEntity) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        if let Some((alias, holder)) =
            alias_conflict_in_tx(&tx, &entity.aliases, &[entity.id]).await?
        {
            return Err(StoreError::AliasConflict { alias, holder });
        }

        tx.execute(
            "INSERT INTO contractor_master \
             (id, name, city, state, aliases, approved, risk_tags, star_rating, \
              created_by, created_at, approved_at, approved_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            &[
                &entity.id,
                &entity.name,
                &entity.city,
                &entity.state,
                &entity.aliases,
                &entity.approved,
                &risk_tags_to_strings(&entity.risk_tags),
                &entity.star_rating,
                &entity.created_by,
                &entity.created_at,
                &entity.approved_at,
                &entity.approved_by,
            ],
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn create_submission(
        &self,
        entity: &ContractorEntity,
        item: &ReviewQueueItem,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        tx.execute(
            "INSERT INTO contractor_master \
             (id, name, city, state, aliases, approved, risk_tags, star_rating, \
              created_by, created_at, approved_at, approved_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            &[
                &entity.id,
                &entity.name,
                &entity.city,
                &entity.state,
                &entity.aliases,
                &entity.approved,
                &risk_tags_to_strings(&entity.risk_tags),
                &entity.star_rating,
                &entity.created_by,
                &entity.created_at,
                &entity.approved_at,
                &entity.approved_by,
            ],
        )
        .await
        .map_err(db_err)?;

        let context =
            serde_json::to_value(&item.context).map_err(db_err)?;
        tx.execute(
            "INSERT INTO contractor_review_queue \
             (id, submitted_name, submitted_by, provisional_entity_id, recommendation, \
              confidence, suggested_match_id, reasoning, context, status, submitted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            &[
                &item.id,
                &item.submitted_name,
                &item.submitted_by,
                &item.provisional_entity_id,
                &item.recommendation.as_str(),
                &item.confidence,
                &item.suggested_match_id,
                &item.reasoning,
                &context,
                &item.status.as_str(),
                &item.submitted_at,
            ],
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn find_by_name_fragment(
        &self,
        fragment: &str,
        include_unapproved: bool,
        limit: i64,
    ) -> Result<Vec<ContractorEntity>, StoreError> {
        let conn = self.pool.get().await.map_err(db_err)?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM contractor_master \
                     WHERE name ILIKE $1 AND (approved OR $2) \
                     ORDER BY name ASC LIMIT $3",
                    ENTITY_COLUMNS
                ),
                &[&ilike_pattern(fragment), &include_unapproved, &limit],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    async fn find_by_alias(
        &self,
        alias: &str,
        limit: i64,
    ) -> Result<Vec<ContractorEntity>, StoreError> {
        let conn = self.pool.get().await.map_err(db_err)?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM contractor_master \
                     WHERE approved AND $1 = ANY(aliases) \
                     ORDER BY name ASC LIMIT $2",
                    ENTITY_COLUMNS
                ),
                &[&alias, &limit],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    async fn approved_roster(&self, limit: i64) -> Result<Vec<RosterEntry>, StoreError> {
        let conn = self.pool.get().await.map_err(db_err)?;
        let rows = conn
            .query(
                "SELECT id, name, city, state, aliases FROM contractor_master \
                 WHERE approved ORDER BY name ASC LIMIT $1",
                &[&limit],
            )
            .await
            .map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| RosterEntry {
                id: row.get("id"),
                name: row.get("name"),
                city: row.get("city"),
                state: row.get("state"),
                aliases: row.get("aliases"),
            })
            .collect())
    }

    async fn get_entity(&self, id: Uuid) -> Result<Option<ContractorEntity>, StoreError> {
        let conn = self.pool.get().await.map_err(db_err)?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM contractor_master WHERE id = $1", ENTITY_COLUMNS),
                &[&id],
            )
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_entity))
    }

    async fn get_entities(&self, ids: &[Uuid]) -> Result<Vec<ContractorEntity>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.get().await.map_err(db_err)?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM contractor_master WHERE id = ANY($1)",
                    ENTITY_COLUMNS
                ),
                &[&ids.to_vec()],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_entity).collect())
    }

    async fn get_queue_item(&self, id: Uuid) -> Result<Option<ReviewQueueItem>, StoreError> {
        let conn = self.pool.get().await.map_err(db_err)?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM contractor_review_queue WHERE id = $1",
                    QUEUE_COLUMNS
                ),
                &[&id],
            )
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_item))
    }

    async fn list_pending(&self) -> Result<Vec<ReviewQueueItem>, StoreError> {
        let conn = self.pool.get().await.map_err(db_err)?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM contractor_review_queue \
                     WHERE status = 'pending' ORDER BY submitted_at DESC",
                    QUEUE_COLUMNS
                ),
                &[],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_item).collect())
    }

    async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        let conn = self.pool.get().await.map_err(db_err)?;
        let rows = conn
            .query(
                "SELECT status, COUNT(*) AS count FROM contractor_review_queue GROUP BY status",
                &[],
            )
            .await
            .map_err(db_err)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match QueueStatus::parse(&status) {
                Some(QueueStatus::Pending) => stats.pending = count as u64,
                Some(QueueStatus::Approved) => stats.approved = count as u64,
                Some(QueueStatus::Merged) => stats.merged = count as u64,
                Some(QueueStatus::Deleted) => stats.deleted = count as u64,
                None => debug!("Ignoring unknown queue status '{}' in stats", status),
            }
        }
        Ok(stats)
    }

    async fn reassign_references(
        &self,
        from: Uuid,
        to: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;
        let count = rewrite_references_in_tx(&tx, from, to).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(count)
    }

    async fn commit_approval(
        &self,
        item_id: Uuid,
        resolver_id: Uuid,
        final_name: Option<&str>,
        resolved_at: DateTime<Utc>,
    ) -> Result<ReviewQueueItem, StoreError> {
        let mut conn = self.pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let item = lock_pending_item(&tx, item_id).await?;
        let entity_id = item
            .provisional_entity_id
            .ok_or_else(|| StoreError::Unavailable("queue item has no linked entity".into()))?;
        let entity = lock_entity(&tx, entity_id).await?;

        if let Some((alias, holder)) =
            alias_conflict_in_tx(&tx, &entity.aliases, &[entity_id]).await?
        {
            return Err(StoreError::AliasConflict { alias, holder });
        }

        let params: Vec<&(dyn ToSql + Sync)> = vec![
            &entity_id,
            &resolved_at,
            &resolver_id,
            &final_name,
        ];
        tx.execute(
            "UPDATE contractor_master \
             SET approved = TRUE, approved_at = $2, approved_by = $3, name = COALESCE($4, name) \
             WHERE id = $1",
            &params,
        )
        .await
        .map_err(db_err)?;

        let resolved = resolve_item_in_tx(
            &tx,
            item_id,
            QueueStatus::Approved,
            resolver_id,
            "Approved as new contractor",
            resolved_at,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(resolved)
    }

    async fn commit_merge(
        &self,
        item_id: Uuid,
        target_id: Uuid,
        resolver_id: Uuid,
        resolved_action: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<MergeReport, StoreError> {
        let mut conn = self.pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let item = lock_pending_item(&tx, item_id).await?;
        let provisional_id = item
            .provisional_entity_id
            .ok_or_else(|| StoreError::Unavailable("queue item has no linked entity".into()))?;

        let provisional = lock_entity(&tx, provisional_id).await?;
        let mut target = lock_entity(&tx, target_id).await?;

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

        if let Some((alias, holder)) =
            alias_conflict_in_tx(&tx, &aliases_to_add, &[target_id, provisional_id]).await?
        {
            return Err(StoreError::AliasConflict { alias, holder });
        }

        let rewritten =
            rewrite_references_in_tx(&tx, provisional_id, Some(target_id)).await?;

        target.aliases.extend(aliases_to_add.iter().cloned());
        tx.execute(
            "UPDATE contractor_master SET aliases = $2 WHERE id = $1",
            &[&target_id, &target.aliases],
        )
        .await
        .map_err(db_err)?;

        tx.execute("DELETE FROM contractor_master WHERE id = $1", &[&provisional_id])
            .await
            .map_err(db_err)?;

        let resolved = resolve_item_in_tx(
            &tx,
            item_id,
            QueueStatus::Merged,
            resolver_id,
            resolved_action,
            resolved_at,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(MergeReport {
            item: resolved,
            target,
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
        let mut conn = self.pool.get().await.map_err(db_err)?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let item = lock_pending_item(&tx, item_id).await?;

        let severed = match item.provisional_entity_id {
            Some(entity_id) => {
                let count = rewrite_references_in_tx(&tx, entity_id, None).await?;
                tx.execute("DELETE FROM contractor_master WHERE id = $1", &[&entity_id])
                    .await
                    .map_err(db_err)?;
                count
            }
            None => 0,
        };

        let resolved = resolve_item_in_tx(
            &tx,
            item_id,
            QueueStatus::Deleted,
            resolver_id,
            resolved_action,
            resolved_at,
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(DiscardReport {
            item: resolved,
            severed_references: severed,
        })
    }
}
