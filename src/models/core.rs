// src/models/core.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Owner-entered risk tags. Informational only: no tag carries any
/// resolution semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTag {
    SlowPay,
    PayIfPaid,
    ChangeOrderHostile,
    BidShopping,
    LowFeedback,
    ScopeCreep,
}

impl RiskTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTag::SlowPay => "slow_pay",
            RiskTag::PayIfPaid => "pay_if_paid",
            RiskTag::ChangeOrderHostile => "change_order_hostile",
            RiskTag::BidShopping => "bid_shopping",
            RiskTag::LowFeedback => "low_feedback",
            RiskTag::ScopeCreep => "scope_creep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "slow_pay" => Some(RiskTag::SlowPay),
            "pay_if_paid" => Some(RiskTag::PayIfPaid),
            "change_order_hostile" => Some(RiskTag::ChangeOrderHostile),
            "bid_shopping" => Some(RiskTag::BidShopping),
            "low_feedback" => Some(RiskTag::LowFeedback),
            "scope_creep" => Some(RiskTag::ScopeCreep),
            _ => None,
        }
    }
}

impl fmt::Display for RiskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical contractor record.
///
/// `aliases` holds alias keys (see `normalize::alias_key`) and always
/// includes the key of every submission that resolved to this entity.
/// Alias sets never overlap across entities; the store enforces that
/// inside the merge transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractorEntity {
    pub id: Uuid,
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub aliases: Vec<String>,
    pub approved: bool,
    pub risk_tags: Vec<RiskTag>,
    pub star_rating: Option<i16>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
}

impl ContractorEntity {
    /// Display label used by callers: "Name (City, ST)" when location known.
    pub fn display_name(&self) -> String {
        match (&self.city, &self.state) {
            (Some(city), Some(state)) => format!("{} ({}, {})", self.name, city, state),
            (Some(city), None) => format!("{} ({})", self.name, city),
            _ => self.name.clone(),
        }
    }

    pub fn has_alias(&self, alias_key: &str) -> bool {
        self.aliases.iter().any(|a| a == alias_key)
    }
}

/// Review queue state machine. `Pending` is the only initial state; the
/// other three are terminal and never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Approved,
    Merged,
    Deleted,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Approved => "approved",
            QueueStatus::Merged => "merged",
            QueueStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "approved" => Some(QueueStatus::Approved),
            "merged" => Some(QueueStatus::Merged),
            "deleted" => Some(QueueStatus::Deleted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueueStatus::Pending)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duplicate-likelihood recommendation attached to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    New,
    Merge,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::New => "new",
            Recommendation::Merge => "merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Recommendation::New),
            "merge" => Some(Recommendation::Merge),
            _ => None,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission context preserved alongside a queue item, stored as one JSONB
/// blob. Everything here is advisory material for the reviewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionContext {
    pub city: Option<String>,
    pub state: Option<String>,
    pub star_rating: Option<i16>,
    #[serde(default)]
    pub risk_tags: Vec<RiskTag>,
    pub formatted_name: Option<String>,
    pub suggested_match_name: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub originating_project_id: Option<Uuid>,
}

/// One row of the append-only review queue. Created atomically with its
/// provisional entity; mutated only by the review workflow; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQueueItem {
    pub id: Uuid,
    pub submitted_name: String,
    pub submitted_by: Uuid,
    /// None only for legacy rows created before provisional entities existed.
    pub provisional_entity_id: Option<Uuid>,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub suggested_match_id: Option<Uuid>,
    pub reasoning: String,
    pub context: SubmissionContext,
    pub status: QueueStatus,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolved_action: Option<String>,
}

/// Queue counters for the review dashboard.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub approved: u64,
    pub merged: u64,
    pub deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_status_round_trips_through_strings() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Approved,
            QueueStatus::Merged,
            QueueStatus::Deleted,
        ] {
            assert_eq!(QueueStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(QueueStatus::parse("reopened"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(QueueStatus::Approved.is_terminal());
        assert!(QueueStatus::Merged.is_terminal());
        assert!(QueueStatus::Deleted.is_terminal());
    }

    #[test]
    fn risk_tags_parse_their_own_serialization() {
        for tag in [
            RiskTag::SlowPay,
            RiskTag::PayIfPaid,
            RiskTag::ChangeOrderHostile,
            RiskTag::BidShopping,
            RiskTag::LowFeedback,
            RiskTag::ScopeCreep,
        ] {
            assert_eq!(RiskTag::parse(tag.as_str()), Some(tag));
        }
    }

    #[test]
    fn display_name_includes_location_when_present() {
        let entity = ContractorEntity {
            id: Uuid::new_v4(),
            name: "Turner Construction".to_string(),
            city: Some("Denver".to_string()),
            state: Some("CO".to_string()),
            aliases: vec![],
            approved: true,
            risk_tags: vec![],
            star_rating: None,
            created_by: None,
            created_at: Utc::now(),
            approved_at: None,
            approved_by: None,
        };
        assert_eq!(entity.display_name(), "Turner Construction (Denver, CO)");
    }
}
