// src/models/matching.rs

use serde::Serialize;
use uuid::Uuid;

use crate::models::core::{ContractorEntity, Recommendation, ReviewQueueItem, RiskTag};

/// Which tier of the matcher produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Case-insensitive substring hit on the canonical name.
    Direct,
    /// Alias-set membership of the normalized query.
    Alias,
    /// Ranked by the external fuzzy oracle.
    Fuzzy,
}

/// One ranked candidate returned from `search`.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub entity: ContractorEntity,
    pub tier: MatchTier,
    /// Oracle confidence, present on fuzzy-tier candidates only.
    pub confidence: Option<f64>,
    /// Oracle explanation, present on fuzzy-tier candidates only.
    pub reason: Option<String>,
}

impl MatchCandidate {
    pub fn direct(entity: ContractorEntity) -> Self {
        Self {
            entity,
            tier: MatchTier::Direct,
            confidence: None,
            reason: None,
        }
    }

    pub fn alias(entity: ContractorEntity) -> Self {
        Self {
            entity,
            tier: MatchTier::Alias,
            confidence: None,
            reason: None,
        }
    }

    pub fn fuzzy(entity: ContractorEntity, confidence: f64, reason: String) -> Self {
        Self {
            entity,
            tier: MatchTier::Fuzzy,
            confidence: Some(confidence),
            reason: Some(reason),
        }
    }
}

/// Result of a tiered search.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub matches: Vec<MatchCandidate>,
    /// True iff some candidate's canonical name or alias equals the
    /// normalized query exactly.
    pub exact_match: bool,
    pub likely_new: bool,
    /// Properly formatted name to offer when the query looks new.
    pub suggested_name: String,
}

impl MatchResult {
    pub fn empty() -> Self {
        Self {
            matches: Vec::new(),
            exact_match: false,
            likely_new: false,
            suggested_name: String::new(),
        }
    }

    /// The degraded result used when the fuzzy tier cannot run.
    pub fn likely_new(suggested_name: String) -> Self {
        Self {
            matches: Vec::new(),
            exact_match: false,
            likely_new: true,
            suggested_name,
        }
    }
}

/// Input to the submission handler.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub submitter_id: Uuid,
    pub project_id: Option<Uuid>,
    pub star_rating: Option<i16>,
    pub risk_tags: Vec<RiskTag>,
}

impl SubmissionRequest {
    pub fn new(name: impl Into<String>, submitter_id: Uuid) -> Self {
        Self {
            name: name.into(),
            city: None,
            state: None,
            submitter_id,
            project_id: None,
            star_rating: None,
            risk_tags: Vec::new(),
        }
    }
}

/// What a caller gets back from `submit`. The provisional entity is usable
/// immediately; the suggested duplicate is advisory material for a
/// "use the existing one instead" affordance.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub entity: ContractorEntity,
    pub queue_item: ReviewQueueItem,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub reasoning: String,
    pub suggested_duplicate: Option<ContractorEntity>,
    pub warnings: Vec<String>,
    pub message: String,
}
