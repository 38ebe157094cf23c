// src/oracle/mod.rs
//
// Narrow interface over the external fuzzy/duplicate-detection service.
// The engine treats the oracle as a stateless black box: bounded request,
// structured response, no conversation memory between calls. Failures stay
// inside this boundary; callers fall back to documented degraded behavior.

pub mod llm;
pub mod similarity;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::core::{ContractorEntity, Recommendation};

/// Internal-only failure taxonomy for oracle calls. Never propagated past
/// the matcher / submission-handler boundary.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request timed out")]
    Timeout,

    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle returned unparsable output: {0}")]
    Malformed(String),

    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// One roster entry shipped to the oracle for comparison.
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub id: Uuid,
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub aliases: Vec<String>,
}

impl RosterEntry {
    pub fn from_entity(entity: &ContractorEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name.clone(),
            city: entity.city.clone(),
            state: entity.state.clone(),
            aliases: entity.aliases.clone(),
        }
    }

    /// "City, ST" or "Unknown" for prompt rendering.
    pub fn location_label(&self) -> String {
        match (&self.city, &self.state) {
            (Some(city), Some(state)) => format!("{}, {}", city, state),
            (Some(city), None) => city.clone(),
            (None, Some(state)) => state.clone(),
            (None, None) => "Unknown".to_string(),
        }
    }
}

/// Fuzzy-search request from the matcher's third tier.
#[derive(Debug)]
pub struct FuzzyQuery<'a> {
    pub raw_query: &'a str,
    pub roster: &'a [RosterEntry],
}

/// One ranked candidate in a fuzzy ranking.
#[derive(Debug, Clone, Deserialize)]
pub struct FuzzyCandidate {
    pub id: Uuid,
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

/// Oracle answer to a fuzzy-search request.
#[derive(Debug, Clone)]
pub struct FuzzyRanking {
    pub candidates: Vec<FuzzyCandidate>,
    pub likely_new: bool,
    pub suggested_name: Option<String>,
}

/// Duplicate-likelihood request from the submission handler.
#[derive(Debug)]
pub struct SubmissionCheck<'a> {
    pub name: &'a str,
    pub city: Option<&'a str>,
    pub state: Option<&'a str>,
    pub roster: &'a [RosterEntry],
}

/// Oracle assessment of a submission. All fields are advisory; ids are
/// re-validated against the store before any use.
#[derive(Debug, Clone)]
pub struct DuplicateAssessment {
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub reasoning: String,
    pub suggested_match_id: Option<Uuid>,
    pub suggested_match_name: Option<String>,
    pub formatted_name: String,
    pub warnings: Vec<String>,
}

/// External fuzzy/duplicate-detection service.
///
/// Implementations must be stateless per call and safe to invoke from
/// concurrent request handlers.
#[async_trait]
pub trait MatchOracle: Send + Sync {
    /// Rank roster entries against a raw search query.
    async fn rank_candidates(&self, query: FuzzyQuery<'_>) -> Result<FuzzyRanking, OracleError>;

    /// Judge whether a submitted name duplicates a roster entry.
    async fn assess_submission(
        &self,
        check: SubmissionCheck<'_>,
    ) -> Result<DuplicateAssessment, OracleError>;
}
