// src/oracle/similarity.rs
//
// Deterministic oracle built on Jaro-Winkler similarity. Used by the test
// suite and by the CLI's offline mode so the rest of the pipeline can run
// without a generative model behind it.

use async_trait::async_trait;
use strsim::jaro_winkler;
use uuid::Uuid;

use crate::models::core::Recommendation;
use crate::normalize::{alias_key, normalize};
use crate::oracle::{
    DuplicateAssessment, FuzzyCandidate, FuzzyQuery, FuzzyRanking, MatchOracle, OracleError,
    RosterEntry, SubmissionCheck,
};

/// Score at which a roster entry is reported as a fuzzy candidate.
const CANDIDATE_THRESHOLD: f64 = 0.80;

/// Score at which a submission is recommended for merge.
const MERGE_THRESHOLD: f64 = 0.88;

const MAX_CANDIDATES: usize = 3;

pub struct SimilarityOracle;

impl SimilarityOracle {
    pub fn new() -> Self {
        Self
    }

    /// Best similarity between any form of the query and any form of the
    /// roster entry. Both the literal and the abbreviation-expanded query
    /// are compared so "turner const" lands on "Turner Construction".
    fn score(query: &str, entry: &RosterEntry) -> f64 {
        let literal = alias_key(query);
        let expanded = alias_key(&normalize(query));

        let mut targets: Vec<String> = Vec::with_capacity(entry.aliases.len() + 1);
        targets.push(alias_key(&entry.name));
        targets.extend(entry.aliases.iter().map(|a| alias_key(a)));

        let mut best: f64 = 0.0;
        for target in &targets {
            if target.is_empty() {
                continue;
            }
            best = best.max(jaro_winkler(&literal, target));
            best = best.max(jaro_winkler(&expanded, target));
        }
        best
    }

    fn rank(query: &str, roster: &[RosterEntry]) -> Vec<(Uuid, String, f64)> {
        let mut scored: Vec<(Uuid, String, f64)> = roster
            .iter()
            .map(|entry| (entry.id, entry.name.clone(), Self::score(query, entry)))
            .filter(|(_, _, score)| *score >= CANDIDATE_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(MAX_CANDIDATES);
        scored
    }
}

impl Default for SimilarityOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MatchOracle for SimilarityOracle {
    async fn rank_candidates(&self, query: FuzzyQuery<'_>) -> Result<FuzzyRanking, OracleError> {
        let ranked = Self::rank(query.raw_query, query.roster);
        let likely_new = ranked.is_empty();

        let candidates = ranked
            .into_iter()
            .map(|(id, name, score)| FuzzyCandidate {
                id,
                confidence: score,
                reason: format!("Name similarity {:.2} to \"{}\"", score, name),
            })
            .collect();

        Ok(FuzzyRanking {
            candidates,
            likely_new,
            suggested_name: Some(normalize(query.raw_query)),
        })
    }

    async fn assess_submission(
        &self,
        check: SubmissionCheck<'_>,
    ) -> Result<DuplicateAssessment, OracleError> {
        let ranked = Self::rank(check.name, check.roster);
        let formatted_name = normalize(check.name);

        match ranked.first() {
            Some((id, name, score)) if *score >= MERGE_THRESHOLD => Ok(DuplicateAssessment {
                recommendation: Recommendation::Merge,
                confidence: *score,
                reasoning: format!(
                    "\"{}\" is {:.0}% similar to existing contractor \"{}\"",
                    check.name,
                    score * 100.0,
                    name
                ),
                suggested_match_id: Some(*id),
                suggested_match_name: Some(name.clone()),
                formatted_name,
                warnings: Vec::new(),
            }),
            best => {
                let confidence = match best {
                    Some((_, _, score)) => (1.0 - score).max(0.5),
                    None => 1.0,
                };
                Ok(DuplicateAssessment {
                    recommendation: Recommendation::New,
                    confidence,
                    reasoning: format!(
                        "No existing contractor closely matches \"{}\"",
                        check.name
                    ),
                    suggested_match_id: None,
                    suggested_match_name: None,
                    formatted_name,
                    warnings: Vec::new(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster_entry(name: &str, aliases: &[&str]) -> RosterEntry {
        RosterEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            city: None,
            state: None,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn abbreviated_query_ranks_expanded_name() {
        let roster = vec![
            roster_entry("Turner Construction", &[]),
            roster_entry("Whiting Plumbing", &[]),
        ];
        let oracle = SimilarityOracle::new();
        let ranking = oracle
            .rank_candidates(FuzzyQuery {
                raw_query: "turner const",
                roster: &roster,
            })
            .await
            .unwrap();

        assert!(!ranking.likely_new);
        assert_eq!(ranking.candidates.len(), 1);
        assert_eq!(ranking.candidates[0].id, roster[0].id);
        assert!(ranking.candidates[0].confidence > 0.95);
    }

    #[tokio::test]
    async fn unrelated_query_is_likely_new() {
        let roster = vec![roster_entry("Turner Construction", &[])];
        let oracle = SimilarityOracle::new();
        let ranking = oracle
            .rank_candidates(FuzzyQuery {
                raw_query: "zephyr glassworks",
                roster: &roster,
            })
            .await
            .unwrap();

        assert!(ranking.likely_new);
        assert!(ranking.candidates.is_empty());
        assert_eq!(ranking.suggested_name.as_deref(), Some("Zephyr Glassworks"));
    }

    #[tokio::test]
    async fn near_duplicate_submission_recommends_merge() {
        let roster = vec![roster_entry("Turner Construction", &[])];
        let oracle = SimilarityOracle::new();
        let assessment = oracle
            .assess_submission(SubmissionCheck {
                name: "Turner Const",
                city: None,
                state: None,
                roster: &roster,
            })
            .await
            .unwrap();

        assert_eq!(assessment.recommendation, Recommendation::Merge);
        assert!(assessment.confidence >= 0.8);
        assert_eq!(assessment.suggested_match_id, Some(roster[0].id));
        assert_eq!(assessment.formatted_name, "Turner Construction");
    }

    #[tokio::test]
    async fn empty_roster_submission_is_new() {
        let oracle = SimilarityOracle::new();
        let assessment = oracle
            .assess_submission(SubmissionCheck {
                name: "Acme Specialty Fabricators LLC",
                city: None,
                state: None,
                roster: &[],
            })
            .await
            .unwrap();

        assert_eq!(assessment.recommendation, Recommendation::New);
        assert_eq!(
            assessment.formatted_name,
            "Acme Specialty Fabricators LLC"
        );
    }

    #[tokio::test]
    async fn alias_hits_count_toward_similarity() {
        let roster = vec![roster_entry("McCarthy Building Companies", &["mccarthy bldg"])];
        let oracle = SimilarityOracle::new();
        let assessment = oracle
            .assess_submission(SubmissionCheck {
                name: "mccarthy bldg",
                city: None,
                state: None,
                roster: &roster,
            })
            .await
            .unwrap();

        assert_eq!(assessment.recommendation, Recommendation::Merge);
    }
}
