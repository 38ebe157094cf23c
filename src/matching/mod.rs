// src/matching/mod.rs
//
// Tiered candidate search: substring match on canonical names, alias-set
// membership, then the fuzzy oracle over the approved roster. Tiers run
// top-down and the oracle is only consulted when the cheap tiers come up
// empty. Oracle failures degrade to a "likely new" result; search never
// errors because the oracle did.

use log::{debug, warn};
use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::ResolutionError;
use crate::models::matching::{MatchCandidate, MatchResult};
use crate::normalize::{alias_key, normalize};
use crate::oracle::{FuzzyQuery, MatchOracle};
use crate::storage::EntityStore;
use crate::utils::constants::{
    ALIAS_MATCH_LIMIT, DIRECT_MATCH_LIMIT, FUZZY_CONFIDENCE_FLOOR, MIN_QUERY_LENGTH, ROSTER_LIMIT,
};

/// Tiered lookup of a raw user query against the contractor roster.
pub async fn run_search(
    store: &dyn EntityStore,
    oracle: &dyn MatchOracle,
    raw_query: &str,
    include_unapproved: bool,
) -> Result<MatchResult, ResolutionError> {
    let trimmed = raw_query.trim();
    if trimmed.chars().count() < MIN_QUERY_LENGTH {
        debug!("Query {:?} below minimum length, skipping all tiers", raw_query);
        return Ok(MatchResult::empty());
    }

    let query_key = alias_key(trimmed);

    // Tier 1: case-insensitive substring match on canonical names.
    let direct = store
        .find_by_name_fragment(trimmed, include_unapproved, DIRECT_MATCH_LIMIT)
        .await?;

    let mut seen: HashSet<Uuid> = direct.iter().map(|e| e.id).collect();
    let mut candidates: Vec<MatchCandidate> =
        direct.into_iter().map(MatchCandidate::direct).collect();

    // Tier 2: alias membership among approved entities, deduplicated into
    // the tier-1 results.
    let alias_hits = store.find_by_alias(&query_key, ALIAS_MATCH_LIMIT).await?;
    for entity in alias_hits {
        if seen.insert(entity.id) {
            candidates.push(MatchCandidate::alias(entity));
        }
    }

    if !candidates.is_empty() {
        let exact_match = candidates.iter().any(|c| {
            alias_key(&c.entity.name) == query_key || c.entity.has_alias(&query_key)
        });
        return Ok(MatchResult {
            matches: candidates,
            exact_match,
            likely_new: false,
            suggested_name: String::new(),
        });
    }

    // Tier 3: fuzzy oracle over the approved roster.
    let roster = store.approved_roster(ROSTER_LIMIT).await?;
    if roster.is_empty() {
        debug!("Empty roster, skipping fuzzy tier for {:?}", trimmed);
        return Ok(MatchResult::likely_new(normalize(trimmed)));
    }

    let ranking = match oracle
        .rank_candidates(FuzzyQuery {
            raw_query: trimmed,
            roster: &roster,
        })
        .await
    {
        Ok(ranking) => ranking,
        Err(e) => {
            // Degraded oracle is absorbed here: the caller sees a clean
            // "likely new" result, not an error.
            warn!("Fuzzy oracle failed for {:?}: {}", trimmed, e);
            return Ok(MatchResult::likely_new(normalize(trimmed)));
        }
    };

    let accepted: Vec<_> = ranking
        .candidates
        .into_iter()
        .filter(|c| c.confidence >= FUZZY_CONFIDENCE_FLOOR)
        .collect();

    let ids: Vec<Uuid> = accepted.iter().map(|c| c.id).collect();
    let entities = store.get_entities(&ids).await?;

    let mut matches = Vec::with_capacity(accepted.len());
    for candidate in accepted {
        // Oracle output is advisory; ids it hallucinated simply drop out.
        match entities.iter().find(|e| e.id == candidate.id) {
            Some(entity) => matches.push(MatchCandidate::fuzzy(
                entity.clone(),
                candidate.confidence,
                candidate.reason,
            )),
            None => warn!(
                "Fuzzy oracle suggested unknown entity {}, dropping",
                candidate.id
            ),
        }
    }

    let exact_match = matches.iter().any(|c| {
        alias_key(&c.entity.name) == query_key || c.entity.has_alias(&query_key)
    });
    let suggested_name = ranking
        .suggested_name
        .unwrap_or_else(|| normalize(trimmed));

    Ok(MatchResult {
        exact_match,
        likely_new: ranking.likely_new && matches.is_empty(),
        matches,
        suggested_name,
    })
}
