// src/submission.rs
//
// Intake path for "this contractor doesn't exist, add it". The oracle's
// duplicate assessment is advisory: whatever it says, the caller gets a
// usable provisional entity immediately and a reviewer settles the question
// later. The provisional entity and its queue item are created as one
// atomic pair.

use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::errors::ResolutionError;
use crate::models::core::{
    ContractorEntity, QueueStatus, Recommendation, ReviewQueueItem, SubmissionContext,
};
use crate::models::matching::{SubmissionOutcome, SubmissionRequest};
use crate::normalize::{alias_key, normalize};
use crate::oracle::{DuplicateAssessment, MatchOracle, SubmissionCheck};
use crate::storage::EntityStore;
use crate::utils::constants::{DEGRADED_ANALYSIS_CONFIDENCE, ROSTER_LIMIT};

/// Creates a provisional contractor plus its pending review item and
/// returns both. Never fails because the oracle was unavailable; does fail
/// on invalid input or storage errors.
pub async fn submit(
    store: &dyn EntityStore,
    oracle: &dyn MatchOracle,
    request: SubmissionRequest,
) -> Result<SubmissionOutcome, ResolutionError> {
    let raw_name = request.name.trim().to_string();
    if raw_name.is_empty() {
        return Err(ResolutionError::Validation(
            "contractor name must not be empty".to_string(),
        ));
    }

    let roster = store.approved_roster(ROSTER_LIMIT).await?;

    let mut assessment = match oracle
        .assess_submission(SubmissionCheck {
            name: &raw_name,
            city: request.city.as_deref(),
            state: request.state.as_deref(),
            roster: &roster,
        })
        .await
    {
        Ok(assessment) => assessment,
        Err(e) => {
            warn!("Duplicate analysis failed for {:?}: {}", raw_name, e);
            degraded_assessment(&raw_name)
        }
    };

    // A merge recommendation is only as good as its target. If the oracle
    // pointed at an id we don't know, downgrade rather than trust it.
    if assessment.recommendation == Recommendation::Merge {
        let target_known = match assessment.suggested_match_id {
            Some(id) => roster.iter().any(|entry| entry.id == id),
            None => false,
        };
        if !target_known {
            warn!(
                "Oracle recommended merge for {:?} without a usable target, downgrading to new",
                raw_name
            );
            assessment.recommendation = Recommendation::New;
            assessment.suggested_match_id = None;
            assessment.suggested_match_name = None;
            assessment
                .warnings
                .push("Suggested duplicate could not be verified".to_string());
        }
    }

    let formatted_name = if assessment.formatted_name.trim().is_empty() {
        normalize(&raw_name)
    } else {
        assessment.formatted_name.clone()
    };

    let now = Utc::now();
    let entity = ContractorEntity {
        id: Uuid::new_v4(),
        name: formatted_name.clone(),
        city: request.city.clone(),
        state: request.state.clone(),
        aliases: vec![alias_key(&raw_name)],
        approved: false,
        risk_tags: request.risk_tags.clone(),
        star_rating: request.star_rating,
        created_by: Some(request.submitter_id),
        created_at: now,
        approved_at: None,
        approved_by: None,
    };

    let item = ReviewQueueItem {
        id: Uuid::new_v4(),
        submitted_name: raw_name.clone(),
        submitted_by: request.submitter_id,
        provisional_entity_id: Some(entity.id),
        recommendation: assessment.recommendation,
        confidence: assessment.confidence,
        suggested_match_id: assessment.suggested_match_id,
        reasoning: assessment.reasoning.clone(),
        context: SubmissionContext {
            city: request.city,
            state: request.state,
            star_rating: request.star_rating,
            risk_tags: request.risk_tags,
            formatted_name: Some(formatted_name),
            suggested_match_name: assessment.suggested_match_name.clone(),
            warnings: assessment.warnings.clone(),
            originating_project_id: request.project_id,
        },
        status: QueueStatus::Pending,
        submitted_at: now,
        resolved_at: None,
        resolved_by: None,
        resolved_action: None,
    };

    store.create_submission(&entity, &item).await?;
    info!(
        "Created provisional contractor {} ({:?}) with queue item {}",
        entity.id, entity.name, item.id
    );

    let suggested_duplicate = match (assessment.recommendation, assessment.suggested_match_id) {
        (Recommendation::Merge, Some(id)) => store.get_entity(id).await?,
        _ => None,
    };

    let message = match &suggested_duplicate {
        Some(duplicate) => format!(
            "This may be a duplicate of \"{}\". You can use it now, and a reviewer will decide.",
            duplicate.name
        ),
        None => "New contractor added. A reviewer will approve it shortly.".to_string(),
    };

    Ok(SubmissionOutcome {
        entity,
        queue_item: item,
        recommendation: assessment.recommendation,
        confidence: assessment.confidence,
        reasoning: assessment.reasoning,
        suggested_duplicate,
        warnings: assessment.warnings,
        message,
    })
}

/// Fallback assessment used when the oracle is unreachable or unparsable.
fn degraded_assessment(raw_name: &str) -> DuplicateAssessment {
    DuplicateAssessment {
        recommendation: Recommendation::New,
        confidence: DEGRADED_ANALYSIS_CONFIDENCE,
        reasoning: "Automated duplicate analysis was unavailable; defaulting to new.".to_string(),
        suggested_match_id: None,
        suggested_match_name: None,
        formatted_name: normalize(raw_name),
        warnings: vec!["Duplicate analysis degraded - manual review recommended".to_string()],
    }
}
