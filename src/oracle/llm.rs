// src/oracle/llm.rs
//
// LLM-backed oracle speaking the OLLAMA generate API with JSON-schema
// constrained output. Requests are bounded by a fixed timeout and a small
// retry budget; responses are parsed with fallback extraction since model
// output may wrap the JSON in prose or code fences.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use crate::models::core::Recommendation;
use crate::normalize::normalize;
use crate::oracle::{
    DuplicateAssessment, FuzzyCandidate, FuzzyQuery, FuzzyRanking, MatchOracle, OracleError,
    RosterEntry, SubmissionCheck,
};

/// Configuration for the LLM oracle client.
#[derive(Debug, Clone)]
pub struct LlmOracleConfig {
    pub url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_retries: usize,
}

impl Default for LlmOracleConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.1".to_string()),
            timeout_seconds: std::env::var("ORACLE_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            max_retries: std::env::var("ORACLE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// OLLAMA generate request with JSON schema for structured output.
#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    format: serde_json::Value,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Wire shape of a fuzzy-search answer.
#[derive(Deserialize)]
struct FuzzyPayload {
    #[serde(default)]
    matches: Vec<WireCandidate>,
    #[serde(rename = "isLikelyNew", default)]
    is_likely_new: bool,
    #[serde(rename = "suggestedName", default)]
    suggested_name: Option<String>,
}

#[derive(Deserialize)]
struct WireCandidate {
    id: String,
    confidence: f64,
    #[serde(default)]
    reason: String,
}

/// Wire shape of a duplicate assessment.
#[derive(Deserialize)]
struct AssessmentPayload {
    recommendation: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(rename = "suggestedMatchId", default)]
    suggested_match_id: Option<String>,
    #[serde(rename = "suggestedMatchName", default)]
    suggested_match_name: Option<String>,
    #[serde(rename = "formattedName", default)]
    formatted_name: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

pub struct LlmOracle {
    client: Client,
    config: LlmOracleConfig,
}

impl LlmOracle {
    pub fn new(config: LlmOracleConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(LlmOracleConfig::default())
    }

    async fn generate(&self, prompt: String, format: serde_json::Value) -> Result<String, OracleError> {
        let request = OllamaRequest {
            model: self.config.model.clone(),
            prompt,
            format,
            stream: false,
            options: OllamaOptions {
                temperature: 0.1,
                top_p: 0.9,
            },
        };

        let mut last_error = OracleError::Unavailable("no attempts made".to_string());
        for attempt in 1..=self.config.max_retries.max(1) {
            match timeout(
                Duration::from_secs(self.config.timeout_seconds),
                self.attempt_generate(&request),
            )
            .await
            {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => {
                    debug!("Oracle attempt {} failed: {}", attempt, e);
                    last_error = e;
                }
                Err(_) => {
                    debug!("Oracle attempt {} timed out", attempt);
                    last_error = OracleError::Timeout;
                }
            }
            if attempt < self.config.max_retries {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }
        }
        Err(last_error)
    }

    async fn attempt_generate(&self, request: &OllamaRequest) -> Result<String, OracleError> {
        let response = self
            .client
            .post(&format!("{}/api/generate", self.config.url))
            .json(request)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OracleError::Transport(format!(
                "oracle endpoint returned status {}",
                response.status()
            )));
        }

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        Ok(body.response)
    }
}

#[async_trait]
impl MatchOracle for LlmOracle {
    async fn rank_candidates(&self, query: FuzzyQuery<'_>) -> Result<FuzzyRanking, OracleError> {
        let prompt = fuzzy_prompt(query.raw_query, query.roster);
        let raw = self.generate(prompt, fuzzy_schema()).await?;
        let payload: FuzzyPayload = parse_json_response(&raw)?;

        let mut candidates = Vec::with_capacity(payload.matches.len());
        for wire in payload.matches {
            match wire.id.parse::<Uuid>() {
                Ok(id) => candidates.push(FuzzyCandidate {
                    id,
                    confidence: wire.confidence.clamp(0.0, 1.0),
                    reason: wire.reason,
                }),
                Err(_) => warn!("Dropping fuzzy candidate with unparsable id: {}", wire.id),
            }
        }

        Ok(FuzzyRanking {
            candidates,
            likely_new: payload.is_likely_new,
            suggested_name: payload.suggested_name.filter(|s| !s.trim().is_empty()),
        })
    }

    async fn assess_submission(
        &self,
        check: SubmissionCheck<'_>,
    ) -> Result<DuplicateAssessment, OracleError> {
        let prompt = assessment_prompt(&check);
        let raw = self.generate(prompt, assessment_schema()).await?;
        let payload: AssessmentPayload = parse_json_response(&raw)?;

        let recommendation = Recommendation::parse(&payload.recommendation.trim().to_lowercase())
            .ok_or_else(|| {
                OracleError::Malformed(format!(
                    "unknown recommendation '{}'",
                    payload.recommendation
                ))
            })?;

        let suggested_match_id = match payload.suggested_match_id.as_deref() {
            Some(raw_id) if !raw_id.is_empty() && raw_id != "null" => {
                match raw_id.parse::<Uuid>() {
                    Ok(id) => Some(id),
                    Err(_) => {
                        warn!("Dropping unparsable suggested match id: {}", raw_id);
                        None
                    }
                }
            }
            _ => None,
        };

        let formatted_name = payload
            .formatted_name
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| normalize(check.name));

        Ok(DuplicateAssessment {
            recommendation,
            confidence: payload.confidence.clamp(0.0, 1.0),
            reasoning: payload.reasoning,
            suggested_match_id,
            suggested_match_name: payload.suggested_match_name,
            formatted_name,
            warnings: payload.warnings,
        })
    }
}

fn fuzzy_prompt(raw_query: &str, roster: &[RosterEntry]) -> String {
    let roster_lines = roster
        .iter()
        .map(|entry| format!("{}|{}|{}", entry.id, entry.name, entry.location_label()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "User is searching for a General Contractor named: \"{raw_query}\"\n\n\
         Existing contractors in the database (format: id|name|location):\n\
         {roster_lines}\n\n\
         Task: Find the best matches for \"{raw_query}\". Consider:\n\
         - Spelling variations (Turner vs Turnar, McCarthy vs MacCarthy)\n\
         - Abbreviations (Const vs Construction, Co vs Company, Corp vs Corporation)\n\
         - Common typos and misspellings\n\
         - Partial matches (the user might type part of the name)\n\
         - Location variations (same company, different office)\n\n\
         Return up to 3 best matches if found.\n\n\
         Respond ONLY with valid JSON, no other text:\n\
         {{\n\
           \"matches\": [\n\
             {{\"id\": \"uuid-here\", \"confidence\": 0.95, \"reason\": \"Brief explanation\"}}\n\
           ],\n\
           \"isLikelyNew\": true or false,\n\
           \"suggestedName\": \"Properly Formatted Name if likely new\"\n\
         }}\n\n\
         If no good matches (confidence < 0.5), return an empty matches array and isLikelyNew: true."
    )
}

fn fuzzy_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "matches": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                        "reason": {"type": "string"}
                    },
                    "required": ["id", "confidence"]
                }
            },
            "isLikelyNew": {"type": "boolean"},
            "suggestedName": {"type": "string"}
        },
        "required": ["matches", "isLikelyNew"]
    })
}

fn assessment_prompt(check: &SubmissionCheck<'_>) -> String {
    let roster_lines = if check.roster.is_empty() {
        "No existing contractors in database".to_string()
    } else {
        check
            .roster
            .iter()
            .map(|entry| {
                let aliases = if entry.aliases.is_empty() {
                    String::new()
                } else {
                    format!(" [aliases: {}]", entry.aliases.join(", "))
                };
                format!(
                    "- {} ({}) [ID: {}]{}",
                    entry.name,
                    entry.location_label(),
                    entry.id,
                    aliases
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "A user wants to add a new General Contractor to the database:\n\n\
         **Submitted contractor:**\n\
         - Name: \"{name}\"\n\
         - City: {city}\n\
         - State: {state}\n\n\
         **Existing contractors in database:**\n\
         {roster_lines}\n\n\
         **Your task:**\n\
         1. Determine if this is likely a DUPLICATE of an existing contractor\n\
         2. Consider: spelling variations, abbreviations, typos, same company different location\n\
         3. If duplicate, identify which existing contractor it matches\n\
         4. If new, format the name properly (title case, expand abbreviations)\n\n\
         **Analysis criteria:**\n\
         - \"Turner Const\" = \"Turner Construction\" (abbreviation, DUPLICATE)\n\
         - \"McCarthy Building\" vs \"McCarthy Building Companies\" = Likely DUPLICATE\n\
         - \"Completely Different Name LLC\" = NEW\n\n\
         Respond ONLY with valid JSON:\n\
         {{\n\
           \"recommendation\": \"merge\" or \"new\",\n\
           \"confidence\": 0.0 to 1.0,\n\
           \"reasoning\": \"Clear explanation of why\",\n\
           \"suggestedMatchId\": \"uuid of best match or null if new\",\n\
           \"suggestedMatchName\": \"Name of matched contractor or null\",\n\
           \"formattedName\": \"Properly Formatted Contractor Name\",\n\
           \"warnings\": [\"array of any concerns about this submission\"]\n\
         }}",
        name = check.name,
        city = check.city.unwrap_or("Not provided"),
        state = check.state.unwrap_or("Not provided"),
        roster_lines = roster_lines,
    )
}

fn assessment_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "recommendation": {"type": "string", "enum": ["merge", "new"]},
            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "reasoning": {"type": "string"},
            "suggestedMatchId": {"type": ["string", "null"]},
            "suggestedMatchName": {"type": ["string", "null"]},
            "formattedName": {"type": "string"},
            "warnings": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["recommendation", "confidence", "reasoning", "formattedName"]
    })
}

/// Parses model output as JSON, falling back to extracting the first
/// balanced JSON object when the model wrapped it in extra text.
fn parse_json_response<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, OracleError> {
    if let Ok(parsed) = serde_json::from_str::<T>(raw) {
        return Ok(parsed);
    }
    if let Some(extracted) = extract_json_from_text(raw) {
        if let Ok(parsed) = serde_json::from_str::<T>(&extracted) {
            return Ok(parsed);
        }
    }
    Err(OracleError::Malformed(format!(
        "no parsable JSON object in oracle output ({} bytes)",
        raw.len()
    )))
}

/// Extract a JSON object from text that might have extra content.
fn extract_json_from_text(text: &str) -> Option<String> {
    let start = text.find('{')?;

    let mut brace_count = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_count += 1,
            '}' if !in_string => {
                brace_count -= 1;
                if brace_count == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let raw = "Sure! Here is the analysis:\n```json\n{\"matches\": [], \"isLikelyNew\": true}\n```\nHope that helps.";
        let extracted = extract_json_from_text(raw).unwrap();
        let payload: FuzzyPayload = serde_json::from_str(&extracted).unwrap();
        assert!(payload.is_likely_new);
        assert!(payload.matches.is_empty());
    }

    #[test]
    fn extraction_handles_braces_inside_strings() {
        let raw = "{\"matches\": [{\"id\": \"abc\", \"confidence\": 0.9, \"reason\": \"has a { brace\"}], \"isLikelyNew\": false} trailing";
        let extracted = extract_json_from_text(raw).unwrap();
        assert!(extracted.ends_with("false}"));
        let payload: FuzzyPayload = serde_json::from_str(&extracted).unwrap();
        assert_eq!(payload.matches.len(), 1);
    }

    #[test]
    fn parse_json_response_rejects_garbage() {
        let result: Result<FuzzyPayload, OracleError> = parse_json_response("not json at all");
        assert!(matches!(result, Err(OracleError::Malformed(_))));
    }

    #[test]
    fn fuzzy_prompt_lists_roster_entries() {
        let roster = vec![RosterEntry {
            id: Uuid::nil(),
            name: "Turner Construction".to_string(),
            city: Some("Denver".to_string()),
            state: Some("CO".to_string()),
            aliases: vec![],
        }];
        let prompt = fuzzy_prompt("turner const", &roster);
        assert!(prompt.contains("Turner Construction"));
        assert!(prompt.contains("Denver, CO"));
        assert!(prompt.contains("turner const"));
    }
}
