// src/utils/constants.rs

/// Shortest trimmed query the matcher will run. Anything shorter returns an
/// empty result without touching storage or the oracle.
pub const MIN_QUERY_LENGTH: usize = 2;

/// Cap on tier-1 substring matches, ordered by name ascending.
pub const DIRECT_MATCH_LIMIT: i64 = 10;

/// Cap on tier-2 alias matches merged into the tier-1 results.
pub const ALIAS_MATCH_LIMIT: i64 = 5;

/// Bound on the approved roster handed to the fuzzy/duplicate oracle.
pub const ROSTER_LIMIT: i64 = 500;

/// Oracle candidates below this confidence are dropped from search results.
pub const FUZZY_CONFIDENCE_FLOOR: f64 = 0.5;

/// Confidence recorded on a submission when the oracle was unavailable and
/// the engine fell back to recommending `new`.
pub const DEGRADED_ANALYSIS_CONFIDENCE: f64 = 0.5;
