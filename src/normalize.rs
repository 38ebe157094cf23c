// src/normalize.rs
//
// Canonicalization of free-text company names. Two normal forms exist:
// `normalize` produces the display form (title case, expanded
// abbreviations) and `alias_key` produces the lookup form (lowercased,
// whitespace-collapsed) stored in alias sets and used for equality.

use once_cell::sync::Lazy;
use regex::Regex;

/// Legal-entity acronyms kept fully upper-cased in display names.
const LEGAL_ACRONYMS: [&str; 6] = ["LLC", "INC", "LP", "LLP", "PC", "PLLC"];

/// Abbreviations expanded anywhere in the name.
const EMBEDDED_ABBREVIATIONS: [(&str, &str); 8] = [
    ("Const", "Construction"),
    ("Bldrs", "Builders"),
    ("Bldg", "Building"),
    ("Mgmt", "Management"),
    ("Dev", "Development"),
    ("Grp", "Group"),
    ("Intl", "International"),
    ("Natl", "National"),
];

/// Abbreviations expanded only in trailing position ("Smith Co" becomes
/// "Smith Company" but "Co Builders" is left alone).
const TRAILING_ABBREVIATIONS: [(&str, &str); 2] = [("Co", "Company"), ("Corp", "Corporation")];

static EMBEDDED_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    EMBEDDED_ABBREVIATIONS
        .iter()
        .map(|(abbr, full)| {
            let pattern = format!(r"(?i)\b{}\b", abbr);
            (Regex::new(&pattern).expect("static abbreviation pattern"), *full)
        })
        .collect()
});

static TRAILING_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    TRAILING_ABBREVIATIONS
        .iter()
        .map(|(abbr, full)| {
            let pattern = format!(r"(?i)\b{}$", abbr);
            (Regex::new(&pattern).expect("static abbreviation pattern"), *full)
        })
        .collect()
});

/// Canonical display form of a raw company name.
///
/// Deterministic, pure, and total: whitespace is collapsed, tokens are
/// title-cased except legal-entity acronyms (upper-cased), and the fixed
/// abbreviation dictionary is expanded. Idempotent: expanded words no
/// longer match their abbreviation patterns and title case is stable.
pub fn normalize(raw: &str) -> String {
    let title_cased = raw
        .split_whitespace()
        .map(title_case_token)
        .collect::<Vec<_>>()
        .join(" ");

    let mut name = title_cased;
    for (pattern, replacement) in EMBEDDED_PATTERNS.iter() {
        name = pattern.replace_all(&name, *replacement).into_owned();
    }
    for (pattern, replacement) in TRAILING_PATTERNS.iter() {
        name = pattern.replace(&name, *replacement).into_owned();
    }
    name
}

/// Lookup form of a raw name: trimmed, internal whitespace collapsed,
/// lowercased. This is the form stored in alias sets (the literal text of
/// every submission survives as an alias in this form) and compared for
/// exact-match detection.
pub fn alias_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn title_case_token(token: &str) -> String {
    let upper = token.to_uppercase();
    if LEGAL_ACRONYMS.contains(&upper.as_str()) {
        return upper;
    }
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_title_cases() {
        assert_eq!(normalize("  turner   construction  "), "Turner Construction");
        assert_eq!(normalize("mccarthy building"), "Mccarthy Building");
    }

    #[test]
    fn preserves_legal_acronyms() {
        assert_eq!(normalize("acme fabricators llc"), "Acme Fabricators LLC");
        assert_eq!(normalize("smith & jones pllc"), "Smith & Jones PLLC");
        assert_eq!(normalize("western partners lp"), "Western Partners LP");
    }

    #[test]
    fn expands_embedded_abbreviations() {
        assert_eq!(normalize("turner const"), "Turner Construction");
        assert_eq!(normalize("apex bldg grp"), "Apex Building Group");
        assert_eq!(normalize("pacific dev mgmt"), "Pacific Development Management");
        assert_eq!(normalize("natl bldrs intl"), "National Builders International");
    }

    #[test]
    fn expands_trailing_abbreviations_only_at_end() {
        assert_eq!(normalize("smith co"), "Smith Company");
        assert_eq!(normalize("jones corp"), "Jones Corporation");
        // Mid-name occurrences are left alone.
        assert_eq!(normalize("co op builders"), "Co Op Builders");
        assert_eq!(normalize("corp plaza const"), "Corp Plaza Construction");
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "turner const co",
            "ACME SPECIALTY FABRICATORS LLC",
            "  mixed   Case  bldg   corp ",
            "",
            "x",
            "smith & jones pllc",
        ];
        for raw in inputs {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(alias_key(""), "");
    }

    #[test]
    fn alias_key_lowercases_and_collapses() {
        assert_eq!(alias_key("  Turner   Const "), "turner const");
        assert_eq!(alias_key("ACME LLC"), "acme llc");
    }

    #[test]
    fn alias_key_is_idempotent() {
        let key = alias_key("  Turner   Const ");
        assert_eq!(alias_key(&key), key);
    }
}
