//! Subject-label normalization and containment matching.
//!
//! Free-text subject names arrive from uploaded attendance sheets and from
//! people typing them by hand, so case, accents and punctuation vary. Labels
//! are compared only after `normalize`, and `find_match` resolves a raw label
//! to the first catalog entry whose normalized name contains it (or is
//! contained by it).

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// One canonical catalog entry (e.g. a row of `subjects`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceLabel {
    pub id: String,
    pub name: String,
}

impl ReferenceLabel {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Outcome of a successful lookup. Both normalized forms are kept so callers
/// can show why two labels were considered the same.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub id: String,
    pub name: String,
    pub normalized_match: String,
    pub normalized_input: String,
}

fn is_combining_mark(c: char) -> bool {
    ('\u{0300}'..='\u{036F}').contains(&c)
}

/// Canonical comparison form of a label: uppercase, accents removed, only
/// `A-Z`, `0-9` and whitespace kept, outer whitespace trimmed.
///
/// Total: any input, including the empty string, yields a string.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let upper = text.to_uppercase();
    let stripped: String = upper
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        // Unicode `White_Space`: U+0085 counts as a space, U+FEFF does not.
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    stripped.trim().to_string()
}

/// `normalize` for values that may be missing (nullable DB columns, absent
/// JSON fields). Absent is treated as empty.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// Returns the first reference, in the given order, whose normalized name
/// contains the normalized `raw` label or is contained by it.
///
/// An input that normalizes to nothing never matches. A reference whose name
/// normalizes to nothing matches every non-empty input; callers that load
/// references from storage drop those entries first (see
/// `store::reference_labels`).
pub fn find_match(raw: &str, references: &[ReferenceLabel]) -> Option<MatchResult> {
    let normalized_input = normalize(raw);
    if normalized_input.is_empty() {
        return None;
    }

    references.iter().find_map(|reference| {
        let normalized_match = normalize(&reference.name);
        let related = normalized_match.contains(normalized_input.as_str())
            || normalized_input.contains(normalized_match.as_str());
        related.then(|| MatchResult {
            id: reference.id.clone(),
            name: reference.name.clone(),
            normalized_match,
            normalized_input: normalized_input.clone(),
        })
    })
}
