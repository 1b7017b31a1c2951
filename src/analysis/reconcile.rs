//! Identity reconciliation against the student registry
//!
//! Family and first names are fuzzy-matched independently; an exact
//! student-number hit overrides both with that registry row.

use strsim::normalized_levenshtein;
use tracing::debug;

use crate::storage::registry::{IdentityRecord, Registry};
use crate::vision::extract::ExtractedFields;
use crate::vision::regions::FieldRole;

/// Identity text as read from the sheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedIdentity {
    pub family_name: String,
    pub first_name: String,
    pub student_number: String,
}

impl ExtractedIdentity {
    pub fn new(family_name: &str, first_name: &str, student_number: &str) -> Self {
        Self {
            family_name: family_name.to_string(),
            first_name: first_name.to_string(),
            student_number: student_number.to_string(),
        }
    }

    pub fn from_fields(fields: &ExtractedFields) -> Self {
        Self::new(
            fields.by_role(FieldRole::FamilyName),
            fields.by_role(FieldRole::FirstName),
            fields.by_role(FieldRole::StudentNumber),
        )
    }
}

/// How the matched identity was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    /// No registry to compare against
    PassThrough,
    /// Best fuzzy name matches, number kept as extracted
    Fuzzy,
    /// Exact student-number hit
    StudentNumber,
}

/// Fuzzy similarity of the best name candidates, 0-100
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameSimilarity {
    pub family_name: u8,
    pub first_name: u8,
}

/// Reconciled identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub family_name: String,
    pub first_name: String,
    pub student_number: String,
    /// None on pass-through
    pub similarity: Option<NameSimilarity>,
    pub source: MatchSource,
}

/// Normalized edit-distance similarity on a 0-100 scale
pub fn similarity_ratio(a: &str, b: &str) -> u8 {
    (normalized_levenshtein(a, b) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Best candidate by similarity; the first one wins a tie
fn best_match<'a>(
    query: &str,
    candidates: impl Iterator<Item = (usize, &'a str)>,
) -> Option<(usize, &'a str, u8)> {
    let mut best: Option<(usize, &'a str, u8)> = None;
    for (row, candidate) in candidates {
        let score = similarity_ratio(query, candidate);
        if best.map_or(true, |(_, _, top)| score > top) {
            best = Some((row, candidate, score));
        }
    }
    best
}

/// Reconcile extracted identity text with the registry
pub fn reconcile(extracted: &ExtractedIdentity, registry: Option<&Registry>) -> MatchResult {
    let registry = match registry {
        Some(registry) if !registry.is_empty() => registry,
        _ => {
            return MatchResult {
                family_name: extracted.family_name.clone(),
                first_name: extracted.first_name.clone(),
                student_number: extracted.student_number.clone(),
                similarity: None,
                source: MatchSource::PassThrough,
            };
        }
    };

    let records = registry.records();
    let family = best_match(
        &extracted.family_name,
        records.iter().map(|r| r.family_name.as_str()).enumerate(),
    );
    let first = best_match(
        &extracted.first_name,
        records.iter().map(|r| r.first_name.as_str()).enumerate(),
    );

    // Registry is non-empty here, so both have a candidate
    let (Some((family_row, family_name, family_score)), Some((first_row, first_name, first_score))) =
        (family, first)
    else {
        return MatchResult {
            family_name: extracted.family_name.clone(),
            first_name: extracted.first_name.clone(),
            student_number: extracted.student_number.clone(),
            similarity: None,
            source: MatchSource::PassThrough,
        };
    };

    let similarity = Some(NameSimilarity {
        family_name: family_score,
        first_name: first_score,
    });

    if let Some(IdentityRecord {
        family_name,
        first_name,
        student_number,
    }) = registry.find_by_number(&extracted.student_number)
    {
        debug!("Student number {} found in registry", student_number);
        return MatchResult {
            family_name: family_name.clone(),
            first_name: first_name.clone(),
            student_number: student_number.clone(),
            similarity,
            source: MatchSource::StudentNumber,
        };
    }

    if family_row != first_row {
        debug!(
            "Name matches come from different registry rows ({} and {})",
            family_row, first_row
        );
    }

    MatchResult {
        family_name: family_name.to_string(),
        first_name: first_name.to_string(),
        student_number: extracted.student_number.clone(),
        similarity,
        source: MatchSource::Fuzzy,
    }
}

/// Per-field agreement between extracted and matched text, 0-100
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityConfidence {
    pub family_name: u8,
    pub first_name: u8,
    pub student_number: u8,
}

impl IdentityConfidence {
    pub fn between(extracted: &ExtractedIdentity, matched: &MatchResult) -> Self {
        Self {
            family_name: name_confidence(&extracted.family_name, &matched.family_name),
            first_name: name_confidence(&extracted.first_name, &matched.first_name),
            student_number: number_confidence(&extracted.student_number, &matched.student_number),
        }
    }

    pub fn as_array(&self) -> [u8; 3] {
        [self.family_name, self.first_name, self.student_number]
    }

    pub fn all_at_least(&self, threshold: u8) -> bool {
        self.as_array().iter().all(|&c| c >= threshold)
    }
}

/// A name that was not read scores 0 even against an empty match
fn name_confidence(extracted: &str, matched: &str) -> u8 {
    if extracted.is_empty() || matched.is_empty() {
        0
    } else if extracted == matched {
        100
    } else {
        similarity_ratio(extracted, matched)
    }
}

fn number_confidence(extracted: &str, matched: &str) -> u8 {
    if extracted == matched {
        100
    } else {
        similarity_ratio(extracted, matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(vec![
            IdentityRecord::new("Smith", "John", "1001"),
            IdentityRecord::new("Jones", "Mary", "1002"),
            IdentityRecord::new("Brown", "Alice", "1003"),
        ])
    }

    #[test]
    fn test_similarity_ratio() {
        assert_eq!(similarity_ratio("SMITH", "SMITH"), 100);
        assert_eq!(similarity_ratio("SM1TH", "SMITH"), 80);
        assert_eq!(similarity_ratio("ABC", "XYZ"), 0);
    }

    #[test]
    fn test_student_number_overrides_names() {
        let extracted = ExtractedIdentity::new("SM1TH", "JON", "1001");
        let matched = reconcile(&extracted, Some(&registry()));

        assert_eq!(matched.source, MatchSource::StudentNumber);
        assert_eq!(matched.family_name, "SMITH");
        assert_eq!(matched.first_name, "JOHN");
        assert_eq!(matched.student_number, "1001");

        let confidence = IdentityConfidence::between(&extracted, &matched);
        assert_eq!(confidence.student_number, 100);
    }

    #[test]
    fn test_number_wins_over_better_name_match() {
        // Names point at JONES/MARY, number points at SMITH/JOHN
        let extracted = ExtractedIdentity::new("JONES", "MARY", "1001");
        let matched = reconcile(&extracted, Some(&registry()));

        assert_eq!(matched.family_name, "SMITH");
        assert_eq!(matched.first_name, "JOHN");
        assert_eq!(
            matched.similarity,
            Some(NameSimilarity {
                family_name: 100,
                first_name: 100
            })
        );
    }

    #[test]
    fn test_unknown_number_keeps_extracted_value() {
        let extracted = ExtractedIdentity::new("BR0WN", "ALICE", "1O03");
        let matched = reconcile(&extracted, Some(&registry()));

        assert_eq!(matched.source, MatchSource::Fuzzy);
        assert_eq!(matched.family_name, "BROWN");
        assert_eq!(matched.first_name, "ALICE");
        assert_eq!(matched.student_number, "1O03");
    }

    #[test]
    fn test_names_match_independently() {
        let extracted = ExtractedIdentity::new("SMITH", "MARY", "9999");
        let matched = reconcile(&extracted, Some(&registry()));

        assert_eq!(matched.family_name, "SMITH");
        assert_eq!(matched.first_name, "MARY");
    }

    #[test]
    fn test_tie_keeps_first_row() {
        let registry = Registry::new(vec![
            IdentityRecord::new("AAB", "X", "1"),
            IdentityRecord::new("ABB", "Y", "2"),
        ]);
        let matched = reconcile(&ExtractedIdentity::new("AXB", "Z", "3"), Some(&registry));
        assert_eq!(matched.family_name, "AAB");
    }

    #[test]
    fn test_pass_through_without_registry() {
        let extracted = ExtractedIdentity::new("SM1TH", "JON", "1001");

        for registry in [None, Some(Registry::default())] {
            let matched = reconcile(&extracted, registry.as_ref());
            assert_eq!(matched.source, MatchSource::PassThrough);
            assert_eq!(matched.family_name, "SM1TH");
            assert_eq!(matched.first_name, "JON");
            assert_eq!(matched.student_number, "1001");
            assert_eq!(matched.similarity, None);
        }
    }

    #[test]
    fn test_confidence_rules() {
        let matched = MatchResult {
            family_name: "SMITH".to_string(),
            first_name: "JOHN".to_string(),
            student_number: "1001".to_string(),
            similarity: None,
            source: MatchSource::Fuzzy,
        };

        let confidence =
            IdentityConfidence::between(&ExtractedIdentity::new("SM1TH", "", "1001"), &matched);
        assert_eq!(confidence.family_name, 80);
        assert_eq!(confidence.first_name, 0);
        assert_eq!(confidence.student_number, 100);
    }

    #[test]
    fn test_empty_number_kept_as_extracted_is_full_confidence() {
        let extracted = ExtractedIdentity::new("SMITH", "JOHN", "");

        let matched = reconcile(&extracted, None);
        let confidence = IdentityConfidence::between(&extracted, &matched);
        assert_eq!(confidence.as_array(), [100, 100, 100]);

        let matched = reconcile(&extracted, Some(&registry()));
        assert_eq!(matched.source, MatchSource::Fuzzy);
        assert_eq!(matched.student_number, "");
        let confidence = IdentityConfidence::between(&extracted, &matched);
        assert_eq!(confidence.student_number, 100);
        assert!(confidence.all_at_least(50));
    }

    #[test]
    fn test_empty_names_block_the_gate() {
        let extracted = ExtractedIdentity::new("", "", "1001");
        let matched = reconcile(&extracted, None);
        let confidence = IdentityConfidence::between(&extracted, &matched);
        assert_eq!(confidence.as_array(), [0, 0, 100]);
    }

    #[test]
    fn test_gate_requires_every_field() {
        let confidence = IdentityConfidence {
            family_name: 51,
            first_name: 51,
            student_number: 49,
        };
        assert!(!confidence.all_at_least(50));

        let confidence = IdentityConfidence {
            family_name: 50,
            first_name: 100,
            student_number: 50,
        };
        assert!(confidence.all_at_least(50));
    }
}
