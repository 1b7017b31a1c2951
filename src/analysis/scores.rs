//! Score consistency validation
//!
//! Item scores must add up to the separately read total. A mismatch gets
//! exactly one correction round before the sheet is rejected.

use std::collections::HashMap;
use thiserror::Error;

use crate::vision::extract::ExtractedFields;
use crate::vision::regions::FieldRole;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoreError {
    #[error("no score item named {0:?}")]
    UnknownItem(String),
    #[error("score {value} for {item} exceeds the maximum of {max}")]
    OutOfRange { item: String, value: u32, max: u32 },
}

/// Item scores in template order plus the extracted total
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreSet {
    pub items: Vec<(String, u32)>,
    pub total: u32,
}

impl ScoreSet {
    pub fn new(items: Vec<(String, u32)>, total: u32) -> Self {
        Self { items, total }
    }

    /// Parse sanitized score text; digit runs too long for u32 saturate
    pub fn from_fields(fields: &ExtractedFields) -> Self {
        let items = fields
            .scores()
            .map(|field| (field.name.clone(), parse_score(&field.text)))
            .collect();
        Self::new(items, parse_score(fields.by_role(FieldRole::Total)))
    }

    pub fn item_sum(&self) -> u64 {
        self.items.iter().map(|(_, score)| u64::from(*score)).sum()
    }

    pub fn is_consistent(&self) -> bool {
        self.item_sum() == u64::from(self.total)
    }

    pub fn get(&self, item: &str) -> Option<u32> {
        self.items
            .iter()
            .find(|(name, _)| name == item)
            .map(|(_, score)| *score)
    }
}

fn parse_score(text: &str) -> u32 {
    let digits = text.trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return 0;
    }
    digits.parse().unwrap_or(u32::MAX)
}

/// Terminal outcome of validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(ScoreSet),
    Rejected(ScoreSet),
}

impl Verdict {
    pub fn final_scores(&self) -> &ScoreSet {
        match self {
            Verdict::Accepted(scores) | Verdict::Rejected(scores) => scores,
        }
    }
}

/// Result of the first consistency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreCheck {
    Accepted(ScoreSet),
    CorrectionOffered(PendingCorrection),
}

/// An inconsistent score set waiting for its single correction round
///
/// Consumed by `apply` or `decline`, so a second round cannot happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCorrection {
    scores: ScoreSet,
    max_item_score: u32,
}

impl PendingCorrection {
    pub fn scores(&self) -> &ScoreSet {
        &self.scores
    }

    pub fn max_item_score(&self) -> u32 {
        self.max_item_score
    }

    /// Check one override without consuming the correction
    pub fn check_override(&self, item: &str, value: u32) -> Result<(), ScoreError> {
        if self.scores.get(item).is_none() {
            return Err(ScoreError::UnknownItem(item.to_string()));
        }
        if value > self.max_item_score {
            return Err(ScoreError::OutOfRange {
                item: item.to_string(),
                value,
                max: self.max_item_score,
            });
        }
        Ok(())
    }

    /// Apply overrides for any subset of items and re-sum once
    pub fn apply(self, overrides: &[(String, u32)]) -> Result<Verdict, ScoreError> {
        let mut updates = HashMap::new();
        for (item, value) in overrides {
            self.check_override(item, *value)?;
            updates.insert(item.as_str(), *value);
        }

        let mut scores = self.scores;
        for (name, score) in scores.items.iter_mut() {
            if let Some(value) = updates.get(name.as_str()) {
                *score = *value;
            }
        }

        if scores.is_consistent() {
            Ok(Verdict::Accepted(scores))
        } else {
            Ok(Verdict::Rejected(scores))
        }
    }

    /// No correction supplied
    pub fn decline(self) -> Verdict {
        Verdict::Rejected(self.scores)
    }
}

/// Checks that item scores add up to the total
#[derive(Debug, Clone, Copy)]
pub struct ScoreValidator {
    max_item_score: u32,
}

impl ScoreValidator {
    pub fn new(max_item_score: u32) -> Self {
        Self { max_item_score }
    }

    pub fn validate(&self, scores: ScoreSet) -> ScoreCheck {
        if scores.is_consistent() {
            ScoreCheck::Accepted(scores)
        } else {
            ScoreCheck::CorrectionOffered(PendingCorrection {
                scores,
                max_item_score: self.max_item_score,
            })
        }
    }
}
