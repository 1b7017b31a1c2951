//! Ingestion controller
//!
//! Runs one submission through normalization, extraction, reconciliation
//! and score validation, then appends it to the results sink or routes it
//! to quarantine. Every collaborator is passed in.

use anyhow::Result;
use image::DynamicImage;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

use crate::analysis::{
    reconcile, ExtractedIdentity, IdentityConfidence, MatchResult, PendingCorrection, ScoreCheck,
    ScoreSet, ScoreValidator, Verdict,
};
use crate::storage::{QuarantineEntry, QuarantineSink, Registry, ResultRecord, ResultsSink};
use crate::vision::{BackendError, FieldExtractor, RegionTable, SheetBoundary, SheetNormalizer};

/// Source of quarantine timestamps
pub trait Clock {
    fn unix_timestamp(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_timestamp(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Supplies the single manual correction round for inconsistent scores
pub trait CorrectionSource {
    /// Overrides for any subset of items, or None to decline
    fn correct(&mut self, pending: &PendingCorrection) -> Result<Option<Vec<(String, u32)>>>;
}

/// Declines every correction, so a mismatch is rejected straight away
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

impl CorrectionSource for NoCorrection {
    fn correct(&mut self, _pending: &PendingCorrection) -> Result<Option<Vec<(String, u32)>>> {
        Ok(None)
    }
}

/// Why a submission went to manual inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuarantineReason {
    LowConfidence {
        confidence: IdentityConfidence,
        threshold: u8,
    },
    ScoreMismatch {
        item_sum: u64,
        total: u32,
    },
}

#[derive(Debug)]
pub enum SubmissionOutcome {
    Accepted(ResultRecord),
    Quarantined {
        entry: QuarantineEntry,
        reason: QuarantineReason,
    },
    /// A recognition backend failed; nothing was written
    Failed { error: BackendError },
}

/// Extracted against matched identity, with per-field confidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityComparison {
    pub extracted: ExtractedIdentity,
    pub matched: MatchResult,
    pub confidence: IdentityConfidence,
}

/// Everything observed while processing one sheet
#[derive(Debug)]
pub struct SubmissionReport {
    pub boundary: SheetBoundary,
    pub identity: Option<IdentityComparison>,
    /// Final scores, after any correction
    pub scores: Option<ScoreSet>,
    pub outcome: SubmissionOutcome,
}

impl SubmissionReport {
    pub fn boundary_detected(&self) -> bool {
        self.boundary.is_detected()
    }
}

/// Orchestrates the pipeline for one submission at a time
pub struct IngestionController {
    normalizer: SheetNormalizer,
    extractor: FieldExtractor,
    regions: RegionTable,
    registry: Option<Registry>,
    validator: ScoreValidator,
    confidence_threshold: u8,
    clock: Box<dyn Clock>,
}

impl IngestionController {
    pub fn new(
        normalizer: SheetNormalizer,
        extractor: FieldExtractor,
        regions: RegionTable,
        registry: Option<Registry>,
        validator: ScoreValidator,
        confidence_threshold: u8,
    ) -> Self {
        Self {
            normalizer,
            extractor,
            regions,
            registry,
            validator,
            confidence_threshold,
            clock: Box::new(SystemClock),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Process one photographed sheet
    ///
    /// Backend failures come back as `SubmissionOutcome::Failed`; only sink
    /// and quarantine I/O errors are returned as `Err`.
    pub fn process(
        &self,
        raw: &DynamicImage,
        corrections: &mut dyn CorrectionSource,
        results: &mut dyn ResultsSink,
        quarantine: &mut dyn QuarantineSink,
    ) -> Result<SubmissionReport> {
        let canonical = self.normalizer.normalize(raw);
        if let SheetBoundary::NotFound(reason) = &canonical.boundary {
            warn!("Sheet boundary not found ({}), continuing with a plain resize", reason);
        }

        let fields = match self.extractor.extract(&canonical.image, &self.regions) {
            Ok(fields) => fields,
            Err(e) => {
                error!("Field extraction failed: {}", e);
                return Ok(SubmissionReport {
                    boundary: canonical.boundary,
                    identity: None,
                    scores: None,
                    outcome: SubmissionOutcome::Failed { error: e },
                });
            }
        };

        let extracted = ExtractedIdentity::from_fields(&fields);
        let matched = reconcile(&extracted, self.registry.as_ref());
        let confidence = IdentityConfidence::between(&extracted, &matched);
        let identity = IdentityComparison {
            extracted,
            matched,
            confidence,
        };

        if !confidence.all_at_least(self.confidence_threshold) {
            warn!(
                "Identity confidence {:?} below threshold {}",
                confidence.as_array(),
                self.confidence_threshold
            );
            let entry = quarantine.quarantine(
                &canonical.image,
                &identity.extracted.student_number,
                self.clock.unix_timestamp(),
            )?;
            return Ok(SubmissionReport {
                boundary: canonical.boundary,
                identity: Some(identity),
                scores: None,
                outcome: SubmissionOutcome::Quarantined {
                    entry,
                    reason: QuarantineReason::LowConfidence {
                        confidence,
                        threshold: self.confidence_threshold,
                    },
                },
            });
        }

        let verdict = match self.validator.validate(ScoreSet::from_fields(&fields)) {
            ScoreCheck::Accepted(scores) => Verdict::Accepted(scores),
            ScoreCheck::CorrectionOffered(pending) => {
                warn!(
                    "Item scores sum to {} but total reads {}",
                    pending.scores().item_sum(),
                    pending.scores().total
                );
                self.run_correction(pending, corrections)?
            }
        };

        let outcome = match &verdict {
            Verdict::Accepted(scores) => {
                let matched = &identity.matched;
                let record = ResultRecord {
                    family_name: matched.family_name.clone(),
                    first_name: matched.first_name.clone(),
                    student_number: matched.student_number.clone(),
                    scores: scores.items.clone(),
                    total: scores.total,
                };
                results.append(&record)?;
                info!(
                    "Recorded {} {} ({}), total {}",
                    record.first_name, record.family_name, record.student_number, record.total
                );
                SubmissionOutcome::Accepted(record)
            }
            Verdict::Rejected(scores) => {
                warn!("Scores still inconsistent after correction, rejecting");
                let entry = quarantine.quarantine(
                    &canonical.image,
                    &identity.matched.student_number,
                    self.clock.unix_timestamp(),
                )?;
                SubmissionOutcome::Quarantined {
                    entry,
                    reason: QuarantineReason::ScoreMismatch {
                        item_sum: scores.item_sum(),
                        total: scores.total,
                    },
                }
            }
        };

        Ok(SubmissionReport {
            boundary: canonical.boundary,
            identity: Some(identity),
            scores: Some(verdict.final_scores().clone()),
            outcome,
        })
    }

    fn run_correction(
        &self,
        pending: PendingCorrection,
        corrections: &mut dyn CorrectionSource,
    ) -> Result<Verdict> {
        let Some(overrides) = corrections.correct(&pending)? else {
            return Ok(pending.decline());
        };

        match pending.clone().apply(&overrides) {
            Ok(verdict) => Ok(verdict),
            Err(e) => {
                warn!("Ignoring invalid correction: {}", e);
                Ok(pending.decline())
            }
        }
    }
}
