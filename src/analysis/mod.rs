//! Analysis layer
//!
//! Checks applied to extracted sheet data before anything is stored.

pub mod reconcile;
pub mod scores;

pub use reconcile::{reconcile, ExtractedIdentity, IdentityConfidence, MatchResult};
pub use scores::{PendingCorrection, ScoreCheck, ScoreSet, ScoreValidator, Verdict};
