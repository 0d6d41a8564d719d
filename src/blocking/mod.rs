//! Block classification, tactic selection and single-step evasion.

pub mod detectors;
pub mod evasion;
pub mod tactics;

pub use detectors::{BlockAnalysis, BlockClassifier, BlockKind, BlockResponse};
pub use evasion::{EvasionConfig, EvasionController, EvasionResult};
pub use tactics::{SuggestedTactic, Tactic, fallback_tactics};
