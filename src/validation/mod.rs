//! Data validation and retry policy.
//!
//! [`DataValidator`] scores extracted data against the schema, a handful of
//! domain rules and (optionally) a consistency advisor. [`RetryPolicy`] turns
//! the verdict into the next workflow action.

mod retry;
mod validator;

pub use retry::{RetryAction, RetryDirective, RetryPolicy};
pub use validator::{DataValidator, ValidationConfig};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::FieldValue;

/// Category of a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    MissingRequired,
    RequiredNull,
    TypeMismatch,
    InvalidValue,
    Consistency,
}

impl ValidationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationErrorKind::MissingRequired => "missing_required",
            ValidationErrorKind::RequiredNull => "required_null",
            ValidationErrorKind::TypeMismatch => "type_mismatch",
            ValidationErrorKind::InvalidValue => "invalid_value",
            ValidationErrorKind::Consistency => "consistency",
        }
    }

    /// Errors that mean a required value never came back.
    pub fn is_missing(self) -> bool {
        matches!(
            self,
            ValidationErrorKind::MissingRequired | ValidationErrorKind::RequiredNull
        )
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
    pub value: FieldValue,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
        value: FieldValue,
    ) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
            value,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.field, self.kind, self.message)
    }
}

/// Verdict over one extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// `true` exactly when `errors` is empty.
    pub valid: bool,
    pub errors: Vec<FieldError>,
    pub warnings: Vec<String>,
    pub confidence_scores: IndexMap<String, f64>,
    pub overall_confidence: f64,
}

impl ValidationResult {
    pub fn new(errors: Vec<FieldError>, warnings: Vec<String>, confidence_scores: IndexMap<String, f64>) -> Self {
        let overall_confidence = aggregate_confidence(&confidence_scores);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            confidence_scores,
            overall_confidence,
        }
    }

    pub fn has_error(&self, predicate: impl Fn(ValidationErrorKind) -> bool) -> bool {
        self.errors.iter().any(|error| predicate(error.kind))
    }
}

/// Mean of the per-field scores, `0.0` when there are none.
pub fn aggregate_confidence(scores: &IndexMap<String, f64>) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.values().sum::<f64>() / scores.len() as f64
}
