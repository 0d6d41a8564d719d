use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{FieldError, ValidationErrorKind, ValidationResult};
use crate::config::duration_secs;
use crate::core::{FieldMap, FieldValue, Schema, clean_content};
use crate::external_deps::advisory::{ConsistencyAdvisor, bounded};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("invalid email pattern")
});

const MAX_PLAUSIBLE_PRICE: f64 = 1_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Score given to each non-null field when no consistency check runs.
    pub default_confidence: f64,
    /// Score given to every field when the advisor fails.
    pub advisor_failure_confidence: f64,
    /// Characters of cleaned content sent to the advisor.
    pub content_chars: usize,
    #[serde(with = "duration_secs")]
    pub advisory_timeout: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            default_confidence: 0.7,
            advisor_failure_confidence: 0.5,
            content_chars: 3000,
            advisory_timeout: Duration::from_secs(30),
        }
    }
}

/// Schema, domain-rule and consistency validation.
#[derive(Clone, Default)]
pub struct DataValidator {
    advisor: Option<Arc<dyn ConsistencyAdvisor>>,
    config: ValidationConfig,
}

impl DataValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { advisor: None, config }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn ConsistencyAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub async fn validate(&self, data: &FieldMap, schema: &Schema, content: Option<&str>) -> ValidationResult {
        log::info!("validating {} fields", data.len());
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        check_schema(data, schema, &mut errors, &mut warnings);
        check_domain_rules(data, &mut errors, &mut warnings);

        let content = content.filter(|content| !content.is_empty());
        let scores = match (&self.advisor, content) {
            (Some(advisor), Some(content)) => {
                self.consult(advisor.as_ref(), data, content, schema, &mut errors, &mut warnings)
                    .await
            }
            _ => data
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(field, _)| (field.clone(), self.config.default_confidence))
                .collect(),
        };

        let result = ValidationResult::new(errors, warnings, scores);
        log::debug!(
            "validation: valid={} confidence={:.2} errors={} warnings={}",
            result.valid,
            result.overall_confidence,
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    async fn consult(
        &self,
        advisor: &dyn ConsistencyAdvisor,
        data: &FieldMap,
        content: &str,
        schema: &Schema,
        errors: &mut Vec<FieldError>,
        warnings: &mut Vec<String>,
    ) -> IndexMap<String, f64> {
        let excerpt = clean_content(content, self.config.content_chars);
        match bounded(self.config.advisory_timeout, advisor.assess(data, &excerpt, schema)).await {
            Ok(assessments) => {
                let mut scores = IndexMap::with_capacity(assessments.len());
                for (field, assessment) in assessments {
                    if !assessment.appears_in_source {
                        let value = data.get(&field).cloned().unwrap_or_default();
                        errors.push(FieldError::new(
                            field.clone(),
                            ValidationErrorKind::Consistency,
                            format!("Value not found in source: {value}"),
                            value,
                        ));
                    }
                    warnings.extend(assessment.issues.iter().map(|issue| format!("{field}: {issue}")));
                    scores.insert(field, assessment.confidence.clamp(0.0, 1.0));
                }
                scores
            }
            Err(err) => {
                log::error!("consistency check failed: {err}");
                data.keys()
                    .map(|field| (field.clone(), self.config.advisor_failure_confidence))
                    .collect()
            }
        }
    }
}

impl fmt::Debug for DataValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataValidator")
            .field("advisor", &self.advisor.is_some())
            .field("config", &self.config)
            .finish()
    }
}

fn check_schema(data: &FieldMap, schema: &Schema, errors: &mut Vec<FieldError>, warnings: &mut Vec<String>) {
    for (field, definition) in schema {
        let Some(value) = data.get(field) else {
            if definition.required {
                errors.push(FieldError::new(
                    field.clone(),
                    ValidationErrorKind::MissingRequired,
                    format!("Required field '{field}' is missing"),
                    FieldValue::Null,
                ));
            }
            continue;
        };

        if value.is_null() {
            if definition.required {
                errors.push(FieldError::new(
                    field.clone(),
                    ValidationErrorKind::RequiredNull,
                    format!("Required field '{field}' is null"),
                    FieldValue::Null,
                ));
            }
            continue;
        }

        if !definition.field_type.accepts(value) {
            errors.push(FieldError::new(
                field.clone(),
                ValidationErrorKind::TypeMismatch,
                format!("Expected type {}, got {}", definition.field_type, value.type_name()),
                value.clone(),
            ));
        }

        if let (Some((min, max)), Some(number)) = (definition.range, value.as_f64())
            && !(min..=max).contains(&number)
        {
            warnings.push(format!("{field}: Value {value} out of range [{min}, {max}]"));
        }

        if let (Some(pattern), Some(text)) = (&definition.pattern, value.as_str()) {
            match Regex::new(pattern) {
                Ok(regex) => {
                    if !regex.find(text).is_some_and(|found| found.start() == 0) {
                        warnings.push(format!("{field}: Value doesn't match pattern {pattern}"));
                    }
                }
                Err(err) => warnings.push(format!("{field}: invalid pattern {pattern}: {err}")),
            }
        }
    }
}

fn check_domain_rules(data: &FieldMap, errors: &mut Vec<FieldError>, warnings: &mut Vec<String>) {
    let price = data.get("price").and_then(FieldValue::as_f64);
    if let Some(price) = price {
        if price <= 0.0 {
            errors.push(FieldError::new(
                "price",
                ValidationErrorKind::InvalidValue,
                format!("Price must be positive, got {price}"),
                data["price"].clone(),
            ));
        } else if price > MAX_PLAUSIBLE_PRICE {
            warnings.push(format!("Unusually high price: {price}"));
        }
    }

    let discount = data.get("discount_price").and_then(FieldValue::as_f64);
    if let (Some(price), Some(discount)) = (price, discount)
        && price != 0.0
        && discount != 0.0
        && discount >= price
    {
        warnings.push(format!(
            "Discount price ({discount}) should be less than regular price ({price})"
        ));
    }

    if let Some(rating) = data.get("rating").and_then(FieldValue::as_f64)
        && !(0.0..=5.0).contains(&rating)
    {
        warnings.push(format!("Rating out of typical range [0-5]: {rating}"));
    }

    for (field, value) in data {
        let Some(text) = value.as_str().filter(|text| !text.is_empty()) else {
            continue;
        };
        let name = field.to_lowercase();
        if name.contains("url") && !(text.starts_with("http://") || text.starts_with("https://")) {
            warnings.push(format!("{field}: URL doesn't start with http(s): {text}"));
        }
        if name.contains("email") && !EMAIL.is_match(text) {
            warnings.push(format!("{field}: Invalid email format: {text}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldDefinition, FieldType};
    use crate::external_deps::advisory::{AdvisoryError, FieldAssessment};
    use async_trait::async_trait;

    fn product_schema() -> Schema {
        let mut schema = Schema::new();
        schema.insert(
            "title".into(),
            FieldDefinition::new(FieldType::String, "name").required(),
        );
        schema.insert(
            "price".into(),
            FieldDefinition::new(FieldType::Float, "price").with_range(1.0, 500.0),
        );
        schema.insert(
            "sku".into(),
            FieldDefinition::new(FieldType::String, "sku").with_pattern(r"[A-Z]{3}-\d+"),
        );
        schema
    }

    fn data(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn clean_data_gets_default_confidence() {
        let validator = DataValidator::default();
        let data = data(&[
            ("title", "Desk lamp".into()),
            ("price", FieldValue::Int(25)),
            ("sku", "LMP-204".into()),
        ]);
        let result = validator.validate(&data, &product_schema(), None).await;
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert!((result.overall_confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn schema_errors_and_warnings() {
        let validator = DataValidator::default();
        let data = data(&[
            ("title", FieldValue::Null),
            ("price", "cheap".into()),
            ("sku", "sku LMP-204".into()),
        ]);
        let result = validator.validate(&data, &product_schema(), None).await;
        let kinds: Vec<_> = result.errors.iter().map(|error| error.kind).collect();
        assert_eq!(
            kinds,
            vec![ValidationErrorKind::RequiredNull, ValidationErrorKind::TypeMismatch]
        );
        assert!(result.warnings.iter().any(|w| w.starts_with("sku: Value doesn't match")));

        let missing = validator.validate(&FieldMap::new(), &product_schema(), None).await;
        assert_eq!(missing.errors[0].kind, ValidationErrorKind::MissingRequired);
        assert_eq!(missing.overall_confidence, 0.0);
    }

    #[tokio::test]
    async fn domain_rules() {
        let validator = DataValidator::default();
        let mut schema = Schema::new();
        schema.insert("price".into(), FieldDefinition::new(FieldType::Float, "price"));

        let negative = validator
            .validate(&data(&[("price", FieldValue::Float(-3.0))]), &schema, None)
            .await;
        assert_eq!(negative.errors[0].kind, ValidationErrorKind::InvalidValue);

        let odd = validator
            .validate(
                &data(&[
                    ("price", FieldValue::Int(40)),
                    ("discount_price", FieldValue::Int(45)),
                    ("rating", FieldValue::Float(7.5)),
                    ("product_url", "/items/9".into()),
                    ("contact_email", "sales at shop".into()),
                ]),
                &schema,
                None,
            )
            .await;
        assert!(odd.valid);
        assert_eq!(odd.warnings.len(), 4, "{:?}", odd.warnings);
    }

    struct Advisor(Result<IndexMap<String, FieldAssessment>, ()>);

    #[async_trait]
    impl ConsistencyAdvisor for Advisor {
        async fn assess(
            &self,
            _data: &FieldMap,
            content: &str,
            _schema: &Schema,
        ) -> Result<IndexMap<String, FieldAssessment>, AdvisoryError> {
            assert!(!content.contains("<script"));
            self.0
                .clone()
                .map_err(|_| AdvisoryError::Service("overloaded".into()))
        }
    }

    #[tokio::test]
    async fn advisor_scores_and_flags_fields() {
        let mut assessments = IndexMap::new();
        assessments.insert(
            "title".to_string(),
            FieldAssessment {
                confidence: 0.9,
                appears_in_source: true,
                issues: vec!["trailing whitespace".into()],
            },
        );
        assessments.insert(
            "price".to_string(),
            FieldAssessment {
                confidence: 0.3,
                appears_in_source: false,
                issues: Vec::new(),
            },
        );
        let validator = DataValidator::default().with_advisor(Arc::new(Advisor(Ok(assessments))));
        let data = data(&[("title", "Desk lamp".into()), ("price", FieldValue::Int(25))]);
        let html = "<html><script>var x = 1;</script><h1>Desk lamp</h1></html>";

        let result = validator.validate(&data, &product_schema(), Some(html)).await;
        assert!(!result.valid);
        assert_eq!(result.errors[0].kind, ValidationErrorKind::Consistency);
        assert_eq!(result.warnings, vec!["title: trailing whitespace".to_string()]);
        assert!((result.overall_confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn advisor_failure_scores_half() {
        let validator = DataValidator::default().with_advisor(Arc::new(Advisor(Err(()))));
        let data = data(&[("title", "Desk lamp".into()), ("price", FieldValue::Null)]);
        let result = validator.validate(&data, &product_schema(), Some("<h1>Desk lamp</h1>")).await;
        assert_eq!(result.confidence_scores.len(), 2);
        assert!((result.overall_confidence - 0.5).abs() < 1e-9);
    }
}
