//! Target requests and the field schema they carry.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::value::FieldValue;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Ordered field name → definition mapping.
pub type Schema = IndexMap<String, FieldDefinition>;

/// Semantic type declared for a schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Object,
    /// Unrecognised type name; accepts any value.
    Other(String),
}

impl FieldType {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => FieldType::String,
            "int" | "integer" => FieldType::Integer,
            "float" | "number" => FieldType::Float,
            "bool" | "boolean" => FieldType::Boolean,
            "list" | "array" => FieldType::List,
            "dict" | "object" => FieldType::Object,
            _ => FieldType::Other(name.to_string()),
        }
    }

    /// Whether a non-null value satisfies the declared type.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (_, FieldValue::Null) => true,
            (FieldType::String, FieldValue::String(_)) => true,
            (FieldType::Integer, FieldValue::Int(_)) => true,
            (FieldType::Float, FieldValue::Float(_) | FieldValue::Int(_)) => true,
            (FieldType::Boolean, FieldValue::Bool(_)) => true,
            (FieldType::List, FieldValue::List(_)) => true,
            (FieldType::Object, FieldValue::Map(_)) => true,
            (FieldType::Other(_), _) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::List => "list",
            FieldType::Object => "object",
            FieldType::Other(name) => name.as_str(),
        }
    }
}

impl From<String> for FieldType {
    fn from(value: String) -> Self {
        FieldType::parse(&value)
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared shape of one output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType, description: impl Into<String>) -> Self {
        Self {
            field_type,
            description: description.into(),
            required: false,
            range: None,
            pattern: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// Per-request knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub timeout_secs: u64,
    pub screenshot: bool,
    pub extra: HashMap<String, serde_json::Value>,
}

impl RequestOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            screenshot: false,
            extra: HashMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid locator: {0}")]
    InvalidLocator(#[from] url::ParseError),
    #[error("unsupported locator scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("schema must declare at least one field")]
    EmptySchema,
    #[error("priority {0} outside 1..=10")]
    PriorityOutOfRange(u8),
    #[error("invalid pattern for field `{field}`: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },
}

/// Immutable description of one retrieval job.
#[derive(Debug, Clone)]
pub struct TargetRequest {
    locator: Url,
    schema: Schema,
    priority: u8,
    options: RequestOptions,
}

impl TargetRequest {
    pub fn new(locator: &str, schema: Schema) -> Result<Self, RequestError> {
        let locator = Url::parse(locator)?;
        if !matches!(locator.scheme(), "http" | "https") {
            return Err(RequestError::UnsupportedScheme(locator.scheme().to_string()));
        }
        validate_schema(&schema)?;
        Ok(Self {
            locator,
            schema,
            priority: 1,
            options: RequestOptions::default(),
        })
    }

    pub fn with_priority(mut self, priority: u8) -> Result<Self, RequestError> {
        if !(1..=10).contains(&priority) {
            return Err(RequestError::PriorityOutOfRange(priority));
        }
        self.priority = priority;
        Ok(self)
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn locator(&self) -> &Url {
        &self.locator
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Host used to bucket metrics and events.
    pub fn domain(&self) -> &str {
        self.locator.host_str().unwrap_or_default()
    }
}

/// Rejects empty schemas and fields whose pattern does not compile.
pub fn validate_schema(schema: &Schema) -> Result<(), RequestError> {
    if schema.is_empty() {
        return Err(RequestError::EmptySchema);
    }
    for (name, definition) in schema {
        if let Some(pattern) = &definition.pattern {
            Regex::new(pattern).map_err(|source| RequestError::InvalidPattern {
                field: name.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title_schema() -> Schema {
        let mut schema = Schema::new();
        schema.insert(
            "title".into(),
            FieldDefinition::new(FieldType::String, "Page title").required(),
        );
        schema
    }

    #[test]
    fn parses_type_aliases() {
        assert_eq!(FieldType::parse("str"), FieldType::String);
        assert_eq!(FieldType::parse("Number"), FieldType::Float);
        assert_eq!(FieldType::parse("array"), FieldType::List);
        assert_eq!(FieldType::parse("dict"), FieldType::Object);
        assert_eq!(FieldType::parse("money"), FieldType::Other("money".into()));
    }

    #[test]
    fn float_fields_accept_integers() {
        assert!(FieldType::Float.accepts(&FieldValue::Int(3)));
        assert!(!FieldType::Integer.accepts(&FieldValue::Float(3.5)));
        assert!(FieldType::Other("money".into()).accepts(&FieldValue::Bool(true)));
    }

    #[test]
    fn rejects_invalid_requests() {
        assert!(matches!(
            TargetRequest::new("https://example.com", Schema::new()),
            Err(RequestError::EmptySchema)
        ));
        assert!(matches!(
            TargetRequest::new("ftp://example.com", title_schema()),
            Err(RequestError::UnsupportedScheme(_))
        ));
        let request = TargetRequest::new("https://example.com", title_schema()).unwrap();
        assert!(matches!(
            request.with_priority(11),
            Err(RequestError::PriorityOutOfRange(11))
        ));
    }

    #[test]
    fn schema_deserializes_from_json() {
        let schema: Schema = serde_json::from_str(
            r#"{"price": {"type": "number", "required": true, "range": [0.0, 100.0]}}"#,
        )
        .unwrap();
        let price = &schema["price"];
        assert_eq!(price.field_type, FieldType::Float);
        assert!(price.required);
        assert_eq!(price.range, Some((0.0, 100.0)));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut schema = title_schema();
        schema.insert(
            "sku".into(),
            FieldDefinition::new(FieldType::String, "SKU").with_pattern("("),
        );
        assert!(matches!(
            validate_schema(&schema),
            Err(RequestError::InvalidPattern { .. })
        ));
    }
}
