//! CSS-selector extraction usable in place of a semantic extraction service.

use async_trait::async_trait;
use indexmap::IndexMap;
use scraper::{ElementRef, Html, Selector};

use super::{AdvisoryError, ExtractionService};
use crate::core::{ExtractionMode, FieldMap, FieldType, FieldValue, Schema};

/// Field → CSS selector extractor backed by `scraper`.
///
/// In [`ExtractionMode::Normal`] values are inferred from the element text
/// (integer, then float with currency symbols removed, then boolean words,
/// then string). [`ExtractionMode::Strict`] converts to the declared field
/// type instead and yields `Null` when the text does not fit.
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    selectors: IndexMap<String, Selector>,
}

impl SelectorExtractor {
    pub fn new<I, K, V>(selectors: I) -> Result<Self, AdvisoryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut parsed = IndexMap::new();
        for (field, raw) in selectors {
            let field = field.into();
            let selector = Selector::parse(raw.as_ref()).map_err(|err| {
                AdvisoryError::Malformed(format!("selector for `{field}`: {err}"))
            })?;
            parsed.insert(field, selector);
        }
        Ok(Self { selectors: parsed })
    }

    /// Synchronous extraction over an already-fetched document.
    pub fn extract_document(&self, body: &str, schema: &Schema, mode: ExtractionMode) -> FieldMap {
        let document = Html::parse_document(body);
        let mut result = FieldMap::new();
        for (field, definition) in schema {
            let text = self
                .selectors
                .get(field)
                .and_then(|selector| document.select(selector).next())
                .map(element_text)
                .filter(|text| !text.is_empty());

            let value = match (text, mode) {
                (None, _) => FieldValue::Null,
                (Some(text), ExtractionMode::Normal) => infer_value(&text),
                (Some(text), ExtractionMode::Strict) => coerce_value(&text, &definition.field_type),
            };
            result.insert(field.clone(), value);
        }
        result
    }
}

#[async_trait]
impl ExtractionService for SelectorExtractor {
    async fn extract(
        &self,
        body: &str,
        schema: &Schema,
        mode: ExtractionMode,
    ) -> Result<FieldMap, AdvisoryError> {
        let data = self.extract_document(body, schema, mode);
        log::debug!(
            "selector extraction filled {}/{} fields",
            data.values().filter(|value| !value.is_null()).count(),
            schema.len()
        );
        Ok(data)
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | ','))
        .collect();
    cleaned.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Best-effort typing of scraped text.
pub fn infer_value(text: &str) -> FieldValue {
    let text = text.trim();
    if text.is_empty() {
        return FieldValue::Null;
    }
    if let Ok(int) = text.parse::<i64>() {
        return FieldValue::Int(int);
    }
    if let Some(float) = parse_number(text) {
        return FieldValue::Float(float);
    }
    if let Some(flag) = parse_bool(text) {
        return FieldValue::Bool(flag);
    }
    FieldValue::String(text.to_string())
}

fn coerce_value(text: &str, field_type: &FieldType) -> FieldValue {
    let text = text.trim();
    match field_type {
        FieldType::String => FieldValue::String(text.to_string()),
        FieldType::Integer => text
            .parse::<i64>()
            .map(FieldValue::Int)
            .unwrap_or(FieldValue::Null),
        FieldType::Float => parse_number(text)
            .map(FieldValue::Float)
            .unwrap_or(FieldValue::Null),
        FieldType::Boolean => parse_bool(text)
            .map(FieldValue::Bool)
            .unwrap_or(FieldValue::Null),
        FieldType::List | FieldType::Object => serde_json::from_str::<serde_json::Value>(text)
            .map(FieldValue::from)
            .ok()
            .filter(|value| field_type.accepts(value))
            .unwrap_or(FieldValue::Null),
        FieldType::Other(_) => infer_value(text),
    }
}
