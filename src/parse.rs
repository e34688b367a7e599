use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::EngineTier;
use crate::error::{RecapError, Result};
use crate::extractive;
use crate::level::SummaryLevel;
use crate::prompt::{self, FieldFallback, FieldKind, SchemaField};

/// Where a summary's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryOrigin {
    Model,
    Extractive,
}

/// A summary whose keys match its level's schema exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub level: SummaryLevel,
    pub fields: Map<String, Value>,
    pub origin: SummaryOrigin,
    pub tier: Option<EngineTier>,
}

impl StructuredSummary {
    #[must_use]
    pub fn summary_text(&self) -> &str {
        self.text("summary").unwrap_or_default()
    }

    #[must_use]
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    #[must_use]
    pub fn list(&self, field: &str) -> Vec<String> {
        self.fields
            .get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub const fn with_tier(mut self, tier: EngineTier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// The fields as compact JSON, the form cached per chunk.
    #[must_use]
    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    /// Render for use as the input of the next level up.
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        for field in prompt::schema(self.level).fields {
            match self.fields.get(field.name) {
                Some(Value::String(s)) if !s.is_empty() => {
                    let _ = writeln!(out, "{}: {s}", field.name);
                }
                Some(Value::Array(items)) if !items.is_empty() => {
                    let _ = writeln!(out, "{}:", field.name);
                    for item in items.iter().filter_map(Value::as_str) {
                        let _ = writeln!(out, "- {item}");
                    }
                }
                Some(Value::Number(n)) => {
                    let _ = writeln!(out, "{}: {n}", field.name);
                }
                _ => {}
            }
        }
        out
    }
}

/// Interprets raw generator output against a level's schema.
pub struct ResponseParser;

impl ResponseParser {
    /// Strictly parse `raw`; on any failure build an extractive result from
    /// `source` instead. Errors only when both are unusable.
    pub fn parse(level: SummaryLevel, raw: &str, source: &str) -> Result<StructuredSummary> {
        match Self::parse_strict(level, raw) {
            Ok(fields) => Ok(StructuredSummary {
                level,
                fields,
                origin: SummaryOrigin::Model,
                tier: None,
            }),
            Err(e) => {
                tracing::debug!("falling back to extractive {level} summary: {e}");
                Self::fallback(level, source)
            }
        }
    }

    /// Parse `raw` into a field map with exactly the schema's keys.
    pub fn parse_strict(level: SummaryLevel, raw: &str) -> Result<Map<String, Value>> {
        let json = extract_json_object(raw)
            .ok_or_else(|| RecapError::Parse("no JSON object in response".to_string()))?;

        let value: Value = serde_json::from_str(json)
            .map_err(|e| RecapError::Parse(format!("invalid JSON: {e}")))?;
        let Value::Object(mut object) = value else {
            return Err(RecapError::Parse("response is not a JSON object".to_string()));
        };

        let schema = prompt::schema(level);
        let mut fields = Map::new();
        for field in schema.fields {
            let value = object
                .remove(field.name)
                .ok_or_else(|| RecapError::Parse(format!("missing field {}", field.name)))?;
            fields.insert(field.name.to_string(), coerce(field, value)?);
        }

        if !object.is_empty() {
            let extra: Vec<&String> = object.keys().collect();
            tracing::debug!("dropping keys not in the {level} schema: {extra:?}");
        }

        let summary_empty = fields
            .get("summary")
            .and_then(Value::as_str)
            .is_none_or(|s| s.trim().is_empty());
        if summary_empty {
            return Err(RecapError::Parse("summary field is empty".to_string()));
        }

        Ok(fields)
    }

    /// Build a schema-shaped summary from `source` alone.
    pub fn fallback(level: SummaryLevel, source: &str) -> Result<StructuredSummary> {
        if source.trim().is_empty() {
            return Err(RecapError::Generation(format!(
                "no usable output and empty input for {level} summary"
            )));
        }

        let mut fields = Map::new();
        for field in prompt::schema(level).fields {
            fields.insert(field.name.to_string(), fallback_value(field, source));
        }

        Ok(StructuredSummary {
            level,
            fields,
            origin: SummaryOrigin::Extractive,
            tier: None,
        })
    }
}

fn fallback_value(field: &SchemaField, source: &str) -> Value {
    let text = match field.fallback {
        FieldFallback::Summary => {
            let summary = extractive::summarize(source, 3);
            if summary.is_empty() {
                extractive::leading_words(source, 40)
            } else {
                summary
            }
        }
        FieldFallback::Title => extractive::title(source),
        FieldFallback::KeySentences => {
            return list_value(field, extractive::key_sentences(source, 5));
        }
        FieldFallback::Keywords => return list_value(field, extractive::keywords(source, 6)),
        FieldFallback::Empty => String::new(),
    };

    match field.kind {
        FieldKind::Text => Value::String(text),
        FieldKind::TextList if text.is_empty() => Value::Array(Vec::new()),
        FieldKind::TextList => Value::Array(vec![Value::String(text)]),
        FieldKind::Number => Value::from(0),
    }
}

fn list_value(field: &SchemaField, items: Vec<String>) -> Value {
    match field.kind {
        FieldKind::TextList => Value::Array(items.into_iter().map(Value::String).collect()),
        FieldKind::Text => Value::String(items.join(" ")),
        FieldKind::Number => Value::from(items.len()),
    }
}

fn coerce(field: &SchemaField, value: Value) -> Result<Value> {
    match (field.kind, value) {
        (FieldKind::Text, Value::String(s)) => Ok(Value::String(s.trim().to_string())),
        (FieldKind::Text, Value::Array(items)) => Ok(Value::String(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        )),
        (FieldKind::Text, Value::Null) => Ok(Value::String(String::new())),
        (FieldKind::TextList, Value::Array(items)) => Ok(Value::Array(
            items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => {
                        Some(Value::String(s.trim().to_string()))
                    }
                    Value::Number(n) => Some(Value::String(n.to_string())),
                    _ => None,
                })
                .collect(),
        )),
        (FieldKind::TextList, Value::String(s)) if s.trim().is_empty() => Ok(Value::Array(Vec::new())),
        (FieldKind::TextList, Value::String(s)) => Ok(Value::Array(vec![Value::String(s)])),
        (FieldKind::TextList, Value::Null) => Ok(Value::Array(Vec::new())),
        (FieldKind::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (FieldKind::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| RecapError::Parse(format!("field {} is not a number", field.name))),
        (_, other) => Err(RecapError::Parse(format!(
            "field {} has unexpected type: {other}",
            field.name
        ))),
    }
}

/// The outermost `{ ... }` span, ignoring code fences and surrounding prose.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION_JSON: &str = r#"{
        "title": "Garden planning",
        "summary": "Planned the garden and priced soil.",
        "keyPoints": ["Needs new soil", "Buy seeds tomorrow"],
        "topics": ["garden", "soil"],
        "actionItems": ["Buy seeds"],
        "people": []
    }"#;

    #[test]
    fn parses_exact_schema() {
        let summary = ResponseParser::parse(SummaryLevel::Session, SESSION_JSON, "source")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(summary.origin, SummaryOrigin::Model);
        assert_eq!(summary.summary_text(), "Planned the garden and priced soil.");
        assert_eq!(summary.list("keyPoints").len(), 2);
        let keys: Vec<&str> = summary.fields.keys().map(String::as_str).collect();
        let mut expected: Vec<&str> = prompt::schema(SummaryLevel::Session).field_names().collect();
        expected.sort_unstable();
        let mut keys_sorted = keys.clone();
        keys_sorted.sort_unstable();
        assert_eq!(keys_sorted, expected);
    }

    #[test]
    fn strips_fences_and_prose() {
        let raw = format!("Sure! Here it is:\n```json\n{SESSION_JSON}\n```\n");
        let summary = ResponseParser::parse(SummaryLevel::Session, &raw, "source")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(summary.origin, SummaryOrigin::Model);
    }

    #[test]
    fn drops_extra_keys() {
        let raw = SESSION_JSON.replacen('{', "{\"confidence\": 0.9,", 1);
        let summary = ResponseParser::parse(SummaryLevel::Session, &raw, "source")
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(!summary.fields.contains_key("confidence"));
        assert_eq!(summary.fields.len(), 6);
    }

    #[test]
    fn non_json_falls_back_to_extractive() {
        let source = "We fixed the fence this morning. Then we painted the shed.";
        let summary = ResponseParser::parse(SummaryLevel::Session, "I cannot do that.", source)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(summary.origin, SummaryOrigin::Extractive);
        assert!(!summary.summary_text().is_empty());
        assert_eq!(summary.fields.len(), prompt::schema(SummaryLevel::Session).fields.len());
        assert_eq!(summary.text("title"), Some("We fixed the fence this morning"));
    }

    #[test]
    fn missing_field_falls_back() {
        let raw = r#"{"summary": "only a summary"}"#;
        let summary = ResponseParser::parse(SummaryLevel::Chunk, raw, "Some words here.")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(summary.origin, SummaryOrigin::Extractive);
    }

    #[test]
    fn coerces_text_list_mismatches() {
        let raw = r#"{"summary": ["part one", "part two"], "keyPoints": "single point",
            "topics": null, "actionItems": [], "sentiment": "neutral"}"#;
        let fields =
            ResponseParser::parse_strict(SummaryLevel::Chunk, raw).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(fields["summary"], Value::String("part one part two".to_string()));
        assert_eq!(fields["keyPoints"], serde_json::json!(["single point"]));
        assert_eq!(fields["topics"], serde_json::json!([]));
    }

    #[test]
    fn empty_output_and_empty_input_is_an_error() {
        let result = ResponseParser::parse(SummaryLevel::Day, "", "   ");
        assert!(matches!(result, Err(RecapError::Generation(_))));
    }

    #[test]
    fn render_plain_lists_non_empty_fields() {
        let summary = ResponseParser::parse(SummaryLevel::Session, SESSION_JSON, "source")
            .unwrap_or_else(|e| panic!("{e}"));
        let plain = summary.render_plain();
        assert!(plain.starts_with("title: Garden planning\n"));
        assert!(plain.contains("- Buy seeds\n"));
        assert!(!plain.contains("people"));
    }
}
