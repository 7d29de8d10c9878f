//! Structured-output schemas for sub-agent tasks.
//!
//! Every sub-agent call declares the shape of the JSON it expects back.
//! Validation happens at the dispatch boundary: a payload that does not
//! conform fails the call rather than leaking malformed data downstream.

use serde_json::Value;
use std::collections::BTreeMap;

/// Field type expected in a structured output.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// Array of strings
    StringList,
    /// One of a closed set of values
    Enum(Vec<&'static str>),
    /// Number constrained to an inclusive range
    Range(f64, f64),
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::StringList => write!(f, "string list"),
            Self::Enum(allowed) => write!(f, "one of {allowed:?}"),
            Self::Range(lo, hi) => write!(f, "number in [{lo}, {hi}]"),
        }
    }
}

/// One declared field of an output schema.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub description: &'static str,
}

impl FieldSpec {
    pub fn required(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: true,
            description,
        }
    }

    pub fn optional(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: false,
            description,
        }
    }
}

/// A declared output schema: a flat set of named fields.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    MissingField { field: String },
    TypeMismatch { field: String, expected: String },
    EnumInvalid { field: String, allowed: Vec<String> },
    OutOfRange { field: String, lo: f64, hi: f64 },
    NotAnObject,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::TypeMismatch { field, expected } => {
                write!(f, "field '{field}' is not a {expected}")
            }
            Self::EnumInvalid { field, allowed } => {
                write!(f, "field '{field}' must be one of {allowed:?}")
            }
            Self::OutOfRange { field, lo, hi } => {
                write!(f, "field '{field}' is outside [{lo}, {hi}]")
            }
            Self::NotAnObject => write!(f, "payload is not a JSON object"),
        }
    }
}

impl OutputSchema {
    pub fn new(name: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self { name, fields }
    }

    /// Validate a payload, returning every violation found.
    pub fn validate(&self, payload: &Value) -> Vec<SchemaViolation> {
        let Some(object) = payload.as_object() else {
            return vec![SchemaViolation::NotAnObject];
        };

        let mut violations = Vec::new();
        for field in &self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(SchemaViolation::MissingField {
                            field: field.name.to_string(),
                        });
                    }
                }
                Some(value) => {
                    if let Some(v) = check_field(field, value) {
                        violations.push(v);
                    }
                }
            }
        }
        violations
    }

    /// Render the schema as an instruction block for the sub-agent prompt.
    pub fn prompt_block(&self) -> String {
        let mut block = String::from(
            "Respond with a single JSON object and nothing else. Fields:\n",
        );
        for field in &self.fields {
            block.push_str(&format!(
                "- \"{}\" ({}{}): {}\n",
                field.name,
                field.field_type,
                if field.required { "" } else { ", optional" },
                field.description
            ));
        }
        block
    }
}

fn check_field(field: &FieldSpec, value: &Value) -> Option<SchemaViolation> {
    let mismatch = || SchemaViolation::TypeMismatch {
        field: field.name.to_string(),
        expected: field.field_type.to_string(),
    };
    match &field.field_type {
        FieldType::String => (!value.is_string()).then(mismatch),
        FieldType::Number => (!value.is_number()).then(mismatch),
        FieldType::Boolean => (!value.is_boolean()).then(mismatch),
        FieldType::StringList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => None,
            _ => Some(mismatch()),
        },
        FieldType::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => None,
            Some(_) => Some(SchemaViolation::EnumInvalid {
                field: field.name.to_string(),
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            }),
            None => Some(mismatch()),
        },
        FieldType::Range(lo, hi) => match value.as_f64() {
            Some(n) if n >= *lo && n <= *hi => None,
            Some(_) => Some(SchemaViolation::OutOfRange {
                field: field.name.to_string(),
                lo: *lo,
                hi: *hi,
            }),
            None => Some(mismatch()),
        },
    }
}

/// Extract the first JSON object from raw model text.
///
/// Sub-agents are instructed to answer with bare JSON, but some wrap it in
/// fences or prose. Scans for a balanced top-level object.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + ch.len_utf8()];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Convenience: map of field name to value for a validated payload.
pub fn as_field_map(payload: &Value) -> BTreeMap<String, Value> {
    payload
        .as_object()
        .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> OutputSchema {
        OutputSchema::new(
            "assessment",
            vec![
                FieldSpec::required("assessment", FieldType::String, "overall view"),
                FieldSpec::required(
                    "verdict",
                    FieldType::Enum(vec!["validated", "conditional", "invalidated"]),
                    "recommended status",
                ),
                FieldSpec::required("confidence", FieldType::Range(0.0, 1.0), "certainty"),
                FieldSpec::required("concerns", FieldType::StringList, "open concerns"),
                FieldSpec::optional("actions", FieldType::StringList, "suggested actions"),
            ],
        )
    }

    #[test]
    fn test_valid_payload_passes() {
        let payload = json!({
            "assessment": "solid momentum implementation",
            "verdict": "validated",
            "confidence": 0.8,
            "concerns": ["capacity in small caps"],
        });
        assert!(schema().validate(&payload).is_empty());
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        let payload = json!({
            "verdict": "validated",
            "confidence": "very",
            "concerns": ["fine"],
        });
        let violations = schema().validate(&payload);
        assert_eq!(violations.len(), 2);
        assert!(violations
            .iter()
            .any(|v| matches!(v, SchemaViolation::MissingField { field } if field == "assessment")));
        assert!(violations
            .iter()
            .any(|v| matches!(v, SchemaViolation::TypeMismatch { field, .. } if field == "confidence")));
    }

    #[test]
    fn test_enum_and_range_violations() {
        let payload = json!({
            "assessment": "ok",
            "verdict": "amazing",
            "confidence": 1.7,
            "concerns": [],
        });
        let violations = schema().validate(&payload);
        assert!(violations
            .iter()
            .any(|v| matches!(v, SchemaViolation::EnumInvalid { field, .. } if field == "verdict")));
        assert!(violations
            .iter()
            .any(|v| matches!(v, SchemaViolation::OutOfRange { field, .. } if field == "confidence")));
    }

    #[test]
    fn test_non_object_payload() {
        assert_eq!(
            schema().validate(&json!([1, 2, 3])),
            vec![SchemaViolation::NotAnObject]
        );
    }

    #[test]
    fn test_extract_json_from_fenced_text() {
        let text = "Here is my analysis:\n```json\n{\"assessment\": \"good\", \"n\": 3}\n```\nDone.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["assessment"], "good");
        assert_eq!(value["n"], 3);
    }

    #[test]
    fn test_extract_handles_nested_braces_in_strings() {
        let text = r#"{"note": "use {braces} carefully", "ok": true}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_prompt_block_lists_fields() {
        let block = schema().prompt_block();
        assert!(block.contains("\"verdict\""));
        assert!(block.contains("optional"));
    }
}
