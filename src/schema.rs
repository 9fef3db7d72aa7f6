//! The structured result schema and its validator.
//!
//! The same shape is described twice: once as Rust types (what the rest of
//! the crate consumes) and once as a JSON-Schema document (what the model is
//! asked to produce). [`validate_payload`] is the bridge — a payload is only
//! accepted when it deserialises into [`ContractExtraction`] *and* passes the
//! range checks serde cannot express.
//!
//! Every key is required, as in the schema. Nullable fields are `Option`s
//! deserialised with `Option::deserialize`, which accepts `null` but not a
//! missing key.

use crate::pipeline::clean::strip_json_fences;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Contracting parties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Parties {
    #[serde(deserialize_with = "Option::deserialize")]
    pub party_one: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub party_two: Option<String>,
    pub additional_parties: Vec<String>,
}

/// Contract dates. Dates are ISO `YYYY-MM-DD` strings when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dates {
    #[serde(deserialize_with = "Option::deserialize")]
    pub effective_date: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub termination_date: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub term_length: Option<String>,
}

/// Key clauses, each a snippet or paraphrase of the contract text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Clauses {
    #[serde(deserialize_with = "Option::deserialize")]
    pub governing_law: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub termination: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub confidentiality: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub indemnification: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub limitation_of_liability: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub dispute_resolution: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub payment_terms: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub intellectual_property: Option<String>,
}

/// A fully validated extraction payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractExtraction {
    pub parties: Parties,
    pub dates: Dates,
    pub clauses: Clauses,
    /// Model's self-reported confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    #[serde(deserialize_with = "Option::deserialize")]
    pub summary: Option<String>,
}

/// Why a model payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("empty response from model")]
    Empty,

    #[error("invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("payload does not match the result schema: {0}")]
    Shape(String),

    #[error("confidence {0} is outside [0.0, 1.0]")]
    ConfidenceOutOfRange(String),
}

fn nullable_string() -> Value {
    json!({ "type": ["string", "null"] })
}

/// JSON-Schema (strict mode) for [`ContractExtraction`].
pub static RESULT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    let clause_fields = [
        "governing_law",
        "termination",
        "confidentiality",
        "indemnification",
        "limitation_of_liability",
        "dispute_resolution",
        "payment_terms",
        "intellectual_property",
    ];
    let clause_props: serde_json::Map<String, Value> = clause_fields
        .iter()
        .map(|f| (f.to_string(), nullable_string()))
        .collect();

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["parties", "dates", "clauses", "confidence", "summary"],
        "properties": {
            "parties": {
                "type": "object",
                "additionalProperties": false,
                "required": ["party_one", "party_two", "additional_parties"],
                "properties": {
                    "party_one": nullable_string(),
                    "party_two": nullable_string(),
                    "additional_parties": { "type": "array", "items": { "type": "string" } }
                }
            },
            "dates": {
                "type": "object",
                "additionalProperties": false,
                "required": ["effective_date", "termination_date", "term_length"],
                "properties": {
                    "effective_date": nullable_string(),
                    "termination_date": nullable_string(),
                    "term_length": nullable_string()
                }
            },
            "clauses": {
                "type": "object",
                "additionalProperties": false,
                "required": clause_fields,
                "properties": clause_props
            },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "summary": nullable_string()
        }
    })
});

/// Parse and validate a raw model response.
///
/// Tolerates an outer ```` ```json ```` fence (models add one despite being
/// told not to); everything else must match the schema exactly.
pub fn validate_payload(raw: &str) -> Result<ContractExtraction, SchemaViolation> {
    let body = strip_json_fences(raw);
    if body.trim().is_empty() {
        return Err(SchemaViolation::Empty);
    }

    let value: Value =
        serde_json::from_str(&body).map_err(|e| SchemaViolation::InvalidJson(e.to_string()))?;
    let payload: ContractExtraction =
        serde_json::from_value(value).map_err(|e| SchemaViolation::Shape(e.to_string()))?;

    if !payload.confidence.is_finite() || !(0.0..=1.0).contains(&payload.confidence) {
        return Err(SchemaViolation::ConfidenceOutOfRange(
            payload.confidence.to_string(),
        ));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Value {
        json!({
            "parties": {
                "party_one": "Acme Corp",
                "party_two": "Widget Inc",
                "additional_parties": []
            },
            "dates": {
                "effective_date": "2024-01-01",
                "termination_date": "2025-01-01",
                "term_length": "1 year"
            },
            "clauses": {
                "governing_law": "State of Delaware",
                "termination": "30 days written notice",
                "confidentiality": null,
                "indemnification": "Mutual indemnification",
                "limitation_of_liability": null,
                "dispute_resolution": "Arbitration in Delaware",
                "payment_terms": "Net 30",
                "intellectual_property": null
            },
            "confidence": 0.85,
            "summary": "Service agreement between Acme Corp and Widget Inc"
        })
    }

    #[test]
    fn accepts_valid_payload() {
        let p = validate_payload(&valid().to_string()).unwrap();
        assert_eq!(p.parties.party_one.as_deref(), Some("Acme Corp"));
        assert_eq!(p.clauses.payment_terms.as_deref(), Some("Net 30"));
        assert_eq!(p.confidence, 0.85);
    }

    #[test]
    fn accepts_fenced_payload() {
        let raw = format!("```json\n{}\n```", valid());
        assert!(validate_payload(&raw).is_ok());
    }

    #[test]
    fn rejects_missing_section() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("clauses");
        let err = validate_payload(&v.to_string()).unwrap_err();
        assert!(matches!(err, SchemaViolation::Shape(_)), "got {err:?}");
    }

    #[test]
    fn nullable_keys_must_still_be_present() {
        let mut v = valid();
        v["summary"] = Value::Null;
        v["parties"]["party_one"] = Value::Null;
        assert!(validate_payload(&v.to_string()).is_ok());

        for (section, key) in [
            (None, "summary"),
            (Some("parties"), "party_one"),
            (Some("parties"), "additional_parties"),
            (Some("dates"), "term_length"),
            (Some("clauses"), "intellectual_property"),
        ] {
            let mut v = valid();
            let target = match section {
                Some(name) => &mut v[name],
                None => &mut v,
            };
            target.as_object_mut().unwrap().remove(key);
            assert!(
                matches!(validate_payload(&v.to_string()), Err(SchemaViolation::Shape(_))),
                "missing {key} was accepted"
            );
        }
    }

    #[test]
    fn rejects_unknown_field() {
        let mut v = valid();
        v["parties"]["party_three"] = json!("Someone");
        assert!(matches!(
            validate_payload(&v.to_string()),
            Err(SchemaViolation::Shape(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut v = valid();
        v["confidence"] = json!(1.5);
        assert!(matches!(
            validate_payload(&v.to_string()),
            Err(SchemaViolation::ConfidenceOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_non_json_and_empty() {
        assert!(matches!(
            validate_payload("the contract is between A and B"),
            Err(SchemaViolation::InvalidJson(_))
        ));
        assert_eq!(validate_payload("   "), Err(SchemaViolation::Empty));
    }

    #[test]
    fn schema_requires_every_top_level_field() {
        let required = RESULT_SCHEMA["required"].as_array().unwrap();
        assert_eq!(required.len(), 5);
        assert_eq!(RESULT_SCHEMA["additionalProperties"], json!(false));
    }
}
