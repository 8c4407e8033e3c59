//! Lightweight JSON response validation.
//!
//! The gateway validates parsed model output against a JSON-Schema-style
//! shape before any caller sees it. A mismatch on well-formed JSON is a
//! permanent error — retrying the same prompt would fail the same way.
//!
//! Supported subset: `type` of object/array/string/number/integer/boolean,
//! `required`, `properties`, `items` and `enum`. That covers the
//! classification and proposal wire schemas without pulling in a full
//! validator.

use sha2::{Digest, Sha256};

/// Validate `value` against `schema`. Returns the first violation found.
pub fn validate(schema: &serde_json::Value, value: &serde_json::Value) -> Result<(), String> {
    validate_at(schema, value, "$")
}

/// Stable hash of a schema for cache-key canonicalisation. serde_json maps
/// iterate in sorted key order, so serialisation is already canonical.
pub fn schema_hash(schema: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(schema).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn validate_at(schema: &serde_json::Value, value: &serde_json::Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value {value} not in enum"));
        }
        return Ok(());
    }

    let ty = match schema.get("type").and_then(|t| t.as_str()) {
        Some(t) => t,
        None => return Ok(()), // untyped nodes accept anything
    };

    match ty {
        "object" => {
            let obj = value
                .as_object()
                .ok_or_else(|| format!("{path}: expected object, got {}", kind(value)))?;
            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for key in required.iter().filter_map(|k| k.as_str()) {
                    if !obj.contains_key(key) {
                        return Err(format!("{path}: missing required key '{key}'"));
                    }
                }
            }
            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (key, sub) in props {
                    if let Some(v) = obj.get(key) {
                        // Optional fields may be explicitly null.
                        if !v.is_null() {
                            validate_at(sub, v, &format!("{path}.{key}"))?;
                        }
                    }
                }
            }
            Ok(())
        }
        "array" => {
            let arr = value
                .as_array()
                .ok_or_else(|| format!("{path}: expected array, got {}", kind(value)))?;
            if let Some(items) = schema.get("items") {
                for (i, v) in arr.iter().enumerate() {
                    validate_at(items, v, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        "string" => value
            .as_str()
            .map(|_| ())
            .ok_or_else(|| format!("{path}: expected string, got {}", kind(value))),
        "number" => {
            if value.is_number() {
                Ok(())
            } else {
                Err(format!("{path}: expected number, got {}", kind(value)))
            }
        }
        "integer" => {
            if value.is_i64() || value.is_u64() {
                Ok(())
            } else {
                Err(format!("{path}: expected integer, got {}", kind(value)))
            }
        }
        "boolean" => value
            .as_bool()
            .map(|_| ())
            .ok_or_else(|| format!("{path}: expected boolean, got {}", kind(value))),
        other => Err(format!("{path}: unsupported schema type '{other}'")),
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Best-effort extraction of a JSON document from model output. Models
/// sometimes wrap JSON in fences or prose; the first balanced bracket run
/// is usually the payload.
pub fn extract_json(content: &str) -> Result<serde_json::Value, String> {
    if let Ok(v) = serde_json::from_str(content.trim()) {
        return Ok(v);
    }

    let trimmed = content.trim();
    let start = trimmed
        .find(['{', '['])
        .ok_or_else(|| "no JSON found in response".to_string())?;
    let open = trimmed.as_bytes()[start];
    let close = if open == b'{' { b'}' } else { b']' };
    let end = trimmed
        .rfind(close as char)
        .ok_or_else(|| "unterminated JSON in response".to_string())?;
    if end <= start {
        return Err("unterminated JSON in response".to_string());
    }
    serde_json::from_str(&trimmed[start..=end]).map_err(|e| format!("malformed JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classification_schema() -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["messages_with_doc_value", "total_analyzed"],
            "properties": {
                "messages_with_doc_value": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["message_id", "category", "doc_value_reason"],
                        "properties": {
                            "message_id": {"type": "integer"},
                            "category": {"enum": [
                                "information", "troubleshooting", "update",
                                "announcement", "tutorial", "question_with_answer"
                            ]},
                            "doc_value_reason": {"type": "string"},
                            "rag_search_criteria": {
                                "type": "array",
                                "items": {"type": "string"}
                            }
                        }
                    }
                },
                "total_analyzed": {"type": "integer"}
            }
        })
    }

    #[test]
    fn accepts_valid_payload() {
        let value = json!({
            "messages_with_doc_value": [{
                "message_id": 4,
                "category": "troubleshooting",
                "doc_value_reason": "answers a config question",
                "rag_search_criteria": ["rpc", "timeout", "config"]
            }],
            "total_analyzed": 10
        });
        assert!(validate(&classification_schema(), &value).is_ok());
    }

    #[test]
    fn rejects_missing_required_key() {
        let value = json!({"total_analyzed": 10});
        let err = validate(&classification_schema(), &value).unwrap_err();
        assert!(err.contains("messages_with_doc_value"));
    }

    #[test]
    fn rejects_bad_enum() {
        let value = json!({
            "messages_with_doc_value": [{
                "message_id": 4,
                "category": "gossip",
                "doc_value_reason": "r"
            }],
            "total_analyzed": 1
        });
        assert!(validate(&classification_schema(), &value).is_err());
    }

    #[test]
    fn rejects_wrong_type() {
        let value = json!({
            "messages_with_doc_value": [],
            "total_analyzed": "ten"
        });
        let err = validate(&classification_schema(), &value).unwrap_err();
        assert!(err.contains("total_analyzed"));
    }

    #[test]
    fn extract_json_strips_fences() {
        let content = "Here you go:\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(content).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn extract_json_rejects_prose() {
        assert!(extract_json("I could not produce output").is_err());
    }

    #[test]
    fn schema_hash_is_stable() {
        let a = schema_hash(&classification_schema());
        let b = schema_hash(&classification_schema());
        assert_eq!(a, b);
        assert_ne!(a, schema_hash(&json!({"type": "string"})));
    }
}
