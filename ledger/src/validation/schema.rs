//! Blueprint payload-schema evaluation.
//!
//! Each blueprint action may attach several JSON Schemas; a payload must
//! satisfy every one of them. Violations are reported exhaustively — all
//! offending paths across all schemas — because a client fixing its
//! payload one error at a time is a client filing support tickets.

use jsonschema::JSONSchema;
use serde_json::Value;

use super::error::ValidationError;
use crate::model::BlueprintAction;

/// Evaluate a payload against every schema attached to an action.
///
/// Returns all violations found. Schemas that fail to compile produce a
/// `VAL_SCHEMA_005` and do not abort evaluation of the remaining schemas.
pub fn validate_payload(action: &BlueprintAction, payload: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (index, schema) in action.data_schemas.iter().enumerate() {
        let compiled = match JSONSchema::compile(schema) {
            Ok(compiled) => compiled,
            Err(e) => {
                errors.push(ValidationError::schema_unparseable(format!(
                    "schema {index} of action {} does not compile: {e}",
                    action.action_id
                )));
                continue;
            }
        };

        if let Err(violations) = compiled.validate(payload) {
            for violation in violations {
                let path = violation.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                errors.push(ValidationError::schema_violation(
                    &path,
                    format!("schema {index}: {violation}"),
                ));
            }
        };
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action_with_schema(schema: Value) -> BlueprintAction {
        BlueprintAction {
            action_id: 1,
            title: "Offer".to_string(),
            data_schemas: vec![schema],
            sender_participants: vec![],
        }
    }

    #[test]
    fn conforming_payload_passes() {
        let action = action_with_schema(json!({
            "type": "object",
            "required": ["amount"],
            "properties": {"amount": {"type": "integer", "minimum": 1}}
        }));
        let errors = validate_payload(&action, &json!({"amount": 50}));
        assert!(errors.is_empty());
    }

    #[test]
    fn missing_required_field_reports_path() {
        let action = action_with_schema(json!({
            "type": "object",
            "required": ["amount"]
        }));
        let errors = validate_payload(&action, &json!({}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "VAL_SCHEMA_004");
        assert!(errors[0].field.is_some());
    }

    #[test]
    fn wrong_type_reported() {
        let action = action_with_schema(json!({
            "type": "object",
            "properties": {"amount": {"type": "integer"}}
        }));
        let errors = validate_payload(&action, &json!({"amount": "fifty"}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_deref(), Some("/amount"));
    }

    #[test]
    fn enum_violation_reported() {
        let action = action_with_schema(json!({
            "type": "object",
            "properties": {"currency": {"enum": ["EUR", "GBP", "USD"]}}
        }));
        let errors = validate_payload(&action, &json!({"currency": "DOGE"}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_deref(), Some("/currency"));
    }

    #[test]
    fn nested_object_failure_reports_deep_path() {
        let action = action_with_schema(json!({
            "type": "object",
            "properties": {
                "party": {
                    "type": "object",
                    "required": ["did"],
                    "properties": {"did": {"type": "string"}}
                }
            }
        }));
        let errors = validate_payload(&action, &json!({"party": {"did": 42}}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field.as_deref(), Some("/party/did"));
    }

    #[test]
    fn every_schema_must_pass() {
        let mut action = action_with_schema(json!({
            "type": "object",
            "required": ["a"]
        }));
        action.data_schemas.push(json!({
            "type": "object",
            "required": ["b"]
        }));

        // Passes the first schema, fails the second.
        let errors = validate_payload(&action, &json!({"a": 1}));
        assert_eq!(errors.len(), 1);

        // Fails both: both are reported.
        let errors = validate_payload(&action, &json!({}));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn uncompilable_schema_is_schema_005() {
        let action = action_with_schema(json!({"type": "not-a-type"}));
        let errors = validate_payload(&action, &json!({}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "VAL_SCHEMA_005");
    }
}
