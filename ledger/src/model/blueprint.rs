//! Blueprint: a typed, versioned action schema.
//!
//! A blueprint names the participants of a workflow and the actions they
//! may take; each action carries one or more JSON Schemas that its
//! payloads must satisfy. Blueprints are published through control
//! transactions and fetched from the external blueprint service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One action within a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintAction {
    /// Numeric action identifier; transactions reference it via
    /// `action_id`.
    pub action_id: i64,
    /// Human-readable action title.
    pub title: String,
    /// JSON Schemas the payload must satisfy. Every schema must pass.
    #[serde(default)]
    pub data_schemas: Vec<Value>,
    /// Participant IDs allowed to initiate this action.
    #[serde(default)]
    pub sender_participants: Vec<String>,
}

/// A blueprint definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub blueprint_id: String,
    pub title: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub actions: Vec<BlueprintAction>,
}

impl Blueprint {
    /// Look up an action by its numeric identifier.
    pub fn action(&self, action_id: i64) -> Option<&BlueprintAction> {
        self.actions.iter().find(|a| a.action_id == action_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_lookup() {
        let bp = Blueprint {
            blueprint_id: "bp-1".to_string(),
            title: "Settlement".to_string(),
            version: 1,
            participants: vec!["buyer".to_string(), "seller".to_string()],
            actions: vec![BlueprintAction {
                action_id: 1,
                title: "Offer".to_string(),
                data_schemas: vec![json!({"type": "object"})],
                sender_participants: vec!["buyer".to_string()],
            }],
        };
        assert!(bp.action(1).is_some());
        assert!(bp.action(2).is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let bp = Blueprint {
            blueprint_id: "bp-1".to_string(),
            title: "Settlement".to_string(),
            version: 3,
            participants: vec![],
            actions: vec![],
        };
        let json = serde_json::to_string(&bp).unwrap();
        let back: Blueprint = serde_json::from_str(&json).unwrap();
        assert_eq!(bp, back);
    }
}
