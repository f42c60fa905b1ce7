//! Entity body schemas
//!
//! Proposal payloads are checked against these before a pending change is
//! stored. Bodies are persisted as plain JSON documents; the typed structs
//! exist for validation and normalization only.

use crate::entity::{Document, EntityKind};
use crate::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

static MTI_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{4}$").expect("valid MTI pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Acquiring,
    Issuing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Client listens, switch connects
    ClientListener,
    /// Client connects, switch listens
    ClientConnector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Inactive,
    Pending,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConnectorNode {
    #[serde(default = "new_node_id")]
    pub id: String,
    #[validate(ip)]
    pub ip_address: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u32,
    #[serde(default = "status_active")]
    pub status: ConnectionStatus,
}

/// Full body of a payment-switch connection definition
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConnectionDefinition {
    pub client_type: ClientType,
    pub connection_type: ConnectionType,
    #[validate(length(min = 1, message = "client_node_id is required"))]
    pub client_node_id: String,
    #[validate(range(min = 1, max = 65535))]
    pub client_port: u32,
    #[validate(ip)]
    pub client_ip_address: String,
    #[serde(default)]
    pub mti_supported: Vec<String>,
    #[validate(length(min = 1))]
    pub heartbeat_prompt_type: String,
    /// Seconds
    #[validate(range(min = 1))]
    pub heartbeat_interval: u32,
    #[validate(length(min = 1, message = "switch_node_id is required"))]
    pub switch_node_id: String,
    #[serde(default = "default_iso_format")]
    pub iso_format: String,
    #[serde(default = "default_format_version")]
    pub format_version: String,
    #[serde(default = "status_pending")]
    pub connection_status: ConnectionStatus,
    #[validate(length(min = 1, max = 128, message = "endpoint_name is required"))]
    pub endpoint_name: String,
    /// Seconds
    #[validate(range(min = 1))]
    pub timeout_interval: u32,
    #[serde(default)]
    pub connector_nodes: Vec<ConnectorNode>,
}

/// Partial connection body carried by an update proposal
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConnectionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_type: Option<ClientType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<ConnectionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub client_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 65535))]
    pub client_port: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(ip)]
    pub client_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mti_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub heartbeat_prompt_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub heartbeat_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub switch_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub iso_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub format_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<ConnectionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128))]
    pub endpoint_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub timeout_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_nodes: Option<Vec<ConnectorNode>>,
}

/// Keyed business configuration entry (mandatory fields, product types, ...)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BusinessConfigDefinition {
    #[validate(length(min = 1, max = 64))]
    pub config_type: String,
    #[validate(length(min = 1, max = 128))]
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BusinessConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64))]
    pub config_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128))]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

fn new_node_id() -> String {
    Uuid::new_v4().to_string()
}

fn status_active() -> ConnectionStatus {
    ConnectionStatus::Active
}

fn status_pending() -> ConnectionStatus {
    ConnectionStatus::Pending
}

fn default_iso_format() -> String {
    "ISO8583".to_string()
}

fn default_format_version() -> String {
    "1987".to_string()
}

fn default_true() -> bool {
    true
}

/// Validate a full entity body and return it with defaults filled in
pub fn validate_definition(kind: EntityKind, payload: &Document) -> Result<Document, AppError> {
    let normalized = match kind {
        EntityKind::Connection => {
            let def: ConnectionDefinition = parse(payload)?;
            check(&def)?;
            check_mtis(&def.mti_supported)?;
            check_nodes(&def.connector_nodes)?;
            serde_json::to_value(def)?
        }
        EntityKind::BusinessConfig => {
            let def: BusinessConfigDefinition = parse(payload)?;
            check(&def)?;
            serde_json::to_value(def)?
        }
    };
    into_document(normalized)
}

/// Validate a partial entity body. Only supplied fields are returned.
pub fn validate_patch(kind: EntityKind, payload: &Document) -> Result<Document, AppError> {
    if payload.is_empty() {
        return Err(AppError::Validation("Update payload has no fields".to_string()));
    }
    let normalized = match kind {
        EntityKind::Connection => {
            let patch: ConnectionPatch = parse(payload)?;
            check(&patch)?;
            if let Some(mtis) = &patch.mti_supported {
                check_mtis(mtis)?;
            }
            if let Some(nodes) = &patch.connector_nodes {
                check_nodes(nodes)?;
            }
            serde_json::to_value(patch)?
        }
        EntityKind::BusinessConfig => {
            let patch: BusinessConfigPatch = parse(payload)?;
            check(&patch)?;
            serde_json::to_value(patch)?
        }
    };
    let doc = into_document(normalized)?;
    if doc.is_empty() {
        return Err(AppError::Validation("Update payload has no non-null fields".to_string()));
    }
    Ok(doc)
}

/// Short human label used in version store commit messages
pub fn entity_label(kind: EntityKind, body: &Document) -> String {
    let field = match kind {
        EntityKind::Connection => "client_node_id",
        EntityKind::BusinessConfig => "key",
    };
    body.get(field)
        .or_else(|| body.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn parse<T: serde::de::DeserializeOwned>(payload: &Document) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(payload.clone()))
        .map_err(|e| AppError::Validation(format!("Malformed payload: {}", e)))
}

fn check<T: Validate>(value: &T) -> Result<(), AppError> {
    value
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}

fn check_mtis(mtis: &[String]) -> Result<(), AppError> {
    match mtis.iter().find(|m| !MTI_PATTERN.is_match(m)) {
        Some(bad) => Err(AppError::Validation(format!(
            "MTI '{}' must be four digits",
            bad
        ))),
        None => Ok(()),
    }
}

fn check_nodes(nodes: &[ConnectorNode]) -> Result<(), AppError> {
    nodes.iter().try_for_each(check)
}

fn into_document(value: Value) -> Result<Document, AppError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Internal("Normalized payload is not an object".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn connection() -> Document {
        doc(json!({
            "client_type": "acquiring",
            "connection_type": "client_connector",
            "client_node_id": "ACQ-01",
            "client_port": 5000,
            "client_ip_address": "10.0.0.15",
            "mti_supported": ["0100", "0200"],
            "heartbeat_prompt_type": "echo",
            "heartbeat_interval": 30,
            "switch_node_id": "SW-1",
            "endpoint_name": "X",
            "timeout_interval": 60
        }))
    }

    #[test]
    fn test_definition_fills_defaults() {
        let normalized = validate_definition(EntityKind::Connection, &connection()).unwrap();
        assert_eq!(normalized["iso_format"], "ISO8583");
        assert_eq!(normalized["format_version"], "1987");
        assert_eq!(normalized["connection_status"], "pending");
        assert_eq!(normalized["connector_nodes"], json!([]));
    }

    #[test]
    fn test_definition_rejects_bad_fields() {
        let mut bad_port = connection();
        bad_port.insert("client_port".into(), json!(0));
        assert!(validate_definition(EntityKind::Connection, &bad_port).is_err());

        let mut bad_ip = connection();
        bad_ip.insert("client_ip_address".into(), json!("not-an-ip"));
        assert!(validate_definition(EntityKind::Connection, &bad_ip).is_err());

        let mut bad_mti = connection();
        bad_mti.insert("mti_supported".into(), json!(["01000"]));
        assert!(validate_definition(EntityKind::Connection, &bad_mti).is_err());

        let mut missing = connection();
        missing.remove("endpoint_name");
        assert!(matches!(
            validate_definition(EntityKind::Connection, &missing),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_system_fields_cannot_be_proposed() {
        let mut forged = connection();
        forged.insert("created_by".into(), json!("mallory"));
        assert!(validate_definition(EntityKind::Connection, &forged).is_err());
        assert!(validate_patch(EntityKind::Connection, &doc(json!({"id": "x"}))).is_err());
    }

    #[test]
    fn test_patch_keeps_only_supplied_fields() {
        let patch = validate_patch(
            EntityKind::Connection,
            &doc(json!({"client_port": 6000, "endpoint_name": null})),
        )
        .unwrap();
        assert_eq!(patch, doc(json!({"client_port": 6000})));
        assert!(validate_patch(EntityKind::Connection, &Document::new()).is_err());
    }

    #[test]
    fn test_business_config_definition() {
        let normalized = validate_definition(
            EntityKind::BusinessConfig,
            &doc(json!({"config_type": "product_types", "key": "debit", "value": ["visa"]})),
        )
        .unwrap();
        assert_eq!(normalized["is_active"], true);
        // absent optional fields stay absent in the stored body
        assert!(!normalized.contains_key("description"));
        assert_eq!(entity_label(EntityKind::BusinessConfig, &normalized), "debit");
    }
}
