//! Purpose: Request/response records for the connector endpoints of the v0 API.
//! Exports: `NewConnectorRequest`, `NewConnectorResponse`, `ErrorResponse`,
//! `ConnectorConfig`, `TransportConfig`, `FormatConfig`, `NewConnectorOutcome`.
//! Role: Serde mirrors of the server JSON schema; no behavior beyond (de)serialization.
//! Invariants: Unknown JSON keys are kept in `additional_properties` and re-emitted.
//! Invariants: Field names match the server schema verbatim (snake_case).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const DEFAULT_MAX_BUFFERED_RECORDS: u64 = 1_000_000;

/// Request to create a new connector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewConnectorRequest {
    pub name: String,
    pub description: String,
    pub config: ConnectorConfig,
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

impl NewConnectorRequest {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            config,
            additional_properties: Map::new(),
        }
    }
}

/// Transport and format settings of a connector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub transport: TransportConfig,
    pub format: FormatConfig,
    #[serde(default = "default_max_buffered_records")]
    pub max_buffered_records: u64,
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

impl ConnectorConfig {
    pub fn new(transport: TransportConfig, format: FormatConfig) -> Self {
        Self {
            transport,
            format,
            max_buffered_records: DEFAULT_MAX_BUFFERED_RECORDS,
            additional_properties: Map::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl TransportConfig {
    pub fn new(name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormatConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl FormatConfig {
    pub fn new(name: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// Response to a connector creation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewConnectorResponse {
    pub connector_id: Uuid,
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

/// Information returned by the server when a request fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    pub error_code: String,
    #[serde(default)]
    pub details: Value,
    #[serde(flatten)]
    pub additional_properties: Map<String, Value>,
}

/// Documented outcomes of `POST /v0/connectors`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NewConnectorOutcome {
    /// `201 Created`.
    Created(NewConnectorResponse),
    /// `409 Conflict`, e.g. a connector with the same name already exists.
    Conflict(ErrorResponse),
}

impl NewConnectorOutcome {
    pub fn created(&self) -> Option<&NewConnectorResponse> {
        match self {
            Self::Created(response) => Some(response),
            Self::Conflict(_) => None,
        }
    }

    pub fn conflict(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Created(_) => None,
            Self::Conflict(error) => Some(error),
        }
    }
}

fn default_max_buffered_records() -> u64 {
    DEFAULT_MAX_BUFFERED_RECORDS
}
