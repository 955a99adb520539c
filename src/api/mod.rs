//! Purpose: Define the public Rust API boundary of the client.
//! Exports: Client handle, request/response envelopes, models, and endpoint calls.
//! Role: Public, additive-only surface; one submodule per API tag.
//! Invariants: Endpoint modules depend on `Client` only through `send`/`send_async`.

mod client;
pub mod connectors;
pub mod models;
mod response;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use client::{Client, ClientBuilder, DEFAULT_AUTH_HEADER_NAME, DEFAULT_TOKEN_PREFIX, TlsMode};
pub use connectors::{
    new_connector, new_connector_async, new_connector_detailed, new_connector_detailed_async,
};
pub use models::{
    ConnectorConfig, ErrorResponse, FormatConfig, NewConnectorOutcome, NewConnectorRequest,
    NewConnectorResponse, TransportConfig,
};
pub use response::{ApiRequest, RawResponse, Response};
