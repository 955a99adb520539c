//! Purpose: `POST /v0/connectors` (create a new connector).
//! Exports: `new_connector_request`, `parse_response`, `build_response`, and the
//! blocking/suspending `new_connector*` calls.
//! Role: Maps the documented status codes of the endpoint onto typed outcomes.
//! Invariants: 201 -> `Created`, 409 -> `Conflict`; other statuses raise or yield `None`
//! according to `Client::raise_on_unexpected_status`.
//! Invariants: One network call per invocation; no retries and no client state changes.
#![allow(clippy::result_large_err)]

use super::client::Client;
use super::models::{ErrorResponse, NewConnectorOutcome, NewConnectorRequest, NewConnectorResponse};
use super::response::{ApiRequest, RawResponse, Response};
use crate::core::error::Error;
use reqwest::StatusCode;
use tracing::warn;

type ApiResult<T> = Result<T, Error>;

pub fn new_connector_request(body: &NewConnectorRequest) -> ApiResult<ApiRequest> {
    ApiRequest::new("POST", &["v0", "connectors"]).with_json(body)
}

pub fn parse_response(client: &Client, raw: &RawResponse) -> ApiResult<Option<NewConnectorOutcome>> {
    match raw.status {
        StatusCode::CREATED => {
            let created: NewConnectorResponse = raw.json()?;
            Ok(Some(NewConnectorOutcome::Created(created)))
        }
        StatusCode::CONFLICT => {
            let conflict: ErrorResponse = raw.json()?;
            Ok(Some(NewConnectorOutcome::Conflict(conflict)))
        }
        status if client.raise_on_unexpected_status() => Err(Error::unexpected_status(
            status.as_u16(),
            raw.content.clone(),
        )),
        status => {
            warn!(status = status.as_u16(), "ignoring undocumented status for new connector");
            Ok(None)
        }
    }
}

pub fn build_response(client: &Client, raw: RawResponse) -> ApiResult<Response<NewConnectorOutcome>> {
    let parsed = parse_response(client, &raw)?;
    Ok(Response::from_raw(raw, parsed))
}

/// Create a new connector, returning status, headers, and raw content alongside the outcome.
///
/// Fails with `ErrorKind::UnexpectedStatus` for undocumented statuses when the client
/// raises on them, and with `ErrorKind::Io` when the request does not complete
/// (including timeouts).
pub fn new_connector_detailed(
    client: &Client,
    body: &NewConnectorRequest,
) -> ApiResult<Response<NewConnectorOutcome>> {
    let request = new_connector_request(body)?;
    let raw = client.send(&request)?;
    build_response(client, raw)
}

/// Create a new connector.
pub fn new_connector(
    client: &Client,
    body: &NewConnectorRequest,
) -> ApiResult<Option<NewConnectorOutcome>> {
    Ok(new_connector_detailed(client, body)?.into_parsed())
}

/// Suspending form of [`new_connector_detailed`].
pub async fn new_connector_detailed_async(
    client: &Client,
    body: &NewConnectorRequest,
) -> ApiResult<Response<NewConnectorOutcome>> {
    let request = new_connector_request(body)?;
    let raw = client.send_async(&request).await?;
    build_response(client, raw)
}

/// Suspending form of [`new_connector`].
pub async fn new_connector_async(
    client: &Client,
    body: &NewConnectorRequest,
) -> ApiResult<Option<NewConnectorOutcome>> {
    Ok(new_connector_detailed_async(client, body)
        .await?
        .into_parsed())
}
