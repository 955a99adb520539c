//! Purpose: Transport-neutral request descriptors and response envelopes.
//! Exports: `ApiRequest`, `RawResponse`, `Response`.
//! Role: Shared currency between endpoint functions and both client transports.
//! Invariants: `RawResponse` holds whatever the server sent, for any status code.
//! Invariants: `Response::status` always equals the status of the underlying `RawResponse`.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;

use crate::core::error::{Error, ErrorKind};

/// One HTTP call, described independently of the transport that will send it.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: &'static str,
    pub path: Vec<String>,
    pub json_body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: &'static str, path: &[&str]) -> Self {
        Self {
            method,
            path: path.iter().map(|segment| segment.to_string()).collect(),
            json_body: None,
        }
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, Error> {
        let payload = serde_json::to_vec(body).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_source(err)
        })?;
        self.json_body = Some(Bytes::from(payload));
        Ok(self)
    }

    pub fn path_string(&self) -> String {
        format!("/{}", self.path.join("/"))
    }
}

/// Status, headers, and body exactly as a transport received them.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content: Bytes,
}

impl RawResponse {
    pub fn new(status: StatusCode, content: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            content: content.into(),
        }
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.content).map_err(|err| {
            Error::new(ErrorKind::Decode)
                .with_message(format!("invalid response json for status {}", self.status))
                .with_status(self.status.as_u16())
                .with_content(self.content.clone())
                .with_source(err)
        })
    }
}

/// Detailed result of an endpoint call: response metadata plus the parsed payload.
#[derive(Clone, Debug)]
pub struct Response<T> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content: Bytes,
    pub parsed: Option<T>,
}

impl<T> Response<T> {
    pub fn from_raw(raw: RawResponse, parsed: Option<T>) -> Self {
        Self {
            status: raw.status,
            headers: raw.headers,
            content: raw.content,
            parsed,
        }
    }

    pub fn into_parsed(self) -> Option<T> {
        self.parsed
    }
}
