//! Purpose: HTTP client handle for the pipeline manager v0 API.
//! Exports: `Client`, `ClientBuilder`, `TlsMode`.
//! Role: Owns connection settings and dispatches `ApiRequest`s over a blocking
//! (ureq) or a suspending (reqwest) transport.
//! Invariants: Base URLs are http(s) with no path; endpoint paths are absolute from `/`.
//! Invariants: Dispatch never interprets status codes; any status yields a `RawResponse`.
//! Invariants: Only transport failures (connect, TLS, timeout, body read) are errors here.
//! Invariants: Both transports send the same header map and share one redirect walk, so a
//! request looks identical on the wire whichever mode issued it.
#![allow(clippy::result_large_err)]

use super::response::{ApiRequest, RawResponse};
use crate::core::error::{Error, ErrorKind};
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use ureq::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use ureq::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use ureq::rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use url::Url;

type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_AUTH_HEADER_NAME: &str = "Authorization";
pub const DEFAULT_TOKEN_PREFIX: &str = "Bearer";
const MAX_REDIRECTS: u32 = 5;

/// How server certificates are checked.
#[derive(Clone, Debug, Default)]
pub enum TlsMode {
    #[default]
    Verify,
    /// Trust only the certificates of this PEM file.
    CaFile(std::path::PathBuf),
    /// Accept any certificate (dev-only).
    SkipVerify,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    settings: Settings,
    agent: ureq::Agent,
    http: reqwest::Client,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let settings = &self.inner.settings;
        f.debug_struct("Client")
            .field("base_url", &settings.base_url.as_str())
            .field("has_token", &settings.auth.is_some())
            .field("timeout", &settings.timeout)
            .field("follow_redirects", &settings.follow_redirects)
            .field("raise_on_unexpected_status", &settings.raise_on_unexpected_status)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
struct Settings {
    base_url: Url,
    auth: Option<(HeaderName, HeaderValue)>,
    headers: HeaderMap,
    cookies: Vec<(String, String)>,
    timeout: Option<Duration>,
    follow_redirects: bool,
    raise_on_unexpected_status: bool,
}

/// One leg of a request; redirects produce further hops.
#[derive(Clone, Debug)]
struct Hop {
    method: &'static str,
    url: Url,
    body: Option<Bytes>,
    with_auth: bool,
}

#[derive(Clone, Debug)]
pub struct ClientBuilder {
    base_url: String,
    token: Option<String>,
    prefix: String,
    auth_header_name: String,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    timeout: Option<Duration>,
    follow_redirects: bool,
    raise_on_unexpected_status: bool,
    tls: TlsMode,
}

#[derive(Debug)]
struct AcceptAllServerCertVerifier;

impl ServerCertVerifier for AcceptAllServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ureq::rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl ClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            auth_header_name: DEFAULT_AUTH_HEADER_NAME.to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
            timeout: None,
            follow_redirects: true,
            raise_on_unexpected_status: false,
            tls: TlsMode::Verify,
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Scheme placed before the token; an empty prefix sends the bare token.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn auth_header_name(mut self, name: impl Into<String>) -> Self {
        self.auth_header_name = name.into();
        self
    }

    /// Adds a header sent on every request; a later call with the same name
    /// (case-insensitive) replaces the earlier value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.cookies.retain(|(existing, _)| existing != &name);
        self.cookies.push((name, value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn raise_on_unexpected_status(mut self, raise: bool) -> Self {
        self.raise_on_unexpected_status = raise;
        self
    }

    pub fn tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn build(self) -> ApiResult<Client> {
        let base_url = normalize_base_url(self.base_url)?;
        let auth_name = parse_header_name(&self.auth_header_name)?;
        let auth = match &self.token {
            Some(token) => {
                let value = if self.prefix.is_empty() {
                    token.clone()
                } else {
                    format!("{} {token}", self.prefix)
                };
                let mut value = parse_header_value(&auth_name, &value)?;
                value.set_sensitive(true);
                Some((auth_name, value))
            }
            None => None,
        };
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }
        if let Some(cookie) = cookie_header(&self.cookies) {
            parse_header_value(&COOKIE, &cookie)?;
        }

        let certs = match &self.tls {
            TlsMode::CaFile(path) => Some(read_ca_file(path)?),
            _ => None,
        };
        let agent = build_agent(&self.tls, certs.as_deref())?;
        let http = build_http(&self.tls, certs.as_deref())?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                settings: Settings {
                    base_url,
                    auth,
                    headers,
                    cookies: self.cookies,
                    timeout: self.timeout,
                    follow_redirects: self.follow_redirects,
                    raise_on_unexpected_status: self.raise_on_unexpected_status,
                },
                agent,
                http,
            }),
        })
    }
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        ClientBuilder::new(base_url).build()
    }

    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.settings.base_url
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.settings.timeout
    }

    pub fn raise_on_unexpected_status(&self) -> bool {
        self.inner.settings.raise_on_unexpected_status
    }

    pub fn has_token(&self) -> bool {
        self.inner.settings.auth.is_some()
    }

    pub fn follow_redirects(&self) -> bool {
        self.inner.settings.follow_redirects
    }

    /// Returns a handle that also sends `headers` on every request.
    pub fn with_headers<I, K, V>(&self, headers: I) -> ApiResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut settings = self.inner.settings.clone();
        for (name, value) in headers {
            let (name, value) = parse_header(&name.into(), &value.into())?;
            settings.headers.insert(name, value);
        }
        Ok(self.with_settings(settings))
    }

    pub fn with_cookies<I, K, V>(&self, cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut settings = self.inner.settings.clone();
        for (name, value) in cookies {
            let name = name.into();
            settings.cookies.retain(|(existing, _)| existing != &name);
            settings.cookies.push((name, value.into()));
        }
        self.with_settings(settings)
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut settings = self.inner.settings.clone();
        settings.timeout = Some(timeout);
        self.with_settings(settings)
    }

    /// Sends `request` and blocks until the whole response body is read.
    pub fn send(&self, request: &ApiRequest) -> ApiResult<RawResponse> {
        let mut hop = self.first_hop(request)?;
        let mut redirects = 0;
        loop {
            let raw = self.send_hop(&hop)?;
            match self.next_hop(&hop, &raw, &mut redirects)? {
                Some(next) => hop = next,
                None => return Ok(raw),
            }
        }
    }

    /// Sends `request`, yielding to the executor while the call is in flight.
    pub async fn send_async(&self, request: &ApiRequest) -> ApiResult<RawResponse> {
        let mut hop = self.first_hop(request)?;
        let mut redirects = 0;
        loop {
            let raw = self.send_hop_async(&hop).await?;
            match self.next_hop(&hop, &raw, &mut redirects)? {
                Some(next) => hop = next,
                None => return Ok(raw),
            }
        }
    }

    fn send_hop(&self, hop: &Hop) -> ApiResult<RawResponse> {
        debug!(method = hop.method, url = %hop.url, "sending request");
        let mut call = self.inner.agent.request(hop.method, hop.url.as_str());
        for (name, value) in &self.request_headers(hop) {
            call = call.set(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
        }
        if let Some(timeout) = self.inner.settings.timeout {
            call = call.timeout(timeout);
        }
        let result = match &hop.body {
            Some(body) => call.send_bytes(body),
            None => call.call(),
        };

        let response = match result {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("request failed")
                    .with_url(hop.url.as_str())
                    .with_source(err));
            }
        };
        let raw = raw_from_ureq(response).map_err(|err| err.with_url(hop.url.as_str()))?;
        debug!(status = raw.status.as_u16(), bytes = raw.content.len(), "received response");
        Ok(raw)
    }

    async fn send_hop_async(&self, hop: &Hop) -> ApiResult<RawResponse> {
        debug!(method = hop.method, url = %hop.url, "sending request");
        let method = reqwest::Method::from_bytes(hop.method.as_bytes()).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid http method")
                .with_source(err)
        })?;
        let mut call = self
            .inner
            .http
            .request(method, hop.url.clone())
            .headers(self.request_headers(hop));
        if let Some(timeout) = self.inner.settings.timeout {
            call = call.timeout(timeout);
        }
        if let Some(body) = &hop.body {
            call = call.body(body.clone());
        }

        let response = call.send().await.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_url(hop.url.as_str())
                .with_source(err)
        })?;
        let status = response.status();
        let headers = response.headers().clone();
        let content = response.bytes().await.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read response body")
                .with_url(hop.url.as_str())
                .with_source(err)
        })?;
        debug!(status = status.as_u16(), bytes = content.len(), "received response");
        Ok(RawResponse {
            status,
            headers,
            content,
        })
    }

    fn first_hop(&self, request: &ApiRequest) -> ApiResult<Hop> {
        let segments: Vec<&str> = request.path.iter().map(String::as_str).collect();
        Ok(Hop {
            method: request.method,
            url: build_url(&self.inner.settings.base_url, &segments)?,
            body: request.json_body.clone(),
            with_auth: true,
        })
    }

    /// Decides whether `raw` redirects `hop` somewhere else.
    ///
    /// 303, and 301/302 answering a POST, continue as a bodiless GET; 307/308 repeat the
    /// method and body. Credentials are only sent back to the origin they came from.
    fn next_hop(
        &self,
        hop: &Hop,
        raw: &RawResponse,
        redirects: &mut u32,
    ) -> ApiResult<Option<Hop>> {
        if !self.inner.settings.follow_redirects {
            return Ok(None);
        }
        let method = match raw.status.as_u16() {
            301 | 302 if hop.method == "POST" => "GET",
            303 if hop.method != "HEAD" => "GET",
            301 | 302 | 303 | 307 | 308 => hop.method,
            _ => return Ok(None),
        };
        let Some(location) = raw.headers.get(LOCATION) else {
            return Ok(None);
        };
        if *redirects >= MAX_REDIRECTS {
            return Err(Error::new(ErrorKind::Io)
                .with_message(format!("stopped after {MAX_REDIRECTS} redirects"))
                .with_url(hop.url.as_str())
                .with_status(raw.status.as_u16()));
        }
        let url = location
            .to_str()
            .ok()
            .and_then(|location| hop.url.join(location).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| {
                Error::new(ErrorKind::Decode)
                    .with_message("invalid redirect location")
                    .with_url(hop.url.as_str())
                    .with_status(raw.status.as_u16())
                    .with_content(raw.content.clone())
            })?;
        *redirects += 1;
        debug!(status = raw.status.as_u16(), location = %url, method, "following redirect");
        Ok(Some(Hop {
            method,
            body: if method == hop.method { hop.body.clone() } else { None },
            with_auth: hop.with_auth && url.origin() == hop.url.origin(),
            url,
        }))
    }

    /// Final header set for one hop. Later entries replace earlier ones of the same
    /// name: configured headers, then credentials, then the cookie jar, then
    /// `Accept`/`Content-Type`.
    fn request_headers(&self, hop: &Hop) -> HeaderMap {
        let settings = &self.inner.settings;
        let mut headers = settings.headers.clone();
        if let (true, Some((name, value))) = (hop.with_auth, &settings.auth) {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(cookie) = cookie_header(&settings.cookies) {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    headers.insert(COOKIE, value);
                }
                Err(_) => warn!("dropping cookies that are not valid header text"),
            }
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if hop.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        headers
    }

    fn with_settings(&self, settings: Settings) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                settings,
                agent: self.inner.agent.clone(),
                http: self.inner.http.clone(),
            }),
        }
    }
}

/// Redirects are walked by `Client` itself, so neither transport follows them.
fn build_agent(
    tls: &TlsMode,
    certs: Option<&[CertificateDer<'static>]>,
) -> ApiResult<ureq::Agent> {
    let builder = ureq::AgentBuilder::new().redirects(0);
    let builder = match tls {
        TlsMode::Verify => builder,
        TlsMode::CaFile(path) => {
            let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
            let mut root_store = ureq::rustls::RootCertStore::empty();
            let (added, _) = root_store.add_parsable_certificates(certs.unwrap_or_default().to_vec());
            if added == 0 {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("TLS CA/certificate file contains no parsable certificates")
                    .with_hint(path.display().to_string()));
            }
            let tls_config = ureq::rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            builder.tls_config(Arc::new(tls_config))
        }
        TlsMode::SkipVerify => {
            let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
            let tls_config = ureq::rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAllServerCertVerifier))
                .with_no_client_auth();
            builder.tls_config(Arc::new(tls_config))
        }
    };
    Ok(builder.build())
}

fn build_http(
    tls: &TlsMode,
    certs: Option<&[CertificateDer<'static>]>,
) -> ApiResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    match tls {
        TlsMode::Verify => {}
        TlsMode::CaFile(_) => {
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs.unwrap_or_default() {
                let cert = reqwest::Certificate::from_der(cert.as_ref()).map_err(|err| {
                    Error::new(ErrorKind::Usage)
                        .with_message("failed to load TLS CA/certificate")
                        .with_source(err)
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }
        TlsMode::SkipVerify => {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }
    builder.build().map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to build http client")
            .with_source(err)
    })
}

fn read_ca_file(path: &Path) -> ApiResult<Vec<CertificateDer<'static>>> {
    let cert_bytes = std::fs::read(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!(
                "failed to read TLS CA/certificate file {}",
                path.display()
            ))
            .with_source(err)
    })?;
    let mut cert_reader = Cursor::new(cert_bytes);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "failed to parse TLS CA/certificate file {}",
                    path.display()
                ))
                .with_source(err)
        })?;
    if certs.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "TLS CA/certificate file {} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

fn raw_from_ureq(response: ureq::Response) -> ApiResult<RawResponse> {
    let status = StatusCode::from_u16(response.status()).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid response status")
            .with_source(err)
    })?;
    let mut headers = HeaderMap::new();
    for name in response.headers_names() {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in response.all(&name) {
            if let Ok(header_value) = HeaderValue::from_str(value) {
                headers.append(header_name.clone(), header_value);
            }
        }
    }
    let mut content = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut content)
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read response body")
                .with_source(err)
        })?;
    Ok(RawResponse {
        status,
        headers,
        content: Bytes::from(content),
    })
}

fn parse_header_name(name: &str) -> ApiResult<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid header name {name:?}"))
            .with_source(err)
    })
}

fn parse_header_value(name: &HeaderName, value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid value for header {:?}", name.as_str()))
            .with_source(err)
    })
}

fn parse_header(name: &str, value: &str) -> ApiResult<(HeaderName, HeaderValue)> {
    let name = parse_header_name(name)?;
    let value = parse_header_value(&name, value)?;
    Ok((name, value))
}

fn cookie_header(cookies: &[(String, String)]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    let pairs: Vec<String> = cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    Some(pairs.join("; "))
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("base url must use http or https scheme")
        );
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("base url must not include a path")
            .with_hint("Pass only scheme, host, and port, e.g. http://localhost:8080"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| Error::new(ErrorKind::Usage).with_message("base url cannot be a base"))?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}
