//! Purpose: Scripted loopback mock of the pipeline manager for integration tests.
//! Exports: `MockServer`, `Received`, sample request/response bodies.
//! Role: Serves `POST /v0/connectors` (and the `/v0/moved` redirect target) over plain
//! HTTP or over HTTPS with a freshly generated self-signed certificate.
//! Invariants: Binds 127.0.0.1:0 before returning, so no readiness polling is needed.
//! Invariants: The server thread is shut down and joined on drop.
#![allow(dead_code)]

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use feldera_api_client::api::{
    Client, ConnectorConfig, FormatConfig, NewConnectorRequest, TransportConfig,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rcgen::{Certificate, CertificateParams, SanType};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::json;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

pub const CONNECTOR_ID: &str = "7b1f3c9e-2d4a-4f61-9a0e-5c3b8d2e1f40";
pub const MOVED_PATH: &str = "/v0/moved";

#[derive(Clone, Debug)]
pub struct Received {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

struct Script {
    status: StatusCode,
    body: String,
    delay: Option<Duration>,
    /// When set, `/v0/connectors` answers with this status and `Location`.
    redirect: Option<(StatusCode, String)>,
    received: Mutex<Vec<Received>>,
}

pub struct MockServer {
    pub base_url: String,
    script: Arc<Script>,
    ca_file: Option<NamedTempFile>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start(status: u16, body: impl Into<String>) -> TestResult<Self> {
        Self::start_with_delay(status, body, None)
    }

    pub fn start_with_delay(
        status: u16,
        body: impl Into<String>,
        delay: Option<Duration>,
    ) -> TestResult<Self> {
        Self::spawn(Script::new(status, body, delay, None)?, None)
    }

    /// `/v0/connectors` redirects to `location`; `/v0/moved` answers 201 created.
    pub fn start_redirect(status: u16, location: &str) -> TestResult<Self> {
        let redirect = (StatusCode::from_u16(status)?, location.to_string());
        Self::spawn(Script::new(201, created_body(), None, Some(redirect))?, None)
    }

    /// HTTPS server; `ca_path` points at its self-signed certificate in PEM form.
    pub fn start_tls(status: u16, body: impl Into<String>) -> TestResult<Self> {
        let (acceptor, cert_pem) = self_signed_acceptor()?;
        let mut ca_file = NamedTempFile::new()?;
        ca_file.write_all(cert_pem.as_bytes())?;
        ca_file.flush()?;
        let mut server = Self::spawn(Script::new(status, body, None, None)?, Some(acceptor))?;
        server.ca_file = Some(ca_file);
        Ok(server)
    }

    fn spawn(script: Script, tls: Option<TlsAcceptor>) -> TestResult<Self> {
        let script = Arc::new(script);
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let scheme = if tls.is_some() { "https" } else { "http" };
        let base_url = format!("{scheme}://{}", listener.local_addr()?);

        let app = Router::new()
            .route("/v0/connectors", post(record))
            .route(MOVED_PATH, post(record).get(record))
            .with_state(script.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread = std::thread::spawn(move || {
            runtime.block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                match tls {
                    Some(acceptor) => serve_tls(listener, app, acceptor, shutdown_rx).await,
                    None => {
                        let _ = axum::serve(listener, app)
                            .with_graceful_shutdown(async {
                                let _ = shutdown_rx.await;
                            })
                            .await;
                    }
                }
            });
        });

        Ok(Self {
            base_url,
            script,
            ca_file: None,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn client(&self, raise_on_unexpected_status: bool) -> TestResult<Client> {
        Ok(Client::builder(self.base_url.clone())
            .raise_on_unexpected_status(raise_on_unexpected_status)
            .build()?)
    }

    pub fn ca_path(&self) -> Option<&Path> {
        self.ca_file.as_ref().map(NamedTempFile::path)
    }

    pub fn received(&self) -> Vec<Received> {
        self.script
            .received
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    pub fn take_received(&self) -> Vec<Received> {
        std::mem::take(
            &mut *self
                .script
                .received
                .lock()
                .unwrap_or_else(|poison| poison.into_inner()),
        )
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Script {
    fn new(
        status: u16,
        body: impl Into<String>,
        delay: Option<Duration>,
        redirect: Option<(StatusCode, String)>,
    ) -> TestResult<Self> {
        Ok(Self {
            status: StatusCode::from_u16(status)?,
            body: body.into(),
            delay,
            redirect,
            received: Mutex::new(Vec::new()),
        })
    }
}

async fn record(
    State(script): State<Arc<Script>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    script
        .received
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .push(Received {
            method,
            path: path.clone(),
            headers,
            body,
        });
    if let Some(delay) = script.delay {
        tokio::time::sleep(delay).await;
    }
    if let (Some((status, location)), "/v0/connectors") = (&script.redirect, path.as_str()) {
        return (*status, [(LOCATION, location.clone())]).into_response();
    }
    (
        script.status,
        [(CONTENT_TYPE, "application/json")],
        script.body.clone(),
    )
        .into_response()
}

async fn serve_tls(
    listener: tokio::net::TcpListener,
    app: Router,
    acceptor: TlsAcceptor,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let stream = tokio::select! {
            _ = &mut shutdown => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(_) => continue,
            },
        };
        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            // Handshakes fail on purpose when a client refuses the certificate.
            let Ok(stream) = acceptor.accept(stream).await else {
                return;
            };
            let _ = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await;
        });
    }
}

fn self_signed_acceptor() -> TestResult<(TlsAcceptor, String)> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let mut params = CertificateParams::new(vec!["localhost".to_string()]);
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    let cert = Certificate::from_params(params)?;
    let cert_pem = cert.serialize_pem()?;
    // Serve the exact certificate written to the CA file.
    let chain = rustls_pemfile::certs(&mut cert_pem.as_bytes()).collect::<Result<Vec<_>, _>>()?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    Ok((TlsAcceptor::from(Arc::new(config)), cert_pem))
}

pub fn sample_request() -> NewConnectorRequest {
    NewConnectorRequest::new(
        "orders",
        "orders topic",
        ConnectorConfig::new(
            TransportConfig::new(
                "kafka",
                json!({"bootstrap.servers": "redpanda:9092", "topics": ["orders"]}),
            ),
            FormatConfig::new("json", json!({"update_format": "insert_delete"})),
        ),
    )
}

pub fn created_body() -> String {
    json!({ "connector_id": CONNECTOR_ID }).to_string()
}

pub fn conflict_body() -> String {
    json!({
        "message": "An entity with this name already exists",
        "error_code": "DuplicateName",
        "details": {}
    })
    .to_string()
}
