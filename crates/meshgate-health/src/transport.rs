//! Outbound HTTP calls to replicas.
//!
//! `Transport` is the seam used by health probes and saga steps. The
//! production implementation speaks HTTP/1.1 over a fresh TCP connection
//! per call; tests inject their own.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = "meshgate/0.1";

/// Errors from a single outbound call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("http handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },

    #[error("request to {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },

    #[error("{uri} returned status {status}")]
    Status { uri: String, status: u16 },

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// One call against one replica.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// `host:port`.
    pub address: String,
    pub path: String,
    pub method: Method,
    /// JSON body, if any.
    pub body: Option<Bytes>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn get(address: &str, path: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            path: path.to_string(),
            method: Method::GET,
            body: None,
            timeout,
        }
    }

    pub fn post_json(address: &str, path: &str, body: &serde_json::Value, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            path: path.to_string(),
            method: Method::POST,
            body: Some(Bytes::from(body.to_string())),
            timeout,
        }
    }

    pub fn delete(address: &str, path: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            path: path.to_string(),
            method: Method::DELETE,
            body: None,
            timeout,
        }
    }

    pub fn uri(&self) -> String {
        format!("http://{}{}", self.address, self.path)
    }
}

/// Status and body of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, or `None` if it is not JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Turn a non-2xx response into `TransportError::Status`.
    pub fn error_for_status(self, request: &TransportRequest) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Status {
                uri: request.uri(),
                status: self.status,
            })
        }
    }
}

/// Boxed future returned by [`Transport::call`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>>;

/// Makes HTTP calls to replicas.
///
/// Implementations must honor `request.timeout` and report an elapsed
/// deadline as `TransportError::Timeout`.
pub trait Transport: Send + Sync {
    fn call<'a>(&'a self, request: &'a TransportRequest) -> TransportFuture<'a>;
}

/// HTTP/1.1 transport over hyper.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

impl HttpTransport {
    pub fn new() -> Self {
        Self
    }

    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let uri = request.uri();

        let stream = tokio::net::TcpStream::connect(&request.address)
            .await
            .map_err(|e| TransportError::Connect {
                address: request.address.clone(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::Handshake {
                address: request.address.clone(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "replica connection closed with error");
            }
        });

        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(&uri)
            .header("host", &request.address)
            .header("user-agent", USER_AGENT);
        if request.body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(Full::new(request.body.clone().unwrap_or_default()))
            .map_err(|e| TransportError::Invalid(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| TransportError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?
            .to_bytes();

        debug!(%uri, status, bytes = body.len(), "replica call completed");
        Ok(TransportResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn call<'a>(&'a self, request: &'a TransportRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(request.timeout, self.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    uri: request.uri(),
                    timeout: request.timeout,
                }),
            }
        })
    }
}
