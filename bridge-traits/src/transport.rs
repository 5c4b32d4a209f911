//! Transport Abstraction
//!
//! Single request/response boundary between the engine and the remote data
//! service. The engine never constructs HTTP clients itself; hosts inject a
//! [`Transport`] implementation (reqwest on desktop, URLSession/OkHttp via
//! FFI on mobile). Payloads are opaque to the engine.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

/// Request method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Canonical uppercase name, also used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Parse a method from its canonical name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

/// Request handed to the transport collaborator.
///
/// `endpoint` is the logical endpoint name used for circuit breaking
/// (e.g. `"cart"`, `"orders"`), independent of the concrete URL.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub endpoint: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn new(method: Method, endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            path: path.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Convenience constructor for cache refresh fetches.
    pub fn get(endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint, path)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Attach the caller-supplied idempotency key so the server can
    /// deduplicate re-executions.
    pub fn idempotency_key(self, key: impl Into<String>) -> Self {
        self.header("Idempotency-Key", key)
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Response returned by the transport collaborator.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
    /// Entity tag, when the server provides one (ETag cache policy)
    pub etag: Option<String>,
    /// Server resource version, when the server provides one
    pub version: Option<String>,
}

impl TransportResponse {
    pub fn ok(body: Bytes) -> Self {
        Self {
            status: 200,
            body,
            etag: None,
            version: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport trait
///
/// Performs exactly one network request/response exchange. All retry,
/// backoff, circuit-breaking, and timeout logic lives in the engine;
/// implementations should map their native failures onto the
/// [`TransportError`](crate::error::TransportError) taxonomy and otherwise
/// stay dumb.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a single request.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Re-authentication facility
///
/// Invoked when a request fails with `AuthExpired`. On success the failed
/// operation is re-enqueued exactly once without consuming a retry.
#[async_trait]
pub trait ReauthProvider: Send + Sync {
    /// Attempt to refresh credentials. Returns `true` when the session was
    /// restored and the failed request may be replayed.
    async fn reauthenticate(&self) -> bool;
}
