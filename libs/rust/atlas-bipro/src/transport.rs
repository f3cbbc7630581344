//! HTTP transport port
//!
//! Every outbound HTTP call of the pipeline goes through [`HttpTransport`].
//! Production uses [`ReqwestTransport`]; tests script responses without a
//! network.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::ClientIdentity;
use crate::error::TransferError;

/// Outbound HTTP request, transport-agnostic.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: Vec<u8>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
            timeout,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response with raw body bytes; headers preserved for MTOM splitting.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Retry-After` header (seconds form only).
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes outbound HTTP requests, honouring cooperative cancellation.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransferError>;
}

/// reqwest-backed transport. One instance per carrier so certificate-auth
/// carriers get their pinned client identity on every connection.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given connect timeout and optional client
    /// certificate identity.
    pub fn new(
        connect_timeout: Duration,
        identity: Option<&ClientIdentity>,
    ) -> Result<Self, TransferError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .use_native_tls();
        if let Some(identity) = identity {
            builder = builder.identity(identity.reqwest_identity()?);
        }
        let client = builder
            .build()
            .map_err(|e| TransferError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn map_reqwest_error(e: reqwest::Error) -> TransferError {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            TransferError::Transient(e.to_string())
        } else {
            TransferError::Fatal(e.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransferError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        // Dropping the send future aborts the in-flight request.
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = builder.send() => result.map_err(Self::map_reqwest_error)?,
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = response.bytes() => result.map_err(Self::map_reqwest_error)?.to_vec(),
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

pub type SharedTransport = Arc<dyn HttpTransport>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_case_insensitive() {
        let resp = HttpResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "text/xml".into())],
            body: Vec::new(),
        };
        assert_eq!(resp.header("content-type"), Some("text/xml"));
        assert_eq!(resp.header("CONTENT-TYPE"), Some("text/xml"));
        assert_eq!(resp.header("x-missing"), None);
    }

    #[test]
    fn test_retry_after() {
        let resp = HttpResponse {
            status: 429,
            headers: vec![("Retry-After".into(), "2".into())],
            body: Vec::new(),
        };
        assert_eq!(resp.retry_after(), Some(Duration::from_secs(2)));
    }
}
