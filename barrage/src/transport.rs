//! The HTTP capability workers send requests through.
//!
//! [`ReqwestTransport`] is the real thing. [`FnTransport`] wraps an async closure
//! and is handy for dry runs and tests.

use std::{error::Error as StdError, fmt, future::Future, io, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use reqwest::{
    Client, Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and headers of a response, with a body that is read lazily and at
/// most once.
pub struct TransportResponse {
    status: u16,
    headers: HeaderMap,
    pending: Option<BoxFuture<'static, Result<Bytes, TransportError>>>,
    read: Option<Result<Bytes, TransportError>>,
}

impl TransportResponse {
    /// A response whose body is already in memory.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            pending: None,
            read: Some(Ok(body.into())),
        }
    }

    /// A response whose body is produced by `body` on first read.
    pub fn streaming(
        status: u16,
        headers: HeaderMap,
        body: impl Future<Output = Result<Bytes, TransportError>> + Send + 'static,
    ) -> Self {
        Self {
            status,
            headers,
            pending: Some(body.boxed()),
            read: None,
        }
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub async fn body(&mut self) -> Result<Bytes, TransportError> {
        if let Some(pending) = self.pending.take() {
            self.read = Some(pending.await);
        }
        self.read.clone().unwrap_or_else(|| Ok(Bytes::new()))
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_read", &self.read.is_some())
            .finish()
    }
}

/// Sends one request. Shared by every request task, hence `Send + Sync`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Transport")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        Ok(TransportResponse::streaming(status, headers, async move {
            response.bytes().await.map_err(classify)
        }))
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if is_connection_refused(&error) {
        TransportError::ConnectionRefused
    } else {
        TransportError::Other(error.to_string())
    }
}

fn is_connection_refused(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = err.source();
    }
    // Some connectors flatten the io error into their own type.
    error.is_connect() && format!("{error:?}").contains("ConnectionRefused")
}

/// Transport backed by an async closure.
///
/// ```rust
/// use barrage::transport::{FnTransport, TransportError, TransportRequest, TransportResponse};
///
/// let transport = FnTransport::new(|request: TransportRequest| async move {
///     Ok::<_, TransportError>(TransportResponse::new(200, format!("hello from {}", request.url)))
/// });
/// # let _ = transport;
/// ```
pub struct FnTransport<F> {
    handler: F,
}

impl<F> FnTransport<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> fmt::Debug for FnTransport<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(TransportRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TransportResponse, TransportError>> + Send + 'static,
{
    async fn send(
        &self,
        request: TransportRequest,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        (self.handler)(request).await
    }
}
