//! Signed REST request model and transport seam.
//!
//! Venue adapters build [`HttpRequest`] values (path, query, body, headers)
//! and sign them; the connector's REST executor hands them to an
//! [`HttpTransport`] for delivery. Production code uses [`ReqwestTransport`];
//! tests substitute an in-memory double.

use crate::error::TransportError;
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

pub use reqwest::Method;

/// Venue endpoint classes with independent rate budgets.
///
/// Venues meter trade submission separately from (cheaper) queries; trading
/// rule downloads are typically the most generous class of all.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Order placement and cancellation.
    Trade,
    /// Order / balance queries.
    Query,
    /// Trading rule (symbol metadata) downloads.
    Rules,
}

/// A single REST call, fully described and ready to sign.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the transport's base URL, eg/ `"/api/2/order"`.
    pub path: Cow<'static, str>,
    /// Query parameters, appended in order.
    pub query: Vec<(String, String)>,
    /// Request body, already encoded (form or JSON per the venue).
    pub body: Option<String>,
    /// Extra headers (auth, content-type).
    pub headers: Vec<(String, String)>,
    pub class: EndpointClass,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<Cow<'static, str>>, class: EndpointClass) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            class,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The query string in wire order, without a leading `?`.
    ///
    /// Signing schemes that cover the query rely on this exact encoding also
    /// being what is sent, so both paths go through `serde_urlencoded`.
    pub fn query_string(&self) -> Result<String, TransportError> {
        serde_urlencoded::to_string(&self.query)
            .map_err(|error| TransportError::Serialisation(error.to_string()))
    }
}

/// A delivered response: status plus raw body bytes.
///
/// Body interpretation (including "2xx but unparsable") belongs to the venue
/// adapter, so the transport never attempts to decode it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam between the REST executor and the network.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Deliver `request` and return the raw response.
    ///
    /// Implementations map connection failures to
    /// [`TransportError::Network`] and deadline misses to
    /// [`TransportError::Timeout`]; any HTTP status (including 4xx/5xx) is a
    /// *successful* delivery and comes back as an [`HttpResponse`].
    async fn execute(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// Production [`HttpTransport`] backed by a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn build(&self, request: &HttpRequest) -> Result<reqwest::Request, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
            .build()
            .map_err(|error| TransportError::BuildRequest(error.to_string()))
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let built = self.build(&request)?;

        let response = tokio::time::timeout(timeout, self.client.execute(built))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|error| {
                if error.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Network(error.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|error| TransportError::Network(error.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_preserves_order() {
        let request = HttpRequest::new(Method::GET, "/api/2/order", EndpointClass::Query)
            .with_query("symbol", "BTCUSDT")
            .with_query("clientOrderId", "jcn-7");

        assert_eq!(
            request.query_string().unwrap(),
            "symbol=BTCUSDT&clientOrderId=jcn-7"
        );
    }

    #[test]
    fn success_covers_2xx_only() {
        let ok = HttpResponse {
            status: 204,
            body: Bytes::new(),
        };
        let nok = HttpResponse {
            status: 404,
            body: Bytes::new(),
        };
        assert!(ok.is_success());
        assert!(!nok.is_success());
    }
}
