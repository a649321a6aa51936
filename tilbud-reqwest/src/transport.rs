//! Transport implementation backed by a [`reqwest::Client`].

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use smol_str::SmolStr;
use tilbud_core::{Exchange, Method, Response, Transport, TransportError, TransportKind};

/// Sends exchanges with a shared [`reqwest::Client`].
///
/// Cloning is cheap; the client keeps one connection pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wraps an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Starts building a transport with its own client.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// The wrapped client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug, Default)]
pub struct ReqwestTransportBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ReqwestTransportBuilder {
    /// Total time allowed for one exchange.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Time allowed to establish a connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// `User-Agent` header sent with every exchange.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Builds the client.
    pub fn build(self) -> Result<ReqwestTransport, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }
        Ok(ReqwestTransport::new(builder.build()?))
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

/// Maps a reqwest failure onto a [`TransportKind`].
pub fn classify(err: &reqwest::Error) -> TransportKind {
    if err.is_timeout() {
        return TransportKind::Timeout;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string().to_ascii_lowercase();
        if message.contains("dns") || message.contains("failed to lookup address") {
            return TransportKind::Dns;
        }
        source = cause.source();
    }
    if err.is_connect() {
        TransportKind::Connect
    } else {
        TransportKind::Other
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    let kind = classify(&err);
    TransportError::new(kind, err.to_string())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, exchange: Exchange) -> Result<Response, TransportError> {
        let mut request = self
            .client
            .request(to_reqwest_method(exchange.method), &exchange.url);
        for (name, value) in &exchange.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = exchange.body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    SmolStr::new(name.as_str()),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(transport_error)?;
        tracing::trace!(status, bytes = body.len(), "exchange completed");

        Ok(Response::new(status, headers, body))
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}
