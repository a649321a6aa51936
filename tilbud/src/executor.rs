//! Single network exchange for a request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use smol_str::SmolStr;
use tilbud_core::{ApiError, Exchange, Request, Response, Transport, TransportKind};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::metrics;
use crate::signer::{Credentials, Signer};

const CONTENT_TYPE: &str = "Content-Type";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Turns a [`Request`] into one transport exchange and maps the outcome onto
/// [`ApiError`].
///
/// There is no retry here; the queue owns the retry loop.
#[derive(Clone)]
pub struct NetworkExecutor {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for NetworkExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkExecutor")
            .field("transport", &self.transport.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NetworkExecutor {
    /// Executor over `transport` with an optional per-exchange timeout.
    pub fn new(transport: Arc<dyn Transport>, timeout: Option<Duration>) -> Self {
        Self { transport, timeout }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Builds the exchange for `request` with the given signature headers.
    ///
    /// Query methods carry parameters in the URL. `POST` and `PUT` carry them
    /// as a form body unless the request has an explicit body. Signature
    /// headers replace any caller-supplied headers of the same name.
    pub fn prepare(&self, request: &Request, signature: Vec<(SmolStr, String)>) -> Exchange {
        let method = request.method();
        let mut headers: Vec<(SmolStr, String)> = request
            .headers()
            .iter()
            .filter(|(name, _)| !Signer::is_signature_header(name))
            .cloned()
            .collect();

        let (url, body) = if method.params_in_query() {
            (request.url_with_query(), request.request_body().cloned())
        } else if let Some(body) = request.request_body() {
            (request.url().to_owned(), Some(body.clone()))
        } else if request.params().is_empty() {
            (request.url().to_owned(), None)
        } else {
            if !headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE))
            {
                headers.push((SmolStr::new_static(CONTENT_TYPE), FORM_URLENCODED.to_owned()));
            }
            (
                request.url().to_owned(),
                Some(request.params().encode().into()),
            )
        };

        headers.extend(signature);

        Exchange {
            method,
            url,
            headers,
            body,
        }
    }

    /// Runs one exchange.
    ///
    /// Returns [`ApiError::Cancelled`] as soon as `cancel` is raised, before or
    /// during the exchange.
    pub async fn execute(
        &self,
        request: &Request,
        credentials: &dyn Credentials,
        cancel: &CancellationToken,
    ) -> Result<Response, ApiError> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let exchange = self.prepare(request, Signer::sign_with(credentials));
        trace!(method = %exchange.method, url = %exchange.url, "sending exchange");

        let timer = metrics::Timer::new();
        let send = self.transport.send(exchange);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            result = with_timeout(self.timeout, send) => result,
        };
        metrics::record_upstream(self.transport.name(), timer.elapsed());

        let response = result?;
        check_response(response)
    }
}

async fn with_timeout<F>(timeout: Option<Duration>, send: F) -> Result<Response, ApiError>
where
    F: Future<Output = Result<Response, tilbud_core::TransportError>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, send).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => Err(ApiError::transport(
                TransportKind::Timeout,
                format!("no response within {limit:?}"),
            )),
        },
        None => send.await.map_err(ApiError::from),
    }
}

/// Non-2xx becomes [`ApiError::Server`]; a JSON body that does not parse
/// becomes [`ApiError::MalformedResponse`].
pub fn check_response(response: Response) -> Result<Response, ApiError> {
    if !response.is_success() {
        return Err(ApiError::Server {
            status: response.status(),
            body: response.body().clone(),
        });
    }
    if response.is_json()
        && !response.body().is_empty()
        && let Err(err) = serde_json::from_slice::<serde::de::IgnoredAny>(response.body())
    {
        return Err(ApiError::MalformedResponse(err.to_string()));
    }
    Ok(response)
}
