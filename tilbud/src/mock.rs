//! In-process transport with canned responses.
//!
//! Routes are matched on method and URL path; the query string is ignored.
//! A route can hold a script of replies that are served in order, the last
//! one repeating forever. Unknown routes answer `501 Not Implemented`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use smol_str::SmolStr;
use tilbud_core::{Exchange, Method, Response, Transport, TransportError, TransportKind};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this response.
    Respond(Response),
    /// Fail at the transport level.
    Fail(TransportError),
}

impl MockReply {
    /// Transport failure of the given kind.
    pub fn fail(kind: TransportKind) -> Self {
        MockReply::Fail(TransportError::new(kind, "mock failure"))
    }

    /// Bare status with an empty body.
    pub fn status(status: u16) -> Self {
        MockReply::Respond(Response::new(status, vec![], ""))
    }
}

impl From<Response> for MockReply {
    fn from(response: Response) -> Self {
        MockReply::Respond(response)
    }
}

#[derive(Debug, Default)]
struct MockState {
    routes: DashMap<(Method, SmolStr), VecDeque<MockReply>>,
    exchanges: Mutex<Vec<Exchange>>,
}

/// Transport that never touches the network.
///
/// Clones share routes and the call log.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
    latency: Option<Duration>,
}

impl MockTransport {
    /// Transport with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every answer.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Always answers `response` for `method path`.
    pub fn respond(&self, method: Method, path: &str, response: Response) {
        self.script(method, path, [MockReply::Respond(response)]);
    }

    /// Always answers `reply` for `method path`.
    pub fn respond_with(&self, method: Method, path: &str, reply: MockReply) {
        self.script(method, path, [reply]);
    }

    /// Serves `replies` in order, repeating the last one.
    pub fn script<I>(&self, method: Method, path: &str, replies: I)
    where
        I: IntoIterator<Item = MockReply>,
    {
        self.state
            .routes
            .insert((method, SmolStr::new(path)), replies.into_iter().collect());
    }

    /// Number of exchanges received.
    pub fn calls(&self) -> usize {
        self.lock_exchanges().len()
    }

    /// Number of exchanges received for `method path`.
    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.lock_exchanges()
            .iter()
            .filter(|exchange| exchange.method == method && exchange.path() == path)
            .count()
    }

    /// Copy of every exchange received, in arrival order.
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.lock_exchanges().clone()
    }

    fn lock_exchanges(&self) -> std::sync::MutexGuard<'_, Vec<Exchange>> {
        self.state
            .exchanges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, method: Method, path: &str) -> Option<MockReply> {
        let mut script = self.state.routes.get_mut(&(method, SmolStr::new(path)))?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, exchange: Exchange) -> Result<Response, TransportError> {
        let method = exchange.method;
        let path = exchange.path().to_owned();
        self.lock_exchanges().push(exchange);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.next_reply(method, &path) {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(err)) => Err(err),
            None => Ok(Response::new(501, vec![], "unsupported")),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
