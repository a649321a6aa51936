#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tilbud::{
    Backoff, Completion, DeliveryMode, MockTransport, QueueConfig, Request, RequestQueue,
    Response,
};
use tilbud_backend::{Backend, BackendError, BackendResult, DeleteStatus, NullBackend};
use tilbud_core::{CacheKey, CacheValue, Raw};

pub const BASE_URL: &str = "https://api.test";

/// Fast, deterministic defaults: no backoff, no retries unless a test asks.
pub fn test_config() -> QueueConfig {
    QueueConfig::default()
        .with_base_url(BASE_URL)
        .with_backoff(Backoff::none())
        .with_max_retries(0)
        .with_timeout(Some(Duration::from_secs(5)))
}

pub fn queue(mock: &MockTransport, config: QueueConfig) -> RequestQueue {
    RequestQueue::builder()
        .transport(mock.clone())
        .backend(NullBackend)
        .config(config)
        .build()
}

pub fn json(body: &'static str) -> Response {
    Response::json_ok(body)
}

pub async fn complete(queue: &RequestQueue, request: Request) -> Completion {
    let (_handle, pending) = queue.fetch(request);
    tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("request completes")
}

/// Listener that records outcomes with a label, in delivery order.
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<(usize, Completion)>>>,
}

impl Recorder {
    pub fn listener(&self, label: usize) -> impl FnOnce(Completion) + Send + 'static {
        let entries = self.entries.clone();
        move |completion| entries.lock().unwrap().push((label, completion))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.entries.lock().unwrap().iter().map(|(label, _)| *label).collect()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, completion)| completion.clone())
            .collect()
    }

    pub fn get(&self, label: usize) -> Option<Completion> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, completion)| completion.clone())
    }

    pub async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("outcomes delivered");
    }
}

/// Drives a manual-delivery queue until `recorder` holds `count` outcomes.
pub async fn pump_until(queue: &RequestQueue, recorder: &Recorder, count: usize) {
    assert_eq!(queue.config().delivery, DeliveryMode::Manual);
    tokio::time::timeout(Duration::from_secs(5), async {
        while recorder.len() < count {
            queue.deliver_pending();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("outcomes delivered");
}

/// Backend whose every operation fails.
#[derive(Debug, Default)]
pub struct BrokenBackend;

fn broken() -> BackendError {
    BackendError::internal(std::io::Error::other("backend down"))
}

#[async_trait]
impl Backend for BrokenBackend {
    async fn read(&self, _key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        Err(broken())
    }

    async fn write(&self, _key: &CacheKey, _value: CacheValue<Raw>) -> BackendResult<()> {
        Err(broken())
    }

    async fn remove(&self, _key: &CacheKey) -> BackendResult<DeleteStatus> {
        Err(broken())
    }

    async fn clear(&self) -> BackendResult<()> {
        Err(broken())
    }

    fn name(&self) -> &str {
        "broken"
    }
}
