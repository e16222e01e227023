//! Stream openers used by [`SyncSubscription`](crate::SyncSubscription)

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use strand_api::{ApiClient, Url};
use strand_core::{Result, StrandError, SyncUpdate};
use tokio::sync::Semaphore;

use crate::client::{SseClient, SyncUpdateStream};

/// `{base}/sync/job/{job_id}/subscribe`
pub fn subscribe_url(api: &ApiClient, job_id: &str) -> Result<Url> {
    if job_id.trim().is_empty() {
        return Err(StrandError::Validation("job id must not be empty".to_string()));
    }
    api.url(&format!("/sync/job/{}/subscribe", job_id))
}

/// Opens a progress stream for a job
#[async_trait]
pub trait SseConnector: Send + Sync {
    async fn open(&self, job_id: &str) -> Result<SyncUpdateStream>;
}

/// Connector backed by the real event-stream endpoint
#[derive(Debug, Clone)]
pub struct HttpSseConnector {
    api: ApiClient,
}

impl HttpSseConnector {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SseConnector for HttpSseConnector {
    async fn open(&self, job_id: &str) -> Result<SyncUpdateStream> {
        SseClient::for_job(&self.api, job_id)?.connect().await
    }
}

/// Feeds a stream handed out by [`MockSseConnector`]
#[derive(Debug, Clone)]
pub struct MockStreamHandle {
    sender: mpsc::UnboundedSender<Result<SyncUpdate>>,
}

impl MockStreamHandle {
    /// Push an update; false once the stream has been dropped
    pub fn send(&self, update: SyncUpdate) -> bool {
        self.sender.unbounded_send(Ok(update)).is_ok()
    }

    /// Push a mid-stream failure
    pub fn send_error(&self, error: StrandError) -> bool {
        self.sender.unbounded_send(Err(error)).is_ok()
    }

    /// End the stream the way a server close would
    pub fn close(&self) {
        self.sender.close_channel();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Default)]
struct MockState {
    opened: Vec<String>,
    failures: HashMap<String, VecDeque<u16>>,
    handles: HashMap<String, MockStreamHandle>,
}

/// Decrements the live count when the stream it rides in is dropped
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connector handing out channel-backed streams, for tests.
///
/// Tracks how many streams are alive at once so callers can assert the
/// single-connection invariant.
#[derive(Default)]
pub struct MockSseConnector {
    state: Mutex<MockState>,
    live: Arc<AtomicUsize>,
    max_live: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MockSseConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose opens block until [`MockSseConnector::release`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Let pending and future opens through
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Fail the next open for `job_id` with an HTTP-style status
    pub fn fail_next(&self, job_id: &str, status: u16) {
        self.lock()
            .failures
            .entry(job_id.to_string())
            .or_default()
            .push_back(status);
    }

    /// Handle for the most recent stream opened for `job_id`
    pub fn handle(&self, job_id: &str) -> Option<MockStreamHandle> {
        self.lock().handles.get(job_id).cloned()
    }

    /// Completed and attempted opens, in order
    pub fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    pub fn opens(&self) -> usize {
        self.lock().opened.len()
    }

    /// Streams handed out and not yet dropped
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest value `live()` has reached
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SseConnector for MockSseConnector {
    async fn open(&self, job_id: &str) -> Result<SyncUpdateStream> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| StrandError::StreamConnect(e.to_string()))?;
        }

        let failure = {
            let mut state = self.lock();
            state.opened.push(job_id.to_string());
            state
                .failures
                .get_mut(job_id)
                .and_then(|queue| queue.pop_front())
        };

        match failure {
            Some(status @ (401 | 403)) => {
                return Err(StrandError::Unauthorized {
                    status,
                    message: "event stream rejected the access token".to_string(),
                })
            }
            Some(status) => {
                return Err(StrandError::StreamConnect(format!(
                    "mock stream returned HTTP {}",
                    status
                )))
            }
            None => {}
        }

        let (sender, receiver) = mpsc::unbounded();
        self.lock()
            .handles
            .insert(job_id.to_string(), MockStreamHandle { sender });

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));

        let stream = async_stream::stream! {
            let _guard = guard;
            let mut receiver = receiver;
            while let Some(item) = receiver.next().await {
                yield item;
            }
        };
        Ok(stream.boxed())
    }
}
