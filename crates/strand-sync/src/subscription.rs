//! Subscription driver: binds the connection state machine to a changing job id

use futures::stream::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use strand_core::{SubscriptionConfig, SyncUpdate};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connector::SseConnector;
use crate::state::{transition, Action, ConnectionState, Event, ReconnectPolicy};

/// Received updates, capped at a fixed capacity with oldest evicted first
#[derive(Debug, Clone)]
pub struct UpdateLog {
    updates: VecDeque<SyncUpdate>,
    capacity: usize,
    latest: Option<SyncUpdate>,
    total: u64,
}

impl UpdateLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            updates: VecDeque::new(),
            capacity: capacity.max(1),
            latest: None,
            total: 0,
        }
    }

    pub fn push(&mut self, update: SyncUpdate) {
        if self.updates.len() == self.capacity {
            self.updates.pop_front();
        }
        self.latest = Some(update.clone());
        self.updates.push_back(update);
        self.total += 1;
    }

    pub fn clear(&mut self) {
        self.updates.clear();
        self.latest = None;
        self.total = 0;
    }

    /// Retained updates, oldest first
    pub fn updates(&self) -> Vec<SyncUpdate> {
        self.updates.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&SyncUpdate> {
        self.latest.as_ref()
    }

    /// Updates received since the last reset, including evicted ones
    pub fn total_received(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

struct Inner {
    state: ConnectionState,
    log: UpdateLog,
    task: Option<JoinHandle<()>>,
    /// Aborted or finishing tasks the next connection must outlive
    retiring: Vec<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn SseConnector>,
    policy: ReconnectPolicy,
    inner: Mutex<Inner>,
    revision: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Live progress for whichever sync job is currently selected.
///
/// At most one stream is open at a time: a new connection waits for the
/// previous one to be dropped before opening. Must be used inside a tokio
/// runtime.
pub struct SyncSubscription {
    shared: Arc<Shared>,
}

impl SyncSubscription {
    pub fn new(connector: Arc<dyn SseConnector>, config: &SubscriptionConfig) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                connector,
                policy: ReconnectPolicy::from(config),
                inner: Mutex::new(Inner {
                    state: ConnectionState::default(),
                    log: UpdateLog::new(config.max_updates),
                    task: None,
                    retiring: Vec::new(),
                }),
                revision,
            }),
        }
    }

    /// Track `job_id`, or stop tracking with `None`
    pub fn set_job(&self, job_id: Option<&str>) {
        dispatch(
            &self.shared,
            Event::JobChanged {
                job_id: job_id.map(str::to_string),
            },
            None,
        );
    }

    pub fn updates(&self) -> Vec<SyncUpdate> {
        self.shared.lock().log.updates()
    }

    pub fn latest(&self) -> Option<SyncUpdate> {
        self.shared.lock().log.latest().cloned()
    }

    pub fn total_received(&self) -> u64 {
        self.shared.lock().log.total_received()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().state.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state.clone()
    }

    pub fn job_id(&self) -> Option<String> {
        self.shared.lock().state.job_id().map(str::to_string)
    }

    /// Revision counter bumped whenever state or updates change
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        for task in inner.retiring.drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SyncSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSubscription")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Feed one event through the machine and perform the resulting actions
fn dispatch(shared: &Arc<Shared>, event: Event, update: Option<SyncUpdate>) {
    let mut update = update;
    let mut inner = shared.lock();

    let before = inner.state.clone();
    let (next, actions) = transition(std::mem::take(&mut inner.state), event, &shared.policy);
    inner.state = next;
    let mut changed = inner.state != before;

    for action in actions {
        match action {
            Action::Connect {
                job_id,
                generation,
                delay,
            } => {
                let mut retiring = std::mem::take(&mut inner.retiring);
                retiring.extend(inner.task.take());
                debug!(
                    "Connecting to job {} (generation {}, delay {:?})",
                    job_id, generation, delay
                );
                inner.task = Some(tokio::spawn(run_connection(
                    Arc::downgrade(shared),
                    Arc::clone(&shared.connector),
                    job_id,
                    generation,
                    delay,
                    retiring,
                )));
            }
            Action::Disconnect { generation } => {
                if let Some(task) = inner.task.take() {
                    debug!("Disconnecting generation {}", generation);
                    task.abort();
                    inner.retiring.push(task);
                }
            }
            Action::AwaitTeardown { generation } => {
                let retiring = std::mem::take(&mut inner.retiring);
                let weak = Arc::downgrade(shared);
                inner.retiring.push(tokio::spawn(async move {
                    for task in retiring {
                        let _ = task.await;
                    }
                    if let Some(shared) = weak.upgrade() {
                        dispatch(&shared, Event::TeardownComplete { generation }, None);
                    }
                }));
            }
            Action::ResetUpdates => {
                inner.log.clear();
                changed = true;
            }
            Action::AppendUpdate => {
                if let Some(update) = update.take() {
                    inner.log.push(update);
                    changed = true;
                }
            }
            Action::IgnoreStale { generation } => {
                debug!("Ignoring stale event for generation {}", generation);
            }
        }
    }
    drop(inner);

    if changed {
        shared.revision.send_modify(|revision| *revision += 1);
    }
}

fn dispatch_weak(shared: &Weak<Shared>, event: Event, update: Option<SyncUpdate>) -> bool {
    match shared.upgrade() {
        Some(shared) => {
            dispatch(&shared, event, update);
            true
        }
        None => false,
    }
}

async fn run_connection(
    shared: Weak<Shared>,
    connector: Arc<dyn SseConnector>,
    job_id: String,
    generation: u64,
    delay: Duration,
    retiring: Vec<JoinHandle<()>>,
) {
    // The previous stream must be gone before a new one opens
    for task in retiring {
        let _ = task.await;
    }
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut stream = match connector.open(&job_id).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to subscribe to job {}: {}", job_id, e);
            dispatch_weak(
                &shared,
                Event::ConnectFailed {
                    generation,
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                },
                None,
            );
            return;
        }
    };

    info!("Subscribed to job {}", job_id);
    if !dispatch_weak(&shared, Event::Opened { generation }, None) {
        return;
    }

    // A clean close means the server finished the job
    let mut job_finished = true;
    while let Some(item) = stream.next().await {
        match item {
            Ok(update) => {
                if !dispatch_weak(&shared, Event::UpdateReceived { generation }, Some(update)) {
                    return;
                }
            }
            Err(e) => {
                warn!("Stream for job {} failed: {}", job_id, e);
                job_finished = false;
                break;
            }
        }
    }
    drop(stream);

    dispatch_weak(
        &shared,
        Event::StreamEnded {
            generation,
            job_finished,
        },
        None,
    );
}
