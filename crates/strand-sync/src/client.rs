//! Authenticated event-stream client for one sync job
//!
//! Transport mechanics only: `connect` either hands back a stream of parsed
//! updates or an error. Reconnecting is the subscriber's business.

use futures::stream::{AbortHandle, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use strand_api::{ApiClient, HttpRequest, Method, TokenCache, Transport, Url};
use strand_core::{Result, StrandError, SyncUpdate};
use tracing::{debug, info, warn};

use crate::decoder::{SseDecoder, SseFrame};

/// Parsed updates in server-send order; ends when the server closes
pub type SyncUpdateStream = BoxStream<'static, Result<SyncUpdate>>;

/// Server-Sent-Events client bound to one URL
pub struct SseClient {
    url: Url,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenCache>,
    connected: Arc<AtomicBool>,
    dropped_frames: Arc<AtomicU64>,
    abort: Mutex<Option<AbortHandle>>,
}

impl SseClient {
    pub fn new(url: Url, transport: Arc<dyn Transport>, tokens: Arc<TokenCache>) -> Self {
        Self {
            url,
            transport,
            tokens,
            connected: Arc::new(AtomicBool::new(false)),
            dropped_frames: Arc::new(AtomicU64::new(0)),
            abort: Mutex::new(None),
        }
    }

    /// Client for a job's progress stream, sharing the API client's transport and token
    pub fn for_job(api: &ApiClient, job_id: &str) -> Result<Self> {
        let url = crate::connector::subscribe_url(api, job_id)?;
        Ok(Self::new(url, api.transport(), api.tokens()))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Last-known connection state (best effort, not a liveness probe)
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Frames rejected by the shape check since creation
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::SeqCst)
    }

    /// Open the stream, tearing down any previous one first.
    ///
    /// 401/403 clears the shared token and fails with `Unauthorized`; any
    /// other non-2xx fails with `StreamConnect`. Neither is retried here.
    pub async fn connect(&self) -> Result<SyncUpdateStream> {
        self.disconnect();

        let mut request = HttpRequest::new(Method::Get, self.url.clone())
            .with_header("Accept", "text/event-stream");
        if let Some(token) = self.tokens.get_token().await? {
            request = request.with_header("Authorization", format!("Bearer {}", token));
        }

        debug!("Opening event stream {}", self.url);
        let response = self.transport.open_stream(request).await?;

        match response.status {
            401 | 403 => {
                warn!(
                    "Event stream {} rejected with {}; clearing token",
                    self.url, response.status
                );
                self.tokens.clear().await;
                return Err(StrandError::Unauthorized {
                    status: response.status,
                    message: "event stream rejected the access token".to_string(),
                });
            }
            status if !(200..300).contains(&status) => {
                return Err(StrandError::StreamConnect(format!(
                    "{} returned HTTP {}",
                    self.url, status
                )));
            }
            _ => {}
        }

        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to event stream {}", self.url);

        let connected = Arc::clone(&self.connected);
        let dropped = Arc::clone(&self.dropped_frames);
        let url = self.url.to_string();
        let mut body = response.body;

        let updates = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut failed = false;

            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for frame in decoder.feed(&bytes) {
                            if let Some(update) = parse_frame(&frame, &url, &dropped) {
                                yield Ok(update);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Event stream {} failed: {}", url, e);
                        failed = true;
                        connected.store(false, Ordering::SeqCst);
                        yield Err(e);
                        break;
                    }
                }
            }

            if !failed {
                if let Some(frame) = decoder.finish() {
                    if let Some(update) = parse_frame(&frame, &url, &dropped) {
                        yield Ok(update);
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            info!("Event stream {} closed", url);
        };

        let (updates, handle) = futures::stream::abortable(updates);
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(updates.boxed())
    }

    /// Abort the current stream; safe to call repeatedly
    pub fn disconnect(&self) {
        let handle = self
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Aborted event stream {}", self.url);
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseClient")
            .field("url", &self.url.as_str())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn parse_frame(frame: &SseFrame, url: &str, dropped: &AtomicU64) -> Option<SyncUpdate> {
    match SyncUpdate::from_frame(&frame.data) {
        Ok(update) => Some(update),
        Err(e) => {
            dropped.fetch_add(1, Ordering::SeqCst);
            warn!("Dropping frame from {}: {}", url, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_api::{MockTokenSource, MockTransport};

    const PATH: &str = "/sync/job/job-1/subscribe";

    fn setup() -> (Arc<MockTransport>, Arc<TokenCache>, SseClient) {
        let transport = Arc::new(MockTransport::new());
        let tokens = Arc::new(TokenCache::new(Arc::new(MockTokenSource::new())));
        let api = ApiClient::new("http://api.test", transport.clone(), tokens.clone()).unwrap();
        let client = SseClient::for_job(&api, "job-1").unwrap();
        (transport, tokens, client)
    }

    #[tokio::test]
    async fn test_connect_sends_bearer_and_accept() {
        let (transport, _, client) = setup();
        transport.respond_stream(PATH, 200, &[]);

        let _stream = client.connect().await.unwrap();
        let request = &transport.requests()[0];
        assert_eq!(request.header("Authorization"), Some("Bearer token-1"));
        assert_eq!(request.header("Accept"), Some("text/event-stream"));
        assert_eq!(request.url.path(), PATH);
    }

    #[tokio::test]
    async fn test_updates_in_order_then_close() {
        let (transport, _, client) = setup();
        transport.respond_stream(
            PATH,
            200,
            &[
                "data: {\"inserted\": 1}\n\n",
                "data: {\"inserted\": 2}\n\ndata: {\"inserted\": 3, \"is_complete\": true}\n\n",
            ],
        );

        let stream = client.connect().await.unwrap();
        assert!(client.is_connected());

        let updates: Vec<SyncUpdate> = stream.map(|u| u.unwrap()).collect().await;
        let inserted: Vec<_> = updates.iter().map(|u| u.inserted.unwrap()).collect();
        assert_eq!(inserted, vec![1, 2, 3]);
        assert!(updates[2].is_complete);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_malformed_frames_dropped_without_closing() {
        let (transport, _, client) = setup();
        transport.respond_stream(
            PATH,
            200,
            &[
                "data: {not json\n\n",
                "data: [1,2]\n\n",
                "data: {\"updated\": 4}\n\n",
            ],
        );

        let updates: Vec<SyncUpdate> = client
            .connect()
            .await
            .unwrap()
            .map(|u| u.unwrap())
            .collect()
            .await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].updated, Some(4));
        assert_eq!(client.dropped_frames(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_clears_token() {
        let (transport, tokens, client) = setup();
        transport.respond_stream(PATH, 401, &[]);
        transport.respond_stream(PATH, 200, &[]);

        let err = client.connect().await.err().unwrap();
        assert!(err.is_auth_failure());
        assert!(!client.is_connected());
        assert_eq!(tokens.fetch_count(), 1);

        // Next attempt performs a fresh token fetch
        client.connect().await.unwrap();
        assert_eq!(tokens.fetch_count(), 2);
        assert_eq!(
            transport.requests()[1].header("Authorization"),
            Some("Bearer token-2")
        );
    }

    #[tokio::test]
    async fn test_forbidden_also_clears_token() {
        let (transport, tokens, client) = setup();
        transport.respond_stream(PATH, 403, &[]);
        assert!(client.connect().await.err().unwrap().is_auth_failure());
        tokens.get_token().await.unwrap();
        assert_eq!(tokens.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_other_status_is_connect_failure() {
        let (transport, tokens, client) = setup();
        transport.respond_stream(PATH, 503, &[]);

        let err = client.connect().await.err().unwrap();
        assert!(matches!(err, StrandError::StreamConnect(_)));
        tokens.get_token().await.unwrap();
        assert_eq!(tokens.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let (transport, _, client) = setup();
        let sender = transport.respond_channel_stream(PATH, 200);

        let mut stream = client.connect().await.unwrap();
        sender
            .unbounded_send(b"data: {\"inserted\": 1}\n\n".to_vec())
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().inserted, Some(1));

        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_aborts_previous_stream() {
        let (transport, _, client) = setup();
        let _first_sender = transport.respond_channel_stream(PATH, 200);
        transport.respond_stream(PATH, 200, &[]);

        let mut first = client.connect().await.unwrap();
        let _second = client.connect().await.unwrap();
        assert!(first.next().await.is_none());
    }
}
