//! Mock transport for testing

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use strand_core::{Result, StrandError};

use crate::transport::{HttpRequest, HttpResponse, Method, StreamingResponse, Transport};

enum ScriptedStream {
    Chunks { status: u16, chunks: Vec<Vec<u8>> },
    Channel {
        status: u16,
        receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    },
}

/// Transport that records requests and replays scripted responses.
///
/// Responses are keyed by `"METHOD /path"` (query string ignored) and served
/// first-in first-out.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    streams: Mutex<HashMap<String, VecDeque<ScriptedStream>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn key(method: Method, path: &str) -> String {
    format!("{} {}", method, path)
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockTransport::respond_json`]
    pub fn with_json(self, method: Method, path: &str, status: u16, body: serde_json::Value) -> Self {
        self.respond_json(method, path, status, body);
        self
    }

    pub fn respond(&self, method: Method, path: &str, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key(method, path))
            .or_default()
            .push_back(response);
    }

    pub fn respond_json(&self, method: Method, path: &str, status: u16, body: serde_json::Value) {
        self.respond(method, path, HttpResponse::json_body(status, &body));
    }

    pub fn respond_status(&self, method: Method, path: &str, status: u16) {
        self.respond(method, path, HttpResponse::new(status, Vec::new()));
    }

    /// Script a streaming response delivered as fixed chunks, then closed
    pub fn respond_stream(&self, path: &str, status: u16, chunks: &[&str]) {
        self.push_stream(
            path,
            ScriptedStream::Chunks {
                status,
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            },
        );
    }

    /// Script a streaming response fed live through the returned sender.
    ///
    /// Dropping the sender closes the stream.
    pub fn respond_channel_stream(&self, path: &str, status: u16) -> mpsc::UnboundedSender<Vec<u8>> {
        let (sender, receiver) = mpsc::unbounded();
        self.push_stream(path, ScriptedStream::Channel { status, receiver });
        sender
    }

    fn push_stream(&self, path: &str, stream: ScriptedStream) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key(Method::Get, path))
            .or_default()
            .push_back(stream);
    }

    /// Every request seen so far, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Requests matching a method and path
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.path() == path)
            .collect()
    }

    /// `"METHOD /path"` of every request, in order
    pub fn request_log(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| key(r.method, r.url.path()))
            .collect()
    }

    fn record(&self, request: &HttpRequest) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.record(&request);
        let k = key(request.method, request.url.path());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&k)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| StrandError::Transport(format!("No mock response for: {}", k)))
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse> {
        self.record(&request);
        let k = key(request.method, request.url.path());
        let scripted = self
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&k)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| StrandError::StreamConnect(format!("No mock stream for: {}", k)))?;

        Ok(match scripted {
            ScriptedStream::Chunks { status, chunks } => StreamingResponse {
                status,
                body: stream::iter(chunks.into_iter().map(Ok)).boxed(),
            },
            ScriptedStream::Channel { status, receiver } => StreamingResponse {
                status,
                body: receiver.map(Ok).boxed(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new(
            Method::Get,
            Url::parse(&format!("http://mock{}", path)).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_responses_are_fifo_per_key() {
        let transport = MockTransport::new();
        transport.respond_status(Method::Get, "/a", 200);
        transport.respond_status(Method::Get, "/a", 404);

        assert_eq!(transport.send(get("/a")).await.unwrap().status, 200);
        assert_eq!(transport.send(get("/a?x=1")).await.unwrap().status, 404);
        assert!(transport.send(get("/a")).await.is_err());
        assert_eq!(transport.request_count(), 3);
        assert_eq!(transport.request_log()[0], "GET /a");
    }

    #[tokio::test]
    async fn test_chunk_stream() {
        let transport = MockTransport::new();
        transport.respond_stream("/s", 200, &["one", "two"]);

        let response = transport.open_stream(get("/s")).await.unwrap();
        assert!(response.is_success());
        let chunks: Vec<Vec<u8>> = response
            .body
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_channel_stream_closes_when_sender_dropped() {
        let transport = MockTransport::new();
        let sender = transport.respond_channel_stream("/s", 200);

        let mut body = transport.open_stream(get("/s")).await.unwrap().body;
        sender.unbounded_send(b"hello".to_vec()).unwrap();
        assert_eq!(body.next().await.unwrap().unwrap(), b"hello".to_vec());

        drop(sender);
        assert!(body.next().await.is_none());
    }
}
