//! # strand-sync
//!
//! Live sync-job progress over Server-Sent Events.
//!
//! Layers, bottom up:
//! - [`SseDecoder`]: incremental `text/event-stream` frame parser
//! - [`SseClient`]: one authenticated stream, yielding typed [`SyncUpdate`]s;
//!   transport mechanics only, no retries
//! - [`transition`]: pure connection state machine (dedup, stale-callback
//!   suppression, reconnect policy)
//! - [`SyncSubscription`]: binds the machine to a changing job id and keeps
//!   the received update history
//!
//! [`SyncUpdate`]: strand_core::SyncUpdate

mod client;
mod connector;
mod decoder;
mod state;
mod subscription;

pub use client::{SseClient, SyncUpdateStream};
pub use connector::{subscribe_url, HttpSseConnector, MockSseConnector, MockStreamHandle, SseConnector};
pub use decoder::{SseDecoder, SseFrame};
pub use state::{transition, Action, ConnectionState, Event, ReconnectPolicy};
pub use subscription::{SyncSubscription, UpdateLog};
