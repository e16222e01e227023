//! # strand-core
//!
//! Core types for the Strand data-integration client.
//!
//! Strand talks to a data-integration backend that connects external sources
//! (Slack, Notion, generic OAuth2 and API-key providers), groups them into
//! collections and runs synchronization jobs over them.
//!
//! ## Contents
//!
//! - `StrandError` / `Result`: the unified error type for every crate
//! - Domain records returned by the backend (collections, source
//!   connections, sync jobs, sync updates, auth providers, organizations)
//! - `StrandConfig`: file and environment configuration
//! - Storage surfaces that survive an OAuth redirect (`BrowserStorage`)
//! - Readable-id derivation for new collections

mod config;
mod error;
pub mod readable_id;
pub mod storage;
mod types;

pub use config::{
    CacheConfig, StorageConfig, StrandConfig, SubscriptionConfig, ENV_ACCESS_TOKEN, ENV_API_URL,
    ENV_LOCAL_DEVELOPMENT,
};
pub use error::{Result, StrandError};
pub use readable_id::{
    generate_readable_id, random_suffix, readable_id_base, validate_collection_details,
    FieldError, ReadableIdField,
};
pub use storage::{BrowserStorage, FileStore, KeyValueStore, MemoryStore, Versioned};
pub use types::*;
