//! # strand-api
//!
//! HTTP access to the data-integration backend.
//!
//! - [`Transport`]: the single I/O seam (real: [`ReqwestTransport`], tests:
//!   [`MockTransport`])
//! - [`TokenCache`]: shared bearer token with invalidate-on-401/403
//! - [`ApiClient`]: JSON requests plus typed endpoint methods

mod auth;
mod client;
mod endpoints;
mod mock;
mod transport;

pub use auth::{token_source_from_config, MockTokenSource, NoAuth, StaticTokenSource, TokenCache, TokenSource};
pub use client::ApiClient;
pub use endpoints::{CreateCollection, OAuthCodeExchange};
pub use mock::MockTransport;
pub use transport::{
    ByteStream, HttpRequest, HttpResponse, Method, ReqwestTransport, StreamingResponse, Transport,
};

pub use reqwest::Url;
