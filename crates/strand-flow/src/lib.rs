//! # strand-flow
//!
//! Establishing source connections.
//!
//! [`decide`] routes a [`ConnectRequest`] to one of three paths (local token,
//! OAuth redirect, direct creation) without touching the network;
//! [`ConnectFlow`] performs the calls for the chosen path, and
//! [`OAuthCallback`] finishes an OAuth connection once the identity provider
//! sends the user back. Every failure can be funnelled through
//! [`redirect_with_error`] into one consistent error landing.

mod callback;
mod decision;
mod flow;
mod options;
mod redirect;

pub use callback::{CallbackOutcome, OAuthCallback};
pub use decision::{decide, ConnectPath};
pub use flow::{ConnectFlow, ConnectOutcome, ConnectRequest, LOCAL_TOKEN_FIELD};
pub use options::{FlowOptions, DASHBOARD_PATH};
pub use redirect::{last_connection_error, redirect_with_error, ConnectionErrorDetails, ErrorRedirect};
