//! Bifrost: a client-side networking stack.
//!
//! The crate is organized around five cooperating subsystems:
//!
//! - [`pipeline`] — the request execution pipeline: resolution, interceptors,
//!   auth injection, transport, response processing, validation, and retry.
//! - [`http2`] — a client HTTP/2 framing layer: frame codec, stream state,
//!   flow control, and a per-connection actor task.
//! - [`security`] — TLS client configuration and certificate/public-key
//!   pinning enforced inside the TLS handshake.
//! - [`auth`] — OAuth2 grants, JWT issuance, token stores, and a manager
//!   that coalesces concurrent refreshes.
//! - [`batch`] — bounded-concurrency execution of many requests with
//!   per-item retry and progress reporting.
//!
//! [`observability`] watches request outcomes off the data path: a sliding
//! window of performance entries, Prometheus counters, and alerting.

pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod http2;
pub mod observability;
pub mod pipeline;
pub mod request;
pub mod security;

pub use config::ClientConfiguration;
pub use error::NetworkError;
pub use pipeline::{NetworkClient, RetryCondition, RetryPolicy, RetryStrategy};
pub use request::{Method, Request, RequestPriority, Response};

use std::sync::Arc;

use once_cell::sync::OnceCell;

static SHARED_CLIENT: OnceCell<Arc<NetworkClient>> = OnceCell::new();

/// Install the process-wide shared client. A second call fails and leaves
/// the original client in place.
///
/// Prefer passing a client explicitly; the shared instance exists for
/// call sites that genuinely need process-global access.
pub fn init_shared_client(config: ClientConfiguration) -> anyhow::Result<Arc<NetworkClient>> {
	let client = Arc::new(NetworkClient::new(config)?);
	SHARED_CLIENT
		.set(client.clone())
		.map_err(|_| anyhow::anyhow!("shared client is already initialized"))?;
	Ok(client)
}

/// The shared client, when one has been installed.
pub fn shared_client() -> Option<Arc<NetworkClient>> {
	SHARED_CLIENT.get().cloned()
}
