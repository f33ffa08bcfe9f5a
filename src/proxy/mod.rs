//! HTTP proxy server module.
//!
//! This module provides the OpenAI-compatible HTTP API that accepts
//! requests and forwards them to the configured upstream.

pub mod credentials;
pub mod forward;
mod handlers;
pub mod pool;
pub mod retry;
mod server;
pub mod stream;
pub mod types;

pub use credentials::{resolve, CredentialSource, ResolvedCredential};
pub use forward::{Forwarder, Phase};
pub use pool::{PoolSettings, PooledConnection, UpstreamPool};
pub use retry::{FailureKind, RetryPolicy};
pub use server::{create_router, run_server, AppState, RequestId, MAX_BODY_BYTES, REQUEST_ID_HEADER};
pub use stream::{spawn_relay, RelayEnd, RelayReport};
pub use types::{chat_stream_requested, InboundRequest};
