//! llm-relay - OpenAI-compatible reverse proxy for a single upstream LLM service
//!
//! This library provides the core functionality for the llm-relay proxy:
//! configuration, credential resolution, the bounded upstream connection
//! pool, the retry policy and the request forwarding engine.

pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
