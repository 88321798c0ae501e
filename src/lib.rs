//! An autonomous agent runtime: a recursion engine that drives one task
//! forward through repeated LLM calls, dispatching tool calls locally or to
//! a sandboxed sidecar, and streaming progress to clients over SSE.
//!
//! - **Error types** (`error`): the crate-wide `Error`/`Result`
//! - **Configuration** (`config`): environment-driven settings, per concern
//! - **Database** (`database`): PostgreSQL persistence for every entity
//! - **Agent** (`agent`): LLM client, prompt templating, envelope parsing,
//! context assembly, and the recursion engine itself
//! - **Tools** (`tools`): the tool registry and local/sidecar executor,
//! including the container backend used for sidecar dispatch
//! - **HTTP** (`http`): the axum surface and SSE streaming transport

pub mod agent;
pub mod config;
pub mod database;
pub mod error;
pub mod http;
pub mod tools;

pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
