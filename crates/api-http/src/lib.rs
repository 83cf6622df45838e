//! REST API Layer
//!
//! Exposes the queue manager over HTTP. Every response uses the
//! `{ok, data?, error?, call_id, status, time}` envelope.

pub mod error;
pub mod handler;
pub mod middleware;
pub mod server;
pub mod types;

pub use server::{create_router, HttpServer, HttpServerConfig};
pub use types::AppState;
