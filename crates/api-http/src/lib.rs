//! HTTP Control API
//!
//! REST surface over the scheduler: repositories, jobs, stats and health.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{router, AppState, HttpServer, HttpServerConfig};
