//! Warden - embeddable HTTP/1.1 server core
//!
//! Accepts TCP connections, parses requests defensively, bounds concurrency
//! to a fixed number of worker slots and hands each request to a registered
//! [`Handler`] that writes the response itself.

pub mod config;
pub mod error;
pub mod http;
pub mod server;

pub use config::{Config, Limits};
pub use error::{ConnectionError, ServerError};
pub use http::handler::Handler;
pub use http::request::{Headers, Request};
pub use http::response::{Response, StatusCode};
pub use server::HttpServer;

pub use async_trait::async_trait;
