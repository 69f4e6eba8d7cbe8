//! HTTP/1.1 protocol layer.
//!
//! - **`parser`**: incremental, size-bounded request head parser
//! - **`request`**: parsed request, header map and request builder
//! - **`body`**: Content-Length body reader with disk spill
//! - **`response`**: raw write handle onto the connection
//! - **`handler`**: the capability handlers implement
//! - **`connection`**: the per-connection state machine
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌────────────────────┐
//!        │ ReadingRequestLine │ ← bytes arrive in any chunking
//!        └─────────┬──────────┘
//!                  ▼
//!        ┌────────────────────┐
//!        │   ReadingHeaders   │ ← blank line ends the head
//!        └─────────┬──────────┘
//!                  ▼
//!        ┌────────────────────┐
//!        │  ResolvingHandler  │ ← longest registered prefix
//!        └─────────┬──────────┘
//!                  ▼
//!        ┌────────────────────┐
//!        │   StreamingBody    │ ← Content-Length bytes, spill past max_body
//!        └─────────┬──────────┘
//!                  ▼
//!        ┌────────────────────┐
//!        │    Dispatching     │ ← handler writes the response
//!        └─────────┬──────────┘
//!                  ▼
//!               Closed          ← also reached from every state above
//! ```
//!
//! Malformed input, oversized heads, early disconnects, missing handlers and
//! handler failures all go straight to `Closed` without a response.

pub mod body;
pub mod connection;
pub mod handler;
pub(crate) mod io;
pub mod parser;
pub mod request;
pub mod response;
