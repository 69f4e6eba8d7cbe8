//! Accepting connections and bounding how many are served at once.

pub mod listener;
pub mod pool;
pub mod registry;

pub use listener::{HttpServer, ServerStats, StatsSnapshot};
pub use pool::{SlotGuard, WorkerPool, WorkerSlot};
pub use registry::{HandlerRegistry, Route};
