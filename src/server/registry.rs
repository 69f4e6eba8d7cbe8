//! Path prefix → handler dispatch table.
//!
//! A registry is plain data: `register` takes `&mut self` and is meant for
//! setup time. [`HttpServer`](crate::server::HttpServer) keeps it behind an
//! atomically swapped snapshot, so connections always resolve against a
//! complete table even when a handler is added while serving.

use std::sync::Arc;

use crate::http::handler::Handler;

#[derive(Clone)]
pub struct Route {
    prefix: String,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route").field("prefix", &self.prefix).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    /// Longest prefix first.
    routes: Vec<Route>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `handler` with `prefix`, replacing any handler already
    /// registered at exactly that prefix.
    pub fn register(&mut self, prefix: impl Into<String>, handler: Arc<dyn Handler>) {
        let prefix = prefix.into();

        if let Some(route) = self.routes.iter_mut().find(|r| r.prefix == prefix) {
            route.handler = handler;
            return;
        }

        let at = self
            .routes
            .iter()
            .position(|r| r.prefix.len() < prefix.len())
            .unwrap_or(self.routes.len());
        self.routes.insert(at, Route { prefix, handler });
    }

    /// Finds the route whose prefix is the longest prefix of `path`.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| path.starts_with(r.prefix.as_str()))
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.prefix.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
