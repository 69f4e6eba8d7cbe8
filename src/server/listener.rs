use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, info};

use crate::config::{Config, Limits};
use crate::error::{ConnectionError, ServerError};
use crate::http::connection::{Connection, ConnectionId};
use crate::http::handler::Handler;
use crate::server::pool::WorkerPool;
use crate::server::registry::HandlerRegistry;

/// Pause after a failed `accept` so fd exhaustion doesn't spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Connection counters, updated by the acceptor and by connection tasks.
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Every connection returned by `accept`.
    pub accepted: u64,
    /// Closed at accept time because no worker slot was free.
    pub rejected: u64,
    /// Handler ran and returned successfully.
    pub completed: u64,
    /// Closed because of a parse, client, handler or I/O failure.
    pub failed: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &Result<(), ConnectionError>) {
        let counter = if result.is_ok() { &self.completed } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
}

/// Embeddable HTTP/1.1 server.
///
/// Register handlers, call [`HttpServer::start`], and later
/// [`HttpServer::stop`]. Every accepted connection either gets a worker
/// slot and runs to completion in its own task, or is closed immediately
/// when all `capacity` slots are busy. Connections are never queued.
pub struct HttpServer {
    config: Config,
    registry: Arc<ArcSwap<HandlerRegistry>>,
    pool: WorkerPool,
    stats: Arc<ServerStats>,
    running: Option<Running>,
}

impl HttpServer {
    pub fn new(host: impl Into<String>, port: u16, capacity: usize) -> Self {
        Self::with_config(Config {
            host: host.into(),
            port,
            capacity,
            ..Config::default()
        })
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            pool: WorkerPool::new(config.capacity),
            config,
            registry: Arc::new(ArcSwap::from_pointee(HandlerRegistry::new())),
            stats: Arc::new(ServerStats::default()),
            running: None,
        }
    }

    /// Adds a dispatch rule. Requests whose path starts with `prefix` go to
    /// `handler` unless a longer registered prefix also matches.
    ///
    /// Safe to call while serving: connections already accepted keep the
    /// table they started with, later ones see the new rule.
    pub fn register(&self, prefix: impl Into<String>, handler: impl Handler + 'static) {
        self.register_arc(prefix, Arc::new(handler));
    }

    pub fn register_arc(&self, prefix: impl Into<String>, handler: Arc<dyn Handler>) {
        let prefix = prefix.into();
        self.registry.rcu(|current| {
            let mut next = HandlerRegistry::clone(current);
            next.register(prefix.clone(), Arc::clone(&handler));
            next
        });
        info!(prefix = %prefix, "handler registered");
    }

    /// Binds the listening socket and spawns the accept loop.
    ///
    /// Returns once the socket is listening. A bind failure is the only
    /// error this server ever reports.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyRunning(running.local_addr));
        }
        self.config.validate()?;

        let addr = self.config.listen_addr();
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        info!(
            address = %local_addr,
            capacity = self.pool.capacity(),
            max_header_bytes = self.config.limits.max_header_bytes,
            max_body = self.config.limits.max_body,
            "listening"
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let acceptor = Acceptor {
            listener,
            pool: self.pool.clone(),
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            limits: self.config.limits.clone(),
            idle_timeout: self.config.idle_timeout(),
        };
        let acceptor = tokio::spawn(acceptor.run(shutdown_rx));

        self.running = Some(Running {
            local_addr,
            shutdown,
            acceptor,
        });
        Ok(local_addr)
    }

    /// Stops accepting and closes the listening socket.
    ///
    /// Connections already being served are left to finish on their own.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(err) = running.acceptor.await {
            tracing::warn!(error = %err, "acceptor task ended abnormally");
        }
        info!(address = %running.local_addr, in_flight = self.pool.busy(), "stopped accepting");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The handler table new connections will resolve against.
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        self.registry.load_full()
    }
}

struct Acceptor {
    listener: TcpListener,
    pool: WorkerPool,
    registry: Arc<ArcSwap<HandlerRegistry>>,
    stats: Arc<ServerStats>,
    limits: Limits,
    idle_timeout: Option<Duration>,
}

impl Acceptor {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                // Also fires when the server handle is dropped.
                _ = shutdown.changed() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        if backoff(&mut shutdown).await {
                            break;
                        }
                    }
                },
            }
        }
        tracing::debug!("accept loop finished");
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        let Some(slot) = self.pool.try_acquire() else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                peer = %peer,
                capacity = self.pool.capacity(),
                "worker pool exhausted, rejecting connection"
            );
            drop(stream);
            return;
        };

        let id = ConnectionId::next();
        let span = tracing::info_span!("conn", id = %id, peer = %peer, slot = slot.id());
        let connection = Connection::new(
            stream,
            Some(peer),
            slot,
            self.registry.load_full(),
            self.limits.clone(),
            self.idle_timeout,
        );
        let stats = Arc::clone(&self.stats);

        tokio::spawn(
            async move {
                tracing::debug!("connection dispatched");
                let result = connection.run().await;
                stats.record(&result);
                log_outcome(&result);
            }
            .instrument(span),
        );
    }
}

/// Sleeps for [`ACCEPT_ERROR_BACKOFF`], returning early with `true` if
/// shutdown is requested meanwhile.
async fn backoff(shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => false,
    }
}

fn log_outcome(result: &Result<(), ConnectionError>) {
    match result {
        Ok(()) => tracing::debug!("connection closed"),
        Err(err @ ConnectionError::ClientDisconnected) => tracing::debug!(error = %err, "connection closed"),
        Err(err) if err.is_client_error() => tracing::info!(error = %err, "connection aborted"),
        Err(err @ ConnectionError::NoHandler(_)) => tracing::info!(error = %err, "connection closed"),
        Err(err @ ConnectionError::HandlerFailure(_)) => tracing::error!(error = %err, "handler failed"),
        Err(err) => tracing::warn!(error = %err, "connection failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[tokio::test]
    async fn backoff_ends_early_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let started = Instant::now();
        assert!(backoff(&mut rx).await);
        assert!(started.elapsed() < ACCEPT_ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn backoff_ends_early_when_server_is_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(backoff(&mut rx).await);
    }

    #[tokio::test]
    async fn backoff_waits_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        assert!(!backoff(&mut rx).await);
        assert!(started.elapsed() >= ACCEPT_ERROR_BACKOFF);
    }
}
