use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::ConnectionError;
use crate::http::body::BodyReader;
use crate::http::handler::Handler;
use crate::http::io::read_some;
use crate::http::parser::{ParsePhase, ParseStatus, RequestParser};
use crate::http::request::{Request, RequestHead};
use crate::http::response::Response;
use crate::server::pool::SlotGuard;
use crate::server::registry::{HandlerRegistry, Route};

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub enum ConnectionState {
    ReadingRequestLine,
    ReadingHeaders,
    ResolvingHandler {
        head: RequestHead,
        consumed: usize,
    },
    StreamingBody {
        head: RequestHead,
        consumed: usize,
        route: Route,
    },
    Dispatching {
        request: Request,
        route: Route,
    },
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::ReadingRequestLine => "reading-request-line",
            ConnectionState::ReadingHeaders => "reading-headers",
            ConnectionState::ResolvingHandler { .. } => "resolving-handler",
            ConnectionState::StreamingBody { .. } => "streaming-body",
            ConnectionState::Dispatching { .. } => "dispatching",
            ConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives one client connection through a single request.
///
/// The connection owns its stream and its worker slot. Both are released
/// when the connection is dropped at the end of [`Connection::run`], no
/// matter which state it failed in.
pub struct Connection<S> {
    stream: S,
    peer: Option<SocketAddr>,
    slot: SlotGuard,
    parser: RequestParser,
    registry: Arc<HandlerRegistry>,
    limits: Limits,
    idle_timeout: Option<Duration>,
    state: ConnectionState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: Option<SocketAddr>,
        slot: SlotGuard,
        registry: Arc<HandlerRegistry>,
        limits: Limits,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stream,
            peer,
            slot,
            parser: RequestParser::new(limits.clone()),
            registry,
            limits,
            idle_timeout,
            state: ConnectionState::ReadingRequestLine,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Serves one request and closes the connection.
    ///
    /// A response is only ever written by the handler. Every failure leaves
    /// the client with a closed (or reset) connection and nothing else.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let result = self.drive().await;
        self.state = ConnectionState::Closed;

        if result.is_ok() {
            if let Err(err) = self.stream.shutdown().await {
                tracing::trace!(error = %err, "shutdown after response failed");
            }
        }
        result
    }

    async fn drive(&mut self) -> Result<(), ConnectionError> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::ReadingRequestLine | ConnectionState::ReadingHeaders => {
                    let (head, consumed) = self.read_head().await?;
                    tracing::debug!(
                        method = %head.method,
                        target = %head.target,
                        content_length = head.content_length,
                        "request head parsed"
                    );
                    self.transition(ConnectionState::ResolvingHandler { head, consumed });
                }

                ConnectionState::ResolvingHandler { head, consumed } => {
                    let path = head.target.split('?').next().unwrap_or_default();
                    let Some(route) = self.registry.resolve(path).cloned() else {
                        return Err(ConnectionError::NoHandler(path.to_string()));
                    };
                    self.transition(ConnectionState::StreamingBody {
                        head,
                        consumed,
                        route,
                    });
                }

                ConnectionState::StreamingBody {
                    head,
                    consumed,
                    route,
                } => {
                    let slot = self.slot.slot_mut();
                    let body = BodyReader::new(&self.limits, self.idle_timeout)
                        .read(
                            &mut self.stream,
                            &slot.head[consumed..],
                            head.content_length,
                            &mut slot.scratch,
                        )
                        .await?;

                    let mut request = Request::new(head, body, self.peer);
                    request.set_script_name(route.prefix());
                    self.transition(ConnectionState::Dispatching { request, route });
                }

                ConnectionState::Dispatching { mut request, route } => {
                    return self.dispatch(&mut request, route.handler()).await;
                }

                ConnectionState::Closed => return Ok(()),
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(state = next.name(), "connection state");
        self.state = next;
    }

    async fn read_head(&mut self) -> Result<(RequestHead, usize), ConnectionError> {
        let slot = self.slot.slot_mut();
        let chunk = self.limits.chunk_size.max(1);
        if slot.scratch.len() < chunk {
            slot.scratch.resize(chunk, 0);
        }

        loop {
            if let ParseStatus::Complete { head, consumed } = self.parser.parse(&slot.head)? {
                return Ok((head, consumed));
            }

            self.state = match self.parser.phase() {
                ParsePhase::RequestLine => ConnectionState::ReadingRequestLine,
                ParsePhase::Headers => ConnectionState::ReadingHeaders,
            };

            // Never read further than one byte past the header ceiling.
            let room = (self.limits.max_header_bytes + 1)
                .saturating_sub(slot.head.len())
                .clamp(1, chunk);
            let n = read_some(&mut self.stream, &mut slot.scratch[..room], self.idle_timeout).await?;
            if n == 0 {
                tracing::debug!(
                    buffered = slot.head.len(),
                    state = self.state.name(),
                    "client closed before request was complete"
                );
                return Err(ConnectionError::ClientDisconnected);
            }
            slot.head.extend_from_slice(&slot.scratch[..n]);
        }
    }

    async fn dispatch(
        &mut self,
        request: &mut Request,
        handler: &Arc<dyn Handler>,
    ) -> Result<(), ConnectionError> {
        let mut response = Response::new(&mut self.stream);

        let outcome = AssertUnwindSafe(handler.process(request, &mut response))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                response.flush().await?;
                tracing::debug!(
                    path = request.path(),
                    written = response.bytes_written(),
                    "request handled"
                );
                Ok(())
            }
            Ok(Err(err)) => Err(ConnectionError::HandlerFailure(err)),
            Err(panic) => Err(ConnectionError::HandlerFailure(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(&*panic)
            ))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
