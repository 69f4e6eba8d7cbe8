use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ConnectionError;

/// Reads whatever is available into `buf`, waiting at most `timeout`.
///
/// Returns `Ok(0)` on a clean end of stream. A reset from the peer is
/// reported as [`ConnectionError::ClientDisconnected`].
pub(crate) async fn read_some<S>(
    stream: &mut S,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize, ConnectionError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, stream.read(buf))
            .await
            .map_err(|_| ConnectionError::Timeout)?,
        None => stream.read(buf).await,
    };

    result.map_err(|err| match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ConnectionError::ClientDisconnected,
        _ => ConnectionError::Io(err),
    })
}
