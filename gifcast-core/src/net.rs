//! The lowest-level networking routines, with timeouts on every
//! operation.
//!
//! Each async primitive races its I/O against a deadline the caller
//! arms beforehand; whichever finishes first wins. Exceeding the
//! deadline yields [`CastError::Timeout`]. Cancellation from the stop
//! source is delivered by dropping the task's future, which closes the
//! socket and lets the peer observe the error.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{self, TcpStream};
use tokio::time::{self, Instant};

use crate::error::CastError;

/// Host name that resolves to the loopback interface.
const LOCAL: &str = "localhost";

/// Remaining budget until `deadline`, for timeout diagnostics.
fn budget(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Write every byte of the gather list, or fail.
///
/// Returns the number of bytes written, which on success equals the
/// summed length of `parts`.
pub async fn send(
    socket: &mut TcpStream,
    deadline: Instant,
    parts: &[&[u8]],
) -> Result<usize, CastError> {
    let remaining = budget(deadline);
    let write_all = async {
        let mut written = 0usize;
        for part in parts {
            if !part.is_empty() {
                socket.write_all(part).await?;
                written += part.len();
            }
        }
        Ok::<_, std::io::Error>(written)
    };
    match time::timeout_at(deadline, write_all).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CastError::Timeout(remaining)),
    }
}

/// Read exactly `space.len()` bytes.
///
/// A short read (peer closed, connection reset) is an error.
/// Precondition: `space` is not empty.
pub async fn receive(
    socket: &mut TcpStream,
    deadline: Instant,
    space: &mut [u8],
) -> Result<usize, CastError> {
    debug_assert!(!space.is_empty());
    let remaining = budget(deadline);
    match time::timeout_at(deadline, socket.read_exact(space)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CastError::Timeout(remaining)),
    }
}

/// Connect to the first reachable endpoint of the list.
///
/// Endpoints are tried in order under the shared deadline; the first
/// successful socket wins, otherwise the last error is returned.
/// Precondition: `endpoints` is not empty.
pub async fn connect(
    endpoints: &[SocketAddr],
    deadline: Instant,
) -> Result<TcpStream, CastError> {
    debug_assert!(!endpoints.is_empty());
    let mut last = CastError::Timeout(Duration::ZERO);
    for endpoint in endpoints {
        let remaining = budget(deadline);
        match time::timeout_at(deadline, TcpStream::connect(endpoint)).await {
            Ok(Ok(socket)) => {
                let _ = socket.set_nodelay(true);
                return Ok(socket);
            }
            Ok(Err(error)) => last = error.into(),
            Err(_) => last = CastError::Timeout(remaining),
        }
    }
    Err(last)
}

/// Resolve a host name to endpoints, spending at most `budget` on the
/// resolver.
///
/// An empty host name or `"localhost"` resolves the loopback
/// interface. Unspecified addresses are dropped. Resolution failure or
/// an exceeded budget yields an empty list.
pub async fn resolve(host: &str, port: u16, budget: Duration) -> Vec<SocketAddr> {
    let host = if host.is_empty() { LOCAL } else { host };
    match time::timeout(budget, net::lookup_host((host, port))).await {
        Ok(Ok(found)) => found.filter(|ep| !ep.ip().is_unspecified()).collect(),
        _ => Vec::new(),
    }
}

/// Best-effort shutdown of both directions; errors are suppressed.
pub async fn close(mut socket: TcpStream) {
    let _ = socket.shutdown().await;
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn send_then_receive_exact() {
        let (mut writer, mut reader) = socket_pair().await;
        let deadline = Instant::now() + Duration::from_secs(2);

        let sent = send(&mut writer, deadline, &[b"head", b"", b"body"])
            .await
            .unwrap();
        assert_eq!(sent, 8);

        let mut space = [0u8; 8];
        let received = receive(&mut reader, deadline, &mut space).await.unwrap();
        assert_eq!(received, 8);
        assert_eq!(&space, b"headbody");
    }

    #[tokio::test]
    async fn receive_times_out_without_data() {
        let (_writer, mut reader) = socket_pair().await;
        let deadline = Instant::now() + Duration::from_millis(50);

        let mut space = [0u8; 4];
        let result = receive(&mut reader, deadline, &mut space).await;
        assert!(matches!(result, Err(CastError::Timeout(_))));
    }

    #[tokio::test]
    async fn receive_fails_short_on_peer_close() {
        let (mut writer, mut reader) = socket_pair().await;
        let deadline = Instant::now() + Duration::from_secs(2);

        send(&mut writer, deadline, &[b"ab"]).await.unwrap();
        close(writer).await;

        let mut space = [0u8; 4];
        let result = receive(&mut reader, deadline, &mut space).await;
        assert!(matches!(result, Err(CastError::Connection(_))));
    }

    #[tokio::test]
    async fn connect_takes_first_reachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap();
        // a closed port on loopback refuses quickly
        let closed: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let socket = connect(&[closed, open], deadline).await.unwrap();
        assert_eq!(socket.peer_addr().unwrap(), open);
    }

    #[tokio::test]
    async fn connect_reports_last_error() {
        let closed: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        assert!(connect(&[closed], deadline).await.is_err());
    }

    #[tokio::test]
    async fn resolve_empty_host_is_loopback() {
        let endpoints = resolve("", 34567, Duration::from_secs(1)).await;
        assert!(!endpoints.is_empty());
        assert!(endpoints.iter().all(|ep| ep.port() == 34567));
        assert!(endpoints.iter().all(|ep| ep.ip().is_loopback()));
    }
}
