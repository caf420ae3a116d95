//! Per-connection serve loop.
//!
//! A session reads one request at a time, answers it, and reads again on the
//! same connection until the peer closes, the connection goes idle past the
//! timeout, a request is malformed, I/O fails, or the server shuts down.

use crate::protocol::{ParseError, Request};
use crate::router::Router;
use crate::stats::Stats;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Errors that end a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection idle for more than {0:?}")]
    Timeout(Duration),
    #[error("Malformed request: {0}")]
    Malformed(#[from] ParseError),
}

/// Everything a session shares with the listener
#[derive(Clone)]
pub struct SessionContext {
    pub router: Arc<Router>,
    pub stats: Arc<Stats>,
    /// Idle timeout applied to every read and write
    pub timeout: Duration,
    /// Maximum bytes read per request
    pub buffer_size: usize,
    pub shutdown: watch::Receiver<bool>,
}

/// Serve requests on `stream` until the session ends.
///
/// Returns `Ok` when the peer closes the connection or the server shuts
/// down; every other ending is an error the caller logs.
pub async fn serve<S>(
    mut stream: S,
    peer: SocketAddr,
    mut ctx: SessionContext,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let idle = ctx.timeout;
    let mut buffer = BytesMut::zeroed(ctx.buffer_size);

    loop {
        if *ctx.shutdown.borrow() {
            debug!(peer = %peer, "Session stopped by shutdown");
            return Ok(());
        }

        let n = tokio::select! {
            read = timeout(idle, stream.read(&mut buffer[..])) => {
                read.map_err(|_| SessionError::Timeout(idle))??
            }
            _ = ctx.shutdown.changed() => {
                debug!(peer = %peer, "Session stopped by shutdown");
                return Ok(());
            }
        };

        if n == 0 {
            trace!(peer = %peer, "Connection closed by peer");
            return Ok(());
        }

        let request = Request::from_bytes(&buffer[..n])?;
        trace!(peer = %peer, method = request.method, path = request.path, "Processing request");

        let response = ctx.router.respond(&request, &ctx.stats).await;
        let bytes = response.to_bytes();

        timeout(idle, stream.write_all(&bytes))
            .await
            .map_err(|_| SessionError::Timeout(idle))??;
        debug!(peer = %peer, status = response.status.code(), "Sent response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::FixedWork;
    use serde_json::Value;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn context(timeout: Duration) -> (SessionContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let ctx = SessionContext {
            router: Arc::new(Router::new(Arc::new(FixedWork(2)))),
            stats: Stats::new(),
            timeout,
            buffer_size: 1024,
            shutdown: rx,
        };
        (ctx, tx)
    }

    #[tokio::test]
    async fn test_health_then_peer_close() {
        let (ctx, _tx) = context(Duration::from_secs(5));
        let stream = Builder::new()
            .read(b"GET /health ")
            .write(b"HTTP/1.1 200 OK\n\n{\"total\": {\"queries\": 0, \"seconds\": 0}}")
            .build();

        serve(stream, peer(), ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_keep_alive_serves_in_order() {
        let (ctx, _tx) = context(Duration::from_secs(5));
        let stream = Builder::new()
            .read(b"DELETE /v1/api ")
            .write(b"HTTP/1.1 405 Method not allowed\n\n{\"msg\": \"Method not allowed\", \"status_code\": 405}")
            .read(b"GET /missing ")
            .write(b"HTTP/1.1 404 Not found\n\n{\"msg\": \"Page not found\", \"status_code\": 404}")
            .build();

        serve(stream, peer(), ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_ends_session() {
        let (ctx, _tx) = context(Duration::from_secs(5));
        let stream = Builder::new().read(b"GET\r\n").build();

        let err = serve(stream, peer(), ctx).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Malformed(ParseError::MissingPath(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_ends_session() {
        let (ctx, _tx) = context(Duration::from_secs(5));
        let stream = Builder::new().read(b"GET /\xc3\x28").build();

        let err = serve(stream, peer(), ctx).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Malformed(ParseError::InvalidEncoding)
        ));
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let (ctx, _tx) = context(Duration::from_millis(50));
        let (_client, server) = duplex(64);

        let err = serve(server, peer(), ctx).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_session() {
        let (ctx, tx) = context(Duration::from_secs(30));
        let (_client, server) = duplex(64);

        let session = tokio::spawn(serve(server, peer(), ctx));
        tx.send(true).unwrap();

        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_compute_updates_shared_stats() {
        let (ctx, _tx) = context(Duration::from_secs(5));
        let stats = Arc::clone(&ctx.stats);
        let (mut client, server) = duplex(1024);
        let session = tokio::spawn(serve(server, peer(), ctx));

        client.write_all(b"GET /v1/api HTTP/1.1\r\n").await.unwrap();
        let mut buf = vec![0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();

        let text = std::str::from_utf8(&buf[..n]).unwrap();
        let (line, body) = text.split_once("\n\n").unwrap();
        assert_eq!(line, "HTTP/1.1 200 OK");
        let body: Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["response_took_seconds"], 2);
        assert!(body["current_date"].is_string());

        drop(client);
        session.await.unwrap().unwrap();
        assert_eq!(stats.snapshot().queries, 1);
        assert_eq!(stats.snapshot().seconds, 2);
    }
}
