//! Unix socket server for the prised daemon.
//!
//! Listens on a local stream socket and serves front-end clients. Each
//! client gets a reader task (decode + dispatch) and a writer task (FIFO
//! send queue, one write in flight); both live on the loop thread.

use bytes::BytesMut;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch;
use crate::registry::Registry;
use crate::rpc::{Decoder, RpcError};

/// Compute the default socket path for this user.
pub fn default_socket_path() -> PathBuf {
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/prise-{uid}.sock"))
}

/// Bind the socket and serve clients until shutdown.
///
/// Startup probes an existing socket path: a live listener aborts with
/// "already running", a stale path is unlinked. The loop returns when the
/// registry's shutdown token fires (idle shutdown or Ctrl-C); remaining
/// sessions are drained and the socket path unlinked.
pub async fn serve(registry: Registry, socket_path: &Path) -> io::Result<()> {
    if socket_path.exists() {
        match std::os::unix::net::UnixStream::connect(socket_path) {
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!(
                        "another prised is already listening on {}",
                        socket_path.display()
                    ),
                ));
            }
            Err(_) => {
                // Socket file exists but nothing is listening: stale.
                std::fs::remove_file(socket_path)?;
            }
        }
    }

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Bind through std to get the default backlog of 128 and set
    // permissions before the first accept.
    let std_listener = std::os::unix::net::UnixListener::bind(socket_path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }
    std_listener.set_nonblocking(true)?;
    let listener = UnixListener::from_std(std_listener)?;

    tracing::info!(path = %socket_path.display(), "listening");

    let shutdown = registry.shutdown_token();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, _addr)) => {
                    let registry = registry.clone();
                    tokio::spawn(async move {
                        handle_client(stream, registry).await;
                    });
                }
                Err(e) => {
                    tracing::error!(?e, "failed to accept connection");
                }
            }
        }
    }

    registry.drain();
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("server stopped");
    Ok(())
}

/// Serve one client connection until EOF, error, or cancellation.
async fn handle_client(stream: UnixStream, registry: Registry) {
    let fd = stream.as_raw_fd();
    let (mut read_half, mut write_half) = stream.into_split();

    let (send_tx, mut send_rx) = mpsc::unbounded_channel::<bytes::Bytes>();
    let cancel = CancellationToken::new();
    registry.add_client(fd, send_tx, cancel.clone());
    tracing::debug!(client = fd, "client connected");

    // Writer task: drains the send queue with at most one write in flight.
    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                buf = send_rx.recv() => match buf {
                    Some(buf) => {
                        if let Err(e) = write_half.write_all(&buf).await {
                            // The pending queue dies with this task; the
                            // reader side will observe the error and tear
                            // the client down.
                            tracing::debug!(client = fd, ?e, "send failed, dropping queue");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    });

    let mut decoder = Decoder::new();
    let mut buf = BytesMut::with_capacity(8 * 1024);
    'recv: loop {
        tokio::select! {
            _ = cancel.cancelled() => break 'recv,
            result = read_half.read_buf(&mut buf) => {
                match result {
                    Ok(0) => break 'recv,
                    Ok(_) => {
                        decoder.extend(&buf);
                        buf.clear();
                        loop {
                            match decoder.next() {
                                Ok(Some(msg)) => {
                                    dispatch::handle_message(&registry, fd, msg).await;
                                }
                                Ok(None) => break,
                                Err(RpcError::Malformed(e)) => {
                                    // Framing is intact; drop the message,
                                    // keep the connection.
                                    tracing::warn!(client = fd, %e, "malformed message dropped");
                                }
                                Err(RpcError::CorruptStream(e)) => {
                                    tracing::warn!(client = fd, %e, "corrupt stream, disconnecting");
                                    break 'recv;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(client = fd, ?e, "recv error");
                        break 'recv;
                    }
                }
            }
        }
    }

    // Cancel outstanding operations before the fd is closed, then cascade
    // session cleanup.
    cancel.cancel();
    registry.remove_client(fd);
    let _ = writer.await;
    tracing::debug!(client = fd, "client disconnected");
}
