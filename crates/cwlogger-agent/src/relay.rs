// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Copies bytes from stdin or unix socket connections into a [`Logger`].
//!
//! Every successful read becomes one log entry, so a writer that sends one
//! line per write gets one entry per line. A multi-byte UTF-8 character cut
//! off at the end of a read is held back and prefixed to the next one.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cwlogger::Logger;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Unix socket paths are limited to 108 bytes on Linux.
const MAX_SOCKET_PATH_BYTES: usize = 100;

/// Length of the prefix of `buf` that does not end inside a multi-byte
/// UTF-8 sequence.
fn complete_prefix_len(buf: &[u8]) -> usize {
    let tail_start = buf.len().saturating_sub(3);
    for (i, &byte) in buf.iter().enumerate().skip(tail_start).rev() {
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if i + width > buf.len() { i } else { buf.len() };
    }
    buf.len()
}

/// Copies `reader` into `logger` until EOF and returns the number of bytes relayed.
pub async fn relay<R: AsyncRead + Unpin>(mut reader: R, logger: &Logger) -> io::Result<u64> {
    let mut buf = vec![0; READ_BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();
    let mut total = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if !pending.is_empty() {
                total += logger.write(&pending)? as u64;
            }
            return Ok(total);
        }

        let chunk = if pending.is_empty() {
            &buf[..n]
        } else {
            pending.extend_from_slice(&buf[..n]);
            &pending[..]
        };
        let complete = complete_prefix_len(chunk);
        if complete > 0 {
            total += logger.write(&chunk[..complete])? as u64;
        }
        pending = chunk[complete..].to_vec();
    }
}

/// Removes the socket file when dropped.
#[derive(Debug)]
struct SocketCleanupGuard {
    path: PathBuf,
}

impl Drop for SocketCleanupGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove socket file '{}': {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

#[derive(Debug)]
pub struct SocketRelay {
    listener: UnixListener,
    _guard: SocketCleanupGuard,
}

impl SocketRelay {
    /// Binds `path`, replacing a stale socket file and creating missing
    /// parent directories.
    pub fn bind(path: &Path) -> io::Result<Self> {
        let byte_len = path.as_os_str().len();
        if byte_len == 0 || byte_len > MAX_SOCKET_PATH_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Unix socket path must be 1 to {MAX_SOCKET_PATH_BYTES} bytes, got {byte_len}: {}",
                    path.display()
                ),
            ));
        }

        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        info!("Listening on {}", path.display());

        Ok(SocketRelay {
            listener,
            _guard: SocketCleanupGuard {
                path: path.to_path_buf(),
            },
        })
    }

    /// Accepts connections until `cancel` fires, relaying each one
    /// concurrently. Open connections are dropped on cancellation and the
    /// socket file is removed.
    pub async fn serve(self, logger: Arc<Logger>, cancel: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let logger = Arc::clone(&logger);
                        connections.spawn(handle_connection(stream, logger));
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        debug!("Stopped accepting, closing {} connections", connections.len());
        connections.shutdown().await;
    }
}

async fn handle_connection(stream: UnixStream, logger: Arc<Logger>) {
    match relay(stream, &logger).await {
        Ok(bytes) => debug!("Connection closed after {} bytes", bytes),
        Err(e) => warn!("Connection failed: {}", e),
    }
}

/// Resolves on the first SIGINT, SIGTERM or SIGHUP.
pub async fn wait_for_signal() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = interrupt.recv() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
        _ = hangup.recv() => info!("Received SIGHUP"),
    }
    Ok(())
}

/// Cancels `cancel` once `signal` resolves. A failure to listen is logged and
/// leaves the token alone.
pub async fn cancel_on_signal<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => cancel.cancel(),
        Err(e) => error!("Failed to listen for signals, continuing without them: {}", e),
    }
}
