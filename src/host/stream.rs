//! Deadline-aware logical streams

use crate::constants::MAX_LINE_LENGTH;
use crate::host::addr::PeerId;
use crate::host::transport::IoStream;

use std::future::Future;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::{Instant, timeout_at};

/// One negotiated stream to a remote peer
///
/// Every I/O call is bounded by the deadline set with [`Stream::set_deadline`];
/// an expired deadline surfaces as [`io::ErrorKind::TimedOut`].
pub struct Stream {
    io: BufReader<IoStream>,
    protocol: String,
    remote: PeerId,
    deadline: Option<Instant>,
}

impl Stream {
    pub(crate) fn new(io: BufReader<IoStream>, protocol: String, remote: PeerId) -> Self {
        Self {
            io,
            protocol,
            remote,
            deadline: None,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn remote_peer(&self) -> PeerId {
        self.remote
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Append bytes up to and including the next `\n` to `buf`
    ///
    /// Returns 0 at end of stream. A final line without a terminator is
    /// returned as is; callers can tell by the missing `\n`.
    pub async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let limit = MAX_LINE_LENGTH as u64;
        let io = &mut self.io;
        let line = &mut *buf;
        let n = bounded(self.deadline, async move {
            io.take(limit).read_until(b'\n', line).await
        })
        .await?;

        if n as u64 == limit && buf.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", MAX_LINE_LENGTH),
            ));
        }
        Ok(n)
    }

    /// Write and flush the whole buffer, returning its length
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<usize> {
        let io = &mut self.io;
        bounded(self.deadline, async move {
            io.write_all(data).await?;
            io.flush().await?;
            Ok(data.len())
        })
        .await
    }

    /// Graceful close: flush and shut down the write side
    pub async fn close(mut self) -> io::Result<()> {
        let io = &mut self.io;
        bounded(self.deadline, async move { io.shutdown().await }).await
    }

    /// Abort without a graceful shutdown
    pub fn reset(self) {
        drop(self.io);
    }
}

async fn bounded<T, F>(deadline: Option<Instant>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(deadline) => timeout_at(deadline, fut).await.map_err(|_| {
            io::Error::new(io::ErrorKind::TimedOut, "stream deadline exceeded")
        })?,
        None => fut.await,
    }
}
