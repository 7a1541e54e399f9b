//! Listener role: accept echo streams and mirror every line back

use crate::config::Config;
use crate::constants::{ECHO_PROTOCOL, PAYLOAD_SIZE, STREAM_DEADLINE};
use crate::errors::Result;
use crate::host::{Host, HostConfig, PeerAddr, Stream};
use crate::metrics::{MetricTracker, StreamGuard};
use crate::runner::BenchmarkRole;

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Echo server fed into the shared telemetry counters
pub struct EchoListener {
    host_config: HostConfig,
    port: u16,
    deadline: Duration,
}

impl EchoListener {
    pub fn new(host_config: HostConfig, port: u16) -> Self {
        Self {
            host_config,
            port,
            deadline: STREAM_DEADLINE,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            HostConfig {
                transport: config.network.transport,
                security: config.network.security,
                seed: config.network.seed,
            },
            config.network.listen_port,
        )
    }

    /// Build the host, register the echo handler and start listening
    pub async fn start(&self, tracker: Arc<dyn MetricTracker>) -> Result<(Host, PeerAddr)> {
        let host = Host::new(self.host_config)?;
        let deadline = self.deadline;

        host.set_stream_handler(ECHO_PROTOCOL, move |stream| {
            handle_echo(stream, Arc::clone(&tracker), deadline)
        })
        .await;

        let addr = host.listen(self.port).await?;
        info!("listener: my address: {}", addr);
        Ok((host, addr))
    }
}

#[async_trait]
impl BenchmarkRole for EchoListener {
    fn name(&self) -> &'static str {
        "listener"
    }

    async fn run(
        &mut self,
        tracker: Arc<dyn MetricTracker>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (host, _addr) = self.start(tracker).await?;
        info!("Listening for connections");

        cancel.cancelled().await;
        info!("Stopping listener, waiting for open streams to finish");
        host.shutdown().await;
        Ok(())
    }
}

/// Serve one inbound stream until the peer closes it or an error occurs
pub async fn handle_echo(mut stream: Stream, tracker: Arc<dyn MetricTracker>, deadline: Duration) {
    let guard = StreamGuard::open(Arc::clone(&tracker));
    debug!(
        "processing stream number: {} ({}) from {}",
        guard.number(),
        stream.protocol(),
        stream.remote_peer()
    );

    match echo_lines(&mut stream, tracker.as_ref(), deadline).await {
        Ok(()) => {
            if let Err(e) = stream.close().await {
                debug!("Close of stream {} failed: {}", guard.number(), e);
            }
        }
        Err(e) => {
            warn!("Resetting stream {}, echo error: {}", guard.number(), e);
            stream.reset();
        }
    }

    debug!("exiting stream number: {}", guard.number());
}

async fn echo_lines(
    stream: &mut Stream,
    tracker: &dyn MetricTracker,
    deadline: Duration,
) -> io::Result<()> {
    let mut line = Vec::with_capacity(PAYLOAD_SIZE);
    loop {
        stream.set_deadline(Instant::now() + deadline);

        line.clear();
        let n = stream.read_line(&mut line).await?;
        // End of stream; a trailing partial line is dropped
        if n == 0 || line.last() != Some(&b'\n') {
            return Ok(());
        }
        tracker.add_bytes_read(n as u64);

        let written = stream.write_all(&line).await?;
        tracker.add_bytes_written(written as u64);
    }
}
