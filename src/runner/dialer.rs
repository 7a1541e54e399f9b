//! Dialer role: ramp connections and streams against a listener

use crate::common::{ConnectionId, StreamId};
use crate::config::{Config, DialConfig};
use crate::constants::{
    CONNECTION_OPEN_INTERVAL, ECHO_PROTOCOL, PAYLOAD_SIZE, STREAM_DEADLINE, STREAM_OPEN_INTERVAL,
    WRITE_INTERVAL, echo_payload,
};
use crate::errors::{BenchError, ErrorContext, Result};
use crate::host::{Connection, Host, HostConfig, PeerAddr, SecurityMode, Stream};
use crate::metrics::{MetricTracker, StreamGuard};
use crate::runner::{BenchmarkRole, pause};

use async_trait::async_trait;
use futures_util::future::join_all;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Ramp shape and pacing of a dial run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPlan {
    pub connections: u32,
    pub streams: u32,
    /// Write cycles per stream, 0 for unbounded
    pub writes_per_stream: u64,
    pub connection_interval: Duration,
    pub stream_interval: Duration,
    pub write_interval: Duration,
    pub deadline: Duration,
}

impl DialPlan {
    pub fn new(connections: u32, streams: u32) -> Self {
        Self {
            connections,
            streams,
            writes_per_stream: 0,
            connection_interval: CONNECTION_OPEN_INTERVAL,
            stream_interval: STREAM_OPEN_INTERVAL,
            write_interval: WRITE_INTERVAL,
            deadline: STREAM_DEADLINE,
        }
    }

    pub fn with_writes(mut self, writes_per_stream: u64) -> Self {
        self.writes_per_stream = writes_per_stream;
        self
    }

    /// Total streams the ramp opens if nothing fails
    pub fn total_streams(&self) -> u64 {
        u64::from(self.connections) * u64::from(self.streams)
    }
}

impl From<&DialConfig> for DialPlan {
    fn from(config: &DialConfig) -> Self {
        DialPlan::new(config.connections, config.streams).with_writes(config.writes_per_stream)
    }
}

/// Load generator against one target peer
pub struct Dialer {
    target: PeerAddr,
    host_config: HostConfig,
    plan: DialPlan,
}

impl Dialer {
    pub fn new(target: PeerAddr, host_config: HostConfig, plan: DialPlan) -> Self {
        Self {
            target,
            host_config,
            plan,
        }
    }

    /// Parse the target and check it against the host settings
    pub fn from_config(config: &Config) -> Result<Self> {
        let target: PeerAddr = config
            .dial
            .target
            .as_deref()
            .with_startup_context("dial requires a target peer address")?
            .parse()?;

        if target.transport != config.network.transport {
            return Err(BenchError::startup(format!(
                "Target {} uses {} but the selected transport is {}",
                target, target.transport, config.network.transport
            )));
        }
        if config.network.security == SecurityMode::Secured && target.peer.is_none() {
            return Err(BenchError::startup(format!(
                "Target {} has no /p2p/<peer-id>; pass --insecure to dial without identity checks",
                target
            )));
        }

        Ok(Self::new(
            target,
            HostConfig {
                transport: config.network.transport,
                security: config.network.security,
                seed: config.network.seed,
            },
            DialPlan::from(&config.dial),
        ))
    }

    pub fn plan(&self) -> &DialPlan {
        &self.plan
    }
}

#[async_trait]
impl BenchmarkRole for Dialer {
    fn name(&self) -> &'static str {
        "dialer"
    }

    async fn run(
        &mut self,
        tracker: Arc<dyn MetricTracker>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let plan = *self.plan();
        let host = Arc::new(Host::new(self.host_config)?);
        info!(
            "dialer: peer {} opening {} connection(s) x {} stream(s) ({} total) to {}",
            host.id(),
            plan.connections,
            plan.streams,
            plan.total_streams(),
            self.target
        );

        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        for index in 0..plan.connections {
            if cancel.is_cancelled() {
                break;
            }

            let id = ConnectionId::new(index);
            connections.push(tokio::spawn(run_connection(
                Arc::clone(&host),
                self.target,
                plan,
                id,
                Arc::clone(&tracker),
                cancel.clone(),
            )));

            if index + 1 < plan.connections && !pause(plan.connection_interval, &cancel).await {
                info!("Ramp cancelled after {} connection(s)", id.get() + 1);
                break;
            }
        }

        for joined in join_all(connections).await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }

        info!("All streams finished");
        Ok(())
    }
}

async fn run_connection(
    host: Arc<Host>,
    target: PeerAddr,
    plan: DialPlan,
    id: ConnectionId,
    tracker: Arc<dyn MetricTracker>,
    cancel: CancellationToken,
) {
    let connection = match host.connect(&target).await {
        Ok(connection) => Arc::new(connection),
        Err(e) => {
            error!("Connection {} to {} failed: {}", id, target, e);
            return;
        }
    };
    if let Some(remote) = connection.remote_peer() {
        debug!("Connection {} established to {}", id, remote);
    }

    let mut streams: Vec<JoinHandle<()>> = Vec::new();
    for index in 0..plan.streams {
        if cancel.is_cancelled() {
            break;
        }

        streams.push(tokio::spawn(run_stream(
            Arc::clone(&connection),
            StreamId::new(id, index),
            plan,
            Arc::clone(&tracker),
            cancel.clone(),
        )));

        if index + 1 < plan.streams && !pause(plan.stream_interval, &cancel).await {
            break;
        }
    }

    for joined in join_all(streams).await {
        if let Err(e) = joined {
            error!("Stream task on connection {} failed: {}", id, e);
        }
    }
    debug!("Connection {} finished", id);
}

async fn run_stream(
    connection: Arc<Connection>,
    id: StreamId,
    plan: DialPlan,
    tracker: Arc<dyn MetricTracker>,
    cancel: CancellationToken,
) {
    let guard = StreamGuard::open(Arc::clone(&tracker));
    debug!("processing stream {} (active: {})", id, guard.number());

    let mut stream = match connection.open_stream(ECHO_PROTOCOL).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("[{}] error opening stream: {}", id, e);
            return;
        }
    };

    match write_cycles(&mut stream, &plan, tracker.as_ref(), &cancel).await {
        Ok(cycles) => {
            debug!("[{}] done after {} write(s)", id, cycles);
            if let Err(e) = stream.close().await {
                debug!("[{}] close failed: {}", id, e);
            }
        }
        Err(e) => {
            if e.is_stream_local() {
                warn!("[{}] {}", id, e);
            } else {
                error!("[{}] {}", id, e);
            }
            stream.reset();
        }
    }

    debug!("exiting stream {}", id);
}

/// Write the payload and read its echo until the bound, a failure or cancellation
async fn write_cycles(
    stream: &mut Stream,
    plan: &DialPlan,
    tracker: &dyn MetricTracker,
    cancel: &CancellationToken,
) -> Result<u64> {
    let payload = echo_payload();
    let mut line = Vec::with_capacity(PAYLOAD_SIZE);
    let mut cycles = 0u64;

    loop {
        stream.set_deadline(Instant::now() + plan.deadline);

        let written = stream.write_all(&payload).await?;
        tracker.add_bytes_written(written as u64);

        line.clear();
        let n = stream.read_line(&mut line).await?;
        if n == 0 || line.last() != Some(&b'\n') {
            return Err(BenchError::StreamIo(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "remote closed the stream",
            )));
        }
        tracker.add_bytes_read(n as u64);
        cycles += 1;

        if plan.writes_per_stream > 0 && cycles >= plan.writes_per_stream {
            return Ok(cycles);
        }
        if !pause(plan.write_interval, cancel).await {
            return Ok(cycles);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{PeerId, Transport};
    use crate::metrics::collector::{MetricCollector, ResourceProbe, ResourceUsage};
    use crate::runner::EchoListener;

    struct NullProbe;

    impl ResourceProbe for NullProbe {
        fn sample(&mut self) -> ResourceUsage {
            ResourceUsage::default()
        }
    }

    fn fast_plan(connections: u32, streams: u32) -> DialPlan {
        DialPlan {
            connection_interval: Duration::from_millis(10),
            stream_interval: Duration::from_millis(5),
            write_interval: Duration::from_millis(5),
            ..DialPlan::new(connections, streams)
        }
    }

    fn host_config(transport: Transport) -> HostConfig {
        HostConfig {
            transport,
            security: SecurityMode::Secured,
            seed: 0,
        }
    }

    async fn round_trip(transport: Transport) {
        let listener_metrics = Arc::new(MetricCollector::new());
        let dialer_metrics = Arc::new(MetricCollector::new());

        let (listener, addr) = EchoListener::new(host_config(transport), 0)
            .start(listener_metrics.clone())
            .await
            .unwrap();

        let plan = fast_plan(2, 2).with_writes(3);
        let mut dialer = Dialer::new(addr, host_config(transport), plan);
        dialer
            .run(dialer_metrics.clone(), CancellationToken::new())
            .await
            .unwrap();
        listener.shutdown().await;

        let sent = dialer_metrics.collect(&mut NullProbe);
        let received = listener_metrics.collect(&mut NullProbe);
        let expected = plan.total_streams() * 3 * PAYLOAD_SIZE as u64;

        assert_eq!(sent.bytes_written, expected);
        assert_eq!(sent.bytes_read, expected);
        assert_eq!(received.bytes_read, sent.bytes_written);
        assert_eq!(received.bytes_written, expected);
        assert_eq!(sent.active_streams, 0);
        assert_eq!(received.active_streams, 0);
    }

    #[tokio::test]
    async fn test_tcp_dial_round_trip() {
        round_trip(Transport::Tcp).await;
    }

    #[tokio::test]
    async fn test_websocket_dial_round_trip() {
        round_trip(Transport::WebSocket).await;
    }

    #[tokio::test]
    async fn test_unreachable_target_contributes_no_streams() {
        // Bind and drop to get a port nobody listens on
        let port = {
            let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        let target = PeerAddr {
            ip: "127.0.0.1".parse().unwrap(),
            port,
            transport: Transport::Tcp,
            peer: Some(PeerId::from_seed(5)),
        };

        let metrics = Arc::new(MetricCollector::new());
        let mut dialer = Dialer::new(target, host_config(Transport::Tcp), fast_plan(2, 3));
        dialer
            .run(metrics.clone(), CancellationToken::new())
            .await
            .unwrap();

        let record = metrics.collect(&mut NullProbe);
        assert_eq!(record.bytes_written, 0);
        assert_eq!(record.active_streams, 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_ramp_and_streams() {
        let listener_metrics = Arc::new(MetricCollector::new());
        let (listener, addr) = EchoListener::new(host_config(Transport::Tcp), 0)
            .start(listener_metrics.clone())
            .await
            .unwrap();

        let plan = DialPlan {
            connection_interval: Duration::from_secs(30),
            ..fast_plan(10, 2)
        };
        let metrics = Arc::new(MetricCollector::new());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let mut dialer = Dialer::new(addr, host_config(Transport::Tcp), plan);
        tokio::time::timeout(Duration::from_secs(10), dialer.run(metrics.clone(), cancel))
            .await
            .expect("dialer should stop after cancellation")
            .unwrap();
        listener.shutdown().await;

        let record = metrics.collect(&mut NullProbe);
        assert!(record.bytes_written > 0);
        assert_eq!(record.bytes_written % PAYLOAD_SIZE as u64, 0);
        assert_eq!(record.active_streams, 0);
        assert_eq!(listener_metrics.active_streams(), 0);
    }

    #[test]
    fn test_from_config_rejects_bad_targets() {
        let cases = [
            ("not-an-address", SecurityMode::Secured),
            ("/ip4/127.0.0.1/tcp/9999/ws/p2p/00112233445566778899aabbccddeeff", SecurityMode::Secured),
            ("/ip4/127.0.0.1/tcp/9999", SecurityMode::Secured),
        ];
        for (target, security) in cases {
            let mut config = Config::default_dial(target.to_string());
            config.network.security = security;
            assert!(
                matches!(Dialer::from_config(&config), Err(BenchError::Startup(_))),
                "{}",
                target
            );
        }
    }

    #[test]
    fn test_from_config_builds_plan() {
        let mut config = Config::default_dial("/ip4/127.0.0.1/tcp/9999".to_string());
        config.network.security = SecurityMode::Insecure;
        config.dial.connections = 4;
        config.dial.streams = 25;
        config.dial.writes_per_stream = 7;

        let dialer = Dialer::from_config(&config).unwrap();
        assert_eq!(dialer.plan().total_streams(), 100);
        assert_eq!(dialer.plan().writes_per_stream, 7);
        assert_eq!(dialer.plan().write_interval, WRITE_INTERVAL);
    }
}
