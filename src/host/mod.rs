//! Minimal network host the benchmark roles run on
//!
//! - Named transports with pluggable drivers
//! - Peer identities and `/ip4/.../tcp/<port>[/ws]/p2p/<id>` addresses
//! - Per-stream protocol negotiation and handler dispatch
//! - Deadline-aware streams
//!
//! A connection owns one transport socket and multiplexes its streams over
//! it with the framing in [`mux`].

pub mod addr;
pub mod mux;
pub mod negotiate;
pub mod stream;
pub mod transport;
pub mod ws;

pub use addr::{PeerAddr, PeerId};
pub use stream::Stream;
pub use transport::{SecurityMode, Transport};

use crate::constants::ACCEPT_ERROR_BACKOFF;
use crate::errors::{BenchError, ErrorContext, Result};
use mux::{MuxClient, MuxServer, MuxStream};
use negotiate::{Answer, IDENTIFY_PROTOCOL, Proposal};
use transport::{IoStream, TransportDriver, driver_for};

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

type StreamHandler = Arc<dyn Fn(Stream) -> BoxFuture<'static, ()> + Send + Sync>;

/// Host construction settings
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    pub transport: Transport,
    pub security: SecurityMode,
    /// Identity seed, 0 for a random identity
    pub seed: u64,
}

/// A peer on the network: accepts inbound streams and dials remote peers
pub struct Host {
    id: PeerId,
    security: SecurityMode,
    driver: Arc<dyn TransportDriver>,
    handlers: Arc<RwLock<HashMap<String, StreamHandler>>>,
    tasks: TaskTracker,
    stop: CancellationToken,
}

impl Host {
    /// Build a host; an unavailable transport is a startup failure
    pub fn new(config: HostConfig) -> Result<Self> {
        let driver = driver_for(config.transport)?;
        Ok(Self::with_driver(config, driver))
    }

    fn with_driver(config: HostConfig, driver: Arc<dyn TransportDriver>) -> Self {
        let id = PeerId::generate(config.seed);
        debug!("Host {} created ({}, {})", id, driver.transport(), config.security);

        Self {
            id,
            security: config.security,
            driver,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            tasks: TaskTracker::new(),
            stop: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn transport(&self) -> Transport {
        self.driver.transport()
    }

    /// Register the handler run for every inbound stream negotiating `protocol`
    pub async fn set_stream_handler<F, Fut>(&self, protocol: &str, handler: F)
    where
        F: Fn(Stream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: StreamHandler =
            Arc::new(move |stream: Stream| -> BoxFuture<'static, ()> { Box::pin(handler(stream)) });
        self.handlers
            .write()
            .await
            .insert(protocol.to_string(), handler);
    }

    /// Bind on all interfaces and start accepting; returns the advertised address
    pub async fn listen(&self, port: u16) -> Result<PeerAddr> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .with_startup_context(&format!("Failed to bind port {}", port))?;
        let bound = listener
            .local_addr()
            .with_startup_context("Failed to read bound address")?;

        let acceptor = Acceptor {
            local: self.id,
            security: self.security,
            driver: Arc::clone(&self.driver),
            handlers: Arc::clone(&self.handlers),
            tasks: self.tasks.clone(),
            stop: self.stop.clone(),
        };

        let listener = Arc::new(listener);
        self.tasks.spawn(accept_loop(
            self.stop.clone(),
            move || {
                let listener = Arc::clone(&listener);
                async move { listener.accept().await }
            },
            move |(socket, remote): (TcpStream, SocketAddr)| {
                acceptor.tasks.spawn(acceptor.clone().serve(socket, remote));
            },
        ));

        Ok(PeerAddr::advertised(bound, self.transport(), self.id))
    }

    /// Reach a remote peer over one transport connection and learn its identity
    pub async fn connect(&self, addr: &PeerAddr) -> Result<Connection> {
        if addr.transport != self.transport() {
            return Err(BenchError::transport(format!(
                "Address {} uses {} but this host runs {}",
                addr,
                addr.transport,
                self.transport()
            )));
        }
        if self.security == SecurityMode::Secured && addr.peer.is_none() {
            return Err(BenchError::transport(format!(
                "Secured dial to {} requires a /p2p/<peer-id> component",
                addr
            )));
        }

        let socket = addr.socket_addr();
        let io = self.driver.dial(socket).await?;
        let connection = Connection {
            local: self.id,
            remote: addr.peer,
            security: self.security,
            socket,
            mux: MuxClient::new(io),
        };

        let (mut io, remote) = connection.negotiate(IDENTIFY_PROTOCOL).await?;
        let _ = io.shutdown().await;

        debug!("Connected to {} at {}", remote, socket);
        Ok(Connection {
            remote: Some(remote),
            ..connection
        })
    }

    /// Stop accepting and wait for every in-flight handler
    pub async fn shutdown(&self) {
        self.stop.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        debug!("Host {} shut down", self.id);
    }
}

/// Accept until stopped, pausing after each failure so a persistent error
/// (e.g. out of file descriptors) does not spin
async fn accept_loop<A, Fut, T, F>(stop: CancellationToken, mut accept: A, mut on_accept: F)
where
    A: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
    F: FnMut(T),
{
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            accepted = accept() => match accepted {
                Ok(accepted) => on_accept(accepted),
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }
    debug!("Accept loop stopped");
}

/// Inbound side shared by the accept loop tasks
#[derive(Clone)]
struct Acceptor {
    local: PeerId,
    security: SecurityMode,
    driver: Arc<dyn TransportDriver>,
    handlers: Arc<RwLock<HashMap<String, StreamHandler>>>,
    tasks: TaskTracker,
    stop: CancellationToken,
}

impl Acceptor {
    /// Run one inbound connection: every stream it opens is dispatched on its own task
    async fn serve(self, socket: TcpStream, remote: SocketAddr) {
        let io = match self.driver.accept(socket).await {
            Ok(io) => io,
            Err(e) => {
                debug!("Inbound connection from {} failed: {}", remote, e);
                return;
            }
        };

        let mut incoming = MuxServer::new(io);
        loop {
            let stream = tokio::select! {
                _ = self.stop.cancelled() => break,
                stream = incoming.accept() => match stream {
                    Some(stream) => stream,
                    None => break,
                },
            };

            let acceptor = self.clone();
            self.tasks.spawn(async move {
                if let Err(e) = acceptor.dispatch(stream).await {
                    debug!("Inbound stream from {} dropped: {}", remote, e);
                }
            });
        }
        debug!("Connection from {} finished", remote);
    }

    async fn dispatch(&self, stream: MuxStream) -> Result<()> {
        let mut io = BufReader::new(Box::new(stream) as IoStream);
        let proposal = negotiate::receive(&mut io).await?;

        let handler = self.handlers.read().await.get(&proposal.protocol).cloned();
        let supported = proposal.protocol == IDENTIFY_PROTOCOL || handler.is_some();
        let reply = negotiate::evaluate(&proposal, self.local, self.security, supported);
        negotiate::answer(&mut io, &reply).await?;

        if let Answer::Reject(reason) = reply {
            return Err(BenchError::transport(reason));
        }

        match handler {
            Some(handler) => {
                handler(Stream::new(io, proposal.protocol, proposal.peer)).await;
            }
            None => {
                // Identify: the answer already carried our id
                let _ = io.shutdown().await;
            }
        }
        Ok(())
    }
}

/// One transport connection to a remote peer, carrying many streams
pub struct Connection {
    local: PeerId,
    remote: Option<PeerId>,
    security: SecurityMode,
    socket: SocketAddr,
    mux: MuxClient,
}

impl Connection {
    pub fn remote_peer(&self) -> Option<PeerId> {
        self.remote
    }

    /// Open a new stream negotiating `protocol`
    pub async fn open_stream(&self, protocol: &str) -> Result<Stream> {
        let (io, remote) = self.negotiate(protocol).await?;
        Ok(Stream::new(io, protocol.to_string(), remote))
    }

    async fn negotiate(&self, protocol: &str) -> Result<(BufReader<IoStream>, PeerId)> {
        let stream = self
            .mux
            .open()
            .await
            .with_transport_context(&format!("Failed to open stream to {}", self.socket))?;
        debug!("Negotiating {} on stream {} to {}", protocol, stream.id(), self.socket);

        let mut io = BufReader::new(Box::new(stream) as IoStream);
        let proposal = Proposal {
            protocol: protocol.to_string(),
            peer: self.local,
            security: self.security,
        };
        let remote = negotiate::propose(&mut io, &proposal).await?;

        if self.security == SecurityMode::Secured
            && let Some(expected) = self.remote
            && expected != remote
        {
            return Err(BenchError::transport(format!(
                "Peer id mismatch at {}: expected {}, got {}",
                self.socket, expected, remote
            )));
        }

        Ok((io, remote))
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id)
            .field("transport", &self.transport())
            .field("security", &self.security)
            .finish()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("security", &self.security)
            .field("socket", &self.socket)
            .finish()
    }
}
