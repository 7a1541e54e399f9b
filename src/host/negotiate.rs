//! Per-stream protocol negotiation
//!
//! The opener sends `<protocol> <peer-id> <secured|insecure>\n`; the acceptor
//! answers `ok <peer-id>\n` or `na <reason>\n`.

use crate::constants::{MAX_LINE_LENGTH, NEGOTIATION_TIMEOUT};
use crate::errors::{BenchError, Result};
use crate::host::addr::PeerId;
use crate::host::transport::SecurityMode;

use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

/// Internal protocol used by `connect` to learn the remote identity
pub const IDENTIFY_PROTOCOL: &str = "/p2p-bench/id/1.0.0";

/// Opening line of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub protocol: String,
    pub peer: PeerId,
    pub security: SecurityMode,
}

impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.protocol, self.peer, self.security)
    }
}

impl FromStr for Proposal {
    type Err = BenchError;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(protocol), Some(peer), Some(security), None) if protocol.starts_with('/') => {
                Ok(Self {
                    protocol: protocol.to_string(),
                    peer: peer.parse().map_err(|_| {
                        BenchError::transport(format!("Invalid peer id in proposal '{}'", line))
                    })?,
                    security: security.parse()?,
                })
            }
            _ => Err(BenchError::transport(format!(
                "Malformed stream proposal '{}'",
                line
            ))),
        }
    }
}

/// Acceptor's reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Accept(PeerId),
    Reject(String),
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Accept(peer) => write!(f, "ok {}", peer),
            Answer::Reject(reason) => write!(f, "na {}", reason),
        }
    }
}

impl FromStr for Answer {
    type Err = BenchError;

    fn from_str(line: &str) -> Result<Self> {
        match line.split_once(' ') {
            Some(("ok", peer)) => Ok(Answer::Accept(peer.trim().parse().map_err(|_| {
                BenchError::transport(format!("Invalid peer id in answer '{}'", line))
            })?)),
            Some(("na", reason)) => Ok(Answer::Reject(reason.trim().to_string())),
            _ => Err(BenchError::transport(format!(
                "Malformed negotiation answer '{}'",
                line
            ))),
        }
    }
}

/// Decide how to answer a proposal
pub fn evaluate(
    proposal: &Proposal,
    local: PeerId,
    security: SecurityMode,
    supported: bool,
) -> Answer {
    if proposal.security != security {
        Answer::Reject(format!(
            "security mismatch: remote is {}, local is {}",
            proposal.security, security
        ))
    } else if !supported {
        Answer::Reject(format!("protocol {} not supported", proposal.protocol))
    } else {
        Answer::Accept(local)
    }
}

async fn read_message<S>(io: &mut BufReader<S>) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let n = (&mut *io)
        .take(MAX_LINE_LENGTH as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Err(BenchError::transport("Stream closed during negotiation"));
    }
    if line.pop() != Some(b'\n') {
        return Err(BenchError::transport("Unterminated negotiation line"));
    }
    String::from_utf8(line).map_err(|_| BenchError::transport("Negotiation line is not UTF-8"))
}

async fn write_message<S, M>(io: &mut BufReader<S>, message: &M) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    M: fmt::Display,
{
    io.write_all(format!("{}\n", message).as_bytes()).await?;
    io.flush().await?;
    Ok(())
}

/// Opener side: send the proposal and wait for the answer
///
/// Returns the remote peer id on acceptance.
pub async fn propose<S>(io: &mut BufReader<S>, proposal: &Proposal) -> Result<PeerId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = async {
        write_message(io, proposal).await?;
        read_message(io).await?.parse::<Answer>()
    };

    match timeout(NEGOTIATION_TIMEOUT, exchange).await {
        Ok(Ok(Answer::Accept(peer))) => Ok(peer),
        Ok(Ok(Answer::Reject(reason))) => Err(BenchError::transport(format!(
            "Peer rejected {}: {}",
            proposal.protocol, reason
        ))),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BenchError::transport(format!(
            "Negotiation of {} timed out",
            proposal.protocol
        ))),
    }
}

/// Acceptor side: read the opening proposal
pub async fn receive<S>(io: &mut BufReader<S>) -> Result<Proposal>
where
    S: AsyncRead + Unpin,
{
    timeout(NEGOTIATION_TIMEOUT, read_message(io))
        .await
        .map_err(|_| BenchError::transport("Timed out waiting for stream proposal"))??
        .parse()
}

/// Acceptor side: send the answer
pub async fn answer<S>(io: &mut BufReader<S>, reply: &Answer) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(NEGOTIATION_TIMEOUT, write_message(io, reply))
        .await
        .map_err(|_| BenchError::transport("Timed out sending negotiation answer"))?
}
