//! Application-wide constants and configuration values

use std::time::Duration;

// Ramp limits
pub const MAX_CONNECTIONS_LIMIT: u32 = 10_000;
pub const MAX_STREAMS_PER_CONNECTION: u32 = 100_000;

// Dialer pacing
pub const CONNECTION_OPEN_INTERVAL: Duration = Duration::from_secs(1);
pub const STREAM_OPEN_INTERVAL: Duration = Duration::from_millis(100);
pub const WRITE_INTERVAL: Duration = Duration::from_millis(500);

/// Read/write deadline applied to every echo cycle on both sides
pub const STREAM_DEADLINE: Duration = Duration::from_secs(5);

// Echo protocol
pub const ECHO_PROTOCOL: &str = "/echo/1.0.0";
pub const PAYLOAD_SIZE: usize = 1024;
pub const PAYLOAD_FILL: u8 = b'0';

/// Largest line accepted by the echo handler and the negotiation reader
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

// Host defaults
pub const DEFAULT_LISTEN_PORT: u16 = 9999;
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause after a failed `accept` before trying again
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// Stream multiplexing
pub const MUX_MAX_FRAME_DATA: usize = 64 * 1024;
/// Frames queued towards the socket before stream writers wait
pub const MUX_OUTBOUND_CAPACITY: usize = 256;

// Telemetry
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Build the fixed echo payload: `PAYLOAD_SIZE - 1` fill bytes and a newline
pub fn echo_payload() -> Vec<u8> {
    let mut payload = vec![PAYLOAD_FILL; PAYLOAD_SIZE];
    payload[PAYLOAD_SIZE - 1] = b'\n';
    payload
}
