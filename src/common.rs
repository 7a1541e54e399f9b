//! Shared identifiers used across the dialer and listener

use std::fmt;

/// Index of a dialed connection within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a stream within its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StreamId {
    pub connection: ConnectionId,
    pub index: u32,
}

impl StreamId {
    pub fn new(connection: ConnectionId, index: u32) -> Self {
        Self { connection, index }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.connection, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_display() {
        let id = StreamId::new(ConnectionId::new(3), 17);
        assert_eq!(id.to_string(), "3.17");
        assert_eq!(id.connection.get(), 3);
    }

    #[test]
    fn test_stream_ids_order_by_connection_first() {
        let a = StreamId::new(ConnectionId(1), 9);
        let b = StreamId::new(ConnectionId(2), 0);
        assert!(a < b);
    }
}
