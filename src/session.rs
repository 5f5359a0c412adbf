use std::fmt;
use std::net::IpAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

use crate::codec::LineBuffer;

/// Stable identity for one TCP connection.
///
/// Sessions are keyed by this id in every pool and map; the socket itself
/// is never used as a key, so a reconnecting client is always a fresh
/// session and never lands back in a running game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-connection state, owned by the arbiter loop.
///
/// The write half lives here; the read half is handed to the connection's
/// reader task at accept time. `name` stays `None` until `ATH` succeeds and
/// is immutable afterwards.
pub struct Session {
    pub id: SessionId,
    pub ip: IpAddr,
    pub name: Option<String>,
    pub lines: LineBuffer,
    writer: OwnedWriteHalf,
}

impl Session {
    pub fn new(id: SessionId, ip: IpAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            ip,
            name: None,
            lines: LineBuffer::new(),
            writer,
        }
    }

    /// Write one protocol line onto the socket. The trailing newline is
    /// appended here, so callers always hand over bare messages.
    pub async fn send(&mut self, line: &str) -> std::io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await
    }

    pub fn authed(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
