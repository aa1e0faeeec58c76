// Session and connection contracts
// The client session, its front connection and the backend connections are
// owned by the surrounding server. The response handlers only need the
// narrow view defined here.

use crate::protocol::{OkPacket, Packet};
use crate::sharding::ShardId;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Where a backend connection points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datasource {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub shard: ShardId,
}

/// A backend connection currently executing a statement for a session
#[derive(Debug, Clone)]
pub struct BackendConnection {
    id: u64,
    datasource: Arc<Datasource>,
    last_active: Instant,
}

impl BackendConnection {
    pub fn new(id: u64, datasource: Arc<Datasource>) -> Self {
        Self {
            id,
            datasource,
            last_active: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shard(&self) -> ShardId {
        self.datasource.shard
    }

    pub fn datasource(&self) -> &Datasource {
        &self.datasource
    }

    /// When the statement was sent on this connection
    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    /// Mark the connection active, e.g. when a statement is written to it
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

/// The client-facing connection
pub trait FrontConnection: Send + Sync {
    /// Append a packet to an outgoing buffer
    ///
    /// The connection decides when the buffer has grown enough to be drained
    /// to the socket; handlers only ever append.
    fn write_to_buffer(&self, packet: &Packet, buffer: &mut BytesMut);

    /// Flush a buffer to the client
    fn write(&self, buffer: BytesMut);

    /// Write a single packet and flush it
    fn write_packet(&self, packet: &Packet) {
        let mut buffer = BytesMut::with_capacity(packet.encoded_len());
        self.write_to_buffer(packet, &mut buffer);
        self.write(buffer);
    }
}

/// The client session a statement runs in
pub trait Session: Send + Sync {
    fn front(&self) -> &dyn FrontConnection;

    /// Return a backend connection once its reply is complete
    ///
    /// Must tolerate being called twice for the same connection: a
    /// connection released on a failed field setup still reports its eof.
    fn release(&self, connection: &BackendConnection);

    /// True while an explicit transaction is open
    fn in_transaction(&self) -> bool;

    /// Defer an OK reply under an open transaction
    ///
    /// The transaction decides when (and merged with what) the OK reaches
    /// the client. `sequence` is the id the reply would have carried.
    fn savepoint(&self, ok: OkPacket, sequence: u8);
}

/// A front connection over any `Write`, draining when the buffer grows
/// past a fixed threshold
pub struct WriterFront<W: Write + Send> {
    writer: Mutex<W>,
    flush_threshold: usize,
}

impl<W: Write + Send> WriterFront<W> {
    pub fn new(writer: W, flush_threshold: usize) -> Self {
        Self {
            writer: Mutex::new(writer),
            flush_threshold,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn drain(&self, buffer: &[u8]) {
        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_all(buffer).and_then(|_| writer.flush()) {
            warn!(error = %e, bytes = buffer.len(), "failed to write to client");
        }
    }
}

impl<W: Write + Send> FrontConnection for WriterFront<W> {
    fn write_to_buffer(&self, packet: &Packet, buffer: &mut BytesMut) {
        packet.write_to(buffer);
        if buffer.len() >= self.flush_threshold {
            let chunk = buffer.split();
            self.drain(&chunk);
        }
    }

    fn write(&self, buffer: BytesMut) {
        if !buffer.is_empty() {
            self.drain(&buffer);
        }
    }
}
