// Single-shard relay
// When a statement reaches exactly one shard there is nothing to merge:
// every packet is forwarded as it arrives, with the backend's sequence id
// replaced by the next client-facing one.

use super::ResultHandler;
use crate::error::ProxyError;
use crate::protocol::{OkPacket, Packet, Sequence};
use crate::session::{BackendConnection, Session};
use crate::stats::{Recorder, SqlRecord};
use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, warn};

/// Client-facing state of the relay
#[derive(Default)]
struct RelayState {
    sequence: Sequence,
    /// Packets of a result set not yet flushed
    buffer: BytesMut,
}

/// Relays one backend's reply to the client
pub struct SingleNodeHandler {
    session: Arc<dyn Session>,
    recorder: Arc<dyn Recorder>,
    sql: RwLock<String>,
    state: Mutex<RelayState>,
}

impl SingleNodeHandler {
    pub fn new(session: Arc<dyn Session>, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            session,
            recorder,
            sql: RwLock::new(String::new()),
            state: Mutex::new(RelayState::default()),
        }
    }

    fn record(&self, connection: &BackendConnection) {
        let sql = self.sql.read();
        self.recorder.record(SqlRecord::completed(connection, &sql));
    }
}

impl ResultHandler for SingleNodeHandler {
    fn ok(&self, packet: &Packet, connection: &BackendConnection) {
        self.record(connection);
        self.session.release(connection);

        let sequence = self.state.lock().sequence.next_id();
        if !self.session.in_transaction() {
            self.session.front().write_packet(&packet.with_sequence(sequence));
            return;
        }

        // The transaction needs the decoded reply to defer it
        match OkPacket::read(packet) {
            Ok(ok) => self.session.savepoint(ok, sequence),
            Err(e) => {
                warn!(shard = connection.shard(), error = %e, "malformed OK from backend");
                let err = ProxyError::Internal(format!("malformed OK packet: {}", e));
                self.session.front().write_packet(&err.to_packet().to_packet(sequence));
            }
        }
    }

    fn error(&self, packet: &Packet, connection: &BackendConnection) {
        self.session.release(connection);
        debug!(shard = connection.shard(), "backend error relayed");

        let mut state = self.state.lock();
        let packet = state.sequence.stamp(packet);
        // A partially relayed result set goes out ahead of the error
        let mut buffer = std::mem::take(&mut state.buffer);
        let front = self.session.front();
        front.write_to_buffer(&packet, &mut buffer);
        front.write(buffer);
    }

    fn field(&self, header: &Packet, fields: &[Packet], eof: &Packet, _connection: &BackendConnection) {
        let front = self.session.front();
        let mut guard = self.state.lock();
        let RelayState { sequence, buffer } = &mut *guard;

        front.write_to_buffer(&sequence.stamp(header), buffer);
        for field in fields {
            front.write_to_buffer(&sequence.stamp(field), buffer);
        }
        front.write_to_buffer(&sequence.stamp(eof), buffer);
    }

    fn row(&self, row: &Packet, _connection: &BackendConnection) {
        let front = self.session.front();
        let mut guard = self.state.lock();
        let RelayState { sequence, buffer } = &mut *guard;
        front.write_to_buffer(&sequence.stamp(row), buffer);
    }

    fn eof(&self, eof: &Packet, connection: &BackendConnection) {
        self.record(connection);
        self.session.release(connection);

        let front = self.session.front();
        let mut state = self.state.lock();
        let eof = state.sequence.stamp(eof);
        let mut buffer = std::mem::take(&mut state.buffer);
        front.write_to_buffer(&eof, &mut buffer);
        front.write(buffer);
    }

    fn close(&self, reason: &str) {
        warn!(reason, "backend connection closed before replying");
        let err = ProxyError::Connection(reason.to_string()).to_packet();

        let front = self.session.front();
        let mut state = self.state.lock();
        let packet = err.to_packet(state.sequence.next_id());
        let mut buffer = std::mem::take(&mut state.buffer);
        front.write_to_buffer(&packet, &mut buffer);
        front.write(buffer);
    }

    fn set_sql(&self, sql: &str) {
        *self.sql.write() = sql.to_string();
    }
}
