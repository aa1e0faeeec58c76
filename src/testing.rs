// Test doubles for the session contracts and builders for backend replies

use crate::protocol::{
    EofPacket, ErrorPacket, FieldPacket, OkPacket, Packet, ResultSetHeader, RowDataPacket,
    HEADER_SIZE,
};
use crate::session::{BackendConnection, Datasource, FrontConnection, Session};
use crate::sharding::ShardId;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

/// Front connection that keeps every flushed buffer
#[derive(Default)]
pub struct RecordingFront {
    flushes: Mutex<Vec<BytesMut>>,
}

impl RecordingFront {
    /// Number of times a buffer was flushed
    pub fn flush_count(&self) -> usize {
        self.flushes.lock().len()
    }

    /// Every packet written so far, in order
    pub fn packets(&self) -> Vec<Packet> {
        let mut packets = Vec::new();
        for flush in self.flushes.lock().iter() {
            let mut rest: &[u8] = flush;
            while rest.len() >= HEADER_SIZE {
                let len = u32::from_le_bytes([rest[0], rest[1], rest[2], 0]) as usize;
                let (raw, tail) = rest.split_at(HEADER_SIZE + len);
                packets.push(Packet::from_bytes(raw).unwrap());
                rest = tail;
            }
        }
        packets
    }

    pub fn sequence_ids(&self) -> Vec<u8> {
        self.packets().iter().map(Packet::sequence).collect()
    }
}

impl FrontConnection for RecordingFront {
    fn write_to_buffer(&self, packet: &Packet, buffer: &mut BytesMut) {
        packet.write_to(buffer);
    }

    fn write(&self, buffer: BytesMut) {
        self.flushes.lock().push(buffer);
    }
}

/// Session that records releases and savepoints
#[derive(Default)]
pub struct TestSession {
    pub front: RecordingFront,
    pub in_transaction: bool,
    released: Mutex<Vec<u64>>,
    savepoints: Mutex<Vec<(OkPacket, u8)>>,
}

impl TestSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transactional() -> Arc<Self> {
        Arc::new(Self {
            in_transaction: true,
            ..Self::default()
        })
    }

    pub fn released(&self) -> Vec<u64> {
        let mut ids = self.released.lock().clone();
        ids.sort_unstable();
        ids
    }

    pub fn savepoints(&self) -> Vec<(OkPacket, u8)> {
        self.savepoints.lock().clone()
    }
}

impl Session for TestSession {
    fn front(&self) -> &dyn FrontConnection {
        &self.front
    }

    fn release(&self, connection: &BackendConnection) {
        self.released.lock().push(connection.id());
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn savepoint(&self, ok: OkPacket, sequence: u8) {
        self.savepoints.lock().push((ok, sequence));
    }
}

pub fn connection(id: u64, shard: ShardId) -> BackendConnection {
    BackendConnection::new(
        id,
        Arc::new(Datasource {
            host: format!("10.0.0.{}", shard),
            port: 3306,
            database: format!("shop_{}", shard),
            shard,
        }),
    )
}

/// Backend packets carry the backend's own sequence ids; use odd ones so
/// tests notice when a packet is forwarded without renumbering.
pub fn ok_reply(affected_rows: u64, insert_id: u64) -> Packet {
    OkPacket::new(affected_rows, insert_id).to_packet(1)
}

pub fn error_reply(code: u16, message: &str) -> Packet {
    ErrorPacket::new(code, "HY000", message).to_packet(1)
}

pub fn eof_reply() -> Packet {
    EofPacket::default().to_packet(42)
}

/// Header, column definitions and EOF for the given (name, type) columns
pub fn field_reply(columns: &[(&str, u8)]) -> (Packet, Vec<Packet>, Packet) {
    let header = ResultSetHeader {
        field_count: columns.len() as u64,
    }
    .to_packet(1);
    let fields = columns
        .iter()
        .enumerate()
        .map(|(i, (name, column_type))| FieldPacket::new(name, *column_type).to_packet(2 + i as u8))
        .collect();
    let eof = EofPacket::default().to_packet(200);
    (header, fields, eof)
}

pub fn row_reply(values: &[&str]) -> Packet {
    RowDataPacket::new(
        values
            .iter()
            .map(|v| Some(Bytes::copy_from_slice(v.as_bytes())))
            .collect(),
    )
    .to_packet(77)
}

/// Text of one column of a row packet written to the client
pub fn row_text(packet: &Packet, field_count: usize, column: usize) -> String {
    let row = RowDataPacket::read(packet, field_count).unwrap();
    String::from_utf8(row.values[column].as_ref().unwrap().to_vec()).unwrap()
}
