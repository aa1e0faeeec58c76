// Multi-shard coordinator
// A statement sent to N shards gets N replies, in any order and on any
// thread. The coordinator accumulates them and answers the client exactly
// once, when the last reply arrives.
//
// Synchronization:
// - `remaining` counts outstanding replies. Exactly one decrement reaches
//   zero, and that caller alone writes the client response.
// - `failure` holds the first error. Later errors are dropped.
// - `state` guards everything else shared by the callbacks: the running
//   OK totals, the one-time field setup and the merger.

use super::ResultHandler;
use crate::error::ProxyError;
use crate::merger::{ColumnInfo, Merger};
use crate::protocol::{ErrorPacket, FieldPacket, OkPacket, Packet, PacketError, Sequence};
use crate::session::{BackendConnection, Session};
use crate::stats::{Recorder, SqlRecord};
use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Column definitions kept until the merged result is written
struct FieldSet {
    header: Packet,
    fields: Vec<Packet>,
    eof: Packet,
}

/// Per-statement state shared by all shard callbacks
struct Accumulator {
    affected_rows: u64,
    /// Smallest nonzero insert id seen, 0 if none
    insert_id: u64,
    /// Set by the first field callback, whether or not setup succeeds
    fields_initialized: bool,
    fields: Option<FieldSet>,
    merger: Box<dyn Merger>,
}

/// Coordinates the replies of every shard a statement was sent to
pub struct MultiNodeHandler {
    session: Arc<dyn Session>,
    recorder: Arc<dyn Recorder>,
    sql: RwLock<String>,
    remaining: AtomicUsize,
    failure: OnceLock<ErrorPacket>,
    state: Mutex<Accumulator>,
}

impl MultiNodeHandler {
    /// Create a coordinator expecting `shards` replies
    pub fn new(
        session: Arc<dyn Session>,
        merger: Box<dyn Merger>,
        shards: usize,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        Self {
            session,
            recorder,
            sql: RwLock::new(String::new()),
            remaining: AtomicUsize::new(shards),
            failure: OnceLock::new(),
            state: Mutex::new(Accumulator {
                affected_rows: 0,
                insert_id: 0,
                fields_initialized: false,
                fields: None,
                merger,
            }),
        }
    }

    /// Replies still outstanding
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// True once any shard has failed
    pub fn failed(&self) -> bool {
        self.failure.get().is_some()
    }

    /// Count one reply; true for the caller that accounts for the last one
    ///
    /// AcqRel makes a failure stored before any decrement visible to
    /// whoever observes zero.
    fn decrement(&self) -> bool {
        match self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous == 1,
            Err(_) => {
                // More replies than dispatched shards
                warn!("reply received after the statement completed");
                false
            }
        }
    }

    /// Record a failure unless an earlier one exists
    fn fail(&self, err: ErrorPacket) {
        if let Err(discarded) = self.failure.set(err) {
            debug!(code = discarded.code, message = %discarded.message, "later shard failure discarded");
        }
    }

    /// Write the stored failure as the whole response
    fn respond_failure(&self) {
        let err = self.failure.get().cloned().unwrap_or_else(|| {
            ProxyError::Internal("statement failed without an error".to_string()).to_packet()
        });
        warn!(code = err.code, message = %err.message, "multi-shard statement failed");

        // Nothing was flushed before the barrier, so the error is the first packet
        let mut sequence = Sequence::new();
        self.session.front().write_packet(&err.to_packet(sequence.next_id()));
    }

    fn record(&self, connection: &BackendConnection) {
        let sql = self.sql.read();
        self.recorder.record(SqlRecord::completed(connection, &sql));
    }

    /// Decode the column layout and prime the merger
    fn init_fields(
        state: &mut Accumulator,
        header: &Packet,
        fields: &[Packet],
        eof: &Packet,
    ) -> Result<(), ProxyError> {
        let mut columns = HashMap::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            let packet = FieldPacket::read(field)
                .map_err(|e: PacketError| ProxyError::Internal(format!("malformed field packet: {}", e)))?;
            columns.insert(packet.name.to_uppercase(), ColumnInfo::new(index, packet.column_type));
        }
        state
            .merger
            .init(columns, fields.len())
            .map_err(|e| ProxyError::Internal(e.to_string()))?;
        state.fields = Some(FieldSet {
            header: header.clone(),
            fields: fields.to_vec(),
            eof: eof.clone(),
        });
        Ok(())
    }

    /// Write the merged OK once every shard succeeded
    fn respond_ok(&self, template: OkPacket) {
        let (affected_rows, insert_id) = {
            let state = self.state.lock();
            (state.affected_rows, state.insert_id)
        };
        let ok = OkPacket {
            affected_rows,
            insert_id,
            ..template
        };
        debug!(affected_rows, insert_id, "multi-shard statement succeeded");

        let sequence = Sequence::new().next_id();
        if self.session.in_transaction() {
            self.session.savepoint(ok, sequence);
        } else {
            self.session.front().write_packet(&ok.to_packet(sequence));
        }
    }

    /// Write fields, the paginated merged rows and the final EOF in one flush
    fn respond_rows(&self, eof: &Packet) {
        let front = self.session.front();
        let mut state = self.state.lock();
        let mut sequence = Sequence::new();
        let mut buffer = BytesMut::new();

        if let Some(fields) = state.fields.take() {
            front.write_to_buffer(&sequence.stamp(&fields.header), &mut buffer);
            for field in &fields.fields {
                front.write_to_buffer(&sequence.stamp(field), &mut buffer);
            }
            front.write_to_buffer(&sequence.stamp(&fields.eof), &mut buffer);
        }

        let pagination = state.merger.pagination();
        let rows = state.merger.take_result();
        let total = rows.len();
        let limit = pagination.limit.unwrap_or(usize::MAX);
        for row in rows.into_iter().skip(pagination.offset).take(limit) {
            front.write_to_buffer(&row.to_packet(sequence.next_id()), &mut buffer);
        }
        debug!(
            merged = total,
            emitted = pagination.emitted(total),
            "multi-shard result set complete"
        );

        front.write_to_buffer(&sequence.stamp(eof), &mut buffer);
        front.write(buffer);
    }
}

impl ResultHandler for MultiNodeHandler {
    fn ok(&self, packet: &Packet, connection: &BackendConnection) {
        self.record(connection);
        self.session.release(connection);

        if self.failed() {
            if self.decrement() {
                self.respond_failure();
            }
            return;
        }

        let ok = match OkPacket::read(packet) {
            Ok(ok) => {
                let mut state = self.state.lock();
                state.affected_rows += ok.affected_rows;
                if ok.insert_id > 0 {
                    state.insert_id = match state.insert_id {
                        0 => ok.insert_id,
                        current => current.min(ok.insert_id),
                    };
                }
                Some(ok)
            }
            Err(e) => {
                warn!(shard = connection.shard(), error = %e, "malformed OK from backend");
                self.fail(ProxyError::Internal(format!("malformed OK packet: {}", e)).to_packet());
                None
            }
        };

        if self.decrement() {
            // Another shard may have failed after the check above
            match ok {
                Some(ok) if !self.failed() => self.respond_ok(ok),
                _ => self.respond_failure(),
            }
        }
    }

    fn error(&self, packet: &Packet, connection: &BackendConnection) {
        self.session.release(connection);

        let err = match ErrorPacket::read(packet) {
            Ok(reply) => ProxyError::Backend {
                code: reply.code,
                sql_state: reply.sql_state,
                message: reply.message,
            },
            Err(e) => ProxyError::Internal(format!("malformed error packet: {}", e)),
        };
        warn!(shard = connection.shard(), code = err.code(), error = %err, "shard failed");
        self.fail(err.to_packet());

        if self.decrement() {
            self.respond_failure();
        }
    }

    fn field(&self, header: &Packet, fields: &[Packet], eof: &Packet, connection: &BackendConnection) {
        if self.failed() {
            return;
        }

        let mut state = self.state.lock();
        // Every shard sends the same layout; the first one wins
        if state.fields_initialized {
            return;
        }
        state.fields_initialized = true;
        if let Err(err) = Self::init_fields(&mut state, header, fields, eof) {
            warn!(shard = connection.shard(), error = %err, "field setup failed");
            self.fail(err.to_packet());
            drop(state);
            self.session.release(connection);
        }
    }

    fn row(&self, row: &Packet, connection: &BackendConnection) {
        if self.failed() {
            return;
        }

        let offered = self.state.lock().merger.offer(row);
        if let Err(e) = offered {
            warn!(shard = connection.shard(), error = %e, "row rejected by merger");
            self.fail(ProxyError::Internal(e.to_string()).to_packet());
        }
    }

    fn eof(&self, eof: &Packet, connection: &BackendConnection) {
        self.record(connection);
        self.session.release(connection);

        if self.decrement() {
            if self.failed() {
                self.respond_failure();
            } else {
                self.respond_rows(eof);
            }
        }
    }

    fn close(&self, reason: &str) {
        warn!(reason, "backend connection closed before replying");
        self.fail(ProxyError::Connection(reason.to_string()).to_packet());

        if self.decrement() {
            self.respond_failure();
        }
    }

    fn set_sql(&self, sql: &str) {
        *self.sql.write() = sql.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::RowMerger;
    use crate::protocol::RowDataPacket;
    use crate::query::parser::OrderKey;
    use crate::route::Pagination;
    use crate::stats::SqlStatistics;
    use crate::testing::*;
    use std::collections::{HashSet, VecDeque};
    use std::thread;

    fn handler(session: &Arc<TestSession>, shards: usize, merger: Box<dyn Merger>) -> MultiNodeHandler {
        let handler = MultiNodeHandler::new(
            session.clone(),
            merger,
            shards,
            Arc::new(SqlStatistics::default()),
        );
        handler.set_sql("SELECT * FROM users");
        handler
    }

    fn plain(session: &Arc<TestSession>, shards: usize) -> MultiNodeHandler {
        handler(session, shards, Box::new(RowMerger::new(Pagination::default(), Vec::new())))
    }

    fn single_error(session: &TestSession) -> ErrorPacket {
        let packets = session.front.packets();
        assert_eq!(packets.len(), 1, "exactly one response packet");
        assert_eq!(packets[0].sequence(), 1);
        ErrorPacket::read(&packets[0]).unwrap()
    }

    #[test]
    fn test_ok_totals_merge() {
        let session = TestSession::new();
        let handler = plain(&session, 3);

        handler.ok(&ok_reply(2, 0), &connection(1, 0));
        handler.ok(&ok_reply(5, 40), &connection(2, 1));
        assert_eq!(session.front.flush_count(), 0);
        handler.ok(&ok_reply(1, 12), &connection(3, 2));

        let packets = session.front.packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].sequence(), 1);
        let ok = OkPacket::read(&packets[0]).unwrap();
        assert_eq!(ok.affected_rows, 8);
        assert_eq!(ok.insert_id, 12);
        assert_eq!(session.released(), vec![1, 2, 3]);
    }

    #[test]
    fn test_insert_id_zero_when_all_zero() {
        let session = TestSession::new();
        let handler = plain(&session, 2);
        handler.ok(&ok_reply(1, 0), &connection(1, 0));
        handler.ok(&ok_reply(1, 0), &connection(2, 1));

        let ok = OkPacket::read(&session.front.packets()[0]).unwrap();
        assert_eq!(ok.insert_id, 0);
    }

    #[test]
    fn test_merged_ok_is_deferred_in_transaction() {
        let session = TestSession::transactional();
        let handler = plain(&session, 2);
        handler.ok(&ok_reply(1, 0), &connection(1, 0));
        handler.ok(&ok_reply(4, 0), &connection(2, 1));

        assert_eq!(session.front.flush_count(), 0);
        let savepoints = session.savepoints();
        assert_eq!(savepoints.len(), 1);
        assert_eq!(savepoints[0].0.affected_rows, 5);
        assert_eq!(savepoints[0].1, 1);
    }

    #[test]
    fn test_failure_wins_in_either_order() {
        let run = |error_first: bool| {
            let session = TestSession::new();
            let handler = plain(&session, 2);
            let err = error_reply(1062, "Duplicate entry '7'");
            if error_first {
                handler.error(&err, &connection(1, 0));
                handler.ok(&ok_reply(3, 0), &connection(2, 1));
            } else {
                handler.ok(&ok_reply(3, 0), &connection(2, 1));
                handler.error(&err, &connection(1, 0));
            }
            assert_eq!(session.released(), vec![1, 2]);
            session.front.packets()
        };

        let a = run(true);
        let b = run(false);
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
        let err = ErrorPacket::read(&a[0]).unwrap();
        assert_eq!(err.code, 1062);
        assert_eq!(err.message, "Duplicate entry '7'");
    }

    #[test]
    fn test_first_error_wins() {
        let session = TestSession::new();
        let handler = plain(&session, 3);
        handler.error(&error_reply(1205, "Lock wait timeout"), &connection(1, 0));
        handler.error(&error_reply(1213, "Deadlock found"), &connection(2, 1));
        assert_eq!(session.front.flush_count(), 0);
        handler.ok(&ok_reply(1, 0), &connection(3, 2));

        assert_eq!(single_error(&session).code, 1205);
    }

    #[test]
    fn test_close_counts_as_a_reply() {
        let session = TestSession::new();
        let handler = plain(&session, 2);
        handler.ok(&ok_reply(1, 0), &connection(1, 0));
        handler.close("backend 10.0.0.1 went away");

        let err = single_error(&session);
        assert_eq!(err.code, 2013);
        assert!(err.message.contains("went away"));
        assert_eq!(handler.remaining(), 0);
    }

    #[test]
    fn test_close_before_success_still_fails_statement() {
        let session = TestSession::new();
        let handler = plain(&session, 2);
        handler.close("reset");
        handler.ok(&ok_reply(1, 0), &connection(2, 1));

        assert_eq!(single_error(&session).code, 2013);
    }

    #[test]
    fn test_extra_replies_are_ignored() {
        let session = TestSession::new();
        let handler = plain(&session, 1);
        handler.ok(&ok_reply(1, 0), &connection(1, 0));
        handler.ok(&ok_reply(1, 0), &connection(1, 0));
        handler.close("late");

        assert_eq!(session.front.packets().len(), 1);
    }

    #[test]
    fn test_concurrent_surplus_replies_keep_count_at_zero() {
        let session = TestSession::new();
        let handler = plain(&session, 1);
        handler.ok(&ok_reply(1, 0), &connection(1, 0));

        thread::scope(|scope| {
            for _ in 0..8 {
                let handler = &handler;
                scope.spawn(move || handler.close("late"));
            }
        });

        assert_eq!(handler.remaining(), 0);
        assert_eq!(session.front.packets().len(), 1);
    }

    #[test]
    fn test_backend_error_keeps_sql_state() {
        let session = TestSession::new();
        let handler = plain(&session, 2);
        let reply = ErrorPacket::new(1062, "23000", "Duplicate entry '3'").to_packet(1);
        handler.error(&reply, &connection(1, 0));
        handler.ok(&ok_reply(1, 0), &connection(2, 1));

        let err = single_error(&session);
        assert_eq!(err.code, 1062);
        assert_eq!(err.sql_state, "23000");
        assert_eq!(err.message, "Duplicate entry '3'");
    }

    fn deliver_result_set(handler: &MultiNodeHandler, con: &BackendConnection, ids: &[&str]) {
        let (header, fields, eof) = field_reply(&[("id", 0x08), ("name", 0xfd)]);
        handler.field(&header, &fields, &eof, con);
        for id in ids {
            handler.row(&row_reply(&[id, "n"]), con);
        }
        handler.eof(&eof_reply(), con);
    }

    #[test]
    fn test_result_set_written_once_with_contiguous_ids() {
        let session = TestSession::new();
        let order = vec![OrderKey {
            column: "ID".into(),
            ascending: true,
        }];
        let handler = handler(&session, 3, Box::new(RowMerger::new(Pagination::default(), order)));

        deliver_result_set(&handler, &connection(1, 0), &["5", "2"]);
        deliver_result_set(&handler, &connection(2, 1), &["9"]);
        assert_eq!(session.front.flush_count(), 0);
        deliver_result_set(&handler, &connection(3, 2), &["1", "7"]);

        assert_eq!(session.front.flush_count(), 1);
        // header, 2 fields, eof, 5 rows, eof
        assert_eq!(session.front.sequence_ids(), (1..=10).collect::<Vec<u8>>());

        let packets = session.front.packets();
        let ids: Vec<String> = packets[4..9].iter().map(|p| row_text(p, 2, 0)).collect();
        assert_eq!(ids, vec!["1", "2", "5", "7", "9"]);
        let field = FieldPacket::read(&packets[1]).unwrap();
        assert_eq!(field.name, "id");
    }

    #[test]
    fn test_pagination_window() {
        // (offset, limit, expected ids)
        let cases: [(usize, Option<usize>, &[&str]); 5] = [
            (0, None, &["1", "2", "3", "4", "5"]),
            (1, Some(2), &["2", "3"]),
            (3, Some(10), &["4", "5"]),
            (5, Some(1), &[]),
            (2, None, &["3", "4", "5"]),
        ];
        for (offset, limit, expected) in cases {
            let session = TestSession::new();
            let order = vec![OrderKey {
                column: "ID".into(),
                ascending: true,
            }];
            let merger = RowMerger::new(Pagination::new(offset, limit), order);
            let handler = handler(&session, 2, Box::new(merger));

            deliver_result_set(&handler, &connection(1, 0), &["4", "1", "5"]);
            deliver_result_set(&handler, &connection(2, 1), &["3", "2"]);

            let packets = session.front.packets();
            // header + 2 fields + eof before the rows, eof after
            let rows = &packets[4..packets.len() - 1];
            let ids: Vec<String> = rows.iter().map(|p| row_text(p, 2, 0)).collect();
            assert_eq!(ids, expected, "offset {} limit {:?}", offset, limit);
            let count = packets.len() as u8;
            assert_eq!(session.front.sequence_ids(), (1..=count).collect::<Vec<u8>>());
        }
    }

    #[test]
    fn test_failed_result_set_reports_error_only() {
        let session = TestSession::new();
        let handler = plain(&session, 2);

        deliver_result_set(&handler, &connection(1, 0), &["1", "2"]);
        handler.error(&error_reply(1054, "Unknown column 'x'"), &connection(2, 1));

        assert_eq!(single_error(&session).code, 1054);
    }

    #[test]
    fn test_field_setup_failure_marks_statement_failed() {
        let session = TestSession::new();
        let order = vec![OrderKey {
            column: "AGE".into(),
            ascending: true,
        }];
        let handler = handler(&session, 2, Box::new(RowMerger::new(Pagination::default(), order)));
        let con = connection(1, 0);

        let (header, fields, eof) = field_reply(&[("id", 0x08)]);
        handler.field(&header, &fields, &eof, &con);
        assert!(handler.failed());
        assert_eq!(session.released(), vec![1]);

        handler.row(&row_reply(&["1"]), &con);
        handler.eof(&eof_reply(), &con);
        deliver_result_set(&handler, &connection(2, 1), &["2"]);

        let err = single_error(&session);
        assert_eq!(err.code, 1003);
        assert!(err.message.contains("AGE"));
    }

    #[test]
    fn test_malformed_field_packet() {
        let session = TestSession::new();
        let handler = plain(&session, 1);
        let con = connection(1, 0);
        let (header, _, eof) = field_reply(&[]);

        handler.field(&header, &[Packet::new(2, vec![0x03, b'd'])], &eof, &con);
        handler.eof(&eof_reply(), &con);

        assert_eq!(single_error(&session).code, 1003);
    }

    /// A column definition whose name is latin1 "prénom"
    fn latin1_field() -> Packet {
        let utf8 = FieldPacket::new("prXnom", 0xfd).to_packet(2);
        let payload: Vec<u8> = utf8
            .payload()
            .iter()
            .map(|b| if *b == b'X' { 0xe9 } else { *b })
            .collect();
        Packet::new(2, payload)
    }

    #[test]
    fn test_field_names_outside_utf8() {
        let session = TestSession::new();
        let handler = plain(&session, 2);
        let (header, _, eof) = field_reply(&[("n", 0xfd)]);

        for (id, name) in [(1, "Zoe"), (2, "Ana")] {
            let con = connection(id, id as u32);
            handler.field(&header, &[latin1_field()], &eof, &con);
            handler.row(&row_reply(&[name]), &con);
            handler.eof(&eof_reply(), &con);
        }

        assert!(!handler.failed());
        let packets = session.front.packets();
        // header, field, eof, 2 rows, eof
        assert_eq!(session.front.sequence_ids(), vec![1, 2, 3, 4, 5, 6]);
        assert!(packets[1].payload().contains(&0xe9));
        assert_eq!(row_text(&packets[3], 1, 0), "Zoe");
    }

    /// Merger whose layout check always fails, counting how often it ran
    struct RejectingMerger {
        inits: Arc<AtomicUsize>,
    }

    impl Merger for RejectingMerger {
        fn init(&mut self, _columns: HashMap<String, ColumnInfo>, _field_count: usize) -> Result<(), crate::merger::MergeError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Err(crate::merger::MergeError::UnknownOrderColumn("AGE".to_string()))
        }

        fn offer(&mut self, _row: &Packet) -> Result<(), crate::merger::MergeError> {
            Ok(())
        }

        fn take_result(&mut self) -> VecDeque<RowDataPacket> {
            VecDeque::new()
        }

        fn pagination(&self) -> Pagination {
            Pagination::default()
        }
    }

    #[test]
    fn test_failed_field_setup_runs_once() {
        const SHARDS: u64 = 8;
        let session = TestSession::new();
        let inits = Arc::new(AtomicUsize::new(0));
        let handler = handler(
            &session,
            SHARDS as usize,
            Box::new(RejectingMerger { inits: inits.clone() }),
        );

        thread::scope(|scope| {
            for shard in 0..SHARDS {
                let handler = &handler;
                scope.spawn(move || {
                    let con = connection(shard, shard as u32);
                    let (header, fields, eof) = field_reply(&[("id", 0x08)]);
                    handler.field(&header, &fields, &eof, &con);
                    handler.eof(&eof_reply(), &con);
                });
            }
        });

        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(single_error(&session).code, 1003);
    }

    /// Merger that only counts and remembers what it was given
    struct CountingMerger {
        seen: Arc<Mutex<Vec<Packet>>>,
    }

    impl Merger for CountingMerger {
        fn init(&mut self, _columns: HashMap<String, ColumnInfo>, _field_count: usize) -> Result<(), crate::merger::MergeError> {
            Ok(())
        }

        fn offer(&mut self, row: &Packet) -> Result<(), crate::merger::MergeError> {
            self.seen.lock().push(row.clone());
            Ok(())
        }

        fn take_result(&mut self) -> VecDeque<RowDataPacket> {
            VecDeque::new()
        }

        fn pagination(&self) -> Pagination {
            Pagination::default()
        }
    }

    #[test]
    fn test_concurrent_shards_lose_no_rows() {
        const SHARDS: u64 = 8;
        const ROWS: u64 = 1000;

        let session = TestSession::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = handler(
            &session,
            SHARDS as usize,
            Box::new(CountingMerger { seen: seen.clone() }),
        );

        thread::scope(|scope| {
            for shard in 0..SHARDS {
                let handler = &handler;
                scope.spawn(move || {
                    let con = connection(shard, shard as u32);
                    let (header, fields, eof) = field_reply(&[("id", 0x08)]);
                    handler.field(&header, &fields, &eof, &con);
                    for i in 0..ROWS {
                        handler.row(&row_reply(&[&(shard * ROWS + i).to_string()]), &con);
                    }
                    handler.eof(&eof_reply(), &con);
                });
            }
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), (SHARDS * ROWS) as usize);
        let unique: HashSet<String> = seen.iter().map(|p| row_text(p, 1, 0)).collect();
        assert_eq!(unique.len(), (SHARDS * ROWS) as usize);

        // header, field, eof, eof: exactly one response
        assert_eq!(session.front.flush_count(), 1);
        assert_eq!(session.front.sequence_ids(), vec![1, 2, 3, 4]);
        assert_eq!(session.released().len(), SHARDS as usize);
    }

    #[test]
    fn test_concurrent_mixed_replies_respond_once() {
        for round in 0..50u64 {
            let session = TestSession::new();
            let handler = plain(&session, 6);

            thread::scope(|scope| {
                for shard in 0..6u64 {
                    let handler = &handler;
                    scope.spawn(move || {
                        let con = connection(shard, shard as u32);
                        match (shard + round) % 3 {
                            0 => handler.ok(&ok_reply(1, 0), &con),
                            1 => handler.error(&error_reply(1100 + shard as u16, "boom"), &con),
                            _ => handler.close("gone"),
                        }
                    });
                }
            });

            let packets = session.front.packets();
            assert_eq!(packets.len(), 1);
            assert_eq!(packets[0].sequence(), 1);
            assert!(ErrorPacket::read(&packets[0]).is_ok());
            assert_eq!(handler.remaining(), 0);
        }
    }
}
