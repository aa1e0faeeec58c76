// Response handlers
// Backend replies arrive as callbacks, one per packet group, on whatever
// worker thread owns the backend connection. A handler turns the replies of
// every shard a statement was sent to into exactly one client response.
//
// Two behaviors exist:
// 1. Single shard: relay packets straight through, renumbered
// 2. Multi shard: accumulate and merge, respond once every shard is done
//
// Which one applies is decided when the statement is dispatched, from the
// number of outlets it was routed to.

pub mod multi;
pub mod single;

pub use multi::MultiNodeHandler;
pub use single::SingleNodeHandler;

use crate::merger::RowMerger;
use crate::protocol::Packet;
use crate::route::Outlets;
use crate::session::{BackendConnection, Session};
use crate::stats::Recorder;
use std::sync::Arc;

/// Callbacks a backend connection invokes while a statement runs
///
/// Implementations are shared across backend worker threads and every
/// method takes `&self`.
pub trait ResultHandler: Send + Sync {
    /// The backend answered OK
    fn ok(&self, packet: &Packet, connection: &BackendConnection);

    /// The backend answered ERR
    fn error(&self, packet: &Packet, connection: &BackendConnection);

    /// Result set header, column definitions and the closing EOF
    fn field(&self, header: &Packet, fields: &[Packet], eof: &Packet, connection: &BackendConnection);

    /// One result row
    fn row(&self, row: &Packet, connection: &BackendConnection);

    /// The EOF closing the row stream
    fn eof(&self, eof: &Packet, connection: &BackendConnection);

    /// The backend connection went away before its reply completed
    fn close(&self, reason: &str);

    /// The statement text, kept for statistics
    fn set_sql(&self, sql: &str);
}

/// Handler for one dispatched statement
pub enum ResponseHandler {
    Single(SingleNodeHandler),
    Multi(MultiNodeHandler),
}

impl std::fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseHandler::Single(_) => f.write_str("ResponseHandler::Single"),
            ResponseHandler::Multi(_) => f.write_str("ResponseHandler::Multi"),
        }
    }
}

impl ResponseHandler {
    /// Pick the handler matching how many shards the statement reaches
    pub fn for_outlets(
        session: Arc<dyn Session>,
        outlets: &Outlets,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        if outlets.len() == 1 {
            ResponseHandler::Single(SingleNodeHandler::new(session, recorder))
        } else {
            let merger = RowMerger::new(outlets.pagination(), outlets.order_by().to_vec());
            ResponseHandler::Multi(MultiNodeHandler::new(
                session,
                Box::new(merger),
                outlets.len(),
                recorder,
            ))
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, ResponseHandler::Multi(_))
    }

    fn inner(&self) -> &dyn ResultHandler {
        match self {
            ResponseHandler::Single(h) => h,
            ResponseHandler::Multi(h) => h,
        }
    }
}

impl ResultHandler for ResponseHandler {
    fn ok(&self, packet: &Packet, connection: &BackendConnection) {
        self.inner().ok(packet, connection)
    }

    fn error(&self, packet: &Packet, connection: &BackendConnection) {
        self.inner().error(packet, connection)
    }

    fn field(&self, header: &Packet, fields: &[Packet], eof: &Packet, connection: &BackendConnection) {
        self.inner().field(header, fields, eof, connection)
    }

    fn row(&self, row: &Packet, connection: &BackendConnection) {
        self.inner().row(row, connection)
    }

    fn eof(&self, eof: &Packet, connection: &BackendConnection) {
        self.inner().eof(eof, connection)
    }

    fn close(&self, reason: &str) {
        self.inner().close(reason)
    }

    fn set_sql(&self, sql: &str) {
        self.inner().set_sql(sql)
    }
}
