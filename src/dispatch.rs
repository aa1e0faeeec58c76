// Statement dispatch
// Routes a client statement, picks the response handler and hands every
// outlet to the backend executor. Statements that cannot be routed are
// answered here, before any backend sees them.

use crate::error::ProxyError;
use crate::handler::{ResponseHandler, ResultHandler};
use crate::protocol::Sequence;
use crate::query::StatementKind;
use crate::route::{Outlet, Router};
use crate::schema::Schema;
use crate::session::Session;
use crate::stats::Recorder;
use std::sync::Arc;
use tracing::{debug, info_span, warn};

/// Sends one routed sub-statement to its shard
///
/// The reply is delivered asynchronously through `handler`, possibly on
/// another thread, possibly after `execute` has returned.
pub trait Backend: Send + Sync {
    fn execute(&self, outlet: &Outlet, handler: Arc<ResponseHandler>);
}

/// Entry point for statements of one schema
pub struct Dispatcher {
    schema: Arc<Schema>,
    backend: Arc<dyn Backend>,
    recorder: Arc<dyn Recorder>,
}

impl Dispatcher {
    pub fn new(schema: Arc<Schema>, backend: Arc<dyn Backend>, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            schema,
            backend,
            recorder,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Route `sql` and send it to every shard it reaches
    ///
    /// On a routing failure the error is written to the client and also
    /// returned; nothing is dispatched.
    pub fn dispatch(
        &self,
        session: Arc<dyn Session>,
        sql: &str,
        charset: &str,
    ) -> Result<Arc<ResponseHandler>, ProxyError> {
        let kind = StatementKind::classify(sql);
        let span = info_span!("dispatch", schema = self.schema.name(), ?kind);
        let _enter = span.enter();

        let outlets = match Router::route(&self.schema, sql, charset, kind) {
            Ok(outlets) => outlets,
            Err(err) => {
                warn!(error = %err, "statement rejected");
                let mut sequence = Sequence::new();
                session
                    .front()
                    .write_packet(&err.to_packet().to_packet(sequence.next_id()));
                return Err(err);
            }
        };

        let handler = Arc::new(ResponseHandler::for_outlets(
            session,
            &outlets,
            self.recorder.clone(),
        ));
        handler.set_sql(sql);
        debug!(shards = ?outlets.shards(), multi = handler.is_multi(), "dispatching");

        for outlet in &outlets {
            self.backend.execute(outlet, handler.clone());
        }
        Ok(handler)
    }
}
