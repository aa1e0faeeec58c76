// RustyShard - a sharding core for a MySQL-protocol proxy
// This is the library root that exposes the public API

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod logging;
pub mod merger;
pub mod protocol;
pub mod query;
pub mod route;
pub mod schema;
pub mod session;
pub mod sharding;
pub mod stats;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use config::SchemaConfig;
pub use dispatch::{Backend, Dispatcher};
pub use error::ProxyError;
pub use handler::{MultiNodeHandler, ResponseHandler, ResultHandler, SingleNodeHandler};
pub use merger::{Merger, RowMerger};
pub use protocol::Packet;
pub use query::StatementKind;
pub use route::{Outlet, Outlets, Router};
pub use schema::{Schema, TableType};
pub use session::{BackendConnection, FrontConnection, Session};
pub use sharding::{ShardId, ShardingFunction, Value};
pub use stats::{Recorder, SqlStatistics};
