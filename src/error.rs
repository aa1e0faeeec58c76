// Error taxonomy for the proxy core
// Every failure a client can observe ends up as one of these variants,
// and every variant knows how to become a MySQL ERR packet.

use crate::protocol::ErrorPacket;
use thiserror::Error;

/// MySQL error codes used by the proxy itself
pub mod codes {
    /// ER_YES, used as the generic code for internal failures
    pub const ER_YES: u16 = 1003;
    /// ER_PARSE_ERROR
    pub const ER_PARSE_ERROR: u16 = 1064;
    /// ER_UNKNOWN_ERROR
    pub const ER_UNKNOWN_ERROR: u16 = 1105;
    /// CR_SERVER_LOST
    pub const CR_SERVER_LOST: u16 = 2013;
}

/// Errors surfaced to the client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    /// The statement is malformed or unsupported; nothing was dispatched
    #[error("parse error: {0}")]
    Parse(String),

    /// Metadata could not place the statement on any shard; nothing was dispatched
    #[error("routing error: {0}")]
    Routing(String),

    /// A shard answered with an ERR packet
    #[error("backend error {code}: {message}")]
    Backend {
        code: u16,
        sql_state: String,
        message: String,
    },

    /// A backend connection went away before completing
    #[error("connection error: {0}")]
    Connection(String),

    /// Field or merge setup failed inside the proxy
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// The MySQL error code reported for this failure
    pub fn code(&self) -> u16 {
        match self {
            ProxyError::Parse(_) => codes::ER_PARSE_ERROR,
            ProxyError::Routing(_) => codes::ER_UNKNOWN_ERROR,
            ProxyError::Backend { code, .. } => *code,
            ProxyError::Connection(_) => codes::CR_SERVER_LOST,
            ProxyError::Internal(_) => codes::ER_YES,
        }
    }

    /// Convert into the ERR packet a client sees
    ///
    /// Backend errors keep the shard's own state and message; everything
    /// else reports the display text of the variant.
    pub fn to_packet(&self) -> ErrorPacket {
        let (sql_state, message) = match self {
            ProxyError::Parse(msg) => ("42000", msg.clone()),
            ProxyError::Backend {
                sql_state, message, ..
            } => (sql_state.as_str(), message.clone()),
            other => ("HY000", other.to_string()),
        };
        ErrorPacket::new(self.code(), sql_state, message)
    }
}
