// Query module - extracts routing facts from SQL statements
pub mod parser;

pub use parser::{ParsedStatement, StatementKind, StatementParser};
