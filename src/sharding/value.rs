// Sharding key values
// A literal bound to the sharding column in a statement, e.g. the 7 in
// `WHERE id = 7` or each id in `INSERT ... VALUES (7, ..), (8, ..)`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A key literal extracted from a statement
///
/// Values are ordered and hashable so a statement's keys form a `BTreeSet`
/// and routing output is reproducible. Decimal literals are kept as their
/// literal text; they are rarely sharding keys and text keeps them exact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// The bytes fed to hash functions
    ///
    /// Integers hash as their decimal text, so `id = 7` and `id = '7'` land
    /// on the same shard the way MySQL's implicit conversion would match them.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Value::Null => b"null".to_vec(),
            Value::Integer(i) => i.to_string().into_bytes(),
            Value::Text(s) => s.as_bytes().to_vec(),
            Value::Boolean(b) => {
                if *b {
                    b"1".to_vec()
                } else {
                    b"0".to_vec()
                }
            }
        }
    }

    /// Integer view of the value, accepting numeric text
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Null => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}
