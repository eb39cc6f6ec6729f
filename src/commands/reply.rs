//! Reply values produced by command handlers.
//!
//! The engine stays below the wire protocol: replies are structured
//! values buffered per client, and the (external) protocol layer is
//! what would flatten them into RESP.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// +OK
    Ok,
    /// Any other simple status line.
    Simple(String),
    /// An error line, message without the leading dash.
    Error(String),
    Int(i64),
    Bulk(Vec<u8>),
    /// Null bulk.
    Nil,
    /// Null array; what timed-out blocking reads receive.
    NilArray,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Reply {
        Reply::Bulk(bytes.into())
    }

    pub fn error(message: impl Into<String>) -> Reply {
        Reply::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Rough buffered size, for client-memory accounting.
    pub fn estimated_size(&self) -> usize {
        match self {
            Reply::Ok | Reply::Nil | Reply::NilArray => 8,
            Reply::Int(_) => 16,
            Reply::Simple(s) | Reply::Error(s) => 8 + s.len(),
            Reply::Bulk(b) => 8 + b.len(),
            Reply::Array(items) => 8 + items.iter().map(Reply::estimated_size).sum::<usize>(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Simple(s) => write!(f, "{s}"),
            Reply::Error(s) => write!(f, "(error) {s}"),
            Reply::Int(v) => write!(f, "(integer) {v}"),
            Reply::Bulk(b) => write!(f, "\"{}\"", String::from_utf8_lossy(b)),
            Reply::Nil => write!(f, "(nil)"),
            Reply::NilArray => write!(f, "(nil)"),
            Reply::Array(items) => {
                if items.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {item}", i + 1)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_size_nests() {
        let reply = Reply::Array(vec![Reply::bulk("key"), Reply::bulk("value")]);
        assert_eq!(reply.estimated_size(), 8 + (8 + 3) + (8 + 5));
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Reply::Ok.to_string(), "OK");
        assert_eq!(Reply::Int(3).to_string(), "(integer) 3");
        assert_eq!(Reply::bulk("hi").to_string(), "\"hi\"");
    }
}
