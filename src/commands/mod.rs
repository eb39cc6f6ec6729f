//! Command handlers.
//!
//! The engine consumes parsed argument vectors; everything wire-level
//! stays outside. Handlers return `CommandResult<()>`, pushing replies
//! as they go; an error return becomes the client's error reply with
//! the command state unchanged.

pub mod generic;
pub mod hash;
pub mod introspect;
pub mod list;
pub mod reply;
pub mod set;
pub mod stream;
pub mod string;
pub mod zset;

use thiserror::Error;

use crate::client::ClientId;
use crate::engine::Engine;
use crate::value::{Obj, ValueType};
use reply::Reply;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR value is not a valid float")]
    NotAFloat,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
    #[error("ERR invalid expire time in '{0}' command")]
    ExpireTime(String),
    #[error("ERR string exceeds maximum allowed size (proto-max-bulk-len)")]
    StringTooLong,
    #[error("ERR Insufficient memory, {0}")]
    MemoryPressure(&'static str),
    #[error("ERR {0}")]
    Other(String),
}

pub type CommandResult<T> = Result<T, CommandError>;

/// One handler entry: name, arity (negative = at-least, like the
/// command-table convention), and the function.
type Handler = fn(&mut Engine, ClientId, &[Vec<u8>]) -> CommandResult<()>;

struct CommandSpec {
    name: &'static str,
    arity: i32,
    handler: Handler,
}

const COMMAND_TABLE: &[CommandSpec] = &[
    // Strings.
    CommandSpec { name: "get", arity: 2, handler: string::get_command },
    CommandSpec { name: "set", arity: -3, handler: string::set_command },
    CommandSpec { name: "setnx", arity: 3, handler: string::setnx_command },
    CommandSpec { name: "setex", arity: 4, handler: string::setex_command },
    CommandSpec { name: "psetex", arity: 4, handler: string::psetex_command },
    CommandSpec { name: "getex", arity: -2, handler: string::getex_command },
    CommandSpec { name: "getdel", arity: 2, handler: string::getdel_command },
    CommandSpec { name: "getset", arity: 3, handler: string::getset_command },
    CommandSpec { name: "setrange", arity: 4, handler: string::setrange_command },
    CommandSpec { name: "getrange", arity: 4, handler: string::getrange_command },
    CommandSpec { name: "mget", arity: -2, handler: string::mget_command },
    CommandSpec { name: "mset", arity: -3, handler: string::mset_command },
    CommandSpec { name: "msetnx", arity: -3, handler: string::msetnx_command },
    CommandSpec { name: "incr", arity: 2, handler: string::incr_command },
    CommandSpec { name: "decr", arity: 2, handler: string::decr_command },
    CommandSpec { name: "incrby", arity: 3, handler: string::incrby_command },
    CommandSpec { name: "decrby", arity: 3, handler: string::decrby_command },
    CommandSpec { name: "incrbyfloat", arity: 3, handler: string::incrbyfloat_command },
    CommandSpec { name: "append", arity: 3, handler: string::append_command },
    CommandSpec { name: "strlen", arity: 2, handler: string::strlen_command },
    CommandSpec { name: "lcs", arity: -3, handler: string::lcs_command },
    // Generic.
    CommandSpec { name: "del", arity: -2, handler: generic::del_command },
    CommandSpec { name: "unlink", arity: -2, handler: generic::unlink_command },
    CommandSpec { name: "exists", arity: -2, handler: generic::exists_command },
    CommandSpec { name: "type", arity: 2, handler: generic::type_command },
    CommandSpec { name: "ttl", arity: 2, handler: generic::ttl_command },
    CommandSpec { name: "pttl", arity: 2, handler: generic::pttl_command },
    CommandSpec { name: "expire", arity: -3, handler: generic::expire_command },
    CommandSpec { name: "pexpire", arity: -3, handler: generic::pexpire_command },
    CommandSpec { name: "expireat", arity: -3, handler: generic::expireat_command },
    CommandSpec { name: "pexpireat", arity: -3, handler: generic::pexpireat_command },
    CommandSpec { name: "persist", arity: 2, handler: generic::persist_command },
    CommandSpec { name: "config", arity: -2, handler: generic::config_command },
    CommandSpec { name: "wait", arity: 3, handler: generic::wait_command },
    // Lists.
    CommandSpec { name: "lpush", arity: -3, handler: list::lpush_command },
    CommandSpec { name: "rpush", arity: -3, handler: list::rpush_command },
    CommandSpec { name: "lpop", arity: -2, handler: list::lpop_command },
    CommandSpec { name: "rpop", arity: -2, handler: list::rpop_command },
    CommandSpec { name: "llen", arity: 2, handler: list::llen_command },
    CommandSpec { name: "lrange", arity: 4, handler: list::lrange_command },
    CommandSpec { name: "lmove", arity: 5, handler: list::lmove_command },
    CommandSpec { name: "blpop", arity: -3, handler: list::blpop_command },
    CommandSpec { name: "brpop", arity: -3, handler: list::brpop_command },
    CommandSpec { name: "blmove", arity: 6, handler: list::blmove_command },
    CommandSpec { name: "blmpop", arity: -5, handler: list::blmpop_command },
    // Sets.
    CommandSpec { name: "sadd", arity: -3, handler: set::sadd_command },
    CommandSpec { name: "srem", arity: -3, handler: set::srem_command },
    CommandSpec { name: "scard", arity: 2, handler: set::scard_command },
    CommandSpec { name: "sismember", arity: 3, handler: set::sismember_command },
    CommandSpec { name: "smembers", arity: 2, handler: set::smembers_command },
    // Hashes.
    CommandSpec { name: "hset", arity: -4, handler: hash::hset_command },
    CommandSpec { name: "hget", arity: 3, handler: hash::hget_command },
    CommandSpec { name: "hdel", arity: -3, handler: hash::hdel_command },
    CommandSpec { name: "hlen", arity: 2, handler: hash::hlen_command },
    CommandSpec { name: "hgetall", arity: 2, handler: hash::hgetall_command },
    // Sorted sets.
    CommandSpec { name: "zadd", arity: -4, handler: zset::zadd_command },
    CommandSpec { name: "zscore", arity: 3, handler: zset::zscore_command },
    CommandSpec { name: "zcard", arity: 2, handler: zset::zcard_command },
    CommandSpec { name: "zpopmin", arity: -2, handler: zset::zpopmin_command },
    CommandSpec { name: "zpopmax", arity: -2, handler: zset::zpopmax_command },
    CommandSpec { name: "bzpopmin", arity: -3, handler: zset::bzpopmin_command },
    CommandSpec { name: "bzpopmax", arity: -3, handler: zset::bzpopmax_command },
    CommandSpec { name: "bzmpop", arity: -5, handler: zset::bzmpop_command },
    // Streams.
    CommandSpec { name: "xadd", arity: -5, handler: stream::xadd_command },
    CommandSpec { name: "xlen", arity: 2, handler: stream::xlen_command },
    CommandSpec { name: "xrange", arity: -4, handler: stream::xrange_command },
    CommandSpec { name: "xread", arity: -4, handler: stream::xread_command },
    CommandSpec { name: "xgroup", arity: -2, handler: stream::xgroup_command },
    CommandSpec { name: "xreadgroup", arity: -7, handler: stream::xreadgroup_command },
    // Introspection.
    CommandSpec { name: "object", arity: -2, handler: introspect::object_command },
    CommandSpec { name: "memory", arity: -2, handler: introspect::memory_command },
];

fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|spec| spec.name == name)
}

/// Dispatch one parsed argument vector for a client.
pub fn dispatch(engine: &mut Engine, client_id: ClientId, argv: &[Vec<u8>]) {
    if argv.is_empty() {
        engine.push_reply(client_id, Reply::error("ERR empty command"));
        return;
    }
    let name = String::from_utf8_lossy(&argv[0]).to_ascii_lowercase();
    let spec = match find_command(&name) {
        Some(spec) => spec,
        None => {
            engine.push_reply(
                client_id,
                Reply::Error(CommandError::UnknownCommand(name).to_string()),
            );
            return;
        }
    };
    let arity_ok = if spec.arity >= 0 {
        argv.len() == spec.arity as usize
    } else {
        argv.len() >= (-spec.arity) as usize
    };
    if !arity_ok {
        engine.push_reply(
            client_id,
            Reply::Error(CommandError::WrongArity(name).to_string()),
        );
        return;
    }
    if let Err(error) = (spec.handler)(engine, client_id, argv) {
        engine.push_reply(client_id, Reply::Error(error.to_string()));
    }
}

// ---- shared argument helpers ----

/// Strict integer argument parse.
pub(crate) fn arg_i64(bytes: &[u8]) -> CommandResult<i64> {
    crate::value::strconv::parse_i64(bytes).ok_or(CommandError::NotAnInteger)
}

pub(crate) fn arg_f64(bytes: &[u8]) -> CommandResult<f64> {
    crate::value::strconv::parse_f64(bytes).ok_or(CommandError::NotAFloat)
}

pub(crate) fn arg_eq_ignore_case(bytes: &[u8], word: &str) -> bool {
    bytes.eq_ignore_ascii_case(word.as_bytes())
}

/// Millisecond timeout argument of the blocking commands; zero means
/// forever, negatives are refused.
pub(crate) fn parse_timeout_ms(engine: &Engine, bytes: &[u8]) -> CommandResult<Option<i64>> {
    let seconds = crate::value::strconv::parse_f64(bytes)
        .ok_or_else(|| CommandError::Other("timeout is not a float or out of range".into()))?;
    if seconds < 0.0 || !seconds.is_finite() {
        return Err(CommandError::Other("timeout is negative".into()));
    }
    if seconds == 0.0 {
        return Ok(None);
    }
    Ok(Some(engine.clock.now_ms() + (seconds * 1000.0) as i64))
}

/// Type guard: `Ok(Some(value))` when present with the wanted type,
/// `Ok(None)` when absent.
pub(crate) fn expect_type(value: Option<Obj>, wanted: ValueType) -> CommandResult<Option<Obj>> {
    match value {
        Some(v) if v.object_type() != wanted => Err(CommandError::WrongType),
        other => Ok(other),
    }
}
