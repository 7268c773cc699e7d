//! # Commands
//!
//! Purpose: Describe one recorded backend operation as a name plus positional
//! arguments, built only through the constructors below.
//!
//! ## Design Principles
//! 1. **Closed Set**: One constructor per supported backend command; there is
//!    no way to record an arbitrary name.
//! 2. **Positional Only**: Options such as `EX` are encoded into the argument
//!    list by their constructor.
//! 3. **Cheap Re-Recording**: Arguments are `Bytes`, so forwarding a command
//!    from a nested pipeline to its parent does not copy payloads.

use std::fmt;

use bytes::Bytes;

/// A backend operation waiting to be sent.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<Bytes>,
}

fn arg(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(data)
}

fn int_arg(value: i64) -> Bytes {
    Bytes::from(value.to_string())
}

fn float_arg(value: f64) -> Bytes {
    Bytes::from(value.to_string())
}

impl Command {
    fn new(name: &'static str, args: Vec<Bytes>) -> Self {
        Command { name, args }
    }

    /// Upper-case command name, e.g. `"GET"`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Name followed by arguments, ready for wire encoding.
    pub fn to_parts(&self) -> Vec<Bytes> {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(Bytes::from_static(self.name.as_bytes()));
        parts.extend(self.args.iter().cloned());
        parts
    }

    // Server

    pub fn ping() -> Self {
        Command::new("PING", Vec::new())
    }

    pub fn echo(message: &[u8]) -> Self {
        Command::new("ECHO", vec![arg(message)])
    }

    pub fn info() -> Self {
        Command::new("INFO", Vec::new())
    }

    // Keys

    pub fn del(keys: &[&[u8]]) -> Self {
        Command::new("DEL", keys.iter().map(|key| arg(key)).collect())
    }

    pub fn exists(keys: &[&[u8]]) -> Self {
        Command::new("EXISTS", keys.iter().map(|key| arg(key)).collect())
    }

    pub fn expire(key: &[u8], seconds: u64) -> Self {
        Command::new("EXPIRE", vec![arg(key), Bytes::from(seconds.to_string())])
    }

    pub fn ttl(key: &[u8]) -> Self {
        Command::new("TTL", vec![arg(key)])
    }

    pub fn persist(key: &[u8]) -> Self {
        Command::new("PERSIST", vec![arg(key)])
    }

    // Strings

    pub fn get(key: &[u8]) -> Self {
        Command::new("GET", vec![arg(key)])
    }

    pub fn set(key: &[u8], value: &[u8]) -> Self {
        Command::new("SET", vec![arg(key), arg(value)])
    }

    /// `SET key value EX seconds`.
    pub fn set_ex(key: &[u8], value: &[u8], seconds: u64) -> Self {
        Command::new(
            "SET",
            vec![
                arg(key),
                arg(value),
                Bytes::from_static(b"EX"),
                Bytes::from(seconds.to_string()),
            ],
        )
    }

    pub fn setnx(key: &[u8], value: &[u8]) -> Self {
        Command::new("SETNX", vec![arg(key), arg(value)])
    }

    pub fn mget(keys: &[&[u8]]) -> Self {
        Command::new("MGET", keys.iter().map(|key| arg(key)).collect())
    }

    pub fn mset(pairs: &[(&[u8], &[u8])]) -> Self {
        let mut args = Vec::with_capacity(pairs.len() * 2);
        for (key, value) in pairs {
            args.push(arg(key));
            args.push(arg(value));
        }
        Command::new("MSET", args)
    }

    pub fn incr(key: &[u8]) -> Self {
        Command::new("INCR", vec![arg(key)])
    }

    pub fn incrby(key: &[u8], amount: i64) -> Self {
        Command::new("INCRBY", vec![arg(key), int_arg(amount)])
    }

    pub fn decr(key: &[u8]) -> Self {
        Command::new("DECR", vec![arg(key)])
    }

    pub fn decrby(key: &[u8], amount: i64) -> Self {
        Command::new("DECRBY", vec![arg(key), int_arg(amount)])
    }

    pub fn append(key: &[u8], value: &[u8]) -> Self {
        Command::new("APPEND", vec![arg(key), arg(value)])
    }

    pub fn strlen(key: &[u8]) -> Self {
        Command::new("STRLEN", vec![arg(key)])
    }

    // Hashes

    pub fn hget(key: &[u8], field: &[u8]) -> Self {
        Command::new("HGET", vec![arg(key), arg(field)])
    }

    pub fn hset(key: &[u8], field: &[u8], value: &[u8]) -> Self {
        Command::new("HSET", vec![arg(key), arg(field), arg(value)])
    }

    pub fn hdel(key: &[u8], fields: &[&[u8]]) -> Self {
        let mut args = vec![arg(key)];
        args.extend(fields.iter().map(|field| arg(field)));
        Command::new("HDEL", args)
    }

    pub fn hgetall(key: &[u8]) -> Self {
        Command::new("HGETALL", vec![arg(key)])
    }

    pub fn hincrby(key: &[u8], field: &[u8], amount: i64) -> Self {
        Command::new("HINCRBY", vec![arg(key), arg(field), int_arg(amount)])
    }

    // Sets

    pub fn sadd(key: &[u8], members: &[&[u8]]) -> Self {
        let mut args = vec![arg(key)];
        args.extend(members.iter().map(|member| arg(member)));
        Command::new("SADD", args)
    }

    pub fn srem(key: &[u8], members: &[&[u8]]) -> Self {
        let mut args = vec![arg(key)];
        args.extend(members.iter().map(|member| arg(member)));
        Command::new("SREM", args)
    }

    pub fn smembers(key: &[u8]) -> Self {
        Command::new("SMEMBERS", vec![arg(key)])
    }

    pub fn sismember(key: &[u8], member: &[u8]) -> Self {
        Command::new("SISMEMBER", vec![arg(key), arg(member)])
    }

    pub fn scard(key: &[u8]) -> Self {
        Command::new("SCARD", vec![arg(key)])
    }

    // Lists

    pub fn lpush(key: &[u8], values: &[&[u8]]) -> Self {
        let mut args = vec![arg(key)];
        args.extend(values.iter().map(|value| arg(value)));
        Command::new("LPUSH", args)
    }

    pub fn rpush(key: &[u8], values: &[&[u8]]) -> Self {
        let mut args = vec![arg(key)];
        args.extend(values.iter().map(|value| arg(value)));
        Command::new("RPUSH", args)
    }

    pub fn lpop(key: &[u8]) -> Self {
        Command::new("LPOP", vec![arg(key)])
    }

    pub fn rpop(key: &[u8]) -> Self {
        Command::new("RPOP", vec![arg(key)])
    }

    pub fn llen(key: &[u8]) -> Self {
        Command::new("LLEN", vec![arg(key)])
    }

    pub fn lrange(key: &[u8], start: i64, stop: i64) -> Self {
        Command::new("LRANGE", vec![arg(key), int_arg(start), int_arg(stop)])
    }

    // Sorted sets

    pub fn zadd(key: &[u8], score: f64, member: &[u8]) -> Self {
        Command::new("ZADD", vec![arg(key), float_arg(score), arg(member)])
    }

    pub fn zscore(key: &[u8], member: &[u8]) -> Self {
        Command::new("ZSCORE", vec![arg(key), arg(member)])
    }

    pub fn zcard(key: &[u8]) -> Self {
        Command::new("ZCARD", vec![arg(key)])
    }

    pub fn zrange(key: &[u8], start: i64, stop: i64) -> Self {
        Command::new("ZRANGE", vec![arg(key), int_arg(start), int_arg(stop)])
    }

    // Transactions, used by backends that wrap a batch.

    pub fn multi() -> Self {
        Command::new("MULTI", Vec::new())
    }

    pub fn exec() -> Self {
        Command::new("EXEC", Vec::new())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}
