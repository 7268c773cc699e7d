//! # In-Process Memory Backend
//!
//! Purpose: Provide a `Connector` that executes batches against a shared
//! in-memory store, so pipelines can run without a server (tests, embedding,
//! local development).
//!
//! ## Design Principles
//! 1. **One Lock per Batch**: A batch applies under a single store lock, so it
//!    is atomic with respect to other batches.
//! 2. **TTL on Access**: Expired keys are dropped lazily when touched.
//! 3. **Deterministic Ordering**: Hashes and sets are ordered maps so replies
//!    are stable.
//!
//! ## Usage
//!
//! - `MemoryConnector::new()` creates an empty store; clones share it and
//!   report the same `PoolId`.
//! - `fail_next(msg)` makes the next batch fail before any command applies.
//! - `with_latency(d)` delays every batch to simulate a remote round trip.
//! - `round_trips()` counts batches that reached the backend.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::backend::{BatchHandle, Connector, PoolId};
use crate::command::Command;
use crate::error::{BackendError, PipeResult};
use crate::value::Value;

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
const SYNTAX: &str = "ERR syntax error";

/// Failure injected with `MemoryConnector::fail_next`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InjectedFailure(pub String);

#[derive(Debug, Clone)]
enum Data {
    Str(Bytes),
    Hash(BTreeMap<Bytes, Bytes>),
    Set(BTreeSet<Bytes>),
    List(VecDeque<Bytes>),
    // Members sorted by (score, member).
    ZSet(Vec<(f64, Bytes)>),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Store {
    map: HashMap<Bytes, Entry>,
}

struct MemoryInner {
    store: Mutex<Store>,
    round_trips: AtomicUsize,
    failures: Mutex<VecDeque<String>>,
    latency: Mutex<Option<Duration>>,
}

/// In-process backend shared by every clone.
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<MemoryInner>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        MemoryConnector {
            inner: Arc::new(MemoryInner {
                store: Mutex::new(Store::default()),
                round_trips: AtomicUsize::new(0),
                failures: Mutex::new(VecDeque::new()),
                latency: Mutex::new(None),
            }),
        }
    }

    /// Delays every batch by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.inner.latency.lock() = Some(latency);
        self
    }

    /// Makes the next batch fail with `message` before applying anything.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.inner.failures.lock().push_back(message.into());
    }

    /// Number of batches that reached this backend, failed ones included.
    pub fn round_trips(&self) -> usize {
        self.inner.round_trips.load(Ordering::SeqCst)
    }

    /// Reads a string key directly, bypassing pipelines.
    pub fn peek(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut store = self.inner.store.lock();
        match store.live_at(key, Instant::now()) {
            Some(Entry { data: Data::Str(value), .. }) => Some(value.to_vec()),
            _ => None,
        }
    }

    /// Removes every key.
    pub fn flush(&self) {
        self.inner.store.lock().map.clear();
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MemoryConnector {
    fn pool_id(&self) -> PoolId {
        PoolId::of(&self.inner)
    }

    fn batch(&self) -> PipeResult<Box<dyn BatchHandle>> {
        Ok(Box::new(MemoryBatch {
            inner: self.inner.clone(),
            queued: Vec::new(),
        }))
    }
}

struct MemoryBatch {
    inner: Arc<MemoryInner>,
    queued: Vec<Command>,
}

impl BatchHandle for MemoryBatch {
    fn queue(&mut self, command: &Command) {
        self.queued.push(command.clone());
    }

    fn execute(&mut self) -> Result<Vec<Value>, BackendError> {
        let queued = std::mem::take(&mut self.queued);
        self.inner.round_trips.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.inner.failures.lock().pop_front() {
            return Err(Box::new(InjectedFailure(message)));
        }
        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }

        trace!(commands = queued.len(), "memory batch applied");
        let mut store = self.inner.store.lock();
        let now = Instant::now();
        Ok(queued.iter().map(|command| store.apply(command, now)).collect())
    }
}

fn error(message: &str) -> Value {
    Value::Error(message.to_string())
}

fn ok() -> Value {
    Value::Status("OK".to_string())
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn parse_f64(data: &[u8]) -> Option<f64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn format_score(score: f64) -> Bytes {
    Bytes::from(score.to_string())
}

/// Resolves Redis-style inclusive, possibly negative, range bounds.
fn range_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl Store {
    /// Returns the entry for `key`, dropping it first if it has expired.
    fn live_at(&mut self, key: &[u8], now: Instant) -> Option<&mut Entry> {
        let expired = match self.map.get(key) {
            Some(entry) => entry.expires_at.map_or(false, |at| now >= at),
            None => return None,
        };
        if expired {
            self.map.remove(key);
            return None;
        }
        self.map.get_mut(key)
    }

    fn apply(&mut self, command: &Command, now: Instant) -> Value {
        let args = command.args();
        let arity_ok = match command.name() {
            "PING" | "INFO" | "MULTI" | "EXEC" => true,
            "DEL" | "EXISTS" | "MGET" => !args.is_empty(),
            "MSET" => !args.is_empty() && args.len() % 2 == 0,
            "SADD" | "SREM" | "LPUSH" | "RPUSH" | "HDEL" => args.len() >= 2,
            "SET" => args.len() == 2 || args.len() == 4,
            "HSET" | "HINCRBY" | "LRANGE" | "ZADD" | "ZRANGE" => args.len() == 3,
            "EXPIRE" | "SETNX" | "INCRBY" | "DECRBY" | "APPEND" | "HGET" | "SISMEMBER"
            | "ZSCORE" => args.len() == 2,
            _ => args.len() == 1,
        };
        if !arity_ok {
            return Value::Error(format!(
                "ERR wrong number of arguments for '{}' command",
                command.name().to_ascii_lowercase()
            ));
        }

        match command.name() {
            "PING" => Value::Status("PONG".to_string()),
            "ECHO" => Value::Data(args[0].clone()),
            "INFO" => Value::Data(Bytes::from(format!("# Memory\r\nkeys:{}\r\n", self.map.len()))),
            "MULTI" | "EXEC" => ok(),
            "DEL" => {
                let mut removed = 0;
                for key in args {
                    if self.live_at(key, now).is_some() {
                        self.map.remove(key);
                        removed += 1;
                    }
                }
                Value::Int(removed)
            }
            "EXISTS" => Value::Int(args.iter().filter(|key| self.live_at(key, now).is_some()).count() as i64),
            "EXPIRE" => {
                let Some(seconds) = parse_i64(&args[1]) else {
                    return error(NOT_INTEGER);
                };
                match self.live_at(&args[0], now) {
                    Some(entry) => {
                        entry.expires_at = Some(now + Duration::from_secs(seconds.max(0) as u64));
                        Value::Int(1)
                    }
                    None => Value::Int(0),
                }
            }
            "TTL" => match self.live_at(&args[0], now) {
                Some(Entry { expires_at: Some(at), .. }) => {
                    Value::Int(at.saturating_duration_since(now).as_secs() as i64)
                }
                Some(_) => Value::Int(-1),
                None => Value::Int(-2),
            },
            "PERSIST" => match self.live_at(&args[0], now) {
                Some(entry) if entry.expires_at.is_some() => {
                    entry.expires_at = None;
                    Value::Int(1)
                }
                _ => Value::Int(0),
            },
            "GET" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Str(value), .. }) => Value::Data(value.clone()),
                Some(_) => error(WRONG_TYPE),
                None => Value::Nil,
            },
            "SET" => {
                let expires_at = if args.len() == 4 {
                    if !args[2].eq_ignore_ascii_case(b"EX") {
                        return error(SYNTAX);
                    }
                    match parse_i64(&args[3]) {
                        Some(seconds) if seconds > 0 => Some(now + Duration::from_secs(seconds as u64)),
                        _ => return error("ERR invalid expire time in 'set' command"),
                    }
                } else {
                    None
                };
                self.map.insert(
                    args[0].clone(),
                    Entry {
                        data: Data::Str(args[1].clone()),
                        expires_at,
                    },
                );
                ok()
            }
            "SETNX" => {
                if self.live_at(&args[0], now).is_some() {
                    return Value::Int(0);
                }
                self.map.insert(
                    args[0].clone(),
                    Entry {
                        data: Data::Str(args[1].clone()),
                        expires_at: None,
                    },
                );
                Value::Int(1)
            }
            "MGET" => Value::Array(
                args.iter()
                    .map(|key| match self.live_at(key, now) {
                        Some(Entry { data: Data::Str(value), .. }) => Value::Data(value.clone()),
                        _ => Value::Nil,
                    })
                    .collect(),
            ),
            "MSET" => {
                for pair in args.chunks(2) {
                    self.map.insert(
                        pair[0].clone(),
                        Entry {
                            data: Data::Str(pair[1].clone()),
                            expires_at: None,
                        },
                    );
                }
                ok()
            }
            "INCR" => self.incr_by(&args[0], 1, now),
            "DECR" => self.incr_by(&args[0], -1, now),
            "INCRBY" | "DECRBY" => {
                let Some(amount) = parse_i64(&args[1]) else {
                    return error(NOT_INTEGER);
                };
                let amount = if command.name() == "DECRBY" { -amount } else { amount };
                self.incr_by(&args[0], amount, now)
            }
            "APPEND" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Str(value), .. }) => {
                    let mut joined = value.to_vec();
                    joined.extend_from_slice(&args[1]);
                    let len = joined.len();
                    *value = Bytes::from(joined);
                    Value::Int(len as i64)
                }
                Some(_) => error(WRONG_TYPE),
                None => {
                    self.map.insert(
                        args[0].clone(),
                        Entry {
                            data: Data::Str(args[1].clone()),
                            expires_at: None,
                        },
                    );
                    Value::Int(args[1].len() as i64)
                }
            },
            "STRLEN" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Str(value), .. }) => Value::Int(value.len() as i64),
                Some(_) => error(WRONG_TYPE),
                None => Value::Int(0),
            },
            "HGET" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Hash(fields), .. }) => {
                    fields.get(&args[1]).cloned().map_or(Value::Nil, Value::Data)
                }
                Some(_) => error(WRONG_TYPE),
                None => Value::Nil,
            },
            "HSET" => match self.hash_mut(&args[0], now) {
                Some(fields) => {
                    let added = fields.insert(args[1].clone(), args[2].clone()).is_none();
                    Value::Int(added as i64)
                }
                None => error(WRONG_TYPE),
            },
            "HDEL" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Hash(fields), .. }) => {
                    let removed = args[1..].iter().filter(|field| fields.remove(*field).is_some()).count();
                    Value::Int(removed as i64)
                }
                Some(_) => error(WRONG_TYPE),
                None => Value::Int(0),
            },
            "HGETALL" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Hash(fields), .. }) => Value::Array(
                    fields
                        .iter()
                        .flat_map(|(field, value)| [Value::Data(field.clone()), Value::Data(value.clone())])
                        .collect(),
                ),
                Some(_) => error(WRONG_TYPE),
                None => Value::Array(Vec::new()),
            },
            "HINCRBY" => {
                let Some(amount) = parse_i64(&args[2]) else {
                    return error(NOT_INTEGER);
                };
                let Some(fields) = self.hash_mut(&args[0], now) else {
                    return error(WRONG_TYPE);
                };
                let current = match fields.get(&args[1]) {
                    Some(raw) => match parse_i64(raw) {
                        Some(current) => current,
                        None => return error("ERR hash value is not an integer"),
                    },
                    None => 0,
                };
                let Some(next) = current.checked_add(amount) else {
                    return error(NOT_INTEGER);
                };
                fields.insert(args[1].clone(), Bytes::from(next.to_string()));
                Value::Int(next)
            }
            "SADD" => match self.set_mut(&args[0], now) {
                Some(members) => {
                    let added = args[1..].iter().filter(|member| members.insert((*member).clone())).count();
                    Value::Int(added as i64)
                }
                None => error(WRONG_TYPE),
            },
            "SREM" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Set(members), .. }) => {
                    let removed = args[1..].iter().filter(|member| members.remove(*member)).count();
                    Value::Int(removed as i64)
                }
                Some(_) => error(WRONG_TYPE),
                None => Value::Int(0),
            },
            "SMEMBERS" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Set(members), .. }) => {
                    Value::Array(members.iter().cloned().map(Value::Data).collect())
                }
                Some(_) => error(WRONG_TYPE),
                None => Value::Array(Vec::new()),
            },
            "SISMEMBER" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Set(members), .. }) => Value::Int(members.contains(&args[1]) as i64),
                Some(_) => error(WRONG_TYPE),
                None => Value::Int(0),
            },
            "SCARD" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::Set(members), .. }) => Value::Int(members.len() as i64),
                Some(_) => error(WRONG_TYPE),
                None => Value::Int(0),
            },
            "LPUSH" | "RPUSH" => {
                let front = command.name() == "LPUSH";
                match self.list_mut(&args[0], now) {
                    Some(items) => {
                        for value in &args[1..] {
                            if front {
                                items.push_front(value.clone());
                            } else {
                                items.push_back(value.clone());
                            }
                        }
                        Value::Int(items.len() as i64)
                    }
                    None => error(WRONG_TYPE),
                }
            }
            "LPOP" | "RPOP" => {
                let front = command.name() == "LPOP";
                match self.live_at(&args[0], now) {
                    Some(Entry { data: Data::List(items), .. }) => {
                        let popped = if front { items.pop_front() } else { items.pop_back() };
                        popped.map_or(Value::Nil, Value::Data)
                    }
                    Some(_) => error(WRONG_TYPE),
                    None => Value::Nil,
                }
            }
            "LLEN" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::List(items), .. }) => Value::Int(items.len() as i64),
                Some(_) => error(WRONG_TYPE),
                None => Value::Int(0),
            },
            "LRANGE" => {
                let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
                    return error(NOT_INTEGER);
                };
                match self.live_at(&args[0], now) {
                    Some(Entry { data: Data::List(items), .. }) => match range_bounds(items.len(), start, stop) {
                        Some((from, to)) => {
                            Value::Array(items.range(from..=to).cloned().map(Value::Data).collect())
                        }
                        None => Value::Array(Vec::new()),
                    },
                    Some(_) => error(WRONG_TYPE),
                    None => Value::Array(Vec::new()),
                }
            }
            "ZADD" => {
                let Some(score) = parse_f64(&args[1]) else {
                    return error("ERR value is not a valid float");
                };
                match self.zset_mut(&args[0], now) {
                    Some(members) => {
                        let existing = members.iter().position(|(_, member)| member == &args[2]);
                        let added = match existing {
                            Some(idx) => {
                                members.remove(idx);
                                0
                            }
                            None => 1,
                        };
                        members.push((score, args[2].clone()));
                        members.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
                        Value::Int(added)
                    }
                    None => error(WRONG_TYPE),
                }
            }
            "ZSCORE" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::ZSet(members), .. }) => members
                    .iter()
                    .find(|(_, member)| member == &args[1])
                    .map_or(Value::Nil, |(score, _)| Value::Data(format_score(*score))),
                Some(_) => error(WRONG_TYPE),
                None => Value::Nil,
            },
            "ZCARD" => match self.live_at(&args[0], now) {
                Some(Entry { data: Data::ZSet(members), .. }) => Value::Int(members.len() as i64),
                Some(_) => error(WRONG_TYPE),
                None => Value::Int(0),
            },
            "ZRANGE" => {
                let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
                    return error(NOT_INTEGER);
                };
                match self.live_at(&args[0], now) {
                    Some(Entry { data: Data::ZSet(members), .. }) => match range_bounds(members.len(), start, stop) {
                        Some((from, to)) => Value::Array(
                            members[from..=to].iter().map(|(_, member)| Value::Data(member.clone())).collect(),
                        ),
                        None => Value::Array(Vec::new()),
                    },
                    Some(_) => error(WRONG_TYPE),
                    None => Value::Array(Vec::new()),
                }
            }
            other => Value::Error(format!("ERR unknown command '{}'", other.to_ascii_lowercase())),
        }
    }

    fn incr_by(&mut self, key: &Bytes, amount: i64, now: Instant) -> Value {
        let (current, expires_at) = match self.live_at(key, now) {
            Some(Entry { data: Data::Str(value), expires_at }) => match parse_i64(value) {
                Some(current) => (current, *expires_at),
                None => return error(NOT_INTEGER),
            },
            Some(_) => return error(WRONG_TYPE),
            None => (0, None),
        };
        let Some(next) = current.checked_add(amount) else {
            return error(NOT_INTEGER);
        };
        self.map.insert(
            key.clone(),
            Entry {
                data: Data::Str(Bytes::from(next.to_string())),
                expires_at,
            },
        );
        Value::Int(next)
    }

    /// Existing live entry of the right kind, or a fresh one; `None` on a
    /// type mismatch.
    fn slot(&mut self, key: &Bytes, now: Instant, empty: Data) -> Option<&mut Data> {
        if self.live_at(key, now).is_none() {
            self.map.insert(
                key.clone(),
                Entry {
                    data: empty.clone(),
                    expires_at: None,
                },
            );
        }
        let entry = self.map.get_mut(key)?;
        if std::mem::discriminant(&entry.data) != std::mem::discriminant(&empty) {
            return None;
        }
        Some(&mut entry.data)
    }

    fn hash_mut(&mut self, key: &Bytes, now: Instant) -> Option<&mut BTreeMap<Bytes, Bytes>> {
        match self.slot(key, now, Data::Hash(BTreeMap::new()))? {
            Data::Hash(fields) => Some(fields),
            _ => None,
        }
    }

    fn set_mut(&mut self, key: &Bytes, now: Instant) -> Option<&mut BTreeSet<Bytes>> {
        match self.slot(key, now, Data::Set(BTreeSet::new()))? {
            Data::Set(members) => Some(members),
            _ => None,
        }
    }

    fn list_mut(&mut self, key: &Bytes, now: Instant) -> Option<&mut VecDeque<Bytes>> {
        match self.slot(key, now, Data::List(VecDeque::new()))? {
            Data::List(items) => Some(items),
            _ => None,
        }
    }

    fn zset_mut(&mut self, key: &Bytes, now: Instant) -> Option<&mut Vec<(f64, Bytes)>> {
        match self.slot(key, now, Data::ZSet(Vec::new()))? {
            Data::ZSet(members) => Some(members),
            _ => None,
        }
    }
}
