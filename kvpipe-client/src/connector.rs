//! # Registry Integration
//!
//! Purpose: Plug a `KVClient` into a `kvpipe::ConnectionRegistry` so pipelines
//! execute against a real server.
//!
//! ## Design Principles
//! 1. **One Trip per Batch**: `ClientPipeline::execute` sends every queued
//!    command with one write and reads the replies in order.
//! 2. **Optional Atomicity**: A transactional handle brackets the batch with
//!    MULTI/EXEC and returns the EXEC array as the batch's replies.
//! 3. **Replies as Values**: Error replies become `Value::Error` for their own
//!    future; only transport failures fail the batch.

use bytes::Bytes;
use kvpipe::{BackendError, BatchHandle, Command, Connector, PipeResult, PoolId, Value};
use tracing::{debug, warn};

use crate::client::{ClientError, KVClient};
use crate::resp::RespValue;

impl From<RespValue> for Value {
    fn from(reply: RespValue) -> Self {
        match reply {
            RespValue::Simple(text) => Value::Status(String::from_utf8_lossy(&text).into_owned()),
            RespValue::Error(message) => Value::Error(String::from_utf8_lossy(&message).into_owned()),
            RespValue::Integer(value) => Value::Int(value),
            RespValue::Bulk(data) => data.map_or(Value::Nil, Value::Data),
            RespValue::Array(items) => items.map_or(Value::Nil, |items| {
                Value::Array(items.into_iter().map(Value::from).collect())
            }),
        }
    }
}

/// Batch handle over a `KVClient`.
pub struct ClientPipeline {
    client: KVClient,
    transactional: bool,
    queued: Vec<Vec<Bytes>>,
}

impl ClientPipeline {
    pub(crate) fn new(client: KVClient, transactional: bool) -> Self {
        ClientPipeline {
            client,
            transactional,
            queued: Vec::new(),
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Commands queued and not yet sent.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    fn run_transaction(&self, commands: Vec<Vec<Bytes>>) -> Result<Vec<RespValue>, ClientError> {
        let count = commands.len();
        let mut framed = Vec::with_capacity(count + 2);
        framed.push(Command::multi().to_parts());
        framed.extend(commands);
        framed.push(Command::exec().to_parts());

        let mut replies = self.client.exec_batch(&framed)?;
        let exec = replies.pop().ok_or(ClientError::Protocol)?;
        // Queue-time rejections surface before EXEC.
        if let Some(RespValue::Error(message)) = replies.into_iter().find(|reply| matches!(reply, RespValue::Error(_))) {
            warn!(error = %String::from_utf8_lossy(&message), "transaction rejected while queueing");
            return Err(ClientError::Server { message });
        }
        match exec {
            RespValue::Array(Some(items)) => Ok(items),
            RespValue::Array(None) => Err(ClientError::TransactionAborted),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

impl BatchHandle for ClientPipeline {
    fn queue(&mut self, command: &Command) {
        self.queued.push(command.to_parts());
    }

    fn execute(&mut self) -> Result<Vec<Value>, BackendError> {
        let commands = std::mem::take(&mut self.queued);
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        debug!(commands = commands.len(), transactional = self.transactional, "executing client batch");

        let replies = if self.transactional {
            self.run_transaction(commands)?
        } else {
            self.client.exec_batch(&commands)?
        };
        Ok(replies.into_iter().map(Value::from).collect())
    }
}

/// Binds a `KVClient` into a registry.
///
/// ```no_run
/// use kvpipe::ConnectionRegistry;
/// use kvpipe_client::{ClientConnector, KVClient};
///
/// let registry = ConnectionRegistry::new();
/// let client = KVClient::connect("127.0.0.1:6379")?;
/// registry.connect(ClientConnector::new(client.clone()), None)?;
/// registry.connect(ClientConnector::new(client).transactional(), Some("atomic"))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// Both names share one pool, so the second bind is accepted.
#[derive(Clone)]
pub struct ClientConnector {
    client: KVClient,
    transactional: bool,
}

impl ClientConnector {
    pub fn new(client: KVClient) -> Self {
        ClientConnector {
            client,
            transactional: false,
        }
    }

    /// Wraps every batch from this connector in MULTI/EXEC.
    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }

    pub fn client(&self) -> &KVClient {
        &self.client
    }
}

impl Connector for ClientConnector {
    fn pool_id(&self) -> PoolId {
        self.client.pool_id()
    }

    fn batch(&self) -> PipeResult<Box<dyn BatchHandle>> {
        Ok(Box::new(ClientPipeline::new(self.client.clone(), self.transactional)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_convert_to_values() {
        assert_eq!(Value::from(RespValue::Simple(b"OK".to_vec())), Value::Status("OK".into()));
        assert_eq!(Value::from(RespValue::Error(b"ERR no".to_vec())), Value::Error("ERR no".into()));
        assert_eq!(Value::from(RespValue::Integer(3)), Value::Int(3));
        assert_eq!(Value::from(RespValue::Bulk(None)), Value::Nil);
        assert_eq!(Value::from(RespValue::Array(None)), Value::Nil);
        assert_eq!(
            Value::from(RespValue::Array(Some(vec![
                RespValue::Bulk(Some(Bytes::from_static(b"a"))),
                RespValue::Integer(1),
            ]))),
            Value::Array(vec![Value::from("a"), Value::Int(1)])
        );
    }

    #[test]
    fn connector_reports_client_pool() {
        let client = KVClient::connect("127.0.0.1:6379").unwrap();
        let connector = ClientConnector::new(client.clone()).transactional();
        assert_eq!(connector.pool_id(), client.pool_id());
        assert!(connector.batch().is_ok());
    }

    #[test]
    fn queue_does_no_io() {
        let client = KVClient::connect("127.0.0.1:1").unwrap();
        let mut pipeline = client.pipeline();
        pipeline.queue(&Command::get(b"k"));
        pipeline.queue(&Command::incr(b"n"));
        assert_eq!(pipeline.len(), 2);
        assert!(!pipeline.is_transactional());
    }
}
