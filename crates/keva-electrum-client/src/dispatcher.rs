//! Pending-call table: correlates responses with the calls waiting for them
//!
//! Every outbound request gets a fresh numeric id from a per-connection counter. Single calls
//! are stored under their own id. A batch is stored once, as a [`BatchRequest`] under the
//! last id it allocated, and every member id points back to that key so the batch can be
//! found from any element of the array response.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use keva_electrum_json_rpc::{JsonRpcErrorObject, JsonRpcResponse};

use crate::error::{ElectrumClientError, ElectrumClientResult, ProtocolError};

/// Outcome of a single call
pub type CallResult = ElectrumClientResult<Value>;

/// Outcome of a batch call
pub type BatchResult = ElectrumClientResult<Vec<BatchEntry>>;

/// One element of a batch response, annotated with the parameter that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub id: u64,
    pub param: Value,
    pub outcome: Result<Value, JsonRpcErrorObject>,
}

impl BatchEntry {
    pub fn result(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&JsonRpcErrorObject> {
        self.outcome.as_ref().err()
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Server errors become [`ElectrumClientError::ServerError`]
    pub fn into_result(self) -> ElectrumClientResult<Value> {
        self.outcome.map_err(ElectrumClientError::from)
    }
}

/// A batch awaiting its array response
#[derive(Debug)]
pub struct BatchRequest {
    params: BTreeMap<u64, Value>,
    sender: oneshot::Sender<BatchResult>,
}

impl BatchRequest {
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.params.keys().copied()
    }

    pub fn param(&self, id: u64) -> Option<&Value> {
        self.params.get(&id)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[derive(Debug)]
enum PendingCall {
    Single(oneshot::Sender<CallResult>),
    Batch(BatchRequest),
}

#[derive(Debug, Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    /// member id -> key of the owning batch
    batch_members: HashMap<u64, u64>,
}

impl PendingTable {
    fn remove_batch(&mut self, key: u64) -> Option<BatchRequest> {
        match self.calls.remove(&key) {
            Some(PendingCall::Batch(batch)) => {
                for id in batch.params.keys() {
                    self.batch_members.remove(id);
                }
                Some(batch)
            }
            Some(other) => {
                self.calls.insert(key, other);
                None
            }
            None => None,
        }
    }
}

/// Id allocator and pending-call table of one connection
#[derive(Debug, Default)]
pub struct Dispatcher {
    last_id: AtomicU64,
    table: parking_lot::Mutex<PendingTable>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id; the first id is 1
    pub fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last id handed out, 0 if none
    pub fn last_id(&self) -> u64 {
        self.last_id.load(Ordering::SeqCst)
    }

    /// Register a single call under `id`
    pub fn register_call(&self, id: u64) -> oneshot::Receiver<CallResult> {
        let (sender, receiver) = oneshot::channel();
        self.table.lock().calls.insert(id, PendingCall::Single(sender));
        receiver
    }

    /// Register one settlement for a batch whose members are `params` (id -> param).
    ///
    /// Returns the key the batch is stored under, the last allocated id.
    pub fn register_batch(
        &self,
        params: BTreeMap<u64, Value>,
    ) -> ElectrumClientResult<(u64, oneshot::Receiver<BatchResult>)> {
        let key = params
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| ElectrumClientError::generic("cannot register an empty batch"))?;

        let (sender, receiver) = oneshot::channel();
        let mut table = self.table.lock();
        for id in params.keys() {
            table.batch_members.insert(*id, key);
        }
        table
            .calls
            .insert(key, PendingCall::Batch(BatchRequest { params, sender }));
        Ok((key, receiver))
    }

    /// Drop a registration whose request never made it onto the wire
    pub fn unregister(&self, key: u64) {
        let mut table = self.table.lock();
        if table.remove_batch(key).is_none() {
            table.calls.remove(&key);
        }
    }

    /// Settle the call matching a single-object response.
    ///
    /// Returns `false` when no call was waiting for the response id.
    pub fn settle_response(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.numeric_id() else {
            warn!(response = ?response, "Response without a numeric id");
            return false;
        };

        let mut table = self.table.lock();
        if let Some(key) = table.batch_members.get(&id).copied() {
            let Some(batch) = table.remove_batch(key) else {
                return false;
            };
            drop(table);
            warn!(id = id, batch = key, "Batch answered by a single response");
            let outcome = match response.into_result() {
                Err(error) => Err(ElectrumClientError::from(error)),
                Ok(_) => Err(ProtocolError::InvalidResponse(format!(
                    "batch {} answered by a single response for id {}",
                    key, id
                ))
                .into()),
            };
            batch.sender.send(outcome).ok();
            return true;
        }

        let call = table.calls.remove(&id);
        match call {
            Some(PendingCall::Single(sender)) => {
                drop(table);
                debug!(id = id, "Settling call");
                sender
                    .send(response.into_result().map_err(ElectrumClientError::from))
                    .ok();
                true
            }
            Some(batch @ PendingCall::Batch(_)) => {
                // unreachable while batch_members is consistent
                table.calls.insert(id, batch);
                false
            }
            None => {
                drop(table);
                warn!(id = id, "{}", ProtocolError::UnmatchedResponse(id.to_string()));
                false
            }
        }
    }

    /// Settle from an array response.
    ///
    /// Elements are matched by id, never by position. Each batch touched is settled once with
    /// its entries in the order the server returned them. Elements with unknown ids are
    /// dropped. Returns the number of settlements performed.
    pub fn settle_batch(&self, responses: Vec<JsonRpcResponse>) -> usize {
        if responses.is_empty() {
            warn!("Empty batch response");
            return 0;
        }

        let mut grouped: Vec<(u64, Vec<JsonRpcResponse>)> = Vec::new();
        let mut singles = Vec::new();
        {
            let table = self.table.lock();
            for response in responses {
                let Some(id) = response.numeric_id() else {
                    warn!(response = ?response, "Batch element without a numeric id");
                    continue;
                };
                if let Some(key) = table.batch_members.get(&id).copied() {
                    match grouped.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, items)) => items.push(response),
                        None => grouped.push((key, vec![response])),
                    }
                } else if matches!(table.calls.get(&id), Some(PendingCall::Single(_))) {
                    singles.push(response);
                } else {
                    warn!(id = id, "{}", ProtocolError::UnmatchedResponse(id.to_string()));
                }
            }
        }

        let mut settled = 0;
        for response in singles {
            if self.settle_response(response) {
                settled += 1;
            }
        }

        for (key, items) in grouped {
            let Some(mut batch) = self.table.lock().remove_batch(key) else {
                continue;
            };
            let mut entries = Vec::with_capacity(items.len());
            for response in items {
                let Some(id) = response.numeric_id() else {
                    continue;
                };
                let Some(param) = batch.params.remove(&id) else {
                    warn!(id = id, batch = key, "Duplicate batch element");
                    continue;
                };
                entries.push(BatchEntry {
                    id,
                    param,
                    outcome: response.into_result(),
                });
            }
            if !batch.params.is_empty() {
                warn!(
                    batch = key,
                    missing = batch.params.len(),
                    "Batch response is missing elements"
                );
            }
            debug!(batch = key, entries = entries.len(), "Settling batch");
            batch.sender.send(Ok(entries)).ok();
            settled += 1;
        }
        settled
    }

    /// Reject every pending call with the error produced by `make_error` and clear the table.
    ///
    /// Returns the number of calls rejected.
    pub fn fail_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> ElectrumClientError,
    {
        let drained: Vec<PendingCall> = {
            let mut table = self.table.lock();
            table.batch_members.clear();
            table.calls.drain().map(|(_, call)| call).collect()
        };

        let count = drained.len();
        for call in drained {
            match call {
                PendingCall::Single(sender) => {
                    sender.send(Err(make_error())).ok();
                }
                PendingCall::Batch(batch) => {
                    batch.sender.send(Err(make_error())).ok();
                }
            }
        }
        if count > 0 {
            debug!(count = count, "Failed all pending calls");
        }
        count
    }

    /// Number of outstanding settlements (a batch counts once)
    pub fn pending_count(&self) -> usize {
        self.table.lock().calls.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        let table = self.table.lock();
        table.calls.contains_key(&id) || table.batch_members.contains_key(&id)
    }
}
