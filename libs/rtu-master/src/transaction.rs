//! In-flight transaction tracking
//!
//! A transaction resolves exactly once: by a decoded response, a CRC
//! failure, a timeout or session teardown. Whatever reaches [`TransactionTable`]
//! first removes the entry, so every later event for that identifier finds
//! nothing and is a no-op.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{Result, RtuError};
use crate::frame::ReadResponse;

/// Completion channel back to the caller
pub type Completion = oneshot::Sender<Result<ReadResponse>>;

/// One outstanding request
#[derive(Debug)]
pub struct Transaction {
    pub id: u16,
    pub unit: u8,
    /// Expected response length in bytes
    pub expected_len: usize,
    completion: Completion,
    timeout: Option<(AbortHandle, Duration)>,
    started: Instant,
}

impl Transaction {
    pub fn new(id: u16, unit: u8, expected_len: usize, completion: Completion) -> Self {
        Self {
            id,
            unit,
            expected_len,
            completion,
            timeout: None,
            started: Instant::now(),
        }
    }

    fn resolve(mut self, result: Result<ReadResponse>) {
        if let Some((handle, _)) = self.timeout.take() {
            handle.abort();
        }
        let elapsed = self.started.elapsed();
        if self.completion.send(result).is_err() {
            debug!("TX {} caller gone ({:?})", self.id, elapsed);
        } else {
            debug!("TX {} done in {:?}", self.id, elapsed);
        }
    }
}

/// Maps transaction identifiers to their pending state
#[derive(Debug)]
pub struct TransactionTable {
    pending: HashMap<u16, Transaction>,
    next_id: u16,
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionTable {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    /// Allocate the next identifier. Wraps at 0xFFFF and skips 0.
    pub fn next_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        id
    }

    /// Register a new transaction.
    ///
    /// A second transaction on a live identifier is rejected; its caller is
    /// told through its own completion and the live one is left untouched.
    pub fn register(&mut self, transaction: Transaction) -> Result<()> {
        let id = transaction.id;
        if self.pending.contains_key(&id) {
            let err = RtuError::DuplicatePending(id);
            let _ = transaction.completion.send(Err(err.clone()));
            return Err(err);
        }
        self.pending.insert(id, transaction);
        Ok(())
    }

    /// Attach a timeout timer. The handle is aborted immediately if the
    /// transaction is already gone.
    pub fn arm_timeout(&mut self, id: u16, handle: AbortHandle, after: Duration) {
        match self.pending.get_mut(&id) {
            Some(tx) => tx.timeout = Some((handle, after)),
            None => handle.abort(),
        }
    }

    pub fn get(&self, id: u16) -> Option<&Transaction> {
        self.pending.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.pending.contains_key(&id)
    }

    /// Resolve a transaction. Returns false if it was already resolved.
    pub fn complete(&mut self, id: u16, result: Result<ReadResponse>) -> bool {
        match self.pending.remove(&id) {
            Some(tx) => {
                tx.resolve(result);
                true
            },
            None => false,
        }
    }

    /// Timer fired. No-op when the response won the race.
    pub fn timeout_expired(&mut self, id: u16) -> bool {
        let Some(mut tx) = self.pending.remove(&id) else {
            return false;
        };
        let after = tx
            .timeout
            .take()
            .map(|(_, after)| after)
            .unwrap_or_else(|| tx.started.elapsed());
        tx.resolve(Err(RtuError::Timeout(after)));
        true
    }

    /// Resolve every pending transaction with `err`
    pub fn fail_all(&mut self, err: &RtuError) -> usize {
        let count = self.pending.len();
        for (_, tx) in self.pending.drain() {
            tx.resolve(Err(err.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
