/// Two-phase memory commit
///
/// Phase 1 (`prepare`) appends to the ledger's pending list and is a plain state
/// mutation, checkpointed with the step that produced it. Phase 2 (`flush`) runs
/// from the dedicated commit step, after that checkpoint exists, and pushes
/// pending items to the long-term store under keys derived from
/// `(run_id, sequence)` so re-flushing after a crash is a no-op on the store side.

use crate::error::PortError;
use crate::ports::{MemoryStorePort, MemoryWrite};
use crate::workflow::types::{MemoryItem, MemoryKind, MemoryLedger, Step};
use std::collections::HashSet;
use std::sync::Arc;

/// Deterministic idempotency key for a memory item
pub fn memory_key(run_id: &str, sequence: u64) -> String {
    format!("{}:{}", run_id, sequence)
}

/// Outcome of one flush attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub committed: usize,
    pub remaining: usize,
}

#[derive(Clone)]
pub struct MemoryCommitter {
    store: Arc<dyn MemoryStorePort>,
}

impl std::fmt::Debug for MemoryCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCommitter").finish_non_exhaustive()
    }
}

impl MemoryCommitter {
    pub fn new(store: Arc<dyn MemoryStorePort>) -> Self {
        Self { store }
    }

    /// Queue a memory item (phase 1). Pure; no external call.
    pub fn prepare(ledger: &mut MemoryLedger, run_id: &str, kind: MemoryKind, content: String, source_step: Step) {
        let sequence = ledger.next_sequence;
        ledger.next_sequence += 1;
        ledger.pending.push(MemoryItem {
            sequence,
            idempotency_key: memory_key(run_id, sequence),
            kind,
            content,
            source_step,
        });
    }

    /// Flush every pending item (phase 2)
    ///
    /// Acknowledged items move to `committed` in order; unacknowledged ones stay
    /// pending for the next attempt. A transport failure leaves the ledger as it was.
    pub async fn flush(&self, ledger: &mut MemoryLedger, tenant_id: &str) -> Result<FlushReport, PortError> {
        if ledger.pending.is_empty() {
            return Ok(FlushReport { committed: 0, remaining: 0 });
        }

        let writes: Vec<MemoryWrite> = ledger
            .pending
            .iter()
            .map(|item| MemoryWrite {
                idempotency_key: item.idempotency_key.clone(),
                tenant_id: tenant_id.to_string(),
                kind: item.kind,
                content: item.content.clone(),
            })
            .collect();

        tracing::debug!("🧠 Flushing {} pending memory item(s)", writes.len());
        let acks = self.store.write_many(&writes).await?;

        let stored: HashSet<&str> = acks
            .iter()
            .filter(|ack| ack.stored)
            .map(|ack| ack.idempotency_key.as_str())
            .collect();

        let (flushed, still_pending): (Vec<MemoryItem>, Vec<MemoryItem>) = ledger
            .pending
            .drain(..)
            .partition(|item| stored.contains(item.idempotency_key.as_str()));

        // An item is committed at most once even if it was somehow pending twice.
        let mut committed = 0;
        for item in flushed {
            if !ledger.committed.iter().any(|c| c.idempotency_key == item.idempotency_key) {
                ledger.committed.push(item);
                committed += 1;
            }
        }
        ledger.pending = still_pending;

        Ok(FlushReport {
            committed,
            remaining: ledger.pending.len(),
        })
    }
}
