//! Transaction id allocation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::TransactionId;

#[derive(Debug, Default)]
struct TransactionManagerState {
    next_transaction_id: AtomicU32,
    active_transactions: Mutex<HashSet<TransactionId>>,
}

/// Hands out transaction ids and remembers which transactions are running.
/// Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct TransactionManager {
    state: Arc<TransactionManagerState>,
}

impl TransactionManager {
    pub fn new(initial_tx_id: TransactionId) -> Self {
        let state = TransactionManagerState {
            next_transaction_id: AtomicU32::new(initial_tx_id),
            active_transactions: Mutex::new(HashSet::new()),
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Begins a new transaction and returns its id.
    pub fn begin(&self) -> TransactionId {
        // Allocated under the set's lock so `oldest_running` never misses it.
        let mut active = self.state.active_transactions.lock();
        let tx_id = self
            .state
            .next_transaction_id
            .fetch_add(1, Ordering::SeqCst);
        active.insert(tx_id);
        trace!("began tx {tx_id}");
        tx_id
    }

    /// Marks `tx_id` finished. Returns `false` if it was not running.
    pub fn finish(&self, tx_id: TransactionId) -> bool {
        self.state.active_transactions.lock().remove(&tx_id)
    }

    pub fn is_active(&self, tx_id: TransactionId) -> bool {
        self.state.active_transactions.lock().contains(&tx_id)
    }

    /// Every id below the returned one belongs to a finished transaction.
    pub fn oldest_running(&self) -> TransactionId {
        let active = self.state.active_transactions.lock();
        active.iter().copied().min().unwrap_or_else(|| {
            self.state.next_transaction_id.load(Ordering::SeqCst)
        })
    }

    /// Running transactions, sorted.
    pub fn active(&self) -> Vec<TransactionId> {
        let mut active: Vec<_> = self
            .state
            .active_transactions
            .lock()
            .iter()
            .copied()
            .collect();
        active.sort();
        active
    }
}
