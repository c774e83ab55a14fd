//! Page-granularity shared/exclusive locks with deadlock detection.
//!
//! Every page with a holder or a waiter has a `LockQueue`: the granted locks
//! plus the requests blocked on them. A blocked request sleeps on the page's
//! condition variable and is re-evaluated whenever a lock on that page is
//! released. Requests are granted as soon as they are compatible; there is no
//! FIFO ordering among waiters.

pub mod waits_for;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::page::PageId;
use crate::TransactionId;

pub use waits_for::WaitsForGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("deadlock detected")]
    Deadlock,
    #[error("lock wait timed out")]
    Timeout,
    #[error("transaction aborted while waiting for a lock")]
    Cancelled,
    #[error("transaction already finished")]
    Finished,
}

#[derive(Debug)]
struct LockRequest {
    tx_id: TransactionId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockQueue {
    holders: HashMap<TransactionId, LockMode>,
    waiting: VecDeque<LockRequest>,
    cvar: Arc<Condvar>,
}

impl LockQueue {
    /// Returns the transactions holding a lock that conflicts with `mode` for `tx_id`.
    fn conflicting_holders(&self, tx_id: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        self.holders
            .iter()
            .filter(|(holder, held)| {
                **holder != tx_id
                    && (mode == LockMode::Exclusive || **held == LockMode::Exclusive)
            })
            .map(|(holder, _)| *holder)
            .collect()
    }

    /// Whether `tx_id` already holds `mode` or something stronger.
    fn covers(&self, tx_id: TransactionId, mode: LockMode) -> bool {
        match self.holders.get(&tx_id) {
            Some(LockMode::Exclusive) => true,
            Some(LockMode::Shared) => mode == LockMode::Shared,
            None => false,
        }
    }

    fn is_unused(&self) -> bool {
        self.holders.is_empty() && self.waiting.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    pages: HashMap<PageId, LockQueue>,
    held: HashMap<TransactionId, HashSet<PageId>>,
    waiting: HashMap<TransactionId, PageId>,
    cancelled: HashSet<TransactionId>,
    /// Finished transactions at or above `retired_below`.
    retired: HashSet<TransactionId>,
    /// Every id below this has finished.
    retired_below: TransactionId,
}

impl LockTable {
    fn is_retired(&self, tx_id: TransactionId) -> bool {
        tx_id < self.retired_below || self.retired.contains(&tx_id)
    }

    fn waits_for_graph(&self) -> WaitsForGraph {
        let mut graph = WaitsForGraph::new();
        for (tx_id, page_id) in &self.waiting {
            let Some(queue) = self.pages.get(page_id) else {
                continue;
            };
            for request in queue.waiting.iter().filter(|r| r.tx_id == *tx_id) {
                for holder in queue.conflicting_holders(*tx_id, request.mode) {
                    graph.add_edge(*tx_id, holder);
                }
            }
        }
        graph
    }

    /// Removes `tx_id`'s pending request on `page_id`.
    fn dequeue(&mut self, tx_id: TransactionId, page_id: PageId) {
        self.waiting.remove(&tx_id);
        if let Some(queue) = self.pages.get_mut(&page_id) {
            queue.waiting.retain(|r| r.tx_id != tx_id);
            if queue.is_unused() {
                self.pages.remove(&page_id);
            }
        }
    }

    /// Drops `tx_id`'s lock on `page_id` and wakes the page's waiters.
    fn unlock(&mut self, tx_id: TransactionId, page_id: PageId) -> bool {
        let Some(queue) = self.pages.get_mut(&page_id) else {
            return false;
        };
        if queue.holders.remove(&tx_id).is_none() {
            return false;
        }
        queue.cvar.notify_all();
        if queue.is_unused() {
            self.pages.remove(&page_id);
        }
        true
    }
}

/// The lock table of one storage engine instance.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    wait_timeout: Option<Duration>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A lock manager whose waits give up after `timeout` even without a detected cycle.
    pub fn with_wait_timeout(timeout: Option<Duration>) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            wait_timeout: timeout,
        }
    }

    /// Blocks until `tx_id` holds `mode` (or stronger) on `page_id`.
    ///
    /// Fails with `Deadlock` when waiting would close a cycle in the waits-for
    /// graph, `Timeout` when the configured wait bound passes, and `Cancelled`
    /// when the transaction was aborted from elsewhere.
    pub fn acquire(
        &self,
        tx_id: TransactionId,
        page_id: PageId,
        mode: LockMode,
    ) -> Result<(), LockError> {
        let deadline = self.wait_timeout.map(|t| Instant::now() + t);
        let mut table = self.table.lock();
        let mut queued = false;

        loop {
            if table.cancelled.remove(&tx_id) {
                if queued {
                    table.dequeue(tx_id, page_id);
                }
                debug!("tx {tx_id} cancelled while requesting {mode:?} on {page_id:?}");
                return Err(LockError::Cancelled);
            }
            if table.is_retired(tx_id) {
                if queued {
                    table.dequeue(tx_id, page_id);
                }
                warn!("finished tx {tx_id} requested {mode:?} on {page_id:?}");
                return Err(LockError::Finished);
            }

            let queue = table.pages.entry(page_id).or_default();
            if queue.covers(tx_id, mode) {
                if queued {
                    table.dequeue(tx_id, page_id);
                }
                return Ok(());
            }

            if queue.conflicting_holders(tx_id, mode).is_empty() {
                let held = queue.holders.entry(tx_id).or_insert(mode);
                *held = (*held).max(mode);
                if queued {
                    table.dequeue(tx_id, page_id);
                }
                table.held.entry(tx_id).or_default().insert(page_id);
                trace!("tx {tx_id} granted {mode:?} on {page_id:?}");
                return Ok(());
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                table.dequeue(tx_id, page_id);
                warn!("tx {tx_id} timed out waiting for {mode:?} on {page_id:?}");
                return Err(LockError::Timeout);
            }

            let cvar = queue.cvar.clone();
            if !queued {
                queue.waiting.push_back(LockRequest { tx_id, mode });
                table.waiting.insert(tx_id, page_id);
                queued = true;
                debug!("tx {tx_id} blocks on {mode:?} for {page_id:?}");
            }

            if let Some(cycle) = table.waits_for_graph().find_cycle(tx_id) {
                table.dequeue(tx_id, page_id);
                warn!("deadlock on {page_id:?}: cycle {cycle:?}, aborting requester {tx_id}");
                return Err(LockError::Deadlock);
            }

            match deadline {
                Some(d) => {
                    cvar.wait_until(&mut table, d);
                }
                None => cvar.wait(&mut table),
            }
        }
    }

    /// Releases `tx_id`'s lock on `page_id`. Returns `false` if none was held.
    pub fn release(&self, tx_id: TransactionId, page_id: PageId) -> bool {
        let mut table = self.table.lock();
        if !table.unlock(tx_id, page_id) {
            return false;
        }
        if let Some(pages) = table.held.get_mut(&tx_id) {
            pages.remove(&page_id);
            if pages.is_empty() {
                table.held.remove(&tx_id);
            }
        }
        trace!("tx {tx_id} released {page_id:?}");
        true
    }

    /// Releases every lock held by `tx_id`.
    pub fn release_all(&self, tx_id: TransactionId) {
        let mut table = self.table.lock();
        let pages = table.held.remove(&tx_id).unwrap_or_default();
        for page_id in &pages {
            table.unlock(tx_id, *page_id);
        }
        if !table.waiting.contains_key(&tx_id) {
            table.cancelled.remove(&tx_id);
        }
        debug!("tx {tx_id} released {} locks", pages.len());
    }

    /// Marks `tx_id` finished. Every later `acquire` by it fails with
    /// `Finished`, and a blocked wait of it wakes up and fails.
    pub fn retire(&self, tx_id: TransactionId) {
        let mut table = self.table.lock();
        if table.is_retired(tx_id) {
            return;
        }
        table.retired.insert(tx_id);
        if let Some(page_id) = table.waiting.get(&tx_id).copied() {
            if let Some(queue) = table.pages.get(&page_id) {
                queue.cvar.notify_all();
            }
        }
    }

    /// Records that every id below `tx_id` has finished, so their tombstones
    /// collapse into a single bound.
    pub fn retire_below(&self, tx_id: TransactionId) {
        let mut table = self.table.lock();
        if tx_id <= table.retired_below {
            return;
        }
        table.retired_below = tx_id;
        table.retired.retain(|t| *t >= tx_id);
    }

    pub fn is_retired(&self, tx_id: TransactionId) -> bool {
        self.table.lock().is_retired(tx_id)
    }

    /// Wakes `tx_id` if it is blocked; its wait fails with `Cancelled`.
    /// A transaction that is not waiting fails its next acquire instead.
    pub fn cancel(&self, tx_id: TransactionId) {
        let mut table = self.table.lock();
        table.cancelled.insert(tx_id);
        if let Some(page_id) = table.waiting.get(&tx_id).copied() {
            if let Some(queue) = table.pages.get(&page_id) {
                queue.cvar.notify_all();
            }
        }
    }

    pub fn holds_lock(&self, tx_id: TransactionId, page_id: PageId) -> bool {
        self.lock_mode(tx_id, page_id).is_some()
    }

    pub fn lock_mode(&self, tx_id: TransactionId, page_id: PageId) -> Option<LockMode> {
        let table = self.table.lock();
        table
            .pages
            .get(&page_id)
            .and_then(|q| q.holders.get(&tx_id).copied())
    }

    /// Current holders of `page_id`, sorted by transaction id.
    pub fn holders(&self, page_id: PageId) -> Vec<(TransactionId, LockMode)> {
        let table = self.table.lock();
        let mut holders: Vec<_> = table
            .pages
            .get(&page_id)
            .map(|q| q.holders.iter().map(|(t, m)| (*t, *m)).collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }

    /// Pages on which `tx_id` holds a lock, sorted.
    pub fn locked_pages(&self, tx_id: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<_> = table
            .held
            .get(&tx_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    /// Every page some transaction holds a lock on.
    pub fn locked_page_set(&self) -> HashSet<PageId> {
        let table = self.table.lock();
        table
            .pages
            .iter()
            .filter(|(_, q)| !q.holders.is_empty())
            .map(|(page_id, _)| *page_id)
            .collect()
    }

    /// Snapshot of who is waiting for whom.
    pub fn waits_for_graph(&self) -> WaitsForGraph {
        self.table.lock().waits_for_graph()
    }

    /// Number of pages with a holder or waiter.
    pub fn tracked_pages(&self) -> usize {
        self.table.lock().pages.len()
    }
}
