//! The buffer pool: a bounded cache of heap pages shared by all transactions.
//!
//! Every page access goes through `get_page`, which takes the matching page
//! lock before the page is handed out. Pages written by a transaction stay
//! `Dirty` until it completes: commit writes them back, abort drops them so
//! the next access rereads the on-disk image. Dirty pages are never evicted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::error::{DbError, Result};
use crate::heap_file::{HeapFile, HeapFileIterator};
use crate::lock_manager::{LockError, LockManager, LockMode};
use crate::page::{HeapPage, PageId};
use crate::tuple::Tuple;
use crate::{TableId, TransactionId};

/// A cached page. The `RwLock` is a short-term latch; page locks are what
/// order transactions.
pub type PageHandle = Arc<RwLock<HeapPage>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Ownership state of a cached page. A page that is not cached is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Matches the on-disk image.
    Clean,
    /// Holds uncommitted writes of the given transaction.
    Dirty(TransactionId),
}

#[derive(Debug)]
struct CacheEntry {
    page: PageHandle,
    state: PageState,
    last_used: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    entries: HashMap<PageId, CacheEntry>,
    tick: u64,
}

impl PoolState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

pub struct BufferPool {
    capacity: usize,
    page_size: usize,
    lock_manager: Arc<LockManager>,
    files: RwLock<HashMap<TableId, Arc<HeapFile>>>,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(capacity: usize, page_size: usize, lock_manager: Arc<LockManager>) -> Self {
        Self {
            capacity,
            page_size,
            lock_manager,
            files: RwLock::new(HashMap::new()),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Makes `file` reachable by its table id.
    pub fn register_file(&self, file: Arc<HeapFile>) -> Result<()> {
        if file.page_size() != self.page_size {
            return Err(DbError::InvalidConfig(format!(
                "table {} uses {} byte pages, the pool uses {}",
                file.id(),
                file.page_size(),
                self.page_size
            )));
        }
        debug!("registered table {} at {:?}", file.id(), file.path());
        self.files.write().insert(file.id(), file);
        Ok(())
    }

    pub fn file(&self, table_id: TableId) -> Result<Arc<HeapFile>> {
        self.files
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(DbError::NoSuchTable(table_id))
    }

    /// Returns the page after taking a shared (`ReadOnly`) or exclusive
    /// (`ReadWrite`) lock on it for `tx_id`. Blocks while the lock conflicts.
    pub fn get_page(
        &self,
        tx_id: TransactionId,
        page_id: PageId,
        perm: Permissions,
    ) -> Result<PageHandle> {
        let file = self.file(page_id.table_id)?;
        self.lock_manager.acquire(tx_id, page_id, perm.lock_mode())?;

        let mut state = self.state.lock();
        let tick = state.next_tick();
        if let Some(entry) = state.entries.get_mut(&page_id) {
            entry.last_used = tick;
            return Ok(entry.page.clone());
        }

        while state.entries.len() >= self.capacity {
            self.evict_page(&mut state)?;
        }
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));
        state.entries.insert(
            page_id,
            CacheEntry {
                page: page.clone(),
                state: PageState::Clean,
                last_used: tick,
            },
        );
        trace!("loaded {:?} for tx {}", page_id, tx_id);
        Ok(page)
    }

    /// Drops the least recently used clean page, preferring pages nobody has locked.
    fn evict_page(&self, state: &mut PoolState) -> Result<()> {
        let locked = self.lock_manager.locked_page_set();
        let victim = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == PageState::Clean)
            .min_by_key(|(page_id, entry)| (locked.contains(*page_id), entry.last_used))
            .map(|(page_id, _)| *page_id);

        match victim {
            Some(page_id) => {
                state.entries.remove(&page_id);
                trace!("evicted {:?}", page_id);
                Ok(())
            }
            None => {
                warn!("buffer pool full: all {} pages are dirty", state.entries.len());
                Err(DbError::BufferPoolFull {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Inserts `tuple` into table `table_id` and records the written page as
    /// dirty. On success the tuple carries its new record id.
    pub fn insert_tuple(
        &self,
        tx_id: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> Result<()> {
        let file = self.file(table_id)?;
        file.insert_tuple(self, tx_id, tuple)?;
        Ok(())
    }

    /// Deletes `tuple` (located by its record id) and records the written page as dirty.
    pub fn delete_tuple(&self, tx_id: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple
            .record_id
            .ok_or_else(|| DbError::TupleNotFound(format!("tuple ({tuple}) has no record id")))?;
        let file = self.file(rid.page_id.table_id)?;
        file.delete_tuple(self, tx_id, tuple)?;
        Ok(())
    }

    /// Claims `page` for writing by `tx_id`. Must be called before the page
    /// is modified, while `tx_id` holds an exclusive lock on it; a finished
    /// transaction is refused. The entry is put (back) in the cache as dirty
    /// and does not count against eviction, so the cache may briefly exceed
    /// its capacity.
    pub fn mark_dirty(&self, tx_id: TransactionId, page_id: PageId, page: &PageHandle) -> Result<()> {
        let mut state = self.state.lock();
        if self.lock_manager.is_retired(tx_id) {
            return Err(LockError::Finished.into());
        }
        if self.lock_manager.lock_mode(tx_id, page_id) != Some(LockMode::Exclusive) {
            return Err(DbError::NotLockedExclusive { tx_id, page: page_id });
        }
        let tick = state.next_tick();
        state.entries.insert(
            page_id,
            CacheEntry {
                page: page.clone(),
                state: PageState::Dirty(tx_id),
                last_used: tick,
            },
        );
        Ok(())
    }

    /// Releases `tx_id`'s lock on `page_id` before the transaction ends.
    /// Only for pages that were looked at and not used.
    pub fn unsafe_release_page(&self, tx_id: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.release(tx_id, page_id)
    }

    pub fn holds_lock(&self, tx_id: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds_lock(tx_id, page_id)
    }

    /// Ends `tx_id`. Commit writes its dirty pages back; abort discards them.
    /// Either way every lock of the transaction is released.
    pub fn transaction_complete(&self, tx_id: TransactionId, commit: bool) -> Result<()> {
        // Refuse new locks and writes first so nothing lands after the discard.
        self.lock_manager.retire(tx_id);
        let result = if commit {
            self.flush_pages(tx_id)
        } else {
            Ok(())
        };
        // After a failed flush the unwritten pages are dropped like an abort.
        let discarded = self.discard_pages(tx_id);
        self.lock_manager.release_all(tx_id);
        match &result {
            Ok(()) if commit => debug!("tx {tx_id} committed"),
            Ok(()) => debug!("tx {tx_id} aborted, discarded {discarded} pages"),
            Err(e) => warn!("tx {tx_id} commit failed, discarded {discarded} pages: {e}"),
        }
        result
    }

    /// Writes back every page dirtied by `tx_id` and syncs the files involved.
    pub fn flush_pages(&self, tx_id: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        let mut page_ids: Vec<PageId> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == PageState::Dirty(tx_id))
            .map(|(page_id, _)| *page_id)
            .collect();
        page_ids.sort();
        self.write_back(&mut state, &page_ids)
    }

    /// Writes back one page if it is dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        self.write_back(&mut state, &[page_id])
    }

    /// Writes back every dirty page, whoever owns it. Breaks no-steal if a
    /// writer is still running; meant for shutdown and tests.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut state = self.state.lock();
        let mut page_ids: Vec<PageId> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.state != PageState::Clean)
            .map(|(page_id, _)| *page_id)
            .collect();
        page_ids.sort();
        self.write_back(&mut state, &page_ids)
    }

    fn write_back(&self, state: &mut PoolState, page_ids: &[PageId]) -> Result<()> {
        let mut touched = HashSet::new();
        for page_id in page_ids {
            let Some(entry) = state.entries.get_mut(page_id) else {
                continue;
            };
            if entry.state == PageState::Clean {
                continue;
            }
            let file = self.file(page_id.table_id)?;
            file.write_page(&entry.page.read())?;
            entry.state = PageState::Clean;
            touched.insert(page_id.table_id);
        }
        for table_id in touched {
            self.file(table_id)?.sync()?;
        }
        Ok(())
    }

    /// Drops every page dirtied by `tx_id` without writing it.
    fn discard_pages(&self, tx_id: TransactionId) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| entry.state != PageState::Dirty(tx_id));
        before - state.entries.len()
    }

    /// Removes a page from the cache without writing it.
    pub fn discard_page(&self, page_id: PageId) {
        self.state.lock().entries.remove(&page_id);
    }

    pub fn page_state(&self, page_id: PageId) -> Option<PageState> {
        self.state.lock().entries.get(&page_id).map(|e| e.state)
    }

    /// Number of resident pages.
    pub fn cached_pages(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Pages currently dirtied by `tx_id`, sorted.
    pub fn dirty_pages(&self, tx_id: TransactionId) -> Vec<PageId> {
        let state = self.state.lock();
        let mut pages: Vec<_> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == PageState::Dirty(tx_id))
            .map(|(page_id, _)| *page_id)
            .collect();
        pages.sort();
        pages
    }

    /// Iterates table `table_id` for `tx_id`.
    pub fn scan(self: &Arc<Self>, tx_id: TransactionId, table_id: TableId) -> Result<HeapFileIterator> {
        let file = self.file(table_id)?;
        Ok(file.iterator(self.clone(), tx_id))
    }
}
