//! A storage engine instance: one lock table, one buffer pool and one
//! transaction manager, shared by every transaction that runs against it.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::buffer_pool::{BufferPool, PageHandle, Permissions};
use crate::config::EngineConfig;
use crate::error::{DbError, Result};
use crate::heap_file::{HeapFile, HeapFileIterator};
use crate::lock_manager::LockManager;
use crate::page::PageId;
use crate::transaction::TransactionManager;
use crate::tuple::{Tuple, TupleDesc};
use crate::{TableId, TransactionId};

pub struct StorageEngine {
    config: EngineConfig,
    lock_manager: Arc<LockManager>,
    buffer_pool: Arc<BufferPool>,
    tx_manager: TransactionManager,
}

impl StorageEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let lock_manager = Arc::new(LockManager::with_wait_timeout(config.lock_wait_timeout));
        let buffer_pool = Arc::new(BufferPool::new(
            config.buffer_pool_pages,
            config.page_size,
            lock_manager.clone(),
        ));
        info!(
            "storage engine started: {} byte pages, {} page buffer pool",
            config.page_size, config.buffer_pool_pages
        );
        Ok(Self {
            config,
            lock_manager,
            buffer_pool,
            tx_manager: TransactionManager::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.tx_manager
    }

    /// Opens (or creates) the heap file at `path` and makes it reachable
    /// through the buffer pool.
    pub fn open_table<P: AsRef<Path>>(&self, path: P, desc: TupleDesc) -> Result<Arc<HeapFile>> {
        let file = Arc::new(HeapFile::open(path, desc, self.config.page_size)?);
        self.buffer_pool.register_file(file.clone())?;
        Ok(file)
    }

    pub fn begin(&self) -> TransactionId {
        self.tx_manager.begin()
    }

    pub fn commit(&self, tx_id: TransactionId) -> Result<()> {
        self.complete(tx_id, true)
    }

    /// Aborts `tx_id`, waking it first if it is blocked on a lock.
    pub fn abort(&self, tx_id: TransactionId) -> Result<()> {
        self.lock_manager.cancel(tx_id);
        self.complete(tx_id, false)
    }

    fn complete(&self, tx_id: TransactionId, commit: bool) -> Result<()> {
        if !self.tx_manager.finish(tx_id) {
            return Err(DbError::UnknownTransaction(tx_id));
        }
        let result = self.buffer_pool.transaction_complete(tx_id, commit);
        self.lock_manager
            .retire_below(self.tx_manager.oldest_running());
        result
    }

    fn check_active(&self, tx_id: TransactionId) -> Result<()> {
        if self.tx_manager.is_active(tx_id) {
            Ok(())
        } else {
            Err(DbError::UnknownTransaction(tx_id))
        }
    }

    pub fn get_page(
        &self,
        tx_id: TransactionId,
        page_id: PageId,
        perm: Permissions,
    ) -> Result<PageHandle> {
        self.check_active(tx_id)?;
        self.buffer_pool.get_page(tx_id, page_id, perm)
    }

    pub fn insert_tuple(
        &self,
        tx_id: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> Result<()> {
        self.check_active(tx_id)?;
        self.buffer_pool.insert_tuple(tx_id, table_id, tuple)
    }

    pub fn delete_tuple(&self, tx_id: TransactionId, tuple: &Tuple) -> Result<()> {
        self.check_active(tx_id)?;
        self.buffer_pool.delete_tuple(tx_id, tuple)
    }

    pub fn scan(&self, tx_id: TransactionId, table_id: TableId) -> Result<HeapFileIterator> {
        self.check_active(tx_id)?;
        self.buffer_pool.scan(tx_id, table_id)
    }

    /// Writes every dirty page back. Transactions still running at this
    /// point lose their isolation.
    pub fn shutdown(&self) -> Result<()> {
        let active = self.tx_manager.active();
        if !active.is_empty() {
            warn!("shutting down with {} running transactions: {:?}", active.len(), active);
        }
        self.buffer_pool.flush_all_pages()?;
        debug!("storage engine shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Field, Type};
    use tempfile::tempdir;

    fn engine() -> StorageEngine {
        StorageEngine::new(EngineConfig::default().with_page_size(256)).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig::default().with_buffer_pool_pages(0);
        assert!(matches!(
            StorageEngine::new(config),
            Err(DbError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_finished_transaction_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = engine();
        let table = engine
            .open_table(dir.path().join("t.dat"), TupleDesc::from_types(&[Type::Int]))
            .unwrap();

        let tx = engine.begin();
        let mut t = Tuple::new(vec![Field::Int(1)]);
        engine.insert_tuple(tx, table.id(), &mut t).unwrap();
        engine.commit(tx).unwrap();

        let mut again = Tuple::new(vec![Field::Int(2)]);
        assert!(matches!(
            engine.insert_tuple(tx, table.id(), &mut again),
            Err(DbError::UnknownTransaction(id)) if id == tx
        ));
        assert!(matches!(engine.commit(tx), Err(DbError::UnknownTransaction(_))));
        assert!(matches!(engine.abort(999), Err(DbError::UnknownTransaction(999))));
    }

    #[test]
    fn test_finished_ids_collapse_into_a_bound() {
        let engine = engine();
        let t1 = engine.begin();
        let t2 = engine.begin();
        engine.commit(t2).unwrap();
        assert!(engine.lock_manager().is_retired(t2));
        assert!(!engine.lock_manager().is_retired(t1));

        engine.abort(t1).unwrap();
        assert!(engine.lock_manager().is_retired(t1));
        let t3 = engine.begin();
        assert!(!engine.lock_manager().is_retired(t3));
    }

    #[test]
    fn test_scan_sees_own_writes() {
        let dir = tempdir().unwrap();
        let engine = engine();
        let table = engine
            .open_table(dir.path().join("t.dat"), TupleDesc::from_types(&[Type::Int]))
            .unwrap();

        let tx = engine.begin();
        for v in 0..5 {
            engine
                .insert_tuple(tx, table.id(), &mut Tuple::new(vec![Field::Int(v)]))
                .unwrap();
        }
        let values: Vec<i32> = engine
            .scan(tx, table.id())
            .unwrap()
            .map(|t| t.unwrap().fields[0].as_int().unwrap())
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        engine.abort(tx).unwrap();
        engine.shutdown().unwrap();
    }
}
