#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use strata::{EngineConfig, Field, HeapFile, StorageEngine, TransactionId, Tuple, TupleDesc, Type};
use tempfile::{tempdir, TempDir};

/// An engine over one table in a temporary directory. The directory lives
/// as long as the `TestDb`.
pub struct TestDb {
    pub engine: StorageEngine,
    pub table: Arc<HeapFile>,
    pub dir: TempDir,
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn setup(config: EngineConfig, desc: TupleDesc) -> TestDb {
    init_logger();
    let dir = tempdir().unwrap();
    let engine = StorageEngine::new(config).unwrap();
    let table = engine.open_table(dir.path().join("table.dat"), desc).unwrap();
    TestDb { engine, table, dir }
}

/// A single `Int` column table on small pages.
pub fn setup_ints(page_size: usize, pool_pages: usize) -> TestDb {
    setup(
        EngineConfig::default()
            .with_page_size(page_size)
            .with_buffer_pool_pages(pool_pages),
        TupleDesc::new(&[Type::Int], &["v"]),
    )
}

pub fn int_tuple(values: &[i32]) -> Tuple {
    Tuple::new(values.iter().map(|v| Field::Int(*v)).collect())
}

/// Inserts `values` as one-column tuples in a transaction of its own and commits.
pub fn insert_committed(db: &TestDb, values: impl IntoIterator<Item = i32>) -> Vec<Tuple> {
    let tx = db.engine.begin();
    let mut inserted = Vec::new();
    for v in values {
        let mut t = int_tuple(&[v]);
        db.engine.insert_tuple(tx, db.table.id(), &mut t).unwrap();
        inserted.push(t);
    }
    db.engine.commit(tx).unwrap();
    inserted
}

/// First column of every tuple visible to `tx`, in scan order.
pub fn scan_ints(db: &TestDb, tx: TransactionId) -> Vec<i32> {
    db.engine
        .scan(tx, db.table.id())
        .unwrap()
        .map(|t| t.unwrap().fields[0].as_int().unwrap())
        .collect()
}

/// Reads every tuple of a committed table in a fresh transaction.
pub fn committed_ints(db: &TestDb) -> Vec<i32> {
    let tx = db.engine.begin();
    let values = scan_ints(db, tx);
    db.engine.commit(tx).unwrap();
    values
}

/// Spins until `tx_id` shows up as a waiter in the lock table.
pub fn wait_until_blocked(engine: &StorageEngine, tx_id: TransactionId) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !engine
        .lock_manager()
        .waits_for_graph()
        .waiters()
        .any(|t| t == tx_id)
    {
        assert!(Instant::now() < deadline, "tx {tx_id} never blocked");
        thread::sleep(Duration::from_millis(5));
    }
}
