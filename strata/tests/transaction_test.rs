use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serial_test::serial;
use strata::page::slots_per_page;
use strata::{
    DbError, EngineConfig, HeapFile, LockError, LockMode, PageId, PageState, Permissions,
    StorageEngine, TupleDesc, Type,
};

mod common;

#[test]
fn test_commit_is_durable_across_engines() {
    let db = common::setup_ints(256, 8);
    common::insert_committed(&db, [5, 6, 7]);
    let path = db.table.path().to_path_buf();

    // No shutdown: commit alone must have reached the file.
    let reopened = StorageEngine::new(EngineConfig::default().with_page_size(256)).unwrap();
    let table = reopened
        .open_table(&path, TupleDesc::from_types(&[Type::Int]))
        .unwrap();
    assert_eq!(table.id(), db.table.id());
    let tx = reopened.begin();
    let values: Vec<i32> = reopened
        .scan(tx, table.id())
        .unwrap()
        .map(|t| t.unwrap().fields[0].as_int().unwrap())
        .collect();
    reopened.commit(tx).unwrap();
    assert_eq!(values, vec![5, 6, 7]);
}

#[test]
fn test_abort_restores_committed_state() {
    let db = common::setup_ints(256, 8);
    let inserted = common::insert_committed(&db, [1, 2, 3]);

    let tx = db.engine.begin();
    db.engine.delete_tuple(tx, &inserted[0]).unwrap();
    let mut extra = common::int_tuple(&[99]);
    db.engine.insert_tuple(tx, db.table.id(), &mut extra).unwrap();
    assert_eq!(common::scan_ints(&db, tx), vec![99, 2, 3]);
    let pid = extra.record_id.unwrap().page_id;
    assert_eq!(db.engine.buffer_pool().page_state(pid), Some(PageState::Dirty(tx)));
    db.engine.abort(tx).unwrap();

    assert_eq!(db.engine.buffer_pool().page_state(pid), None);
    assert_eq!(common::committed_ints(&db), vec![1, 2, 3]);
    let on_disk = db.table.read_page(pid).unwrap();
    assert_eq!(on_disk.tuples().count(), 3);
}

#[test]
fn test_dirty_pages_are_never_written_before_commit() {
    let db = common::setup_ints(64, 2);
    let per_page = slots_per_page(64, 4) as i32;

    let tx = db.engine.begin();
    for v in 0..per_page * 2 {
        let mut t = common::int_tuple(&[v]);
        db.engine.insert_tuple(tx, db.table.id(), &mut t).unwrap();
    }
    let mut overflow = common::int_tuple(&[-1]);
    let err = db
        .engine
        .insert_tuple(tx, db.table.id(), &mut overflow)
        .unwrap_err();
    assert!(matches!(err, DbError::BufferPoolFull { capacity: 2 }));

    for page_no in 0..db.table.num_pages().unwrap() {
        let page = db.table.read_page(PageId::new(db.table.id(), page_no)).unwrap();
        assert_eq!(page.tuples().count(), 0, "page {page_no} was stolen");
    }
    db.engine.abort(tx).unwrap();
    assert_eq!(db.engine.buffer_pool().cached_pages(), 0);
    assert!(common::committed_ints(&db).is_empty());
}

#[test]
#[serial]
fn test_shared_reader_waits_for_writer_commit() {
    let db = common::setup_ints(256, 8);
    common::insert_committed(&db, [1]);
    let pid = PageId::new(db.table.id(), 0);

    let writer = db.engine.begin();
    let mut t = common::int_tuple(&[2]);
    db.engine.insert_tuple(writer, db.table.id(), &mut t).unwrap();
    assert_eq!(
        db.engine.lock_manager().lock_mode(writer, pid),
        Some(LockMode::Exclusive)
    );

    let reader = db.engine.begin();
    thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        let engine = &db.engine;
        let handle = s.spawn(move || {
            let page = engine.get_page(reader, pid, Permissions::ReadOnly).unwrap();
            tx.send(()).unwrap();
            let count = page.read().tuples().count();
            count
        });

        common::wait_until_blocked(&db.engine, reader);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(
            db.engine.lock_manager().waits_for_graph().waits_on(reader).collect::<Vec<_>>(),
            vec![writer]
        );

        db.engine.commit(writer).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(handle.join().unwrap(), 2);
    });
    assert_eq!(
        db.engine.lock_manager().lock_mode(reader, pid),
        Some(LockMode::Shared)
    );
    db.engine.commit(reader).unwrap();
}

#[test]
#[serial]
fn test_deadlock_aborts_the_requester() {
    let db = common::setup_ints(64, 8);
    let per_page = slots_per_page(64, 4) as i32;
    common::insert_committed(&db, 0..per_page + 1);
    let p0 = PageId::new(db.table.id(), 0);
    let p1 = PageId::new(db.table.id(), 1);

    let t1 = db.engine.begin();
    let t2 = db.engine.begin();
    db.engine.get_page(t1, p0, Permissions::ReadOnly).unwrap();
    db.engine.get_page(t2, p1, Permissions::ReadOnly).unwrap();

    thread::scope(|s| {
        let engine = &db.engine;
        let handle = s.spawn(move || engine.get_page(t1, p1, Permissions::ReadWrite).map(|_| ()));

        common::wait_until_blocked(&db.engine, t1);
        let err = db
            .engine
            .get_page(t2, p0, Permissions::ReadWrite)
            .unwrap_err();
        assert!(matches!(err, DbError::Lock(LockError::Deadlock)));
        assert!(err.is_transaction_abort());

        db.engine.abort(t2).unwrap();
        handle.join().unwrap().unwrap();
    });

    assert_eq!(
        db.engine.lock_manager().lock_mode(t1, p1),
        Some(LockMode::Exclusive)
    );
    assert!(!db.engine.lock_manager().waits_for_graph().has_cycle());
    db.engine.commit(t1).unwrap();
    assert_eq!(db.engine.lock_manager().tracked_pages(), 0);
}

#[test]
#[serial]
fn test_upgrade_waits_for_other_readers() {
    let db = common::setup_ints(256, 8);
    common::insert_committed(&db, [1]);
    let pid = PageId::new(db.table.id(), 0);

    let t1 = db.engine.begin();
    let t2 = db.engine.begin();
    db.engine.get_page(t1, pid, Permissions::ReadOnly).unwrap();
    db.engine.get_page(t2, pid, Permissions::ReadOnly).unwrap();

    thread::scope(|s| {
        let engine = &db.engine;
        let handle = s.spawn(move || engine.get_page(t1, pid, Permissions::ReadWrite).map(|_| ()));
        common::wait_until_blocked(&db.engine, t1);
        assert_eq!(
            db.engine.lock_manager().lock_mode(t1, pid),
            Some(LockMode::Shared)
        );
        db.engine.commit(t2).unwrap();
        handle.join().unwrap().unwrap();
    });
    assert_eq!(
        db.engine.lock_manager().holders(pid),
        vec![(t1, LockMode::Exclusive)]
    );
    db.engine.commit(t1).unwrap();
}

#[test]
#[serial]
fn test_lock_wait_timeout() {
    let db = common::setup(
        EngineConfig::default()
            .with_page_size(256)
            .with_lock_wait_timeout(Duration::from_millis(50)),
        TupleDesc::from_types(&[Type::Int]),
    );
    common::insert_committed(&db, [1]);
    let pid = PageId::new(db.table.id(), 0);

    let t1 = db.engine.begin();
    let t2 = db.engine.begin();
    db.engine.get_page(t1, pid, Permissions::ReadWrite).unwrap();
    assert!(matches!(
        db.engine.get_page(t2, pid, Permissions::ReadOnly),
        Err(DbError::Lock(LockError::Timeout))
    ));
    db.engine.abort(t2).unwrap();
    db.engine.commit(t1).unwrap();
}

#[test]
#[serial]
fn test_abort_wakes_blocked_transaction() {
    let db = common::setup_ints(256, 8);
    common::insert_committed(&db, [1]);
    let pid = PageId::new(db.table.id(), 0);

    let holder = db.engine.begin();
    let victim = db.engine.begin();
    db.engine.get_page(holder, pid, Permissions::ReadWrite).unwrap();

    thread::scope(|s| {
        let engine = &db.engine;
        let handle = s.spawn(move || engine.get_page(victim, pid, Permissions::ReadOnly).map(|_| ()));
        common::wait_until_blocked(&db.engine, victim);
        db.engine.abort(victim).unwrap();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(DbError::Lock(LockError::Cancelled))));
    });

    assert!(!db.engine.lock_manager().holds_lock(victim, pid));
    assert!(db.engine.lock_manager().waits_for_graph().is_empty());
    db.engine.commit(holder).unwrap();
}

#[test]
#[serial]
fn test_abort_of_running_transaction_stops_its_scan() {
    let db = common::setup(
        EngineConfig::default()
            .with_page_size(64)
            .with_buffer_pool_pages(8)
            .with_lock_wait_timeout(Duration::from_secs(2)),
        TupleDesc::new(&[Type::Int], &["v"]),
    );
    let per_page = slots_per_page(64, 4);
    common::insert_committed(&db, 0..(per_page as i32 * 2));
    let second = PageId::new(db.table.id(), 1);

    let t1 = db.engine.begin();
    let mut extra = common::int_tuple(&[-1]);
    db.engine.insert_tuple(t1, db.table.id(), &mut extra).unwrap();
    let mut it = db.engine.scan(t1, db.table.id()).unwrap();
    for _ in 0..per_page {
        it.next().unwrap().unwrap();
    }

    // Aborted from elsewhere while it is between page fetches.
    thread::scope(|s| {
        let engine = &db.engine;
        s.spawn(move || engine.abort(t1).unwrap()).join().unwrap();
    });

    let err = it.next().unwrap().unwrap_err();
    assert!(err.is_transaction_abort());
    assert!(matches!(err, DbError::Lock(LockError::Finished)));
    assert!(db.engine.lock_manager().locked_pages(t1).is_empty());
    assert!(db.engine.lock_manager().holders(second).is_empty());
    assert!(db.engine.buffer_pool().dirty_pages(t1).is_empty());

    // A writer gets the page without waiting on the finished transaction.
    let t2 = db.engine.begin();
    db.engine
        .get_page(t2, second, Permissions::ReadWrite)
        .unwrap();
    db.engine.commit(t2).unwrap();
    assert!(!common::committed_ints(&db).contains(&-1));
}

#[test]
fn test_shutdown_flushes_pages() {
    let db = common::setup_ints(256, 8);
    let tx = db.engine.begin();
    let mut t = common::int_tuple(&[8]);
    db.engine.insert_tuple(tx, db.table.id(), &mut t).unwrap();
    db.engine.shutdown().unwrap();

    let pid = t.record_id.unwrap().page_id;
    assert_eq!(db.engine.buffer_pool().page_state(pid), Some(PageState::Clean));
    let file = HeapFile::open(db.table.path(), TupleDesc::from_types(&[Type::Int]), 256).unwrap();
    assert_eq!(file.read_page(pid).unwrap().tuples().count(), 1);
}
