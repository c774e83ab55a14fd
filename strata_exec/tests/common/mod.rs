#![allow(dead_code)]

use std::sync::Arc;

use strata::{EngineConfig, Field, HeapFile, StorageEngine, Tuple, TupleDesc, Type};
use strata_exec::{collect_tuples, Catalog, InsertExecutor, TupleIterator};
use tempfile::{tempdir, TempDir};

pub struct TestDb {
    pub engine: StorageEngine,
    pub catalog: Catalog,
    pub dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let engine = StorageEngine::new(EngineConfig::default().with_page_size(1024)).unwrap();
        Self {
            engine,
            catalog: Catalog::new(),
            dir: tempdir().unwrap(),
        }
    }

    pub fn create_table(&self, name: &str, desc: TupleDesc) -> Arc<HeapFile> {
        let file = self
            .engine
            .open_table(self.dir.path().join(format!("{name}.dat")), desc)
            .unwrap();
        self.catalog.add_table(file.clone(), name, "id");
        file
    }

    /// Loads `rows` through an insert operator in a committed transaction.
    pub fn load(&self, file: &HeapFile, rows: Vec<Tuple>) {
        let tx = self.engine.begin();
        let source = TupleIterator::new(file.tuple_desc().as_ref().clone(), rows).unwrap();
        let mut insert = InsertExecutor::new(&self.engine, tx, Box::new(source), file.id()).unwrap();
        collect_tuples(&mut insert).unwrap();
        self.engine.commit(tx).unwrap();
    }
}

pub fn employees_desc() -> TupleDesc {
    TupleDesc::new(&[Type::Int, Type::Str, Type::Int], &["id", "dept", "salary"])
}

pub fn employee(id: i32, dept: &str, salary: i32) -> Tuple {
    Tuple::new(vec![
        Field::Int(id),
        Field::Str(dept.to_string()),
        Field::Int(salary),
    ])
}

pub fn employees() -> Vec<Tuple> {
    vec![
        employee(1, "eng", 120),
        employee(2, "ops", 80),
        employee(3, "eng", 100),
        employee(4, "sales", 90),
        employee(5, "ops", 70),
        employee(6, "eng", 110),
    ]
}
