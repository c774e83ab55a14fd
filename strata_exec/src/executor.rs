//! Pull-based operators over the storage engine.
//!
//! Every operator is opened once, pulled with `next` until it returns
//! `Ok(None)`, and may be rewound to start over. A lock failure anywhere in
//! the tree surfaces as `ExecutionError::TransactionAborted`.

mod dml;
mod scan;

use strata::{Tuple, TupleDesc};

use crate::errors::ExecutionError;

pub use dml::{DeleteExecutor, InsertExecutor};
pub use scan::SeqScanExecutor;

pub trait Executor {
    fn tuple_desc(&self) -> &TupleDesc;

    fn open(&mut self) -> Result<(), ExecutionError>;

    /// The next tuple, or `None` once the operator is exhausted.
    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError>;

    fn rewind(&mut self) -> Result<(), ExecutionError>;

    fn close(&mut self);
}

/// Opens `executor`, drains it and closes it again.
pub fn collect_tuples(executor: &mut dyn Executor) -> Result<Vec<Tuple>, ExecutionError> {
    executor.open()?;
    let mut tuples = Vec::new();
    while let Some(tuple) = executor.next()? {
        tuples.push(tuple);
    }
    executor.close();
    Ok(tuples)
}

/// Serves a fixed list of tuples.
pub struct TupleIterator {
    desc: TupleDesc,
    tuples: Vec<Tuple>,
    cursor: Option<usize>,
}

impl TupleIterator {
    /// Fails if any tuple does not match `desc`.
    pub fn new(desc: TupleDesc, tuples: Vec<Tuple>) -> Result<Self, ExecutionError> {
        if let Some(bad) = tuples.iter().find(|t| !desc.conforms(t)) {
            return Err(ExecutionError::SchemaMismatch(format!(
                "tuple ({bad}) vs ({desc})"
            )));
        }
        Ok(Self {
            desc,
            tuples,
            cursor: None,
        })
    }
}

impl Executor for TupleIterator {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.cursor = Some(0);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        let cursor = self.cursor.as_mut().ok_or(ExecutionError::NotOpen)?;
        let tuple = self.tuples.get(*cursor).cloned();
        if tuple.is_some() {
            *cursor += 1;
        }
        Ok(tuple)
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.open()
    }

    fn close(&mut self) {
        self.cursor = None;
    }
}
