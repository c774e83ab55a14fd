use log::debug;
use strata::{Field, StorageEngine, TableId, TransactionId, Tuple, TupleDesc, Type};

use super::Executor;
use crate::errors::ExecutionError;

fn count_desc() -> TupleDesc {
    TupleDesc::new(&[Type::Int], &["count"])
}

fn count_tuple(count: i32) -> Tuple {
    Tuple::new(vec![Field::Int(count)])
}

/// Inserts every tuple of its child into a table. The first `next` does all
/// the work and returns one `(count)` tuple; later calls return `None`.
pub struct InsertExecutor<'a> {
    engine: &'a StorageEngine,
    tx_id: TransactionId,
    child: Box<dyn Executor + 'a>,
    table_id: TableId,
    desc: TupleDesc,
    opened: bool,
    done: bool,
}

impl<'a> InsertExecutor<'a> {
    pub fn new(
        engine: &'a StorageEngine,
        tx_id: TransactionId,
        child: Box<dyn Executor + 'a>,
        table_id: TableId,
    ) -> Result<Self, ExecutionError> {
        let file = engine.buffer_pool().file(table_id)?;
        if child.tuple_desc() != file.tuple_desc().as_ref() {
            return Err(ExecutionError::SchemaMismatch(format!(
                "insert of ({}) into table {} ({})",
                child.tuple_desc(),
                table_id,
                file.tuple_desc()
            )));
        }
        Ok(Self {
            engine,
            tx_id,
            child,
            table_id,
            desc: count_desc(),
            opened: false,
            done: false,
        })
    }
}

impl<'a> Executor for InsertExecutor<'a> {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.opened = true;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::NotOpen);
        }
        if self.done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(mut tuple) = self.child.next()? {
            self.engine
                .insert_tuple(self.tx_id, self.table_id, &mut tuple)?;
            count += 1;
        }
        self.done = true;
        debug!("tx {} inserted {} tuples into table {}", self.tx_id, count, self.table_id);
        Ok(Some(count_tuple(count)))
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()?;
        self.done = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }
}

/// Deletes every tuple its child produces, located by record id. Returns one
/// `(count)` tuple like `InsertExecutor`.
pub struct DeleteExecutor<'a> {
    engine: &'a StorageEngine,
    tx_id: TransactionId,
    child: Box<dyn Executor + 'a>,
    desc: TupleDesc,
    opened: bool,
    done: bool,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(
        engine: &'a StorageEngine,
        tx_id: TransactionId,
        child: Box<dyn Executor + 'a>,
    ) -> Self {
        Self {
            engine,
            tx_id,
            child,
            desc: count_desc(),
            opened: false,
            done: false,
        }
    }
}

impl<'a> Executor for DeleteExecutor<'a> {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.child.open()?;
        self.opened = true;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        if !self.opened {
            return Err(ExecutionError::NotOpen);
        }
        if self.done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(tuple) = self.child.next()? {
            self.engine.delete_tuple(self.tx_id, &tuple)?;
            count += 1;
        }
        self.done = true;
        debug!("tx {} deleted {} tuples", self.tx_id, count);
        Ok(Some(count_tuple(count)))
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.child.rewind()?;
        self.done = false;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
    }
}
