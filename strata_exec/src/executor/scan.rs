use strata::tuple::TdItem;
use strata::{HeapFileIterator, StorageEngine, TableId, TransactionId, Tuple, TupleDesc};

use super::Executor;
use crate::catalog::Catalog;
use crate::errors::ExecutionError;

fn aliased_desc(desc: &TupleDesc, alias: &str) -> TupleDesc {
    let items = desc
        .items()
        .iter()
        .map(|item| {
            let name = if item.name.is_empty() {
                "null"
            } else {
                item.name.as_str()
            };
            TdItem {
                field_type: item.field_type,
                name: format!("{alias}.{name}"),
            }
        })
        .collect();
    TupleDesc::from_items(items)
}

/// Reads every tuple of a table, page by page, under shared locks.
/// Output columns are named `alias.column`.
pub struct SeqScanExecutor<'a> {
    engine: &'a StorageEngine,
    catalog: &'a Catalog,
    tx_id: TransactionId,
    table_id: TableId,
    alias: String,
    desc: TupleDesc,
    iter: Option<HeapFileIterator>,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(
        engine: &'a StorageEngine,
        catalog: &'a Catalog,
        tx_id: TransactionId,
        table_id: TableId,
        alias: &str,
    ) -> Result<Self, ExecutionError> {
        let desc = catalog.tuple_desc(table_id)?;
        let alias = if alias.is_empty() { "null" } else { alias };
        Ok(Self {
            engine,
            catalog,
            tx_id,
            table_id,
            alias: alias.to_string(),
            desc: aliased_desc(&desc, alias),
            iter: None,
        })
    }

    /// Scans `table_id` under its catalog name.
    pub fn with_table_name(
        engine: &'a StorageEngine,
        catalog: &'a Catalog,
        tx_id: TransactionId,
        table_id: TableId,
    ) -> Result<Self, ExecutionError> {
        let name = catalog.table_name(table_id)?;
        Self::new(engine, catalog, tx_id, table_id, &name)
    }

    pub fn table_name(&self) -> Result<String, ExecutionError> {
        self.catalog.table_name(self.table_id)
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Points the scan at another table. Takes effect at the next `open`.
    pub fn reset(&mut self, table_id: TableId, alias: &str) -> Result<(), ExecutionError> {
        *self = Self::new(self.engine, self.catalog, self.tx_id, table_id, alias)?;
        Ok(())
    }
}

impl<'a> Executor for SeqScanExecutor<'a> {
    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn open(&mut self) -> Result<(), ExecutionError> {
        self.iter = Some(self.engine.scan(self.tx_id, self.table_id)?);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        let iter = self.iter.as_mut().ok_or(ExecutionError::NotOpen)?;
        Ok(iter.next_tuple()?)
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        let iter = self.iter.as_mut().ok_or(ExecutionError::NotOpen)?;
        iter.rewind();
        Ok(())
    }

    fn close(&mut self) {
        self.iter = None;
    }
}
