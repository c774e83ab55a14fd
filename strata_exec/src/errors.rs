use strata::{DbError, TableId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A lock wait failed. The transaction has to abort; it is not end of data.
    #[error("{0}")]
    TransactionAborted(DbError),
    #[error(transparent)]
    Storage(DbError),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("no table with id {0} in the catalog")]
    UnknownTableId(TableId),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unsupported aggregate: {0}")]
    UnsupportedAggregate(String),
    #[error("operator used before open()")]
    NotOpen,
}

impl ExecutionError {
    pub fn is_transaction_abort(&self) -> bool {
        matches!(self, ExecutionError::TransactionAborted(_))
    }
}

impl From<DbError> for ExecutionError {
    fn from(err: DbError) -> Self {
        if err.is_transaction_abort() {
            ExecutionError::TransactionAborted(err)
        } else {
            ExecutionError::Storage(err)
        }
    }
}
