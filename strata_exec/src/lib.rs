//! Catalog and relational operators on top of the `strata` storage engine.

pub mod aggregate_executor;
pub mod catalog;
pub mod errors;
pub mod executor;

pub use aggregate_executor::{AggregateExecutor, AggregateOp};
pub use catalog::{Catalog, TableInfo};
pub use errors::ExecutionError;
pub use executor::{
    collect_tuples, DeleteExecutor, Executor, InsertExecutor, SeqScanExecutor, TupleIterator,
};
