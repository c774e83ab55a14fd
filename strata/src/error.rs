//! Errors surfaced by the storage core.

use std::io;

use thiserror::Error;

use crate::lock_manager::LockError;
use crate::page::PageId;
use crate::tuple::RecordId;
use crate::{TableId, TransactionId};

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// The transaction lost a lock wait and must abort.
    #[error("transaction aborted: {0}")]
    Lock(#[from] LockError),

    /// Every cached page is dirty, so nothing can be evicted without a log.
    #[error("buffer pool exhausted: all {capacity} cached pages are dirty")]
    BufferPoolFull { capacity: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("short read on {page:?}: expected {expected} bytes, got {read}")]
    ShortRead {
        page: PageId,
        expected: usize,
        read: usize,
    },

    #[error("write of {page:?} past end of file ({num_pages} pages)")]
    WritePastEnd { page: PageId, num_pages: u32 },

    #[error("slot {} on {:?} is already empty", .0.slot, .0.page_id)]
    SlotEmpty(RecordId),

    #[error("tuple not found: {0}")]
    TupleNotFound(String),

    #[error("no table with id {0}")]
    NoSuchTable(TableId),

    #[error("unknown or finished transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("tuple does not match table schema: {0}")]
    SchemaMismatch(String),

    #[error("tx {tx_id} writes {page:?} without an exclusive lock")]
    NotLockedExclusive { tx_id: TransactionId, page: PageId },

    #[error("no free slot on {0:?}")]
    PageFull(PageId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DbError {
    /// True when the caller should abort the transaction and may retry it as a new one.
    pub fn is_transaction_abort(&self) -> bool {
        matches!(self, DbError::Lock(_))
    }

    /// True for lookups that found nothing; idempotent callers may ignore these.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DbError::TupleNotFound(_) | DbError::NoSuchTable(_) | DbError::UnknownTransaction(_)
        )
    }

    /// True for faults that point at on-disk corruption or a caller bug.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            DbError::ShortRead { .. }
                | DbError::WritePastEnd { .. }
                | DbError::SlotEmpty(_)
                | DbError::NotLockedExclusive { .. }
        )
    }
}
