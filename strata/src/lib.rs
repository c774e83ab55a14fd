pub mod buffer_pool;

pub mod config;

pub mod engine;

pub mod error;

pub mod failpoint;

pub mod heap_file;

pub mod lock_manager;

pub mod page;

pub mod transaction;

pub mod tuple;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

pub const DEFAULT_BUFFER_POOL_PAGES: usize = 50;

pub type TransactionId = u32;

pub type TableId = u32;

pub use buffer_pool::{BufferPool, PageHandle, PageState, Permissions};
pub use config::EngineConfig;
pub use engine::StorageEngine;
pub use error::{DbError, Result};
pub use heap_file::{HeapFile, HeapFileIterator};
pub use lock_manager::{LockError, LockManager, LockMode};
pub use page::{HeapPage, PageId};
pub use tuple::{Field, RecordId, Tuple, TupleDesc, Type};
