//! A heap file stores the pages of one table, in no particular order.
use std::collections::VecDeque;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::buffer_pool::{BufferPool, PageHandle, Permissions};
use crate::error::{DbError, Result};
use crate::failpoint::{self, FailPoint};
use crate::page::{slots_per_page, HeapPage, PageId, MAX_SLOTS};
use crate::tuple::{RecordId, Tuple, TupleDesc};
use crate::{TableId, TransactionId};

/// Table id for the file at `path`: CRC32 of its absolute path.
pub fn table_id_for(path: &Path) -> TableId {
    crc32fast::hash(path.as_os_str().as_encoded_bytes())
}

pub struct HeapFile {
    path: PathBuf,
    table_id: TableId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    /// Serializes reads, writes and appends; appends allocate their page
    /// number inside this critical section.
    file: Mutex<File>,
    /// Last page known to have had a free slot. Only a hint.
    last_free_page: Mutex<Option<u32>>,
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("path", &self.path)
            .field("table_id", &self.table_id)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl HeapFile {
    /// Opens the heap file, creating it and its parent directories if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P, desc: TupleDesc, page_size: usize) -> Result<Self> {
        let num_slots = slots_per_page(page_size, desc.byte_size());
        if desc.num_fields() == 0 || num_slots == 0 {
            return Err(DbError::SchemaMismatch(format!(
                "schema ({desc}) does not fit a {page_size} byte page"
            )));
        }
        if num_slots > MAX_SLOTS {
            return Err(DbError::InvalidConfig(format!(
                "{num_slots} slots per page overflow a record id"
            )));
        }
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;
        let path = path_ref.canonicalize()?;
        let table_id = table_id_for(&path);

        let file_size = file.metadata()?.len();
        if file_size % page_size as u64 != 0 {
            warn!(
                "heap file {:?} has {} trailing bytes past its last page",
                path,
                file_size % page_size as u64
            );
        }
        debug!(
            "opened heap file {:?} as table {} with {} pages",
            path,
            table_id,
            file_size / page_size as u64
        );

        Ok(Self {
            path,
            table_id,
            desc: Arc::new(desc),
            page_size,
            file: Mutex::new(file),
            last_free_page: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> TableId {
        self.table_id
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of whole pages in the file.
    pub fn num_pages(&self) -> Result<u32> {
        let file = self.file.lock();
        self.num_pages_locked(&file)
    }

    fn num_pages_locked(&self, file: &File) -> Result<u32> {
        Ok((file.metadata()?.len() / self.page_size as u64) as u32)
    }

    /// Reads a page from disk. A page that is not fully present is corruption.
    pub fn read_page(&self, page_id: PageId) -> Result<HeapPage> {
        failpoint::check(FailPoint::HeapRead)?;
        let mut data = HeapPage::empty_page_data(self.page_size);
        let offset = page_id.page_no as u64 * self.page_size as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes_read = 0;
        while bytes_read < data.len() {
            match file.read(&mut data[bytes_read..]) {
                Ok(0) => break,
                Ok(n) => bytes_read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if bytes_read < self.page_size {
            return Err(DbError::ShortRead {
                page: page_id,
                expected: self.page_size,
                read: bytes_read,
            });
        }
        trace!("read {:?}", page_id);
        Ok(HeapPage::from_bytes(page_id, self.desc.clone(), data))
    }

    /// Writes a page image at its offset. Writing at the current end of the
    /// file appends; writing further out is an error.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        failpoint::check(FailPoint::HeapWrite)?;
        let mut file = self.file.lock();
        let num_pages = self.num_pages_locked(&file)?;
        if page.id.page_no > num_pages {
            return Err(DbError::WritePastEnd {
                page: page.id,
                num_pages,
            });
        }
        file.seek(SeekFrom::Start(page.id.page_no as u64 * self.page_size as u64))?;
        file.write_all(page.data())?;
        trace!("wrote {:?}", page.id);
        Ok(())
    }

    /// Flushes written pages to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Appends an empty page and returns its id.
    fn append_empty_page(&self) -> Result<PageId> {
        failpoint::check(FailPoint::HeapAppend)?;
        let mut file = self.file.lock();
        let page_no = self.num_pages_locked(&file)?;
        file.seek(SeekFrom::Start(page_no as u64 * self.page_size as u64))?;
        file.write_all(&HeapPage::empty_page_data(self.page_size))?;
        debug!("table {} grew to {} pages", self.table_id, page_no + 1);
        Ok(PageId::new(self.table_id, page_no))
    }

    /// Inserts `tuple` into the first page with a free slot, appending a page
    /// when every page is full. Sets the tuple's record id and returns the
    /// page it landed on.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tx_id: TransactionId,
        tuple: &mut Tuple,
    ) -> Result<PageId> {
        if !self.desc.conforms(tuple) {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) vs table {} ({})",
                tuple, self.table_id, self.desc
            )));
        }

        loop {
            let num_pages = self.num_pages()?;
            let hint = self
                .last_free_page
                .lock()
                .filter(|p| *p < num_pages)
                .unwrap_or(0);

            for page_no in (hint..num_pages).chain(0..hint) {
                let page_id = PageId::new(self.table_id, page_no);
                let held_before = pool.holds_lock(tx_id, page_id);
                let page = pool.get_page(tx_id, page_id, Permissions::ReadWrite)?;
                if let Some(rid) = Self::try_insert(pool, tx_id, &page, tuple)? {
                    tuple.record_id = Some(rid);
                    *self.last_free_page.lock() = Some(page_no);
                    return Ok(page_id);
                }
                trace!("no free slots on {:?}", page_id);
                if !held_before {
                    pool.unsafe_release_page(tx_id, page_id);
                }
            }

            let page_id = self.append_empty_page()?;
            let page = pool.get_page(tx_id, page_id, Permissions::ReadWrite)?;
            if let Some(rid) = Self::try_insert(pool, tx_id, &page, tuple)? {
                tuple.record_id = Some(rid);
                *self.last_free_page.lock() = Some(page_id.page_no);
                return Ok(page_id);
            }
            // Another inserter filled the new page before we locked it.
            debug!("appended {:?} was filled concurrently, rescanning", page_id);
        }
    }

    /// Full pages are left clean so the caller can release them.
    fn try_insert(
        pool: &BufferPool,
        tx_id: TransactionId,
        handle: &PageHandle,
        tuple: &Tuple,
    ) -> Result<Option<RecordId>> {
        let (page_id, free) = {
            let page = handle.read();
            (page.id, page.num_empty_slots())
        };
        if free == 0 {
            return Ok(None);
        }
        pool.mark_dirty(tx_id, page_id, handle)?;
        let mut page = handle.write();
        page.insert_tuple(tuple).map(Some)
    }

    /// Frees the slot named by the tuple's record id and returns its page.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tx_id: TransactionId,
        tuple: &Tuple,
    ) -> Result<PageId> {
        let rid = tuple
            .record_id
            .ok_or_else(|| DbError::TupleNotFound(format!("tuple ({tuple}) has no record id")))?;
        if rid.page_id.table_id != self.table_id {
            return Err(DbError::TupleNotFound(format!(
                "{rid:?} does not belong to table {}",
                self.table_id
            )));
        }
        if rid.page_id.page_no >= self.num_pages()? {
            return Err(DbError::TupleNotFound(format!(
                "{rid:?} is past the end of table {}",
                self.table_id
            )));
        }

        let page = pool.get_page(tx_id, rid.page_id, Permissions::ReadWrite)?;
        pool.mark_dirty(tx_id, rid.page_id, &page)?;
        page.write().delete_tuple(rid)?;
        *self.last_free_page.lock() = Some(rid.page_id.page_no);
        Ok(rid.page_id)
    }

    /// Iterates every tuple of the file through `pool`, taking shared locks.
    pub fn iterator(
        self: &Arc<Self>,
        pool: Arc<BufferPool>,
        tx_id: TransactionId,
    ) -> HeapFileIterator {
        HeapFileIterator {
            file: self.clone(),
            pool,
            tx_id,
            next_page: 0,
            buffered: VecDeque::new(),
        }
    }
}

/// Tuples of a heap file in page order, then slot order. Pages are fetched
/// lazily, one at a time.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tx_id: TransactionId,
    next_page: u32,
    buffered: VecDeque<Tuple>,
}

impl HeapFileIterator {
    /// Next tuple, or `None` once every page has been visited.
    pub fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(tuple) = self.buffered.pop_front() {
                return Ok(Some(tuple));
            }
            if self.next_page >= self.file.num_pages()? {
                return Ok(None);
            }
            let page_id = PageId::new(self.file.id(), self.next_page);
            let page = self
                .pool
                .get_page(self.tx_id, page_id, Permissions::ReadOnly)?;
            self.buffered.extend(page.read().tuples());
            self.next_page += 1;
        }
    }

    /// Restarts from the first page.
    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.buffered.clear();
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        self.file.tuple_desc()
    }
}

impl Iterator for HeapFileIterator {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_tuple().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Field, Type};
    use tempfile::tempdir;

    fn int_desc(n: usize) -> TupleDesc {
        TupleDesc::from_types(&vec![Type::Int; n])
    }

    #[test]
    fn test_table_id_is_stable_per_path() {
        let dir = tempdir().unwrap();
        let a = HeapFile::open(dir.path().join("a.dat"), int_desc(1), 256).unwrap();
        let again = HeapFile::open(dir.path().join("a.dat"), int_desc(1), 256).unwrap();
        let b = HeapFile::open(dir.path().join("b.dat"), int_desc(1), 256).unwrap();
        assert_eq!(a.id(), again.id());
        assert_ne!(a.id(), b.id());
        assert!(a.path().is_absolute());
    }

    #[test]
    fn test_rejects_schema_that_does_not_fit() {
        let dir = tempdir().unwrap();
        let wide = TupleDesc::from_types(&[Type::Str; 4]);
        assert!(matches!(
            HeapFile::open(dir.path().join("w.dat"), wide, 256),
            Err(DbError::SchemaMismatch(_))
        ));
        assert!(HeapFile::open(dir.path().join("e.dat"), TupleDesc::default(), 256).is_err());
    }

    #[test]
    fn test_rejects_pages_with_unaddressable_slots() {
        let dir = tempdir().unwrap();
        let huge = 20_000_000_000;
        assert!(slots_per_page(huge, 4) > MAX_SLOTS);
        assert!(matches!(
            HeapFile::open(dir.path().join("h.dat"), int_desc(1), huge),
            Err(DbError::InvalidConfig(_))
        ));
        assert!(!dir.path().join("h.dat").exists());
    }

    #[test]
    fn test_write_then_read_page() {
        let dir = tempdir().unwrap();
        let hf = HeapFile::open(dir.path().join("t.dat"), int_desc(2), 128).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 0);

        let pid = PageId::new(hf.id(), 0);
        let mut page = HeapPage::new(pid, hf.tuple_desc().clone(), 128);
        page.insert_tuple(&Tuple::new(vec![Field::Int(4), Field::Int(5)]))
            .unwrap();
        hf.write_page(&page).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 1);

        let read = hf.read_page(pid).unwrap();
        assert_eq!(read.data(), page.data());
    }

    #[test]
    fn test_short_read_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        let hf = HeapFile::open(&path, int_desc(1), 64).unwrap();
        assert_eq!(hf.num_pages().unwrap(), 1);

        let err = hf.read_page(PageId::new(hf.id(), 1)).unwrap_err();
        assert!(matches!(err, DbError::ShortRead { read: 36, expected: 64, .. }));
        assert!(err.is_corruption());
        assert!(matches!(
            hf.read_page(PageId::new(hf.id(), 5)),
            Err(DbError::ShortRead { read: 0, .. })
        ));
    }

    #[test]
    fn test_write_past_end_is_rejected() {
        let dir = tempdir().unwrap();
        let hf = HeapFile::open(dir.path().join("t.dat"), int_desc(1), 64).unwrap();
        let page = HeapPage::new(PageId::new(hf.id(), 2), hf.tuple_desc().clone(), 64);
        assert!(matches!(
            hf.write_page(&page),
            Err(DbError::WritePastEnd { num_pages: 0, .. })
        ));
        assert_eq!(hf.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_write_failpoint_surfaces_io_error() {
        let dir = tempdir().unwrap();
        let hf = HeapFile::open(dir.path().join("t.dat"), int_desc(1), 64).unwrap();
        let page = HeapPage::new(PageId::new(hf.id(), 0), hf.tuple_desc().clone(), 64);
        let result = {
            let _fail = failpoint::arm(FailPoint::HeapWrite);
            hf.write_page(&page)
        };
        assert!(matches!(result, Err(DbError::Io(_))));
        assert_eq!(hf.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_append_allocates_consecutive_pages() {
        let dir = tempdir().unwrap();
        let hf = HeapFile::open(dir.path().join("t.dat"), int_desc(1), 64).unwrap();
        assert_eq!(hf.append_empty_page().unwrap().page_no, 0);
        assert_eq!(hf.append_empty_page().unwrap().page_no, 1);
        assert_eq!(hf.num_pages().unwrap(), 2);
        assert_eq!(hf.read_page(PageId::new(hf.id(), 1)).unwrap().num_empty_slots(), 15);
    }
}
