//! Table registry: names, schemas and heap files by table id.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use strata::{HeapFile, TableId, TupleDesc};

use crate::errors::ExecutionError;

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub primary_key: String,
    pub file: Arc<HeapFile>,
}

#[derive(Debug, Default)]
struct CatalogState {
    tables: HashMap<TableId, TableInfo>,
    names: HashMap<String, TableId>,
}

/// Shared by every operator of an engine. Adding a table under a name or id
/// already in use replaces the earlier entry.
#[derive(Debug, Default)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, file: Arc<HeapFile>, name: &str, primary_key: &str) {
        let mut state = self.state.write();
        let table_id = file.id();
        if let Some(old_id) = state.names.remove(name) {
            state.tables.remove(&old_id);
        }
        if let Some(old) = state.tables.remove(&table_id) {
            state.names.remove(&old.name);
        }
        debug!("catalog: table {name} -> {table_id}");
        state.names.insert(name.to_string(), table_id);
        state.tables.insert(
            table_id,
            TableInfo {
                name: name.to_string(),
                primary_key: primary_key.to_string(),
                file,
            },
        );
    }

    pub fn table_id(&self, name: &str) -> Result<TableId, ExecutionError> {
        self.state
            .read()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| ExecutionError::TableNotFound(name.to_string()))
    }

    fn with_table<T>(
        &self,
        table_id: TableId,
        f: impl FnOnce(&TableInfo) -> T,
    ) -> Result<T, ExecutionError> {
        self.state
            .read()
            .tables
            .get(&table_id)
            .map(f)
            .ok_or(ExecutionError::UnknownTableId(table_id))
    }

    pub fn table_name(&self, table_id: TableId) -> Result<String, ExecutionError> {
        self.with_table(table_id, |t| t.name.clone())
    }

    pub fn primary_key(&self, table_id: TableId) -> Result<String, ExecutionError> {
        self.with_table(table_id, |t| t.primary_key.clone())
    }

    pub fn tuple_desc(&self, table_id: TableId) -> Result<Arc<TupleDesc>, ExecutionError> {
        self.with_table(table_id, |t| t.file.tuple_desc().clone())
    }

    pub fn file(&self, table_id: TableId) -> Result<Arc<HeapFile>, ExecutionError> {
        self.with_table(table_id, |t| t.file.clone())
    }

    /// Ids of every table, sorted.
    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self.state.read().tables.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.tables.clear();
        state.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata::Type;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path, file: &str) -> Arc<HeapFile> {
        let desc = TupleDesc::new(&[Type::Int, Type::Str], &["id", "name"]);
        Arc::new(HeapFile::open(dir.join(file), desc, 4096).unwrap())
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::new();
        let users = open(dir.path(), "users.dat");
        catalog.add_table(users.clone(), "users", "id");

        let id = catalog.table_id("users").unwrap();
        assert_eq!(id, users.id());
        assert_eq!(catalog.table_name(id).unwrap(), "users");
        assert_eq!(catalog.primary_key(id).unwrap(), "id");
        assert_eq!(catalog.tuple_desc(id).unwrap().field_name(1), Some("name"));
        assert_eq!(catalog.file(id).unwrap().path(), users.path());
        assert!(matches!(
            catalog.table_id("missing"),
            Err(ExecutionError::TableNotFound(_))
        ));
        assert!(matches!(
            catalog.table_name(id.wrapping_add(1)),
            Err(ExecutionError::UnknownTableId(_))
        ));
    }

    #[test]
    fn test_name_reuse_replaces_table() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::new();
        let a = open(dir.path(), "a.dat");
        let b = open(dir.path(), "b.dat");
        catalog.add_table(a.clone(), "t", "id");
        catalog.add_table(b.clone(), "t", "id");
        assert_eq!(catalog.table_id("t").unwrap(), b.id());
        assert_eq!(catalog.table_ids(), vec![b.id()]);

        // Re-registering a file under a new name drops the old name.
        catalog.add_table(b.clone(), "renamed", "");
        assert!(catalog.table_id("t").is_err());
        assert_eq!(catalog.table_name(b.id()).unwrap(), "renamed");

        catalog.clear();
        assert!(catalog.table_ids().is_empty());
    }
}
