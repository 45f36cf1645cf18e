use crate::error::RelationError;
use crate::model::{ColumnAttribute, ColumnNames, Handle, Handles, Identifier, Row, Value};
use crate::storage::{DbIndex, DbRelation, Storage};
use sled::IVec;
use std::path::Path;
use tracing::{debug, warn};

/// sled-backed storage engine. Every relation and index is its own tree;
/// the `registry` tree records which of them physically exist.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    registry: sled::Tree,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RelationError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database, discarded when the last handle is dropped.
    pub fn temporary() -> Result<Self, RelationError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, RelationError> {
        let registry = db.open_tree("registry")?;
        Ok(Self { db, registry })
    }

    fn is_registered(&self, key: &[u8]) -> Result<bool, RelationError> {
        Ok(self.registry.contains_key(key)?)
    }

    fn register(&self, key: &[u8], what: &str) -> Result<sled::Tree, RelationError> {
        let swapped = self
            .registry
            .compare_and_swap(key, None::<&[u8]>, Some(IVec::from(&b""[..])))?;
        if swapped.is_err() {
            return Err(RelationError::AlreadyExists(what.to_string()));
        }
        debug!("created {what}");
        Ok(self.db.open_tree(key)?)
    }

    fn unregister(&self, key: &[u8], what: &str) -> Result<(), RelationError> {
        if self.registry.remove(key)?.is_none() {
            return Err(RelationError::Missing(what.to_string()));
        }
        self.db.drop_tree(key)?;
        debug!("dropped {what}");
        Ok(())
    }

    fn tree(&self, key: &[u8], what: &str) -> Result<sled::Tree, RelationError> {
        if !self.is_registered(key)? {
            return Err(RelationError::Missing(what.to_string()));
        }
        Ok(self.db.open_tree(key)?)
    }

    fn heap_key(table: &str) -> Vec<u8> {
        let mut k = Vec::with_capacity(5 + table.len());
        k.extend_from_slice(b"heap\0");
        k.extend_from_slice(table.as_bytes());
        k
    }

    fn index_key(table: &str, index: &str) -> Vec<u8> {
        let mut k = Vec::new();
        k.extend_from_slice(b"index\0");
        k.extend_from_slice(table.as_bytes());
        // Keep `t`/`ab` and `ta`/`b` apart.
        k.push(0);
        k.extend_from_slice(index.as_bytes());
        k
    }
}

impl Storage for Store {
    type Relation = HeapTable;
    type Index = BTreeIndex;

    fn relation(
        &self,
        name: &str,
        column_names: ColumnNames,
        column_attributes: Vec<ColumnAttribute>,
    ) -> HeapTable {
        HeapTable {
            name: name.to_string(),
            key: Store::heap_key(name),
            column_names,
            column_attributes,
            store: self.clone(),
        }
    }

    fn index(
        &self,
        relation: &HeapTable,
        name: &str,
        key_columns: ColumnNames,
        unique: bool,
    ) -> BTreeIndex {
        BTreeIndex {
            name: name.to_string(),
            key: Store::index_key(&relation.name, name),
            relation: relation.clone(),
            key_columns,
            unique,
        }
    }

    fn flush(&self) -> Result<(), RelationError> {
        self.db.flush()?;
        Ok(())
    }
}

/// A relation stored as one tree keyed by the big-endian row id. Values are
/// the bincode encoding of the row's cells in schema order.
#[derive(Clone)]
pub struct HeapTable {
    name: Identifier,
    key: Vec<u8>,
    column_names: ColumnNames,
    column_attributes: Vec<ColumnAttribute>,
    store: Store,
}

impl HeapTable {
    fn describe(&self) -> String {
        format!("table {}", self.name)
    }

    fn tree(&self) -> Result<sled::Tree, RelationError> {
        self.store.tree(&self.key, &self.describe())
    }

    fn check_columns<'a>(
        &self,
        columns: impl IntoIterator<Item = &'a Identifier>,
    ) -> Result<(), RelationError> {
        for column in columns {
            if !self.column_names.contains(column) {
                return Err(RelationError::UnknownColumn {
                    relation: self.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    fn marshal(&self, row: &Row) -> Result<Vec<u8>, RelationError> {
        let mut cells = Vec::with_capacity(self.column_names.len());
        for (column, attribute) in self.column_names.iter().zip(&self.column_attributes) {
            let value = row.get(column).ok_or_else(|| RelationError::MissingValue {
                relation: self.name.clone(),
                column: column.clone(),
            })?;
            if !value.fits(*attribute) {
                return Err(RelationError::TypeMismatch {
                    column: column.clone(),
                    expected: *attribute,
                    found: value.to_string(),
                });
            }
            cells.push(value);
        }
        Ok(bincode::serialize(&cells)?)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Row, RelationError> {
        let cells: Vec<Value> = bincode::deserialize(bytes)?;
        if cells.len() != self.column_names.len() {
            return Err(RelationError::Corrupt(format!(
                "{} cells in a row of {} with {} columns",
                cells.len(),
                self.name,
                self.column_names.len()
            )));
        }
        Ok(self.column_names.iter().cloned().zip(cells).collect())
    }

    fn handle_of(&self, key: &[u8]) -> Result<Handle, RelationError> {
        Handle::from_be_slice(key)
            .ok_or_else(|| RelationError::Corrupt(format!("bad row key in {}", self.name)))
    }
}

impl DbRelation for HeapTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn column_names(&self) -> &[Identifier] {
        &self.column_names
    }

    fn column_attributes(&self) -> &[ColumnAttribute] {
        &self.column_attributes
    }

    fn exists(&self) -> Result<bool, RelationError> {
        self.store.is_registered(&self.key)
    }

    fn create(&self) -> Result<(), RelationError> {
        self.store.register(&self.key, &self.describe())?;
        Ok(())
    }

    fn create_if_not_exists(&self) -> Result<(), RelationError> {
        match self.create() {
            Err(RelationError::AlreadyExists(_)) => Ok(()),
            other => other,
        }
    }

    fn drop(&self) -> Result<(), RelationError> {
        self.store.unregister(&self.key, &self.describe())
    }

    fn insert(&self, row: &Row) -> Result<Handle, RelationError> {
        let tree = self.tree()?;
        let bytes = self.marshal(row)?;
        let handle = Handle::new(self.store.db.generate_id()?);
        tree.insert(handle.to_be_bytes(), bytes)?;
        Ok(handle)
    }

    fn del(&self, handle: Handle) -> Result<(), RelationError> {
        if self.tree()?.remove(handle.to_be_bytes())?.is_none() {
            return Err(RelationError::NoSuchRow {
                relation: self.name.clone(),
                handle,
            });
        }
        Ok(())
    }

    fn select(&self, filter: Option<&Row>) -> Result<Handles, RelationError> {
        let filter = filter.filter(|f| !f.is_empty());
        if let Some(filter) = filter {
            self.check_columns(filter.columns())?;
        }
        let mut handles = Vec::new();
        for item in self.tree()?.iter() {
            let (k, v) = item?;
            if let Some(filter) = filter {
                if !self.unmarshal(&v)?.matches(filter) {
                    continue;
                }
            }
            handles.push(self.handle_of(&k)?);
        }
        Ok(handles)
    }

    fn project(
        &self,
        handle: Handle,
        column_names: Option<&[Identifier]>,
    ) -> Result<Row, RelationError> {
        let Some(bytes) = self.tree()?.get(handle.to_be_bytes())? else {
            return Err(RelationError::NoSuchRow {
                relation: self.name.clone(),
                handle,
            });
        };
        let row = self.unmarshal(&bytes)?;
        match column_names {
            None => Ok(row),
            Some(names) => {
                self.check_columns(names)?;
                Ok(row.project(names))
            }
        }
    }
}

/// Secondary index over a `HeapTable`. Unique indices map `key -> handle`;
/// non-unique ones map `key ++ handle -> handle` so equal keys coexist.
#[derive(Clone)]
pub struct BTreeIndex {
    name: Identifier,
    key: Vec<u8>,
    relation: HeapTable,
    key_columns: ColumnNames,
    unique: bool,
}

impl BTreeIndex {
    fn describe(&self) -> String {
        format!("index {} on {}", self.name, self.relation.name)
    }

    fn tree(&self) -> Result<sled::Tree, RelationError> {
        self.relation.store.tree(&self.key, &self.describe())
    }

    fn key_bytes(&self, row: &Row) -> Result<Vec<u8>, RelationError> {
        let mut cells = Vec::with_capacity(self.key_columns.len());
        for column in &self.key_columns {
            cells.push(row.get(column).ok_or_else(|| RelationError::MissingValue {
                relation: self.describe(),
                column: column.clone(),
            })?);
        }
        Ok(bincode::serialize(&cells)?)
    }

    fn entry_key(&self, handle: Handle) -> Result<Vec<u8>, RelationError> {
        let row = self.relation.project(handle, Some(self.key_columns.as_slice()))?;
        let mut key = self.key_bytes(&row)?;
        if !self.unique {
            key.extend_from_slice(&handle.to_be_bytes());
        }
        Ok(key)
    }

    fn backfill(&self) -> Result<(), RelationError> {
        for handle in self.relation.select(None)? {
            self.insert(handle)?;
        }
        Ok(())
    }
}

impl DbIndex for BTreeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn key_columns(&self) -> &[Identifier] {
        &self.key_columns
    }

    fn is_unique(&self) -> bool {
        self.unique
    }

    fn create(&self) -> Result<(), RelationError> {
        self.relation.check_columns(&self.key_columns)?;
        self.relation.store.register(&self.key, &self.describe())?;
        if let Err(e) = self.backfill() {
            if let Err(drop_err) = self.drop() {
                warn!("could not discard partial {}: {drop_err}", self.describe());
            }
            return Err(e);
        }
        Ok(())
    }

    fn drop(&self) -> Result<(), RelationError> {
        self.relation.store.unregister(&self.key, &self.describe())
    }

    fn insert(&self, handle: Handle) -> Result<(), RelationError> {
        let tree = self.tree()?;
        let key = self.entry_key(handle)?;
        let stored = IVec::from(&handle.to_be_bytes()[..]);
        if self.unique {
            let swapped = tree.compare_and_swap(key, None::<&[u8]>, Some(stored))?;
            if swapped.is_err() {
                return Err(RelationError::DuplicateKey(self.name.clone()));
            }
        } else {
            tree.insert(key, stored)?;
        }
        Ok(())
    }

    fn del(&self, handle: Handle) -> Result<(), RelationError> {
        let tree = self.tree()?;
        let key = self.entry_key(handle)?;
        if tree.remove(key)?.is_none() {
            return Err(RelationError::NoSuchRow {
                relation: self.describe(),
                handle,
            });
        }
        Ok(())
    }

    fn lookup(&self, key: &Row) -> Result<Handles, RelationError> {
        let tree = self.tree()?;
        let prefix = self.key_bytes(key)?;
        if self.unique {
            return tree
                .get(prefix)?
                .map(|v| self.relation.handle_of(&v))
                .into_iter()
                .collect();
        }
        let mut handles = Vec::new();
        for item in tree.scan_prefix(prefix) {
            let (_k, v) = item?;
            handles.push(self.relation.handle_of(&v)?);
        }
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people(store: &Store) -> HeapTable {
        store.relation(
            "people",
            vec!["id".into(), "name".into()],
            vec![ColumnAttribute::Int, ColumnAttribute::Text],
        )
    }

    fn person(id: i64, name: &str) -> Row {
        Row::from([("id", Value::Int(id)), ("name", Value::from(name))])
    }

    #[test]
    fn create_is_exclusive() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        assert!(!t.exists().unwrap());
        t.create().unwrap();
        assert!(t.exists().unwrap());
        assert!(matches!(t.create(), Err(RelationError::AlreadyExists(_))));
        t.create_if_not_exists().unwrap();
        t.drop().unwrap();
        assert!(!t.exists().unwrap());
        assert!(matches!(t.drop(), Err(RelationError::Missing(_))));
    }

    #[test]
    fn insert_select_project() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        t.create().unwrap();
        let a = t.insert(&person(1, "ann")).unwrap();
        let b = t.insert(&person(2, "bob")).unwrap();
        let c = t.insert(&person(3, "bob")).unwrap();

        assert_eq!(t.select(None).unwrap(), vec![a, b, c]);
        let bobs = t.select(Some(&Row::from([("name", "bob")]))).unwrap();
        assert_eq!(bobs, vec![b, c]);

        assert_eq!(t.project(a, None).unwrap(), person(1, "ann"));
        let names = ["name".to_string()];
        assert_eq!(
            t.project(c, Some(&names[..])).unwrap(),
            Row::from([("name", "bob")])
        );
    }

    #[test]
    fn insert_validates_row() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        t.create().unwrap();
        let missing = Row::from([("id", 1)]);
        assert!(matches!(
            t.insert(&missing),
            Err(RelationError::MissingValue { .. })
        ));
        let wrong = Row::from([("id", Value::from("x")), ("name", Value::from("y"))]);
        assert!(matches!(
            t.insert(&wrong),
            Err(RelationError::TypeMismatch { .. })
        ));
        assert!(t.select(None).unwrap().is_empty());
    }

    #[test]
    fn null_round_trips() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        t.create().unwrap();
        let row = Row::from([("id", Value::Int(7)), ("name", Value::Null)]);
        let h = t.insert(&row).unwrap();
        assert_eq!(t.project(h, None).unwrap(), row);
    }

    #[test]
    fn del_removes_and_is_not_idempotent() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        t.create().unwrap();
        let a = t.insert(&person(1, "ann")).unwrap();
        let b = t.insert(&person(2, "bob")).unwrap();
        t.del(a).unwrap();
        assert_eq!(t.select(None).unwrap(), vec![b]);
        assert!(matches!(t.del(a), Err(RelationError::NoSuchRow { .. })));
        assert!(matches!(t.project(a, None), Err(RelationError::NoSuchRow { .. })));
    }

    #[test]
    fn unknown_columns_are_reported() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        t.create().unwrap();
        let h = t.insert(&person(1, "ann")).unwrap();
        assert!(matches!(
            t.select(Some(&Row::from([("age", 3)]))),
            Err(RelationError::UnknownColumn { .. })
        ));
        let cols = ["age".to_string()];
        assert!(matches!(
            t.project(h, Some(&cols[..])),
            Err(RelationError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn operations_on_missing_storage_fail() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        assert!(matches!(
            t.insert(&person(1, "ann")),
            Err(RelationError::Missing(_))
        ));
        assert!(matches!(t.select(None), Err(RelationError::Missing(_))));
    }

    #[test]
    fn unique_index_backfills_and_rejects_duplicates() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        t.create().unwrap();
        let a = t.insert(&person(1, "ann")).unwrap();
        let ix = store.index(&t, "by_id", vec!["id".into()], true);
        ix.create().unwrap();
        assert_eq!(ix.lookup(&Row::from([("id", 1)])).unwrap(), vec![a]);

        let dup = t.insert(&person(1, "again")).unwrap();
        assert!(matches!(ix.insert(dup), Err(RelationError::DuplicateKey(_))));

        ix.del(a).unwrap();
        assert!(ix.lookup(&Row::from([("id", 1)])).unwrap().is_empty());
        ix.insert(dup).unwrap();
        assert_eq!(ix.lookup(&Row::from([("id", 1)])).unwrap(), vec![dup]);
    }

    #[test]
    fn non_unique_index_keeps_equal_keys() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        t.create().unwrap();
        let ix = store.index(&t, "by_name", vec!["name".into()], false);
        ix.create().unwrap();
        let b1 = t.insert(&person(1, "bob")).unwrap();
        let b2 = t.insert(&person(2, "bob")).unwrap();
        let c = t.insert(&person(3, "bobby")).unwrap();
        for h in [b1, b2, c] {
            ix.insert(h).unwrap();
        }
        assert_eq!(ix.lookup(&Row::from([("name", "bob")])).unwrap(), vec![b1, b2]);
        assert_eq!(ix.lookup(&Row::from([("name", "bobby")])).unwrap(), vec![c]);
    }

    #[test]
    fn failed_backfill_leaves_no_index_storage() {
        let store = Store::temporary().unwrap();
        let t = people(&store);
        t.create().unwrap();
        t.insert(&person(1, "ann")).unwrap();
        t.insert(&person(2, "ann")).unwrap();
        let ix = store.index(&t, "by_name", vec!["name".into()], true);
        assert!(matches!(ix.create(), Err(RelationError::DuplicateKey(_))));
        assert!(matches!(ix.drop(), Err(RelationError::Missing(_))));
    }

    #[test]
    fn index_and_table_names_do_not_collide() {
        assert_ne!(Store::index_key("t", "ab"), Store::index_key("ta", "b"));
    }
}
