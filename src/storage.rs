//! The contract the executor programs against. Relations and indices are
//! bound to physical storage by name; all methods take `&self` because the
//! objects are cheap handles onto a shared engine.

use crate::error::RelationError;
use crate::model::{ColumnAttribute, ColumnNames, Handle, Handles, Identifier, Row};

pub trait DbRelation {
    fn name(&self) -> &str;
    fn column_names(&self) -> &[Identifier];
    fn column_attributes(&self) -> &[ColumnAttribute];

    /// Whether physical storage currently exists for this relation.
    fn exists(&self) -> Result<bool, RelationError>;

    /// Allocates storage. Fails with `AlreadyExists` if it is already there.
    fn create(&self) -> Result<(), RelationError>;
    fn create_if_not_exists(&self) -> Result<(), RelationError>;
    fn drop(&self) -> Result<(), RelationError>;

    /// Stores `row`, which must carry a value for every schema column.
    fn insert(&self, row: &Row) -> Result<Handle, RelationError>;
    fn del(&self, handle: Handle) -> Result<(), RelationError>;

    /// Handles of every row matching all pairs in `filter`, or of every row
    /// when `filter` is `None`, in insertion order.
    fn select(&self, filter: Option<&Row>) -> Result<Handles, RelationError>;

    /// Materializes `column_names` (all columns if `None`) of the row at `handle`.
    fn project(
        &self,
        handle: Handle,
        column_names: Option<&[Identifier]>,
    ) -> Result<Row, RelationError>;

    fn attribute_of(&self, column: &str) -> Option<ColumnAttribute> {
        self.column_names()
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.column_attributes().get(i).copied())
    }
}

pub trait DbIndex {
    fn name(&self) -> &str;
    fn key_columns(&self) -> &[Identifier];
    fn is_unique(&self) -> bool;

    /// Allocates storage and indexes every row already in the base relation.
    fn create(&self) -> Result<(), RelationError>;
    fn drop(&self) -> Result<(), RelationError>;

    /// Indexes the base-table row at `handle`, which must already be stored.
    fn insert(&self, handle: Handle) -> Result<(), RelationError>;

    /// Removes the entry for `handle`. The base row must still exist.
    fn del(&self, handle: Handle) -> Result<(), RelationError>;

    /// Handles whose key columns equal `key`.
    fn lookup(&self, key: &Row) -> Result<Handles, RelationError>;
}

/// Factory binding relation and index objects to physical storage.
pub trait Storage {
    type Relation: DbRelation + Clone;
    type Index: DbIndex + Clone;

    fn relation(
        &self,
        name: &str,
        column_names: ColumnNames,
        column_attributes: Vec<ColumnAttribute>,
    ) -> Self::Relation;

    fn index(
        &self,
        relation: &Self::Relation,
        name: &str,
        key_columns: ColumnNames,
        unique: bool,
    ) -> Self::Index;

    fn flush(&self) -> Result<(), RelationError>;
}
