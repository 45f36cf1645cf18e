//! The three self-describing system relations. `_tables` lists every
//! relation, `_columns` their ordered schemas, and `_indices` one row per
//! indexed column. All three register themselves in `_tables`/`_columns`.

use crate::error::{ExecError, RelationError};
use crate::model::{ColumnAttribute, ColumnAttributes, ColumnNames, Handles, Identifier, Row, Value};
use crate::storage::{DbRelation, Storage};
use std::collections::HashMap;
use tracing::info;

pub const TABLES: &str = "_tables";
pub const COLUMNS: &str = "_columns";
pub const INDICES: &str = "_indices";

pub fn is_schema_table(name: &str) -> bool {
    matches!(name, TABLES | COLUMNS | INDICES)
}

fn schema(columns: &[(&str, ColumnAttribute)]) -> (ColumnNames, ColumnAttributes) {
    columns
        .iter()
        .map(|(name, attr)| (name.to_string(), *attr))
        .unzip()
}

fn text(row: &Row, column: &str) -> Result<String, RelationError> {
    match row.get(column) {
        Some(Value::Text(s)) => Ok(s.clone()),
        other => Err(RelationError::Corrupt(format!(
            "catalog column {column} holds {other:?}"
        ))),
    }
}

pub struct Columns<S: Storage> {
    relation: S::Relation,
}

impl<S: Storage> Columns<S> {
    pub fn schema() -> (ColumnNames, ColumnAttributes) {
        schema(&[
            ("table_name", ColumnAttribute::Text),
            ("column_name", ColumnAttribute::Text),
            ("data_type", ColumnAttribute::Text),
        ])
    }

    pub fn row(table: &str, column: &str, attribute: ColumnAttribute) -> Row {
        Row::from([
            ("table_name", table),
            ("column_name", column),
            ("data_type", attribute.as_str()),
        ])
    }

    pub fn relation(&self) -> &S::Relation {
        &self.relation
    }
}

pub struct Tables<S: Storage> {
    storage: S,
    relation: S::Relation,
    columns: Columns<S>,
    cache: HashMap<Identifier, S::Relation>,
}

impl<S: Storage> Tables<S> {
    pub fn schema() -> (ColumnNames, ColumnAttributes) {
        schema(&[("table_name", ColumnAttribute::Text)])
    }

    pub fn row(table: &str) -> Row {
        Row::from([("table_name", table)])
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The `_tables` relation itself.
    pub fn relation(&self) -> &S::Relation {
        &self.relation
    }

    /// The `_columns` relation.
    pub fn columns(&self) -> &S::Relation {
        self.columns.relation()
    }

    pub fn is_registered(&self, table: &str) -> Result<bool, ExecError> {
        Ok(!self.relation.select(Some(&Self::row(table)))?.is_empty())
    }

    /// Reads the ordered schema of `table` from `_columns`.
    pub fn get_columns(&self, table: &str) -> Result<(ColumnNames, ColumnAttributes), ExecError> {
        let columns = self.columns();
        let mut names = Vec::new();
        let mut attributes = Vec::new();
        for handle in columns.select(Some(&Self::row(table)))? {
            let row = columns.project(handle, None)?;
            let data_type = text(&row, "data_type")?;
            let attribute = data_type
                .parse::<ColumnAttribute>()
                .map_err(RelationError::Corrupt)?;
            names.push(text(&row, "column_name")?);
            attributes.push(attribute);
        }
        Ok((names, attributes))
    }

    /// A relation object bound to `table`'s storage. Does not check that
    /// the table is registered; callers use [`Tables::is_registered`].
    pub fn get_table(&mut self, table: &str) -> Result<S::Relation, ExecError> {
        if let Some(relation) = self.cache.get(table) {
            return Ok(relation.clone());
        }
        let (names, attributes) = self.get_columns(table)?;
        let relation = self.storage.relation(table, names, attributes);
        self.cache.insert(table.to_string(), relation.clone());
        Ok(relation)
    }

    pub fn forget(&mut self, table: &str) {
        self.cache.remove(table);
    }
}

/// One column of an index as stored in `_indices`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexColumn {
    pub seq_in_index: i64,
    pub column_name: Identifier,
    pub index_type: String,
    pub is_unique: bool,
}

pub struct Indices<S: Storage> {
    relation: S::Relation,
    cache: HashMap<(Identifier, Identifier), S::Index>,
}

impl<S: Storage> Indices<S> {
    pub fn schema() -> (ColumnNames, ColumnAttributes) {
        schema(&[
            ("table_name", ColumnAttribute::Text),
            ("index_name", ColumnAttribute::Text),
            ("seq_in_index", ColumnAttribute::Int),
            ("column_name", ColumnAttribute::Text),
            ("index_type", ColumnAttribute::Text),
            ("is_unique", ColumnAttribute::Boolean),
        ])
    }

    pub fn row(table: &str, index: &str, column: &IndexColumn) -> Row {
        Row::from([
            ("table_name", Value::from(table)),
            ("index_name", Value::from(index)),
            ("seq_in_index", Value::Int(column.seq_in_index)),
            ("column_name", Value::from(column.column_name.as_str())),
            ("index_type", Value::from(column.index_type.as_str())),
            ("is_unique", Value::Boolean(column.is_unique)),
        ])
    }

    fn filter(table: &str, index: Option<&str>) -> Row {
        let mut filter = Tables::<S>::row(table);
        if let Some(index) = index {
            filter.insert("index_name", index);
        }
        filter
    }

    pub fn relation(&self) -> &S::Relation {
        &self.relation
    }

    /// Index names on `table`, in the order they were created.
    pub fn get_index_names(&self, table: &str) -> Result<Vec<Identifier>, ExecError> {
        let names = [String::from("index_name")];
        let mut out: Vec<Identifier> = Vec::new();
        for handle in self.relation.select(Some(&Self::filter(table, None)))? {
            let name = text(&self.relation.project(handle, Some(&names[..]))?, "index_name")?;
            if !out.contains(&name) {
                out.push(name);
            }
        }
        Ok(out)
    }

    /// The `_indices` rows of one index, ordered by `seq_in_index`.
    pub fn get_index_columns(&self, table: &str, index: &str) -> Result<Vec<IndexColumn>, ExecError> {
        let mut out = Vec::new();
        for handle in self.relation.select(Some(&Self::filter(table, Some(index))))? {
            let row = self.relation.project(handle, None)?;
            let seq_in_index = row
                .get("seq_in_index")
                .and_then(Value::as_i64)
                .ok_or_else(|| RelationError::Corrupt("seq_in_index is not INT".into()))?;
            let is_unique = row
                .get("is_unique")
                .and_then(Value::as_bool)
                .ok_or_else(|| RelationError::Corrupt("is_unique is not BOOLEAN".into()))?;
            out.push(IndexColumn {
                seq_in_index,
                column_name: text(&row, "column_name")?,
                index_type: text(&row, "index_type")?,
                is_unique,
            });
        }
        out.sort_by_key(|c| c.seq_in_index);
        Ok(out)
    }

    /// Handles of every `_indices` row for `table` (and `index`, if given).
    pub fn handles(&self, table: &str, index: Option<&str>) -> Result<Handles, ExecError> {
        Ok(self.relation.select(Some(&Self::filter(table, index)))?)
    }

    pub fn get_index(
        &mut self,
        tables: &mut Tables<S>,
        table: &str,
        index: &str,
    ) -> Result<S::Index, ExecError> {
        let key = (table.to_string(), index.to_string());
        if let Some(found) = self.cache.get(&key) {
            return Ok(found.clone());
        }
        let columns = self.get_index_columns(table, index)?;
        let Some(first) = columns.first() else {
            return Err(ExecError::NotFound(format!("index {index} on {table}")));
        };
        let unique = first.is_unique;
        let key_columns = columns.into_iter().map(|c| c.column_name).collect();
        let relation = tables.get_table(table)?;
        let built = tables.storage().index(&relation, index, key_columns, unique);
        self.cache.insert(key, built.clone());
        Ok(built)
    }

    pub fn forget(&mut self, table: &str, index: &str) {
        self.cache.remove(&(table.to_string(), index.to_string()));
    }
}

/// Catalog state shared by every statement of a session.
pub struct Catalog<S: Storage> {
    pub tables: Tables<S>,
    pub indices: Indices<S>,
}

impl<S: Storage> Catalog<S> {
    /// Binds the system relations to `storage`, creating and seeding any
    /// whose storage does not exist yet.
    pub fn open(storage: S) -> Result<Self, ExecError> {
        let bootstrap = [
            (TABLES, Tables::<S>::schema()),
            (COLUMNS, Columns::<S>::schema()),
            (INDICES, Indices::<S>::schema()),
        ];
        let relations = bootstrap
            .iter()
            .map(|(name, (names, attrs))| storage.relation(name, names.clone(), attrs.clone()))
            .collect::<Vec<_>>();

        let mut fresh = Vec::new();
        for relation in &relations {
            if !relation.exists()? {
                relation.create()?;
                fresh.push(relation.name().to_string());
            }
        }

        let [tables, columns, indices]: [S::Relation; 3] = relations
            .try_into()
            .map_err(|_| ExecError::Invalid("catalog bootstrap".into()))?;

        for (name, (names, attrs)) in &bootstrap {
            if !fresh.iter().any(|f| f == name) {
                continue;
            }
            tables.insert(&Tables::<S>::row(name))?;
            for (column, attr) in names.iter().zip(attrs) {
                columns.insert(&Columns::<S>::row(name, column, *attr))?;
            }
            info!("bootstrapped {name}");
        }

        Ok(Self {
            tables: Tables {
                storage,
                relation: tables,
                columns: Columns { relation: columns },
                cache: HashMap::new(),
            },
            indices: Indices {
                relation: indices,
                cache: HashMap::new(),
            },
        })
    }

    pub fn storage(&self) -> &S {
        self.tables.storage()
    }
}
