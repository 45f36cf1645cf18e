//! Statement execution against the catalog.
//!
//! Every handler follows the same shape: validate against the catalog
//! first, then write. Handlers that write catalog rows before touching
//! physical storage record compensations in an [`UndoLog`] so a failing
//! statement leaves the catalog as it found it.

use crate::catalog::{is_schema_table, Catalog, Columns, IndexColumn, Indices, Tables, COLUMNS, INDICES, TABLES};
use crate::error::ExecError;
use crate::model::{ColumnAttribute, ColumnAttributes, ColumnNames, Identifier, Row};
use crate::parse::{column_name, literal, object_name, parse, Command};
use crate::plan::{EvalPlan, Predicate};
use crate::result::QueryResult;
use crate::storage::{DbIndex, DbRelation, Storage};
use crate::undo::UndoLog;
use sqlparser::ast::{
    self, DataType, FromTable, ObjectType, SelectItem, SetExpr, Statement, TableFactor, TableObject,
    TableWithJoins,
};
use tracing::{debug, info};

const DEFAULT_INDEX_TYPE: &str = "BTREE";

pub struct SqlExec<S: Storage> {
    catalog: Catalog<S>,
}

impl<S: Storage> SqlExec<S> {
    pub fn new(catalog: Catalog<S>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog<S> {
        &self.catalog
    }

    /// Parses and executes every statement in `sql`, returning the result of
    /// the last one. Stops at the first failing statement.
    pub fn run(&mut self, sql: &str) -> Result<QueryResult, ExecError> {
        let mut last = QueryResult::default();
        for command in parse(sql)? {
            last = self.execute(&command)?;
        }
        Ok(last)
    }

    pub fn execute(&mut self, command: &Command) -> Result<QueryResult, ExecError> {
        debug!("executing: {command}");
        match command {
            Command::ShowIndex { table } => self.show_index(table),
            Command::DropIndex { table, index } => self.drop_index(table, index),
            Command::Statement(stmt) => self.execute_statement(stmt),
        }
    }

    fn execute_statement(&mut self, stmt: &Statement) -> Result<QueryResult, ExecError> {
        match stmt {
            Statement::CreateTable(create) => self.create_table(create),
            Statement::CreateIndex(create) => self.create_index(create),
            Statement::Drop {
                object_type: ObjectType::Table,
                names,
                if_exists,
                ..
            } => {
                let mut result = QueryResult::default();
                for name in names {
                    result = self.drop_table(&object_name(name)?, *if_exists)?;
                }
                Ok(result)
            }
            Statement::Drop {
                object_type: ObjectType::Index,
                ..
            } => Err(ExecError::Parse(
                "DROP INDEX requires <index> FROM <table>".into(),
            )),
            Statement::ShowTables { .. } => self.show_tables(),
            Statement::ShowColumns { show_options, .. } => {
                let table = show_options
                    .show_in
                    .as_ref()
                    .and_then(|show_in| show_in.parent_name.as_ref())
                    .map(object_name)
                    .transpose()?;
                self.show_columns(table.as_deref())
            }
            Statement::Insert(insert) => self.insert(insert),
            Statement::Delete(delete) => self.delete(delete),
            Statement::Query(query) => self.select(query),
            _ => Ok(QueryResult::message("not implemented")),
        }
    }

    fn create_table(&mut self, create: &ast::CreateTable) -> Result<QueryResult, ExecError> {
        let table = object_name(&create.name)?;
        if is_schema_table(&table) {
            return Err(ExecError::Protected(table));
        }
        let mut column_names: ColumnNames = Vec::with_capacity(create.columns.len());
        let mut column_attributes: ColumnAttributes = Vec::with_capacity(create.columns.len());
        for column in &create.columns {
            if column_names.contains(&column.name.value) {
                return Err(ExecError::Invalid(format!(
                    "duplicate column {} in {table}",
                    column.name.value
                )));
            }
            column_names.push(column.name.value.clone());
            column_attributes.push(column_attribute(&column.data_type)?);
        }
        if column_names.is_empty() {
            return Err(ExecError::Invalid(format!("{table} has no columns")));
        }

        let tables = &mut self.catalog.tables;
        if tables.is_registered(&table)? {
            if create.if_not_exists {
                return Ok(QueryResult::message(format!("table {table} already exists")));
            }
            return Err(ExecError::AlreadyExists(format!("table {table}")));
        }

        let mut undo = UndoLog::new();
        let registry = tables.relation().clone();
        let handle = registry.insert(&Tables::<S>::row(&table))?;
        undo.push(format!("remove {table} from {TABLES}"), move || registry.del(handle));
        for (column, attribute) in column_names.iter().zip(&column_attributes) {
            let schema = tables.columns().clone();
            let handle = schema.insert(&Columns::<S>::row(&table, column, *attribute))?;
            undo.push(format!("remove {table}.{column} from {COLUMNS}"), move || {
                schema.del(handle)
            });
        }

        let relation = tables
            .storage()
            .relation(&table, column_names, column_attributes);
        if create.if_not_exists {
            relation.create_if_not_exists()?;
        } else {
            relation.create()?;
        }
        undo.commit();
        info!("created table {table}");
        Ok(QueryResult::message(format!("created {table}")))
    }

    fn create_index(&mut self, create: &ast::CreateIndex) -> Result<QueryResult, ExecError> {
        let index = match &create.name {
            Some(name) => object_name(name)?,
            None => return Err(ExecError::Parse("CREATE INDEX requires an index name".into())),
        };
        let table = object_name(&create.table_name)?;
        let index_type = match &create.using {
            None => DEFAULT_INDEX_TYPE.to_string(),
            Some(using) => match using.to_string().to_ascii_uppercase().as_str() {
                t @ ("BTREE" | "HASH") => t.to_string(),
                other => return Err(ExecError::NotSupported(format!("index type {other}"))),
            },
        };
        let is_unique = index_type == "BTREE";
        if create.unique && !is_unique {
            return Err(ExecError::NotSupported(format!("UNIQUE {index_type} index")));
        }

        let mut key_columns: ColumnNames = Vec::with_capacity(create.columns.len());
        for column in &create.columns {
            let expr = &column.column.expr;
            let name = column_name(expr)
                .ok_or_else(|| ExecError::NotSupported(format!("index on expression {expr}")))?;
            if key_columns.contains(&name) {
                return Err(ExecError::Invalid(format!("column {name} repeated in index {index}")));
            }
            key_columns.push(name);
        }

        let Catalog { tables, indices } = &mut self.catalog;
        let relation = registered(tables, &table)?;
        for column in &key_columns {
            if !relation.column_names().contains(column) {
                return Err(ExecError::NotFound(format!("no such column {column} in {table}")));
            }
        }
        if !indices.handles(&table, Some(index.as_str()))?.is_empty() {
            if create.if_not_exists {
                return Ok(QueryResult::message(format!("index {index} already exists")));
            }
            return Err(ExecError::AlreadyExists(format!("index {index} on {table}")));
        }

        let mut undo = UndoLog::new();
        for (seq_in_index, column) in (1..).zip(&key_columns) {
            let row = Indices::<S>::row(
                &table,
                &index,
                &IndexColumn {
                    seq_in_index,
                    column_name: column.clone(),
                    index_type: index_type.clone(),
                    is_unique,
                },
            );
            let registry = indices.relation().clone();
            let handle = registry.insert(&row)?;
            undo.push(format!("remove {index}.{column} from {INDICES}"), move || {
                registry.del(handle)
            });
        }
        tables
            .storage()
            .index(&relation, &index, key_columns, is_unique)
            .create()?;
        undo.commit();
        info!("created index {index} on {table} using {index_type}");
        Ok(QueryResult::message(format!("created index {index}")))
    }

    fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<QueryResult, ExecError> {
        if is_schema_table(table) {
            return Err(ExecError::Protected(table.to_string()));
        }
        if if_exists && !self.catalog.tables.is_registered(table)? {
            return Ok(QueryResult::message(format!("table {table} does not exist")));
        }
        let relation = registered(&mut self.catalog.tables, table)?;
        for index in self.catalog.indices.get_index_names(table)? {
            self.drop_index(table, &index)?;
        }

        let tables = &mut self.catalog.tables;
        let filter = Tables::<S>::row(table);
        let schema = tables.columns();
        for handle in schema.select(Some(&filter))? {
            schema.del(handle)?;
        }
        relation.drop()?;
        let registry = tables.relation();
        for handle in registry.select(Some(&filter))? {
            registry.del(handle)?;
        }
        tables.forget(table);
        info!("dropped table {table}");
        Ok(QueryResult::message(format!("dropped {table}")))
    }

    fn drop_index(&mut self, table: &str, index: &str) -> Result<QueryResult, ExecError> {
        let Catalog { tables, indices } = &mut self.catalog;
        if !tables.is_registered(table)? {
            return Err(ExecError::NotFound(format!("table {table}")));
        }
        let handles = indices.handles(table, Some(index))?;
        if handles.is_empty() {
            return Err(ExecError::NotFound(format!("index {index} on {table}")));
        }
        indices.get_index(tables, table, index)?.drop()?;
        let registry = indices.relation();
        for handle in handles {
            registry.del(handle)?;
        }
        indices.forget(table, index);
        info!("dropped index {index} from {table}");
        Ok(QueryResult::message(format!("dropped index {index} from {table}")))
    }

    fn show_tables(&mut self) -> Result<QueryResult, ExecError> {
        let (column_names, column_attributes) = Tables::<S>::schema();
        let registry = self.catalog.tables.relation();
        let mut rows = Vec::new();
        for handle in registry.select(None)? {
            let row = registry.project(handle, Some(column_names.as_slice()))?;
            let hidden = row
                .get("table_name")
                .and_then(|v| v.as_str())
                .is_some_and(is_schema_table);
            if !hidden {
                rows.push(row);
            }
        }
        Ok(QueryResult::rows(column_names, column_attributes, rows))
    }

    fn show_columns(&mut self, table: Option<&str>) -> Result<QueryResult, ExecError> {
        let (column_names, column_attributes) = Columns::<S>::schema();
        let filter = table.map(Tables::<S>::row);
        let rows = project_all(self.catalog.tables.columns(), filter.as_ref(), &column_names)?;
        Ok(QueryResult::rows(column_names, column_attributes, rows))
    }

    fn show_index(&mut self, table: &str) -> Result<QueryResult, ExecError> {
        let (column_names, column_attributes) = Indices::<S>::schema();
        let filter = Tables::<S>::row(table);
        let rows = project_all(self.catalog.indices.relation(), Some(&filter), &column_names)?;
        Ok(QueryResult::rows(column_names, column_attributes, rows))
    }

    fn insert(&mut self, insert: &ast::Insert) -> Result<QueryResult, ExecError> {
        let table = match &insert.table {
            TableObject::TableName(name) => object_name(name)?,
            _ => return Err(ExecError::NotSupported("INSERT into a table function".into())),
        };
        if is_schema_table(&table) {
            return Err(ExecError::Protected(table));
        }
        let relation = registered(&mut self.catalog.tables, &table)?;
        let Some(source) = &insert.source else {
            return Err(ExecError::Parse("INSERT requires VALUES".into()));
        };
        let SetExpr::Values(values) = source.body.as_ref() else {
            return Err(ExecError::NotSupported("INSERT ... SELECT".into()));
        };

        let targets: ColumnNames = if insert.columns.is_empty() {
            relation.column_names().to_vec()
        } else {
            insert.columns.iter().map(|c| c.value.clone()).collect()
        };
        for (i, column) in targets.iter().enumerate() {
            if relation.attribute_of(column).is_none() {
                return Err(ExecError::NotFound(format!("no such column {column} in {table}")));
            }
            if targets[..i].contains(column) {
                return Err(ExecError::Invalid(format!("column {column} listed twice")));
            }
        }
        if targets.len() != relation.column_names().len() {
            return Err(ExecError::Invalid(format!(
                "INSERT must supply every column of {table}"
            )));
        }

        let mut rows = Vec::with_capacity(values.rows.len());
        for exprs in &values.rows {
            if exprs.len() != targets.len() {
                return Err(ExecError::Invalid(format!(
                    "expected {} values, got {}",
                    targets.len(),
                    exprs.len()
                )));
            }
            let mut row = Row::new();
            for (column, expr) in targets.iter().zip(exprs) {
                let value = literal(expr).ok_or_else(|| ExecError::UnsupportedType(expr.to_string()))?;
                if let Some(attribute) = relation.attribute_of(column) {
                    if !value.fits(attribute) {
                        return Err(ExecError::UnsupportedType(format!(
                            "{expr} for {attribute} column {column}"
                        )));
                    }
                }
                row.insert(column.clone(), value);
            }
            rows.push(row);
        }

        let indices = self.table_indices(&table)?;
        let mut undo = UndoLog::new();
        for row in &rows {
            let handle = relation.insert(row)?;
            let base = relation.clone();
            undo.push(format!("delete {handle} from {table}"), move || base.del(handle));
            for index in &indices {
                index.insert(handle)?;
                let index = index.clone();
                undo.push(format!("unindex {handle}"), move || index.del(handle));
            }
        }
        undo.commit();
        Ok(QueryResult::message(format!(
            "successfully inserted {} into {table} and {} indices",
            count(rows.len(), "row"),
            indices.len()
        )))
    }

    fn delete(&mut self, delete: &ast::Delete) -> Result<QueryResult, ExecError> {
        let from = match &delete.from {
            FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => from,
        };
        let table = single_table(from)?;
        if is_schema_table(&table) {
            return Err(ExecError::Protected(table));
        }
        let relation = registered(&mut self.catalog.tables, &table)?;
        let mut plan = EvalPlan::scan(relation.clone());
        if let Some(selection) = &delete.selection {
            plan = plan.select(Predicate::from_expr(selection)?);
        }
        let plan = plan.optimize();
        debug!("delete plan:\n{plan}");
        let (_, handles) = plan.pipeline()?;

        let indices = self.table_indices(&table)?;
        for &handle in &handles {
            for index in &indices {
                index.del(handle)?;
            }
            relation.del(handle)?;
        }
        Ok(QueryResult::message(format!(
            "successfully deleted {} from {table} and {} indices",
            count(handles.len(), "row"),
            indices.len()
        )))
    }

    fn select(&mut self, query: &ast::Query) -> Result<QueryResult, ExecError> {
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(ExecError::NotSupported(format!("query {query}")));
        };
        let table = single_table(&select.from)?;
        let relation = registered(&mut self.catalog.tables, &table)?;

        let mut requested: ColumnNames = Vec::with_capacity(select.projection.len());
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => requested.push("*".to_string()),
                SelectItem::UnnamedExpr(expr) => requested.push(
                    column_name(expr)
                        .ok_or_else(|| ExecError::NotSupported(format!("select expression {expr}")))?,
                ),
                other => return Err(ExecError::NotSupported(format!("select item {other}"))),
            }
        }

        let mut plan = EvalPlan::scan(relation.clone());
        if let Some(selection) = &select.selection {
            plan = plan.select(Predicate::from_expr(selection)?);
        }
        let plan = plan.project(requested).optimize();
        debug!("select plan:\n{plan}");

        let column_names = plan.output_columns();
        let column_attributes = column_names
            .iter()
            .map(|column| {
                relation
                    .attribute_of(column)
                    .ok_or_else(|| ExecError::NotFound(format!("no such column {column} in {table}")))
            })
            .collect::<Result<ColumnAttributes, _>>()?;
        let rows = plan.evaluate()?;
        Ok(QueryResult::rows(column_names, column_attributes, rows))
    }

    fn table_indices(&mut self, table: &str) -> Result<Vec<S::Index>, ExecError> {
        let Catalog { tables, indices } = &mut self.catalog;
        let mut out = Vec::new();
        for name in indices.get_index_names(table)? {
            out.push(indices.get_index(tables, table, &name)?);
        }
        Ok(out)
    }
}

/// The relation for `table`, failing with `NotFound` unless it is
/// registered in `_tables`.
fn registered<S: Storage>(tables: &mut Tables<S>, table: &str) -> Result<S::Relation, ExecError> {
    if !tables.is_registered(table)? {
        return Err(ExecError::NotFound(format!("table {table}")));
    }
    tables.get_table(table)
}

fn project_all<R: DbRelation>(
    relation: &R,
    filter: Option<&Row>,
    column_names: &[Identifier],
) -> Result<Vec<Row>, ExecError> {
    let mut rows = Vec::new();
    for handle in relation.select(filter)? {
        rows.push(relation.project(handle, Some(column_names))?);
    }
    Ok(rows)
}

fn single_table(from: &[TableWithJoins]) -> Result<Identifier, ExecError> {
    match from {
        [only] if only.joins.is_empty() => match &only.relation {
            TableFactor::Table { name, .. } => object_name(name),
            other => Err(ExecError::NotSupported(format!("FROM {other}"))),
        },
        [] => Err(ExecError::NotSupported("query without FROM".into())),
        _ => Err(ExecError::NotSupported("joins".into())),
    }
}

fn column_attribute(data_type: &DataType) -> Result<ColumnAttribute, ExecError> {
    match data_type {
        DataType::Int(_) | DataType::Integer(_) => Ok(ColumnAttribute::Int),
        DataType::Text => Ok(ColumnAttribute::Text),
        other => Err(ExecError::UnsupportedType(other.to_string())),
    }
}

fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::store::Store;
    use tempfile::tempdir;

    fn exec() -> SqlExec<Store> {
        SqlExec::new(Catalog::open(Store::temporary().unwrap()).unwrap())
    }

    fn count_rows(relation: &impl DbRelation) -> usize {
        relation.select(None).unwrap().len()
    }

    #[test]
    fn test_create_insert_select_flow() {
        let mut exec = exec();
        for sql in [
            "CREATE TABLE foo (id INT, data TEXT)",
            "INSERT INTO foo VALUES (1, 'one'), (2, \"two\")",
            "INSERT INTO foo (data, id) VALUES ('minus', -3)",
        ] {
            if let Err(e) = exec.run(sql) {
                panic!("Failed to run {sql}: {e}");
            }
        }

        let res = exec.run("SELECT * FROM foo WHERE data = 'two'").unwrap();
        assert_eq!(res.column_names, Some(vec!["id".to_string(), "data".to_string()]));
        assert_eq!(
            res.column_attributes,
            Some(vec![ColumnAttribute::Int, ColumnAttribute::Text])
        );
        assert_eq!(
            res.rows,
            Some(vec![Row::from([("id", Value::Int(2)), ("data", Value::from("two"))])])
        );
        assert_eq!(res.message, "successfully returned 1 rows");

        let res = exec.run("SELECT data FROM foo").unwrap();
        let data: Vec<_> = res
            .rows
            .unwrap()
            .iter()
            .map(|r| r.get("data").cloned().unwrap())
            .collect();
        assert_eq!(data, vec![Value::from("one"), Value::from("two"), Value::from("minus")]);
    }

    #[test]
    fn test_status_messages() {
        let mut exec = exec();
        assert_eq!(exec.run("CREATE TABLE t (x INT, y INT)").unwrap().message, "created t");
        assert_eq!(
            exec.run("CREATE INDEX ix ON t (x)").unwrap().message,
            "created index ix"
        );
        assert_eq!(
            exec.run("INSERT INTO t VALUES (1, 2)").unwrap().message,
            "successfully inserted 1 row into t and 1 indices"
        );
        assert_eq!(
            exec.run("DELETE FROM t WHERE y = 2").unwrap().message,
            "successfully deleted 1 row from t and 1 indices"
        );
        assert_eq!(
            exec.run("DROP INDEX ix FROM t").unwrap().message,
            "dropped index ix from t"
        );
        assert_eq!(exec.run("DROP TABLE t").unwrap().message, "dropped t");
        assert_eq!(
            exec.run("CREATE DATABASE d").unwrap().message,
            "not implemented"
        );
    }

    #[test]
    fn test_create_table_rejects_bad_input_before_writing() {
        let mut exec = exec();
        let tables_before = count_rows(exec.catalog().tables.relation());
        let columns_before = count_rows(exec.catalog().tables.columns());

        assert!(matches!(
            exec.run("CREATE TABLE _columns (x INT)"),
            Err(ExecError::Protected(_))
        ));
        assert!(matches!(
            exec.run("CREATE TABLE t (x INT, y DOUBLE)"),
            Err(ExecError::UnsupportedType(_))
        ));
        assert!(matches!(
            exec.run("CREATE TABLE t (x INT, x TEXT)"),
            Err(ExecError::Invalid(_))
        ));
        assert_eq!(count_rows(exec.catalog().tables.relation()), tables_before);
        assert_eq!(count_rows(exec.catalog().tables.columns()), columns_before);

        exec.run("CREATE TABLE t (x INT)").unwrap();
        assert!(matches!(
            exec.run("CREATE TABLE t (x INT)"),
            Err(ExecError::AlreadyExists(_))
        ));
        assert_eq!(
            exec.run("CREATE TABLE IF NOT EXISTS t (x INT)").unwrap().message,
            "table t already exists"
        );
    }

    #[test]
    fn test_create_table_rolls_back_on_storage_failure() {
        let store = Store::temporary().unwrap();
        let mut exec = SqlExec::new(Catalog::open(store.clone()).unwrap());
        store
            .relation("ghost", vec!["x".into()], vec![ColumnAttribute::Int])
            .create()
            .unwrap();

        let tables_before = count_rows(exec.catalog().tables.relation());
        let columns_before = count_rows(exec.catalog().tables.columns());
        let err = exec.run("CREATE TABLE ghost (x INT, y TEXT)").unwrap_err();
        assert!(matches!(err, ExecError::Relation(_)), "{err}");
        assert_eq!(count_rows(exec.catalog().tables.relation()), tables_before);
        assert_eq!(count_rows(exec.catalog().tables.columns()), columns_before);
    }

    #[test]
    fn test_create_index_rolls_back_on_storage_failure() {
        let mut exec = exec();
        exec.run("CREATE TABLE t (x INT, y INT)").unwrap();
        exec.run("INSERT INTO t VALUES (1, 5), (2, 5)").unwrap();

        // A unique index cannot be built over the duplicate y values.
        let err = exec.run("CREATE INDEX uy ON t (y)").unwrap_err();
        assert!(matches!(err, ExecError::Relation(_)), "{err}");
        assert!(exec.run("SHOW INDEX FROM t").unwrap().rows.unwrap().is_empty());

        exec.run("CREATE INDEX hy ON t USING HASH (y)").unwrap();
        assert_eq!(exec.run("SHOW INDEX FROM t").unwrap().row_count(), 1);
    }

    #[test]
    fn test_create_index_validation() {
        let mut exec = exec();
        assert!(matches!(
            exec.run("CREATE INDEX ix ON nope (x)"),
            Err(ExecError::NotFound(_))
        ));
        exec.run("CREATE TABLE t (x INT, y INT)").unwrap();
        assert!(matches!(
            exec.run("CREATE INDEX ix ON t (z)"),
            Err(ExecError::NotFound(_))
        ));
        assert!(matches!(
            exec.run("CREATE UNIQUE INDEX ix ON t USING HASH (x)"),
            Err(ExecError::NotSupported(_))
        ));
        assert_eq!(exec.run("SHOW INDEX FROM t").unwrap().row_count(), 0);

        exec.run("CREATE INDEX ix ON t (x, y)").unwrap();
        assert!(matches!(
            exec.run("CREATE INDEX ix ON t (y)"),
            Err(ExecError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_insert_is_all_or_nothing() {
        let mut exec = exec();
        exec.run("CREATE TABLE t (x INT, y TEXT)").unwrap();
        exec.run("CREATE INDEX ux ON t (x)").unwrap();
        exec.run("INSERT INTO t VALUES (1, 'a')").unwrap();

        let err = exec
            .run("INSERT INTO t VALUES (2, 'b'), (1, 'dup')")
            .unwrap_err();
        assert!(matches!(err, ExecError::Relation(_)), "{err}");
        assert_eq!(exec.run("SELECT * FROM t").unwrap().row_count(), 1);
        // The rolled-back row left no index entry behind.
        exec.run("INSERT INTO t VALUES (2, 'b')").unwrap();
        assert_eq!(exec.run("SELECT * FROM t").unwrap().row_count(), 2);
    }

    #[test]
    fn test_insert_rejects_bad_values() {
        let mut exec = exec();
        assert!(matches!(
            exec.run("INSERT INTO nope VALUES (1)"),
            Err(ExecError::NotFound(_))
        ));
        exec.run("CREATE TABLE t (x INT, y TEXT)").unwrap();
        for sql in [
            "INSERT INTO t VALUES (1.5, 'a')",
            "INSERT INTO t VALUES ('a', 'a')",
            "INSERT INTO t VALUES (NULL, 'a')",
        ] {
            assert!(
                matches!(exec.run(sql), Err(ExecError::UnsupportedType(_))),
                "{sql}"
            );
        }
        assert!(matches!(
            exec.run("INSERT INTO t VALUES (1)"),
            Err(ExecError::Invalid(_))
        ));
        assert!(matches!(
            exec.run("INSERT INTO t (x) VALUES (1)"),
            Err(ExecError::Invalid(_))
        ));
        assert_eq!(exec.run("SELECT * FROM t").unwrap().row_count(), 0);
    }

    #[test]
    fn test_delete_maintains_indices() {
        let mut exec = exec();
        exec.run("CREATE TABLE t (x INT, y INT)").unwrap();
        exec.run("CREATE INDEX ux ON t (x)").unwrap();
        exec.run("INSERT INTO t VALUES (1, 2), (2, 2), (3, 4)").unwrap();
        exec.run("DELETE FROM t WHERE y = 2").unwrap();

        // The unique keys 1 and 2 are free again.
        exec.run("INSERT INTO t VALUES (1, 9), (2, 9)").unwrap();
        let res = exec.run("SELECT x FROM t WHERE y = 9").unwrap();
        assert_eq!(res.row_count(), 2);

        assert!(matches!(
            exec.run("DELETE FROM t WHERE x > 1"),
            Err(ExecError::MalformedPredicate(_))
        ));
        exec.run("DELETE FROM t").unwrap();
        assert_eq!(exec.run("SELECT * FROM t").unwrap().row_count(), 0);
    }

    #[test]
    fn test_drop_table_cleans_catalog() {
        let mut exec = exec();
        exec.run("CREATE TABLE t (x INT, y INT)").unwrap();
        exec.run("CREATE INDEX ix ON t (x, y)").unwrap();
        exec.run("DROP TABLE t").unwrap();

        assert_eq!(exec.run("SHOW COLUMNS FROM t").unwrap().row_count(), 0);
        assert_eq!(exec.run("SHOW INDEX FROM t").unwrap().row_count(), 0);
        assert_eq!(exec.run("SHOW TABLES").unwrap().row_count(), 0);
        assert!(matches!(exec.run("DROP TABLE t"), Err(ExecError::NotFound(_))));
        exec.run("DROP TABLE IF EXISTS t").unwrap();

        // Same name, new schema.
        exec.run("CREATE TABLE t (z TEXT)").unwrap();
        exec.run("INSERT INTO t VALUES ('ok')").unwrap();
        assert_eq!(exec.run("SELECT z FROM t").unwrap().row_count(), 1);
    }

    #[test]
    fn test_schema_tables_are_protected() {
        let mut exec = exec();
        for table in [TABLES, COLUMNS, INDICES] {
            assert!(matches!(
                exec.run(&format!("DROP TABLE {table}")),
                Err(ExecError::Protected(_))
            ));
        }
        assert_eq!(exec.run("SHOW COLUMNS FROM _tables").unwrap().row_count(), 1);
    }

    #[test]
    fn test_dml_on_schema_tables_is_refused() {
        let mut exec = exec();
        exec.run("CREATE TABLE t (x INT, y TEXT)").unwrap();
        let tables_before = count_rows(exec.catalog().tables.relation());
        let columns_before = count_rows(exec.catalog().tables.columns());
        let indices_before = count_rows(exec.catalog().indices.relation());

        for sql in [
            "DELETE FROM _tables WHERE table_name = 't'",
            "DELETE FROM _columns",
            "DELETE FROM _indices",
            "INSERT INTO _columns VALUES ('ghost', 'c', 'INT')",
            "INSERT INTO _tables VALUES ('ghost')",
        ] {
            assert!(
                matches!(exec.run(sql), Err(ExecError::Protected(_))),
                "{sql}"
            );
        }

        assert_eq!(count_rows(exec.catalog().tables.relation()), tables_before);
        assert_eq!(count_rows(exec.catalog().tables.columns()), columns_before);
        assert_eq!(count_rows(exec.catalog().indices.relation()), indices_before);
        assert_eq!(exec.run("SHOW COLUMNS FROM ghost").unwrap().row_count(), 0);
        assert_eq!(exec.run("SHOW COLUMNS FROM t").unwrap().row_count(), 2);
        exec.run("DROP TABLE t").unwrap();
        exec.run("CREATE TABLE t (z INT)").unwrap();
    }

    #[test]
    fn test_drop_index_errors() {
        let mut exec = exec();
        assert!(matches!(
            exec.run("DROP INDEX ix FROM nope"),
            Err(ExecError::NotFound(_))
        ));
        exec.run("CREATE TABLE t (x INT)").unwrap();
        assert!(matches!(
            exec.run("DROP INDEX ix ON t"),
            Err(ExecError::NotFound(_))
        ));
    }

    #[test]
    fn test_select_errors() {
        let mut exec = exec();
        assert!(matches!(exec.run("SELECT * FROM nope"), Err(ExecError::NotFound(_))));
        exec.run("CREATE TABLE t (x INT)").unwrap();
        assert!(matches!(exec.run("SELECT z FROM t"), Err(ExecError::NotFound(_))));
        assert!(matches!(
            exec.run("SELECT x + 1 FROM t"),
            Err(ExecError::NotSupported(_))
        ));
        assert!(matches!(
            exec.run("SELECT * FROM t WHERE x = 1 OR x = 2"),
            Err(ExecError::MalformedPredicate(_))
        ));
    }

    #[test]
    fn test_catalog_is_reread_by_a_new_session() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        {
            let mut exec = SqlExec::new(Catalog::open(store.clone()).unwrap());
            exec.run("CREATE TABLE t (x INT, y TEXT)").unwrap();
            exec.run("CREATE INDEX ix ON t (x)").unwrap();
            exec.run("INSERT INTO t VALUES (1, 'a')").unwrap();
            exec.catalog().storage().flush().unwrap();
        }
        // Fresh catalog caches over the same live store.
        let mut exec = SqlExec::new(Catalog::open(store).unwrap());
        assert_eq!(exec.run("SELECT * FROM t").unwrap().row_count(), 1);
        assert_eq!(exec.run("SHOW INDEX FROM t").unwrap().row_count(), 1);
        assert!(exec.run("INSERT INTO t VALUES (1, 'b')").is_err());
    }
}
