use crate::model::{ColumnAttributes, ColumnNames, Row};
use std::fmt;

/// Outcome of one statement. Row-returning statements fill the three
/// optional fields; everything else carries only a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub column_names: Option<ColumnNames>,
    pub column_attributes: Option<ColumnAttributes>,
    pub rows: Option<Vec<Row>>,
    pub message: String,
}

impl QueryResult {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn rows(column_names: ColumnNames, column_attributes: ColumnAttributes, rows: Vec<Row>) -> Self {
        let message = format!("successfully returned {} rows", rows.len());
        Self {
            column_names: Some(column_names),
            column_attributes: Some(column_attributes),
            rows: Some(rows),
            message,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.as_ref().map_or(0, Vec::len)
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(names) = &self.column_names {
            for name in names {
                write!(f, "{name} ")?;
            }
            writeln!(f)?;
            f.write_str("+")?;
            for _ in names {
                f.write_str("----------+")?;
            }
            writeln!(f)?;
            for row in self.rows.iter().flatten() {
                for name in names {
                    match row.get(name) {
                        Some(value) => write!(f, "{value} ")?,
                        None => f.write_str("??? ")?,
                    }
                }
                writeln!(f)?;
            }
        }
        f.write_str(&self.message)
    }
}
