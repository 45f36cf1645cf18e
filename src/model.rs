use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of a table, column or index. Compared by exact string match.
pub type Identifier = String;
pub type ColumnNames = Vec<Identifier>;
pub type ColumnAttributes = Vec<ColumnAttribute>;
pub type Handles = Vec<Handle>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnAttribute {
    Int,
    Text,
    Boolean,
}

impl ColumnAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnAttribute::Int => "INT",
            ColumnAttribute::Text => "TEXT",
            ColumnAttribute::Boolean => "BOOLEAN",
        }
    }
}

impl fmt::Display for ColumnAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnAttribute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INT" => Ok(ColumnAttribute::Int),
            "TEXT" => Ok(ColumnAttribute::Text),
            "BOOLEAN" => Ok(ColumnAttribute::Boolean),
            other => Err(format!("unknown column attribute: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i64),
    Text(String),
    Boolean(bool),
    Null,
}

impl Value {
    /// The attribute this value can occupy, or `None` for `Null` (which fits any column).
    pub fn data_type(&self) -> Option<ColumnAttribute> {
        match self {
            Value::Int(_) => Some(ColumnAttribute::Int),
            Value::Text(_) => Some(ColumnAttribute::Text),
            Value::Boolean(_) => Some(ColumnAttribute::Boolean),
            Value::Null => None,
        }
    }

    pub fn fits(&self, attribute: ColumnAttribute) -> bool {
        self.data_type().is_none_or(|t| t == attribute)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => f.write_str("NULL"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// Storage-assigned reference to one stored tuple. Carries no field data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub(crate) fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub(crate) fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(raw)))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Column name to value mapping. Also used as a `where` conjunction:
/// a row matches when every pair in the conjunction is equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: BTreeMap<Identifier, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn insert(&mut self, column: impl Into<Identifier>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(column.into(), value.into())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &Identifier> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &Value)> {
        self.values.iter()
    }

    pub fn matches(&self, conjunction: &Row) -> bool {
        conjunction
            .iter()
            .all(|(column, value)| self.get(column) == Some(value))
    }

    /// Narrows to `columns`; names absent from this row are skipped.
    pub fn project(&self, columns: &[Identifier]) -> Row {
        columns
            .iter()
            .filter_map(|c| self.values.get(c).map(|v| (c.clone(), v.clone())))
            .collect()
    }
}

impl FromIterator<(Identifier, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (Identifier, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<K: Into<Identifier>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Row {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect()
    }
}

impl IntoIterator for Row {
    type Item = (Identifier, Value);
    type IntoIter = std::collections::btree_map::IntoIter<Identifier, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
