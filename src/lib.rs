//! Execution core of a small relational database: a self-describing
//! catalog over a pluggable storage contract, a plan engine for
//! selection and projection, and a SQL statement executor.

pub mod catalog;
pub mod error;
pub mod model;
pub mod parse;
pub mod plan;
pub mod result;
pub mod sql;
pub mod storage;
pub mod store;
mod undo;

pub use catalog::Catalog;
pub use error::{ExecError, RelationError};
pub use parse::{parse, Command};
pub use result::QueryResult;
pub use sql::SqlExec;
pub use store::Store;
