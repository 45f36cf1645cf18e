//! Evaluation plans for SELECT and DELETE.
//!
//! A plan is a tree of three node kinds built bottom-up:
//!
//! ```text
//! Project [a, b]
//!   Select a = 1 AND b = "x"
//!     TableScan t
//! ```
//!
//! Plans run under two protocols: [`EvalPlan::pipeline`] yields handles of
//! matching rows without materializing them, [`EvalPlan::evaluate`] yields
//! the projected rows themselves.

use crate::error::{ExecError, RelationError};
use crate::model::{ColumnNames, Handles, Identifier, Row, Value};
use crate::parse::{column_name, literal};
use crate::storage::DbRelation;
use sqlparser::ast::{BinaryOperator, Expr};
use std::fmt;

/// A flattened conjunction of `column = literal` conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conjunction: Row,
    /// Set when one column was required to equal two different literals.
    contradictory: bool,
}

impl Predicate {
    pub fn from_expr(expr: &Expr) -> Result<Self, ExecError> {
        let mut predicate = Predicate::default();
        predicate.collect(expr)?;
        Ok(predicate)
    }

    fn collect(&mut self, expr: &Expr) -> Result<(), ExecError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.collect(left)?;
                self.collect(right)
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                let (column, value) = match (column_name(left), column_name(right)) {
                    (Some(column), None) => (column, literal(right)),
                    (None, Some(column)) => (column, literal(left)),
                    _ => (String::new(), None),
                };
                let value = value.ok_or_else(|| ExecError::MalformedPredicate(expr.to_string()))?;
                self.require(column, value);
                Ok(())
            }
            _ => Err(ExecError::MalformedPredicate(expr.to_string())),
        }
    }

    fn require(&mut self, column: Identifier, value: Value) {
        match self.conjunction.get(&column) {
            Some(existing) if *existing != value => self.contradictory = true,
            Some(_) => {}
            None => {
                self.conjunction.insert(column, value);
            }
        }
    }

    /// Conjunction of both predicates.
    pub fn and(mut self, other: Predicate) -> Predicate {
        self.contradictory |= other.contradictory;
        for (column, value) in other.conjunction {
            self.require(column, value);
        }
        self
    }

    pub fn conjunction(&self) -> &Row {
        &self.conjunction
    }

    pub fn columns(&self) -> ColumnNames {
        self.conjunction.columns().cloned().collect()
    }

    pub fn is_contradictory(&self) -> bool {
        self.contradictory
    }

    pub fn matches(&self, row: &Row) -> bool {
        !self.contradictory && row.matches(&self.conjunction)
    }
}

impl From<Row> for Predicate {
    fn from(conjunction: Row) -> Self {
        Self {
            conjunction,
            contradictory: false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contradictory {
            return f.write_str("FALSE");
        }
        let terms: Vec<String> = self
            .conjunction
            .iter()
            .map(|(column, value)| format!("{column} = {value}"))
            .collect();
        f.write_str(&terms.join(" AND "))
    }
}

pub enum EvalPlan<R> {
    TableScan(R),
    Select {
        predicate: Predicate,
        child: Box<EvalPlan<R>>,
    },
    Project {
        column_names: ColumnNames,
        child: Box<EvalPlan<R>>,
    },
}

impl<R: DbRelation> EvalPlan<R> {
    pub fn scan(relation: R) -> Self {
        EvalPlan::TableScan(relation)
    }

    pub fn select(self, predicate: Predicate) -> Self {
        EvalPlan::Select {
            predicate,
            child: Box::new(self),
        }
    }

    /// Wraps the plan in a projection. A `*` expands, here and now, to every
    /// column of the scanned relation in schema order.
    pub fn project(self, column_names: ColumnNames) -> Self {
        let mut expanded = Vec::with_capacity(column_names.len());
        for name in column_names {
            if name == "*" {
                expanded.extend(self.relation().column_names().iter().cloned());
            } else {
                expanded.push(name);
            }
        }
        EvalPlan::Project {
            column_names: expanded,
            child: Box::new(self),
        }
    }

    /// The relation scanned at the leaf of this plan.
    pub fn relation(&self) -> &R {
        match self {
            EvalPlan::TableScan(relation) => relation,
            EvalPlan::Select { child, .. } | EvalPlan::Project { child, .. } => child.relation(),
        }
    }

    /// Column names of the rows this plan yields.
    pub fn output_columns(&self) -> ColumnNames {
        match self {
            EvalPlan::TableScan(relation) => relation.column_names().to_vec(),
            EvalPlan::Select { child, .. } => child.output_columns(),
            EvalPlan::Project { column_names, .. } => column_names.clone(),
        }
    }

    /// Merges stacked selections and moves selections below projections
    /// when every predicate column survives the projection.
    pub fn optimize(self) -> Self {
        match self {
            EvalPlan::TableScan(relation) => EvalPlan::TableScan(relation),
            EvalPlan::Project {
                column_names,
                child,
            } => EvalPlan::Project {
                column_names,
                child: Box::new(child.optimize()),
            },
            EvalPlan::Select { predicate, child } => match child.optimize() {
                EvalPlan::Select {
                    predicate: inner,
                    child: grandchild,
                } => EvalPlan::Select {
                    predicate: inner.and(predicate),
                    child: grandchild,
                },
                EvalPlan::Project {
                    column_names,
                    child: grandchild,
                } if predicate.columns().iter().all(|c| column_names.contains(c)) => {
                    EvalPlan::Project {
                        column_names,
                        child: Box::new(grandchild.select(predicate).optimize()),
                    }
                }
                optimized => optimized.select(predicate),
            },
        }
    }

    /// Handles of the rows this plan yields, plus the projected column
    /// names when the plan narrows its rows.
    pub fn pipeline(&self) -> Result<(Option<ColumnNames>, Handles), RelationError> {
        match self {
            EvalPlan::TableScan(relation) => Ok((None, relation.select(None)?)),
            EvalPlan::Select { predicate, child } => {
                if let EvalPlan::TableScan(relation) = child.as_ref() {
                    if predicate.is_contradictory() {
                        return Ok((None, Vec::new()));
                    }
                    return Ok((None, relation.select(Some(predicate.conjunction()))?));
                }
                let (names, handles) = child.pipeline()?;
                let columns = predicate.columns();
                let hidden = names
                    .as_ref()
                    .is_some_and(|visible| columns.iter().any(|c| !visible.contains(c)));
                if hidden || predicate.is_contradictory() {
                    return Ok((names, Vec::new()));
                }
                let relation = child.relation();
                let mut kept = Vec::with_capacity(handles.len());
                for handle in handles {
                    if predicate.matches(&relation.project(handle, Some(columns.as_slice()))?) {
                        kept.push(handle);
                    }
                }
                Ok((names, kept))
            }
            EvalPlan::Project {
                column_names,
                child,
            } => {
                let (narrowed, handles) = child.pipeline()?;
                Ok((Some(visible(column_names, narrowed.as_deref())), handles))
            }
        }
    }

    /// Materializes the rows this plan yields, node by node. A `Select`
    /// filters its child's rows, except directly over a scan where the
    /// whole conjunction goes to the relation. A `Project` projects the
    /// handles its child pipelines, so rows are read once.
    pub fn evaluate(&self) -> Result<Vec<Row>, RelationError> {
        match self {
            EvalPlan::TableScan(relation) => relation
                .select(None)?
                .into_iter()
                .map(|handle| relation.project(handle, None))
                .collect(),
            EvalPlan::Select { child, .. } if matches!(child.as_ref(), EvalPlan::TableScan(_)) => {
                let (_, handles) = self.pipeline()?;
                let relation = self.relation();
                handles
                    .into_iter()
                    .map(|handle| relation.project(handle, None))
                    .collect()
            }
            EvalPlan::Select { predicate, child } => {
                let mut rows = child.evaluate()?;
                rows.retain(|row| predicate.matches(row));
                Ok(rows)
            }
            EvalPlan::Project {
                column_names,
                child,
            } => {
                let (narrowed, handles) = child.pipeline()?;
                let columns = visible(column_names, narrowed.as_deref());
                let relation = self.relation();
                handles
                    .into_iter()
                    .map(|handle| relation.project(handle, Some(columns.as_slice())))
                    .collect()
            }
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            EvalPlan::TableScan(relation) => writeln!(f, "{pad}TableScan {}", relation.name()),
            EvalPlan::Select { predicate, child } => {
                writeln!(f, "{pad}Select {predicate}")?;
                child.fmt_indented(f, depth + 1)
            }
            EvalPlan::Project {
                column_names,
                child,
            } => {
                writeln!(f, "{pad}Project [{}]", column_names.join(", "))?;
                child.fmt_indented(f, depth + 1)
            }
        }
    }
}

/// The requested columns that survive an inner projection, if any.
fn visible(requested: &[Identifier], narrowed: Option<&[Identifier]>) -> ColumnNames {
    match narrowed {
        Some(inner) => requested
            .iter()
            .filter(|c| inner.contains(*c))
            .cloned()
            .collect(),
        None => requested.to_vec(),
    }
}

impl<R: DbRelation> fmt::Display for EvalPlan<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}
