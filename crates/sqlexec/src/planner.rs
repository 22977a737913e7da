//! Evaluation of data statements against the key-value layer.
//!
//! Every table is a keyspace `/<table>/<k>` holding rows with two columns, a
//! primary key `k` (string or int) and a value `v` (any datum). Rows are
//! stored as JSON.
use bytes::Bytes;
use kvclient::Txn;
use parser::Statement;
use parser::ast::{
    BinaryOperator,
    Delete,
    Expr,
    Ident,
    Insert,
    Literal,
    SelectExpr,
    SelectNode,
    UnaryOperator,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::client_comm::CommandResult;
use crate::errors::{ExecError, Result, internal};
use crate::placeholders::PlaceholderInfo;
use crate::types::{DataType, Datum, Datums, ResultColumn};

const KEY_COLUMN: &str = "k";
const VALUE_COLUMN: &str = "v";

/// Name used for projections without an alias that aren't a plain column.
const UNNAMED_COLUMN: &str = "?column?";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TableRow {
    k: Datum,
    v: Datum,
}

fn table_prefix(table: &str) -> String {
    format!("/{table}/")
}

/// End of the table's keyspace. '0' sorts directly after '/'.
fn table_end(table: &str) -> String {
    format!("/{table}0")
}

/// Key of a row. Keys are tagged with their type so that `1` and `'1'` don't
/// collide.
fn row_key(table: &str, k: &Datum) -> Result<String> {
    match k {
        Datum::Int(i) => Ok(format!("/{table}/i/{i}")),
        Datum::String(s) => Ok(format!("/{table}/s/{s}")),
        other => Err(ExecError::QueryExecution(format!(
            "primary key column \"{KEY_COLUMN}\" must be a string or int, got {}",
            other.data_type()
        ))),
    }
}

fn query_err(msg: impl Into<String>) -> ExecError {
    ExecError::QueryExecution(msg.into())
}

/// Executes SELECT, INSERT and DELETE statements within a transaction.
#[derive(Debug)]
pub struct Planner<'a> {
    txn: &'a Txn,
    placeholders: &'a PlaceholderInfo,
    read_only: bool,
}

impl<'a> Planner<'a> {
    pub fn new(txn: &'a Txn, placeholders: &'a PlaceholderInfo, read_only: bool) -> Self {
        Planner {
            txn,
            placeholders,
            read_only,
        }
    }

    /// Execute `stmt`, writing its output to `res`.
    ///
    /// A non-zero `limit` caps the number of rows a query may return.
    pub async fn execute(
        &self,
        stmt: &Statement,
        res: &mut dyn CommandResult,
        limit: usize,
    ) -> Result<()> {
        match stmt {
            Statement::Select(select) => self.select(select, res, limit).await,
            Statement::Insert(insert) => {
                self.check_writable("INSERT")?;
                let n = self.insert(insert).await?;
                res.set_rows_affected(n).await
            }
            Statement::Delete(delete) => {
                self.check_writable("DELETE")?;
                let n = self.delete(delete).await?;
                res.set_rows_affected(n).await
            }
            other => Err(internal!("planner cannot execute {}", other.tag())),
        }
    }

    fn check_writable(&self, op: &str) -> Result<()> {
        if self.read_only {
            return Err(query_err(format!(
                "cannot execute {op} in a read-only transaction"
            )));
        }
        Ok(())
    }

    async fn scan_table(&self, table: &Ident) -> Result<Vec<(Bytes, TableRow)>> {
        let kvs = self
            .txn
            .scan(table_prefix(&table.value), table_end(&table.value))
            .await?;
        trace!(table = %table.value, rows = kvs.len(), "scanned table");

        kvs.into_iter()
            .map(|kv| {
                let row: TableRow = serde_json::from_slice(&kv.value)
                    .map_err(|e| internal!("failed to decode row at {:?}: {e}", kv.key))?;
                Ok((kv.key, row))
            })
            .collect()
    }

    async fn select(
        &self,
        select: &SelectNode,
        res: &mut dyn CommandResult,
        limit: usize,
    ) -> Result<()> {
        let rows: Vec<Option<TableRow>> = match &select.from {
            Some(table) => self
                .scan_table(table)
                .await?
                .into_iter()
                .map(|(_, row)| Some(row))
                .collect(),
            None => vec![None],
        };

        let mut names = Vec::with_capacity(select.projections.len());
        let mut exprs = Vec::with_capacity(select.projections.len());
        for proj in &select.projections {
            match proj {
                SelectExpr::Wildcard => {
                    if select.from.is_none() {
                        return Err(query_err("SELECT * with no tables specified is not valid"));
                    }
                    for col in [KEY_COLUMN, VALUE_COLUMN] {
                        names.push(col.to_string());
                        exprs.push(Expr::Ident(Ident::from_string(col)));
                    }
                }
                SelectExpr::Expr(expr) => {
                    let name = match expr {
                        Expr::Ident(ident) => ident.value.clone(),
                        _ => UNNAMED_COLUMN.to_string(),
                    };
                    names.push(name);
                    exprs.push(expr.clone());
                }
                SelectExpr::AliasedExpr(expr, alias) => {
                    names.push(alias.value.clone());
                    exprs.push(expr.clone());
                }
            }
        }

        let mut output: Vec<Datums> = Vec::new();
        for row in &rows {
            let row = row.as_ref();
            if let Some(pred) = &select.where_expr {
                if !self.eval_predicate(pred, row)? {
                    continue;
                }
            }
            let values = exprs
                .iter()
                .map(|expr| self.eval(expr, row))
                .collect::<Result<Datums>>()?;
            output.push(values);

            if limit > 0 && output.len() > limit {
                return Err(query_err(format!(
                    "query returned more than the portal row limit of {limit}"
                )));
            }
        }

        // Types are taken from the first non-null value of each column.
        let cols = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let typ = output
                    .iter()
                    .map(|row| row[idx].data_type())
                    .find(|typ| *typ != DataType::Unknown)
                    .unwrap_or(DataType::Unknown);
                ResultColumn::new(name, typ)
            })
            .collect();

        res.set_columns(cols).await?;
        for row in output {
            res.add_row(row).await?;
        }
        Ok(())
    }

    async fn insert(&self, insert: &Insert) -> Result<usize> {
        let columns: Vec<&str> = if insert.columns.is_empty() {
            vec![KEY_COLUMN, VALUE_COLUMN]
        } else {
            insert.columns.iter().map(|c| c.value.as_str()).collect()
        };

        for (idx, col) in columns.iter().enumerate() {
            if *col != KEY_COLUMN && *col != VALUE_COLUMN {
                return Err(query_err(format!(
                    "column \"{col}\" of relation \"{}\" does not exist",
                    insert.table.value
                )));
            }
            if columns[..idx].contains(col) {
                return Err(query_err(format!("column \"{col}\" specified more than once")));
            }
        }
        if !columns.contains(&KEY_COLUMN) {
            return Err(query_err(format!(
                "missing value for primary key column \"{KEY_COLUMN}\""
            )));
        }

        for exprs in &insert.rows {
            if exprs.len() != columns.len() {
                return Err(query_err(format!(
                    "INSERT has {} expressions but {} target columns",
                    exprs.len(),
                    columns.len()
                )));
            }

            let mut row = TableRow {
                k: Datum::Null,
                v: Datum::Null,
            };
            for (col, expr) in columns.iter().zip(exprs) {
                let value = self.eval(expr, None)?;
                if *col == KEY_COLUMN {
                    row.k = value;
                } else {
                    row.v = value;
                }
            }

            let key = row_key(&insert.table.value, &row.k)?;
            // Writes earlier in the statement are visible here.
            if self.txn.get(key.clone()).await?.is_some() {
                return Err(query_err(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    insert.table.value
                )));
            }
            let value =
                serde_json::to_vec(&row).map_err(|e| internal!("failed to encode row: {e}"))?;
            self.txn.put(key, value).await?;
        }

        Ok(insert.rows.len())
    }

    async fn delete(&self, delete: &Delete) -> Result<usize> {
        let rows = self.scan_table(&delete.table).await?;
        let mut n = 0;
        for (key, row) in rows {
            if let Some(pred) = &delete.where_expr {
                if !self.eval_predicate(pred, Some(&row))? {
                    continue;
                }
            }
            self.txn.del(key).await?;
            n += 1;
        }
        Ok(n)
    }

    /// Evaluate a filter. Nulls filter out the row.
    fn eval_predicate(&self, expr: &Expr, row: Option<&TableRow>) -> Result<bool> {
        match self.eval(expr, row)? {
            Datum::Bool(b) => Ok(b),
            Datum::Null => Ok(false),
            other => Err(query_err(format!(
                "argument of WHERE must be type bool, not type {}",
                other.data_type()
            ))),
        }
    }

    fn eval(&self, expr: &Expr, row: Option<&TableRow>) -> Result<Datum> {
        match expr {
            Expr::Ident(ident) => match (row, ident.value.as_str()) {
                (Some(row), KEY_COLUMN) => Ok(row.k.clone()),
                (Some(row), VALUE_COLUMN) => Ok(row.v.clone()),
                _ => Err(query_err(format!(
                    "column \"{}\" does not exist",
                    ident.value
                ))),
            },
            Expr::Literal(lit) => eval_literal(lit),
            Expr::Placeholder(idx) => self.placeholders.get(*idx).cloned(),
            Expr::Nested(expr) => self.eval(expr, row),
            Expr::UnaryExpr { op, expr } => eval_unary(*op, self.eval(expr, row)?),
            Expr::BinaryExpr { left, op, right } => {
                let left = self.eval(left, row)?;
                let right = self.eval(right, row)?;
                eval_binary(left, *op, right)
            }
        }
    }
}

fn eval_literal(lit: &Literal) -> Result<Datum> {
    Ok(match lit {
        Literal::Number(n) => Datum::Int(
            n.parse::<i64>()
                .map_err(|_| query_err(format!("could not parse \"{n}\" as type int")))?,
        ),
        Literal::SingleQuotedString(s) => Datum::String(s.clone()),
        Literal::Boolean(b) => Datum::Bool(*b),
        Literal::Null => Datum::Null,
    })
}

fn eval_unary(op: UnaryOperator, val: Datum) -> Result<Datum> {
    match (op, val) {
        (_, Datum::Null) => Ok(Datum::Null),
        (UnaryOperator::Plus, Datum::Int(v)) => Ok(Datum::Int(v)),
        (UnaryOperator::Minus, Datum::Int(v)) => v
            .checked_neg()
            .map(Datum::Int)
            .ok_or_else(|| query_err("integer out of range")),
        (UnaryOperator::Not, Datum::Bool(v)) => Ok(Datum::Bool(!v)),
        (op, val) => Err(query_err(format!(
            "unsupported unary operator: {op}{}",
            val.data_type()
        ))),
    }
}

fn eval_binary(left: Datum, op: BinaryOperator, right: Datum) -> Result<Datum> {
    use BinaryOperator::*;

    match op {
        And | Or => eval_logical(left, op, right),
        Plus | Minus | Multiply | Divide => {
            let (a, b) = match (&left, &right) {
                (Datum::Null, _) | (_, Datum::Null) => return Ok(Datum::Null),
                (Datum::Int(a), Datum::Int(b)) => (*a, *b),
                _ => return Err(unsupported_binary(&left, op, &right)),
            };
            let out = match op {
                Plus => a.checked_add(b),
                Minus => a.checked_sub(b),
                Multiply => a.checked_mul(b),
                _ => {
                    if b == 0 {
                        return Err(query_err("division by zero"));
                    }
                    a.checked_div(b)
                }
            };
            out.map(Datum::Int)
                .ok_or_else(|| query_err("integer out of range"))
        }
        Gt | Lt | GtEq | LtEq | Eq | NotEq => {
            if left.is_null() || right.is_null() {
                return Ok(Datum::Null);
            }
            let ord = left.compare(&right).ok_or_else(|| {
                query_err(format!(
                    "unsupported comparison operator: {} {op} {}",
                    left.data_type(),
                    right.data_type()
                ))
            })?;
            let b = match op {
                Gt => ord.is_gt(),
                Lt => ord.is_lt(),
                GtEq => ord.is_ge(),
                LtEq => ord.is_le(),
                Eq => ord.is_eq(),
                _ => ord.is_ne(),
            };
            Ok(Datum::Bool(b))
        }
    }
}

/// Three-valued AND/OR.
fn eval_logical(left: Datum, op: BinaryOperator, right: Datum) -> Result<Datum> {
    let as_bool = |d: &Datum| match d {
        Datum::Bool(b) => Ok(Some(*b)),
        Datum::Null => Ok(None),
        _ => Err(unsupported_binary(&left, op, &right)),
    };
    let (a, b) = (as_bool(&left)?, as_bool(&right)?);

    let out = match op {
        BinaryOperator::And => match (a, b) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        _ => match (a, b) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    };
    Ok(out.map(Datum::Bool).unwrap_or(Datum::Null))
}

fn unsupported_binary(left: &Datum, op: BinaryOperator, right: &Datum) -> ExecError {
    query_err(format!(
        "unsupported binary operator: {} {op} {}",
        left.data_type(),
        right.data_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_const(sql: &str) -> Result<Datum> {
        let stmt = parser::parse_one(&format!("SELECT {sql}")).unwrap();
        let expr = match stmt.ast {
            Statement::Select(select) => match &select.projections[0] {
                SelectExpr::Expr(expr) => expr.clone(),
                other => panic!("unexpected projection: {other:?}"),
            },
            other => panic!("unexpected statement: {other:?}"),
        };

        let db = kvclient::DB::new_local(Default::default());
        let txn = db.new_txn(Default::default());
        let placeholders = PlaceholderInfo::new(vec![Datum::Int(5)]);
        Planner::new(&txn, &placeholders, false).eval(&expr, None)
    }

    #[test]
    fn arithmetic() {
        assert_eq!(Datum::Int(7), eval_const("1 + 2 * 3").unwrap());
        assert_eq!(Datum::Int(-4), eval_const("-(6 - 2)").unwrap());
        assert_eq!(Datum::Null, eval_const("1 + NULL").unwrap());
        assert_eq!(Datum::Int(10), eval_const("$1 * 2").unwrap());
        eval_const("$2").unwrap_err();
        assert_eq!(
            "column \"a\" does not exist",
            eval_const("a").unwrap_err().to_string()
        );
        assert_eq!(
            "division by zero",
            eval_const("1 / 0").unwrap_err().to_string()
        );
        assert_eq!(
            "integer out of range",
            eval_const("9223372036854775807 + 1").unwrap_err().to_string()
        );
    }

    #[test]
    fn logic_and_comparisons() {
        assert_eq!(Datum::Bool(true), eval_const("1 < 2 AND 'a' = 'a'").unwrap());
        assert_eq!(Datum::Bool(false), eval_const("NULL AND FALSE").unwrap());
        assert_eq!(Datum::Null, eval_const("NULL OR FALSE").unwrap());
        assert_eq!(Datum::Bool(true), eval_const("NULL OR TRUE").unwrap());
        assert_eq!(Datum::Null, eval_const("1 = NULL").unwrap());
        eval_const("1 = 'a'").unwrap_err();
        eval_const("1 AND TRUE").unwrap_err();
    }

    #[test]
    fn keys() {
        assert_eq!("/t/i/1", row_key("t", &Datum::Int(1)).unwrap());
        assert_eq!("/t/s/a", row_key("t", &Datum::from("a")).unwrap());
        assert_ne!(
            row_key("t", &Datum::Int(1)).unwrap(),
            row_key("t", &Datum::from("1")).unwrap()
        );
        row_key("t", &Datum::Null).unwrap_err();
        assert!(table_prefix("t").as_str() < table_end("t").as_str());
        assert!(table_end("t").as_str() < table_prefix("t2").as_str());
    }
}
