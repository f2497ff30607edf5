//! Read-only table queries for external consumers.
//!
//! A [`Select`] names a whitelisted table, equality/comparison filters,
//! an optional order, and a result window; rows come back as JSON
//! objects keyed by column name. Identifiers are validated and values
//! always bound, so callers cannot smuggle SQL.
use anyhow::{bail, Result};
use rusqlite::types::ValueRef;
use rusqlite::ToSql;
use serde_json::{Map, Number, Value};

use crate::store::Ledger;

/// Tables exposed to queries.
const TABLES: &[&str] = &[
    "blocks",
    "transactions",
    "balances",
    "debits",
    "credits",
    "sends",
    "orders",
    "order_matches",
    "btcpays",
    "issuances",
    "broadcasts",
    "bets",
    "bet_matches",
    "dividends",
    "burns",
    "cancels",
    "callbacks",
    "order_expirations",
    "bet_expirations",
    "order_match_expirations",
    "bet_match_expirations",
    "messages",
];

/// Comparison operator of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE`
    Like,
}

impl Operator {
    fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
        }
    }
}

/// One `column <op> value` condition. Conditions are ANDed.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Column name.
    pub column: String,
    /// Comparison operator.
    pub op: Operator,
    /// Bound value (string, number, bool, or null).
    pub value: Value,
}

/// A whitelisted table read.
#[derive(Debug, Clone)]
pub struct Select {
    /// Table to read.
    pub table: String,
    /// Conditions, ANDed together.
    pub filters: Vec<Filter>,
    /// Column to order by, and whether ascending.
    pub order_by: Option<(String, bool)>,
    /// Maximum rows returned. 0 means unlimited.
    pub limit: u32,
    /// Rows skipped before the first returned.
    pub offset: u32,
}

impl Select {
    /// A full read of one table.
    pub fn from_table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order_by: None,
            limit: 0,
            offset: 0,
        }
    }

    /// Add an equality filter.
    pub fn filter(mut self, column: &str, op: Operator, value: Value) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value,
        });
        self
    }
}

fn valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

enum Bound {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl ToSql for Bound {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        match self {
            Bound::Null => rusqlite::types::Null.to_sql(),
            Bound::Int(i) => i.to_sql(),
            Bound::Real(f) => f.to_sql(),
            Bound::Text(s) => s.to_sql(),
        }
    }
}

fn bind(value: &Value) -> Result<Bound> {
    Ok(match value {
        Value::Null => Bound::Null,
        Value::Bool(b) => Bound::Int(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bound::Int(i)
            } else if let Some(f) = n.as_f64() {
                Bound::Real(f)
            } else {
                bail!("unrepresentable number in filter");
            }
        }
        Value::String(s) => Bound::Text(s.clone()),
        _ => bail!("arrays and objects cannot be filter values"),
    })
}

/// Run a select, returning rows as JSON objects.
pub fn run(ledger: &Ledger, select: &Select) -> Result<Vec<Value>> {
    if !TABLES.contains(&select.table.as_str()) {
        bail!("table {:?} is not queryable", select.table);
    }
    let mut sql = format!("SELECT * FROM {}", select.table);
    let mut bounds: Vec<Bound> = Vec::new();
    for (i, f) in select.filters.iter().enumerate() {
        if !valid_identifier(&f.column) {
            bail!("bad column name {:?}", f.column);
        }
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("{} {} ?{}", f.column, f.op.sql(), i + 1));
        bounds.push(bind(&f.value)?);
    }
    if let Some((column, ascending)) = &select.order_by {
        if !valid_identifier(column) {
            bail!("bad column name {:?}", column);
        }
        sql.push_str(&format!(
            " ORDER BY {column} {}",
            if *ascending { "ASC" } else { "DESC" }
        ));
    }
    if select.limit > 0 {
        sql.push_str(&format!(" LIMIT {}", select.limit));
    }
    if select.offset > 0 {
        if select.limit == 0 {
            sql.push_str(" LIMIT -1");
        }
        sql.push_str(&format!(" OFFSET {}", select.offset));
    }

    let mut stmt = ledger.conn().prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let params: Vec<&dyn ToSql> = bounds.iter().map(|b| b as &dyn ToSql).collect();
    let mut rows = stmt.query(params.as_slice())?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (i, name) in columns.iter().enumerate() {
            let value = match row.get_ref(i)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(n) => Value::Number(n.into()),
                ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
                ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => Value::String(hex::encode(b)),
            };
            object.insert(name.clone(), value);
        }
        out.push(Value::Object(object));
    }
    Ok(out)
}
