//! Ticket Query Language: a small pipeline grammar compiled to
//! parameterized SQL and run against the ticket cache.

pub mod ast;
pub mod compiler;
pub mod parser;

pub use ast::{Query, Source};
pub use compiler::{compile, Bind, Compiled};

use thiserror::Error;
use turso::Connection;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("database error: {0}")]
    Turso(#[from] turso::Error),
}

/// One result row: column name to decoded value, in select order.
pub type Row = Vec<(String, serde_json::Value)>;

pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Parse, compile, and run a TQL string against `conn`.
pub async fn run(conn: &Connection, tql: &str) -> Result<QueryResult, QueryError> {
    let query = parser::parse(tql)?;
    let compiled = compile(&query)?;
    execute(conn, &compiled).await
}

pub async fn execute(conn: &Connection, compiled: &Compiled) -> Result<QueryResult, QueryError> {
    let binds: Vec<turso::Value> = compiled.binds.iter().map(Bind::to_sql_value).collect();
    let mut rows = conn.query(&compiled.sql, binds).await?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        let mut decoded = Vec::with_capacity(compiled.columns.len());
        for (idx, name) in compiled.columns.iter().enumerate() {
            let value: turso::Value = row.get(idx)?;
            decoded.push((name.clone(), sql_value_to_json(value)));
        }
        out.push(decoded);
    }

    Ok(QueryResult {
        columns: compiled.columns.clone(),
        rows: out,
    })
}

fn sql_value_to_json(value: turso::Value) -> serde_json::Value {
    match value {
        turso::Value::Null => serde_json::Value::Null,
        turso::Value::Integer(i) => serde_json::Value::from(i),
        turso::Value::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        turso::Value::Text(s) => serde_json::Value::String(s),
        turso::Value::Blob(b) => {
            serde_json::Value::String(format!("<{} bytes>", b.len()))
        }
    }
}
