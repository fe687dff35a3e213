//! Compiles a TQL `Query` AST into a parameterized SQL string plus an
//! ordered, type-tagged bind list. Never interpolates a user-supplied
//! value into the SQL text — only field/column names (validated
//! against a fixed allow-list) and literal operators land in the
//! string; every value is a bind parameter.

use super::ast::{AggKind, Aggregate, Clause, FilterClause, FilterOp, Query, RawValue, Source};
use super::QueryError;
use crate::types::{TicketPriority, TicketStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Int(i64),
    Double(f64),
    Text(String),
}

impl Bind {
    pub fn to_sql_value(&self) -> turso::Value {
        match self {
            Bind::Int(i) => turso::Value::Integer(*i),
            Bind::Double(d) => turso::Value::Real(*d),
            Bind::Text(s) => turso::Value::Text(s.clone()),
        }
    }
}

pub struct Compiled {
    pub sql: String,
    pub binds: Vec<Bind>,
    /// Result column names in select order, for row decoding.
    pub columns: Vec<String>,
}

const TICKET_COLUMNS: &[&str] = &[
    "id", "type", "status", "name", "spec", "notes", "accept", "priority", "parent",
    "created_from", "supersedes", "supersedes_reason", "kill_reason", "kill_log", "author",
    "done_at", "branch", "created_at", "updated_at", "resolved_at", "compacted_at",
    "created_from_name", "supersedes_name",
];

const TOMBSTONE_COLUMNS: &[&str] = &["id", "done_at", "reason", "name", "is_accept", "timestamp"];

fn real_columns(source: Source) -> &'static [&'static str] {
    match source {
        Source::Tombstones => TOMBSTONE_COLUMNS,
        _ => TICKET_COLUMNS,
    }
}

struct Ctx {
    table: &'static str,
    columns: &'static [&'static str],
    meta_aliases: Vec<(String, String)>,
    /// SQL aliases emitted by aggregate select items (`count`,
    /// `sum_<col>`, …), so a later `sort`/`having` can reference them.
    agg_aliases: Vec<String>,
    binds: Vec<Bind>,
}

impl Ctx {
    fn meta_alias(&mut self, key: &str) -> String {
        if let Some((_, alias)) = self.meta_aliases.iter().find(|(k, _)| k == key) {
            return alias.clone();
        }
        let alias = format!("m{}", self.meta_aliases.len());
        self.meta_aliases.push((key.to_string(), alias.clone()));
        alias
    }

    fn push(&mut self, bind: Bind) -> String {
        self.binds.push(bind);
        format!("?{}", self.binds.len())
    }
}

pub fn compile(query: &Query) -> Result<Compiled, QueryError> {
    let mut ctx = Ctx {
        table: query.source.table(),
        columns: real_columns(query.source),
        meta_aliases: Vec::new(),
        agg_aliases: Vec::new(),
        binds: Vec::new(),
    };

    let mut where_clauses = Vec::new();
    let mut having_clauses = Vec::new();
    let mut order_by = Vec::new();
    let mut group_by = None;
    let mut limit = None;
    let mut offset = None;
    let mut distinct = false;
    let mut aggregates = Vec::new();
    let mut select_cols: Option<Vec<String>> = None;

    if let Some(type_filter) = query.source.ticket_type_filter() {
        let bind = ctx.push(Bind::Text(type_filter.to_string()));
        where_clauses.push(format!("{}.type = {bind}", ctx.table));
    }

    for clause in &query.clauses {
        match clause {
            Clause::Filter(f) => where_clauses.push(compile_filter(&mut ctx, f)?),
            Clause::Having(f) => having_clauses.push(compile_having(&mut ctx, f)?),
            Clause::Select(cols) => {
                for c in cols {
                    if let Some(key) = c.strip_prefix("meta.") {
                        ctx.meta_alias(key);
                    }
                    validate_field(&ctx, c)?;
                }
                select_cols = Some(cols.clone());
            }
            Clause::Sort { field, desc } => {
                if let Some(key) = field.strip_prefix("meta.") {
                    ctx.meta_alias(key);
                }
                validate_field(&ctx, field)?;
                order_by.push(format!(
                    "{} {}",
                    qualify(&ctx, field),
                    if *desc { "DESC" } else { "ASC" }
                ));
            }
            Clause::Limit(n) => limit = Some(*n),
            Clause::Offset(n) => offset = Some(*n),
            Clause::Distinct => distinct = true,
            Clause::Group(field) => {
                if let Some(key) = field.strip_prefix("meta.") {
                    ctx.meta_alias(key);
                }
                validate_field(&ctx, field)?;
                group_by = Some(field.clone());
            }
            Clause::Aggregate(agg) => {
                if let Some(col) = &agg.column
                    && let Some(key) = col.strip_prefix("meta.")
                {
                    ctx.meta_alias(key);
                }
                ctx.agg_aliases.push(aggregate_alias(agg));
                aggregates.push(agg.clone());
            }
        }
    }

    if !query.all && query.source.table() == "tickets" && !query.has_status_filter() {
        where_clauses.push(format!("{}.status < 2", ctx.table));
    }

    let select_list = build_select_list(&ctx, &aggregates, &group_by, &select_cols)?;

    let mut sql = format!(
        "SELECT {}{} FROM {}",
        if distinct { "DISTINCT " } else { "" },
        select_list.expr,
        ctx.table
    );

    for (key, alias) in &ctx.meta_aliases {
        let bind = ctx.push(Bind::Text(key.clone()));
        sql.push_str(&format!(
            " LEFT JOIN ticket_meta {alias} ON {alias}.ticket_id = {}.id AND {alias}.key = {bind}",
            ctx.table
        ));
    }

    if !where_clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clauses.join(" AND "));
    }

    if let Some(group) = &group_by {
        sql.push_str(&format!(" GROUP BY {}", qualify(&ctx, group)));
    }

    if !having_clauses.is_empty() {
        sql.push_str(" HAVING ");
        sql.push_str(&having_clauses.join(" AND "));
    }

    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    }

    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    if let Some(n) = offset {
        sql.push_str(&format!(" OFFSET {n}"));
    }

    Ok(Compiled {
        sql,
        binds: ctx.binds,
        columns: select_list.columns,
    })
}

struct SelectList {
    expr: String,
    columns: Vec<String>,
}

fn build_select_list(
    ctx: &Ctx,
    aggregates: &[super::ast::Aggregate],
    group_by: &Option<String>,
    select_cols: &Option<Vec<String>>,
) -> Result<SelectList, QueryError> {
    if !aggregates.is_empty() {
        let mut parts = Vec::new();
        let mut columns = Vec::new();

        if let Some(group) = group_by {
            parts.push(qualify(ctx, group));
            columns.push(group.clone());
        }

        for agg in aggregates {
            let alias = aggregate_alias(agg);
            let expr = match agg.kind {
                AggKind::Count => "COUNT(*)".to_string(),
                AggKind::Sum => {
                    let col = agg.column.as_deref().ok_or_else(|| {
                        QueryError::Syntax("sum requires a column".to_string())
                    })?;
                    validate_field(ctx, col)?;
                    format!("SUM({})", qualify(ctx, col))
                }
                AggKind::Avg => {
                    let col = agg.column.as_deref().ok_or_else(|| {
                        QueryError::Syntax("avg requires a column".to_string())
                    })?;
                    validate_field(ctx, col)?;
                    format!("AVG({})", qualify(ctx, col))
                }
                AggKind::Min => {
                    let col = agg.column.as_deref().ok_or_else(|| {
                        QueryError::Syntax("min requires a column".to_string())
                    })?;
                    validate_field(ctx, col)?;
                    format!("MIN({})", qualify(ctx, col))
                }
                AggKind::Max => {
                    let col = agg.column.as_deref().ok_or_else(|| {
                        QueryError::Syntax("max requires a column".to_string())
                    })?;
                    validate_field(ctx, col)?;
                    format!("MAX({})", qualify(ctx, col))
                }
                AggKind::CountDistinct => {
                    let col = agg.column.as_deref().ok_or_else(|| {
                        QueryError::Syntax("count_distinct requires a column".to_string())
                    })?;
                    validate_field(ctx, col)?;
                    format!("COUNT(DISTINCT {})", qualify(ctx, col))
                }
            };
            parts.push(format!("{expr} AS {}", quote_ident(&alias)));
            columns.push(alias);
        }

        return Ok(SelectList {
            expr: parts.join(", "),
            columns,
        });
    }

    if let Some(cols) = select_cols {
        let expr = cols
            .iter()
            .map(|c| qualify(ctx, c))
            .collect::<Vec<_>>()
            .join(", ");
        return Ok(SelectList {
            expr,
            columns: cols.clone(),
        });
    }

    let expr = ctx
        .columns
        .iter()
        .map(|c| format!("{}.{c}", ctx.table))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(SelectList {
        expr,
        columns: ctx.columns.iter().map(|c| c.to_string()).collect(),
    })
}

/// SQL alias a `Clause::Aggregate` compiles to in the select list —
/// computed up front (before `build_select_list` runs) so a later
/// `sort`/`having` clause referencing it validates and qualifies
/// correctly.
fn aggregate_alias(agg: &Aggregate) -> String {
    let col = agg.column.as_deref().unwrap_or("");
    match agg.kind {
        AggKind::Count => "count".to_string(),
        AggKind::Sum => format!("sum_{col}"),
        AggKind::Avg => format!("avg_{col}"),
        AggKind::Min => format!("min_{col}"),
        AggKind::Max => format!("max_{col}"),
        AggKind::CountDistinct => format!("count_distinct_{col}"),
    }
}

/// Aggregate aliases derived from a `meta.<key>` column contain a
/// literal dot (`sum_meta.cost`) and need quoting to be a valid SQL
/// identifier; plain aliases (`count`, `sum_cost`) don't.
fn quote_ident(ident: &str) -> String {
    if ident.contains('.') {
        format!("\"{ident}\"")
    } else {
        ident.to_string()
    }
}

fn qualify(ctx: &Ctx, field: &str) -> String {
    if ctx.agg_aliases.iter().any(|a| a == field) {
        return quote_ident(field);
    }
    if let Some(key) = field.strip_prefix("meta.") {
        if let Some((_, alias)) = ctx.meta_aliases.iter().find(|(k, _)| k == key) {
            return format!("COALESCE({alias}.value_num, {alias}.value_text)");
        }
    }
    format!("{}.{field}", ctx.table)
}

fn validate_field(ctx: &Ctx, field: &str) -> Result<(), QueryError> {
    if field == "label" {
        return Ok(());
    }
    if field.starts_with("meta.") {
        return Ok(());
    }
    if ctx.columns.contains(&field) {
        return Ok(());
    }
    if ctx.agg_aliases.iter().any(|a| a == field) {
        return Ok(());
    }
    Err(QueryError::UnknownField(field.to_string()))
}

fn is_enum_field(field: &str) -> bool {
    field == "status" || field == "priority"
}

fn translate_enum(field: &str, raw: &str) -> Option<i64> {
    if field == "status" {
        raw.parse::<TicketStatus>().ok().map(|s| s.as_code())
    } else if field == "priority" {
        raw.parse::<TicketPriority>().ok().map(|p| p.as_code())
    } else {
        None
    }
}

fn value_bind(field: &str, raw: &str) -> Bind {
    if is_enum_field(field)
        && let Some(code) = translate_enum(field, raw)
    {
        return Bind::Int(code);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Bind::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Bind::Double(f);
    }
    Bind::Text(raw.to_string())
}

fn op_symbol(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => "=",
        FilterOp::NotEq => "!=",
        FilterOp::Gt => ">",
        FilterOp::Lt => "<",
        FilterOp::Gte => ">=",
        FilterOp::Lte => "<=",
    }
}

fn compile_filter(ctx: &mut Ctx, f: &FilterClause) -> Result<String, QueryError> {
    validate_field(ctx, &f.field)?;

    let fragment = if f.field == "label" {
        compile_label_filter(ctx, f)?
    } else if let Some(key) = f.field.strip_prefix("meta.") {
        compile_meta_filter(ctx, key, f)?
    } else {
        compile_scalar_filter(ctx, &f.field, f)?
    };

    if f.negated {
        Ok(format!("NOT ({fragment})"))
    } else {
        Ok(fragment)
    }
}

fn compile_scalar_filter(ctx: &mut Ctx, field: &str, f: &FilterClause) -> Result<String, QueryError> {
    let col = format!("{}.{field}", ctx.table);
    match &f.value {
        RawValue::Empty => Ok(match f.op {
            FilterOp::Eq => format!("{col} IS NULL"),
            FilterOp::NotEq => format!("{col} IS NOT NULL"),
            _ => return Err(QueryError::Syntax(format!("operator requires a value for '{field}'"))),
        }),
        RawValue::List(values) if values.len() > 1 => {
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| ctx.push(value_bind(field, v)))
                .collect();
            let keyword = match f.op {
                FilterOp::Eq => "IN",
                FilterOp::NotEq => "NOT IN",
                _ => return Err(QueryError::Syntax("list values only support =/!=".to_string())),
            };
            Ok(format!("{col} {keyword} ({})", placeholders.join(", ")))
        }
        RawValue::List(values) => {
            let bind = ctx.push(value_bind(field, &values[0]));
            Ok(format!("{col} {} {bind}", op_symbol(f.op)))
        }
    }
}

fn compile_meta_filter(ctx: &mut Ctx, key: &str, f: &FilterClause) -> Result<String, QueryError> {
    let alias = ctx.meta_alias(key);
    match &f.value {
        RawValue::Empty => Ok(match f.op {
            FilterOp::Eq => format!("{alias}.ticket_id IS NULL"),
            FilterOp::NotEq => format!("{alias}.ticket_id IS NOT NULL"),
            _ => {
                return Err(QueryError::Syntax(format!(
                    "operator requires a value for 'meta.{key}'"
                )))
            }
        }),
        RawValue::List(values) => {
            let numeric = values.iter().all(|v| v.parse::<f64>().is_ok());
            let col = if numeric { "value_num" } else { "value_text" };
            if values.len() > 1 {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        ctx.push(if numeric {
                            Bind::Double(v.parse::<f64>().unwrap())
                        } else {
                            Bind::Text(v.clone())
                        })
                    })
                    .collect();
                let keyword = match f.op {
                    FilterOp::Eq => "IN",
                    FilterOp::NotEq => "NOT IN",
                    _ => return Err(QueryError::Syntax("list values only support =/!=".to_string())),
                };
                Ok(format!("{alias}.{col} {keyword} ({})", placeholders.join(", ")))
            } else {
                let bind = ctx.push(if numeric {
                    Bind::Double(values[0].parse::<f64>().unwrap())
                } else {
                    Bind::Text(values[0].clone())
                });
                Ok(format!("{alias}.{col} {} {bind}", op_symbol(f.op)))
            }
        }
    }
}

fn compile_label_filter(ctx: &mut Ctx, f: &FilterClause) -> Result<String, QueryError> {
    let values = match &f.value {
        RawValue::List(v) => v.clone(),
        RawValue::Empty => {
            return Err(QueryError::Syntax("label filter requires a value".to_string()))
        }
    };
    let placeholders: Vec<String> = values
        .iter()
        .map(|v| ctx.push(Bind::Text(v.clone())))
        .collect();
    let keyword = if placeholders.len() > 1 { "IN" } else { "=" };
    let rhs = if placeholders.len() > 1 {
        format!("({})", placeholders.join(", "))
    } else {
        placeholders[0].clone()
    };
    let predicate = format!(
        "EXISTS (SELECT 1 FROM ticket_labels tl WHERE tl.ticket_id = {}.id AND tl.label {keyword} {rhs})",
        ctx.table
    );
    Ok(match f.op {
        FilterOp::NotEq => format!("NOT ({predicate})"),
        _ => predicate,
    })
}

/// `having` compiles against the aggregate's SQL alias, not a raw
/// column — the alias naming matches what `build_select_list` emits
/// (`count`, `sum_<col>`, …).
fn compile_having(ctx: &mut Ctx, f: &FilterClause) -> Result<String, QueryError> {
    let alias = &f.field;
    match &f.value {
        RawValue::List(values) if values.len() == 1 => {
            let bind = ctx.push(value_bind(alias, &values[0]));
            Ok(format!("{alias} {} {bind}", op_symbol(f.op)))
        }
        _ => Err(QueryError::Syntax(
            "having supports exactly one comparison value".to_string(),
        )),
    }
}
