//! TQL parser: `SOURCE [all] [ | CLAUSE ]*` into a `Query` AST.
//! Leniently tokenized — this is a small pipeline grammar, not a full
//! expression language, so each clause is matched against a fixed set
//! of keyword prefixes before falling back to filter-clause parsing.

use super::ast::{
    Aggregate, AggKind, Clause, FilterClause, FilterOp, Query, RawValue, Source,
};
use super::QueryError;

pub fn parse(input: &str) -> Result<Query, QueryError> {
    let mut segments = input.split('|').map(str::trim);

    let head = segments
        .next()
        .ok_or_else(|| QueryError::Syntax("empty query".to_string()))?;
    let mut head_parts = head.split_whitespace();
    let source_tok = head_parts
        .next()
        .ok_or_else(|| QueryError::Syntax("missing source".to_string()))?;
    let source = Source::parse(source_tok)
        .ok_or_else(|| QueryError::UnknownSource(source_tok.to_string()))?;

    let mut all = false;
    for tok in head_parts {
        if tok == "all" {
            all = true;
        } else {
            return Err(QueryError::Syntax(format!("unexpected token '{tok}' after source")));
        }
    }

    let mut clauses = Vec::new();
    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        clauses.push(parse_clause(segment)?);
    }

    Ok(Query { source, all, clauses })
}

fn parse_clause(s: &str) -> Result<Clause, QueryError> {
    if s == "distinct" {
        return Ok(Clause::Distinct);
    }
    if s == "count" {
        return Ok(Clause::Aggregate(Aggregate {
            kind: AggKind::Count,
            column: None,
        }));
    }
    if let Some(rest) = s.strip_prefix("select ") {
        let cols = rest.split(',').map(|c| c.trim().to_string()).collect();
        return Ok(Clause::Select(cols));
    }
    if let Some(rest) = s.strip_prefix("sort ") {
        let mut parts = rest.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| QueryError::Syntax("sort requires a field".to_string()))?
            .to_string();
        let desc = matches!(parts.next(), Some("desc"));
        return Ok(Clause::Sort { field, desc });
    }
    if let Some(rest) = s.strip_prefix("limit ") {
        let n = parse_i64(rest.trim())?;
        return Ok(Clause::Limit(n));
    }
    if let Some(rest) = s.strip_prefix("offset ") {
        let n = parse_i64(rest.trim())?;
        return Ok(Clause::Offset(n));
    }
    if let Some(rest) = s.strip_prefix("group ") {
        return Ok(Clause::Group(rest.trim().to_string()));
    }
    if let Some(rest) = s.strip_prefix("having ") {
        return Ok(Clause::Having(parse_filter(rest.trim())?));
    }
    for (prefix, kind) in [
        ("sum ", AggKind::Sum),
        ("avg ", AggKind::Avg),
        ("min ", AggKind::Min),
        ("max ", AggKind::Max),
        ("count_distinct ", AggKind::CountDistinct),
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return Ok(Clause::Aggregate(Aggregate {
                kind,
                column: Some(rest.trim().to_string()),
            }));
        }
    }

    Ok(Clause::Filter(parse_filter(s)?))
}

fn parse_i64(s: &str) -> Result<i64, QueryError> {
    s.parse::<i64>()
        .map_err(|_| QueryError::Syntax(format!("expected integer, found '{s}'")))
}

fn parse_filter(s: &str) -> Result<FilterClause, QueryError> {
    let (negated, rest) = match s.strip_prefix('!') {
        Some(r) => (true, r),
        None => (false, s),
    };

    for (op_str, op) in [
        ("!=", FilterOp::NotEq),
        (">=", FilterOp::Gte),
        ("<=", FilterOp::Lte),
        ("=", FilterOp::Eq),
        (">", FilterOp::Gt),
        ("<", FilterOp::Lt),
    ] {
        if let Some(idx) = rest.find(op_str) {
            let field = rest[..idx].trim().to_string();
            if field.is_empty() {
                return Err(QueryError::Syntax(format!("filter '{s}' has no field")));
            }
            let value_str = rest[idx + op_str.len()..].trim();
            let value = if value_str.is_empty() {
                RawValue::Empty
            } else {
                RawValue::List(value_str.split(',').map(|v| v.trim().to_string()).collect())
            };
            return Ok(FilterClause {
                field,
                op,
                value,
                negated,
            });
        }
    }

    Err(QueryError::Syntax(format!("unrecognized clause '{s}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_source() {
        let q = parse("tasks").unwrap();
        assert_eq!(q.source, Source::Tasks);
        assert!(!q.all);
        assert!(q.clauses.is_empty());
    }

    #[test]
    fn parses_all_modifier() {
        let q = parse("tasks all").unwrap();
        assert!(q.all);
    }

    #[test]
    fn parses_filter_chain() {
        let q = parse("tasks | status=accepted | sort created_at desc | limit 10").unwrap();
        assert_eq!(q.clauses.len(), 3);
    }

    #[test]
    fn parses_negated_label_filter() {
        let q = parse("tasks | !label=blocked").unwrap();
        let Clause::Filter(f) = &q.clauses[0] else {
            panic!("expected filter clause");
        };
        assert!(f.negated);
        assert_eq!(f.field, "label");
    }

    #[test]
    fn rejects_unknown_source() {
        assert!(parse("widgets").is_err());
    }
}
