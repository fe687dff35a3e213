//! Snapshot tests over TQL -> SQL compilation. The compiled string is
//! the stable public contract here, so a snapshot catches accidental
//! SQL-shape drift better than asserting on sub-strings.

use ralph::query::{compiler, parser};

fn compile(tql: &str) -> String {
    let query = parser::parse(tql).unwrap();
    let compiled = compiler::compile(&query).unwrap();
    format!("sql: {}\nbinds: {:?}", compiled.sql, compiled.binds)
}

#[test]
fn default_tasks_query_filters_type_and_open_status() {
    insta::assert_snapshot!(compile("tasks"), @r###"
    sql: SELECT tickets.id, tickets.type, tickets.status, tickets.name, tickets.spec, tickets.notes, tickets.accept, tickets.priority, tickets.parent, tickets.created_from, tickets.supersedes, tickets.supersedes_reason, tickets.kill_reason, tickets.kill_log, tickets.author, tickets.done_at, tickets.branch, tickets.created_at, tickets.updated_at, tickets.resolved_at, tickets.compacted_at, tickets.created_from_name, tickets.supersedes_name FROM tickets WHERE tickets.type = ?1 AND tickets.status < 2
    binds: [Text("task")]
    "###);
}

#[test]
fn explicit_status_filter_suppresses_the_default_open_clause() {
    insta::assert_snapshot!(
        compile("tasks | status = pending | sort priority desc | limit 5"),
        @r###"
    sql: SELECT tickets.id, tickets.type, tickets.status, tickets.name, tickets.spec, tickets.notes, tickets.accept, tickets.priority, tickets.parent, tickets.created_from, tickets.supersedes, tickets.supersedes_reason, tickets.kill_reason, tickets.kill_log, tickets.author, tickets.done_at, tickets.branch, tickets.created_at, tickets.updated_at, tickets.resolved_at, tickets.compacted_at, tickets.created_from_name, tickets.supersedes_name FROM tickets WHERE tickets.type = ?1 AND tickets.status = ?2 ORDER BY tickets.priority DESC LIMIT 5
    binds: [Text("task"), Int(0)]
    "###
    );
}

#[test]
fn aggregate_count_over_all_tickets_has_no_implicit_filter() {
    insta::assert_snapshot!(compile("tickets all | count"), @r###"
    sql: SELECT COUNT(*) AS count FROM tickets
    binds: []
    "###);
}

#[test]
fn meta_group_and_aggregate_register_joins_and_sort_resolves_the_alias() {
    insta::assert_snapshot!(
        compile("tasks | group meta.model | sum meta.cost | sort sum_meta.cost desc"),
        @r###"
    sql: SELECT COALESCE(m0.value_num, m0.value_text), SUM(COALESCE(m1.value_num, m1.value_text)) AS "sum_meta.cost" FROM tickets LEFT JOIN ticket_meta m0 ON m0.ticket_id = tickets.id AND m0.key = ?2 LEFT JOIN ticket_meta m1 ON m1.ticket_id = tickets.id AND m1.key = ?3 WHERE tickets.type = ?1 AND tickets.status < 2 GROUP BY COALESCE(m0.value_num, m0.value_text) ORDER BY "sum_meta.cost" DESC
    binds: [Text("task"), Text("model"), Text("cost")]
    "###
    );
}
