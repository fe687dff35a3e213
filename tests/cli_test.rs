use clap::Parser;
use ralph::cli::{Cli, Commands, IssueAction, TaskAction};

#[test]
fn parses_construct_with_default_spec() {
    let cli = Cli::try_parse_from(["tix", "construct"]).unwrap();
    match cli.command {
        Commands::Construct { spec } => assert_eq!(spec, None),
        other => panic!("expected Construct, got {other:?}"),
    }
}

#[test]
fn parses_construct_with_explicit_spec() {
    let cli = Cli::try_parse_from(["tix", "construct", "docs/spec.md"]).unwrap();
    match cli.command {
        Commands::Construct { spec } => assert_eq!(spec.as_deref(), Some("docs/spec.md")),
        other => panic!("expected Construct, got {other:?}"),
    }
}

#[test]
fn parses_query_requires_an_expression() {
    assert!(Cli::try_parse_from(["tix", "query"]).is_err());
    let cli = Cli::try_parse_from(["tix", "query", "task where status = pending"]).unwrap();
    match cli.command {
        Commands::Query { tql } => assert_eq!(tql, "task where status = pending"),
        other => panic!("expected Query, got {other:?}"),
    }
}

#[test]
fn parses_task_add_with_comma_separated_deps() {
    let cli = Cli::try_parse_from([
        "tix", "task", "add", "wire the parser",
        "--priority", "high",
        "--deps", "t-aaaaaaaa,t-bbbbbbbb",
    ])
    .unwrap();
    match cli.command {
        Commands::Task { action: TaskAction::Add { name, priority, deps, .. } } => {
            assert_eq!(name, "wire the parser");
            assert_eq!(priority, "high");
            assert_eq!(deps, vec!["t-aaaaaaaa", "t-bbbbbbbb"]);
        }
        other => panic!("expected Task::Add, got {other:?}"),
    }
}

#[test]
fn parses_issue_done_ids() {
    let cli = Cli::try_parse_from(["tix", "issue", "done-ids", "i-1111", "i-2222"]).unwrap();
    match cli.command {
        Commands::Issue { action: IssueAction::DoneIds { ids } } => {
            assert_eq!(ids, vec!["i-1111", "i-2222"]);
        }
        other => panic!("expected Issue::DoneIds, got {other:?}"),
    }
}

#[test]
fn rejects_unknown_subcommand() {
    assert!(Cli::try_parse_from(["tix", "bogus"]).is_err());
}
