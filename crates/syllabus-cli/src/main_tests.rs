//! CLI argument parsing tests

use clap::{CommandFactory, Parser};
use syllabus_core::domain::knowledge::{MergeReport, MergeStatus};

use crate::{Cli, Commands, ConfigAction, IngestSummary, OutputFormat};

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_parse_ask_with_overrides() {
    let cli = Cli::try_parse_from([
        "syllabus",
        "ask",
        "how does backprop work?",
        "--seeds",
        "3",
        "--depth",
        "4",
        "--budget",
        "500",
        "--format",
        "json",
    ])
    .unwrap();

    assert_eq!(cli.format, OutputFormat::Json);
    match cli.command {
        Commands::Ask {
            question,
            seeds,
            depth,
            max_concepts,
            budget,
            timeout_ms,
            concepts,
        } => {
            assert_eq!(question, "how does backprop work?");
            assert_eq!(seeds, Some(3));
            assert_eq!(depth, Some(4));
            assert_eq!(max_concepts, None);
            assert_eq!(budget, Some(500));
            assert_eq!(timeout_ms, None);
            assert!(concepts.is_empty());
        }
        _ => panic!("expected ask"),
    }
}

#[test]
fn test_parse_ask_with_repeated_concepts() {
    let cli = Cli::try_parse_from([
        "syllabus",
        "ask",
        "why normalize?",
        "--concept",
        "Dot Product",
        "--concept",
        "vectors",
    ])
    .unwrap();

    match cli.command {
        Commands::Ask { concepts, .. } => {
            assert_eq!(concepts, vec!["Dot Product", "vectors"]);
        }
        _ => panic!("expected ask"),
    }
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["syllabus", "stats", "--quiet", "--db", "/tmp/g.db"]).unwrap();
    assert!(cli.quiet);
    assert_eq!(cli.format, OutputFormat::Text);
    assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("/tmp/g.db")));
}

#[test]
fn test_config_set_parses() {
    let cli = Cli::try_parse_from(["syllabus", "config", "set", "retrieval.max_depth", "3"]).unwrap();
    match cli.command {
        Commands::Config {
            action: ConfigAction::Set { key, value },
        } => {
            assert_eq!(key, "retrieval.max_depth");
            assert_eq!(value, "3");
        }
        _ => panic!("expected config set"),
    }
}

#[test]
fn test_ingest_requires_file() {
    assert!(Cli::try_parse_from(["syllabus", "ingest"]).is_err());
}

#[test]
fn test_ingest_summary_counts_statuses() {
    let mut merged = MergeReport::failed("a", "x");
    merged.status = MergeStatus::Merged;
    merged.counts.concepts_created = 2;
    merged.counts.relations_created = 1;
    let rejected = {
        let mut r = MergeReport::failed("b", "x");
        r.status = MergeStatus::Rejected {
            reason: "timeout".into(),
        };
        r
    };
    let failed = MergeReport::failed("c", "store down");

    let summary = IngestSummary::from_reports(&[merged, rejected, failed]);
    assert_eq!(summary.merged, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.concepts_created, 2);
    assert_eq!(summary.relations_created, 1);
}
