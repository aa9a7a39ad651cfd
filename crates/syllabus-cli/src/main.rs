//! Syllabus CLI - Build a course knowledge graph and answer questions from it
//!
//! Usage:
//!   syllabus ingest <file>      Merge extraction batches into the graph
//!   syllabus index              Embed concepts for similarity search
//!   syllabus ask <question>     Build an explanation path and context
//!   syllabus show <title>       Show one concept and its neighborhood
//!   syllabus stats              Show graph statistics
//!   syllabus clear --yes        Delete every concept, relation and resource
//!   syllabus config             Manage configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use syllabus_core::config::Config;
use syllabus_core::domain::knowledge::{
    ConceptResolver, ContextBudget, GraphStore, MergeReport, MergeStatus, RetrievalEngine,
    assemble, normalize_name, read_extraction_file,
};
use syllabus_core::infrastructure::embedding::{HttpEmbedder, IndexedEmbeddingGateway};
use syllabus_core::storage::{Database, DatabaseConfig};

#[cfg(test)]
mod main_tests;

#[derive(Parser)]
#[command(name = "syllabus")]
#[command(author, version, about = "Knowledge-graph construction and retrieval for course Q&A")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file (overrides `database.path`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge extraction batches (JSON array or JSON Lines) into the graph
    Ingest {
        /// Extraction file to read
        file: PathBuf,
    },

    /// Embed new or changed concepts into the similarity index
    Index,

    /// Build an ordered explanation path for a question
    Ask {
        /// The question to answer
        question: String,
        /// Number of similarity seeds
        #[arg(long)]
        seeds: Option<usize>,
        /// Prerequisite hops to follow from each seed
        #[arg(long)]
        depth: Option<usize>,
        /// Upper bound on concepts in the path
        #[arg(long)]
        max_concepts: Option<usize>,
        /// Context budget in estimated tokens
        #[arg(long)]
        budget: Option<usize>,
        /// Deadline for the whole retrieval, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Concept title or alias to seed ahead of the similarity matches (repeatable)
        #[arg(long = "concept", value_name = "TITLE")]
        concepts: Vec<String>,
    },

    /// Show a concept with its relations, resources and examples
    Show {
        /// Concept title or alias
        title: String,
    },

    /// Show graph statistics
    Stats,

    /// Delete the whole graph
    #[command(alias = "rebuild")]
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.quiet);

    if let Err(err) = run(cli).await {
        report_error(&err);
        std::process::exit(1);
    }
}

fn init_tracing(quiet: bool) {
    let directive = if quiet { "syllabus=error" } else { "syllabus=info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = directive.parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<syllabus_core::Error>() {
        Some(core) => {
            eprintln!("Error [{}]: {}", core.code(), core);
            if let Some(suggestion) = core.suggestion() {
                eprintln!("  Try: {}", suggestion);
            }
        }
        None => eprintln!("Error: {:#}", err),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Output {
        format: cli.format,
        quiet: cli.quiet,
    };
    let db = cli.db;

    match cli.command {
        Commands::Ingest { file } => cmd_ingest(db, &file, ctx).await,
        Commands::Index => cmd_index(db, ctx).await,
        Commands::Ask {
            question,
            seeds,
            depth,
            max_concepts,
            budget,
            timeout_ms,
            concepts,
        } => {
            let overrides = AskOverrides {
                seeds,
                depth,
                max_concepts,
                budget,
                timeout_ms,
                concepts,
            };
            cmd_ask(db, &question, overrides, ctx).await
        }
        Commands::Show { title } => cmd_show(db, &title, ctx).await,
        Commands::Stats => cmd_stats(db, ctx).await,
        Commands::Clear { yes } => cmd_clear(db, yes, ctx).await,
        Commands::Config { action } => cmd_config(action, ctx),
    }
}

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

#[derive(Debug, Default, Clone)]
struct AskOverrides {
    seeds: Option<usize>,
    depth: Option<usize>,
    max_concepts: Option<usize>,
    budget: Option<usize>,
    timeout_ms: Option<u64>,
    concepts: Vec<String>,
}

// ============================================================================
// Setup
// ============================================================================

async fn open_store(config: &Config, db: Option<PathBuf>) -> anyhow::Result<Database> {
    let db_config = match db {
        Some(path) => DatabaseConfig::with_path(path),
        None => DatabaseConfig::from_config(config)?,
    };
    Database::new(db_config).await
}

fn embedding_gateway(config: &Config, database: &Database) -> anyhow::Result<IndexedEmbeddingGateway> {
    let embedder = HttpEmbedder::from_config(&config.embedding)?;
    let index = database.vector_index(embedder.model());
    Ok(IndexedEmbeddingGateway::new(embedder, index))
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_ingest(db: Option<PathBuf>, file: &Path, out: Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let batches = read_extraction_file(file).await?;
    let database = open_store(&config, db).await?;
    let store = Arc::new(database.graph_store());

    if !out.quiet && !out.json() {
        println!("Ingesting {} batch(es) from {}...", batches.len(), file.display());
    }

    let resolver = ConceptResolver::new(store.clone()).with_lock_timeout(config.resolver.lock_timeout());
    let reports = resolver.resolve_all(batches).await;
    let summary = IngestSummary::from_reports(&reports);

    if out.json() {
        let value = serde_json::json!({
            "summary": summary.to_json(),
            "reports": reports,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if !out.quiet {
        for report in &reports {
            print_report(report);
        }
        println!();
        println!(
            "Merged {} | Rejected {} | Failed {}",
            summary.merged, summary.rejected, summary.failed
        );
        println!(
            "Concepts: {} created, {} merged | Relations: {} created",
            summary.concepts_created, summary.concepts_merged, summary.relations_created
        );
    }

    database.close().await;

    if summary.failed > 0 {
        anyhow::bail!("{} batch(es) failed to merge", summary.failed);
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct IngestSummary {
    merged: usize,
    rejected: usize,
    failed: usize,
    concepts_created: usize,
    concepts_merged: usize,
    relations_created: usize,
}

impl IngestSummary {
    fn from_reports(reports: &[MergeReport]) -> Self {
        let mut summary = Self::default();
        for report in reports {
            match report.status {
                MergeStatus::Merged => summary.merged += 1,
                MergeStatus::Rejected { .. } => summary.rejected += 1,
                MergeStatus::Failed { .. } => summary.failed += 1,
            }
            summary.concepts_created += report.counts.concepts_created;
            summary.concepts_merged += report.counts.concepts_merged;
            summary.relations_created += report.counts.relations_created;
        }
        summary
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "merged": self.merged,
            "rejected": self.rejected,
            "failed": self.failed,
            "concepts_created": self.concepts_created,
            "concepts_merged": self.concepts_merged,
            "relations_created": self.relations_created,
        })
    }
}

fn print_report(report: &MergeReport) {
    match &report.status {
        MergeStatus::Merged => println!(
            "[OK] {}: +{} concepts, ~{} merged, +{} relations, +{} examples{}",
            report.batch_id,
            report.counts.concepts_created,
            report.counts.concepts_merged,
            report.counts.relations_created,
            report.counts.examples_attached,
            if report.notes.is_empty() {
                String::new()
            } else {
                format!(" ({} note(s))", report.notes.len())
            }
        ),
        MergeStatus::Rejected { reason } => {
            println!("[SKIP] {}: rejected ({})", report.batch_id, reason)
        }
        MergeStatus::Failed { error } => println!("[FAIL] {}: {}", report.batch_id, error),
    }
}

async fn cmd_index(db: Option<PathBuf>, out: Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let database = open_store(&config, db).await?;
    let store = database.graph_store();
    let gateway = embedding_gateway(&config, &database)?;

    if !out.quiet && !out.json() {
        println!("Indexing concepts with {}...", gateway.index().model());
    }

    let report = gateway.index_concepts(&store).await?;

    if out.json() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !out.quiet {
        println!("Indexed {} concept(s), {} unchanged.", report.indexed, report.unchanged);
    }

    database.close().await;
    Ok(())
}

async fn cmd_ask(
    db: Option<PathBuf>,
    question: &str,
    overrides: AskOverrides,
    out: Output,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let database = open_store(&config, db).await?;
    let store = Arc::new(database.graph_store());
    let gateway = Arc::new(embedding_gateway(&config, &database)?);

    let mut options = config.retrieval.options();
    if let Some(seeds) = overrides.seeds {
        options = options.with_seed_count(seeds);
    }
    if let Some(depth) = overrides.depth {
        options = options.with_max_depth(depth);
    }
    if let Some(max) = overrides.max_concepts {
        options = options.with_max_concepts(max);
    }
    if let Some(ms) = overrides.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    options = options.with_explicit_seeds(overrides.concepts);
    let budget = overrides
        .budget
        .unwrap_or(config.retrieval.context_budget_tokens);

    tracing::debug!(?options, budget, "Retrieval options");

    let engine = RetrievalEngine::new(store, gateway);
    let path = engine.build_explanation_path(question, &options).await?;
    let bundle = assemble(&path, ContextBudget::Tokens(budget));

    if out.json() {
        let value = serde_json::json!({
            "query": path.query,
            "outcome": path.outcome,
            "learning_path": bundle.learning_path(),
            "warnings": path.warnings,
            "stats": path.stats,
            "context": bundle,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        if !out.quiet {
            println!("Learning path: {}", bundle.learning_path().join(" -> "));
            println!("Outcome: {}", path.outcome);
            for warning in &path.warnings {
                eprintln!("warning: {}", warning);
            }
            println!();
        }
        println!("{}", bundle.text);
    }

    database.close().await;
    Ok(())
}

async fn cmd_show(db: Option<PathBuf>, title: &str, out: Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let database = open_store(&config, db).await?;
    let store = database.graph_store();

    let concept = match store.get_concept_by_title(title).await? {
        Some(concept) => Some(concept),
        None => store
            .find_concepts_by_name(&normalize_name(title))
            .await?
            .into_iter()
            .next(),
    }
    .ok_or_else(|| syllabus_core::Error::ConceptNotFound(title.to_string()))?;
    let relations = store.relations_for(&concept.id).await?;
    let resources = store.resources_for(&concept.id).await?;
    let examples = store.examples_for(&concept.id).await?;

    if out.json() {
        let value = serde_json::json!({
            "concept": concept,
            "relations": relations,
            "resources": resources,
            "examples": examples,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        database.close().await;
        return Ok(());
    }

    println!("{}", concept.title);
    println!("  ID: {}", concept.id);
    if let Some(difficulty) = concept.difficulty {
        println!("  Difficulty: {}", difficulty.as_str());
    }
    if !concept.aliases.is_empty() {
        let aliases: Vec<&str> = concept.aliases.iter().map(String::as_str).collect();
        println!("  Aliases: {}", aliases.join(", "));
    }
    if !concept.definition.is_empty() {
        println!("  Definition: {}", concept.definition);
    }

    if !relations.is_empty() {
        println!("\nRelations:");
        for relation in &relations {
            let (arrow, other_id) = if relation.source_id == concept.id {
                ("->", &relation.target_id)
            } else {
                ("<-", &relation.source_id)
            };
            let other = store
                .get_concept(other_id)
                .await?
                .map(|c| c.title)
                .unwrap_or_else(|| other_id.clone());
            println!("  {} {} {}", relation.relation_type.as_str(), arrow, other);
        }
    }

    if !resources.is_empty() {
        println!("\nResources:");
        for resource in &resources {
            match &resource.resource_type {
                Some(kind) => println!("  {} ({})", resource.url, kind),
                None => println!("  {}", resource.url),
            }
        }
    }

    if !examples.is_empty() {
        println!("\nExamples:");
        for example in &examples {
            println!("  [{}] {}", example.example_type.as_str(), example.text);
        }
    }

    database.close().await;
    Ok(())
}

async fn cmd_stats(db: Option<PathBuf>, out: Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let database = open_store(&config, db).await?;
    let store = database.graph_store();
    let stats = store.stats().await?;

    if out.json() {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        if let Some(path) = database.path() {
            println!("Graph: {}", path.display());
        }
        println!("  Concepts:  {}", stats.concepts);
        println!("  Relations: {}", stats.relations);
        for (kind, count) in &stats.relations_by_type {
            println!("    {}: {}", kind, count);
        }
        println!("  Resources: {}", stats.resources);
        println!("  Examples:  {}", stats.examples);
    }

    database.close().await;
    Ok(())
}

async fn cmd_clear(db: Option<PathBuf>, yes: bool, out: Output) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("Refusing to clear the graph without --yes");
    }

    let config = Config::load()?;
    let database = open_store(&config, db).await?;
    let store = database.graph_store();
    store.clear().await?;

    if !out.quiet {
        println!("Graph cleared.");
    }

    database.close().await;
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !out.quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.json() {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !out.quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
