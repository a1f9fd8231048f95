//! Lorebank CLI - inspect and curate the shared learning store

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use lorebank_core::config::Config;
use lorebank_core::domain::learning::{
    ActorContext, EdgeInsertOutcome, EdgeKind, Learning, LearningUpdate, NewLearning,
    RetrievalRequest, RetrievalResult,
};
use lorebank_core::domain::session::SessionRecord;
use lorebank_core::domain::timestamp_now;
use lorebank_core::storage::CURRENT_VERSION;
use lorebank_core::AppContext;
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(name = "lorebank")]
#[command(author, version, about = "Shared, scoped learning store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Act for this app instead of the configured `app.name`
    #[arg(long, global = true)]
    app: Option<String>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and store the configured version and model for the app
    Init,

    /// Store a learning (idempotent on its content)
    Learn {
        /// Learning as JSON (app, scope, owner_id, content, importance, ...)
        #[arg(long)]
        json: String,
    },

    /// Show one learning
    Show { id: String },

    /// Show the audit trail of a learning
    History { id: String },

    /// Change a learning's mutable fields
    Update {
        id: String,
        /// Fields to change as JSON; `null` clears owner_id or expires_at
        #[arg(long)]
        json: String,
    },

    /// Record that a learning was used
    Touch { id: String },

    /// Deactivate a learning
    Retire {
        id: String,
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Add a consistency edge: supersedes, contradicts, supports, derived_from
    Link {
        kind: String,
        from: String,
        to: String,
    },

    /// List edges touching a learning or session
    Edges { id: String },

    /// Register a session learnings can derive from
    Session {
        id: String,
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Rank the learnings visible to an actor
    Retrieve {
        #[arg(short, long)]
        user: Option<String>,
        #[arg(short, long)]
        session: Option<String>,
        /// JSON file mapping learning ids to relevance in [0, 1]
        #[arg(long)]
        relevance: Option<PathBuf>,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Include superseded, expired and retired learnings
        #[arg(long)]
        historical: bool,
        /// Mark every returned learning as accessed
        #[arg(long)]
        consume: bool,
    },

    /// Deactivate everything past its expiry time
    Sweep,

    /// Show store statistics (all apps unless --app is given)
    Stats,

    /// Configuration management
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
    /// Show the config file path
    Path,
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "lorebank=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        report(&e);
        std::process::exit(1);
    }
}

fn report(e: &anyhow::Error) {
    match e.downcast_ref::<lorebank_core::Error>() {
        Some(err) => {
            eprintln!("Error [{}]: {}", err.code(), err);
            if let Some(hint) = err.suggestion() {
                eprintln!("  Try: {}", hint);
            }
        }
        None => eprintln!("Error: {:#}", e),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    // Config commands must work without touching the database
    let command = match cli.command {
        Commands::Config { action } => return cmd_config(action, out),
        command => command,
    };

    let mut config = Config::load()?;
    if let Some(app) = &cli.app {
        config.set("app.name", app)?;
    }
    let ctx = AppContext::initialize(config).await?;
    debug!(app = %ctx.app(), "Context initialized");

    let result = match command {
        Commands::Init => cmd_init(&ctx, out).await,
        Commands::Learn { json } => cmd_learn(&ctx, &json, out).await,
        Commands::Show { id } => cmd_show(&ctx, &id, out).await,
        Commands::History { id } => cmd_history(&ctx, &id, out).await,
        Commands::Update { id, json } => cmd_update(&ctx, &id, &json, out).await,
        Commands::Touch { id } => {
            ctx.store().mark_accessed(&id).await?;
            out.done(&id, "Marked accessed")
        }
        Commands::Retire { id, reason } => {
            ctx.store().deactivate(&id, reason).await?;
            out.done(&id, "Retired")
        }
        Commands::Link { kind, from, to } => cmd_link(&ctx, &kind, &from, &to, out).await,
        Commands::Edges { id } => cmd_edges(&ctx, &id, out).await,
        Commands::Session { id, user } => cmd_session(&ctx, &id, user, out).await,
        Commands::Retrieve {
            user,
            session,
            relevance,
            limit,
            historical,
            consume,
        } => {
            let mut actor = ActorContext::default();
            actor.user_id = user;
            actor.session_id = session;

            let mut request = RetrievalRequest::new(ctx.app()).for_actor(actor);
            if let Some(path) = relevance {
                request = request.with_relevance(read_relevance(&path)?);
            }
            if let Some(limit) = limit {
                request = request.with_limit(limit);
            }
            if historical {
                request = request.historical();
            }
            cmd_retrieve(&ctx, &request, consume, out).await
        }
        Commands::Sweep => {
            let swept = ctx.expiry().sweep(timestamp_now()).await?;
            if out.format == OutputFormat::Json {
                out.json(&serde_json::json!({ "swept": swept }))
            } else {
                out.line(format!("Swept {} expired learning(s)", swept));
                Ok(())
            }
        }
        Commands::Stats => cmd_stats(&ctx, cli.app.as_deref(), out).await,
        Commands::Config { .. } => Ok(()),
    };

    ctx.shutdown().await;
    result
}

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(value).context("Failed to encode output")?;
        println!("{}", text);
        Ok(())
    }

    /// Informational text, suppressed by `--quiet`
    fn line(&self, text: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", text.as_ref());
        }
    }

    fn done(&self, id: &str, action: &str) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => self.json(&serde_json::json!({ "id": id, "ok": true })),
            OutputFormat::Text => {
                self.line(format!("{}: {}", action, id));
                Ok(())
            }
        }
    }
}

fn print_learning(learning: &Learning) {
    let now = timestamp_now();
    let owner = learning
        .owner_id
        .as_deref()
        .map(|o| format!("/{}", o))
        .unwrap_or_default();
    println!(
        "{}  [{}] {}{} {}",
        learning.id,
        learning.status(now),
        learning.scope,
        owner,
        learning.variant()
    );
    println!("  {}", learning.content.summary());
    println!(
        "  importance {:.2}  confidence {:.2}  accessed {}x",
        learning.importance, learning.confidence, learning.access_count
    );
    if let Some(expires_at) = learning.expires_at {
        println!("  expires {}", expires_at.to_rfc3339());
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_init(ctx: &AppContext, out: Output) -> anyhow::Result<()> {
    let status = ctx.database().migration_status().await?;
    let app = ctx.register_app().await?;

    match out.format {
        OutputFormat::Json => out.json(&serde_json::json!({
            "app": &app,
            "database": ctx.database().path().display().to_string(),
            "schema_version": status.current_version,
        })),
        OutputFormat::Text => {
            out.line(format!("Initialized app '{}' (version {})", app.app, app.version));
            out.line(format!("  Database: {}", ctx.database().path().display()));
            out.line(format!(
                "  Schema:   v{} of v{}",
                status.current_version, CURRENT_VERSION
            ));
            Ok(())
        }
    }
}

async fn cmd_learn(ctx: &AppContext, json: &str, out: Output) -> anyhow::Result<()> {
    let input: NewLearning = serde_json::from_str(json).context("Invalid learning JSON")?;
    let outcome = ctx.store().create(input.into_learning()).await?;

    match out.format {
        OutputFormat::Json => out.json(&serde_json::json!({
            "id": outcome.id(),
            "created": outcome.is_created(),
        })),
        OutputFormat::Text => {
            println!("{}", outcome.id());
            if !outcome.is_created() {
                out.line("  (already stored; nothing changed)");
            }
            Ok(())
        }
    }
}

async fn cmd_show(ctx: &AppContext, id: &str, out: Output) -> anyhow::Result<()> {
    let learning = ctx.store().get(id).await?;
    match out.format {
        OutputFormat::Json => out.json(&learning),
        OutputFormat::Text => {
            print_learning(&learning);
            Ok(())
        }
    }
}

async fn cmd_history(ctx: &AppContext, id: &str, out: Output) -> anyhow::Result<()> {
    let events = ctx.store().history(id).await?;
    match out.format {
        OutputFormat::Json => out.json(&events),
        OutputFormat::Text => {
            if events.is_empty() {
                out.line(format!("No history for {}", id));
            }
            for event in events {
                println!("{}  {}", event.timestamp().to_rfc3339(), event.description());
            }
            Ok(())
        }
    }
}

async fn cmd_update(ctx: &AppContext, id: &str, json: &str, out: Output) -> anyhow::Result<()> {
    let update: LearningUpdate = serde_json::from_str(json).context("Invalid update JSON")?;
    let learning = ctx.store().update(id, &update).await?;
    match out.format {
        OutputFormat::Json => out.json(&learning),
        OutputFormat::Text => {
            print_learning(&learning);
            Ok(())
        }
    }
}

async fn cmd_link(
    ctx: &AppContext,
    kind: &str,
    from: &str,
    to: &str,
    out: Output,
) -> anyhow::Result<()> {
    let kind = EdgeKind::parse(kind).ok_or_else(|| {
        let valid: Vec<&str> = EdgeKind::all().iter().map(|k| k.as_str()).collect();
        anyhow!("Unknown edge kind '{}'. Valid kinds: {}", kind, valid.join(", "))
    })?;

    let outcome = ctx.graph().add_edge(kind, from, to).await?;
    let created = matches!(outcome, EdgeInsertOutcome::Created(_));
    let edge = outcome.into_edge();

    match out.format {
        OutputFormat::Json => out.json(&serde_json::json!({ "edge": edge, "created": created })),
        OutputFormat::Text => {
            println!("{}  {} {} {}", edge.id, edge.from_id, edge.kind, edge.to_id);
            if !created {
                out.line("  (edge already present)");
            }
            Ok(())
        }
    }
}

async fn cmd_edges(ctx: &AppContext, id: &str, out: Output) -> anyhow::Result<()> {
    let edges = ctx.graph().edges_for(id).await?;
    match out.format {
        OutputFormat::Json => out.json(&edges),
        OutputFormat::Text => {
            if edges.is_empty() {
                out.line(format!("No edges for {}", id));
            }
            for edge in edges {
                println!("{}  {} {} {}", edge.id, edge.from_id, edge.kind, edge.to_id);
            }
            Ok(())
        }
    }
}

async fn cmd_session(
    ctx: &AppContext,
    id: &str,
    user: Option<String>,
    out: Output,
) -> anyhow::Result<()> {
    let mut session = SessionRecord::new(id, ctx.app());
    if let Some(user) = user {
        session = session.with_user(user);
    }
    let stored = ctx.store().record_session(&session).await?;

    match out.format {
        OutputFormat::Json => out.json(&stored),
        OutputFormat::Text => {
            out.line(format!("Session {} registered for app '{}'", stored.id, stored.app));
            Ok(())
        }
    }
}

fn read_relevance(path: &Path) -> anyhow::Result<HashMap<String, f64>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read relevance file: {}", path.display()))?;
    let relevance: HashMap<String, f64> = serde_json::from_str(&contents)
        .with_context(|| format!("Relevance file must map ids to numbers: {}", path.display()))?;
    Ok(relevance)
}

async fn cmd_retrieve(
    ctx: &AppContext,
    request: &RetrievalRequest,
    consume: bool,
    out: Output,
) -> anyhow::Result<()> {
    let result: RetrievalResult = ctx.retrieval().retrieve(request).await?;
    if consume {
        ctx.retrieval().consume(&result.ids()).await?;
    }

    match out.format {
        OutputFormat::Json => out.json(&result),
        OutputFormat::Text => {
            if result.items.is_empty() {
                out.line(format!("No learnings visible in '{}'", request.app));
            }
            for (rank, item) in result.items.iter().enumerate() {
                println!("{:>2}. {:.3}  {}", rank + 1, item.score, item.learning.id);
                println!(
                    "      {} {}: {}",
                    item.learning.scope,
                    item.learning.variant(),
                    item.learning.content.summary()
                );
                if item.has_conflict() {
                    println!("      conflicts with: {}", item.conflicts_with.join(", "));
                }
            }
            out.line(format!(
                "{} of {} candidate(s), {} conflict(s)",
                result.items.len(),
                result.candidates,
                result.conflicts.len()
            ));
            Ok(())
        }
    }
}

async fn cmd_stats(ctx: &AppContext, app: Option<&str>, out: Output) -> anyhow::Result<()> {
    let stats = ctx.store().stats(app).await?;
    match out.format {
        OutputFormat::Json => out.json(&stats),
        OutputFormat::Text => {
            println!("Learnings: {}", stats.total);
            println!("  active:          {}", stats.active);
            println!("  superseded:      {}", stats.superseded);
            println!("  inactive:        {}", stats.inactive);
            println!("  expired (unswept): {}", stats.expired_unswept);
            for (scope, count) in &stats.by_scope {
                println!("  scope {}: {}", scope, count);
            }
            for (variant, count) in &stats.by_variant {
                println!("  variant {}: {}", variant, count);
            }
            for (kind, count) in &stats.edges_by_kind {
                println!("  edges {}: {}", kind, count);
            }
            println!(
                "Average importance {:.2}, confidence {:.2}",
                stats.average_importance, stats.average_confidence
            );
            Ok(())
        }
    }
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            out.line(format!("Set {} = {}", key, value));
        }
        ConfigAction::List => {
            let items = Config::load()?.list()?;
            match out.format {
                OutputFormat::Json => {
                    let map: BTreeMap<String, String> = items.into_iter().collect();
                    out.json(&map)?;
                }
                OutputFormat::Text => {
                    for (key, value) in items {
                        println!("{} = {}", key, value);
                    }
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            out.line("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
