//! kubetrace CLI: inspect operator recording sessions.
//!
//! Thin glue over `kubetrace-core`: every subcommand loads a session from
//! the store and hands it to the corresponding core API, printing text or
//! JSON.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use kubetrace_core::analysis::AnalysisReport;
use kubetrace_core::causality::{
    CausalityOptions, CausalityReport, build_causality_chains, build_causality_graph,
    render_chains,
};
use kubetrace_core::storage::{Store, migration_status};
use kubetrace_core::verify::verify_store;

#[derive(Parser)]
#[command(name = "kubetrace", version, about = "Inspect operator recording sessions")]
struct Cli {
    /// Path to the recording database.
    #[arg(long, global = true, default_value = "kubetrace.db")]
    db: PathBuf,

    /// Emit JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List recorded sessions, newest first.
    Sessions,

    /// Report loops, slow calls and errors for one session.
    Analyze {
        /// Session to analyze.
        session: String,
        /// Loop-detection window size (operations).
        #[arg(long, default_value_t = 10)]
        window: usize,
        /// Slow-call threshold in milliseconds.
        #[arg(long, default_value_t = 1000)]
        threshold_ms: i64,
    },

    /// Build the causality graph and print causal chains.
    Causality {
        /// Session to analyze.
        session: String,
        /// Maximum chain depth (0 = default).
        #[arg(long, default_value_t = 0)]
        max_depth: usize,
        /// Maximum number of chains (0 = default).
        #[arg(long, default_value_t = 0)]
        max_chains: usize,
        /// Copy payload text into graph nodes.
        #[arg(long)]
        include_payloads: bool,
    },

    /// Check store schema and data integrity.
    Verify {
        /// Treat missing optional columns as errors.
        #[arg(long)]
        strict: bool,
    },

    /// Schema migration tooling.
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },
}

#[derive(Subcommand)]
enum MigrateCommand {
    /// Show current vs target schema version and pending steps.
    Status,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Sessions => run_sessions(&cli.db, cli.json),
        Command::Analyze {
            ref session,
            window,
            threshold_ms,
        } => run_analyze(&cli.db, cli.json, session, window, threshold_ms),
        Command::Causality {
            ref session,
            max_depth,
            max_chains,
            include_payloads,
        } => run_causality(&cli.db, cli.json, session, max_depth, max_chains, include_payloads),
        Command::Verify { strict } => run_verify(&cli.db, cli.json, strict),
        Command::Migrate {
            command: MigrateCommand::Status,
        } => run_migrate_status(&cli.db, cli.json),
    }
}

fn open_existing(db: &Path) -> anyhow::Result<Store> {
    if !db.exists() {
        bail!("database not found: {}", db.display());
    }
    Store::open(db).with_context(|| format!("failed to open {}", db.display()))
}

fn run_sessions(db: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_existing(db)?;
    let sessions = store.list_sessions().context("failed to list sessions")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("no sessions recorded");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  ops={}  start={}  end={}",
            session.session_id, session.op_count, session.start_time, session.end_time
        );
    }
    Ok(())
}

fn run_analyze(
    db: &Path,
    json: bool,
    session: &str,
    window: usize,
    threshold_ms: i64,
) -> anyhow::Result<()> {
    let store = open_existing(db)?;
    let ops = store
        .query_operations(session)
        .with_context(|| format!("failed to load session {session}"))?;
    if ops.is_empty() {
        bail!("no operations recorded for session {session}");
    }

    let report = AnalysisReport::build(session, &ops, window, threshold_ms)
        .context("analysis failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("session {session}: {} operations", report.total_operations);
    match &report.slow_operations {
        Some(slow) => {
            println!("slow operations (>= {threshold_ms} ms):");
            for entry in slow {
                println!(
                    "  [{}] {} {} took {} ms",
                    entry.index, entry.op_type, entry.resource, entry.duration_ms
                );
            }
        }
        None => println!("no operations at or above {threshold_ms} ms"),
    }
    match &report.loops_detected {
        Some(loops) => {
            println!("loops (window {window}):");
            for entry in loops {
                println!(
                    "  ops {}..{} repeated {} more times: {}",
                    entry.start_index, entry.end_index, entry.repeat_count, entry.description
                );
            }
        }
        None => println!("no loops detected with window {window}"),
    }
    if let Some(errors) = &report.errors {
        println!("errors: {} total", errors.total);
        for (op_type, count) in &errors.by_type {
            println!("  {op_type}: {count}");
        }
    } else {
        println!("no errors recorded");
    }
    Ok(())
}

fn run_causality(
    db: &Path,
    json: bool,
    session: &str,
    max_depth: usize,
    max_chains: usize,
    include_payloads: bool,
) -> anyhow::Result<()> {
    let store = open_existing(db)?;
    let ops = store
        .query_operations(session)
        .with_context(|| format!("failed to load session {session}"))?;
    let spans = store
        .query_spans(session)
        .with_context(|| format!("failed to load spans for session {session}"))?;

    let (graph, warnings) =
        build_causality_graph(&ops, &spans, CausalityOptions { include_payloads })
            .context("causality graph construction failed")?;
    let chains = build_causality_chains(&graph, max_depth, max_chains);

    if json {
        let report = CausalityReport::new(graph, warnings);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for warning in &warnings {
        eprintln!("warning: {warning}");
    }
    if chains.is_empty() {
        println!("no causal chains found");
        return Ok(());
    }
    for (line, chain) in render_chains(&graph, &chains).iter().zip(&chains) {
        println!("[{} nodes] {line}", chain.length);
    }
    Ok(())
}

fn run_verify(db: &Path, json: bool, strict: bool) -> anyhow::Result<()> {
    let report = verify_store(db, strict).context("verification failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for error in &report.errors {
            println!("error: {error}");
        }
        for warning in &report.warnings {
            println!("warning: {warning}");
        }
        println!(
            "{} sessions, {} operations, {} spans",
            report.stats.sessions, report.stats.operations, report.stats.spans
        );
    }

    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_migrate_status(db: &Path, json: bool) -> anyhow::Result<()> {
    let report = migration_status(db).context("failed to read migration status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !report.db_exists {
        println!("database does not exist yet: {}", db.display());
    }
    println!(
        "schema version {} (target {})",
        report.current_version, report.target_version
    );
    for entry in &report.entries {
        let marker = if entry.applied { "applied" } else { "pending" };
        println!("  v{}: {} [{marker}]", entry.version, entry.description);
    }
    Ok(())
}
