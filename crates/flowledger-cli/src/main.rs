//! flowledger CLI - inspect, edit and reconcile logical flows

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use flowledger_core::config::Config;
use flowledger_core::domain::flow::{
    EntityReference, FlowId, IdSelector, LogicalFlow, LogicalFlowRepository,
};
use flowledger_core::infrastructure::SqliteLogicalFlowRepository;
use flowledger_core::reconciliation::{FlowReconciler, ReconciliationJob, ReconciliationReport};
use flowledger_core::storage::{Database, DatabaseConfig};
use serde_json::json;
use tracing::debug;

#[derive(Parser)]
#[command(name = "flowledger")]
#[command(author, version, about = "Registry of logical data flows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file (overrides config and FLOWLEDGER_DB)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Query and edit logical flows
    Flows {
        #[command(subcommand)]
        action: FlowAction,
    },

    /// Run reconciliation sweeps
    Cleanup {
        #[command(subcommand)]
        action: CleanupAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum FlowAction {
    /// List active flows touching an entity (KIND:id)
    List { entity: EntityReference },
    /// List active flows into any of the given entities
    Upstream {
        #[arg(required = true)]
        entities: Vec<EntityReference>,
    },
    /// Show a flow by id, whatever its status
    Get { id: FlowId },
    /// Add a flow, restoring a removed one for the same pair if present
    Add {
        source: EntityReference,
        target: EntityReference,
        #[arg(short, long)]
        user: Option<String>,
        #[arg(short, long)]
        provenance: Option<String>,
    },
    /// Mark a flow removed
    Remove {
        id: FlowId,
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Restore a removed flow
    Restore {
        id: FlowId,
        #[arg(short, long)]
        user: Option<String>,
    },
}

#[derive(Subcommand)]
enum CleanupAction {
    /// Remove flows whose application endpoints no longer exist
    Orphans {
        /// Comma-separated active application ids (default: configured query)
        #[arg(long, value_delimiter = ',')]
        active_apps: Option<Vec<i64>>,
    },
    /// Remove flows whose source and target ids coincide
    SelfRefs,
    /// Run every sweep
    All {
        #[arg(long, value_delimiter = ',')]
        active_apps: Option<Vec<i64>>,
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
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays clean
    let directive = if cli.quiet { "flowledger=warn" } else { "flowledger=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();

    match cli.command {
        Commands::Flows { ref action } => {
            let config = Config::load()?;
            let db = open_database(&cli, &config).await?;
            let repo = SqliteLogicalFlowRepository::new(db.pool().clone());
            let result = cmd_flows(&repo, action, &config, &cli).await;
            db.close().await;
            result
        }

        Commands::Cleanup { ref action } => {
            let config = Config::load()?;
            let db = open_database(&cli, &config).await?;
            let repo = Arc::new(SqliteLogicalFlowRepository::new(db.pool().clone()));
            let result = cmd_cleanup(repo, action, &config, &cli).await;
            db.close().await;
            result
        }

        Commands::Config { ref action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(&cli).await,
    }
}

async fn open_database(cli: &Cli, config: &Config) -> anyhow::Result<Database> {
    let db_config = match &cli.database {
        Some(path) => {
            DatabaseConfig::file(path).max_connections(config.database.max_connections)
        }
        None => config.database.database_config(),
    };
    debug!(location = %db_config.location, "Opening flow database");
    Database::open(db_config).await
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_flows(
    repo: &SqliteLogicalFlowRepository,
    action: &FlowAction,
    config: &Config,
    cli: &Cli,
) -> anyhow::Result<()> {
    let user_or_default = |user: &Option<String>| {
        user.clone()
            .unwrap_or_else(|| config.reconciliation.default_user.clone())
    };

    match action {
        FlowAction::List { entity } => {
            let flows = repo.find_by_entity_reference(entity).await?;
            print_flows(&flows, cli, &format!("No active flows for {}.", entity))?;
        }
        FlowAction::Upstream { entities } => {
            let flows = repo.find_upstream_flows_for_entity_references(entities).await?;
            print_flows(&flows, cli, "No upstream flows found.")?;
        }
        FlowAction::Get { id } => match repo.get_by_flow_id(*id).await? {
            Some(flow) => print_flow(&flow, cli)?,
            None => {
                return Err(anyhow::anyhow!(
                    "Flow {} not found. Run `flowledger flows list <KIND:id>` to see flows for an entity.",
                    id
                ));
            }
        },
        FlowAction::Add {
            source,
            target,
            user,
            provenance,
        } => {
            let mut flow = LogicalFlow::new(source.clone(), target.clone(), user_or_default(user));
            if let Some(provenance) = provenance {
                flow = flow.with_provenance(provenance.clone());
            }
            let stored = repo.add_flow(&flow).await?;
            if !cli.quiet && cli.format == OutputFormat::Text {
                println!("Flow stored.");
            }
            print_flow(&stored, cli)?;
        }
        FlowAction::Remove { id, user } => {
            let affected = repo.remove_flow(*id, &user_or_default(user)).await?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", json!({ "flow_id": id, "removed": affected }));
                }
                OutputFormat::Text if !cli.quiet => {
                    if affected > 0 {
                        println!("Flow {} removed.", id);
                    } else {
                        println!("No active flow with id {}; nothing removed.", id);
                    }
                }
                OutputFormat::Text => {}
            }
        }
        FlowAction::Restore { id, user } => {
            let restored = repo.restore_flow(*id, &user_or_default(user)).await?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", json!({ "flow_id": id, "restored": restored }));
                }
                OutputFormat::Text if !cli.quiet => {
                    if restored {
                        println!("Flow {} restored.", id);
                    } else {
                        println!("Flow {} not found; nothing restored.", id);
                    }
                }
                OutputFormat::Text => {}
            }
        }
    }
    Ok(())
}

async fn cmd_cleanup(
    repo: Arc<SqliteLogicalFlowRepository>,
    action: &CleanupAction,
    config: &Config,
    cli: &Cli,
) -> anyhow::Result<()> {
    let active_applications = |ids: &Option<Vec<i64>>| -> anyhow::Result<IdSelector> {
        match ids {
            Some(ids) => Ok(IdSelector::ids(ids.iter().copied())),
            None => config
                .reconciliation
                .active_application_selector()
                .map_err(|e| {
                    anyhow::anyhow!(
                        "{}. Pass --active-apps or set it with `flowledger config set \
                         reconciliation.active_application_ids_query <SQL>`.",
                        e
                    )
                }),
        }
    };

    let reports = match action {
        CleanupAction::Orphans { active_apps } => {
            let reconciler = FlowReconciler::new(repo, active_applications(active_apps)?);
            vec![reconciler.run(ReconciliationJob::Orphans).await?]
        }
        CleanupAction::SelfRefs => {
            // The orphan selector is not consulted by this job
            let reconciler = FlowReconciler::new(repo, IdSelector::ids([]));
            vec![reconciler.run(ReconciliationJob::SelfReferencing).await?]
        }
        CleanupAction::All { active_apps } => {
            let reconciler = FlowReconciler::new(repo, active_applications(active_apps)?);
            reconciler.run_all().await?
        }
    };

    print_reports(&reports, cli)
}

fn cmd_config(action: &ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(key, value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
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

/// Doctor line for the active flow count, false when the count failed
async fn active_flows_check(repo: &impl LogicalFlowRepository) -> (bool, String) {
    match repo.count_active().await {
        Ok(active) => (true, format!("     Active flows: {}", active)),
        Err(e) => (false, format!("[!!] Active flows: Count failed - {}", e)),
    }
}

async fn cmd_doctor(cli: &Cli) -> anyhow::Result<()> {
    let quiet = cli.quiet;

    if !quiet {
        println!("flowledger Health Check");
        println!("=======================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
                match &config.reconciliation.active_application_ids_query {
                    Some(_) => println!("[OK] Orphan sweep: Active application query configured"),
                    None => println!("[--] Orphan sweep: No active application query (pass --active-apps)"),
                }
            }
            config
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
            Config::default()
        }
    };

    if !quiet {
        match Config::config_path() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
    }

    match open_database(cli, &config).await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Database: Connected");
                        println!("     Path: {}", db.location());
                    }

                    match db.migration_status().await {
                        Ok(status) if status.needs_migration => {
                            all_ok = false;
                            if !quiet {
                                println!(
                                    "[!!] Database: Migrations pending (v{} -> v{})",
                                    status.current_version, status.target_version
                                );
                            }
                        }
                        Ok(status) => {
                            if !quiet {
                                println!("[OK] Database: Schema v{}", status.current_version);
                            }
                        }
                        Err(e) => {
                            all_ok = false;
                            if !quiet {
                                println!("[!!] Database: Migration check failed - {}", e);
                            }
                        }
                    }

                    let repo = SqliteLogicalFlowRepository::new(db.pool().clone());
                    let (counted, line) = active_flows_check(&repo).await;
                    all_ok &= counted;
                    if !quiet {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: Health check failed - {}", e);
                    }
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Failed to initialize - {}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_flow(flow: &LogicalFlow, cli: &Cli) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(flow)?),
        OutputFormat::Text => {
            println!("Flow {}", flow.id.map(|id| id.to_string()).unwrap_or_default());
            println!("  Source: {}", describe(&flow.source));
            println!("  Target: {}", describe(&flow.target));
            println!("  Status: {}", flow.lifecycle_status);
            println!("  Provenance: {}", flow.provenance);
            println!(
                "  Created: {} by {}",
                flow.created.at.format("%Y-%m-%d %H:%M:%S"),
                flow.created.by
            );
            println!(
                "  Updated: {} by {}",
                flow.last_updated.at.format("%Y-%m-%d %H:%M:%S"),
                flow.last_updated.by
            );
        }
    }
    Ok(())
}

fn print_flows(flows: &[LogicalFlow], cli: &Cli, empty_message: &str) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(flows)?),
        OutputFormat::Text => {
            if flows.is_empty() {
                if !cli.quiet {
                    println!("{}", empty_message);
                }
                return Ok(());
            }
            if !cli.quiet {
                println!("Flows:");
            }
            for flow in flows {
                println!(
                    "  {:>6}  {} -> {}",
                    flow.id.map(|id| id.to_string()).unwrap_or_default(),
                    describe(&flow.source),
                    describe(&flow.target)
                );
            }
        }
    }
    Ok(())
}

fn print_reports(reports: &[ReconciliationReport], cli: &Cli) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(reports)?),
        OutputFormat::Text => {
            for report in reports {
                if cli.quiet {
                    println!("{} {}", report.job, report.affected);
                } else {
                    println!(
                        "{}: {} flow(s) marked removed ({} ms)",
                        report.job,
                        report.affected,
                        report.duration_ms()
                    );
                }
            }
        }
    }
    Ok(())
}

fn describe(reference: &EntityReference) -> String {
    match &reference.name {
        Some(name) => format!("{} ({})", reference, name),
        None => reference.to_string(),
    }
}
