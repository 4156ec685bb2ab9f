//! Command-line interface for maestro.
//!
//! Provides commands for submitting orchestration requests, checking
//! status, listing recorded orchestrations, managing review criteria,
//! and running the HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{self, ExecutorDef};
use crate::core::OrchestrationCoordinator;
use crate::domain::{OrchestrationRequest, ReviewCriteria};
use crate::error::OrchestrationError;
use crate::executors::{CommandExecutor, ExecutorRegistry};
use crate::review::{CriteriaStore, FileCriteriaSource};
use crate::server::{self, AppState};
use crate::store::OrchestrationStore;

/// maestro - concurrent task orchestration with review gating
#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit an orchestration request and wait for the outcome
    Submit {
        /// Request file (YAML)
        request: PathBuf,
    },

    /// Check the status of an orchestration
    Status {
        /// Orchestration ID (UUID)
        orchestration_id: String,
    },

    /// List recorded orchestrations for a tenant
    List {
        /// Tenant ID
        tenant_id: String,
    },

    /// Start the HTTP server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        address: String,
    },

    /// Manage review criteria
    Criteria {
        #[command(subcommand)]
        command: CriteriaCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum CriteriaCommands {
    /// Show criteria by id
    Show {
        /// Criteria ID
        criteria_id: String,
    },

    /// Create or replace criteria from a YAML file
    Apply {
        /// Criteria file (YAML)
        file: PathBuf,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit { request } => submit_request(&request).await,
            Commands::Status { orchestration_id } => show_status(&orchestration_id).await,
            Commands::List { tenant_id } => list_orchestrations(&tenant_id).await,
            Commands::Serve { address } => serve(&address).await,
            Commands::Criteria { command } => match command {
                CriteriaCommands::Show { criteria_id } => show_criteria(&criteria_id).await,
                CriteriaCommands::Apply { file } => apply_criteria(&file).await,
            },
            Commands::Config => show_config(),
        }
    }
}

/// Build the engine from resolved configuration
fn build_state() -> Result<AppState> {
    let config = config::config()?;

    let mut registry = ExecutorRegistry::new();
    for ExecutorDef { name, command, args } in &config.executors {
        registry.register(Arc::new(
            CommandExecutor::new(name.clone(), command.clone()).with_args(args.clone()),
        ));
    }

    let criteria = Arc::new(CriteriaStore::new(
        Arc::new(FileCriteriaSource::new(config::criteria_dir()?)),
        config.engine.criteria_ttl(),
    ));
    let store = Arc::new(OrchestrationStore::new(config::orchestrations_dir()?));
    let coordinator = Arc::new(OrchestrationCoordinator::new(
        registry,
        criteria.clone(),
        store,
        config.engine.clone(),
    ));

    Ok(AppState {
        coordinator,
        criteria,
        shutdown: CancellationToken::new(),
    })
}

/// Cancel the token when ctrl-c is received
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nShutting down...");
            token.cancel();
        }
    });
}

/// Submit a request file and run it to completion in-process
async fn submit_request(path: &PathBuf) -> Result<()> {
    let request = OrchestrationRequest::from_file(path)?;
    let state = build_state()?;
    cancel_on_ctrl_c(state.shutdown.clone());

    match state
        .coordinator
        .run(request, state.shutdown.child_token())
        .await
    {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result.decision.redacted_result)?);
            let status = if result.decision.is_approved() {
                "approved"
            } else {
                "rejected (escalated)"
            };
            eprintln!(
                "\n[Orchestration {} completed: {} in {}ms]",
                result.orchestration_id, status, result.total_duration_ms
            );
            if !result.decision.is_approved() {
                eprintln!("{}", result.decision.feedback);
            }
            Ok(())
        }
        Err(OrchestrationError::ReviewRejected {
            orchestration_id,
            feedback,
        }) => {
            eprintln!("[Orchestration {} rejected]", orchestration_id);
            eprintln!("{}", feedback);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

/// Show the recorded state of an orchestration
async fn show_status(id_str: &str) -> Result<()> {
    let orchestration_id = Uuid::parse_str(id_str)
        .with_context(|| format!("Invalid orchestration ID: {}", id_str))?;

    let state = build_state()?;
    let store = state.coordinator.store();

    let tenant = store
        .find_tenant(orchestration_id)
        .await?
        .with_context(|| format!("Orchestration not found: {}", orchestration_id))?;

    println!("Orchestration ID: {}", orchestration_id);
    println!("Tenant: {}", tenant);
    if let Some(current) = store.load_state(&tenant, orchestration_id).await? {
        println!("State: {:?}", current);
    }

    if let Some(result) = store.load_result(&tenant, orchestration_id).await? {
        println!("Completed: {}", result.completed_at);
        println!("Duration: {}ms", result.total_duration_ms);
        println!(
            "Decision: {:?} (confidence {:.2})",
            result.decision.status, result.decision.confidence
        );
        println!("\nTask results:");
        let mut ids: Vec<_> = result.task_results.keys().collect();
        ids.sort();
        for id in ids {
            let task = &result.task_results[id];
            print!("  {} - {:?}", id, task.status);
            if task.retry_count > 0 {
                print!(" ({} retries)", task.retry_count);
            }
            if let Some(error) = &task.error {
                print!(": {}", error);
            }
            println!();
        }
    }

    Ok(())
}

/// List orchestration ids recorded for a tenant
async fn list_orchestrations(tenant_id: &str) -> Result<()> {
    let state = build_state()?;
    let store = state.coordinator.store();

    let ids = store.list(tenant_id).await?;
    if ids.is_empty() {
        println!("No orchestrations recorded for tenant '{}'", tenant_id);
        return Ok(());
    }

    for id in ids {
        let current = store.load_state(tenant_id, id).await?;
        match current {
            Some(s) => println!("{}  {:?}", id, s),
            None => println!("{}", id),
        }
    }

    Ok(())
}

/// Run the HTTP server until ctrl-c
async fn serve(address: &str) -> Result<()> {
    let addr: SocketAddr = address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", address))?;

    let state = build_state()?;
    cancel_on_ctrl_c(state.shutdown.clone());
    server::serve(state, addr).await
}

/// Show criteria as stored, bypassing the cache
async fn show_criteria(criteria_id: &str) -> Result<()> {
    let state = build_state()?;
    match state.criteria.fetch_uncached(criteria_id).await? {
        Some(criteria) => {
            println!("{}", serde_yaml::to_string(&criteria)?);
            Ok(())
        }
        None => anyhow::bail!("Criteria not found: {}", criteria_id),
    }
}

/// Create or replace criteria from a YAML file
async fn apply_criteria(path: &PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read criteria file: {}", path.display()))?;
    let criteria = ReviewCriteria::from_yaml(&content)?;

    let state = build_state()?;
    let id = criteria.id.clone();
    let version = criteria.version;
    state.criteria.put(criteria).await?;

    println!("Applied criteria '{}' (version {})", id, version);
    Ok(())
}

/// Print the resolved configuration
fn show_config() -> Result<()> {
    let config = config::config()?;

    println!("Maestro home: {}", config::maestro_home()?.display());
    match &config.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none found, using defaults)"),
    }
    println!("Orchestrations: {}", config::orchestrations_dir()?.display());
    println!("Criteria: {}", config::criteria_dir()?.display());
    println!("\nEngine:");
    println!(
        "  default_task_timeout_ms: {}",
        config.engine.default_task_timeout_ms
    );
    println!("  criteria_ttl_seconds: {}", config.engine.criteria_ttl_seconds);
    println!("  review_retry_limit: {}", config.engine.review_retry_limit);

    if config.executors.is_empty() {
        println!("\nExecutors: (none configured)");
    } else {
        println!("\nExecutors:");
        for executor in &config.executors {
            println!(
                "  {} -> {} {}",
                executor.name,
                executor.command,
                executor.args.join(" ")
            );
        }
    }

    Ok(())
}
