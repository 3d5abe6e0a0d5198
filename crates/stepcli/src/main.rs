// crates/stepcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stepcore::{NodeMessage, Payload, RunEvent, RunStatus, WorkflowDefinition};
use stepruntime::{RuntimeConfig, StepRuntime};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow-step")]
#[command(about = "Step engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial payload as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Number of workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Write the user onboarding workflow to a file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            workers,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_workflow(&file, input, workers).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_onboarding_workflow(&output)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid workflow JSON in {}", file.display()))
}

fn parse_input(input: Option<String>) -> Result<Payload> {
    let Some(text) = input else {
        return Ok(Payload::new());
    };
    match serde_json::from_str(&text)? {
        serde_json::Value::Object(payload) => Ok(payload),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(file: &Path, input: Option<String>, workers: Option<usize>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let definition = load_workflow(file)?;
    let payload = parse_input(input)?;

    println!("📋 Workflow: {}", definition.name);
    println!("   Nodes: {}", definition.nodes.len());
    println!("   Start: {}", definition.start_at);
    println!();

    let mut config = RuntimeConfig::from_env();
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }

    let registry = Arc::new(stepnodes::standard_registry());
    let runtime = StepRuntime::from_config(registry, config).await?;
    let workflow_id = runtime.engine().register_workflow(definition).await?;
    let run_id = uuid::Uuid::new_v4().to_string();

    // Subscribe before starting so no event of this run is missed
    let mut events = runtime.subscribe_events();
    let watched = run_id.clone();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.run_id() != watched {
                continue;
            }
            match event {
                RunEvent::RunStarted { workflow_id, .. } => {
                    println!("▶️  Run started ({})", workflow_id);
                }
                RunEvent::StepStarted { node_id, node_kind, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_kind);
                }
                RunEvent::StepCompleted { node_id, next_node, duration_ms, .. } => match next_node {
                    Some(next) => println!("  ✅ Node {} completed in {}ms -> {}", node_id, duration_ms, next),
                    None => println!("  ✅ Node {} completed in {}ms", node_id, duration_ms),
                },
                RunEvent::StepFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                RunEvent::NodeMessage { node_id, message, .. } => match message {
                    NodeMessage::Info { message } => println!("     ℹ️  [{}] {}", node_id, message),
                    NodeMessage::Warning { message } => println!("     ⚠️  [{}] {}", node_id, message),
                },
                RunEvent::RunFinished { status, .. } => {
                    println!("🏁 Run finished: {}", status);
                    break;
                }
            }
        }
    });

    let state = runtime.run_to_completion(&workflow_id, &run_id, payload).await?;

    if tokio::time::timeout(Duration::from_secs(1), event_task).await.is_err() {
        tracing::debug!("Event listener did not see the run finish");
    }
    runtime.shutdown().await;

    let Some(state) = state else {
        bail!("Run {} has no stored state", run_id);
    };

    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", state.run_id);
    println!("   Status: {}", state.status);
    println!("   History: {}", state.history.join(" -> "));
    if let Some(error) = &state.error {
        println!("   Error: {}", error);
    }
    if state.status == RunStatus::Stuck {
        if let Some(step) = &state.current_step {
            println!("   Stuck at: {}", step);
        }
    }

    println!();
    println!("📤 Payload:");
    println!("{}", serde_json::to_string_pretty(&state.payload)?);

    if state.status != RunStatus::Completed {
        bail!("Run ended with status {}", state.status);
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let definition = load_workflow(file)?;
    let registry = stepnodes::standard_registry();
    let compiled = registry.compile(definition)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", compiled.name());
    println!("   Nodes: {}", compiled.definition().nodes.len());
    println!("   Start: {}", compiled.start_at());

    let unreachable = compiled.unreachable_nodes();
    if !unreachable.is_empty() {
        println!("⚠️  Unreachable nodes: {}", unreachable.join(", "));
    }
    match compiled.reaches_end() {
        Some(true) => {}
        Some(false) => println!("⚠️  No End node is reachable from {}", compiled.start_at()),
        None => println!("   Agent routes are not declared; End reachability unknown"),
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = stepnodes::standard_registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} [{}] ({})", node_type, metadata.kind, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_onboarding_workflow(output: &Path) -> Result<()> {
    let workflow = stepnodes::onboarding_workflow();

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created onboarding workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow-step run --file {} --input '{{\"source\": \"web_signup\"}}'",
        output.display()
    );

    Ok(())
}
