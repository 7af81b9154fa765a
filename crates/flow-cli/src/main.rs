use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flow_graph::{
    validate_flow, ExecutionPathResolver, FlowGraph, FlowGraphConfig, FlowStore, SubFlowFlattener,
    TaskDescriptor,
};
use serde_json::json;

/// Inspect persisted flows from the command line
#[derive(Parser, Debug)]
#[command(name = "flowctl", author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON); defaults apply when absent
    #[arg(short, long, global = true, default_value = "flowctl.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the flows stored in the configured store directory
    List,
    /// Report structural problems in a flow
    Validate {
        /// Path to the flow file
        file: PathBuf,

        /// Version index; the current version when omitted
        #[arg(long)]
        version: Option<usize>,
    },
    /// Expand every collapsed sub-flow and print the flat graph
    Flatten {
        /// Path to the flow file
        file: PathBuf,

        /// Version index; the current version when omitted
        #[arg(long)]
        version: Option<usize>,
    },
    /// Resolve the execution path a task would take
    Path {
        /// Path to the flow file
        file: PathBuf,

        /// Task type matched against starting nodes
        #[arg(short, long)]
        task_type: String,

        /// Source identifier correlated with the task
        #[arg(short, long)]
        source_id: Option<String>,

        /// Version index; the current version when omitted
        #[arg(long)]
        version: Option<usize>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let config = FlowGraphConfig::load(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;

    match args.command {
        Commands::List => {
            let dir = config
                .store_path
                .as_deref()
                .context("no store_path configured")?;
            let mut store = FlowStore::with_persistence(dir);
            let count = store
                .load_from_disk()
                .with_context(|| format!("reading store {}", dir.display()))?;
            log::info!("Loaded {} flow(s) from {}", count, dir.display());
            println!("{}", serde_json::to_string_pretty(&store.list())?);
        }
        Commands::Validate { file, version } => {
            let graph = load_version(&file, version)?;
            let errors = validate_flow(&graph);
            let report = json!({
                "valid": errors.is_empty(),
                "errors": errors
                    .iter()
                    .map(|e| json!({ "message": e.to_string(), "detail": e }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !errors.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::Flatten { file, version } => {
            let graph = load_version(&file, version)?;
            let outcome = SubFlowFlattener::new()
                .with_max_passes(config.max_flatten_passes)
                .flatten(&graph)?;
            log::info!(
                "Expanded {} sub-flow(s) in {} pass(es)",
                outcome.expanded.len(),
                outcome.passes
            );
            println!("{}", serde_json::to_string_pretty(&outcome.graph)?);
        }
        Commands::Path {
            file,
            task_type,
            source_id,
            version,
        } => {
            let graph = load_version(&file, version)?;
            let flat = SubFlowFlattener::new()
                .with_max_passes(config.max_flatten_passes)
                .flatten(&graph)?
                .graph;

            let mut task = TaskDescriptor::new("cli", task_type);
            task.source_id = source_id;

            let mut resolver = ExecutionPathResolver::with_graph(flat);
            let result = resolver.visualize_flow(&task);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_version(file: &Path, version: Option<usize>) -> Result<FlowGraph> {
    let doc = FlowStore::read_file(file).with_context(|| format!("loading flow {}", file.display()))?;
    let index = version.unwrap_or(doc.current_version_index);
    let graph = doc.version(index)?.clone();
    log::info!(
        "Flow '{}' version {}: {} nodes, {} edges",
        doc.id,
        index,
        graph.nodes.len(),
        graph.edges.len()
    );
    Ok(graph)
}
