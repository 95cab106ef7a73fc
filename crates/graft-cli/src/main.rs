//! Graft CLI - run rewrite passes over graph listings, verify and visualize them.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graft_cli::RunOptions;
use graft_cli::inspect::{inspect_nodes, op_histogram, primal_summary};
use graft_cli::listing::{load_graph, save_graph};
use graft_core::GraphModule;
use graft_passes::PASS_NAMES;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graft")]
#[command(about = "Peephole rewrite passes for traced training graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// Log pass decisions (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run rewrite passes over a graph listing
    Run {
        /// Path to the JSON graph listing
        #[arg(value_name = "GRAPH")]
        graph: PathBuf,

        /// Pass to run (can be repeated; runs in the given order)
        #[arg(short, long = "pass", value_name = "NAME", required = true)]
        passes: Vec<String>,

        /// Repeat the passes until the graph stops changing, at most N rounds
        #[arg(long, value_name = "N")]
        fixpoint: Option<usize>,

        /// Keep the last assignment when a primal input is assigned twice
        #[arg(long)]
        allow_duplicate_assignments: bool,

        /// Write the rewritten graph as a JSON listing (defaults to printing the program)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Verify the structure of a graph listing
    Lint {
        /// Path to the JSON graph listing
        #[arg(value_name = "GRAPH")]
        graph: PathBuf,
    },
    /// Generate a Graphviz DOT file from a graph listing
    Dot {
        /// Path to the JSON graph listing
        #[arg(value_name = "GRAPH")]
        graph: PathBuf,

        /// Output file path (defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Inspect nodes of a graph listing
    Inspect {
        /// Path to the JSON graph listing
        #[arg(value_name = "GRAPH")]
        graph: PathBuf,

        /// Node names to describe (summarizes the graph when omitted)
        #[arg(value_name = "NODE")]
        nodes: Vec<String>,
    },
    /// List the available passes
    Passes,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            graph,
            passes,
            fixpoint,
            allow_duplicate_assignments,
            output,
        } => {
            let options = RunOptions {
                passes,
                fixpoint,
                allow_duplicate_assignments,
            };
            cmd_run(graph, &options, output)?;
        }
        Commands::Lint { graph } => {
            cmd_lint(graph)?;
        }
        Commands::Dot { graph, output } => {
            cmd_dot(graph, output)?;
        }
        Commands::Inspect { graph, nodes } => {
            cmd_inspect(graph, &nodes)?;
        }
        Commands::Passes => {
            for name in PASS_NAMES {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`) unless `--verbose`.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run passes and emit the rewritten graph.
fn cmd_run(graph_path: PathBuf, options: &RunOptions, output_path: Option<PathBuf>) -> Result<()> {
    let graph = load_graph(&graph_path)?;
    let before = graph.node_count();
    let mut module = GraphModule::new(graph);

    let changed = options
        .apply(&mut module)
        .with_context(|| format!("Failed to rewrite {}", graph_path.display()))?;

    eprintln!(
        "{} nodes -> {} nodes ({})",
        before,
        module.graph().node_count(),
        if changed { "changed" } else { "unchanged" }
    );

    if let Some(output_path) = output_path {
        save_graph(module.graph(), &output_path)?;
        eprintln!("Wrote graph listing to {}", output_path.display());
    } else {
        print!("{}", module.code());
    }

    Ok(())
}

/// Verify a graph listing.
fn cmd_lint(graph_path: PathBuf) -> Result<()> {
    // Loading already lints.
    let graph = load_graph(&graph_path)?;
    println!("{}: ok ({} nodes)", graph_path.display(), graph.node_count());
    Ok(())
}

/// Generate DOT format from a graph listing.
fn cmd_dot(graph_path: PathBuf, output_path: Option<PathBuf>) -> Result<()> {
    let graph = load_graph(&graph_path)?;
    let dot = graft_core::to_dot(&graph);

    // Write to output (file or stdout)
    if let Some(output_path) = output_path {
        std::fs::write(&output_path, dot)
            .with_context(|| format!("Failed to write DOT output to {}", output_path.display()))?;
        eprintln!("Wrote DOT output to {}", output_path.display());
    } else {
        print!("{}", dot);
    }

    Ok(())
}

/// Describe nodes, or summarize the whole graph.
fn cmd_inspect(graph_path: PathBuf, nodes: &[String]) -> Result<()> {
    let graph = load_graph(&graph_path)?;

    if !nodes.is_empty() {
        print!("{}", inspect_nodes(&graph, nodes)?);
        return Ok(());
    }

    println!("Nodes: {}", graph.node_count());
    println!("Operations:");
    for (op, count) in op_histogram(&graph) {
        println!("  {:<24} {}", op, count);
    }
    println!("Primal inputs:");
    for (name, assigned) in primal_summary(&graph) {
        println!("  {}{}", name, if assigned { " (assigned)" } else { "" });
    }

    Ok(())
}
