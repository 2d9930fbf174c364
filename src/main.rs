use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use console::style;
use kumitate::logging::{LogLevel, init_logging};
use kumitate::{Config, Preset, RunError, Status, TaskGraph};

/// Front-end asset pipeline driven by a task graph.
#[derive(Debug, Clone, Parser)]
#[command(name = "kumitate", version, about, long_about = None)]
struct Args {
    /// Tasks to run, one after another.
    #[arg(default_value = "default")]
    tasks: Vec<String>,

    /// Path to the config file (TOML).
    ///
    /// Default: `kumitate.toml` in the current directory, when present.
    #[arg(long, value_name = "PATH")]
    config: Option<Utf8PathBuf>,

    /// Task set to register.
    #[arg(long, value_enum, default_value_t = Preset::Standard)]
    preset: Preset,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `KUMITATE_LOG` or `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Print the registered tasks and the run order of the requested ones.
    #[arg(long)]
    list: bool,

    /// Print the task graph as a Mermaid diagram.
    #[arg(long)]
    graph: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log_level) {
        eprintln!("couldn't initialise logging: {e}");
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), RunError> {
    let config = Arc::new(Config::load(args.config.as_deref())?);
    let graph = args.preset.graph(config)?;

    if args.graph {
        print!("{graph}");
        return Ok(());
    }

    if args.list {
        list(&graph, &args.tasks)?;
        return Ok(());
    }

    for task in &args.tasks {
        match graph.run(task).await? {
            Status::Done => tracing::info!("finished '{}'", style(task).green()),
            Status::Degraded => tracing::warn!("finished '{}' with errors", style(task).yellow()),
        }
    }

    Ok(())
}

fn list(graph: &TaskGraph, tasks: &[String]) -> Result<(), RunError> {
    println!("Tasks:");
    for name in graph.names() {
        println!("  {name}");
    }

    for task in tasks {
        let plan = graph.plan(task)?;
        println!("\nRun order for '{task}':");
        for (i, name) in plan.iter().enumerate() {
            println!("  {:>2}. {name}", i + 1);
        }
    }

    Ok(())
}
