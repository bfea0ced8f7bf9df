// crates/cli/src/main.rs
mod scenarios;

use std::time::Duration;

use clap::{Parser, Subcommand};
use jobtree_core::JobsConfig;
use jobtree_observability::{LogConfig, LogFormat};

use crate::scenarios::{Coalescing, Report};

#[derive(Parser)]
#[command(name = "jobtree", about = "Run cancellable job scenarios and print what happened")]
struct Cli {
    /// Log output format (plain or json).
    #[arg(long, global = true, default_value = "plain")]
    log_format: LogFormat,

    /// Log filter directives. `RUST_LOG` takes precedence.
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Let job panics reach the runtime after the job has settled.
    #[arg(long, global = true)]
    propagate_panics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a parent with ticking children, then cancel the parent.
    Tree {
        /// Children started by the parent.
        #[arg(long, default_value_t = 3)]
        children: usize,

        /// Milliseconds before the parent is cancelled.
        #[arg(long, default_value_t = 35)]
        cancel_after_ms: u64,

        /// Milliseconds between child ticks.
        #[arg(long, default_value_t = 10)]
        tick_ms: u64,
    },

    /// Call a wrapped slow job repeatedly through one combinator.
    Calls {
        #[arg(value_enum)]
        policy: Coalescing,

        /// Number of calls.
        #[arg(long, default_value_t = 5)]
        calls: u32,

        /// Milliseconds between calls.
        #[arg(long, default_value_t = 20)]
        gap_ms: u64,

        /// Throttle/debounce window in milliseconds.
        #[arg(long, default_value_t = 50)]
        window_ms: u64,

        /// Milliseconds each job takes.
        #[arg(long, default_value_t = 30)]
        work_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    jobtree_observability::init(&LogConfig {
        filter: cli.log_filter.clone(),
        format: cli.log_format,
    })?;

    let config = JobsConfig::default()
        .with_label("cli")
        .with_catch_panics(!cli.propagate_panics);

    let report: Report = match cli.command {
        Commands::Tree {
            children,
            cancel_after_ms,
            tick_ms,
        } => {
            scenarios::tree(
                &config,
                children,
                Duration::from_millis(tick_ms),
                Duration::from_millis(cancel_after_ms),
            )
            .await
        }
        Commands::Calls {
            policy,
            calls,
            gap_ms,
            window_ms,
            work_ms,
        } => {
            scenarios::calls(
                &config,
                policy,
                calls,
                Duration::from_millis(gap_ms),
                Duration::from_millis(window_ms),
                Duration::from_millis(work_ms),
            )
            .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
