mod app;
mod cmd;
mod output;
mod root;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use cmd::{
    enqueue::EnqueueArgs, pending::PendingSubcommand, queue::QueueSubcommand,
    workflow::RunWorkflowArgs,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "custodian",
    about = "Identity lifecycle scheduler: dual-source triggers, guarded workflows, durable queues",
    version,
    propagate_version = true
)]
struct Cli {
    /// Working root (default: nearest directory holding custodian.yaml)
    #[arg(long, global = true, env = "CUSTODIAN_ROOT")]
    root: Option<PathBuf>,

    /// Settings file (default: <root>/custodian.yaml when present)
    #[arg(long, global = true, env = "CUSTODIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a manual onboarding request
    EnqueueRequest(EnqueueArgs),

    /// Run the scheduler loop (Ctrl-C stops it between steps)
    RunScheduler {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,

        /// Evaluate triggers as of this date (YYYY-MM-DD); only with --once
        #[arg(long, requires = "once")]
        date: Option<NaiveDate>,
    },

    /// Run one workflow for one identity
    RunWorkflow(RunWorkflowArgs),

    /// Check workflows, bindings, policy and required settings
    Preflight,

    /// Inspect and repair the manual override queue
    Queue {
        #[command(subcommand)]
        subcommand: QueueSubcommand,
    },

    /// Inspect staged offboarding actions
    Pending {
        #[command(subcommand)]
        subcommand: PendingSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::RunScheduler { .. } | Commands::RunWorkflow(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = app::App::load(&root, cli.config.as_deref()).and_then(|app| match cli.command {
        Commands::EnqueueRequest(args) => cmd::enqueue::run(&app, args, cli.json),
        Commands::RunScheduler { once, date } => cmd::scheduler::run(&app, once, date, cli.json),
        Commands::RunWorkflow(args) => cmd::workflow::run(&app, args, cli.json),
        Commands::Preflight => cmd::preflight::run(&app, cli.json),
        Commands::Queue { subcommand } => cmd::queue::run(&app, subcommand, cli.json),
        Commands::Pending { subcommand } => cmd::pending::run(&app, subcommand, cli.json),
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
