use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use taskdeck_cli::cli::{execute, watch, CliCommand, CliConfig};
use taskdeck_core::tracing_setup::init_tracing_with_service;
use taskdeck_core::TaskRuntime;

#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(about = "Manage your task list from the terminal")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Path to JSON config file (contains apiUrl, token, timeoutSecs)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// REST backend base URL
    #[arg(long, env = "TASKDECK_API_URL")]
    api_url: Option<String>,

    /// Session access token
    #[arg(long, env = "TASKDECK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log debug output to stderr
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks
    List {
        /// Case-insensitive title substring
        #[arg(long, short)]
        search: Option<String>,
        /// name, status or created_at (default)
        #[arg(long)]
        sort: Option<String>,
        /// all (default), complete or incomplete
        #[arg(long)]
        status: Option<String>,
    },

    /// Create a task
    Add {
        /// Task title
        title: String,
        /// Optional longer description
        #[arg(long, short)]
        description: Option<String>,
    },

    /// Change a task's title or description
    Edit {
        /// Task ID
        id: String,
        #[arg(long, short)]
        title: Option<String>,
        #[arg(long, short)]
        description: Option<String>,
    },

    /// Mark tasks complete
    Done {
        /// Task IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Mark tasks incomplete
    Undo {
        /// Task IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Delete tasks
    Rm {
        /// Task IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Show total, complete and incomplete counts
    Count,

    /// Follow changes made elsewhere, one JSON line each, until Ctrl+C
    Watch,
}

impl Commands {
    /// `None` for the streaming `watch` command.
    fn into_one_shot(self) -> Option<CliCommand> {
        Some(match self {
            Commands::List { search, sort, status } => CliCommand::List { search, sort, status },
            Commands::Add { title, description } => CliCommand::Add { title, description },
            Commands::Edit { id, title, description } => CliCommand::Edit { id, title, description },
            Commands::Done { ids } => CliCommand::Done { ids },
            Commands::Undo { ids } => CliCommand::Undo { ids },
            Commands::Rm { ids } => CliCommand::Rm { ids },
            Commands::Count => CliCommand::Count,
            Commands::Watch => return None,
        })
    }
}

fn render(value: &Value, pretty: bool) -> String {
    if pretty {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    init_tracing_with_service("taskdeck-cli", if cli.verbose { "debug" } else { "warn" })?;

    let config = CliConfig::load_or_default(cli.config.as_deref())?.with_overrides(cli.api_url, cli.token);
    let mut runtime = TaskRuntime::connect(&config.core_config()).context("Failed to build HTTP client")?;

    let pretty = cli.pretty;
    let result = match cli.command.into_one_shot() {
        Some(command) => execute(&runtime.handle(), command)
            .await
            .map(|output| println!("{}", render(&output, pretty))),
        None => {
            let stop = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            watch(&mut runtime, stop, |line| println!("{}", render(&line, pretty))).await
        }
    };
    runtime.shutdown().await;
    result
}
