//! Davlock CLI - drive the WebDAV lock manager from scripts or a shell

mod script;

use anyhow::Context;
use clap::{Parser, Subcommand};
use davlock_core::config::Config;
use davlock_core::domain::locking::LockManager;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use script::{Outcome, Session};

#[derive(Parser)]
#[command(name = "davlock")]
#[command(author, version, about = "Hierarchical WebDAV lock manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log lock activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a lock script against a fresh lock manager
    Run {
        /// Script file, one command per line
        script: PathBuf,
    },

    /// Interactive lock shell
    Shell,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
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
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "davlock=debug" } else { "davlock=warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?),
        )
        .init();

    match cli.command {
        Commands::Run { script } => cmd_run(&script, cli.format).await,
        Commands::Shell => cmd_shell(cli.format, cli.quiet).await,
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn new_session() -> anyhow::Result<(Session, Arc<LockManager>)> {
    let config = Config::load()?;
    let manager = Arc::new(LockManager::from_config(&config)?);
    debug!(config = ?manager.config(), "Lock manager created");
    let session = Session::new(Arc::clone(&manager), config.server.context_path);
    Ok((session, manager))
}

fn print_outcome(outcome: &Outcome, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => println!("{}", outcome),
        OutputFormat::Json => println!("{}", serde_json::to_string(outcome)?),
    }
    Ok(())
}

async fn cmd_run(script: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read script: {}", script.display()))?;
    let (mut session, _manager) = new_session()?;

    for (index, line) in contents.lines().enumerate() {
        let outcome = session
            .execute(line)
            .await
            .with_context(|| format!("{}:{}: {}", script.display(), index + 1, line.trim()))?;
        if let Some(outcome) = outcome {
            print_outcome(&outcome, format)?;
        }
    }
    Ok(())
}

async fn cmd_shell(format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let (mut session, manager) = new_session()?;
    let sweeper = manager.spawn_sweeper();
    let mut editor = DefaultEditor::new()?;

    if !quiet {
        println!("Davlock lock shell. Type `exit` or press Ctrl-D to quit.");
        println!("Commands: lock, unlock, refresh, show, discover, list, sweep, clean, authorize, sleep");
    }

    loop {
        let line = match editor.readline("davlock> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }
        editor.add_history_entry(trimmed)?;

        match session.execute(trimmed).await {
            Ok(Some(outcome)) => print_outcome(&outcome, format)?,
            Ok(None) => {}
            Err(e) => eprintln!("error: {:#}", e),
        }
    }

    sweeper.shutdown();
    info!("Lock shell closed");
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
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
