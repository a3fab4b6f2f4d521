//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use fsledger::core::config::Config;
use fsledger::core::errors::{ErrorClass, FslError};
use fsledger::core::paths::resolve_root_path;
use fsledger::daemon::loop_main::Daemon;
use fsledger::daemon::worker::WorkerRecord;
use fsledger::daemon::worker_config::{JsonWorkerConfigStore, WorkerConfigStore};
use fsledger::ledger::Block;
use fsledger::replica::ChainStore;
use fsledger::scanner::Blockmap;

/// fsledger: filesystem fingerprints committed to a hash-chained ledger.
#[derive(Debug, Parser)]
#[command(
    name = "fsledger",
    author,
    version,
    about = "Filesystem integrity ledger daemon",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the daemon in the foreground.
    Daemon,
    /// Manage registered workers (edits workers.json).
    Worker(WorkerArgs),
    /// Inspect the local chain replica.
    Chain(ChainArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct WorkerArgs {
    #[command(subcommand)]
    command: WorkerCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum WorkerCommand {
    /// Register a root path for periodic fingerprinting.
    Add(WorkerAddArgs),
    /// Unregister the worker at INDEX.
    Remove {
        #[arg(value_name = "INDEX")]
        index: usize,
    },
    /// List registered workers.
    List,
    /// Show the worker at INDEX.
    Show {
        #[arg(value_name = "INDEX")]
        index: usize,
    },
}

#[derive(Debug, Clone, Args)]
struct WorkerAddArgs {
    /// Directory to fingerprint.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Milliseconds between generations.
    #[arg(long, default_value_t = 60_000, value_name = "MS")]
    period_ms: u64,
    /// Subtree to skip; relative paths resolve against ROOT. Repeatable.
    #[arg(long = "ignore", value_name = "PATH")]
    ignore: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ChainArgs {
    #[command(subcommand)]
    command: ChainCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum ChainCommand {
    /// Local replica length and head.
    Status,
    /// Validate every block of the local replica.
    Verify,
    /// Print one block.
    Show {
        #[arg(value_name = "INDEX")]
        index: u64,
    },
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

impl From<FslError> for CliError {
    fn from(err: FslError) -> Self {
        match err.class() {
            ErrorClass::Configuration | ErrorClass::Validation => Self::User(err.to_string()),
            ErrorClass::Internal => Self::Internal(err.to_string()),
            ErrorClass::Divergence | ErrorClass::Transient | ErrorClass::Scheduling => {
                Self::Runtime(err.to_string())
            }
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon => run_daemon(cli),
        Command::Worker(args) => run_worker(cli, args),
        Command::Chain(args) => run_chain(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let mut daemon = Daemon::init(config)?;
    daemon.run()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// worker
// ---------------------------------------------------------------------------

fn run_worker(cli: &Cli, args: &WorkerArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = JsonWorkerConfigStore::new(config.paths.workers_file.clone());
    let mut workers = store.read_config()?;
    let mode = output_mode(cli);

    match &args.command {
        WorkerCommand::Add(add) => {
            if add.period_ms == 0 {
                return Err(CliError::User("--period-ms must be greater than zero".to_string()));
            }
            let root = resolve_root_path(&add.root);
            if !root.is_dir() {
                eprintln!(
                    "warning: {} is not a directory yet; the worker will fail until it exists",
                    root.display()
                );
            }
            let record = WorkerRecord::new(root, add.period_ms, add.ignore.clone());
            workers.workers.push(record.clone());
            store.write_config(&workers)?;
            let index = workers.workers.len() - 1;
            match mode {
                OutputMode::Human => {
                    println!("{} worker {index} ({})", "added".green(), record.id);
                    print_worker_human(index, &record);
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "worker add",
                    "index": index,
                    "worker": serde_json::to_value(&record)?,
                }))?,
            }
        }
        WorkerCommand::Remove { index } => {
            let len = workers.workers.len();
            if *index >= len {
                return Err(FslError::IndexOutOfBounds { index: *index, len }.into());
            }
            let record = workers.workers.remove(*index);
            store.write_config(&workers)?;
            match mode {
                OutputMode::Human => println!(
                    "{} worker {index} ({}, {})",
                    "removed".yellow(),
                    record.id,
                    record.root_path.display()
                ),
                OutputMode::Json => write_json_line(&json!({
                    "command": "worker remove",
                    "index": index,
                    "worker": serde_json::to_value(&record)?,
                }))?,
            }
        }
        WorkerCommand::List => match mode {
            OutputMode::Human => {
                if workers.workers.is_empty() {
                    println!("No workers registered ({}).", store.path().display());
                }
                for (index, record) in workers.workers.iter().enumerate() {
                    print_worker_human(index, record);
                }
            }
            OutputMode::Json => write_json_line(&json!({
                "command": "worker list",
                "workers": serde_json::to_value(&workers.workers)?,
            }))?,
        },
        WorkerCommand::Show { index } => {
            let record = workers.workers.get(*index).ok_or(FslError::IndexOutOfBounds {
                index: *index,
                len: workers.workers.len(),
            })?;
            match mode {
                OutputMode::Human => print_worker_human(*index, record),
                OutputMode::Json => write_json_line(&json!({
                    "command": "worker show",
                    "index": index,
                    "worker": serde_json::to_value(record)?,
                }))?,
            }
        }
    }
    Ok(())
}

fn print_worker_human(index: usize, record: &WorkerRecord) {
    println!("[{index}] {}", record.root_path.display().to_string().bold());
    println!("    id:     {}", record.id);
    println!("    period: {}ms", record.generation_period_ms);
    for ignored in &record.ignore_paths {
        println!("    ignore: {}", ignored.display());
    }
}

// ---------------------------------------------------------------------------
// chain
// ---------------------------------------------------------------------------

fn run_chain(cli: &Cli, args: &ChainArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let store = ChainStore::new(config.paths.chain_dir.clone());
    let mode = output_mode(cli);

    match &args.command {
        ChainCommand::Status => {
            let length = store.contiguous_length()?;
            let head = if length == 0 {
                None
            } else {
                Some(store.read_head()?)
            };
            match mode {
                OutputMode::Human => {
                    println!("Chain dir: {}", store.dir().display());
                    println!("  Length:  {length}");
                    if let Some(head) = &head {
                        println!("  Head:    #{} {}", head.index, head.short_hash());
                        println!("  Time:    {}", format_timestamp(head.timestamp));
                    } else {
                        println!("  Head:    (empty; run the daemon to sync)");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "chain status",
                    "chain_dir": store.dir().to_string_lossy(),
                    "length": length,
                    "head_index": head.as_ref().map(|b| b.index),
                    "head_hash": head.as_ref().map(|b| hex::encode(&b.block_hash)),
                }))?,
            }
        }
        ChainCommand::Verify => {
            let outcome = store.load_chain();
            let payload = match &outcome {
                Ok(chain) => json!({
                    "command": "chain verify",
                    "valid": true,
                    "length": chain.len(),
                }),
                Err(err) => json!({
                    "command": "chain verify",
                    "valid": false,
                    "code": err.code(),
                    "error": err.to_string(),
                }),
            };
            match mode {
                OutputMode::Human => match &outcome {
                    Ok(chain) => println!("{} {} block(s)", "valid".green(), chain.len()),
                    Err(err) => eprintln!("{} {err}", "INVALID".red()),
                },
                OutputMode::Json => write_json_line(&payload)?,
            }
            outcome?;
        }
        ChainCommand::Show { index } => {
            let block = store.read_block(*index)?;
            match mode {
                OutputMode::Human => print_block_human(&block),
                OutputMode::Json => write_json_line(&json!({
                    "command": "chain show",
                    "block": serde_json::to_value(&block)?,
                }))?,
            }
        }
    }
    Ok(())
}

fn print_block_human(block: &Block) {
    println!("Block #{}", block.index);
    println!("  Time:    {}", format_timestamp(block.timestamp));
    println!("  Hash:    {}", hex::encode(&block.block_hash));
    println!("  Parent:  {}", hex::encode(&block.parent_hash));
    println!("  Payload: {} bytes", block.payload.len());
    if block.is_genesis() {
        return;
    }
    match Blockmap::from_payload(&block.payload) {
        Ok(map) => {
            println!("  Root:    {}", map.root_path);
            println!("  Files:   {}", map.entries.len());
            if !map.errors.is_empty() {
                println!("  Errors:  {}", map.errors.len().to_string().yellow());
            }
        }
        Err(_) => println!("  (payload is not a blockmap)"),
    }
}

fn format_timestamp(unix_secs: i64) -> String {
    chrono::DateTime::from_timestamp(unix_secs, 0)
        .map_or_else(|| unix_secs.to_string(), |at| at.to_rfc3339())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": exists,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config show",
                    "config": serde_json::to_value(&config)?,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is {}.", "valid".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": true,
                        "path": config.paths.config_file.to_string_lossy(),
                        "hash": hash,
                    }))?,
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is {}: {e}", "INVALID".red()),
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": false,
                        "error": e.to_string(),
                    }))?,
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// output
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("FSL_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "fsledger",
            "--config",
            "/tmp/fsledger.toml",
            "--json",
            "--no-color",
            "worker",
            "list",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["fsledger", "chain", "status", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["fsledger", "daemon"],
            vec!["fsledger", "worker", "add", "/data", "--period-ms", "5000"],
            vec!["fsledger", "worker", "add", "/data", "--ignore", "tmp", "--ignore", "cache"],
            vec!["fsledger", "worker", "remove", "0"],
            vec!["fsledger", "worker", "show", "2"],
            vec!["fsledger", "chain", "verify"],
            vec!["fsledger", "chain", "show", "12"],
            vec!["fsledger", "config"],
            vec!["fsledger", "config", "validate"],
            vec!["fsledger", "completions", "zsh"],
        ];
        for case in cases {
            assert!(Cli::try_parse_from(case.clone()).is_ok(), "failed to parse: {case:?}");
        }
    }

    #[test]
    fn worker_index_must_be_numeric() {
        assert!(Cli::try_parse_from(["fsledger", "worker", "remove", "first"]).is_err());
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("bogus"), false), OutputMode::Json);
    }

    #[test]
    fn error_classes_map_to_exit_codes() {
        let user: CliError = FslError::IndexOutOfBounds { index: 4, len: 1 }.into();
        assert_eq!(user.exit_code(), 1);
        let runtime: CliError = FslError::SyncFailed {
            details: "offline".to_string(),
        }
        .into();
        assert_eq!(runtime.exit_code(), 2);
        let internal: CliError = FslError::Runtime {
            details: "bug".to_string(),
        }
        .into();
        assert_eq!(internal.exit_code(), 3);
    }
}
