//! Argument parsing and command dispatch for the `ferry` binary.
//!
//! # Design
//! - Each invocation builds an in-process agent, submits exactly one task, and waits for it.
//! - The finished task is printed to stdout; logs go to stderr.
//! - The process exits with the task's exit code; CLI-level errors use 2 (validation)
//!   and 3 (failure).

use std::collections::BTreeMap;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ferry_config::{AgentConfig, ConfigError};
use ferry_core::{Agent, CommandRequest, CoreError, Endpoint, TaskId, TransferRequest};
use ferry_repo::FileRef;
use ferry_telemetry::{GlobalContextGuard, LoggingConfig, Metrics, init_logging};
use tracing::{info, warn};
use url::Url;

use crate::error::{CliError, CliResult, EXIT_NO_STATUS};
use crate::output::{metrics_dump, render_task};

/// Parses CLI arguments, runs the requested task, and returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn execute(cli: Cli) -> CliResult<i32> {
    let config = ferry_config::load_from_env().map_err(|err| config_error(&err))?;
    init_logging(&LoggingConfig {
        level: &config.log.level,
        format: config.log.format,
        ..LoggingConfig::default()
    })
    .context("failed to initialise logging")
    .map_err(CliError::failure)?;
    let _context = GlobalContextGuard::new("cli");

    let agent = build_agent(&config)?;
    let id = match cli.command {
        Command::Exec(args) => agent.submit_command(args.into_request()),
        Command::Xfer(args) => agent
            .submit_transfer(args.into_request())
            .map_err(|err| submit_error(&err))?,
    };

    let task = wait_or_interrupt(&agent, id).await?;
    render_task(&task, cli.output)?;
    if cli.metrics {
        eprint!("{}", metrics_dump(agent.metrics())?);
    }
    Ok(task.exit_code.unwrap_or(EXIT_NO_STATUS))
}

fn build_agent(config: &AgentConfig) -> CliResult<Agent> {
    let metrics = Metrics::new()
        .context("failed to create metrics registry")
        .map_err(CliError::failure)?;
    Agent::from_config(config, metrics)
        .context("failed to build agent")
        .map_err(CliError::failure)
}

async fn wait_or_interrupt(agent: &Agent, id: TaskId) -> CliResult<ferry_core::TaskSnapshot> {
    let mut waiter = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.wait(id).await })
    };
    let joined = tokio::select! {
        joined = &mut waiter => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!(task_id = id, "interrupted; destroying task");
            agent
                .kill(id)
                .context("failed to destroy task")
                .map_err(CliError::failure)?;
            waiter.await
        }
    };
    let task = joined
        .context("task waiter failed")
        .map_err(CliError::failure)?
        .context("task disappeared before completion")
        .map_err(CliError::failure)?;
    info!(task_id = id, exit_code = ?task.exit_code, "task complete");
    Ok(task)
}

fn config_error(err: &ConfigError) -> CliError {
    match err {
        ConfigError::InvalidField {
            field,
            reason,
            value,
        } => CliError::validation(format!("{field} {reason} (got {value:?})")),
    }
}

fn submit_error(err: &CoreError) -> CliError {
    match err {
        CoreError::UnknownKind { side, value } => {
            CliError::validation(format!("unknown {side} kind {value:?}"))
        }
        other => CliError::failure(anyhow::anyhow!("{}", ferry_core::error_chain(other))),
    }
}

#[derive(Parser)]
#[command(name = "ferry", about = "Run a command or transfer task and report the result")]
struct Cli {
    #[arg(
        long = "output",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Json,
        help = "Select how the finished task is printed"
    )]
    output: OutputFormat,
    #[arg(
        long,
        global = true,
        help = "Write Prometheus metrics to stderr once the task finishes"
    )]
    metrics: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a shell command.
    Exec(ExecArgs),
    /// Copy, extract, or expand an object between backends.
    Xfer(XferArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Json,
    Summary,
}

#[derive(Args)]
struct ExecArgs {
    #[arg(long, default_value = "", help = "Text written to the command's stdin")]
    stdin: String,
    #[arg(long, value_parser = parse_files, help = "JSON array of input file descriptors")]
    files: Option<FileList>,
    #[arg(long = "env", value_parser = parse_env_pair, help = "Extra environment as KEY=VALUE")]
    env: Vec<(String, String)>,
    #[arg(long, value_parser = parse_url)]
    notification: Option<Url>,
    #[arg(required = true, trailing_var_arg = true, num_args = 1..)]
    cmd: Vec<String>,
}

impl ExecArgs {
    fn into_request(self) -> CommandRequest {
        CommandRequest {
            cmd: self.cmd.join(" "),
            stdin: self.stdin,
            notification: self.notification,
            files: self.files.map(|list| list.0).unwrap_or_default(),
            env: self.env.into_iter().collect::<BTreeMap<_, _>>(),
        }
    }
}

#[derive(Args)]
struct XferArgs {
    #[arg(long, default_value = "")]
    tag: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "S3")]
    src_kind: String,
    #[arg(long, value_parser = parse_url)]
    src_address: Option<Url>,
    #[arg(long, default_value = "")]
    src_root: String,
    #[arg(long)]
    src_key: String,
    #[arg(long, env = "FERRY_SRC_ACCOUNT", default_value = "")]
    src_account: String,
    #[arg(long, env = "FERRY_SRC_SECRET", default_value = "", hide_env_values = true)]
    src_secret: String,
    #[arg(long, default_value = "S3")]
    dest_kind: String,
    #[arg(long, value_parser = parse_url)]
    dest_address: Option<Url>,
    #[arg(long, default_value = "")]
    dest_root: String,
    #[arg(long)]
    dest_key: String,
    #[arg(long, env = "FERRY_DEST_ACCOUNT", default_value = "")]
    dest_account: String,
    #[arg(long, env = "FERRY_DEST_SECRET", default_value = "", hide_env_values = true)]
    dest_secret: String,
    #[arg(long, value_parser = parse_url)]
    notification: Option<Url>,
    #[arg(long, help = "Skip the copy when the destination already matches")]
    lazy: bool,
}

impl XferArgs {
    fn into_request(self) -> TransferRequest {
        TransferRequest {
            tag: self.tag,
            description: self.description,
            source: Endpoint {
                address: self.src_address,
                kind: self.src_kind,
                root: self.src_root,
                key: self.src_key,
                account: self.src_account,
                secret: self.src_secret,
            },
            destination: Endpoint {
                address: self.dest_address,
                kind: self.dest_kind,
                root: self.dest_root,
                key: self.dest_key,
                account: self.dest_account,
                secret: self.dest_secret,
            },
            notification: self.notification,
            lazy: self.lazy,
        }
    }
}

#[derive(Clone, Debug)]
struct FileList(Vec<FileRef>);

fn parse_files(raw: &str) -> Result<FileList, String> {
    serde_json::from_str(raw)
        .map(FileList)
        .map_err(|err| format!("invalid file list: {err}"))
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| "expected KEY=VALUE".to_string())?;
    if key.trim().is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_url(raw: &str) -> Result<Url, String> {
    Url::parse(raw).map_err(|err| format!("invalid URL '{raw}': {err}"))
}
