use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod run;
pub mod worker;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch workers and drive multiplexed ping-pong sessions over them.
    Run(RunArgs),
    /// Serve one connection as an echo worker (spawned by `run`).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Worker(args) => worker::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Path-addressed Unix domain socket.
    Unix,
    /// Frames over each worker's stdin/stdout pipes.
    Stdio,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Number of echo workers to launch.
    #[arg(long, default_value = "4")]
    pub workers: u32,

    /// Concurrent sessions multiplexed over each worker's connection.
    #[arg(long, default_value = "16")]
    pub parallel: u32,

    /// Data frame payload size in bytes, fixed for the whole run.
    #[arg(long, default_value = "256")]
    pub payload_size: usize,

    /// Round trips per session.
    #[arg(long, default_value = "20000")]
    pub messages: u32,

    /// How workers connect back to the harness.
    #[arg(long, value_enum, default_value = "unix")]
    pub transport: TransportKind,

    /// Socket path for the unix transport. Default: per-process temp path.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Maximum wait for a worker to connect and handshake (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub bind_timeout: String,

    /// Run workers as in-process threads instead of child processes.
    #[arg(long)]
    pub in_process: bool,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Identity announced in the handshake.
    #[arg(long)]
    pub worker_id: u32,

    /// Data frame payload size in bytes.
    #[arg(long, default_value = "256")]
    pub payload_size: usize,

    /// Round trips per session.
    #[arg(long, default_value = "20000")]
    pub messages: u32,

    /// Transport to serve on.
    #[arg(long, value_enum, default_value = "unix")]
    pub transport: TransportKind,

    /// Socket path for the unix transport.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
