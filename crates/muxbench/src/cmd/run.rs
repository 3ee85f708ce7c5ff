use muxbench_harness::{
    default_socket_path, ProcessCpuClock, ProcessLauncher, RunConfig, ThreadLauncher, Transport,
    WorkerLauncher,
};

use crate::cmd::{parse_duration, RunArgs, TransportKind};
use crate::exit::{harness_error, CliResult, SUCCESS};
use crate::output::{print_run_report, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let bind_timeout = parse_duration(&args.bind_timeout)?;
    let transport = match args.transport {
        TransportKind::Unix => Transport::Unix {
            socket_path: args.socket.clone().unwrap_or_else(default_socket_path),
        },
        TransportKind::Stdio => Transport::Stdio,
    };
    let config = RunConfig {
        workers: args.workers,
        parallel: args.parallel,
        payload_size: args.payload_size,
        message_budget: args.messages,
        transport,
        bind_timeout,
    };

    let launcher: Box<dyn WorkerLauncher> = if args.in_process {
        Box::new(ThreadLauncher::default())
    } else {
        let launcher = ProcessLauncher::from_current_exe()
            .map_err(|err| harness_error("worker launcher setup failed", err))?;
        Box::new(launcher)
    };

    let report = muxbench_harness::run(&config, launcher.as_ref(), &ProcessCpuClock)
        .map_err(|err| harness_error("benchmark run failed", err))?;

    print_run_report(&report, format);
    Ok(SUCCESS)
}
