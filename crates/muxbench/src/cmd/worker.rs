use muxbench_harness::{run_echo, EchoConfig, ProcessCpuClock};
use muxbench_transport::UnixDomainSocket;

use crate::cmd::{TransportKind, WorkerArgs};
use crate::exit::{harness_error, transport_error, CliError, CliResult, SUCCESS, USAGE};

pub fn run(args: WorkerArgs) -> CliResult<i32> {
    let config = EchoConfig {
        worker_id: args.worker_id,
        payload_size: args.payload_size,
        message_budget: args.messages,
    };

    match args.transport {
        TransportKind::Unix => {
            let Some(socket) = &args.socket else {
                return Err(CliError::new(
                    USAGE,
                    "--socket is required for the unix transport",
                ));
            };
            let stream = UnixDomainSocket::connect(socket)
                .map_err(|err| transport_error("worker connect failed", err))?;
            let reader = stream
                .try_clone()
                .map_err(|err| transport_error("worker connect failed", err))?;
            run_echo(reader, stream, &config, &ProcessCpuClock)
                .map_err(|err| harness_error("echo worker failed", err))?;
        }
        TransportKind::Stdio => {
            // Frames share stdout with nothing else; logs go to stderr.
            let stdin = std::io::stdin().lock();
            let stdout = std::io::stdout().lock();
            run_echo(stdin, stdout, &config, &ProcessCpuClock)
                .map_err(|err| harness_error("echo worker failed", err))?;
        }
    }

    Ok(SUCCESS)
}
