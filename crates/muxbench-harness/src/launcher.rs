use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;

use muxbench_transport::IpcStream;
use tracing::{debug, warn};

use crate::cpu::{CpuClock, ProcessCpuClock};
use crate::echo::{run_echo, EchoConfig};
use crate::error::{HarnessError, Result};
use crate::harness::{RunConfig, Transport};

/// Both halves of an already-connected worker channel.
///
/// Produced by launchers whose transport hands the harness a connection
/// directly (pipes, socket pairs). Socket-listening transports return no
/// connection; the harness accepts one from the listener instead.
pub struct WorkerConnection {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

impl std::fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConnection").finish_non_exhaustive()
    }
}

/// A worker that has been started but not necessarily connected yet.
#[derive(Debug)]
pub struct LaunchedWorker {
    pub handle: WorkerHandle,
    /// `Some` when the launcher itself established the connection.
    pub connection: Option<WorkerConnection>,
}

/// Starts echo workers. The harness stays oblivious to whether a worker is
/// a child process or an in-process thread.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, worker_id: u32, config: &RunConfig) -> Result<LaunchedWorker>;
}

fn launch_err(worker_id: u32) -> impl FnOnce(std::io::Error) -> HarnessError {
    move |source| HarnessError::Launch { worker_id, source }
}

/// Launches workers by re-invoking a binary with the hidden `worker`
/// subcommand, the way the production benchmark runs.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    /// Launch workers from the given binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launch workers by re-invoking the current executable.
    pub fn from_current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, worker_id: u32, config: &RunConfig) -> Result<LaunchedWorker> {
        let mut command = Command::new(&self.program);
        command
            .arg("worker")
            .arg("--worker-id")
            .arg(worker_id.to_string())
            .arg("--payload-size")
            .arg(config.payload_size.to_string())
            .arg("--messages")
            .arg(config.message_budget.to_string())
            .stderr(Stdio::inherit());

        match &config.transport {
            Transport::Unix { socket_path } => {
                command
                    .arg("--transport")
                    .arg("unix")
                    .arg("--socket")
                    .arg(socket_path)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null());
            }
            Transport::Stdio => {
                command
                    .arg("--transport")
                    .arg("stdio")
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped());
            }
        }

        let mut child = command.spawn().map_err(launch_err(worker_id))?;
        debug!(worker_id, pid = child.id(), "spawned worker process");

        let connection = match &config.transport {
            Transport::Unix { .. } => None,
            Transport::Stdio => match child.stdin.take().zip(child.stdout.take()) {
                Some((stdin, stdout)) => Some(WorkerConnection {
                    reader: Box::new(stdout),
                    writer: Box::new(stdin),
                }),
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(launch_err(worker_id)(std::io::Error::other(
                        "worker pipes not captured",
                    )));
                }
            },
        };

        Ok(LaunchedWorker {
            handle: WorkerHandle::process(worker_id, child),
            connection,
        })
    }
}

/// Runs each worker as an in-process thread over a socket pair.
///
/// Useful for `--in-process` runs and to measure the protocol without
/// process-spawn noise. Note that worker CPU figures then read the same
/// process accounting as the master's.
pub struct ThreadLauncher {
    clock: Arc<dyn CpuClock>,
}

impl ThreadLauncher {
    pub fn new(clock: Arc<dyn CpuClock>) -> Self {
        Self { clock }
    }
}

impl Default for ThreadLauncher {
    fn default() -> Self {
        Self::new(Arc::new(ProcessCpuClock))
    }
}

impl std::fmt::Debug for ThreadLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLauncher").finish_non_exhaustive()
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, worker_id: u32, config: &RunConfig) -> Result<LaunchedWorker> {
        let (master_io, worker_io) = UnixStream::pair().map_err(launch_err(worker_id))?;

        let echo_config = EchoConfig {
            worker_id,
            payload_size: config.payload_size,
            message_budget: config.message_budget,
        };
        let clock = Arc::clone(&self.clock);
        let worker_reader = worker_io.try_clone().map_err(launch_err(worker_id))?;
        let join = thread::Builder::new()
            .name(format!("muxbench-echo-{worker_id}"))
            .spawn(move || {
                if let Err(err) = run_echo(worker_reader, worker_io, &echo_config, &*clock) {
                    warn!(worker_id = echo_config.worker_id, %err, "echo responder failed");
                }
            })
            .map_err(launch_err(worker_id))?;

        let shutdown_stream =
            IpcStream::from_unix(master_io.try_clone().map_err(launch_err(worker_id))?);
        let connection = WorkerConnection {
            reader: Box::new(master_io.try_clone().map_err(launch_err(worker_id))?),
            writer: Box::new(master_io),
        };

        Ok(LaunchedWorker {
            handle: WorkerHandle::thread(worker_id, shutdown_stream, join),
            connection: Some(connection),
        })
    }
}

/// Owns a running worker and knows how to stop it.
///
/// Dropping the handle stops the worker, so an early return from the
/// harness never strands child processes or echo threads.
#[derive(Debug)]
pub struct WorkerHandle {
    worker_id: u32,
    imp: HandleImpl,
}

#[derive(Debug)]
enum HandleImpl {
    Process(Option<Child>),
    Thread {
        stream: Option<IpcStream>,
        join: Option<thread::JoinHandle<()>>,
    },
}

impl WorkerHandle {
    pub fn process(worker_id: u32, child: Child) -> Self {
        Self {
            worker_id,
            imp: HandleImpl::Process(Some(child)),
        }
    }

    pub fn thread(worker_id: u32, stream: IpcStream, join: thread::JoinHandle<()>) -> Self {
        Self {
            worker_id,
            imp: HandleImpl::Thread {
                stream: Some(stream),
                join: Some(join),
            },
        }
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Stop the worker and reap it. Idempotent.
    pub fn shutdown(&mut self) {
        match &mut self.imp {
            HandleImpl::Process(slot) => {
                if let Some(mut child) = slot.take() {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            debug!(worker_id = self.worker_id, %status, "worker exited");
                        }
                        _ => {
                            let _ = child.kill();
                            let _ = child.wait();
                            debug!(worker_id = self.worker_id, "worker stopped");
                        }
                    }
                }
            }
            HandleImpl::Thread { stream, join } => {
                if let Some(stream) = stream.take() {
                    let _ = stream.shutdown();
                }
                if let Some(join) = join.take() {
                    let _ = join.join();
                }
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
