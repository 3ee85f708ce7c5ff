use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use muxbench_frame::{FrameReader, FrameWriter};
use muxbench_transport::{IpcStream, UnixDomainSocket};
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cpu::CpuClock;
use crate::error::{HarnessError, Result};
use crate::launcher::WorkerLauncher;
use crate::mux::ConnectionMultiplexer;
use crate::registry::{ConnectionRegistry, ConnectionSink};
use crate::session::{Session, SessionReport, SessionTable};

/// How worker connections reach the harness.
#[derive(Debug, Clone)]
pub enum Transport {
    /// Workers connect to a path-addressed Unix domain socket.
    Unix { socket_path: PathBuf },
    /// Frames travel over each worker's stdin/stdout pipes.
    Stdio,
}

/// Everything one benchmark run needs to know.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker count; each worker gets one connection.
    pub workers: u32,
    /// Concurrent sessions per worker connection.
    pub parallel: u32,
    /// Fixed data-frame payload size for the whole run.
    pub payload_size: usize,
    /// Sequence id at which each session's exchange ends.
    pub message_budget: u32,
    pub transport: Transport,
    /// How long to wait for a worker to connect and handshake.
    pub bind_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            parallel: 16,
            payload_size: 256,
            message_budget: 20_000,
            transport: Transport::Unix {
                socket_path: default_socket_path(),
            },
            bind_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-process default socket path under the system temp directory.
pub fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("muxbench-{}.sock", std::process::id()))
}

/// Aggregated outcome of a benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workers: u32,
    pub parallel: u32,
    pub payload_size: usize,
    pub message_budget: u32,
    /// Wall-clock time from worker launch to the last session resolving.
    pub elapsed_ms: f64,
    /// Master process CPU over the run, as a percentage of wall time.
    pub master_cpu_pct: f64,
    /// Mean of every session's CPU-utilization rate, as a percentage.
    pub worker_cpu_pct: f64,
    pub messages_per_sec: f64,
    /// Sequencing anomalies summed over all sessions.
    pub anomalies: u64,
    #[serde(skip)]
    pub session_reports: Vec<SessionReport>,
}

const REPORT_POLL: Duration = Duration::from_millis(100);

/// Execute one benchmark run and aggregate its metrics.
///
/// The master launches `workers` echo workers, multiplexes `parallel`
/// sessions over each worker's single connection, and collects one report
/// per session. The wall clock and the master CPU baseline both start
/// before the first launch, so process startup is part of the measured
/// cost, matching how the worker side accounts for itself.
pub fn run(
    config: &RunConfig,
    launcher: &dyn WorkerLauncher,
    clock: &dyn CpuClock,
) -> Result<RunReport> {
    let payload = random_payload(config.payload_size);
    let registry = Arc::new(ConnectionRegistry::new());
    let sessions: Arc<SessionTable> = Arc::new(Mutex::new(HashMap::new()));
    let (report_tx, report_rx) = mpsc::channel();

    // The listener must exist before any worker tries to connect.
    let listener = match &config.transport {
        Transport::Unix { socket_path } => Some(UnixDomainSocket::bind(socket_path)?),
        Transport::Stdio => None,
    };

    info!(
        workers = config.workers,
        parallel = config.parallel,
        payload_size = config.payload_size,
        message_budget = config.message_budget,
        transport = ?config.transport,
        "starting benchmark run"
    );

    let cpu_baseline_ms = clock.cpu_time_ms()?;
    let started_at = Instant::now();

    let mut handles = Vec::with_capacity(config.workers as usize);
    let mut mux_threads = Vec::new();
    let mut accepted = Vec::new();
    let mut pending_accepts = 0u32;

    for worker_id in 1..=config.workers {
        let mut launched = launcher.launch(worker_id, config)?;
        match launched.connection.take() {
            Some(connection) => mux_threads.push(spawn_mux(
                connection.reader,
                connection.writer,
                config.payload_size,
                &registry,
                &sessions,
                &report_tx,
            )),
            None => pending_accepts += 1,
        }
        handles.push(launched.handle);
    }

    if let Some(listener) = &listener {
        debug!(pending_accepts, "waiting for worker connections");
        for _ in 0..pending_accepts {
            let stream = listener.accept_within(config.bind_timeout)?;
            // A clone per direction, plus one the teardown can shut down.
            accepted.push(stream.try_clone()?);
            let reader = stream.try_clone()?;
            mux_threads.push(spawn_mux(
                Box::new(reader),
                Box::new(stream),
                config.payload_size,
                &registry,
                &sessions,
                &report_tx,
            ));
        }
    }

    let mut next_session_id = 1u32;
    for worker_id in handles.iter().map(|handle| handle.worker_id()) {
        let sink = registry.await_bound(worker_id, config.bind_timeout)?;
        for _ in 0..config.parallel {
            let session_id = next_session_id;
            next_session_id += 1;
            let mut session =
                Session::new(session_id, worker_id, config.message_budget, payload.clone());
            let first = session.start();
            // Insert before the first send; the echo must find the session.
            sessions
                .lock()
                .expect("session table poisoned")
                .insert(session_id, session);
            sink.send(&first)?;
        }
    }
    drop(report_tx);

    let expected = config.workers as usize * config.parallel as usize;
    info!(sessions = expected, "all sessions started");

    let mut session_reports: Vec<SessionReport> = Vec::with_capacity(expected);
    while session_reports.len() < expected {
        match report_rx.recv_timeout(REPORT_POLL) {
            Ok(report) => session_reports.push(report),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // A connection that died can never resolve its sessions;
                // surface that instead of waiting forever.
                if let Some(err) = reap_finished(&mut mux_threads) {
                    return Err(err);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let err = reap_finished(&mut mux_threads).unwrap_or_else(|| {
                    HarnessError::ConnectionLost(format!(
                        "{} of {expected} sessions resolved before the connections closed",
                        session_reports.len()
                    ))
                });
                return Err(err);
            }
        }
    }

    // Measure before teardown so shutdown cost is not billed to the run.
    let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
    let master_cpu_ms = clock.cpu_time_ms()?.saturating_sub(cpu_baseline_ms);

    for stream in &accepted {
        let _ = stream.shutdown();
    }
    for handle in &mut handles {
        handle.shutdown();
    }
    for mux_thread in mux_threads {
        match mux_thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "multiplexer exited with an error during teardown"),
            Err(_) => warn!("multiplexer thread panicked"),
        }
    }

    let report = aggregate(config, elapsed_ms, master_cpu_ms, session_reports);
    info!(
        elapsed_ms = report.elapsed_ms,
        messages_per_sec = report.messages_per_sec,
        "run complete"
    );
    Ok(report)
}

fn spawn_mux(
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    payload_size: usize,
    registry: &Arc<ConnectionRegistry>,
    sessions: &Arc<SessionTable>,
    reports: &mpsc::Sender<SessionReport>,
) -> thread::JoinHandle<Result<()>> {
    let mux = ConnectionMultiplexer::new(
        FrameReader::new(reader, payload_size),
        ConnectionSink::new(FrameWriter::new(writer, payload_size)),
        Arc::clone(registry),
        Arc::clone(sessions),
        reports.clone(),
    );
    thread::spawn(move || mux.run())
}

/// Join multiplexer threads that have already exited, keeping the first
/// error. Threads still running are left alone.
fn reap_finished(mux_threads: &mut Vec<thread::JoinHandle<Result<()>>>) -> Option<HarnessError> {
    let mut failure = None;
    let mut index = 0;
    while index < mux_threads.len() {
        if !mux_threads[index].is_finished() {
            index += 1;
            continue;
        }
        let outcome = mux_threads.swap_remove(index).join();
        let err = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(_) => HarnessError::ConnectionLost("multiplexer thread panicked".into()),
        };
        if failure.is_none() {
            failure = Some(err);
        }
    }
    failure
}

fn aggregate(
    config: &RunConfig,
    elapsed_ms: f64,
    master_cpu_ms: u64,
    session_reports: Vec<SessionReport>,
) -> RunReport {
    let total_messages =
        u64::from(config.workers) * u64::from(config.parallel) * u64::from(config.message_budget);
    let messages_per_sec = if elapsed_ms > 0.0 {
        total_messages as f64 / elapsed_ms * 1000.0
    } else {
        0.0
    };
    let master_cpu_pct = if elapsed_ms > 0.0 {
        master_cpu_ms as f64 / elapsed_ms * 100.0
    } else {
        0.0
    };
    let worker_cpu_pct = if session_reports.is_empty() {
        0.0
    } else {
        session_reports.iter().map(|report| report.cpu_usage_rate).sum::<f64>()
            / session_reports.len() as f64
            * 100.0
    };
    let anomalies = session_reports
        .iter()
        .map(|report| u64::from(report.anomalies))
        .sum();

    RunReport {
        workers: config.workers,
        parallel: config.parallel,
        payload_size: config.payload_size,
        message_budget: config.message_budget,
        elapsed_ms,
        master_cpu_pct,
        worker_cpu_pct,
        messages_per_sec,
        anomalies,
        session_reports,
    }
}

fn random_payload(size: usize) -> Bytes {
    let mut payload = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut payload);
    Bytes::from(payload)
}
