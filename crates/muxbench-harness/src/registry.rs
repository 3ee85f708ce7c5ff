use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use muxbench_frame::{Frame, FrameWriter};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

/// The outbound half of one worker connection.
///
/// `parallel` sessions share a worker's connection, so every write goes
/// through one mutex-guarded [`FrameWriter`]: each send puts its complete
/// fixed-size record on the wire before another session's write can start.
#[derive(Clone)]
pub struct ConnectionSink {
    writer: Arc<Mutex<FrameWriter<Box<dyn Write + Send>>>>,
}

impl ConnectionSink {
    /// Wrap a connection's write half.
    pub fn new(writer: FrameWriter<Box<dyn Write + Send>>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one complete frame to the connection.
    pub fn send(&self, frame: &Frame) -> muxbench_frame::Result<()> {
        self.writer.lock().expect("connection writer poisoned").send(frame)
    }
}

impl std::fmt::Debug for ConnectionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSink").finish_non_exhaustive()
    }
}

/// Maps worker ids to their live connections.
///
/// Written once per connection by the demultiplexer when the handshake
/// arrives; read by the harness to send session pings. Entries are never
/// removed during a run.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<u32, ConnectionSink>>,
    bound: Condvar,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a worker id to its connection and wake any `await_bound` caller.
    ///
    /// A second registration for the same id keeps the first connection; two
    /// connections claiming one worker id is a launch misconfiguration, not
    /// something sessions should be rerouted over mid-run.
    pub fn register(&self, worker_id: u32, sink: ConnectionSink) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        if entries.contains_key(&worker_id) {
            warn!(worker_id, "duplicate registration; keeping existing connection");
            return;
        }
        entries.insert(worker_id, sink);
        debug!(worker_id, "worker bound");
        self.bound.notify_all();
    }

    /// The sink for a worker's connection.
    pub fn lookup(&self, worker_id: u32) -> Result<ConnectionSink> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .get(&worker_id)
            .cloned()
            .ok_or(HarnessError::UnknownWorker(worker_id))
    }

    /// Write a frame to a worker's connection.
    pub fn send(&self, worker_id: u32, frame: &Frame) -> Result<()> {
        let sink = self.lookup(worker_id)?;
        sink.send(frame)?;
        Ok(())
    }

    /// Block until the worker's handshake has registered its connection.
    ///
    /// Fails with [`HarnessError::WorkerBindTimeout`] if the handshake never
    /// arrives; a silently hanging run is worse than a failed one.
    pub fn await_bound(&self, worker_id: u32, timeout: Duration) -> Result<ConnectionSink> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        loop {
            if let Some(sink) = entries.get(&worker_id) {
                return Ok(sink.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::WorkerBindTimeout { worker_id, timeout });
            }
            let (guard, _wait) = self
                .bound
                .wait_timeout(entries, deadline - now)
                .expect("registry lock poisoned");
            entries = guard;
        }
    }

    /// Number of bound workers.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
