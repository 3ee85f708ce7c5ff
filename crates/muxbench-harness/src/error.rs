use std::time::Duration;

/// Errors that can occur while orchestrating a benchmark run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] muxbench_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] muxbench_frame::FrameError),

    /// A frame or send referenced a worker that never registered.
    #[error("unknown worker {0}")]
    UnknownWorker(u32),

    /// A worker's handshake never arrived.
    #[error("worker {worker_id} did not bind within {timeout:?}")]
    WorkerBindTimeout { worker_id: u32, timeout: Duration },

    /// A connection went away while sessions were still unresolved.
    #[error("connection lost before run completion: {0}")]
    ConnectionLost(String),

    /// Spawning a worker failed.
    #[error("failed to launch worker {worker_id}: {source}")]
    Launch {
        worker_id: u32,
        source: std::io::Error,
    },

    /// An I/O error outside the transport and frame layers.
    #[error("harness I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
