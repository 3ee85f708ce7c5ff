//! Benchmark orchestration for muxbench.
//!
//! The master side lives here: the harness launches echo workers, drives
//! `parallel` ping-pong sessions over each worker's single connection, and
//! aggregates per-session metrics into one run report. The worker side is
//! here too ([`echo::run_echo`]), so launchers can run it in-process or a
//! binary can expose it as a subcommand.
//!
//! Layering: sessions are pure state machines, the multiplexer routes
//! frames between a connection and its sessions, and [`harness::run`] wires
//! everything together over the transport.

pub mod cpu;
pub mod echo;
pub mod error;
pub mod harness;
pub mod launcher;
pub mod mux;
pub mod registry;
pub mod session;

pub use cpu::{CpuClock, ManualClock, ProcessCpuClock};
pub use echo::{run_echo, EchoConfig};
pub use error::{HarnessError, Result};
pub use harness::{default_socket_path, run, RunConfig, RunReport, Transport};
pub use launcher::{ProcessLauncher, ThreadLauncher, WorkerHandle, WorkerLauncher};
pub use mux::ConnectionMultiplexer;
pub use registry::{ConnectionRegistry, ConnectionSink};
pub use session::{Session, SessionEvent, SessionReport};
