//! Local IPC transport for the benchmark.
//!
//! Provides the path-addressed Unix domain socket endpoint the master
//! listens on and workers connect to. This is the lowest layer of muxbench;
//! the framing and harness crates build on the [`IpcStream`] type provided
//! here.

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use stream::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
