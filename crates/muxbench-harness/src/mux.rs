use std::io::Read;
use std::sync::mpsc;
use std::sync::Arc;

use muxbench_frame::{Frame, FrameError, FrameReader};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::registry::{ConnectionRegistry, ConnectionSink};
use crate::session::{SessionEvent, SessionReport, SessionTable};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// No handshake yet; data frames are not accepted.
    AwaitingHandshake,
    /// The handshake bound this connection to a worker id.
    Bound { worker_id: u32 },
}

/// Demultiplexes one worker connection's inbound frames onto sessions.
///
/// All `parallel` sessions targeting a worker share its single connection;
/// frames are routed purely by the `session_id` they carry. The multiplexer
/// owns the connection's read half and runs on its own thread; writes go
/// through the shared [`ConnectionSink`] so concurrent sessions never
/// interleave partial records.
pub struct ConnectionMultiplexer<R> {
    reader: FrameReader<R>,
    sink: ConnectionSink,
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionTable>,
    reports: mpsc::Sender<SessionReport>,
    state: ConnectionState,
}

impl<R: Read> ConnectionMultiplexer<R> {
    pub fn new(
        reader: FrameReader<R>,
        sink: ConnectionSink,
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<SessionTable>,
        reports: mpsc::Sender<SessionReport>,
    ) -> Self {
        Self {
            reader,
            sink,
            registry,
            sessions,
            reports,
            state: ConnectionState::AwaitingHandshake,
        }
    }

    /// The worker this connection is bound to, once the handshake arrived.
    pub fn worker_id(&self) -> Option<u32> {
        match self.state {
            ConnectionState::AwaitingHandshake => None,
            ConnectionState::Bound { worker_id } => Some(worker_id),
        }
    }

    /// Read and dispatch frames until the connection closes.
    ///
    /// A clean close after every session on this connection has resolved is
    /// a normal shutdown. A close while sessions are still pending means the
    /// worker died mid-run and is reported as
    /// [`HarnessError::ConnectionLost`].
    pub fn run(mut self) -> Result<()> {
        loop {
            match self.reader.read_frame() {
                Ok(frame) => self.dispatch(frame)?,
                Err(FrameError::ConnectionClosed) => return self.on_disconnect(),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Route one inbound frame according to the connection state.
    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        match (self.state, frame) {
            (ConnectionState::AwaitingHandshake, Frame::Handshake { worker_id }) => {
                self.registry.register(worker_id, self.sink.clone());
                self.state = ConnectionState::Bound { worker_id };
                Ok(())
            }
            (ConnectionState::AwaitingHandshake, Frame::Data { session_id, sequence_id, .. }) => {
                warn!(session_id, sequence_id, "data frame before handshake; dropping");
                Ok(())
            }
            (ConnectionState::Bound { worker_id }, Frame::Handshake { worker_id: claimed }) => {
                warn!(worker_id, claimed, "duplicate handshake; dropping");
                Ok(())
            }
            (
                ConnectionState::Bound { .. },
                Frame::Data {
                    sequence_id,
                    session_id,
                    cpu_usage,
                    ..
                },
            ) => self.dispatch_data(sequence_id, session_id, cpu_usage),
        }
    }

    /// Hand a data frame to its session and perform the follow-up I/O.
    ///
    /// The session table lock is held only while the session consumes the
    /// frame; the write of the next ping happens after release so slow I/O
    /// on one connection never stalls dispatch on the others.
    fn dispatch_data(&mut self, sequence_id: u32, session_id: u32, cpu_usage: u32) -> Result<()> {
        let event = {
            let mut sessions = self.sessions.lock().expect("session table poisoned");
            let Some(session) = sessions.get_mut(&session_id) else {
                debug!(session_id, sequence_id, "frame for unknown session; dropping");
                return Ok(());
            };
            let event = session.on_data(sequence_id, cpu_usage);
            if matches!(event, SessionEvent::Resolved(_)) {
                sessions.remove(&session_id);
            }
            event
        };

        match event {
            SessionEvent::Send(next) => {
                self.sink.send(&next)?;
            }
            SessionEvent::Resolved(report) => {
                debug!(
                    session_id = report.session_id,
                    round_trips = report.round_trips,
                    "session resolved"
                );
                // The collector hangs up once it has every report it wants.
                let _ = self.reports.send(report);
            }
        }
        Ok(())
    }

    fn on_disconnect(&self) -> Result<()> {
        match self.state {
            ConnectionState::AwaitingHandshake => {
                debug!("connection closed before handshake");
                Ok(())
            }
            ConnectionState::Bound { worker_id } => {
                let sessions = self.sessions.lock().expect("session table poisoned");
                let unresolved = sessions
                    .values()
                    .filter(|session| session.worker_id() == worker_id)
                    .count();
                if unresolved == 0 {
                    debug!(worker_id, "connection closed; all sessions resolved");
                    return Ok(());
                }
                Err(HarnessError::ConnectionLost(format!(
                    "worker {worker_id} disconnected with {unresolved} unresolved sessions"
                )))
            }
        }
    }
}

impl<R> std::fmt::Debug for ConnectionMultiplexer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMultiplexer")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
