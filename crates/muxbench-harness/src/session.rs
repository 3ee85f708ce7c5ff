use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;
use muxbench_frame::Frame;
use serde::Serialize;
use tracing::warn;

/// Active sessions keyed by session id, shared between the harness (which
/// inserts) and the connection demultiplexers (which dispatch and remove).
pub type SessionTable = Mutex<HashMap<u32, Session>>;

/// What a session wants done after observing a data frame.
#[derive(Debug)]
pub enum SessionEvent {
    /// Write the next ping to the session's connection.
    Send(Frame),
    /// The terminal frame arrived; the session is finished.
    Resolved(SessionReport),
}

/// Metrics reported by a resolved session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: u32,
    pub worker_id: u32,
    /// Data frames observed, terminal frame included.
    pub round_trips: u32,
    /// Sequencing anomalies observed (zero on an ordered transport).
    pub anomalies: u32,
    /// CPU milliseconds the worker stamped into the terminal frame.
    pub cpu_usage_ms: u32,
    pub elapsed_ms: f64,
    /// `cpu_usage_ms / elapsed_ms`; this session's CPU-utilization
    /// contribution.
    pub cpu_usage_rate: f64,
}

/// One independently-clocked, bounded ping-pong stream.
///
/// The session is a pure state machine: it never touches a connection. The
/// caller sends the frame returned by [`Session::start`], feeds every
/// inbound data frame carrying this session's id to [`Session::on_data`],
/// and performs the I/O the returned [`SessionEvent`] asks for.
#[derive(Debug)]
pub struct Session {
    session_id: u32,
    worker_id: u32,
    next_expected: u32,
    message_budget: u32,
    payload: Bytes,
    received: u32,
    anomalies: u32,
    started_at: Instant,
}

impl Session {
    /// Create a session. Ids must be unique within a run; the harness owns
    /// the counter that assigns them.
    pub fn new(session_id: u32, worker_id: u32, message_budget: u32, payload: Bytes) -> Self {
        Self {
            session_id,
            worker_id,
            next_expected: 1,
            message_budget,
            payload,
            received: 0,
            anomalies: 0,
            started_at: Instant::now(),
        }
    }

    /// Begin the exchange: stamp the start time and produce the first ping.
    pub fn start(&mut self) -> Frame {
        self.started_at = Instant::now();
        Frame::data(1, self.session_id, 0, self.payload.clone())
    }

    /// Observe the echo of one data frame.
    ///
    /// A sequence id other than the expected one is a sequencing anomaly:
    /// logged, counted, and resynchronized to the peer's counter so the run
    /// still completes. On `sequence_id == message_budget` the session
    /// resolves with its report; otherwise it yields the next ping.
    pub fn on_data(&mut self, sequence_id: u32, cpu_usage: u32) -> SessionEvent {
        self.received += 1;

        if sequence_id != self.next_expected {
            self.anomalies += 1;
            warn!(
                session_id = self.session_id,
                expected = self.next_expected,
                observed = sequence_id,
                "sequencing anomaly; resynchronizing to peer counter"
            );
        }

        if sequence_id >= self.message_budget {
            let elapsed_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
            let cpu_usage_rate = if elapsed_ms > 0.0 {
                f64::from(cpu_usage) / elapsed_ms
            } else {
                0.0
            };
            return SessionEvent::Resolved(SessionReport {
                session_id: self.session_id,
                worker_id: self.worker_id,
                round_trips: self.received,
                anomalies: self.anomalies,
                cpu_usage_ms: cpu_usage,
                elapsed_ms,
                cpu_usage_rate,
            });
        }

        self.next_expected = sequence_id + 1;
        SessionEvent::Send(Frame::data(
            sequence_id + 1,
            self.session_id,
            0,
            self.payload.clone(),
        ))
    }

    /// This session's id.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// The worker whose connection carries this session.
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// The sequence id the session expects on the next inbound frame.
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping_pong_to_completion(budget: u32) -> (u32, SessionReport) {
        let mut session = Session::new(10, 1, budget, Bytes::from_static(b"pp"));
        let first = session.start();
        let mut last_seq = match first {
            Frame::Data { sequence_id, .. } => sequence_id,
            other => panic!("expected data frame, got {other:?}"),
        };
        let mut rounds = 1u32;

        loop {
            // The worker echoes the frame unchanged; cpu only on the terminal.
            let cpu = if last_seq == budget { 37 } else { 0 };
            match session.on_data(last_seq, cpu) {
                SessionEvent::Send(Frame::Data { sequence_id, session_id, .. }) => {
                    assert_eq!(session_id, 10);
                    assert_eq!(sequence_id, last_seq + 1);
                    last_seq = sequence_id;
                    rounds += 1;
                }
                SessionEvent::Send(other) => panic!("expected data frame, got {other:?}"),
                SessionEvent::Resolved(report) => return (rounds, report),
            }
        }
    }

    #[test]
    fn starts_at_sequence_one() {
        let mut session = Session::new(1, 1, 100, Bytes::from_static(b"x"));
        let first = session.start();
        assert_eq!(first, Frame::data(1, 1, 0, b"x".as_ref()));
        assert_eq!(session.next_expected(), 1);
    }

    #[test]
    fn resolves_after_exactly_budget_round_trips() {
        let (rounds, report) = ping_pong_to_completion(20_000);
        assert_eq!(rounds, 20_000);
        assert_eq!(report.round_trips, 20_000);
        assert_eq!(report.anomalies, 0);
        assert_eq!(report.cpu_usage_ms, 37);
        assert!(report.elapsed_ms >= 0.0);
    }

    #[test]
    fn sequence_increments_strictly_by_one() {
        let mut session = Session::new(3, 2, 5, Bytes::from_static(b"q"));
        session.start();
        for seq in 1..5u32 {
            assert_eq!(session.next_expected(), seq);
            match session.on_data(seq, 0) {
                SessionEvent::Send(Frame::Data { sequence_id, .. }) => {
                    assert_eq!(sequence_id, seq + 1);
                }
                other => panic!("expected send, got {other:?}"),
            }
            assert_eq!(session.next_expected(), seq + 1);
        }
    }

    #[test]
    fn terminal_frame_carries_the_report() {
        let mut session = Session::new(8, 4, 3, Bytes::from_static(b"z"));
        session.start();
        assert!(matches!(session.on_data(1, 0), SessionEvent::Send(_)));
        assert!(matches!(session.on_data(2, 0), SessionEvent::Send(_)));
        match session.on_data(3, 120) {
            SessionEvent::Resolved(report) => {
                assert_eq!(report.session_id, 8);
                assert_eq!(report.worker_id, 4);
                assert_eq!(report.round_trips, 3);
                assert_eq!(report.cpu_usage_ms, 120);
            }
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    #[test]
    fn anomaly_resynchronizes_and_continues() {
        let mut session = Session::new(5, 1, 10, Bytes::from_static(b"r"));
        session.start();

        assert!(matches!(session.on_data(1, 0), SessionEvent::Send(_)));

        // Peer skips ahead: trust its counter and keep going.
        match session.on_data(7, 0) {
            SessionEvent::Send(Frame::Data { sequence_id, .. }) => assert_eq!(sequence_id, 8),
            other => panic!("expected send, got {other:?}"),
        }
        assert_eq!(session.next_expected(), 8);

        match session.on_data(10, 9) {
            SessionEvent::Resolved(report) => {
                assert_eq!(report.anomalies, 1);
                assert_eq!(report.round_trips, 3);
            }
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    #[test]
    fn anomalous_terminal_frame_still_resolves() {
        let mut session = Session::new(6, 1, 10, Bytes::from_static(b"s"));
        session.start();

        match session.on_data(10, 4) {
            SessionEvent::Resolved(report) => {
                assert_eq!(report.anomalies, 1);
                assert_eq!(report.cpu_usage_ms, 4);
            }
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    #[test]
    fn pings_carry_the_run_payload() {
        let payload = Bytes::from_static(b"shared-run-payload");
        let mut session = Session::new(2, 1, 4, payload.clone());
        let first = session.start();
        match first {
            Frame::Data { payload: p, .. } => assert_eq!(p, payload),
            other => panic!("expected data frame, got {other:?}"),
        }
        match session.on_data(1, 0) {
            SessionEvent::Send(Frame::Data { payload: p, cpu_usage, .. }) => {
                assert_eq!(p, payload);
                assert_eq!(cpu_usage, 0);
            }
            other => panic!("expected send, got {other:?}"),
        }
    }
}
