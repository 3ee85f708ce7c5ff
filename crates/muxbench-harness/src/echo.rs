use std::io::{Read, Write};

use muxbench_frame::{Frame, FrameError, FrameReader, FrameWriter};
use tracing::{debug, warn};

use crate::cpu::CpuClock;
use crate::error::Result;

/// Parameters an echo responder needs; negotiated out of band by the
/// launcher since the wire carries no length or budget fields.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Identity announced in the handshake.
    pub worker_id: u32,
    /// Fixed payload size of every data record on this connection.
    pub payload_size: usize,
    /// Sequence id at which a session's exchange ends.
    pub message_budget: u32,
}

/// Serve one connection as the worker side of the benchmark.
///
/// The responder is oblivious to sessions: it announces itself with a
/// handshake, then mirrors every data frame back on the same connection.
/// The one field it touches is `cpu_usage` on terminal frames
/// (`sequence_id == message_budget`), which it stamps with the CPU
/// milliseconds this process has burned since the responder started. The
/// harness reads that as the worker-side cost of the whole run so far.
///
/// Returns once the harness closes the connection.
pub fn run_echo<R, W>(reader: R, writer: W, config: &EchoConfig, clock: &dyn CpuClock) -> Result<()>
where
    R: Read,
    W: Write,
{
    let baseline_ms = clock.cpu_time_ms()?;
    let mut reader = FrameReader::new(reader, config.payload_size);
    let mut writer = FrameWriter::new(writer, config.payload_size);

    writer.send(&Frame::handshake(config.worker_id))?;
    debug!(worker_id = config.worker_id, "echo responder ready");

    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => {
                debug!(worker_id = config.worker_id, "harness hung up; exiting");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match frame {
            Frame::Data {
                sequence_id,
                session_id,
                cpu_usage,
                payload,
            } => {
                let cpu = if sequence_id == config.message_budget {
                    let spent_ms = clock.cpu_time_ms()?.saturating_sub(baseline_ms);
                    u32::try_from(spent_ms).unwrap_or(u32::MAX)
                } else {
                    cpu_usage
                };
                writer.send(&Frame::data(sequence_id, session_id, cpu, payload))?;
            }
            Frame::Handshake { worker_id } => {
                warn!(worker_id, "unexpected inbound handshake; dropping");
            }
        }
    }
}
