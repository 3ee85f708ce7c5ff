use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process CPU-time source.
///
/// The benchmark charges CPU cost in wall-clock-comparable milliseconds:
/// a worker stamps `cpu_time_ms() - cpu_at_start` into its terminal frame,
/// and the master charges itself the same way over the whole run. Injected
/// rather than read directly so the session and harness logic stay free of
/// OS details.
pub trait CpuClock: Send + Sync {
    /// Total CPU time (user + system) consumed by this process, in
    /// milliseconds.
    fn cpu_time_ms(&self) -> io::Result<u64>;
}

/// CPU clock backed by the operating system's per-process accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCpuClock;

#[cfg(target_os = "linux")]
impl CpuClock for ProcessCpuClock {
    fn cpu_time_ms(&self) -> io::Result<u64> {
        let stat = std::fs::read_to_string("/proc/self/stat")?;
        let ticks = parse_stat_cpu_ticks(&stat).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "malformed /proc/self/stat")
        })?;
        Ok(ticks * 1000 / clock_ticks_per_sec())
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
impl CpuClock for ProcessCpuClock {
    fn cpu_time_ms(&self) -> io::Result<u64> {
        // SAFETY: getrusage only writes into the zeroed struct we own.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        let user = timeval_ms(&usage.ru_utime);
        let system = timeval_ms(&usage.ru_stime);
        Ok(user + system)
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn timeval_ms(tv: &libc::timeval) -> u64 {
    tv.tv_sec as u64 * 1000 + tv.tv_usec as u64 / 1000
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_sec() -> u64 {
    // SAFETY: sysconf has no memory preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

/// Extract `utime + stime` (clock ticks) from a `/proc/<pid>/stat` line.
///
/// The comm field may itself contain spaces and parentheses, so fields are
/// counted from after the last `)`: the remainder starts at field 3 (state)
/// and utime/stime are fields 14 and 15.
pub fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_ascii_whitespace();
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

/// Scripted CPU clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    /// Create a clock reading `ms` milliseconds.
    pub fn new(ms: u64) -> Self {
        Self(AtomicU64::new(ms))
    }

    /// Set the current reading.
    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    /// Advance the current reading.
    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl CpuClock for ManualClock {
    fn cpu_time_ms(&self) -> io::Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}
