use crate::server::lifecycle::{ServerState, StateSnapshot};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource usage of the supervised server.
///
/// All counters are zero when no child is live or the platform offers no
/// per-process accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Supervisor state when the sample was taken
    pub state: ServerState,
    /// OS process id of the live child
    pub pid: Option<u32>,
    /// CPU usage over the sample window, 100.0 per fully used core
    pub cpu_percent: f64,
    /// Resident set size in bytes
    pub memory_bytes: u64,
    /// Seconds since the child was spawned
    pub uptime_seconds: u64,
}

impl HealthReport {
    fn idle(state: ServerState) -> Self {
        Self {
            state,
            pid: None,
            cpu_percent: 0.0,
            memory_bytes: 0,
            uptime_seconds: 0,
        }
    }
}

/// Samples the child described by `snapshot` over `window`.
#[tracing::instrument(skip(snapshot), fields(pid = ?snapshot.pid))]
pub(crate) async fn sample(snapshot: StateSnapshot, window: Duration) -> HealthReport {
    let (Some(pid), Some(started_at)) = (snapshot.pid, snapshot.started_at) else {
        return HealthReport::idle(snapshot.state);
    };

    let usage = measure(pid, window).await.unwrap_or_else(|| {
        tracing::debug!(pid, "Process accounting unavailable");
        Usage::default()
    });

    HealthReport {
        state: snapshot.state,
        pid: Some(pid),
        cpu_percent: usage.cpu_percent,
        memory_bytes: usage.memory_bytes,
        uptime_seconds: started_at.elapsed().as_secs(),
    }
}

#[derive(Debug, Default)]
struct Usage {
    cpu_percent: f64,
    memory_bytes: u64,
}

#[cfg(target_os = "linux")]
async fn measure(pid: u32, window: Duration) -> Option<Usage> {
    use procfs::process::Process;

    let pid = i32::try_from(pid).ok()?;
    let first = Process::new(pid).ok()?.stat().ok()?;
    tokio::time::sleep(window).await;
    let second = Process::new(pid).ok()?.stat().ok()?;

    let ticks = (second.utime + second.stime).saturating_sub(first.utime + first.stime);
    let seconds = window.as_secs_f64();
    let cpu_percent = if seconds > 0.0 {
        (ticks as f64 / procfs::ticks_per_second() as f64) * 100.0 / seconds
    } else {
        0.0
    };

    Some(Usage {
        cpu_percent: (cpu_percent * 10.0).round() / 10.0,
        memory_bytes: second.rss * procfs::page_size(),
    })
}

#[cfg(not(target_os = "linux"))]
async fn measure(_pid: u32, _window: Duration) -> Option<Usage> {
    None
}
