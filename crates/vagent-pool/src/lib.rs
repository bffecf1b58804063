//! Job process pool: a warm queue of spawned, initialized child processes
//! (spec §4.2) and the per-process state machine that drives one of them
//! through its lifecycle (spec §4.3).

mod executor;
mod pool;

pub use executor::{spawn_child, ChildIo, ExecutorError, ExecutorStatus, JobExecutor, MemoryVerdict};
pub use pool::{PoolConfig, PoolError, ProcessPool, RunningProcess, SpawnFactory, WarmProcess};

use std::time::Duration;

use sysinfo::{Pid, System};

/// One RSS sample in MB for `pid`, or `None` if the process can't be
/// found (already exited). The memory watchdog samples this on an
/// interval and compares it to `WorkerTuning::memory_warn_mb` /
/// `memory_limit_mb` (spec §4.3).
pub fn sample_rss_mb(system: &mut System, pid: u32) -> Option<u64> {
    system.refresh_process(Pid::from_u32(pid));
    system.process(Pid::from_u32(pid)).map(|p| p.memory() / 1024 / 1024)
}

/// Outcome of one memory watchdog tick, handed back to whoever drives the
/// executor (the worker's per-job supervision task) so it can decide
/// whether to initiate a graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryWatchdogEvent {
    Sampled { rss_mb: u64, verdict: MemoryVerdict },
    ProcessGone,
}

/// Sample `pid`'s RSS once and classify it against the configured
/// thresholds. Intended to be called from a loop on a fixed interval
/// (§4.3: "samples resident memory every 500ms").
pub fn watch_memory_tick(system: &mut System, pid: u32, warn_mb: u64, limit_mb: u64) -> MemoryWatchdogEvent {
    match sample_rss_mb(system, pid) {
        Some(rss_mb) if rss_mb > limit_mb => {
            MemoryWatchdogEvent::Sampled { rss_mb, verdict: MemoryVerdict::LimitExceeded }
        }
        Some(rss_mb) if rss_mb > warn_mb => {
            MemoryWatchdogEvent::Sampled { rss_mb, verdict: MemoryVerdict::Warn }
        }
        Some(rss_mb) => MemoryWatchdogEvent::Sampled { rss_mb, verdict: MemoryVerdict::Ok },
        None => MemoryWatchdogEvent::ProcessGone,
    }
}

/// The fixed sampling cadence named in §4.3.
pub const MEMORY_WATCHDOG_INTERVAL: Duration = Duration::from_millis(500);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_memory_tick_reports_process_gone_for_an_unused_pid() {
        let mut system = System::new();
        // pid 0 never refreshes to a real process under sysinfo.
        let event = watch_memory_tick(&mut system, 0, 500, 1000);
        assert_eq!(event, MemoryWatchdogEvent::ProcessGone);
    }

    #[test]
    fn watch_memory_tick_on_the_current_process_reports_a_sample() {
        let mut system = System::new();
        let pid = std::process::id();
        let event = watch_memory_tick(&mut system, pid, u64::MAX, u64::MAX);
        match event {
            MemoryWatchdogEvent::Sampled { verdict, .. } => assert_eq!(verdict, MemoryVerdict::Ok),
            MemoryWatchdogEvent::ProcessGone => panic!("current process should be observable"),
        }
    }
}
