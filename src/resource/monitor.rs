use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sysinfo::System;
use tokio::task::JoinHandle;
use tracing::debug;

/// Samples kept for trend reporting. At 1 Hz this is a bit under two
/// minutes of history.
const HISTORY_LIMIT: usize = 100;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// One observation of actual host resource usage.
#[derive(Debug, Clone, Copy)]
pub struct SystemSample {
    pub at: DateTime<Utc>,
    pub cpu_percent: f32,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub cpu_count: usize,
}

impl SystemSample {
    pub fn memory_used_percent(&self) -> f32 {
        if self.total_memory_mb == 0 {
            return 0.0;
        }
        let used = self.total_memory_mb.saturating_sub(self.available_memory_mb);
        used as f32 / self.total_memory_mb as f32 * 100.0
    }
}

#[derive(Default)]
struct MonitorState {
    history: VecDeque<SystemSample>,
}

/// Background sampler of actual memory and CPU at a fixed cadence.
///
/// The bounded history feeds `optimal_concurrency`, which clamps admitted
/// parallelism by observed headroom rather than configured hopes.
pub struct ResourceMonitor {
    state: Arc<Mutex<MonitorState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState::default())),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the 1 Hz sampling loop. Idempotent.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let state = Arc::clone(&self.state);
        *handle = Some(tokio::spawn(async move {
            let mut system = System::new();
            loop {
                let sample = take_sample(&mut system);
                {
                    let mut state = state.lock();
                    state.history.push_back(sample);
                    while state.history.len() > HISTORY_LIMIT {
                        state.history.pop_front();
                    }
                }
                debug!(
                    cpu = sample.cpu_percent,
                    available_mb = sample.available_memory_mb,
                    "Resource sample"
                );
                tokio::time::sleep(SAMPLE_INTERVAL).await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    pub fn latest(&self) -> Option<SystemSample> {
        self.state.lock().history.back().copied()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Average CPU and minimum available memory over the recent window.
    /// Returns `None` until at least one sample exists.
    pub fn recent_headroom(&self) -> Option<(f32, u64)> {
        let state = self.state.lock();
        if state.history.is_empty() {
            return None;
        }
        let take = state.history.len().min(20);
        let recent = state.history.iter().rev().take(take);
        let mut cpu_sum = 0.0f32;
        let mut min_available = u64::MAX;
        for sample in recent {
            cpu_sum += sample.cpu_percent;
            min_available = min_available.min(sample.available_memory_mb);
        }
        Some((cpu_sum / take as f32, min_available))
    }

    /// Take one synchronous sample immediately, outside the background loop.
    pub fn sample_once(&self) -> SystemSample {
        let mut system = System::new();
        let sample = take_sample(&mut system);
        let mut state = self.state.lock();
        state.history.push_back(sample);
        while state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }
        sample
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn take_sample(system: &mut System) -> SystemSample {
    system.refresh_memory();
    system.refresh_cpu();

    SystemSample {
        at: Utc::now(),
        cpu_percent: system.global_cpu_info().cpu_usage(),
        total_memory_mb: system.total_memory() / (1024 * 1024),
        available_memory_mb: system.available_memory() / (1024 * 1024),
        cpu_count: system.cpus().len().max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_once_populates_history() {
        let monitor = ResourceMonitor::new();
        assert!(monitor.latest().is_none());

        let sample = monitor.sample_once();
        assert!(sample.total_memory_mb > 0);
        assert!(monitor.latest().is_some());
        assert_eq!(monitor.history_len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let monitor = ResourceMonitor::new();
        for _ in 0..(HISTORY_LIMIT + 10) {
            monitor.sample_once();
        }
        assert_eq!(monitor.history_len(), HISTORY_LIMIT);
    }

    #[test]
    fn headroom_reports_over_recent_window() {
        let monitor = ResourceMonitor::new();
        assert!(monitor.recent_headroom().is_none());
        monitor.sample_once();
        let (cpu, available) = monitor.recent_headroom().unwrap();
        assert!(cpu >= 0.0);
        assert!(available > 0);
    }

    #[test]
    fn memory_used_percent_math() {
        let sample = SystemSample {
            at: Utc::now(),
            cpu_percent: 0.0,
            total_memory_mb: 1000,
            available_memory_mb: 250,
            cpu_count: 4,
        };
        assert!((sample.memory_used_percent() - 75.0).abs() < 0.01);
    }
}
