use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use super::monitor::ResourceMonitor;
use super::ResourceAllocation;
use crate::config::ResourceLimits;

/// Width of the token admission window.
const TOKEN_WINDOW: Duration = Duration::from_secs(60);

struct ManagerState {
    live: HashMap<String, ResourceAllocation>,
    /// Tokens admitted and when; entries age out of the sliding window.
    token_window: VecDeque<(Instant, u64)>,
}

/// Point-in-time view of the manager for logging and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    pub live_allocations: usize,
    pub agents_in_use: usize,
    pub memory_mb_in_use: u64,
    pub cpu_pct_in_use: u32,
    pub tokens_in_window: u64,
    pub limits: ResourceLimits,
    /// Utilization per dimension, 0.0..=1.0.
    pub utilization: HashMap<String, f64>,
}

/// Admission control and bookkeeping for the process-wide budgets.
///
/// `try_acquire` is non-blocking; waiting (and cancellation while waiting)
/// belongs to the caller. A single mutex serializes admission decisions, so
/// waiters are served in lock-acquisition order with no priority tiers.
pub struct ResourceManager {
    limits: ResourceLimits,
    state: Mutex<ManagerState>,
    monitor: Arc<ResourceMonitor>,
}

impl ResourceManager {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(ManagerState {
                live: HashMap::new(),
                token_window: VecDeque::new(),
            }),
            monitor: Arc::new(ResourceMonitor::new()),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    /// Start the background host sampler.
    pub fn start_monitoring(&self) {
        self.monitor.start();
    }

    pub fn stop_monitoring(&self) {
        self.monitor.stop();
    }

    /// Admit the allocation if every dimension stays within its limit.
    ///
    /// Re-acquiring an existing key is rejected; release first.
    pub fn try_acquire(&self, key: &str, allocation: ResourceAllocation) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        if state.live.contains_key(key) {
            warn!(key, "Allocation key already live; rejecting");
            return false;
        }

        Self::prune_token_window(&mut state.token_window, now);

        let in_use = Self::sum_live(&state.live);
        let tokens_in_window: u64 = state.token_window.iter().map(|(_, t)| *t).sum();

        let admitted = tokens_in_window + allocation.tokens <= self.limits.tokens_per_min
            && in_use.memory_mb + allocation.memory_mb <= self.limits.memory_mb
            && in_use.cpu_pct + allocation.cpu_pct <= self.limits.cpu_pct
            && in_use.agents + allocation.agents <= self.limits.concurrent_agents;

        if admitted {
            if allocation.tokens > 0 {
                state.token_window.push_back((now, allocation.tokens));
            }
            state.live.insert(key.to_string(), allocation);
            debug!(key, ?allocation, "Allocation admitted");
        } else {
            debug!(key, ?allocation, "Allocation denied");
        }

        admitted
    }

    /// Release a live allocation. Tokens stay in the sliding window; they
    /// were spent, not borrowed.
    pub fn release(&self, key: &str) {
        let mut state = self.state.lock();
        if state.live.remove(key).is_none() {
            warn!(key, "Release of unknown allocation key");
        } else {
            debug!(key, "Allocation released");
        }
    }

    /// Whether the allocation could ever be admitted, even on an idle
    /// manager. Lets callers fail fast instead of waiting forever.
    pub fn is_satisfiable(&self, allocation: &ResourceAllocation) -> bool {
        allocation.tokens <= self.limits.tokens_per_min
            && allocation.memory_mb <= self.limits.memory_mb
            && allocation.cpu_pct <= self.limits.cpu_pct
            && allocation.agents <= self.limits.concurrent_agents
    }

    /// Concurrency clamped by configured limits and observed host headroom.
    pub fn optimal_concurrency(&self) -> usize {
        let configured = self.limits.concurrent_agents;

        let Some(sample) = self.monitor.latest() else {
            // No observations yet; stay conservative.
            return configured.min(4).max(1);
        };

        let cpu_based = sample.cpu_count.min(6);
        let load_factor = (1.0 - f64::from(sample.cpu_percent) / 100.0).max(0.0);
        let memory_factor = (sample.available_memory_mb as f64 / 1024.0).min(1.0);

        let optimal = (cpu_based as f64 * load_factor * memory_factor).floor() as usize;
        optimal.clamp(1, configured)
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::prune_token_window(&mut state.token_window, now);

        let in_use = Self::sum_live(&state.live);
        let tokens_in_window: u64 = state.token_window.iter().map(|(_, t)| *t).sum();

        let mut utilization = HashMap::new();
        utilization.insert(
            "tokens".to_string(),
            ratio(tokens_in_window, self.limits.tokens_per_min),
        );
        utilization.insert(
            "memory".to_string(),
            ratio(in_use.memory_mb, self.limits.memory_mb),
        );
        utilization.insert(
            "cpu".to_string(),
            ratio(u64::from(in_use.cpu_pct), u64::from(self.limits.cpu_pct)),
        );
        utilization.insert(
            "agents".to_string(),
            ratio(in_use.agents as u64, self.limits.concurrent_agents as u64),
        );

        ResourceSnapshot {
            live_allocations: state.live.len(),
            agents_in_use: in_use.agents,
            memory_mb_in_use: in_use.memory_mb,
            cpu_pct_in_use: in_use.cpu_pct,
            tokens_in_window,
            limits: self.limits.clone(),
            utilization,
        }
    }

    fn sum_live(live: &HashMap<String, ResourceAllocation>) -> ResourceAllocation {
        let mut total = ResourceAllocation::default();
        for alloc in live.values() {
            total.tokens += alloc.tokens;
            total.memory_mb += alloc.memory_mb;
            total.cpu_pct += alloc.cpu_pct;
            total.agents += alloc.agents;
        }
        total
    }

    fn prune_token_window(window: &mut VecDeque<(Instant, u64)>, now: Instant) {
        while let Some((at, _)) = window.front() {
            if now.duration_since(*at) > TOKEN_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

fn ratio(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        0.0
    } else {
        used as f64 / limit as f64
    }
}
