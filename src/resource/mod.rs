//! Admission control for parallel work.
//!
//! Four budget dimensions: tokens per minute (sliding window), instantaneous
//! memory and CPU, and live agent count. An allocation is admitted only if
//! every dimension stays at or under its configured limit.

mod manager;
mod monitor;

pub use manager::{ResourceManager, ResourceSnapshot};
pub use monitor::{ResourceMonitor, SystemSample};

use serde::{Deserialize, Serialize};

/// One admission request. Additive: the live sum of outstanding allocations
/// never exceeds the configured limits in any dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub tokens: u64,
    pub memory_mb: u64,
    pub cpu_pct: u32,
    pub agents: usize,
}

impl ResourceAllocation {
    /// Conventional request for a group of `workers` concurrent workers.
    pub fn for_workers(workers: usize) -> Self {
        Self {
            tokens: 200 * workers as u64,
            memory_mb: 50 * workers as u64,
            cpu_pct: 10 * workers as u32,
            agents: workers,
        }
    }
}
