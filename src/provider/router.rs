use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::ProviderSpec;

/// Smoothing factor for the response-time moving average.
const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Success rate assumed for a provider/team pair with no history yet.
const DEFAULT_SUCCESS_RATE: f64 = 0.9;

/// Observed performance of one provider on one team's tasks.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ModelStats {
    pub calls: u64,
    pub successes: u64,
    /// Exponential moving average of response time in milliseconds.
    pub avg_latency_ms: f64,
}

impl ModelStats {
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            DEFAULT_SUCCESS_RATE
        } else {
            self.successes as f64 / self.calls as f64
        }
    }

    fn record(&mut self, success: bool, latency: Duration) {
        self.calls += 1;
        if success {
            self.successes += 1;
        }
        let latency_ms = latency.as_secs_f64() * 1000.0;
        if latency_ms > 0.0 {
            if self.avg_latency_ms == 0.0 {
                self.avg_latency_ms = latency_ms;
            } else {
                self.avg_latency_ms =
                    LATENCY_EMA_ALPHA * latency_ms + (1.0 - LATENCY_EMA_ALPHA) * self.avg_latency_ms;
            }
        }
    }
}

/// Routes LLM calls to providers and swaps models on failure.
///
/// Selection is role-based (a team's own provider, else `general`); on a
/// failed call the caller asks for a fallback and gets a different
/// configured provider, ranked by historical success rate for that team.
/// Every call's outcome feeds back into the ranking.
pub struct ModelRouter {
    providers: HashMap<String, ProviderSpec>,
    /// Keyed `provider:team`, matching how reliability differs per workload.
    stats: Mutex<HashMap<String, ModelStats>>,
}

impl ModelRouter {
    pub fn new(providers: HashMap<String, ProviderSpec>) -> Self {
        Self {
            providers,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Provider for a role, falling back to `general`.
    pub fn select(&self, role: &str) -> Option<(String, ProviderSpec)> {
        if let Some(spec) = self.providers.get(role) {
            return Some((role.to_string(), spec.clone()));
        }
        self.providers
            .get("general")
            .map(|spec| ("general".to_string(), spec.clone()))
    }

    /// A different provider to try after `failed`, or `None` when no
    /// alternative is configured. Candidates are ranked by observed success
    /// rate on this team's tasks, name-ordered on ties for determinism.
    pub fn fallback(&self, failed: &str, team: &str) -> Option<(String, ProviderSpec)> {
        let stats = self.stats.lock();

        let mut candidates: Vec<&String> = self
            .providers
            .keys()
            .filter(|name| name.as_str() != failed)
            .collect();
        candidates.sort();
        candidates.sort_by(|a, b| {
            let rate_a = stats
                .get(&stat_key(a.as_str(), team))
                .map(ModelStats::success_rate)
                .unwrap_or(DEFAULT_SUCCESS_RATE);
            let rate_b = stats
                .get(&stat_key(b.as_str(), team))
                .map(ModelStats::success_rate)
                .unwrap_or(DEFAULT_SUCCESS_RATE);
            rate_b.partial_cmp(&rate_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        let name = candidates.first()?.to_string();
        let spec = self.providers.get(&name)?.clone();
        debug!(failed, fallback = %name, team, "Provider fallback selected");
        Some((name, spec))
    }

    /// Feed one call's outcome into the performance history.
    pub fn record(&self, provider: &str, team: &str, success: bool, latency: Duration) {
        let mut stats = self.stats.lock();
        stats
            .entry(stat_key(provider, team))
            .or_default()
            .record(success, latency);
    }

    pub fn stats_for(&self, provider: &str, team: &str) -> Option<ModelStats> {
        self.stats.lock().get(&stat_key(provider, team)).copied()
    }
}

fn stat_key(provider: &str, team: &str) -> String {
    format!("{}:{}", provider, team)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(tag: &str) -> ProviderSpec {
        ProviderSpec::new(vec!["sh".to_string(), "-c".to_string(), tag.to_string()])
    }

    fn router_with(names: &[&str]) -> ModelRouter {
        let providers = names
            .iter()
            .map(|n| (n.to_string(), provider(n)))
            .collect();
        ModelRouter::new(providers)
    }

    #[test]
    fn select_prefers_role_then_general() {
        let router = router_with(&["general", "frontend"]);
        assert_eq!(router.select("frontend").unwrap().0, "frontend");
        assert_eq!(router.select("backend").unwrap().0, "general");
        assert!(router_with(&[]).select("frontend").is_none());
    }

    #[test]
    fn fallback_excludes_the_failed_provider() {
        let router = router_with(&["general", "backup"]);
        let (name, _) = router.fallback("general", "general").unwrap();
        assert_eq!(name, "backup");

        // The only provider failing leaves nothing to fall back to.
        let single = router_with(&["general"]);
        assert!(single.fallback("general", "general").is_none());
    }

    #[test]
    fn fallback_ranks_by_observed_success_rate() {
        let router = router_with(&["general", "flaky", "steady"]);

        for _ in 0..4 {
            router.record("flaky", "backend", false, Duration::from_secs(1));
            router.record("steady", "backend", true, Duration::from_secs(1));
        }

        let (name, _) = router.fallback("general", "backend").unwrap();
        assert_eq!(name, "steady");

        // A team with no history falls back deterministically by name.
        let (name, _) = router.fallback("general", "qa").unwrap();
        assert_eq!(name, "flaky");
    }

    #[test]
    fn record_tracks_rate_and_latency() {
        let router = router_with(&["general"]);
        router.record("general", "frontend", true, Duration::from_millis(100));
        router.record("general", "frontend", false, Duration::from_millis(300));

        let stats = router.stats_for("general", "frontend").unwrap();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.successes, 1);
        assert!((stats.success_rate() - 0.5).abs() < f64::EPSILON);
        // EMA: 0.1 * 300 + 0.9 * 100 = 120.
        assert!((stats.avg_latency_ms - 120.0).abs() < 0.01);

        // Stats are per team; another team is untouched.
        assert!(router.stats_for("general", "backend").is_none());
    }

    #[test]
    fn unseen_pairs_assume_good_performance() {
        let stats = ModelStats::default();
        assert!((stats.success_rate() - DEFAULT_SUCCESS_RATE).abs() < f64::EPSILON);
    }
}
