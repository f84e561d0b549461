//! Prompt complexity scoring and adaptive timeouts.
//!
//! The effective subprocess deadline scales with an estimate of how much
//! work the prompt asks for. The multiplier is piecewise linear over the
//! score, monotonic, and capped at 3x the base timeout.

use std::time::Duration;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

/// Keywords that usually mean a longer-running request.
const COMPLEX_KEYWORDS: &[&str] = &[
    "comprehensive",
    "detailed",
    "analyze",
    "implement",
    "create",
    "build",
    "generate",
    "design",
    "develop",
    "optimize",
];

/// Keywords that usually mean a quick request.
const SIMPLE_KEYWORDS: &[&str] = &["simple", "basic", "quick", "brief", "short"];

/// Testing and debugging consistently run longest.
const TESTING_KEYWORDS: &[&str] = &["test", "debug", "troubleshoot", "validate", "verify"];

const CODE_KEYWORDS: &[&str] = &["code", "function", "class", "html", "css", "javascript"];

/// Score a prompt into `1..=10`.
///
/// Length and keyword classes contribute points; simple-task indicators
/// subtract one. The raw sum is clamped onto the scale.
pub fn complexity_score(prompt: &str) -> u8 {
    let lower = prompt.to_lowercase();
    let mut raw: i32 = 1;

    if prompt.len() > 1500 {
        raw += 1;
    }
    if prompt.len() > 3000 {
        raw += 1;
    }

    raw += COMPLEX_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count() as i32;

    if SIMPLE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        raw -= 1;
    }

    if TESTING_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        raw += 2;
    }

    if lower.contains("json") {
        raw += 1;
    }

    if CODE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        raw += 1;
    }

    raw.clamp(MIN_SCORE as i32, MAX_SCORE as i32) as u8
}

/// Multiplier for a score: 0.6 at 1, 1.0 at 3, 1.6 at 6, 3.0 at 10,
/// linearly interpolated between the knots.
fn multiplier(score: u8) -> f64 {
    const KNOTS: &[(u8, f64)] = &[(1, 0.6), (3, 1.0), (6, 1.6), (10, 3.0)];

    let score = score.clamp(MIN_SCORE, MAX_SCORE);
    for window in KNOTS.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        if score <= x1 {
            let t = (score - x0) as f64 / (x1 - x0) as f64;
            return y0 + t * (y1 - y0);
        }
    }
    3.0
}

/// Effective deadline for a base timeout and complexity score.
/// Never below 30 seconds, never above 3x base.
pub fn adaptive_timeout(base: Duration, score: u8) -> Duration {
    let scaled = base.as_secs_f64() * multiplier(score);
    let floor = 30.0_f64.min(base.as_secs_f64());
    Duration::from_secs_f64(scaled.max(floor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_prompt_scores_low() {
        assert_eq!(complexity_score("Return the literal string OK"), 1);
        assert_eq!(complexity_score("a quick brief reply"), 1);
    }

    #[test]
    fn loaded_prompt_scores_high() {
        let prompt = "Implement and test a comprehensive, detailed design: \
                      build the HTML, CSS and JavaScript, then debug and optimize it.";
        assert_eq!(complexity_score(prompt), 10);
    }

    #[test]
    fn length_contributes() {
        let short = "analyze this";
        let long = format!("analyze this {}", "x".repeat(3100));
        assert!(complexity_score(&long) > complexity_score(short));
    }

    #[test]
    fn multiplier_is_monotonic_and_capped() {
        let mut prev = 0.0;
        for score in MIN_SCORE..=MAX_SCORE {
            let m = multiplier(score);
            assert!(m >= prev, "multiplier must not decrease at score {}", score);
            assert!(m <= 3.0);
            prev = m;
        }
        assert_eq!(multiplier(MAX_SCORE), 3.0);
    }

    #[test]
    fn adaptive_timeout_bounds() {
        let base = Duration::from_secs(300);
        assert_eq!(adaptive_timeout(base, 3), Duration::from_secs(300));
        assert_eq!(adaptive_timeout(base, 10), Duration::from_secs(900));
        // Low scores shrink but never below the floor.
        assert_eq!(adaptive_timeout(base, 1), Duration::from_secs(180));
        assert!(adaptive_timeout(Duration::from_secs(20), 1) >= Duration::from_secs(12));
    }

    #[test]
    fn out_of_range_scores_clamp() {
        let base = Duration::from_secs(100);
        assert_eq!(adaptive_timeout(base, 0), adaptive_timeout(base, 1));
        assert_eq!(adaptive_timeout(base, 99), adaptive_timeout(base, 10));
    }
}
