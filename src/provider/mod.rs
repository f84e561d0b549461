//! LLM CLI provider layer.
//!
//! A provider is a command vector plus conventions for locating a structured
//! payload in its free-form output. The invoker executes exactly one call
//! under a deadline; retry policy belongs to the worker.

mod complexity;
mod invoker;
mod router;

pub use complexity::{adaptive_timeout, complexity_score, MAX_SCORE, MIN_SCORE};
pub use invoker::{CliInvoker, InvokeOutcome};
pub use router::{ModelRouter, ModelStats};

use crate::config::ProviderSpec;

/// Extract the text between a provider's JSON markers, if both are present
/// and in order. Returns `None` when the output should be treated as prose.
pub fn extract_marked_payload<'a>(output: &'a str, spec: &ProviderSpec) -> Option<&'a str> {
    if spec.json_markers.len() != 2 {
        return None;
    }
    let (start_marker, end_marker) = (&spec.json_markers[0], &spec.json_markers[1]);
    let start = output.find(start_marker.as_str())? + start_marker.len();
    let end = output[start..].find(end_marker.as_str())? + start;
    let payload = output[start..end].trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Rough token estimate for usage accounting: ~4 bytes per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_markers() -> ProviderSpec {
        ProviderSpec::new(vec!["claude".to_string()])
    }

    #[test]
    fn payload_between_markers() {
        let spec = spec_with_markers();
        let output = "Here is the plan.\nBEGIN_JSON\n{\"tasks\": []}\nEND_JSON\nDone.";
        assert_eq!(
            extract_marked_payload(output, &spec),
            Some("{\"tasks\": []}")
        );
    }

    #[test]
    fn missing_markers_is_prose() {
        let spec = spec_with_markers();
        assert!(extract_marked_payload("just text", &spec).is_none());
        assert!(extract_marked_payload("BEGIN_JSON only start", &spec).is_none());
        // End marker before start marker does not count.
        assert!(extract_marked_payload("END_JSON x BEGIN_JSON", &spec).is_none());
    }

    #[test]
    fn empty_payload_is_prose() {
        let spec = spec_with_markers();
        assert!(extract_marked_payload("BEGIN_JSON   END_JSON", &spec).is_none());
    }

    #[test]
    fn no_markers_configured() {
        let mut spec = spec_with_markers();
        spec.json_markers.clear();
        assert!(extract_marked_payload("BEGIN_JSON {} END_JSON", &spec).is_none());
    }

    #[test]
    fn token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }
}
