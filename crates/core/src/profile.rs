//! Detector profiles: the configuration binding a trigger condition to a
//! detector implementation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Seconds between re-runs a detector considers "fresh enough"; profiles
/// that omit the hint get one hour.
const DEFAULT_TRIGGER_INTERVAL: u64 = 3_600;

/// A parsed detector specification. Frozen after startup; the scheduler only
/// ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionAgentProfile {
    /// Label attached to the evidence this detector produces
    /// (e.g. "detection.scan").
    pub label: String,

    /// Trigger pattern matched against incoming event labels, hierarchical
    /// by dot-delimited segments ("data" triggers on "data.http").
    pub trigger_label: String,

    /// Registry identifier of the detector implementation.
    pub detector: String,

    /// Re-run interval hint in seconds. Detectors may use it to window
    /// their queries; the scheduler itself ticks at its own interval.
    #[serde(default = "default_trigger_interval")]
    pub trigger_interval: u64,

    /// Free-form string parameters handed to the detector instance.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

fn default_trigger_interval() -> u64 {
    DEFAULT_TRIGGER_INTERVAL
}

impl DetectionAgentProfile {
    pub fn new(
        label: impl Into<String>,
        trigger_label: impl Into<String>,
        detector: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            trigger_label: trigger_label.into(),
            detector: detector.into(),
            trigger_interval: DEFAULT_TRIGGER_INTERVAL,
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_trigger_interval(mut self, seconds: u64) -> Self {
        self.trigger_interval = seconds;
        self
    }

    /// Get the value for a parameter name, if it was provided.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Whether this profile triggers on the given event label.
    ///
    /// Matches on exact equality or on a dot-delimited hierarchical prefix:
    /// `"data"` matches `"data"`, `"data.http"` and `"data.dns"`, but not
    /// `"other.data"` or `"database"`.
    pub fn matches(&self, label: &str) -> bool {
        label_matches(&self.trigger_label, label)
    }
}

/// Whether `label` equals `pattern` or sits under it in the dot-delimited
/// label hierarchy. Shared by trigger matching and prefix queries.
pub fn label_matches(pattern: &str, label: &str) -> bool {
    match label.strip_prefix(pattern) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(trigger: &str) -> DetectionAgentProfile {
        DetectionAgentProfile::new("detection.test", trigger, "test")
    }

    #[test]
    fn matches_exact_label() {
        assert!(profile("data").matches("data"));
    }

    #[test]
    fn matches_hierarchical_children() {
        let p = profile("data");
        assert!(p.matches("data.http"));
        assert!(p.matches("data.dns"));
        assert!(p.matches("data.http.request"));
    }

    #[test]
    fn rejects_non_prefix_labels() {
        let p = profile("data");
        assert!(!p.matches("other.data"));
        assert!(!p.matches("detection"));
    }

    #[test]
    fn rejects_partial_segment_prefix() {
        // "data" must not trigger on "database" — segments are dot-delimited.
        assert!(!profile("data").matches("database"));
    }

    #[test]
    fn parameters_accessor() {
        let p = profile("data.http").with_parameter("threshold", "0.8");
        assert_eq!(p.parameter("threshold"), Some("0.8"));
        assert_eq!(p.parameter("missing"), None);
    }

    #[test]
    fn trigger_interval_defaults_in_serde() {
        let p: DetectionAgentProfile = serde_json::from_str(
            r#"{"label":"detection.x","trigger_label":"data","detector":"x"}"#,
        )
        .unwrap();
        assert_eq!(p.trigger_interval, 3_600);
        assert!(p.parameters.is_empty());
    }
}
