//! The detector-side contract: what a detection agent receives when the
//! scheduler decides it must run.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::datastore::Datastore;
use crate::error::DetectionError;
use crate::profile::DetectionAgentProfile;
use crate::subject::Subject;

/// The trigger that caused an execution: the label carrying the latest
/// timestamp seen for the (detector, subject) pair during the batching
/// interval, plus every distinct trigger label that matched in the same
/// interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerContext {
    /// The matched label with the maximum timestamp.
    pub label: String,

    /// Timestamp of the most recent matching event, epoch milliseconds.
    pub timestamp: i64,

    /// All distinct labels that matched this detector for this subject in
    /// the interval, sorted. Always contains `label`.
    pub matched_labels: Vec<String>,
}

impl TriggerContext {
    pub fn new(label: impl Into<String>, timestamp: i64) -> Self {
        let label = label.into();
        Self {
            matched_labels: vec![label.clone()],
            label,
            timestamp,
        }
    }
}

/// A detection routine. Implementations are resolved from profiles through
/// the [`DetectorRegistry`](crate::registry::DetectorRegistry) and run on the
/// execution backend, one instance per triggered (detector, subject) pair.
///
/// `analyze` is the single entry point. The agent reads whatever it needs
/// through the datastore handle and writes zero or more evidence records;
/// each write re-enters the event buffer and can trigger downstream
/// detectors on a later tick.
#[async_trait]
pub trait DetectionAgent<S: Subject>: Send + Sync {
    async fn analyze(
        &self,
        subject: &S,
        trigger: &TriggerContext,
        profile: &DetectionAgentProfile,
        datastore: Arc<dyn Datastore<S>>,
    ) -> Result<(), DetectionError>;
}

impl<S: Subject> fmt::Debug for dyn DetectionAgent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DetectionAgent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_context_contains_own_label() {
        let trigger = TriggerContext::new("data.http", 1_000);
        assert_eq!(trigger.label, "data.http");
        assert_eq!(trigger.matched_labels, vec!["data.http".to_string()]);
    }
}
