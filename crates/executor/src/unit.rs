//! One bound (detector, subject, trigger) ready to run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use vigil_core::{Datastore, DetectionAgentProfile, DetectorRegistry, Subject, TriggerContext};

use crate::error::ExecutorError;

/// Immutable once submitted; owned by the backend until completion.
///
/// The unit carries only data — the detector instance is resolved from the
/// registry of whichever process actually runs it, so units can cross the
/// wire to remote workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "S: Subject")]
pub struct ExecutionUnit<S: Subject> {
    pub subject: S,
    pub trigger: TriggerContext,
    pub profile: DetectionAgentProfile,
}

impl<S: Subject> ExecutionUnit<S> {
    pub fn new(subject: S, trigger: TriggerContext, profile: DetectionAgentProfile) -> Self {
        Self {
            subject,
            trigger,
            profile,
        }
    }

    /// Resolve the detector and run its analysis.
    ///
    /// Every failure is contained here: an unresolvable profile or a failing
    /// detector is logged with detector/subject context and never reaches
    /// the worker loop, the scheduler, or sibling units.
    pub async fn run(&self, registry: &DetectorRegistry<S>, datastore: Arc<dyn Datastore<S>>) {
        let agent = match registry.resolve(&self.profile) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(
                    detector = %self.profile.detector,
                    subject = %self.subject,
                    error = %e,
                    "cannot start detector"
                );
                return;
            }
        };

        debug!(
            detector = %self.profile.label,
            subject = %self.subject,
            trigger = %self.trigger.label,
            "running detection agent"
        );

        if let Err(e) = agent
            .analyze(&self.subject, &self.trigger, &self.profile, datastore)
            .await
        {
            error!(
                detector = %self.profile.label,
                subject = %self.subject,
                error = %e,
                "detection agent failed"
            );
        }
    }

    /// MessagePack wire encoding for the distributed backend.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExecutorError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExecutorError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
