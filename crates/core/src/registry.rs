//! Registration-time mapping from detector identifiers to factories.
//!
//! Profiles reference detectors by string id; the registry resolves an id to
//! a factory that builds the agent instance for a given profile. There is no
//! runtime code loading: everything runnable is registered at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::DetectionAgent;
use crate::error::ProfileError;
use crate::profile::DetectionAgentProfile;
use crate::subject::Subject;

/// Builds a detector instance for a profile. Factories may validate profile
/// parameters and reject the profile with a [`ProfileError`].
pub type AgentFactory<S> = Box<
    dyn Fn(&DetectionAgentProfile) -> Result<Arc<dyn DetectionAgent<S>>, ProfileError>
        + Send
        + Sync,
>;

/// Maps detector identifiers to factories.
pub struct DetectorRegistry<S: Subject> {
    factories: HashMap<String, AgentFactory<S>>,
}

impl<S: Subject> DetectorRegistry<S> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under the given identifier. A second registration
    /// for the same id replaces the first.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(&DetectionAgentProfile) -> Result<Arc<dyn DetectionAgent<S>>, ProfileError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    /// Resolve the detector instance for a profile.
    pub fn resolve(
        &self,
        profile: &DetectionAgentProfile,
    ) -> Result<Arc<dyn DetectionAgent<S>>, ProfileError> {
        let factory = self
            .factories
            .get(&profile.detector)
            .ok_or_else(|| ProfileError::UnknownDetector(profile.detector.clone()))?;
        factory(profile)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl<S: Subject> Default for DetectorRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
