//! [`ActivationController`] — the tick-driven drain/match/dispatch cycle.
//!
//! Each tick, the controller swaps the event buffer for an empty one,
//! matches the accumulated labels against the registered detector profiles,
//! deduplicates triggers by (detector label, subject), and submits exactly
//! one execution unit per pair to the backend. A detector's own evidence
//! writes re-enter the buffer and can only trigger on a later tick, which
//! is what keeps detector feedback loops bounded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_core::{
    DetectionAgentProfile, DetectorRegistry, EventNotifier, Evidence, ProfileError, RawData,
    Subject, TriggerContext,
};
use vigil_executor::{ExecutionUnit, Executor, ExecutorStatus};

use crate::buffer::{EventBuffer, PendingEvents};
use crate::error::ActivationError;

/// Accumulates events between ticks and turns each tick's batch into
/// deduplicated execution units on the backend.
pub struct ActivationController<S: Subject> {
    buffer: Arc<EventBuffer<S>>,
    profiles: RwLock<Vec<DetectionAgentProfile>>,
    executor: Arc<dyn Executor<S>>,
    update_interval: Duration,
    /// Cumulative count of submitted units.
    task_count: AtomicU64,
    stopping: AtomicBool,
    stop_signal: Notify,
    loop_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl<S: Subject> ActivationController<S> {
    pub fn new(
        buffer: Arc<EventBuffer<S>>,
        executor: Arc<dyn Executor<S>>,
        update_interval: Duration,
    ) -> Self {
        Self {
            buffer,
            profiles: RwLock::new(Vec::new()),
            executor,
            update_interval,
            task_count: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            stop_signal: Notify::new(),
            loop_handle: StdMutex::new(None),
        }
    }

    /// The shared event buffer, for wiring into the datastore's notifier.
    pub fn buffer(&self) -> Arc<EventBuffer<S>> {
        Arc::clone(&self.buffer)
    }

    /// Register a detector profile. Profiles are meant to be loaded before
    /// `start()`; they are read-only during scheduling.
    pub fn add_agent(&self, profile: DetectionAgentProfile) {
        info!(
            detector = %profile.label,
            trigger = %profile.trigger_label,
            "registered detection agent"
        );
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(profile);
    }

    pub fn profiles(&self) -> Vec<DetectionAgentProfile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Verify that every profile resolves against the registry, without
    /// running anything. Unresolvable profiles are logged and reported but
    /// not removed — they are skipped at startup, isolated per profile.
    pub fn check_profiles(&self, registry: &DetectorRegistry<S>) -> Vec<ProfileError> {
        let mut errors = Vec::new();
        for profile in self.profiles().iter() {
            if let Err(e) = registry.resolve(profile) {
                warn!(detector = %profile.label, error = %e, "invalid profile");
                errors.push(e);
            }
        }
        errors
    }

    /// Total number of units submitted since start.
    pub fn task_count(&self) -> u64 {
        self.task_count.load(Ordering::SeqCst)
    }

    pub fn executor_status(&self) -> ExecutorStatus {
        self.executor.status()
    }

    /// Spawn the tick loop. Must be called from within a tokio runtime.
    pub fn start(self: Arc<Self>) -> Result<(), ActivationError> {
        let mut handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return Err(ActivationError::AlreadyStarted);
        }

        let controller = Arc::clone(&self);
        *handle = Some(tokio::spawn(async move { controller.run().await }));
        Ok(())
    }

    async fn run(&self) {
        info!(interval = ?self.update_interval, "activation controller started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.update_interval) => {}
                _ = self.stop_signal.notified() => {}
            }
            // Cancellation is only observed here, at the tick boundary; an
            // early wake abandons the pending interval without draining.
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let snapshot = self.buffer.drain();
            self.dispatch(snapshot).await;
        }
        info!("activation controller stopped");
    }

    /// Match one tick's snapshot against the profiles and submit the
    /// deduplicated units. Returns how many submissions succeeded.
    async fn dispatch(&self, snapshot: PendingEvents<S>) -> usize {
        if snapshot.is_empty() {
            debug!("empty tick");
            return 0;
        }

        let triggered = self.collect_triggers(&snapshot);
        let mut submitted = 0usize;

        for ((_, subject), (profile, trigger)) in triggered {
            let detector = profile.label.clone();
            debug!(detector = %detector, subject = %subject, "trigger detector");
            match self
                .executor
                .submit(ExecutionUnit::new(subject, trigger, profile))
                .await
            {
                Ok(()) => submitted += 1,
                // Isolated per unit: the rest of the tick proceeds.
                Err(e) => warn!(detector = %detector, error = %e, "unit submission failed"),
            }
        }

        self.task_count.fetch_add(submitted as u64, Ordering::SeqCst);
        debug!(
            submitted,
            total = self.task_count.load(Ordering::SeqCst),
            "tick complete"
        );
        submitted
    }

    /// One candidate per (detector label, subject), keeping the maximum
    /// timestamp among all matches and accumulating the full matched-label
    /// set. Pure with respect to arrival order within the snapshot.
    fn collect_triggers(
        &self,
        snapshot: &PendingEvents<S>,
    ) -> HashMap<(String, S), (DetectionAgentProfile, TriggerContext)> {
        let profiles = self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut triggered: HashMap<(String, S), (DetectionAgentProfile, TriggerContext)> =
            HashMap::new();

        for (label, subjects) in snapshot {
            for profile in profiles.iter().filter(|p| p.matches(label)) {
                for (subject, &timestamp) in subjects {
                    let key = (profile.label.clone(), subject.clone());
                    match triggered.get_mut(&key) {
                        Some((_, trigger)) => {
                            if !trigger.matched_labels.iter().any(|l| l == label) {
                                trigger.matched_labels.push(label.clone());
                                trigger.matched_labels.sort();
                            }
                            if timestamp > trigger.timestamp {
                                trigger.timestamp = timestamp;
                                trigger.label = label.clone();
                            }
                        }
                        None => {
                            triggered.insert(
                                key,
                                (
                                    profile.clone(),
                                    TriggerContext::new(label.clone(), timestamp),
                                ),
                            );
                        }
                    }
                }
            }
        }

        triggered
    }

    /// Stop scheduling new ticks, then ask the backend to drain within a
    /// grace period of twice the tick interval. Returns whether the drain
    /// was clean. An in-flight tick always completes first.
    pub async fn stop(&self) -> bool {
        info!("activation controller stop requested");
        self.stopping.store(true, Ordering::SeqCst);
        // A stored permit wakes the loop even if it is mid-tick right now
        // and only reaches the select later.
        self.stop_signal.notify_one();

        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        match self.executor.shutdown(self.update_interval * 2).await {
            Ok(clean) => clean,
            Err(e) => {
                // Best effort: the backend being unreachable must not wedge
                // controller shutdown.
                warn!(error = %e, "executor unavailable at shutdown");
                false
            }
        }
    }

    /// Wait for the tick loop to finish, up to `timeout`. Returns whether
    /// it terminated in time (trivially true if it was never started or
    /// already joined).
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => tokio::time::timeout(timeout, handle).await.is_ok(),
            None => true,
        }
    }
}

impl<S: Subject> EventNotifier<S> for ActivationController<S> {
    fn notify_raw_data(&self, data: &RawData<S>) {
        self.buffer.notify_raw_data(data);
    }

    fn notify_evidence(&self, evidence: &Evidence<S>) {
        self.buffer.notify_evidence(evidence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vigil_core::Link;
    use vigil_executor::ExecutorError;

    /// Records submitted units; optionally rejects units for one subject.
    struct RecordingExecutor {
        units: Mutex<Vec<ExecutionUnit<Link>>>,
        reject_client: Option<String>,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                units: Mutex::new(Vec::new()),
                reject_client: None,
            }
        }

        fn rejecting(client: &str) -> Self {
            Self {
                units: Mutex::new(Vec::new()),
                reject_client: Some(client.to_string()),
            }
        }

        fn units(&self) -> Vec<ExecutionUnit<Link>> {
            self.units.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor<Link> for RecordingExecutor {
        async fn submit(&self, unit: ExecutionUnit<Link>) -> Result<(), ExecutorError> {
            if self.reject_client.as_deref() == Some(unit.subject.client.as_str()) {
                return Err(ExecutorError::Rejected("synthetic rejection".into()));
            }
            self.units.lock().unwrap().push(unit);
            Ok(())
        }

        async fn shutdown(&self, _grace: Duration) -> Result<bool, ExecutorError> {
            Ok(true)
        }

        fn status(&self) -> ExecutorStatus {
            ExecutorStatus::default()
        }
    }

    fn controller(
        executor: Arc<RecordingExecutor>,
    ) -> Arc<ActivationController<Link>> {
        Arc::new(ActivationController::new(
            Arc::new(EventBuffer::new()),
            executor,
            Duration::from_secs(10),
        ))
    }

    fn link(n: usize) -> Link {
        Link::new(format!("client-{n}"), "server")
    }

    #[tokio::test]
    async fn one_unit_per_matching_subject() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(Arc::clone(&executor));
        controller.add_agent(DetectionAgentProfile::new("detection.scan", "data", "scan"));

        for n in 0..5 {
            controller.buffer().notify("data.http", &link(n), n as i64);
        }
        let submitted = controller.dispatch(controller.buffer().drain()).await;

        assert_eq!(submitted, 5);
        assert_eq!(executor.units().len(), 5);
        assert_eq!(controller.task_count(), 5);
    }

    #[tokio::test]
    async fn dedup_keeps_max_timestamp() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(Arc::clone(&executor));
        controller.add_agent(DetectionAgentProfile::new("detection.scan", "data", "scan"));

        let subject = link(0);
        controller.buffer().notify("data", &subject, 100);
        controller.buffer().notify("data", &subject, 300);
        controller.buffer().notify("data", &subject, 200);
        controller.dispatch(controller.buffer().drain()).await;

        let units = executor.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].trigger.timestamp, 300);
    }

    #[tokio::test]
    async fn two_profiles_same_subject_both_submit() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(Arc::clone(&executor));
        controller.add_agent(DetectionAgentProfile::new("detection.scan", "data", "scan"));
        controller.add_agent(DetectionAgentProfile::new(
            "detection.flood",
            "data.http",
            "flood",
        ));

        controller.buffer().notify("data.http", &link(0), 42);
        let submitted = controller.dispatch(controller.buffer().drain()).await;

        assert_eq!(submitted, 2);
        let mut detectors: Vec<String> = executor
            .units()
            .iter()
            .map(|u| u.profile.label.clone())
            .collect();
        detectors.sort();
        assert_eq!(detectors, vec!["detection.flood", "detection.scan"]);
    }

    #[tokio::test]
    async fn matched_label_set_is_explicit() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(Arc::clone(&executor));
        controller.add_agent(DetectionAgentProfile::new("detection.scan", "data", "scan"));

        let subject = link(0);
        controller.buffer().notify("data.http", &subject, 5);
        controller.buffer().notify("data.dns", &subject, 9);
        controller.dispatch(controller.buffer().drain()).await;

        let units = executor.units();
        assert_eq!(units.len(), 1);
        let trigger = &units[0].trigger;
        assert_eq!(trigger.label, "data.dns");
        assert_eq!(trigger.timestamp, 9);
        assert_eq!(
            trigger.matched_labels,
            vec!["data.dns".to_string(), "data.http".to_string()]
        );
    }

    #[tokio::test]
    async fn non_matching_labels_trigger_nothing() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(Arc::clone(&executor));
        controller.add_agent(DetectionAgentProfile::new("detection.scan", "data", "scan"));

        controller.buffer().notify("other.data", &link(0), 1);
        let submitted = controller.dispatch(controller.buffer().drain()).await;
        assert_eq!(submitted, 0);
        assert!(executor.units().is_empty());
    }

    #[tokio::test]
    async fn empty_snapshot_is_a_noop() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(Arc::clone(&executor));
        controller.add_agent(DetectionAgentProfile::new("detection.scan", "data", "scan"));

        let submitted = controller.dispatch(controller.buffer().drain()).await;
        assert_eq!(submitted, 0);
        assert_eq!(controller.task_count(), 0);
    }

    #[tokio::test]
    async fn submission_failure_is_isolated() {
        let executor = Arc::new(RecordingExecutor::rejecting("client-1"));
        let controller = controller(Arc::clone(&executor));
        controller.add_agent(DetectionAgentProfile::new("detection.scan", "data", "scan"));

        for n in 0..3 {
            controller.buffer().notify("data", &link(n), n as i64);
        }
        let submitted = controller.dispatch(controller.buffer().drain()).await;

        assert_eq!(submitted, 2);
        assert_eq!(executor.units().len(), 2);
        assert_eq!(controller.task_count(), 2);
    }

    #[tokio::test]
    async fn check_profiles_reports_unresolvable() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(executor);
        controller.add_agent(DetectionAgentProfile::new("detection.ok", "data", "known"));
        controller.add_agent(DetectionAgentProfile::new(
            "detection.bad",
            "data",
            "unknown",
        ));

        let mut registry: DetectorRegistry<Link> = DetectorRegistry::new();
        registry.register("known", |_| {
            Err(ProfileError::Invalid {
                label: "never built".into(),
                reason: "factory only probed".into(),
            })
        });

        // "known" resolves to a factory (which errors — still counted), and
        // "unknown" has no factory at all; both come back.
        let errors = controller.check_profiles(&registry);
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn stop_before_first_tick_does_not_drain() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(Arc::clone(&executor));
        controller.add_agent(DetectionAgentProfile::new("detection.scan", "data", "scan"));
        controller.buffer().notify("data", &link(0), 1);

        Arc::clone(&controller).start().unwrap();
        // Interval is 10s; stop long before the first tick fires.
        let clean = controller.stop().await;

        assert!(clean);
        assert!(executor.units().is_empty());
        // The pending event is still buffered, untouched by shutdown.
        assert_eq!(controller.buffer().len(), 1);
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = controller(executor);
        Arc::clone(&controller).start().unwrap();
        assert!(matches!(
            Arc::clone(&controller).start(),
            Err(ActivationError::AlreadyStarted)
        ));
        controller.stop().await;
    }
}
