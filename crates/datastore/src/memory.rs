//! In-memory [`Datastore`] implementation.
//!
//! Backs single-node deployments and tests. Writes are forwarded to the
//! activation engine's [`EventNotifier`] — this is the feedback edge that
//! lets a detector's evidence trigger downstream detectors on a later tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use vigil_core::{
    label_matches, Datastore, DatastoreError, EventNotifier, Evidence, RawData, Subject,
};

use crate::cache::CoordinationCache;

/// Append-only raw data / evidence tables plus the coordination cache, all
/// process-local.
pub struct MemoryDatastore<S: Subject> {
    raw_data: Mutex<Vec<RawData<S>>>,
    evidence: Mutex<Vec<Evidence<S>>>,
    cache: CoordinationCache,
    notifier: RwLock<Option<Arc<dyn EventNotifier<S>>>>,
}

impl<S: Subject> MemoryDatastore<S> {
    pub fn new() -> Self {
        Self {
            raw_data: Mutex::new(Vec::new()),
            evidence: Mutex::new(Vec::new()),
            cache: CoordinationCache::new(),
            notifier: RwLock::new(None),
        }
    }

    /// Wire the activation engine in. Until this is called, writes are
    /// stored but trigger nothing.
    pub fn set_notifier(&self, notifier: Arc<dyn EventNotifier<S>>) {
        *self
            .notifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(notifier);
    }

    pub fn raw_data_count(&self) -> usize {
        self.raw_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn evidence_count(&self) -> usize {
        self.evidence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify_raw_data(&self, data: &RawData<S>) {
        if let Some(notifier) = self
            .notifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            notifier.notify_raw_data(data);
        }
    }

    fn notify_evidence(&self, evidence: &Evidence<S>) {
        if let Some(notifier) = self
            .notifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            notifier.notify_evidence(evidence);
        }
    }
}

impl<S: Subject> Default for MemoryDatastore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: Subject> Datastore<S> for MemoryDatastore<S> {
    async fn add_raw_data(&self, data: RawData<S>) -> Result<(), DatastoreError> {
        debug!(label = %data.label, subject = %data.subject, "add raw data");
        self.raw_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.clone());
        self.notify_raw_data(&data);
        Ok(())
    }

    async fn add_evidence(&self, evidence: Evidence<S>) -> Result<(), DatastoreError> {
        debug!(
            label = %evidence.label,
            subject = %evidence.subject,
            score = evidence.score,
            "add evidence"
        );
        self.evidence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(evidence.clone());
        self.notify_evidence(&evidence);
        Ok(())
    }

    async fn find_raw_data(
        &self,
        label: &str,
        subject: &S,
    ) -> Result<Vec<RawData<S>>, DatastoreError> {
        Ok(self
            .raw_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| d.label == label && &d.subject == subject)
            .cloned()
            .collect())
    }

    async fn find_evidence(
        &self,
        label: &str,
        subject: &S,
    ) -> Result<Vec<Evidence<S>>, DatastoreError> {
        Ok(self
            .evidence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.label == label && &e.subject == subject)
            .cloned()
            .collect())
    }

    async fn find_evidence_all(&self, label: &str) -> Result<Vec<Evidence<S>>, DatastoreError> {
        Ok(self
            .evidence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.label == label)
            .cloned()
            .collect())
    }

    async fn find_evidence_by_id(&self, id: &str) -> Result<Evidence<S>, DatastoreError> {
        self.evidence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| DatastoreError::NotFound(format!("evidence {id}")))
    }

    async fn find_last_evidences(
        &self,
        label: &str,
        subject: &S,
    ) -> Result<Vec<Evidence<S>>, DatastoreError> {
        // Latest record per distinct label under the given prefix.
        let mut latest: HashMap<String, Evidence<S>> = HashMap::new();
        for e in self
            .evidence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            if &e.subject != subject || !label_matches(label, &e.label) {
                continue;
            }
            match latest.get(&e.label) {
                Some(seen) if seen.time >= e.time => {}
                _ => {
                    latest.insert(e.label.clone(), e.clone());
                }
            }
        }
        let mut result: Vec<Evidence<S>> = latest.into_values().collect();
        result.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(result)
    }

    async fn find_data(&self, query: Value) -> Result<Vec<RawData<S>>, DatastoreError> {
        let filter = query
            .as_object()
            .ok_or_else(|| DatastoreError::Query("filter must be a JSON object".into()))?;

        let label = filter.get("label").and_then(Value::as_str);
        let subject = filter.get("subject");
        let time_gte = filter
            .get("time")
            .and_then(|t| t.get("gte"))
            .and_then(Value::as_i64);
        let time_lte = filter
            .get("time")
            .and_then(|t| t.get("lte"))
            .and_then(Value::as_i64);

        let mut result = Vec::new();
        for d in self
            .raw_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            if let Some(label) = label {
                if d.label != label {
                    continue;
                }
            }
            if let Some(expected) = subject {
                let actual = serde_json::to_value(&d.subject)
                    .map_err(|e| DatastoreError::Serialize(e.to_string()))?;
                if &actual != expected {
                    continue;
                }
            }
            if let Some(gte) = time_gte {
                if d.time < gte {
                    continue;
                }
            }
            if let Some(lte) = time_lte {
                if d.time > lte {
                    continue;
                }
            }
            result.push(d.clone());
        }
        Ok(result)
    }

    async fn get_from_cache(&self, key: &str) -> Result<Option<Value>, DatastoreError> {
        Ok(self.cache.get(key))
    }

    async fn store_in_cache(&self, key: &str, value: Value) -> Result<(), DatastoreError> {
        self.cache.put(key, value);
        Ok(())
    }

    async fn compare_and_swap_in_cache(
        &self,
        key: &str,
        new_value: Value,
        expected: Option<Value>,
    ) -> Result<bool, DatastoreError> {
        Ok(self.cache.compare_and_swap(key, new_value, expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::Link;

    fn link() -> Link {
        Link::new("192.168.1.4", "server.example.org")
    }

    #[tokio::test]
    async fn add_and_find_raw_data() {
        let store: MemoryDatastore<Link> = MemoryDatastore::new();
        store
            .add_raw_data(RawData::new("data.http", link(), 100, "GET /"))
            .await
            .unwrap();
        store
            .add_raw_data(RawData::new("data.dns", link(), 200, "A? example.org"))
            .await
            .unwrap();

        let found = store.find_raw_data("data.http", &link()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].data, "GET /");
    }

    #[tokio::test]
    async fn find_evidence_by_id_not_found() {
        let store: MemoryDatastore<Link> = MemoryDatastore::new();
        let err = store.find_evidence_by_id("nope").await.unwrap_err();
        assert!(matches!(err, DatastoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn find_last_evidences_keeps_latest_per_label() {
        let store: MemoryDatastore<Link> = MemoryDatastore::new();
        for (label, time, score) in [
            ("detection.scan.tcp", 100, 0.1),
            ("detection.scan.tcp", 300, 0.9),
            ("detection.scan.udp", 200, 0.5),
            ("other.label", 400, 1.0),
        ] {
            store
                .add_evidence(Evidence::new(label, link(), time, score))
                .await
                .unwrap();
        }

        let last = store
            .find_last_evidences("detection.scan", &link())
            .await
            .unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].label, "detection.scan.tcp");
        assert_eq!(last[0].time, 300);
        assert_eq!(last[1].label, "detection.scan.udp");
    }

    #[tokio::test]
    async fn find_data_with_label_and_time_range() {
        let store: MemoryDatastore<Link> = MemoryDatastore::new();
        for time in [100, 200, 300] {
            store
                .add_raw_data(RawData::new("data.http", link(), time, ""))
                .await
                .unwrap();
        }
        store
            .add_raw_data(RawData::new("data.dns", link(), 200, ""))
            .await
            .unwrap();

        let found = store
            .find_data(json!({"label": "data.http", "time": {"gte": 150, "lte": 250}}))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].time, 200);
    }

    #[tokio::test]
    async fn find_data_rejects_non_object_filter() {
        let store: MemoryDatastore<Link> = MemoryDatastore::new();
        assert!(store.find_data(json!("label")).await.is_err());
    }

    #[tokio::test]
    async fn writes_reach_the_notifier() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct Counting {
            raw: AtomicUsize,
            evidence: AtomicUsize,
        }

        impl EventNotifier<Link> for Counting {
            fn notify_raw_data(&self, _data: &RawData<Link>) {
                self.raw.fetch_add(1, Ordering::SeqCst);
            }
            fn notify_evidence(&self, _evidence: &Evidence<Link>) {
                self.evidence.fetch_add(1, Ordering::SeqCst);
            }
        }

        let store: MemoryDatastore<Link> = MemoryDatastore::new();
        let counting = Arc::new(Counting::default());
        store.set_notifier(counting.clone());

        store
            .add_raw_data(RawData::new("data", link(), 1, ""))
            .await
            .unwrap();
        store
            .add_evidence(Evidence::new("detection", link(), 2, 0.5))
            .await
            .unwrap();

        assert_eq!(counting.raw.load(Ordering::SeqCst), 1);
        assert_eq!(counting.evidence.load(Ordering::SeqCst), 1);
    }
}
