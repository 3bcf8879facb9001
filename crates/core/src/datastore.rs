//! The store boundary consumed by the scheduler core and by detector code.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DatastoreError;
use crate::record::{Evidence, RawData};
use crate::subject::Subject;

/// Every operation the pipeline needs from the persistent store, plus the
/// coordination cache shared across running detector instances.
///
/// Implementations decide where the data lives (in memory, a document
/// database, ...). Every operation surfaces failures as [`DatastoreError`];
/// none may fail silently.
#[async_trait]
pub trait Datastore<S: Subject>: Send + Sync {
    /// Append a raw data record.
    async fn add_raw_data(&self, data: RawData<S>) -> Result<(), DatastoreError>;

    /// Append an evidence record.
    async fn add_evidence(&self, evidence: Evidence<S>) -> Result<(), DatastoreError>;

    /// All raw data with exactly this label, for this subject.
    async fn find_raw_data(&self, label: &str, subject: &S)
        -> Result<Vec<RawData<S>>, DatastoreError>;

    /// All evidence with exactly this label, for this subject.
    async fn find_evidence(
        &self,
        label: &str,
        subject: &S,
    ) -> Result<Vec<Evidence<S>>, DatastoreError>;

    /// All evidence with exactly this label, across all subjects. Useful for
    /// building ranked subject lists.
    async fn find_evidence_all(&self, label: &str) -> Result<Vec<Evidence<S>>, DatastoreError>;

    /// A single evidence record by id.
    async fn find_evidence_by_id(&self, id: &str) -> Result<Evidence<S>, DatastoreError>;

    /// For each distinct label matching the given hierarchical prefix, the
    /// most recent evidence record for this subject.
    async fn find_last_evidences(
        &self,
        label: &str,
        subject: &S,
    ) -> Result<Vec<Evidence<S>>, DatastoreError>;

    /// Raw data matching a custom, schema-free filter (mention a label!).
    async fn find_data(&self, query: Value) -> Result<Vec<RawData<S>>, DatastoreError>;

    /// Read a coordination-cache value.
    async fn get_from_cache(&self, key: &str) -> Result<Option<Value>, DatastoreError>;

    /// Unconditionally overwrite a coordination-cache value.
    async fn store_in_cache(&self, key: &str, value: Value) -> Result<(), DatastoreError>;

    /// Store `new_value` only if the current cache state equals `expected`
    /// (`None` = the key was never stored). Returns whether the swap
    /// happened. Detector code uses this to elect a single winner among
    /// overlapping triggered instances.
    async fn compare_and_swap_in_cache(
        &self,
        key: &str,
        new_value: Value,
        expected: Option<Value>,
    ) -> Result<bool, DatastoreError>;
}
