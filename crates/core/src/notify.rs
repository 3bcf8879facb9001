use crate::record::{Evidence, RawData};
use crate::subject::Subject;

/// Sink for incoming-data notifications.
///
/// The datastore forwards every successful write here so the scheduler can
/// coalesce (label, subject, timestamp) events into its next batch. Calls
/// must be cheap and non-blocking beyond a short map-mutation critical
/// section; implementations must tolerate unbounded concurrent callers.
pub trait EventNotifier<S: Subject>: Send + Sync {
    fn notify_raw_data(&self, data: &RawData<S>);

    fn notify_evidence(&self, evidence: &Evidence<S>);
}
