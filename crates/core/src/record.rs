use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subject::Subject;

/// An unprocessed observation ingested into the store. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "S: Subject")]
pub struct RawData<S: Subject> {
    pub id: String,
    pub label: String,
    /// Event time, epoch milliseconds.
    pub time: i64,
    pub subject: S,
    /// Opaque payload (typically one log line or one serialized record).
    pub data: String,
}

impl<S: Subject> RawData<S> {
    pub fn new(label: impl Into<String>, subject: S, time: i64, data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            time,
            subject,
            data: data.into(),
        }
    }

    /// Render the event time as RFC 3339 for logs and reports.
    pub fn time_formatted(&self) -> String {
        format_millis(self.time)
    }
}

/// A detector's scored, labeled finding about a subject. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "S: Subject")]
pub struct Evidence<S: Subject> {
    pub id: String,
    pub label: String,
    /// Event time, epoch milliseconds.
    pub time: i64,
    pub subject: S,
    pub score: f64,
    pub report: String,
    /// Ids of the evidence records this finding was aggregated from.
    #[serde(default)]
    pub references: Vec<String>,
}

impl<S: Subject> Evidence<S> {
    pub fn new(label: impl Into<String>, subject: S, time: i64, score: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            time,
            subject,
            score,
            report: String::new(),
            references: Vec::new(),
        }
    }

    pub fn with_report(mut self, report: impl Into<String>) -> Self {
        self.report = report.into();
        self
    }

    pub fn time_formatted(&self) -> String {
        format_millis(self.time)
    }
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
