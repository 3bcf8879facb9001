pub mod agent;
pub mod config;
pub mod datastore;
pub mod error;
pub mod notify;
pub mod profile;
pub mod record;
pub mod registry;
pub mod subject;

pub use agent::{DetectionAgent, TriggerContext};
pub use config::{Config, ExecutorConfig, ExecutorMode};
pub use datastore::Datastore;
pub use error::{ConfigError, DatastoreError, DetectionError, ProfileError};
pub use notify::EventNotifier;
pub use profile::{label_matches, DetectionAgentProfile};
pub use record::{Evidence, RawData};
pub use registry::{AgentFactory, DetectorRegistry};
pub use subject::{Link, Subject};
