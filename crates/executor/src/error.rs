use thiserror::Error;

/// Errors raised by execution backends. A failed submission is isolated per
/// unit: the scheduler logs it and carries on with the rest of the tick.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor is shut down")]
    ShutDown,

    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),
}
