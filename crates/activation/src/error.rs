use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("activation controller already started")]
    AlreadyStarted,
}
