pub mod buffer;
pub mod controller;
pub mod error;

pub use buffer::{EventBuffer, PendingEvents};
pub use controller::ActivationController;
pub use error::ActivationError;
