//! Feedback retraining loop.
//!
//! ```text
//! ScanStore (confirmed scans) -> corpus -> retrain -> validate -> ClassifierSlot::swap
//! ```
//!
//! Triggered weekly by the background scheduler or on demand over HTTP.
//! A failed or empty run never touches the active model.

pub mod background;
pub mod corpus;
pub mod error;
pub mod job;
pub mod schedule;

pub use background::*;
pub use corpus::*;
pub use error::*;
pub use job::*;
pub use schedule::*;
