//! API endpoint handlers, one module per resource.

pub mod health;
pub mod predict;
pub mod retrain;
pub mod scans;
