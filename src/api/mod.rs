//! HTTP API.
//!
//! Routes are nested under `/api/`. Every route except `/api/health`
//! passes through the bearer-token auth middleware.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, ApiServer};
pub use types::{Actor, ApiContext, AuthGate, StaticTokenGate};
