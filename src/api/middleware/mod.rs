//! API middleware. Only authentication: every route except `/api/health`
//! requires a bearer token.

pub mod auth;
