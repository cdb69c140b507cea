//! HTTP API: server, routing, request protection and error mapping.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
pub mod protection;
