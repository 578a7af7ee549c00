//! domainwatch - website health monitoring.
//!
//! Periodically checks HTTP(S) endpoints, records reachability, latency,
//! TLS certificate and security header posture, tracks downtime
//! incidents and alerts on state changes.

pub mod config;
pub mod context;
pub mod db;
pub mod notify;
pub mod probe;
pub mod scheduler;
pub mod stats;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;
