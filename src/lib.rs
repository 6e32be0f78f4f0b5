//! Sportello: a caching reverse proxy for an appointment booking API.
//!
//! Three read endpoints are served from a process-lifetime
//! stale-while-revalidate cache; the upstream REST API is only contacted on
//! misses, expiries, and single-flight background revalidations.

pub mod cache;
pub mod config;
pub mod infra;
