//! Sportello cache system.
//!
//! A read-through stale-while-revalidate cache in front of the upstream
//! booking API:
//!
//! - **keys**: deterministic cache key per route + resolved parameters
//! - **policy**: per-route freshness windows (`max_age`, `stale_max_age`)
//! - **store**: the engine: hit/stale/miss classification and single-flight
//!   background revalidation
//!
//! ## Configuration
//!
//! Per-route policy comes from `sportello.toml`:
//!
//! ```toml
//! [cache.services]
//! max_age_seconds = 60
//! stale_max_age_seconds = -1   # negative disables the stale ceiling
//! ```

mod keys;
mod lock;
mod policy;
mod store;

pub use keys::{KEY_HEALTH_PROFESSIONALS, KEY_SERVICES, derive_key};
pub use policy::{Freshness, StaleMaxAge, SwrPolicy};
pub use store::SwrCache;
