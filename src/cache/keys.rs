//! Cache key derivation.
//!
//! Keys are a pure function of route name and resolved parameters, so the
//! same request always lands on the same entry across calls and restarts.

/// Key prefix for the services listing.
pub const KEY_SERVICES: &str = "services";
/// Key for the health professional listing.
pub const KEY_HEALTH_PROFESSIONALS: &str = "health_professional";

/// Token substituted for a parameter that could not be resolved. Absent
/// parameters must still yield a valid, deterministic key, never an error.
const UNRESOLVED_PARAM: &str = "undefined";

/// Derive the cache key for a route and its resolved parameter values.
///
/// Routes without parameters key on the route name alone. Parameterized
/// routes append each value with a `_` separator, e.g. `services_5`.
pub fn derive_key(route: &str, params: &[Option<&str>]) -> String {
    let mut key = String::from(route);
    for param in params {
        key.push('_');
        key.push_str(param.unwrap_or(UNRESOLVED_PARAM));
    }
    key
}
