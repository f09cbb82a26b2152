//! Per-city identity store.
//!
//! Each known city gets exactly one [`Identity`] (user agent plus header
//! overrides) at provision time. The binding is fixed for the process
//! lifetime so a campaign never changes fingerprint mid-flight, and two
//! cities never share a browsing context.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::info;

use crate::model::{HeaderOverride, Identity};

/// Pool of realistic desktop user agents. Cities are assigned round-robin
/// in provision order so no two of the default cities collide.
const USER_AGENT_POOL: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

/// Error returned when a city has no provisioned identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no identity provisioned for city '{0}'")]
pub struct UnknownCity(pub String);

/// Holds one isolated network identity per city.
///
/// Written during provisioning (normally all at startup), read-only
/// afterwards. Lookups on unprovisioned cities are a hard
/// [`UnknownCity`] error, never a silent default.
pub struct IdentityStore {
    identities: RwLock<HashMap<String, Arc<Identity>>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self {
            identities: RwLock::new(HashMap::new()),
        }
    }

    /// Provision an identity for `city`.
    ///
    /// Idempotent: re-provisioning a known city returns the existing
    /// identity unchanged.
    pub fn provision(&self, city: &str) -> Arc<Identity> {
        let mut identities = self.identities.write().unwrap();

        if let Some(existing) = identities.get(city) {
            return Arc::clone(existing);
        }

        let user_agent = USER_AGENT_POOL[identities.len() % USER_AGENT_POOL.len()];
        let identity = Arc::new(Identity {
            city: city.to_string(),
            user_agent: user_agent.to_string(),
            header_policy: vec![
                HeaderOverride {
                    name: "Accept-Language".to_string(),
                    value: "en-US,en;q=0.9".to_string(),
                },
                HeaderOverride {
                    name: "Accept".to_string(),
                    value: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                        .to_string(),
                },
            ],
        });

        identities.insert(city.to_string(), Arc::clone(&identity));
        info!(city, user_agent, "Identity provisioned");
        identity
    }

    /// Look up the identity for `city`.
    pub fn get(&self, city: &str) -> Result<Arc<Identity>, UnknownCity> {
        self.identities
            .read()
            .unwrap()
            .get(city)
            .cloned()
            .ok_or_else(|| UnknownCity(city.to_string()))
    }

    /// Cities with a provisioned identity, in no particular order.
    pub fn cities(&self) -> Vec<String> {
        self.identities.read().unwrap().keys().cloned().collect()
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_is_idempotent() {
        let store = IdentityStore::new();

        let first = store.provision("Delhi");
        let second = store.provision("Delhi");

        assert_eq!(first.user_agent, second.user_agent);
        assert_eq!(store.cities().len(), 1);
    }

    #[test]
    fn test_distinct_cities_get_distinct_agents() {
        let store = IdentityStore::new();
        let cities = [
            "Delhi", "Mumbai", "Pune", "Bangalore", "Lucknow", "Jaipur", "Indore", "Patna",
        ];

        let agents: Vec<String> = cities
            .iter()
            .map(|c| store.provision(c).user_agent.clone())
            .collect();

        for (i, a) in agents.iter().enumerate() {
            for b in &agents[i + 1..] {
                assert_ne!(a, b, "two cities share a user agent");
            }
        }
    }

    #[test]
    fn test_get_unknown_city_is_an_error() {
        let store = IdentityStore::new();
        store.provision("Delhi");

        assert!(store.get("Delhi").is_ok());
        let err = store.get("Atlantis").unwrap_err();
        assert_eq!(err, UnknownCity("Atlantis".to_string()));
    }

    #[test]
    fn test_header_policy_is_populated() {
        let store = IdentityStore::new();
        let identity = store.provision("Mumbai");

        let names: Vec<&str> = identity
            .header_policy
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert!(names.contains(&"Accept-Language"));
        assert!(names.contains(&"Accept"));
    }
}
