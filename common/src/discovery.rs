// Service discovery: resolve a service name to candidate addresses
//
// The cores learn the catalog and bus endpoints exclusively through
// this seam. Startup resolution failure is fatal.

use crate::config::DiscoveryConfig;
use crate::errors::DiscoveryError;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use tracing::{info, warn};

/// Resolver contract: a service name maps to an ordered list of
/// candidate addresses.
pub trait Discovery: Send + Sync {
    fn resolve(&self, service: &str) -> Result<Vec<String>, DiscoveryError>;
}

/// Walk a service's candidates, handing each address to `connect` until
/// one succeeds.
pub async fn discover<T, E, F, Fut>(
    discovery: &dyn Discovery,
    service: &str,
    mut connect: F,
) -> Result<T, DiscoveryError>
where
    E: Display,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let candidates = discovery.resolve(service)?;
    let mut last_error = String::from("no candidates");

    for address in candidates {
        match connect(address.clone()).await {
            Ok(value) => {
                info!(service, address = %address, "Service resolved");
                return Ok(value);
            }
            Err(e) => {
                warn!(service, address = %address, error = %e, "Candidate unreachable");
                last_error = e.to_string();
            }
        }
    }

    Err(DiscoveryError::Exhausted {
        service: service.to_string(),
        reason: last_error,
    })
}

/// Config-driven resolver: the registry is a static name-to-addresses
/// map read at startup.
pub struct StaticDiscovery {
    services: HashMap<String, Vec<String>>,
}

impl StaticDiscovery {
    pub fn new(services: HashMap<String, Vec<String>>) -> Self {
        Self { services }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.services.clone())
    }
}

impl Discovery for StaticDiscovery {
    fn resolve(&self, service: &str) -> Result<Vec<String>, DiscoveryError> {
        match self.services.get(service) {
            Some(addresses) if !addresses.is_empty() => Ok(addresses.clone()),
            _ => Err(DiscoveryError::UnknownService(service.to_string())),
        }
    }
}
