//! Provider registry for table-driven endpoint resolution.

use ossportable_common::{Error, Provider, Result};

/// Registry mapping each provider to its API base path.
///
/// Registration order is significant: it is the order in which
/// per-provider results are assembled when every provider is queried at
/// once. Adding a provider is a matter of registering one more route.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    routes: Vec<(Provider, String)>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a provider's base path.
    ///
    /// # Postconditions
    /// - Provider resolves to `base_path` and is appended to the fetch order
    ///
    /// # Errors
    /// - Returns error if the provider is already registered
    pub fn register(&mut self, provider: Provider, base_path: impl Into<String>) -> Result<()> {
        if self.has_provider(provider) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                provider
            )));
        }
        let base_path = base_path.into().trim_end_matches('/').to_string();
        self.routes.push((provider, base_path));
        Ok(())
    }

    /// Resolve a provider to its API base path.
    ///
    /// # Panics
    /// Panics if the provider was never registered. Providers come from a
    /// closed enum, so a miss means the registry was built wrong.
    pub fn base_path(&self, provider: Provider) -> &str {
        match self.routes.iter().find(|(p, _)| *p == provider) {
            Some((_, path)) => path,
            None => panic!("provider '{}' missing from registry", provider),
        }
    }

    /// Full path for an operation suffix, e.g. `bucket/browse`.
    pub fn endpoint(&self, provider: Provider, suffix: &str) -> String {
        format!(
            "{}/{}",
            self.base_path(provider),
            suffix.trim_start_matches('/')
        )
    }

    /// Registered providers in registration order.
    pub fn providers(&self) -> Vec<Provider> {
        self.routes.iter().map(|(p, _)| *p).collect()
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, provider: Provider) -> bool {
        self.routes.iter().any(|(p, _)| *p == provider)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with every provider under `/api/{code}`.
pub fn create_default_registry() -> ProviderRegistry {
    ProviderRegistry {
        routes: Provider::ALL
            .into_iter()
            .map(|p| (p, format!("/api/{}", p.as_str())))
            .collect(),
    }
}
