use foodcache_core::FoodCache;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub cache: FoodCache,
}

impl AppState {
    pub fn new(cache: FoodCache) -> Self {
        Self { cache }
    }

    /// The shared secret gating mutating routes, if one is configured.
    pub fn service_api_key(&self) -> Option<&str> {
        self.cache.settings().service_api_key.as_deref()
    }
}
