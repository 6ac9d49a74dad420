pub mod cache;
pub mod config;
pub mod config_file;
pub mod rate_limit;
pub mod record;
pub mod source;
pub mod staleness;
pub mod store;

// Re-export for convenience
pub use cache::{CacheError, FoodCache};
pub use config::{ConfigError, Settings};
pub use record::{Macros, Micros, ProductCandidate, ProductRecord};
pub use source::{OpenFoodFacts, ProductSource, SourceError};
pub use staleness::is_stale;
pub use store::{ProductStore, StoreError};
