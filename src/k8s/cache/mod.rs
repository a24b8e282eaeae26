pub mod cached_data;
pub mod resource_cache;

pub use cached_data::CachedResource;
pub use resource_cache::{CacheStats, ResourceCache, ResourceKey};
