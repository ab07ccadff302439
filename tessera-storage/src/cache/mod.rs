//! Result caches for expensive pipeline steps.
//!
//! A [`PipelineCache`] maps string keys to JSON values. Implementations:
//!
//! - [`NoopCache`]: caches nothing
//! - [`MemoryCache`]: process-local, over an [`LruCache`](crate::LruCache)
//! - [`JsonCache`]: JSON documents in any [`PipelineStorage`](crate::PipelineStorage)
//! - [`CosmosCache`]: a dedicated document-database container
//!
//! # Example
//!
//! ```ignore
//! let cache = load_cache(Some(&CacheConfig::Memory), root_dir).await?;
//! let extraction = cache.child("entity_extraction");
//! if let Some(hit) = extraction.get(&key).await? {
//!     return Ok(hit);
//! }
//! extraction.set(&key, result.clone(), None).await?;
//! ```

pub mod cosmos;
pub mod json;
pub mod memory;
pub mod noop;
pub mod traits;

pub use cosmos::CosmosCache;
pub use json::JsonCache;
pub use memory::MemoryCache;
pub use noop::NoopCache;
pub use traits::{DebugData, PipelineCache};
