//! [`PipelineStorage`](crate::PipelineStorage) backends with a path-like
//! key hierarchy.

mod blob;
mod file;
mod memory;

pub use blob::BlobStorage;
pub use file::FileStorage;
pub use memory::MemoryStorage;
