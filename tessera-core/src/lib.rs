//! TESSERA Core - Shared Types
//!
//! Error taxonomy, backend configuration, the stored value model and the
//! tabular row model. Every other crate in the workspace depends on this.
//! This crate contains no I/O.

pub mod config;
pub mod content;
pub mod error;
pub mod resolve;
pub mod table;

pub use config::{
    default_storage_config, BlobSettings, CacheConfig, CacheType, CosmosSettings, FileSettings,
    StorageConfig, StorageType,
};
pub use content::{Content, ReadAs, TextEncoding};
pub use error::{ConfigError, EncodingError, StorageError, TesseraError, TesseraResult};
pub use resolve::{resolve_optional, resolve_required, Env, ProcessEnv, Source, StaticEnv};
pub use table::{row_from_cells, Cell, Row, Table, TableFormat};
