//! Configuration types
//!
//! Storage and cache backends are selected by a `type` tag. Parsing goes
//! through [`StorageConfig::from_json`] / [`StorageConfig::from_toml`] (and the
//! cache equivalents) so that an unrecognized tag surfaces as
//! [`ConfigError::UnknownType`] instead of a generic serde message.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Storage backend discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    File,
    Blob,
    Cosmos,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Blob => "blob",
            Self::Cosmos => "cosmos",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "blob" => Ok(Self::Blob),
            "cosmos" => Ok(Self::Cosmos),
            other => Err(ConfigError::UnknownType {
                kind: "storage".to_string(),
                type_tag: other.to_string(),
            }),
        }
    }
}

/// Cache backend discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    None,
    Memory,
    File,
    Blob,
    Cosmos,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Memory => "memory",
            Self::File => "file",
            Self::Blob => "blob",
            Self::Cosmos => "cosmos",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "blob" => Ok(Self::Blob),
            "cosmos" => Ok(Self::Cosmos),
            other => Err(ConfigError::UnknownType {
                kind: "cache".to_string(),
                type_tag: other.to_string(),
            }),
        }
    }
}

/// Settings for the local filesystem backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub base_dir: Option<String>,
}

/// Settings for the blob container backend.
///
/// `container_name` is required; it is optional here so a missing value is
/// reported as [`ConfigError::MissingRequired`] when the backend is built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlobSettings {
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub base_dir: Option<String>,
    /// Account URL used with ambient credentials instead of a connection string.
    #[serde(default)]
    pub storage_account_blob_url: Option<String>,
}

/// Settings for the document-database backend.
///
/// Every field may also come from the environment; see
/// `tessera_storage::cosmos::CosmosConnection::resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CosmosSettings {
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub account_key: Option<String>,
}

/// Storage configuration, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    File(FileSettings),
    Blob(BlobSettings),
    Cosmos(CosmosSettings),
}

impl StorageConfig {
    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::Memory => StorageType::Memory,
            Self::File(_) => StorageType::File,
            Self::Blob(_) => StorageType::Blob,
            Self::Cosmos(_) => StorageType::Cosmos,
        }
    }

    /// File storage rooted at `dir`.
    pub fn file(dir: impl Into<String>) -> Self {
        Self::File(FileSettings {
            base_dir: Some(dir.into()),
        })
    }

    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(input).map_err(parse_error)?;
        parse_tagged(value, |tag| tag.parse::<StorageType>().map(|_| ()))
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = toml::from_str(input).map_err(parse_error)?;
        let value = serde_json::to_value(value).map_err(parse_error)?;
        parse_tagged(value, |tag| tag.parse::<StorageType>().map(|_| ()))
    }
}

/// The storage used when a run supplies no storage configuration:
/// files under `<root_dir>/output`.
pub fn default_storage_config(root_dir: &Path) -> StorageConfig {
    StorageConfig::file(root_dir.join("output").to_string_lossy().into_owned())
}

/// Cache configuration, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheConfig {
    None,
    Memory,
    File(FileSettings),
    Blob(BlobSettings),
    Cosmos(CosmosSettings),
}

impl CacheConfig {
    pub fn cache_type(&self) -> CacheType {
        match self {
            Self::None => CacheType::None,
            Self::Memory => CacheType::Memory,
            Self::File(_) => CacheType::File,
            Self::Blob(_) => CacheType::Blob,
            Self::Cosmos(_) => CacheType::Cosmos,
        }
    }

    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(input).map_err(parse_error)?;
        parse_tagged(value, |tag| tag.parse::<CacheType>().map(|_| ()))
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = toml::from_str(input).map_err(parse_error)?;
        let value = serde_json::to_value(value).map_err(parse_error)?;
        parse_tagged(value, |tag| tag.parse::<CacheType>().map(|_| ()))
    }
}

fn parse_tagged<T, F>(value: serde_json::Value, check_tag: F) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
    F: Fn(&str) -> Result<(), ConfigError>,
{
    match value.get("type") {
        Some(serde_json::Value::String(tag)) => check_tag(tag)?,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "type".to_string(),
                value: other.to_string(),
                reason: "must be a string".to_string(),
            })
        }
        None => {
            return Err(ConfigError::MissingRequired {
                field: "type".to_string(),
            })
        }
    }
    serde_json::from_value(value).map_err(parse_error)
}

fn parse_error(e: impl fmt::Display) -> ConfigError {
    ConfigError::Parse {
        reason: e.to_string(),
    }
}
