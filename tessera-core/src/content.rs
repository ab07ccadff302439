//! Stored value model.
//!
//! A stored value is either text or raw bytes. Text is turned into bytes
//! (and back) with a per-call [`TextEncoding`]; backends that persist the
//! distinction keep the [`Content`] discriminant next to the value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EncodingError;

/// Text encodings understood by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Latin1,
    Ascii,
}

impl TextEncoding {
    /// Canonical label, as accepted by [`FromStr`].
    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16Le => "utf-16-le",
            Self::Latin1 => "latin-1",
            Self::Ascii => "ascii",
        }
    }

    /// Encode text into bytes.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| self.unrepresentable()))
                .collect(),
            Self::Ascii => {
                if text.is_ascii() {
                    Ok(text.as_bytes().to_vec())
                } else {
                    Err(self.unrepresentable())
                }
            }
        }
    }

    /// Decode bytes into text.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, EncodingError> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| self.invalid_text()),
            Self::Utf16Le => {
                if bytes.len() % 2 != 0 {
                    return Err(self.invalid_text());
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|_| self.invalid_text())
            }
            Self::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Self::Ascii => {
                if bytes.is_ascii() {
                    // ASCII is a subset of UTF-8.
                    Ok(bytes.iter().map(|&b| char::from(b)).collect())
                } else {
                    Err(self.invalid_text())
                }
            }
        }
    }

    fn invalid_text(&self) -> EncodingError {
        EncodingError::InvalidText {
            encoding: self.label().to_string(),
        }
    }

    fn unrepresentable(&self) -> EncodingError {
        EncodingError::Unrepresentable {
            encoding: self.label().to_string(),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TextEncoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16-le" | "utf-16le" | "utf16le" => Ok(Self::Utf16Le),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Self::Latin1),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            _ => Err(EncodingError::Unsupported {
                name: s.to_string(),
            }),
        }
    }
}

/// How the caller wants a stored value handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAs {
    /// Raw bytes, regardless of how the value was written.
    Bytes,
    /// Text decoded with the given encoding.
    Text(TextEncoding),
}

impl Default for ReadAs {
    fn default() -> Self {
        Self::Text(TextEncoding::Utf8)
    }
}

impl ReadAs {
    pub fn text() -> Self {
        Self::default()
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::Bytes)
    }
}

/// A stored value: text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Content {
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(_) => None,
            Self::Binary(bytes) => Some(bytes.as_slice()),
        }
    }

    /// Size of the value in bytes once encoded.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Convert into raw bytes, encoding text with `encoding`.
    pub fn into_bytes(self, encoding: TextEncoding) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::Text(text) => encoding.encode(&text),
            Self::Binary(bytes) => Ok(bytes),
        }
    }

    /// Convert into text, decoding bytes with `encoding`.
    pub fn into_text(self, encoding: TextEncoding) -> Result<String, EncodingError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(bytes) => encoding.decode(&bytes),
        }
    }

    /// Reshape the value into the form the caller asked for.
    pub fn read_as(self, read: ReadAs) -> Result<Content, EncodingError> {
        match read {
            ReadAs::Bytes => self.into_bytes(TextEncoding::Utf8).map(Content::Binary),
            ReadAs::Text(encoding) => self.into_text(encoding).map(Content::Text),
        }
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<&[u8]> for Content {
    fn from(value: &[u8]) -> Self {
        Self::Binary(value.to_vec())
    }
}
