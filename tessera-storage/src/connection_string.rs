//! `Key=Value;Key=Value` connection strings as issued by Azure services.

use std::collections::HashMap;

/// A parsed connection string. Lookups ignore key case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    parts: HashMap<String, String>,
}

impl ConnectionString {
    /// Parse `input`. Segments without `=` are ignored; values may contain
    /// `=` (base64 keys usually do).
    pub fn parse(input: &str) -> Self {
        let parts = input
            .split(';')
            .filter_map(|segment| {
                let (key, value) = segment.trim().split_once('=')?;
                let key = key.trim();
                (!key.is_empty()).then(|| (key.to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();
        Self { parts }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.parts
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
