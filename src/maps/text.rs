//! File-backed lookup maps (`txt:` and `rnd:` providers).
//!
//! The file format is one `key value` pair per line, whitespace separated.
//! Blank lines and lines starting with `#` are ignored. Duplicate keys keep
//! the last value.

use super::RewriteMap;
use crate::error::{Error, Result};
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;

/// Key/value map loaded from a text file.
pub struct TextMap {
    entries: HashMap<String, String>,
}

impl TextMap {
    /// Load a map from a `key value` table file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = read_map_file(path)?;
        let mut entries = HashMap::new();
        for (key, value) in parse_entries(&content) {
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }
}

impl RewriteMap for TextMap {
    fn lookup(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn name(&self) -> &'static str {
        "txt"
    }
}

/// Text map whose values are `|`-separated alternatives; a lookup picks one
/// uniformly at random.
pub struct RandomMap {
    entries: HashMap<String, Vec<String>>,
}

impl RandomMap {
    /// Load a map from a `key value|value|...` table file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = read_map_file(path)?;
        let mut entries = HashMap::new();
        for (key, value) in parse_entries(&content) {
            let alternatives: Vec<String> = value
                .split('|')
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
                .collect();
            if alternatives.is_empty() {
                tracing::warn!(key = %key, "random map entry has no alternatives, skipping");
                continue;
            }
            entries.insert(key, alternatives);
        }
        Ok(Self { entries })
    }
}

impl RewriteMap for RandomMap {
    fn lookup(&self, key: &str) -> Option<String> {
        let alternatives = self.entries.get(key)?;
        if alternatives.len() == 1 {
            return Some(alternatives[0].clone());
        }
        let idx = rand::thread_rng().gen_range(0..alternatives.len());
        Some(alternatives[idx].clone())
    }

    fn name(&self) -> &'static str {
        "rnd"
    }
}

fn read_map_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::MapFileLoad {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_entries(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else { continue };
        let Some(value) = parts.next() else {
            tracing::warn!(line = %line, "map line has no value, skipping");
            continue;
        };
        entries.push((key.to_string(), value.to_string()));
    }
    entries
}
