use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Serialize, de::DeserializeOwned};

/// Durable key-value store: one pretty JSON file per key, grouped into
/// namespace directories. Writes go through a temp file and a rename so a
/// crash never leaves a half-written value behind.
#[derive(Clone, Debug)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create store directory {}", base_dir.display()))?;
        Ok(Self { base_dir })
    }

    fn file_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.base_dir
            .join(namespace)
            .join(format!("{}.json", sanitize_key(key)))
    }

    /// `Ok(None)` when the key was never written. A value that exists but
    /// does not parse is an error so callers decide whether to reset it.
    pub fn load<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        let path = self.file_path(namespace, key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn save<T: Serialize>(&self, namespace: &str, key: &str, data: &T) -> Result<()> {
        let path = self.file_path(namespace, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(data)?;
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Returns whether anything was removed.
    pub fn remove(&self, namespace: &str, key: &str) -> Result<bool> {
        let path = self.file_path(namespace, key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    }

    /// Keys currently stored under `namespace`, sorted.
    pub fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let dir = self.base_dir.join(namespace);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
