//! Named stream presets, persisted as a JSON array of `{name, url}`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

impl RadioEntry {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresetError {
    #[error("Both 'name' and 'url' are required.")]
    MissingNameOrUrl,
    #[error("'name' is required.")]
    MissingName,
}

pub struct PresetStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl PresetStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> anyhow::Result<Vec<RadioEntry>> {
        read_list(&self.path).await
    }

    /// Add `entry`, or replace the entry with the same name in place.
    pub async fn upsert(&self, entry: RadioEntry) -> anyhow::Result<Vec<RadioEntry>> {
        if entry.name.trim().is_empty() || entry.url.trim().is_empty() {
            return Err(PresetError::MissingNameOrUrl.into());
        }

        let _guard = self.lock.lock().await;
        let mut list = read_list(&self.path).await?;
        match list.iter().position(|e| e.name == entry.name) {
            Some(index) => list[index] = entry,
            None => list.push(entry),
        }
        write_list(&self.path, &list).await?;
        Ok(list)
    }

    pub async fn remove(&self, name: &str) -> anyhow::Result<Vec<RadioEntry>> {
        if name.trim().is_empty() {
            return Err(PresetError::MissingName.into());
        }

        let _guard = self.lock.lock().await;
        let mut list = read_list(&self.path).await?;
        list.retain(|e| e.name != name);
        write_list(&self.path, &list).await?;
        Ok(list)
    }
}

async fn read_list(path: &Path) -> anyhow::Result<Vec<RadioEntry>> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read presets {}", path.display())),
    };
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&json).with_context(|| format!("parse presets {}", path.display()))
}

async fn write_list(path: &Path, list: &[RadioEntry]) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(list)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("write presets {}", path.display()))
}

#[cfg(test)]
#[path = "presets_test.rs"]
mod presets_test;
