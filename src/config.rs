use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::Context;
use restream_engine::EngineConfig;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "RESTREAM_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "restream.json";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listen address
    pub bind: String,
    /// Named stream presets (radio list)
    pub presets_path: PathBuf,
    /// Applied once at start-up
    pub initial_source: Option<String>,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3378".to_string(),
            presets_path: PathBuf::from("data/radio.json"),
            initial_source: None,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Missing file means defaults; a file that does not parse is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("read config {}", path.display()));
            }
        };
        serde_json::from_str(&json).with_context(|| format!("parse config {}", path.display()))
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> = LazyLock::new(|| {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        AppConfig::load(Path::new(&path)).unwrap_or_else(|e| {
            eprintln!("Error loading config: {:#}", e);
            std::process::exit(1);
        })
    });
    &CONFIG
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
