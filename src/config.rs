use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::tools::memory::manager::DEFAULT_TYPE_EXAMPLES;

const DEFAULT_MEMORY_FILE: &str = "memory.json";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub memory_file: PathBuf,
    pub type_examples: usize,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    #[serde(rename = "MEMORY_FILE_PATH")]
    memory_file_path: Option<String>,
    #[serde(rename = "MEMORY_TYPE_EXAMPLES")]
    type_examples: Option<usize>,
}

impl Config {
    pub fn defaults() -> Self {
        Self {
            memory_file: PathBuf::from(DEFAULT_MEMORY_FILE),
            type_examples: DEFAULT_TYPE_EXAMPLES,
        }
    }

    /// Defaults, then `<binary>.toml` next to the executable, then the
    /// environment.
    pub fn load() -> Self {
        let mut config = Self::defaults();
        match config_path() {
            Ok(path) => {
                if let Some(parsed) = read_config_file(&path) {
                    config.apply_toml(parsed);
                }
            }
            Err(err) => debug!("config: {}", err),
        }
        config.apply_env_overrides();
        config
    }

    fn apply_toml(&mut self, parsed: ConfigToml) {
        if let Some(path) = parsed.memory_file_path.filter(|p| !p.trim().is_empty()) {
            self.memory_file = PathBuf::from(path);
        }
        if let Some(limit) = parsed.type_examples {
            self.type_examples = limit;
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("MEMORY_FILE_PATH") {
            if !value.trim().is_empty() {
                self.memory_file = PathBuf::from(value);
            }
        }
        if let Ok(value) = std::env::var("MEMORY_TYPE_EXAMPLES") {
            match value.trim().parse() {
                Ok(limit) => self.type_examples = limit,
                Err(err) => warn!("Ignoring MEMORY_TYPE_EXAMPLES={}: {}", value, err),
            }
        }
    }
}

pub fn config_path() -> Result<PathBuf, String> {
    let exe = std::env::current_exe().map_err(|e| format!("Failed to locate binary path: {}", e))?;
    let dir = exe
        .parent()
        .ok_or_else(|| "Failed to resolve binary directory".to_string())?;
    let stem = exe
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| "Failed to determine binary name".to_string())?;
    Ok(dir.join(format!("{}.toml", stem)))
}

fn parse_config(content: &str) -> Result<ConfigToml, toml::de::Error> {
    toml::from_str(content)
}

fn read_config_file(path: &Path) -> Option<ConfigToml> {
    if !path.exists() {
        debug!("config: no file at {}", path.display());
        return None;
    }
    debug!("config: reading {}", path.display());
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to read config {}: {}", path.display(), err);
            return None;
        }
    };
    if content.trim().is_empty() {
        debug!("config: file {} is empty", path.display());
        return None;
    }
    match parse_config(&content) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!("Invalid config TOML at {}: {}", path.display(), err);
            None
        }
    }
}
