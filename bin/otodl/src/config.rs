use std::path::{Path, PathBuf};

use oto::DiscoveryOptions;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "otodl.toml";

/// Settings read from `otodl.toml`. Command line flags take precedence.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub key_store: Option<PathBuf>,
    /// Base URL asset descriptors are fetched from.
    pub descriptor_base: Option<String>,
    pub container_name: Option<String>,
    pub temp_dir: Option<PathBuf>,
    /// Download timeout in seconds.
    pub timeout: Option<u64>,
    /// Probe timeout in seconds.
    pub probe_timeout: Option<u64>,
    pub headers: Vec<String>,
    pub discovery: DiscoveryConfig,
    pub remux: RemuxConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub initial_step: Option<u64>,
    pub max_step: Option<u64>,
    pub max_expansion_probes: Option<u32>,
    pub max_gallop_probes: Option<u32>,
    pub verification_window: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemuxConfig {
    pub enabled: bool,
    pub program: Option<PathBuf>,
    pub key_flag: Option<String>,
    pub extension: Option<String>,
}

impl Config {
    /// Load `path`, or `otodl.toml` in the working directory when it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        log::debug!("Loading config from {}", path.display());
        let data = std::fs::read_to_string(&path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        let config = toml::from_str(data)?;
        Ok(config)
    }
}

impl DiscoveryConfig {
    pub fn options(&self) -> DiscoveryOptions {
        let defaults = DiscoveryOptions::default();
        DiscoveryOptions {
            initial_step: self.initial_step.unwrap_or(defaults.initial_step),
            max_step: self.max_step.unwrap_or(defaults.max_step),
            max_expansion_probes: self
                .max_expansion_probes
                .unwrap_or(defaults.max_expansion_probes),
            max_gallop_probes: self.max_gallop_probes.unwrap_or(defaults.max_gallop_probes),
            verification_window: self
                .verification_window
                .unwrap_or(defaults.verification_window),
        }
    }
}
