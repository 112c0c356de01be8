pub mod structs;

use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};
use structs::prelude::*;

pub fn path() -> Result<PathBuf> {
    match home::home_dir() {
        Some(home) => Ok(home.join(".fleetd").join("config.toml")),
        None => Err(anyhow!("Impossible to get your home directory")),
    }
}

/// Read `~/.fleetd/config.toml`, writing the defaults first if it is missing
pub fn read() -> Result<Config> { read_from(&path()?) }

pub fn read_from(config_path: &Path) -> Result<Config> {
    if !config_path.is_file() {
        let config = Config::default();
        config.save_to(config_path)?;
        log::info!("created config file at {}", config_path.display());
        return Ok(config);
    }

    let contents = fs::read_to_string(config_path).with_context(|| format!("Cannot read config {}", config_path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Cannot parse config {}", config_path.display()))
}

impl Config {
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(dir) = config_path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
        }

        let contents = toml::to_string(self).context("Cannot serialize config")?;
        fs::write(config_path, contents).with_context(|| format!("Error writing config {}", config_path.display()))
    }

    pub fn override_address(mut self, address: Option<String>, port: Option<u16>) -> Self {
        if let Some(address) = address {
            self.server.address = address;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        self
    }

    pub fn fmt_address(&self) -> String { format!("{}:{}", self.server.address, self.server.port) }
}
