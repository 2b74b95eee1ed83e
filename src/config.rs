//! Configuration management for the monitor daemon.
//!
//! This module handles loading and saving configuration from disk,
//! including classifier patterns and rescan parameters.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
   classifier::{BLUETOOTH_PATTERNS, WIRED_PATTERNS},
   error::{MonitorError, Result},
};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
   #[serde(default = "default_bluetooth_patterns")]
   pub bluetooth_patterns: Vec<String>,

   #[serde(default = "default_wired_patterns")]
   pub wired_patterns: Vec<String>,

   #[serde(default = "default_rescan_interval")]
   pub rescan_interval_sec: u64,

   #[serde(default = "default_monitor_on_startup")]
   pub monitor_on_startup: bool,
}

fn default_bluetooth_patterns() -> Vec<String> {
   BLUETOOTH_PATTERNS.iter().map(|p| (*p).to_owned()).collect()
}

fn default_wired_patterns() -> Vec<String> {
   WIRED_PATTERNS.iter().map(|p| (*p).to_owned()).collect()
}

const fn default_rescan_interval() -> u64 {
   5
}

const fn default_monitor_on_startup() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         bluetooth_patterns: default_bluetooth_patterns(),
         wired_patterns: default_wired_patterns(),
         rescan_interval_sec: default_rescan_interval(),
         monitor_on_startup: default_monitor_on_startup(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   pub fn load_from(config_path: &Path) -> Result<Self> {
      if config_path.exists() {
         let contents = fs::read_to_string(config_path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         // Create default config
         let config = Self::default();
         config.save_to(config_path)?;
         Ok(config)
      }
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      self.save_to(&Self::config_path()?)
   }

   pub fn save_to(&self, config_path: &Path) -> Result<()> {
      // Ensure directory exists
      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(home) = env::var("AIRPODS_MONITOR_HOME") {
         PathBuf::from(home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(dir) = dirs::config_dir() {
         dir
      } else {
         return Err(MonitorError::ConfigDirNotFound);
      };

      Ok(config_dir.join("airpods-monitor").join("config.toml"))
   }

   pub fn rescan_interval(&self) -> Duration {
      Duration::from_secs(self.rescan_interval_sec.max(1))
   }
}
