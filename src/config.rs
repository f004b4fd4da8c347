use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::lifecycle::ViewMode;
use crate::tui::Screen;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Roster CSV; defaults to `personnel.csv` in the platform config directory
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub views: ViewSettings,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewSettings {
    /// Build every screen at startup instead of on first use
    #[serde(default)]
    pub eager: bool,
    #[serde(default = "default_initial_screen")]
    pub initial: Screen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSettings {
    #[serde(default = "default_exit_on_complete")]
    pub exit_on_complete: bool,
}

fn default_log_file() -> PathBuf {
    PathBuf::from("roster.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_initial_screen() -> Screen {
    Screen::List
}

fn default_exit_on_complete() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: None,
            log_file: default_log_file(),
            log_level: default_log_level(),
            views: ViewSettings::default(),
            shutdown: ShutdownSettings::default(),
        }
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            eager: false,
            initial: default_initial_screen(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            exit_on_complete: default_exit_on_complete(),
        }
    }
}

impl Config {
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "linux") {
            // Use XDG config directory on Linux
            dirs::config_dir()
                .context("Failed to get XDG config directory")?
                .join("roster")
        } else {
            // Use home directory with dot prefix on Windows/Mac
            dirs::home_dir()
                .context("Failed to get home directory")?
                .join(".roster")
        };

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
            info!("Created config directory: {:?}", config_dir);
        }

        Ok(config_dir)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::get_config_dir()?.join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&Self::get_config_path()?),
        }
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        debug!("Loading config from: {:?}", config_path);

        if !config_path.exists() {
            info!("Config file doesn't exist, using defaults");
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        debug!("Loaded config: {:?}", config);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        debug!("Saving config to: {:?}", config_path);

        let config_content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(config_path, config_content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        info!("Config saved successfully");
        Ok(())
    }

    /// Where the roster CSV lives
    pub fn data_path(&self) -> Result<PathBuf> {
        match &self.data_file {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::get_config_dir()?.join("personnel.csv")),
        }
    }

    pub fn view_mode(&self) -> ViewMode {
        if self.views.eager {
            ViewMode::Eager
        } else {
            ViewMode::Lazy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.view_mode(), ViewMode::Lazy);
        assert!(config.shutdown.exit_on_complete);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "data_file = \"/srv/people.csv\"\n\n[views]\neager = true\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.data_path().unwrap(), PathBuf::from("/srv/people.csv"));
        assert_eq!(config.view_mode(), ViewMode::Eager);
        assert_eq!(config.views.initial, Screen::List);
        assert_eq!(config.log_file, PathBuf::from("roster.log"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.views.initial = Screen::Add;
        config.shutdown.exit_on_complete = false;

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.views.initial, Screen::Add);
        assert!(!loaded.shutdown.exit_on_complete);
    }

    #[test]
    fn test_malformed_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "views = 3").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}
