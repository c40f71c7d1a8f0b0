use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    installer::DEFAULT_CLI_VERSION,
    layout::InstallLayout,
    system::{
        elevation::{DirectElevator, Elevator, PkexecElevator, SudoElevator},
        platform::CLI_BINARY_NAME,
    },
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationMethod {
    #[default]
    Sudo,
    Pkexec,
    /// Run privileged steps as the current user, for user-owned prefixes.
    None,
}

impl fmt::Display for ElevationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sudo => "sudo",
            Self::Pkexec => "pkexec",
            Self::None => "none",
        })
    }
}

impl FromStr for ElevationMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sudo" => Ok(Self::Sudo),
            "pkexec" => Ok(Self::Pkexec),
            "none" => Ok(Self::None),
            other => Err(format!("Unknown elevation method: {other}")),
        }
    }
}

impl ElevationMethod {
    /// Builds the elevator. Only sudo needs the password.
    pub fn elevator(self, password: Option<&str>) -> Result<Box<dyn Elevator>, String> {
        match self {
            Self::Sudo => {
                let password = password.ok_or("sudo needs the administrator password")?;
                let elevator = SudoElevator::new(password);
                if !elevator.verify() {
                    return Err("Incorrect administrator password".into());
                }
                Ok(Box::new(elevator))
            }
            Self::Pkexec => {
                if !PkexecElevator::is_available() {
                    return Err("pkexec is not installed".into());
                }
                Ok(Box::new(PkexecElevator))
            }
            Self::None => Ok(Box::new(DirectElevator)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub binary: String,
    pub poll_interval_seconds: u64,
    pub license_refresh_ticks: u64,
    pub status_timeout_seconds: u64,
    pub license_timeout_seconds: u64,
    /// Manifest with `<version>\n<download_url>`; no self-update without it.
    pub version_url: Option<String>,
    pub cli_version: String,
    pub elevation: ElevationMethod,
    pub install_directory: Option<PathBuf>,
    pub symlink_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binary: CLI_BINARY_NAME.into(),
            poll_interval_seconds: 3,
            license_refresh_ticks: 10,
            status_timeout_seconds: 5,
            license_timeout_seconds: 10,
            version_url: None,
            cli_version: DEFAULT_CLI_VERSION.into(),
            elevation: ElevationMethod::default(),
            install_directory: None,
            symlink_path: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("adguardvpn-manager")
            .join("config.toml")
    }

    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("[configuration] loaded from {}", path.display());
                    config
                }
                Err(error) => {
                    log::warn!("[configuration] failed to parse {}: {error}", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                log::info!(
                    "[configuration] no config file at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!("Failed to create config directory {}: {error}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|error| format!("Failed to serialize configuration: {error}"))?;
        std::fs::write(path, content)
            .map_err(|error| format!("Failed to write {}: {error}", path.display()))?;
        log::info!("[configuration] saved to {}", path.display());
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_seconds)
    }

    pub fn license_timeout(&self) -> Duration {
        Duration::from_secs(self.license_timeout_seconds)
    }

    /// The standard layout with the configured install paths applied.
    pub fn layout(&self) -> Result<InstallLayout, String> {
        let mut layout = InstallLayout::standard()?;
        if let Some(directory) = &self.install_directory {
            layout.install_directory = directory.clone();
        }
        if let Some(symlink) = &self.symlink_path {
            layout.symlink = symlink.clone();
        }
        Ok(layout)
    }

    /// Sets a field by its file key from command-line text.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn number(key: &str, value: &str) -> Result<u64, String> {
            value
                .trim()
                .parse()
                .map_err(|_| format!("{key} expects a whole number, got {value:?}"))
        }
        fn optional_path(value: &str) -> Option<PathBuf> {
            let value = value.trim();
            (!value.is_empty()).then(|| PathBuf::from(value))
        }

        match key {
            "binary" => self.binary = value.trim().to_string(),
            "poll_interval_seconds" => self.poll_interval_seconds = number(key, value)?,
            "license_refresh_ticks" => self.license_refresh_ticks = number(key, value)?,
            "status_timeout_seconds" => self.status_timeout_seconds = number(key, value)?,
            "license_timeout_seconds" => self.license_timeout_seconds = number(key, value)?,
            "version_url" => {
                let value = value.trim();
                self.version_url = (!value.is_empty()).then(|| value.to_string());
            }
            "cli_version" => self.cli_version = value.trim().to_string(),
            "elevation" => self.elevation = value.parse()?,
            "install_directory" => self.install_directory = optional_path(value),
            "symlink_path" => self.symlink_path = optional_path(value),
            other => return Err(format!("Unknown configuration key: {other}")),
        }
        Ok(())
    }
}
