use std::path::{Path, PathBuf};

use crate::system::platform::CLI_BINARY_NAME;

pub const MANAGER_DIRECTORY_NAME: &str = "AdGuard VPN Manager";
pub const MANAGER_BINARY_NAME: &str = "adguardvpn-manager";

/// Where everything the manager installs lives. Being installed is implied by
/// these paths existing; nothing else records it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallLayout {
    pub install_directory: PathBuf,
    pub symlink: PathBuf,
    pub configuration_directory: PathBuf,
    pub manager_directory: PathBuf,
    pub desktop_directories: Vec<PathBuf>,
    pub applications_directory: PathBuf,
}

impl InstallLayout {
    pub fn for_home(home: &Path) -> Self {
        Self {
            install_directory: PathBuf::from("/opt/adguardvpn_cli"),
            symlink: PathBuf::from("/usr/local/bin").join(CLI_BINARY_NAME),
            configuration_directory: home.join(".local/share/adguardvpn-cli"),
            manager_directory: home.join(MANAGER_DIRECTORY_NAME),
            desktop_directories: vec![home.join("Рабочий стол"), home.join("Desktop")],
            applications_directory: home.join(".local/share/applications"),
        }
    }

    pub fn standard() -> Result<Self, String> {
        let home = dirs::home_dir().ok_or("Cannot determine the home directory")?;
        Ok(Self::for_home(&home))
    }

    #[cfg(test)]
    pub fn relocated(root: &Path) -> Self {
        let mut layout = Self::for_home(&root.join("home"));
        layout.install_directory = root.join("opt").join("adguardvpn_cli");
        layout.symlink = root.join("usr/local/bin").join(CLI_BINARY_NAME);
        layout
    }

    pub fn is_installed(&self) -> bool {
        self.symlink.exists()
    }

    pub fn manager_executable(&self) -> PathBuf {
        self.manager_directory.join(MANAGER_BINARY_NAME)
    }

    pub fn manager_icon(&self) -> PathBuf {
        self.manager_directory.join("ico").join("adguard.png")
    }
}
