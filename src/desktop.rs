use std::{
    fmt,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use crate::{layout::InstallLayout, system::run_silent_with_output};

pub const DESKTOP_FILE_NAME: &str = "AdGuard_VPN_Manager.desktop";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryAction {
    Created(PathBuf),
    AlreadyPresent(PathBuf),
    Removed(PathBuf),
    Absent(PathBuf),
    Failed(PathBuf, String),
    NoDesktopFolder,
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created(path) => write!(f, "created {}", path.display()),
            Self::AlreadyPresent(path) => write!(f, "{} already exists", path.display()),
            Self::Removed(path) => write!(f, "removed {}", path.display()),
            Self::Absent(path) => write!(f, "{} not present", path.display()),
            Self::Failed(path, error) => write!(f, "{}: {error}", path.display()),
            Self::NoDesktopFolder => write!(f, "no desktop folder found"),
        }
    }
}

pub fn render_entry(executable: &Path, icon: &Path) -> String {
    format!(
        "[Desktop Entry]
Encoding=UTF-8
Version=1.0
Type=Application
Name=AdGuard VPN Manager
GenericName=AdGuard VPN Manager
Comment=Manager for AdGuard VPN on Linux
Exec=\"{}\"
Icon={}
Categories=Network;VPN;
Keywords=vpn;adguard;security;privacy;
Terminal=true
StartupNotify=true
StartupWMClass=AdGuardVPNManager
",
        executable.display(),
        icon.display()
    )
}

fn write_entry(path: &Path, content: &str, mode: u32) -> Result<(), String> {
    std::fs::write(path, content)
        .map_err(|error| format!("Failed to write {}: {error}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|error| format!("Failed to set permissions on {}: {error}", path.display()))
}

fn refresh_menu_cache(applications_directory: &Path) {
    let directory = applications_directory.to_string_lossy();
    let (success, output) = run_silent_with_output("update-desktop-database", &[&directory]);
    if success {
        log::info!("[desktop] application menu cache refreshed");
    } else {
        log::warn!("[desktop] update-desktop-database failed: {}", output.trim());
    }
}

/// Launcher entries on the desktop and in the application menu.
pub struct DesktopEntries<'a> {
    layout: &'a InstallLayout,
}

impl<'a> DesktopEntries<'a> {
    pub fn new(layout: &'a InstallLayout) -> Self {
        Self { layout }
    }

    fn desktop_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.layout
            .desktop_directories
            .iter()
            .map(|directory| directory.join(DESKTOP_FILE_NAME))
    }

    fn menu_path(&self) -> PathBuf {
        self.layout.applications_directory.join(DESKTOP_FILE_NAME)
    }

    /// Creates whichever of the two entries is missing. The desktop copy goes
    /// into the first desktop folder that exists.
    pub fn create(&self) -> Result<Vec<EntryAction>, String> {
        let executable = self.layout.manager_executable();
        let icon = self.layout.manager_icon();
        if !executable.exists() {
            return Err(format!("Manager executable not found at {}", executable.display()));
        }
        if !icon.exists() {
            return Err(format!("Manager icon not found at {}", icon.display()));
        }

        let content = render_entry(&executable, &icon);
        let mut actions = Vec::new();

        if let Some(existing) = self.desktop_paths().find(|path| path.exists()) {
            actions.push(EntryAction::AlreadyPresent(existing));
        } else {
            let target = self
                .desktop_paths()
                .find(|path| path.parent().is_some_and(Path::is_dir));
            match target {
                Some(path) => match write_entry(&path, &content, 0o755) {
                    Ok(()) => {
                        log::info!("[desktop] created {}", path.display());
                        actions.push(EntryAction::Created(path));
                    }
                    Err(error) => {
                        log::warn!("[desktop] {error}");
                        actions.push(EntryAction::Failed(path, error));
                    }
                },
                None => {
                    log::warn!("[desktop] no desktop folder to place the launcher in");
                    actions.push(EntryAction::NoDesktopFolder);
                }
            }
        }

        let menu = self.menu_path();
        if menu.exists() {
            actions.push(EntryAction::AlreadyPresent(menu));
        } else {
            let result = std::fs::create_dir_all(&self.layout.applications_directory)
                .map_err(|error| {
                    format!(
                        "Failed to create {}: {error}",
                        self.layout.applications_directory.display()
                    )
                })
                .and_then(|()| write_entry(&menu, &content, 0o644));
            match result {
                Ok(()) => {
                    log::info!("[desktop] added {} to the application menu", menu.display());
                    actions.push(EntryAction::Created(menu));
                    refresh_menu_cache(&self.layout.applications_directory);
                }
                Err(error) => {
                    log::warn!("[desktop] {error}");
                    actions.push(EntryAction::Failed(menu, error));
                }
            }
        }

        Ok(actions)
    }

    pub fn remove(&self) -> Vec<EntryAction> {
        let mut actions = Vec::new();

        for path in self.desktop_paths() {
            if !path.exists() {
                continue;
            }
            actions.push(match std::fs::remove_file(&path) {
                Ok(()) => {
                    log::info!("[desktop] removed {}", path.display());
                    EntryAction::Removed(path)
                }
                Err(error) => EntryAction::Failed(path, error.to_string()),
            });
        }
        if actions.is_empty() {
            log::info!("[desktop] no desktop launcher to remove");
        }

        let menu = self.menu_path();
        if menu.exists() {
            match std::fs::remove_file(&menu) {
                Ok(()) => {
                    log::info!("[desktop] removed {}", menu.display());
                    actions.push(EntryAction::Removed(menu));
                    refresh_menu_cache(&self.layout.applications_directory);
                }
                Err(error) => actions.push(EntryAction::Failed(menu, error.to_string())),
            }
        } else {
            actions.push(EntryAction::Absent(menu));
        }

        actions
    }
}
