use std::{cmp::Ordering, os::unix::fs::PermissionsExt, path::Path, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::{ansi::strip_ansi, archive, fetch::Fetcher, vpn_cli::CommandRunner};

pub const MANAGER_VERSION: &str = env!("CARGO_PKG_VERSION");

const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);
const CHECK_UPDATE_TIMEOUT: Duration = Duration::from_secs(15);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(60);
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

const AVAILABLE_PHRASES: &[&str] = &[
    "is now available",
    "update available",
    "available",
    "доступно",
    "можно обновиться",
    "new version",
];

const LATEST_PHRASES: &[&str] = &[
    "latest version",
    "up to date",
    "актуальна",
    "you are using the latest",
];

static UPDATE_VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)AdGuard VPN[^\n]*v?(\d+\.\d+\.\d+)[^\n]*is now available",
        r"(?i)v?(\d+\.\d+\.\d+)[^\n]*is now available",
        r"(?i)version[^\n]*v?(\d+\.\d+\.\d+)",
        r"(?i)v?(\d+\.\d+\.\d+)[^\n]*available",
        r"(?i)обновление[^\n]*v?(\d+\.\d+\.\d+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static TOOL_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"v?(\d+\.\d+\.\d+)").expect("version pattern"));

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Download failed: {0}")]
    Download(String),

    #[error("Failed to replace {path}: {reason}")]
    Replace { path: String, reason: String },

    #[error("Failed to unpack update: {0}")]
    Extract(String),

    #[error("{command} timed out")]
    TimedOut { command: &'static str },

    #[error("{command} failed: {output}")]
    CommandFailed { command: &'static str, output: String },
}

pub fn clean_version(version: &str) -> &str {
    version.trim().trim_start_matches(['v', 'V'])
}

fn version_sort_key(version: &str) -> Vec<u64> {
    clean_version(version)
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let mut left = version_sort_key(left);
    let mut right = version_sort_key(right);
    let length = left.len().max(right.len());
    left.resize(length, 0);
    right.resize(length, 0);
    left.cmp(&right)
}

/// Component-wise numeric comparison, so `10.0.0` is newer than `9.0.0`.
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    compare_versions(latest, current) == Ordering::Greater
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub version: String,
    pub download_url: String,
}

impl Manifest {
    /// `<version>\n<download_url>`; further lines are ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.trim().lines().map(str::trim);
        let version = lines.next().filter(|line| !line.is_empty())?;
        let download_url = lines.next().filter(|line| !line.is_empty())?;
        Some(Self {
            version: version.to_string(),
            download_url: download_url.to_string(),
        })
    }
}

/// Fetches the manifest and reports it when it names a newer manager
/// release. Network and parse failures mean "no update".
pub fn check_manager_update(
    fetcher: &dyn Fetcher,
    manifest_url: &str,
    current_version: &str,
) -> Option<Manifest> {
    let text = match fetcher.fetch_text(manifest_url, MANIFEST_TIMEOUT) {
        Ok(text) => text,
        Err(error) => {
            log::warn!("[update] manifest unavailable: {error}");
            return None;
        }
    };

    let Some(manifest) = Manifest::parse(&text) else {
        log::warn!("[update] manifest at {manifest_url} is malformed");
        return None;
    };

    if is_newer_version(&manifest.version, current_version) {
        log::info!(
            "[update] manager {} available (running {current_version})",
            manifest.version
        );
        Some(manifest)
    } else {
        log::info!("[update] manager {current_version} is up to date");
        None
    }
}

/// Replaces the manager directory with the contents of the release archive.
///
/// The archive is unpacked next to the manager directory first, so a bad
/// download leaves the installed manager untouched.
pub fn apply_manager_update(
    fetcher: &dyn Fetcher,
    manifest: &Manifest,
    manager_directory: &Path,
) -> Result<(), UpdateError> {
    let temporary = tempfile::Builder::new()
        .prefix("adguardvpn-manager-update-")
        .tempdir()
        .map_err(|error| UpdateError::Download(error.to_string()))?;
    let archive_path = temporary
        .path()
        .join(format!("manager_update_{}.tar.gz", clean_version(&manifest.version)));

    fetcher
        .download(&manifest.download_url, &archive_path)
        .map_err(UpdateError::Download)?;

    let replace_error = |error: std::io::Error| UpdateError::Replace {
        path: manager_directory.display().to_string(),
        reason: error.to_string(),
    };
    let parent = manager_directory
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(replace_error)?;

    let staging = tempfile::Builder::new()
        .prefix(".adguardvpn-manager-staging-")
        .tempdir_in(parent)
        .map_err(replace_error)?;
    archive::extract_tar_gz(&archive_path, staging.path()).map_err(UpdateError::Extract)?;
    // tempdir creates 0700
    std::fs::set_permissions(staging.path(), std::fs::Permissions::from_mode(0o755))
        .map_err(replace_error)?;

    let backup = parent.join(".adguardvpn-manager-previous");
    if backup.exists() {
        std::fs::remove_dir_all(&backup).map_err(replace_error)?;
    }
    let had_previous = manager_directory.exists();
    if had_previous {
        std::fs::rename(manager_directory, &backup).map_err(replace_error)?;
    }

    if let Err(error) = std::fs::rename(staging.path(), manager_directory) {
        if had_previous && let Err(restore) = std::fs::rename(&backup, manager_directory) {
            log::error!(
                "[update] could not restore {}: {restore}",
                manager_directory.display()
            );
        }
        return Err(replace_error(error));
    }

    if had_previous && let Err(error) = std::fs::remove_dir_all(&backup) {
        log::warn!("[update] could not remove {}: {error}", backup.display());
    }
    log::info!("[update] manager updated to {}", manifest.version);
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolUpdate {
    Available { version: Option<String> },
    UpToDate,
    Unknown,
}

/// First version found by the ordered pattern list, always `v`-prefixed.
pub fn extract_update_version(text: &str) -> Option<String> {
    UPDATE_VERSION_PATTERNS.iter().find_map(|pattern| {
        let version = pattern.captures(text)?.get(1)?.as_str();
        Some(format!("v{version}"))
    })
}

/// Availability phrases are tested before the up-to-date ones, so a line
/// that mentions both counts as an update.
pub fn classify_check_update(text: &str) -> ToolUpdate {
    let lower = text.to_lowercase();

    if AVAILABLE_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        ToolUpdate::Available {
            version: extract_update_version(text),
        }
    } else if LATEST_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        ToolUpdate::UpToDate
    } else {
        ToolUpdate::Unknown
    }
}

pub fn parse_tool_version(text: &str) -> Option<String> {
    let text = text.trim();
    if let Some(captures) = TOOL_VERSION.captures(text) {
        return Some(captures[1].to_string());
    }
    (!text.is_empty()).then(|| text.to_string())
}

/// `check-update`, `update` and `-v` of the wrapped tool.
pub struct ToolUpdater<R> {
    runner: R,
}

impl<R: CommandRunner> ToolUpdater<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn current_version(&self) -> Option<String> {
        let output = self.runner.run(&["-v"], None, VERSION_TIMEOUT);
        if !output.success() {
            return None;
        }
        parse_tool_version(&strip_ansi(&output.stdout))
    }

    pub fn check(&self) -> Result<ToolUpdate, UpdateError> {
        let output = self.runner.run(&["check-update"], None, CHECK_UPDATE_TIMEOUT);
        if output.timed_out {
            return Err(UpdateError::TimedOut {
                command: "check-update",
            });
        }
        if let Some(error) = &output.spawn_error {
            return Err(UpdateError::CommandFailed {
                command: "check-update",
                output: error.clone(),
            });
        }

        let result = classify_check_update(&strip_ansi(&output.combined()));
        log::info!("[update] check-update: {result:?}");
        Ok(result)
    }

    /// Runs `update`, confirming its prompt. Returns the cleaned output.
    pub fn update(&self) -> Result<String, UpdateError> {
        log::info!("[update] updating adguardvpn-cli");
        let output = self.runner.run(&["update"], Some("y\n"), UPDATE_TIMEOUT);
        if output.timed_out {
            return Err(UpdateError::TimedOut { command: "update" });
        }

        let text = strip_ansi(&output.combined());
        if output.success() {
            Ok(text)
        } else {
            Err(UpdateError::CommandFailed {
                command: "update",
                output: if text.trim().is_empty() {
                    output.failure_reason()
                } else {
                    text.trim().to_string()
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{archive::test_support::tar_gz, fetch::fake::FakeFetcher, vpn_cli::fake::FakeCli};

    const MANIFEST_URL: &str = "https://updates.invalid/version.txt";

    #[test]
    fn compares_versions_numerically() {
        assert!(is_newer_version("2.0.0", "1.9.9"));
        assert!(is_newer_version("v1.5.10", "1.5.9"));
        assert!(!is_newer_version("1.5.10", "v1.5.10"));
        assert!(!is_newer_version("1.5", "1.5.0"));
    }

    #[test]
    fn nine_is_not_newer_than_ten() {
        // "9.0.0" > "10.0.0" as strings
        assert!(!is_newer_version("9.0.0", "10.0.0"));
        assert!(is_newer_version("10.0.0", "9.0.0"));
    }

    #[test]
    fn reports_newer_manifest() {
        let fetcher = FakeFetcher::new().serve(MANIFEST_URL, "2.0.0\nhttp://x/file.tar.gz\n");
        assert_eq!(
            check_manager_update(&fetcher, MANIFEST_URL, "1.9.9"),
            Some(Manifest {
                version: "2.0.0".into(),
                download_url: "http://x/file.tar.gz".into(),
            })
        );
        assert_eq!(check_manager_update(&fetcher, MANIFEST_URL, "2.0.0"), None);
    }

    #[test]
    fn malformed_or_missing_manifest_is_no_update() {
        let fetcher = FakeFetcher::new().serve(MANIFEST_URL, "2.0.0\n");
        assert_eq!(check_manager_update(&fetcher, MANIFEST_URL, "1.0.0"), None);
        let fetcher = FakeFetcher::new();
        assert_eq!(check_manager_update(&fetcher, MANIFEST_URL, "1.0.0"), None);
    }

    #[test]
    fn applies_manager_update() {
        let home = tempfile::tempdir().unwrap();
        let manager = home.path().join("AdGuard VPN Manager");
        std::fs::create_dir_all(&manager).unwrap();
        std::fs::write(manager.join("stale"), "old").unwrap();

        let manifest = Manifest {
            version: "2.0.0".into(),
            download_url: "http://x/file.tar.gz".into(),
        };
        let fetcher = FakeFetcher::new().serve(
            &manifest.download_url,
            tar_gz(&[("adguardvpn-manager", "bin", 0o755), ("ico/adguard.png", "png", 0o644)]),
        );

        apply_manager_update(&fetcher, &manifest, &manager).unwrap();
        assert!(!manager.join("stale").exists());
        assert!(manager.join("ico").join("adguard.png").exists());
    }

    #[test]
    fn corrupt_download_keeps_installed_manager() {
        let home = tempfile::tempdir().unwrap();
        let manager = home.path().join("AdGuard VPN Manager");
        std::fs::create_dir_all(&manager).unwrap();
        std::fs::write(manager.join("adguardvpn-manager"), "current").unwrap();

        let manifest = Manifest {
            version: "2.0.0".into(),
            download_url: "http://x/file.tar.gz".into(),
        };
        let fetcher =
            FakeFetcher::new().serve(&manifest.download_url, "<html>404 Not Found</html>");

        let error = apply_manager_update(&fetcher, &manifest, &manager).unwrap_err();
        assert!(matches!(error, UpdateError::Extract(_)));
        assert_eq!(
            std::fs::read_to_string(manager.join("adguardvpn-manager")).unwrap(),
            "current"
        );
        // no staging leftovers next to the manager
        assert_eq!(std::fs::read_dir(home.path()).unwrap().count(), 1);
    }

    #[test]
    fn classifies_check_update_output() {
        assert_eq!(
            classify_check_update("AdGuard VPN v1.6.2 is now available"),
            ToolUpdate::Available {
                version: Some("v1.6.2".into())
            }
        );
        assert_eq!(
            classify_check_update("You are using the latest version"),
            ToolUpdate::UpToDate
        );
        assert_eq!(classify_check_update("Something odd"), ToolUpdate::Unknown);
        assert_eq!(
            classify_check_update("Update available"),
            ToolUpdate::Available { version: None }
        );
    }

    #[test]
    fn update_check_serializes_with_status_tag() {
        let available = ToolUpdate::Available {
            version: Some("v1.6.2".into()),
        };
        assert_eq!(
            serde_json::to_string(&available).unwrap(),
            r#"{"status":"available","version":"v1.6.2"}"#
        );
        assert_eq!(
            serde_json::to_string(&ToolUpdate::UpToDate).unwrap(),
            r#"{"status":"up_to_date"}"#
        );
    }

    #[test]
    fn parses_tool_version() {
        assert_eq!(
            parse_tool_version("AdGuard VPN CLI v1.5.10\n"),
            Some("1.5.10".into())
        );
        assert_eq!(parse_tool_version("dev-build"), Some("dev-build".into()));
        assert_eq!(parse_tool_version(""), None);
    }

    #[test]
    fn update_confirms_prompt() {
        let cli = FakeCli::new()
            .respond("update", 0, "\x1b[32mUpdated to 1.6.2\x1b[0m")
            .respond("check-update", 0, "You are using the latest version");
        let updater = ToolUpdater::new(&cli);

        assert_eq!(updater.update().unwrap(), "Updated to 1.6.2");
        assert_eq!(updater.check().unwrap(), ToolUpdate::UpToDate);

        let calls = cli.calls.lock().unwrap();
        assert_eq!(calls[0], ("update".to_string(), Some("y\n".to_string())));
    }
}
