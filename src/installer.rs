use std::path::PathBuf;

use crate::{
    archive,
    desktop::DesktopEntries,
    fetch::Fetcher,
    layout::InstallLayout,
    sequence::{Sequence, SequenceReport, Step, StepError},
    system::{
        elevation::{Elevator, PrivilegedOp},
        platform::{self, CLI_BINARY_NAME},
    },
};

pub const DEFAULT_CLI_VERSION: &str = "1.5.10";

const RELEASE_BASE_URL: &str = "https://github.com/AdguardTeam/AdGuardVPNCLI/releases/download";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseArchive {
    pub version: String,
    pub os: String,
    pub arch: String,
}

impl ReleaseArchive {
    pub fn new(version: &str, os: &str, arch: &str) -> Self {
        Self {
            version: version.trim_start_matches('v').to_string(),
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }

    pub fn for_platform(version: &str) -> Result<Self, String> {
        Ok(Self::new(version, platform::detect_os()?, platform::detect_arch()?))
    }

    pub fn file_name(&self) -> String {
        format!(
            "adguardvpn-cli-{}-{}-{}.tar.gz",
            self.version, self.os, self.arch
        )
    }

    pub fn url(&self) -> String {
        format!(
            "{RELEASE_BASE_URL}/v{}-release/{}",
            self.version,
            self.file_name()
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallStage {
    Start,
    FilesystemUnlocked,
    Downloaded,
    Extracted,
    DirectoryPrepared,
    FilesCopied,
    BinaryLocated,
    SymlinkCreated,
    Complete,
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Unsupported platform: {0}")]
    Platform(String),

    #[error("Installation failed at {stage:?}: {source}")]
    Step {
        stage: InstallStage,
        #[source]
        source: StepError,
        report: SequenceReport,
    },
}

#[derive(Debug)]
pub struct InstallSummary {
    pub binary: PathBuf,
    pub report: SequenceReport,
}

struct InstallContext {
    stage: InstallStage,
    unlocked: bool,
    temporary: Option<tempfile::TempDir>,
    archive: PathBuf,
    extracted: PathBuf,
    content_root: PathBuf,
    binary: Option<PathBuf>,
}

impl InstallContext {
    fn new() -> Self {
        Self {
            stage: InstallStage::Start,
            unlocked: false,
            temporary: None,
            archive: PathBuf::new(),
            extracted: PathBuf::new(),
            content_root: PathBuf::new(),
            binary: None,
        }
    }
}

/// Downloads a release of the wrapped tool and installs it into the layout's
/// install directory with a symlink on `PATH`.
pub struct Installer<'a> {
    layout: &'a InstallLayout,
    elevator: &'a dyn Elevator,
    fetcher: &'a dyn Fetcher,
    user: String,
    desktop_entries: bool,
}

impl<'a> Installer<'a> {
    /// `user` receives ownership of the install directory.
    pub fn new(
        layout: &'a InstallLayout,
        elevator: &'a dyn Elevator,
        fetcher: &'a dyn Fetcher,
        user: impl Into<String>,
    ) -> Self {
        Self {
            layout,
            elevator,
            fetcher,
            user: user.into(),
            desktop_entries: true,
        }
    }

    pub fn with_desktop_entries(mut self, enabled: bool) -> Self {
        self.desktop_entries = enabled;
        self
    }

    pub fn install(&self, version: &str) -> Result<InstallSummary, InstallError> {
        let release = ReleaseArchive::for_platform(version).map_err(InstallError::Platform)?;
        self.install_release(&release)
    }

    pub fn install_release(
        &self,
        release: &ReleaseArchive,
    ) -> Result<InstallSummary, InstallError> {
        log::info!(
            "[install] installing adguardvpn-cli {} for {}/{} using {}",
            release.version,
            release.os,
            release.arch,
            self.elevator.name()
        );

        let layout = self.layout;
        let elevator = self.elevator;
        let fetcher = self.fetcher;
        let url = release.url();
        let file_name = release.file_name();
        let user = self.user.clone();

        let mut context = InstallContext::new();
        let report = Sequence::new("install")
            .step(Step::non_critical(
                "Unlock filesystem",
                move |context: &mut InstallContext| {
                    elevator.execute(&PrivilegedOp::UnlockFilesystem)?;
                    context.unlocked = true;
                    context.stage = InstallStage::FilesystemUnlocked;
                    Ok(())
                },
            ))
            .step(Step::critical(
                "Create temporary directory",
                |context: &mut InstallContext| {
                    let temporary = tempfile::Builder::new()
                        .prefix("adguardvpn-install-")
                        .tempdir()
                        .map_err(|error| format!("Failed to create temporary directory: {error}"))?;
                    context.archive = temporary.path().join(&file_name);
                    context.extracted = temporary.path().join("extracted");
                    context.temporary = Some(temporary);
                    Ok(())
                },
            ))
            .step(Step::critical(
                "Download archive",
                move |context: &mut InstallContext| {
                    log::info!("[install] download URL: {url}");
                    fetcher.download(&url, &context.archive)?;
                    context.stage = InstallStage::Downloaded;
                    Ok(())
                },
            ))
            .step(Step::critical(
                "Extract archive",
                |context: &mut InstallContext| {
                    archive::extract_tar_gz(&context.archive, &context.extracted)?;
                    context.content_root = archive::find_content_root(&context.extracted)?;
                    log::info!(
                        "[install] content root: {}",
                        context.content_root.display()
                    );
                    context.stage = InstallStage::Extracted;
                    Ok(())
                },
            ))
            .step(Step::critical(
                "Create install directory",
                move |_: &mut InstallContext| {
                    elevator.execute(&PrivilegedOp::CreateDirectory(
                        layout.install_directory.clone(),
                    ))
                },
            ))
            .step(Step::critical(
                "Change install directory owner",
                move |context: &mut InstallContext| {
                    elevator.execute(&PrivilegedOp::ChangeOwner {
                        path: layout.install_directory.clone(),
                        user: user.clone(),
                    })?;
                    context.stage = InstallStage::DirectoryPrepared;
                    Ok(())
                },
            ))
            .step(Step::critical(
                "Copy files",
                move |context: &mut InstallContext| {
                    let copied = archive::copy_directory_contents(
                        &context.content_root,
                        &layout.install_directory,
                    )?;
                    log::info!(
                        "[install] copied {copied} items into {}",
                        layout.install_directory.display()
                    );
                    context.stage = InstallStage::FilesCopied;
                    Ok(())
                },
            ))
            .step(Step::critical(
                "Locate binary",
                move |context: &mut InstallContext| {
                    let binary = archive::locate_binary(&layout.install_directory, CLI_BINARY_NAME)
                        .ok_or_else(|| {
                            format!(
                                "{CLI_BINARY_NAME} not found in {}",
                                layout.install_directory.display()
                            )
                        })?;
                    archive::make_executable(&binary)?;
                    log::info!("[install] binary: {}", binary.display());
                    context.binary = Some(binary);
                    context.stage = InstallStage::BinaryLocated;
                    Ok(())
                },
            ))
            .step(Step::non_critical(
                "Create symlink",
                move |context: &mut InstallContext| {
                    let Some(binary) = context.binary.clone() else {
                        return Err("binary location unknown".into());
                    };
                    elevator.execute(&PrivilegedOp::Symlink {
                        target: binary,
                        link: layout.symlink.clone(),
                    })?;
                    context.stage = InstallStage::SymlinkCreated;
                    Ok(())
                },
            ))
            .step(
                Step::non_critical("Create desktop entries", move |_: &mut InstallContext| {
                    for action in DesktopEntries::new(layout).create()? {
                        log::info!("[install] desktop entry: {action}");
                    }
                    Ok(())
                })
                .only_if(|_| self.desktop_entries),
            )
            .step(Step::non_critical(
                "Clean temporary files",
                |context: &mut InstallContext| {
                    context.stage = InstallStage::Complete;
                    match context.temporary.take() {
                        Some(temporary) => temporary
                            .close()
                            .map_err(|error| format!("Failed to remove temporary files: {error}")),
                        None => Ok(()),
                    }
                },
            ))
            .finally(
                Step::non_critical("Relock filesystem", move |_: &mut InstallContext| {
                    elevator.execute(&PrivilegedOp::LockFilesystem)
                })
                // after a complete install the filesystem stays writable
                .only_if(|context| context.unlocked && context.stage != InstallStage::Complete),
            )
            .run(&mut context);

        match (report.error.clone(), context.binary) {
            (None, Some(binary)) => {
                log::info!("[install] installation complete");
                Ok(InstallSummary { binary, report })
            }
            (Some(source), _) => Err(InstallError::Step {
                stage: context.stage,
                source,
                report,
            }),
            (None, None) => Err(InstallError::Step {
                stage: context.stage,
                source: StepError {
                    step: "Locate binary".into(),
                    reason: "binary location unknown".into(),
                },
                report,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        archive::test_support::tar_gz,
        fetch::fake::FakeFetcher,
        sequence::StepOutcome,
        system::elevation::DirectElevator,
    };

    /// Performs operations in-process but records them and pretends the
    /// filesystem lock commands succeed.
    #[derive(Default)]
    struct RecordingElevator {
        operations: Mutex<Vec<PrivilegedOp>>,
        fail_unlock: bool,
        fail_symlink: bool,
        fail_chown: bool,
    }

    impl Elevator for RecordingElevator {
        fn name(&self) -> &str {
            "recording"
        }

        fn execute(&self, operation: &PrivilegedOp) -> Result<(), String> {
            self.operations.lock().unwrap().push(operation.clone());
            match operation {
                PrivilegedOp::UnlockFilesystem if self.fail_unlock => Err("not SteamOS".into()),
                PrivilegedOp::UnlockFilesystem | PrivilegedOp::LockFilesystem => Ok(()),
                PrivilegedOp::Symlink { .. } if self.fail_symlink => Err("read-only /usr".into()),
                PrivilegedOp::ChangeOwner { .. } if self.fail_chown => {
                    Err("chown: invalid user".into())
                }
                other => DirectElevator.execute(other),
            }
        }
    }

    fn release() -> ReleaseArchive {
        ReleaseArchive::new("1.5.10", "linux", "x86_64")
    }

    #[test]
    fn builds_release_url() {
        assert_eq!(
            release().url(),
            "https://github.com/AdguardTeam/AdGuardVPNCLI/releases/download/v1.5.10-release/adguardvpn-cli-1.5.10-linux-x86_64.tar.gz"
        );
    }

    #[test]
    fn installs_contents_of_single_root_folder() {
        let root = tempfile::tempdir().unwrap();
        let layout = InstallLayout::relocated(root.path());
        std::fs::create_dir_all(layout.symlink.parent().unwrap()).unwrap();

        let fetcher = FakeFetcher::new().serve(
            &release().url(),
            tar_gz(&[
                ("pkg/adguardvpn-cli", "#!/bin/sh\necho vpn\n", 0o644),
                ("pkg/lib/helper.so", "so", 0o644),
            ]),
        );
        let elevator = RecordingElevator::default();

        let summary = Installer::new(&layout, &elevator, &fetcher, "deck")
            .with_desktop_entries(false)
            .install_release(&release())
            .unwrap();

        let binary = layout.install_directory.join("adguardvpn-cli");
        assert_eq!(summary.binary, binary);
        assert!(layout.install_directory.join("lib").join("helper.so").exists());
        assert!(!layout.install_directory.join("pkg").exists());

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&binary).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert_eq!(std::fs::read_link(&layout.symlink).unwrap(), binary);
        assert!(layout.is_installed());

        let operations = elevator.operations.lock().unwrap();
        assert_eq!(operations.first(), Some(&PrivilegedOp::UnlockFilesystem));
        assert!(!operations.contains(&PrivilegedOp::LockFilesystem));
        assert_eq!(
            summary.report.outcome_of("Relock filesystem"),
            Some(&StepOutcome::Skipped)
        );
    }

    fn served_release() -> FakeFetcher {
        FakeFetcher::new().serve(
            &release().url(),
            tar_gz(&[("pkg/adguardvpn-cli", "#!/bin/sh\necho vpn\n", 0o644)]),
        )
    }

    #[test]
    fn failed_symlink_still_installs() {
        let root = tempfile::tempdir().unwrap();
        let layout = InstallLayout::relocated(root.path());
        let fetcher = served_release();
        let elevator = RecordingElevator {
            fail_symlink: true,
            ..RecordingElevator::default()
        };

        let summary = Installer::new(&layout, &elevator, &fetcher, "deck")
            .with_desktop_entries(false)
            .install_release(&release())
            .unwrap();

        assert_eq!(summary.binary, layout.install_directory.join("adguardvpn-cli"));
        assert!(summary.binary.exists());
        assert!(layout.symlink.symlink_metadata().is_err());
        assert!(matches!(
            summary.report.outcome_of("Create symlink"),
            Some(StepOutcome::Warned(reason)) if reason.contains("read-only /usr")
        ));
        assert_eq!(
            summary.report.outcome_of("Clean temporary files"),
            Some(&StepOutcome::Succeeded)
        );
    }

    #[test]
    fn failed_chown_stops_before_copying_and_relocks() {
        let root = tempfile::tempdir().unwrap();
        let layout = InstallLayout::relocated(root.path());
        let fetcher = served_release();
        let elevator = RecordingElevator {
            fail_chown: true,
            ..RecordingElevator::default()
        };

        let error = Installer::new(&layout, &elevator, &fetcher, "deck")
            .with_desktop_entries(false)
            .install_release(&release())
            .unwrap_err();

        match error {
            InstallError::Step { source, report, .. } => {
                assert_eq!(source.step, "Change install directory owner");
                assert_eq!(report.outcome_of("Copy files"), Some(&StepOutcome::Skipped));
                assert_eq!(report.outcome_of("Create symlink"), Some(&StepOutcome::Skipped));
            }
            other => panic!("unexpected error {other}"),
        }

        assert!(!layout.install_directory.join("adguardvpn-cli").exists());
        let operations = elevator.operations.lock().unwrap();
        assert_eq!(operations.last(), Some(&PrivilegedOp::LockFilesystem));
    }

    #[test]
    fn failed_download_relocks_and_reports_stage() {
        let root = tempfile::tempdir().unwrap();
        let layout = InstallLayout::relocated(root.path());
        let fetcher = FakeFetcher::new();
        let elevator = RecordingElevator::default();

        let error = Installer::new(&layout, &elevator, &fetcher, "deck")
            .with_desktop_entries(false)
            .install_release(&release())
            .unwrap_err();

        match error {
            InstallError::Step {
                stage,
                source,
                report,
            } => {
                assert_eq!(stage, InstallStage::FilesystemUnlocked);
                assert_eq!(source.step, "Download archive");
                assert_eq!(report.outcome_of("Copy files"), Some(&StepOutcome::Skipped));
            }
            other => panic!("unexpected error {other}"),
        }

        let operations = elevator.operations.lock().unwrap();
        assert_eq!(operations.last(), Some(&PrivilegedOp::LockFilesystem));
        assert!(!layout.install_directory.exists());
    }

    #[test]
    fn no_relock_when_unlock_failed() {
        let root = tempfile::tempdir().unwrap();
        let layout = InstallLayout::relocated(root.path());
        let fetcher = FakeFetcher::new().serve(
            &release().url(),
            tar_gz(&[("README", "no binary here", 0o644)]),
        );
        let elevator = RecordingElevator {
            fail_unlock: true,
            ..RecordingElevator::default()
        };

        let error = Installer::new(&layout, &elevator, &fetcher, "deck")
            .with_desktop_entries(false)
            .install_release(&release())
            .unwrap_err();

        assert!(error.to_string().contains("adguardvpn-cli not found"));
        let operations = elevator.operations.lock().unwrap();
        assert!(!operations.contains(&PrivilegedOp::LockFilesystem));
    }
}
