use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use super::{run_command, run_silent_with_output};

const ELEVATED_TIMEOUT: Duration = Duration::from_secs(120);

/// A filesystem operation that may need administrator rights.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrivilegedOp {
    /// `steamos-readonly disable`
    UnlockFilesystem,
    /// `steamos-readonly enable`
    LockFilesystem,
    CreateDirectory(PathBuf),
    ChangeOwner { path: PathBuf, user: String },
    Symlink { target: PathBuf, link: PathBuf },
    RemoveFile(PathBuf),
    RemoveDirectory(PathBuf),
}

impl PrivilegedOp {
    pub fn program_and_arguments(&self) -> (String, Vec<String>) {
        fn path(value: &Path) -> String {
            value.to_string_lossy().into_owned()
        }

        match self {
            Self::UnlockFilesystem => ("steamos-readonly".into(), vec!["disable".into()]),
            Self::LockFilesystem => ("steamos-readonly".into(), vec!["enable".into()]),
            Self::CreateDirectory(directory) => {
                ("mkdir".into(), vec!["-p".into(), path(directory)])
            }
            Self::ChangeOwner { path: target, user } => (
                "chown".into(),
                vec![format!("{user}:{user}"), path(target)],
            ),
            Self::Symlink { target, link } => (
                "ln".into(),
                vec!["-sf".into(), path(target), path(link)],
            ),
            Self::RemoveFile(file) => ("rm".into(), vec!["-f".into(), path(file)]),
            Self::RemoveDirectory(directory) => {
                ("rm".into(), vec!["-rf".into(), path(directory)])
            }
        }
    }
}

impl fmt::Display for PrivilegedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (program, arguments) = self.program_and_arguments();
        write!(f, "{} {}", program, arguments.join(" "))
    }
}

pub trait Elevator: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, operation: &PrivilegedOp) -> Result<(), String>;
}

/// Runs operations through `sudo -S`, piping the captured password on stdin.
pub struct SudoElevator {
    password: String,
}

impl SudoElevator {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }

    /// Checks the password with a harmless `sudo -S echo success`.
    pub fn verify(&self) -> bool {
        let input = format!("{}\n", self.password);
        let output = run_command(
            "sudo",
            &["-S", "-k", "-p", "", "echo", "success"],
            Some(&input),
            Some(Duration::from_secs(15)),
        );
        let verified = output.success() && output.stdout.contains("success");
        if verified {
            log::info!("[elevation] sudo password accepted");
        } else {
            log::warn!("[elevation] sudo password rejected ({})", output.failure_reason());
        }
        verified
    }
}

impl Elevator for SudoElevator {
    fn name(&self) -> &str {
        "sudo"
    }

    fn execute(&self, operation: &PrivilegedOp) -> Result<(), String> {
        let (program, arguments) = operation.program_and_arguments();
        let mut sudo_arguments = vec!["-S", "-p", "", program.as_str()];
        sudo_arguments.extend(arguments.iter().map(String::as_str));

        log::debug!("[elevation] sudo {operation}");
        let input = format!("{}\n", self.password);
        let output = run_command("sudo", &sudo_arguments, Some(&input), Some(ELEVATED_TIMEOUT));
        if output.success() {
            Ok(())
        } else {
            Err(format!("sudo {operation}: {}", output.failure_reason()))
        }
    }
}

pub struct PkexecElevator;

impl PkexecElevator {
    pub fn is_available() -> bool {
        let (success, _) = run_silent_with_output("which", &["pkexec"]);
        if success {
            log::debug!("[preflight] pkexec is available");
        } else {
            log::warn!("[preflight] pkexec not found");
        }
        success
    }
}

impl Elevator for PkexecElevator {
    fn name(&self) -> &str {
        "pkexec"
    }

    fn execute(&self, operation: &PrivilegedOp) -> Result<(), String> {
        let (program, arguments) = operation.program_and_arguments();
        let mut pkexec_arguments = vec![program.as_str()];
        pkexec_arguments.extend(arguments.iter().map(String::as_str));

        log::debug!("[elevation] pkexec {operation}");
        let output = run_command("pkexec", &pkexec_arguments, None, Some(ELEVATED_TIMEOUT));
        if output.success() {
            Ok(())
        } else {
            Err(format!("pkexec {operation}: {}", output.failure_reason()))
        }
    }
}

/// Performs operations in-process with the current user's rights.
///
/// Used for user-owned prefixes. Filesystem unlock and lock still shell out
/// because they only exist as a system tool.
pub struct DirectElevator;

impl Elevator for DirectElevator {
    fn name(&self) -> &str {
        "direct"
    }

    fn execute(&self, operation: &PrivilegedOp) -> Result<(), String> {
        log::debug!("[elevation] direct {operation}");
        match operation {
            PrivilegedOp::UnlockFilesystem | PrivilegedOp::LockFilesystem => {
                let (program, arguments) = operation.program_and_arguments();
                let arguments: Vec<&str> = arguments.iter().map(String::as_str).collect();
                let output = run_command(&program, &arguments, None, Some(ELEVATED_TIMEOUT));
                if output.success() {
                    Ok(())
                } else {
                    Err(format!("{operation}: {}", output.failure_reason()))
                }
            }
            PrivilegedOp::CreateDirectory(directory) => std::fs::create_dir_all(directory)
                .map_err(|error| format!("Failed to create {}: {error}", directory.display())),
            PrivilegedOp::ChangeOwner { path, .. } => {
                if path.exists() {
                    Ok(())
                } else {
                    Err(format!("Cannot change owner of missing {}", path.display()))
                }
            }
            PrivilegedOp::Symlink { target, link } => {
                if link.symlink_metadata().is_ok() {
                    std::fs::remove_file(link).map_err(|error| {
                        format!("Failed to replace {}: {error}", link.display())
                    })?;
                }
                std::os::unix::fs::symlink(target, link).map_err(|error| {
                    format!(
                        "Failed to link {} → {}: {error}",
                        link.display(),
                        target.display()
                    )
                })
            }
            PrivilegedOp::RemoveFile(file) => match std::fs::remove_file(file) {
                Ok(()) => Ok(()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(error) => Err(format!("Failed to remove {}: {error}", file.display())),
            },
            PrivilegedOp::RemoveDirectory(directory) => match std::fs::remove_dir_all(directory) {
                Ok(()) => Ok(()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(error) => Err(format!("Failed to remove {}: {error}", directory.display())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_shell_equivalents() {
        let symlink = PrivilegedOp::Symlink {
            target: PathBuf::from("/opt/adguardvpn_cli/adguardvpn-cli"),
            link: PathBuf::from("/usr/local/bin/adguardvpn-cli"),
        };
        assert_eq!(
            symlink.to_string(),
            "ln -sf /opt/adguardvpn_cli/adguardvpn-cli /usr/local/bin/adguardvpn-cli"
        );

        let owner = PrivilegedOp::ChangeOwner {
            path: PathBuf::from("/opt/adguardvpn_cli"),
            user: "deck".into(),
        };
        assert_eq!(owner.to_string(), "chown deck:deck /opt/adguardvpn_cli");
        assert_eq!(
            PrivilegedOp::UnlockFilesystem.to_string(),
            "steamos-readonly disable"
        );
    }

    #[test]
    fn direct_elevator_manages_files() {
        let directory = tempfile::tempdir().unwrap();
        let nested = directory.path().join("opt").join("tool");
        let elevator = DirectElevator;

        elevator
            .execute(&PrivilegedOp::CreateDirectory(nested.clone()))
            .unwrap();
        assert!(nested.is_dir());

        let target = nested.join("binary");
        std::fs::write(&target, "#!/bin/sh\n").unwrap();
        let link = directory.path().join("link");
        elevator
            .execute(&PrivilegedOp::Symlink {
                target: target.clone(),
                link: link.clone(),
            })
            .unwrap();
        // replacing an existing link succeeds like `ln -sf`
        elevator
            .execute(&PrivilegedOp::Symlink {
                target: target.clone(),
                link: link.clone(),
            })
            .unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), target);

        elevator.execute(&PrivilegedOp::RemoveFile(link.clone())).unwrap();
        assert!(link.symlink_metadata().is_err());
        elevator
            .execute(&PrivilegedOp::RemoveDirectory(nested.clone()))
            .unwrap();
        assert!(!nested.exists());
        // removing again is a no-op, like `rm -rf`
        elevator
            .execute(&PrivilegedOp::RemoveDirectory(nested))
            .unwrap();
    }
}
