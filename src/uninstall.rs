use crate::{
    desktop::{DesktopEntries, EntryAction},
    layout::InstallLayout,
    sequence::{Sequence, SequenceReport, Step},
    system::elevation::{Elevator, PrivilegedOp},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UninstallComponents {
    /// Binary, install directory and symlink.
    pub vpn: bool,
    /// `~/.local/share/adguardvpn-cli`
    pub configuration: bool,
    /// Manager directory and its launcher entries.
    pub manager: bool,
}

impl Default for UninstallComponents {
    fn default() -> Self {
        Self {
            vpn: true,
            configuration: false,
            manager: true,
        }
    }
}

impl UninstallComponents {
    pub fn any(&self) -> bool {
        self.vpn || self.configuration || self.manager
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UninstallError {
    #[error("Select at least one component to remove")]
    NothingSelected,
}

#[derive(Default)]
struct UninstallContext {
    unlocked: bool,
}

pub struct Uninstaller<'a> {
    layout: &'a InstallLayout,
    elevator: &'a dyn Elevator,
}

impl<'a> Uninstaller<'a> {
    pub fn new(layout: &'a InstallLayout, elevator: &'a dyn Elevator) -> Self {
        Self { layout, elevator }
    }

    /// Removes the selected components. Every removal is attempted on its
    /// own; failures show up as warnings in the returned report.
    pub fn uninstall(
        &self,
        components: UninstallComponents,
    ) -> Result<SequenceReport, UninstallError> {
        if !components.any() {
            return Err(UninstallError::NothingSelected);
        }
        log::info!("[uninstall] removing {components:?}");

        let layout = self.layout;
        let elevator = self.elevator;
        let mut context = UninstallContext::default();

        let report = Sequence::new("uninstall")
            .step(
                Step::non_critical("Unlock filesystem", move |context: &mut UninstallContext| {
                    elevator.execute(&PrivilegedOp::UnlockFilesystem)?;
                    context.unlocked = true;
                    Ok(())
                })
                .only_if(move |_| components.vpn),
            )
            .step(
                Step::non_critical("Remove symlink", move |_: &mut UninstallContext| {
                    elevator.execute(&PrivilegedOp::RemoveFile(layout.symlink.clone()))
                })
                .only_if(move |_| components.vpn),
            )
            .step(
                Step::non_critical("Remove install directory", move |_: &mut UninstallContext| {
                    elevator.execute(&PrivilegedOp::RemoveDirectory(
                        layout.install_directory.clone(),
                    ))
                })
                .only_if(move |_| components.vpn),
            )
            .step(
                Step::non_critical("Remove configuration", move |_: &mut UninstallContext| {
                    elevator.execute(&PrivilegedOp::RemoveDirectory(
                        layout.configuration_directory.clone(),
                    ))
                })
                .only_if(move |_| components.configuration),
            )
            .step(
                Step::non_critical("Remove desktop entries", move |_: &mut UninstallContext| {
                    let failures: Vec<String> = DesktopEntries::new(layout)
                        .remove()
                        .into_iter()
                        .filter_map(|action| match action {
                            EntryAction::Failed(..) => Some(action.to_string()),
                            _ => None,
                        })
                        .collect();
                    if failures.is_empty() {
                        Ok(())
                    } else {
                        Err(failures.join("; "))
                    }
                })
                .only_if(move |_| components.manager),
            )
            .step(
                Step::non_critical("Remove manager directory", move |_: &mut UninstallContext| {
                    match std::fs::remove_dir_all(&layout.manager_directory) {
                        Ok(()) => Ok(()),
                        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                        Err(error) => Err(format!(
                            "Failed to remove {}: {error}",
                            layout.manager_directory.display()
                        )),
                    }
                })
                .only_if(move |_| components.manager),
            )
            .finally(
                Step::non_critical("Relock filesystem", move |_: &mut UninstallContext| {
                    elevator.execute(&PrivilegedOp::LockFilesystem)
                })
                .only_if(|context| context.unlocked),
            )
            .run(&mut context);

        let warnings = report.warnings().count();
        if report.succeeded() && warnings == 0 {
            log::info!("[uninstall] done");
        } else {
            log::warn!("[uninstall] done with {warnings} warnings");
        }
        Ok(report)
    }
}
