use std::time::Duration;

use crate::system::{CommandOutput, run_command};

/// Anything that can run a subcommand of the wrapped VPN tool.
pub trait CommandRunner: Send + Sync {
    fn run(&self, arguments: &[&str], input: Option<&str>, timeout: Duration) -> CommandOutput;
}

/// The `adguardvpn-cli` binary.
#[derive(Clone, Debug)]
pub struct VpnCli {
    binary: String,
}

impl VpnCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

impl CommandRunner for VpnCli {
    fn run(&self, arguments: &[&str], input: Option<&str>, timeout: Duration) -> CommandOutput {
        run_command(&self.binary, arguments, input, Some(timeout))
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run(&self, arguments: &[&str], input: Option<&str>, timeout: Duration) -> CommandOutput {
        (**self).run(arguments, input, timeout)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, arguments: &[&str], input: Option<&str>, timeout: Duration) -> CommandOutput {
        (**self).run(arguments, input, timeout)
    }
}
