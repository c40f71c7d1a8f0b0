use std::time::Duration;

use crate::{
    status::{ConnectionState, StatusSource},
    vpn_cli::CommandRunner,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Answers the tool's confirmation prompts.
const CONNECT_ANSWERS: &str = "y\ny\ny\n";

pub const CONFIRM_ATTEMPTS: u32 = 5;
pub const CONFIRM_INTERVAL: Duration = Duration::from_secs(3);

pub struct Connection<R> {
    runner: R,
}

impl<R: CommandRunner> Connection<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Runs `connect`, to `location` when given.
    pub fn connect(&self, location: Option<&str>) -> Result<(), String> {
        let mut arguments = vec!["connect"];
        if let Some(location) = location {
            arguments.extend(["-l", location]);
        }
        log::info!("[connect] {}", arguments.join(" "));

        let output = self
            .runner
            .run(&arguments, Some(CONNECT_ANSWERS), CONNECT_TIMEOUT);
        if output.success() {
            Ok(())
        } else {
            Err(format!("Connect failed: {}", output.failure_reason()))
        }
    }

    pub fn disconnect(&self) -> Result<(), String> {
        let output = self.runner.run(&["disconnect"], None, DISCONNECT_TIMEOUT);
        if output.success() {
            log::info!("[connect] disconnected");
            Ok(())
        } else {
            Err(format!("Disconnect failed: {}", output.failure_reason()))
        }
    }
}

/// Re-reads the status until the tunnel reports connected, waiting between
/// checks with `wait`. Returns the last state seen.
pub fn confirm_connected(
    status: &dyn StatusSource,
    attempts: u32,
    mut wait: impl FnMut(),
) -> ConnectionState {
    let mut state = ConnectionState::Disconnected;
    for attempt in 1..=attempts {
        state = status.current_status();
        log::debug!("[connect] check {attempt}/{attempts}: {state}");
        if state.is_connected() {
            break;
        }
        if attempt < attempts {
            wait();
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::vpn_cli::fake::FakeCli;

    struct Sequenced(Mutex<Vec<ConnectionState>>);

    impl StatusSource for Sequenced {
        fn current_status(&self) -> ConnectionState {
            let mut states = self.0.lock().unwrap();
            if states.len() > 1 {
                states.remove(0)
            } else {
                states[0].clone()
            }
        }
    }

    #[test]
    fn connect_answers_prompts() {
        let cli = FakeCli::new().respond("connect -l Tokyo", 0, "Connected to TOKYO");
        Connection::new(&cli).connect(Some("Tokyo")).unwrap();

        let calls = cli.calls.lock().unwrap();
        assert_eq!(calls[0].1.as_deref(), Some("y\ny\ny\n"));
    }

    #[test]
    fn connect_reports_failure() {
        let cli = FakeCli::new().time_out("connect");
        let error = Connection::new(&cli).connect(None).unwrap_err();
        assert!(error.starts_with("Connect failed"));
    }

    #[test]
    fn confirms_after_a_few_checks() {
        let status = Sequenced(Mutex::new(vec![
            ConnectionState::Disconnected,
            ConnectionState::Connected {
                location: Some("Paris".into()),
            },
        ]));
        let mut waits = 0;
        let state = confirm_connected(&status, 5, || waits += 1);
        assert_eq!(state.location(), Some("Paris"));
        assert_eq!(waits, 1);
    }
}
