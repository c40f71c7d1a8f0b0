use std::{
    io::{BufRead, BufReader, Read},
    process::{Child, Command, Stdio},
    time::Duration,
};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    ansi::strip_ansi,
    connection::Connection,
    status::StatusSource,
    vpn_cli::CommandRunner,
};

pub const LOGIN_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
pub const LOGIN_POLL_INTERVAL: Duration = Duration::from_secs(20);
pub const LOGIN_POLL_ATTEMPTS: u32 = 30;
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

static LOGIN_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://\S+").expect("login url pattern"));

pub fn extract_login_url(text: &str) -> Option<String> {
    LOGIN_URL
        .find(&strip_ansi(text))
        .map(|found| found.as_str().to_string())
}

/// Reads `reader` line by line until one carries a login URL.
pub fn read_login_url(reader: impl BufRead) -> Option<String> {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                log::debug!("[auth] stopped reading login output: {error}");
                return None;
            }
        };
        log::debug!("[auth] login: {}", line.trim());
        if let Some(url) = extract_login_url(&line) {
            return Some(url);
        }
    }
    None
}

/// The account tool answers `list-locations` only for a signed-in user.
pub fn is_logged_in(runner: &impl CommandRunner) -> bool {
    runner
        .run(&["list-locations"], None, LOGIN_CHECK_TIMEOUT)
        .success()
}

/// Polls [`is_logged_in`] up to `attempts` times, calling `wait` between
/// checks.
pub fn wait_for_login(
    runner: &impl CommandRunner,
    attempts: u32,
    mut wait: impl FnMut(u32),
) -> bool {
    for attempt in 1..=attempts {
        if is_logged_in(runner) {
            log::info!("[auth] signed in after {attempt} checks");
            return true;
        }
        if attempt < attempts {
            wait(attempt);
        }
    }
    log::warn!("[auth] still signed out after {attempts} checks");
    false
}

/// A running `login` process whose sign-in URL has been read.
pub struct LoginSession {
    child: Child,
    pub url: String,
}

impl LoginSession {
    /// Starts `<binary> login` and waits for it to print the sign-in URL,
    /// looking at stderr when stdout closes without one.
    pub fn start(binary: &str) -> Result<Self, String> {
        log::info!("[auth] starting {binary} login");
        let mut child = Command::new(binary)
            .arg("login")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| format!("Failed to start {binary} login: {error}"))?;

        let from_stdout = child
            .stdout
            .take()
            .and_then(|stdout| read_login_url(BufReader::new(stdout)));

        let url = match from_stdout {
            Some(url) => Some(url),
            None => child.stderr.take().and_then(|mut stderr| {
                let mut text = String::new();
                stderr.read_to_string(&mut text).ok()?;
                extract_login_url(&text)
            }),
        };

        match url {
            Some(url) => Ok(Self { child, url }),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err("The login command did not print a sign-in URL".into())
            }
        }
    }

    pub fn finish(mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Disconnects first when a tunnel is up, then signs out.
pub fn logout(
    runner: &impl CommandRunner,
    status: &dyn StatusSource,
) -> Result<(), String> {
    if status.current_status().is_connected() {
        log::info!("[auth] disconnecting before logout");
        Connection::new(runner).disconnect()?;
    }

    let output = runner.run(&["logout"], None, LOGOUT_TIMEOUT);
    if output.success() {
        log::info!("[auth] signed out");
        Ok(())
    } else {
        Err(format!("Logout failed: {}", output.failure_reason()))
    }
}
