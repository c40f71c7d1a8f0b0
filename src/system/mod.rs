use std::{
    io::{Read, Write},
    process::{Command, Stdio},
    sync::mpsc::{self, Sender},
    thread,
    time::{Duration, Instant},
};

pub mod elevation;
pub mod platform;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long output is still collected after the process is gone. A
/// background child holding the pipes open is not waited for.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// A chunk of output, or `None` once the stream reached end of file.
type Chunk = (Stream, Option<Vec<u8>>);

/// Captured result of one external process run.
///
/// Spawn failures and timeouts are folded into this value instead of being
/// returned as errors, so callers can treat every outcome as plain data.
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub spawn_error: Option<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.timed_out && self.spawn_error.is_none()
    }

    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }

    pub fn spawn_failed(error: impl Into<String>) -> Self {
        Self {
            spawn_error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Short human readable reason for a failed run.
    pub fn failure_reason(&self) -> String {
        if let Some(error) = &self.spawn_error {
            return format!("failed to start: {error}");
        }
        if self.timed_out {
            return "timed out".into();
        }
        let stderr = self.stderr.trim();
        match (self.code, stderr.is_empty()) {
            (Some(code), true) => format!("exit code {code}"),
            (Some(code), false) => format!("exit code {code}: {stderr}"),
            (None, _) => "terminated by signal".into(),
        }
    }
}

impl std::fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.success() {
            write!(f, "exit code: 0")
        } else {
            write!(f, "{}", self.failure_reason())
        }
    }
}

/// Runs `program` with `arguments`, optionally feeding `input` on stdin and
/// killing the process once `timeout` elapses.
pub fn run_command(
    program: &str,
    arguments: &[&str],
    input: Option<&str>,
    timeout: Option<Duration>,
) -> CommandOutput {
    log::debug!("[cmd] {} {}", program, arguments.join(" "));

    let mut command = Command::new(program);
    command
        .args(arguments)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => {
            log::debug!("[cmd] spawn error for {}: {}", program, error);
            return CommandOutput::spawn_failed(error.to_string());
        }
    };

    if let Some(text) = input
        && let Some(mut stdin) = child.stdin.take()
        && let Err(error) = stdin.write_all(text.as_bytes())
    {
        log::debug!("[cmd] failed to write stdin for {program}: {error}");
    }

    let (sender, chunks) = mpsc::channel();
    let mut open_streams = 0;
    if let Some(pipe) = child.stdout.take() {
        spawn_reader(Stream::Stdout, pipe, sender.clone());
        open_streams += 1;
    }
    if let Some(pipe) = child.stderr.take() {
        spawn_reader(Stream::Stderr, pipe, sender.clone());
        open_streams += 1;
    }
    drop(sender);

    let started = Instant::now();
    let mut timed_out = false;
    let code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {}
            Err(error) => {
                log::debug!("[cmd] wait error for {program}: {error}");
                break None;
            }
        }

        if let Some(limit) = timeout
            && started.elapsed() >= limit
        {
            log::warn!(
                "[cmd] {} {} timed out after {}s",
                program,
                arguments.join(" "),
                limit.as_secs()
            );
            let _ = child.kill();
            let _ = child.wait();
            timed_out = true;
            break None;
        }

        thread::sleep(POLL_INTERVAL);
    };

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let drain_deadline = Instant::now() + DRAIN_GRACE;
    while open_streams > 0 {
        let remaining = drain_deadline.saturating_duration_since(Instant::now());
        match chunks.recv_timeout(remaining) {
            Ok((Stream::Stdout, Some(bytes))) => stdout.extend_from_slice(&bytes),
            Ok((Stream::Stderr, Some(bytes))) => stderr.extend_from_slice(&bytes),
            Ok((_, None)) => open_streams -= 1,
            Err(_) => {
                log::debug!("[cmd] output of {program} still held open, not waiting for it");
                break;
            }
        }
    }

    let output = CommandOutput {
        code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
        spawn_error: None,
    };

    if output.success() {
        log::trace!(
            "[cmd] OK: {} {} → stdout={}",
            program,
            arguments.join(" "),
            output.stdout.trim(),
        );
    } else {
        log::debug!(
            "[cmd] FAILED ({}): {} {}\n  stdout: {}\n  stderr: {}",
            output.failure_reason(),
            program,
            arguments.join(" "),
            output.stdout.trim(),
            output.stderr.trim(),
        );
    }

    output
}

/// Forwards `reader` in chunks so output written before a hang is kept.
fn spawn_reader<R: Read + Send + 'static>(stream: Stream, mut reader: R, sender: Sender<Chunk>) {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) | Err(_) => {
                    let _ = sender.send((stream, None));
                    break;
                }
                Ok(read) => {
                    if sender.send((stream, Some(buffer[..read].to_vec()))).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Success flag plus the error text: stderr, or the spawn error.
pub fn run_silent_with_output(program: &str, arguments: &[&str]) -> (bool, String) {
    let output = run_command(program, arguments, None, None);
    let success = output.success();
    if let Some(error) = output.spawn_error {
        return (false, error);
    }
    (success, output.stderr)
}

pub fn run_silent(program: &str, arguments: &[&str]) -> bool {
    run_silent_with_output(program, arguments).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let output = run_command("sh", &["-c", "echo hello; exit 3"], None, None);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
        assert!(!output.success());
        assert_eq!(output.failure_reason(), "exit code 3");
    }

    #[test]
    fn feeds_stdin() {
        let output = run_command("cat", &[], Some("y\n"), Some(Duration::from_secs(5)));
        assert!(output.success());
        assert_eq!(output.stdout, "y\n");
    }

    #[test]
    fn kills_process_after_timeout() {
        let started = Instant::now();
        let output = run_command("sleep", &["5"], None, Some(Duration::from_millis(200)));
        assert!(output.timed_out);
        assert!(!output.success());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn background_child_does_not_hold_up_the_call() {
        let started = Instant::now();
        let output = run_command(
            "sh",
            &["-c", "echo started; sleep 8 &"],
            None,
            Some(Duration::from_secs(1)),
        );
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(output.code, Some(0));
        assert!(!output.timed_out);
        assert_eq!(output.stdout.trim(), "started");
    }

    #[test]
    fn silent_run_reports_stderr() {
        let (success, error) = run_silent_with_output(
            "sh",
            &["-c", "echo listing; echo 'no such directory' >&2; exit 1"],
        );
        assert!(!success);
        assert_eq!(error.trim(), "no such directory");
    }

    #[test]
    fn spawn_failure_is_data() {
        let output = run_command("definitely-not-a-real-binary-xyz", &[], None, None);
        assert!(output.spawn_error.is_some());
        assert!(!output.success());
        assert!(output.failure_reason().starts_with("failed to start"));
    }
}
