use std::{path::Path, process::Command};

use super::run_silent;

pub const CLI_BINARY_NAME: &str = "adguardvpn-cli";

/// Looks the wrapped tool up on `PATH` and at the conventional install paths.
pub fn find_cli_binary(configured: &str) -> (String, bool) {
    let candidates = [
        configured,
        CLI_BINARY_NAME,
        "/usr/local/bin/adguardvpn-cli",
        "/opt/adguardvpn_cli/adguardvpn-cli",
    ];

    for candidate in &candidates {
        if let Ok(output) = Command::new("which").arg(candidate).output()
            && output.status.success()
        {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            log::info!("[binary] found via which: {candidate} → {path}");
            return (path, true);
        }
        if Path::new(candidate).is_file() {
            log::info!("[binary] found on disk: {candidate}");
            return (candidate.to_string(), true);
        }
    }

    log::warn!("[binary] {CLI_BINARY_NAME} not found in search paths");
    (configured.to_string(), false)
}

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Login name from `USER` or `LOGNAME`; installing needs it to hand the
/// install directory over to the user.
pub fn current_user() -> Result<String, String> {
    user_from(|name| std::env::var(name).ok())
}

fn user_from(variable: impl Fn(&str) -> Option<String>) -> Result<String, String> {
    ["USER", "LOGNAME"]
        .into_iter()
        .find_map(|name| variable(name).filter(|user| !user.trim().is_empty()))
        .ok_or_else(|| {
            "Cannot determine the current user: neither USER nor LOGNAME is set".to_string()
        })
}

/// Operating system component of the release archive name.
pub fn detect_os() -> Result<&'static str, String> {
    match std::env::consts::OS {
        "linux" => Ok("linux"),
        "macos" => Ok("macos"),
        other => Err(format!("Unsupported operating system: {other}")),
    }
}

pub fn normalize_arch(machine: &str) -> Result<&'static str, String> {
    match machine.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => Ok("x86_64"),
        "i386" | "i486" | "i586" | "i686" | "x86" => Ok("i386"),
        "arm64" | "aarch64" => Ok("arm64"),
        "armv7l" | "armv8l" | "arm" => Ok("armv7"),
        other => Err(format!("Unsupported architecture: {other}")),
    }
}

pub fn detect_arch() -> Result<&'static str, String> {
    normalize_arch(std::env::consts::ARCH)
}

pub fn open_url(url: &str) -> bool {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let opened = run_silent(opener, &[url]);
    if !opened {
        log::warn!("[browser] {opener} could not open {url}");
    }
    opened
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_machine_names() {
        assert_eq!(normalize_arch("amd64"), Ok("x86_64"));
        assert_eq!(normalize_arch("i686"), Ok("i386"));
        assert_eq!(normalize_arch("aarch64"), Ok("arm64"));
        assert_eq!(normalize_arch("armv7l"), Ok("armv7"));
        assert!(normalize_arch("riscv64").is_err());
    }

    #[test]
    fn user_comes_from_user_or_logname() {
        let only_logname = |name: &str| (name == "LOGNAME").then(|| "deck".to_string());
        assert_eq!(user_from(only_logname), Ok("deck".into()));

        let both = |name: &str| Some(if name == "USER" { "alice" } else { "bob" }.to_string());
        assert_eq!(user_from(both), Ok("alice".into()));

        // never falls back to root
        assert!(user_from(|_| None).is_err());
        assert!(user_from(|_| Some(String::new())).is_err());
    }
}
