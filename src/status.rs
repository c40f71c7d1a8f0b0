use std::{fmt, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::{ansi::strip_ansi, system::CommandOutput, vpn_cli::CommandRunner};

const DISCONNECTED_PHRASES: &[&str] = &[
    "not connected",
    "disconnected",
    "no connection",
    "не подключен",
    "отключен",
];

const CONNECTED_PHRASES: &[&str] = &[
    "connected to",
    "successfully connected",
    "you are connected",
    "подключен к",
    "running on tun",
    "tun mode",
];

const KNOWN_CITIES: &[(&str, &str)] = &[
    ("frankfurt", "Frankfurt"),
    ("london", "London"),
    ("new york", "New York"),
    ("singapore", "Singapore"),
    ("tokyo", "Tokyo"),
    ("amsterdam", "Amsterdam"),
    ("paris", "Paris"),
    ("moscow", "Moscow"),
];

static LOCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)Connected to (.+?) in",
        r"(?i)Connected to (.+?)\n",
        r"(?i)Connected to (.+?)\.",
        r"(?i)Location: (.+)",
        r"(?i)подключен к (.+?) в",
        r"(?i)Подключено к (.+?) в",
        r"(?i)Successfully Connected to (.+)",
        r"(?i)You are connected to (.+?)\.",
    ])
});

static VERBOSE_LOCATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)Location:\s*(.+)",
        r"(?i)Server:\s*(.+)",
        r"(?i)Endpoint:\s*(.+)",
        r"(?i)Connected to:\s*(.+)",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected { location: Option<String> },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    #[cfg(test)]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Connected { location } => location.as_deref(),
            Self::Disconnected => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected { location: Some(location) } => write!(f, "Connected ({location})"),
            Self::Connected { location: None } => write!(f, "Connected"),
        }
    }
}

/// Phrase scan over normalized `status` text. Disconnected phrases are
/// checked first because "disconnected" itself contains "connected".
pub fn is_connected(text: &str) -> bool {
    let lower = text.to_lowercase();

    if DISCONNECTED_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
    {
        return false;
    }

    CONNECTED_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        let location = pattern.captures(text)?.get(1)?.as_str().trim();
        (!location.is_empty()).then(|| location.to_string())
    })
}

pub fn extract_location(text: &str) -> Option<String> {
    if let Some(location) = first_capture(&LOCATION_PATTERNS, text) {
        return Some(location);
    }

    let lower = text.to_lowercase();
    KNOWN_CITIES
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, city)| city.to_string())
}

pub fn extract_verbose_location(text: &str) -> Option<String> {
    first_capture(&VERBOSE_LOCATION_PATTERNS, text)
}

pub fn parse_status(output: &CommandOutput) -> ConnectionState {
    if !output.success() {
        return ConnectionState::Disconnected;
    }

    let text = strip_ansi(&output.stdout);
    if !is_connected(&text) {
        return ConnectionState::Disconnected;
    }

    ConnectionState::Connected {
        location: extract_location(&text),
    }
}

pub trait StatusSource: Send + Sync {
    fn current_status(&self) -> ConnectionState;
}

pub struct CliStatusSource<R> {
    runner: R,
    timeout: Duration,
}

impl<R: CommandRunner> CliStatusSource<R> {
    pub fn new(runner: R, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn verbose_location(&self) -> Option<String> {
        let output = self.runner.run(&["status", "--verbose"], None, self.timeout);
        if !output.success() {
            log::debug!("[status] verbose status unavailable: {}", output.failure_reason());
            return None;
        }
        extract_verbose_location(&strip_ansi(&output.combined()))
    }
}

impl<R: CommandRunner> StatusSource for CliStatusSource<R> {
    fn current_status(&self) -> ConnectionState {
        let output = self.runner.run(&["status"], None, self.timeout);
        if !output.success() {
            log::debug!("[status] status command failed: {}", output.failure_reason());
        }

        match parse_status(&output) {
            ConnectionState::Connected { location: None } => {
                let location = self.verbose_location();
                if location.is_none() {
                    log::debug!("[status] connected, location unknown");
                }
                ConnectionState::Connected { location }
            }
            state => state,
        }
    }
}
