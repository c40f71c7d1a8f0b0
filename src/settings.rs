use std::{fmt, str::FromStr, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::{ansi::strip_ansi, vpn_cli::CommandRunner};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

static DNS_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{1,3}\.){3}[0-9]{1,3}$").expect("dns pattern"));
static UPDATE_CHANNEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Update channel:\s*([^\n]+)").expect("channel pattern"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VpnMode {
    Socks,
    Tun,
}

impl VpnMode {
    pub fn from_output(text: &str) -> Self {
        if text.to_uppercase().contains("SOCKS") {
            Self::Socks
        } else {
            Self::Tun
        }
    }
}

impl fmt::Display for VpnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Socks => "SOCKS",
            Self::Tun => "TUN",
        })
    }
}

impl FromStr for VpnMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "SOCKS" | "SOCKS5" => Ok(Self::Socks),
            "TUN" => Ok(Self::Tun),
            other => Err(format!("Unknown mode {other:?}, expected SOCKS or TUN")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TunRoutingMode {
    Auto,
    None,
}

impl TunRoutingMode {
    pub fn from_output(text: &str) -> Self {
        if text.to_uppercase().contains("NONE") {
            Self::None
        } else {
            Self::Auto
        }
    }
}

impl fmt::Display for TunRoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "AUTO",
            Self::None => "NONE",
        })
    }
}

impl FromStr for TunRoutingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "NONE" => Ok(Self::None),
            other => Err(format!("Unknown routing mode {other:?}, expected AUTO or NONE")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum UpdateChannel {
    Release,
    Beta,
    Other(String),
}

impl UpdateChannel {
    /// Reads `Update channel: <x>` out of `config show`; release when absent.
    pub fn from_config_show(text: &str) -> Self {
        let Some(captures) = UPDATE_CHANNEL.captures(text) else {
            return Self::Release;
        };
        let channel = captures[1].trim().to_lowercase();
        if channel.contains("beta") {
            Self::Beta
        } else if channel.contains("release") {
            Self::Release
        } else {
            Self::Other(channel)
        }
    }
}

impl fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release => f.write_str("release"),
            Self::Beta => f.write_str("beta"),
            Self::Other(channel) => f.write_str(channel),
        }
    }
}

impl FromStr for UpdateChannel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "release" => Ok(Self::Release),
            "beta" => Ok(Self::Beta),
            other => Err(format!("Unknown update channel {other:?}, expected release or beta")),
        }
    }
}

pub fn validate_socks_port(text: &str) -> Result<u16, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("Enter a port number".into());
    }
    if !text.chars().all(|character| character.is_ascii_digit()) {
        return Err("Port number must be numeric".into());
    }
    match text.parse::<u32>() {
        Ok(port @ 1..=65535) => Ok(port as u16),
        _ => Err("Port number must be in the range 1-65535".into()),
    }
}

/// Accepts a dotted IPv4 address or `default`.
pub fn validate_dns(text: &str) -> Result<String, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("Enter a DNS address".into());
    }
    if text == "default" || DNS_ADDRESS.is_match(text) {
        Ok(text.to_string())
    } else {
        Err(format!("{text} is not a valid DNS server address"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettingsSnapshot {
    pub mode: Option<VpnMode>,
    pub socks_port: Option<String>,
    pub dns: Option<String>,
    pub tun_routing_mode: Option<TunRoutingMode>,
    pub update_channel: Option<UpdateChannel>,
}

/// `config` subcommands of the wrapped tool.
pub struct Settings<R> {
    runner: R,
}

impl<R: CommandRunner> Settings<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn read(&self, key: &str) -> Result<String, String> {
        let output = self.runner.run(&["config", key], None, READ_TIMEOUT);
        if output.success() {
            Ok(strip_ansi(&output.stdout).trim().to_string())
        } else {
            Err(format!("config {key}: {}", output.failure_reason()))
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), String> {
        log::info!("[settings] config {key} {value}");
        let output = self.runner.run(&["config", key, value], None, WRITE_TIMEOUT);
        if output.success() {
            return Ok(());
        }
        let stderr = output.stderr.trim();
        if output.code.is_some() && !stderr.is_empty() {
            Err(format!("Failed to change setting: {stderr}"))
        } else {
            Err(format!("Failed to change setting: {}", output.failure_reason()))
        }
    }

    pub fn mode(&self) -> Result<VpnMode, String> {
        self.read("get-mode").map(|text| VpnMode::from_output(&text))
    }

    pub fn set_mode(&self, mode: VpnMode) -> Result<(), String> {
        self.write("set-mode", &mode.to_string())
    }

    pub fn socks_port(&self) -> Result<String, String> {
        self.read("get-socks-port")
    }

    pub fn set_socks_port(&self, port: &str) -> Result<u16, String> {
        let port = validate_socks_port(port)?;
        self.write("set-socks-port", &port.to_string())?;
        Ok(port)
    }

    pub fn dns(&self) -> Result<String, String> {
        self.read("get-dns")
    }

    pub fn set_dns(&self, address: &str) -> Result<String, String> {
        let address = validate_dns(address)?;
        self.write("set-dns", &address)?;
        Ok(address)
    }

    pub fn tun_routing_mode(&self) -> Result<TunRoutingMode, String> {
        self.read("get-tun-routing-mode")
            .map(|text| TunRoutingMode::from_output(&text))
    }

    pub fn set_tun_routing_mode(&self, mode: TunRoutingMode) -> Result<(), String> {
        self.write("set-tun-routing-mode", &mode.to_string())
    }

    pub fn update_channel(&self) -> Result<UpdateChannel, String> {
        self.read("show")
            .map(|text| UpdateChannel::from_config_show(&text))
    }

    pub fn set_update_channel(&self, channel: &UpdateChannel) -> Result<(), String> {
        if let UpdateChannel::Other(channel) = channel {
            return Err(format!("Cannot switch to update channel {channel}"));
        }
        self.write("set-update-channel", &channel.to_string())
    }

    /// Reads every setting, leaving a field empty when its query fails.
    pub fn snapshot(&self) -> SettingsSnapshot {
        fn keep<T>(name: &str, result: Result<T, String>) -> Option<T> {
            result
                .map_err(|error| log::warn!("[settings] failed to read {name}: {error}"))
                .ok()
        }

        SettingsSnapshot {
            mode: keep("mode", self.mode()),
            socks_port: keep("socks port", self.socks_port()),
            dns: keep("dns", self.dns()),
            tun_routing_mode: keep("routing mode", self.tun_routing_mode()),
            update_channel: keep("update channel", self.update_channel()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vpn_cli::fake::FakeCli;

    #[test]
    fn validates_ports() {
        assert_eq!(validate_socks_port("1080"), Ok(1080));
        assert_eq!(validate_socks_port(" 65535 "), Ok(65535));
        assert!(validate_socks_port("0").is_err());
        assert!(validate_socks_port("65536").is_err());
        assert!(validate_socks_port("-1").is_err());
        assert!(validate_socks_port("").is_err());
        assert!(validate_socks_port("99999999999").is_err());
    }

    #[test]
    fn validates_dns_addresses() {
        assert_eq!(validate_dns("1.1.1.1"), Ok("1.1.1.1".into()));
        assert_eq!(validate_dns("default"), Ok("default".into()));
        assert!(validate_dns("dns.example.com").is_err());
        assert!(validate_dns("1.1.1").is_err());
    }

    #[test]
    fn reads_update_channel() {
        assert_eq!(
            UpdateChannel::from_config_show("Mode: TUN\nUpdate channel: Beta\n"),
            UpdateChannel::Beta
        );
        assert_eq!(
            UpdateChannel::from_config_show("update channel: nightly"),
            UpdateChannel::Other("nightly".into())
        );
        assert_eq!(UpdateChannel::from_config_show("Mode: TUN"), UpdateChannel::Release);
    }

    #[test]
    fn classifies_mode_output() {
        assert_eq!(VpnMode::from_output("Current mode: socks"), VpnMode::Socks);
        assert_eq!(VpnMode::from_output("TUN"), VpnMode::Tun);
        assert_eq!(TunRoutingMode::from_output("none"), TunRoutingMode::None);
        assert_eq!(TunRoutingMode::from_output("AUTO"), TunRoutingMode::Auto);
    }

    #[test]
    fn runs_config_subcommands() {
        let cli = FakeCli::new()
            .respond("config get-mode", 0, "SOCKS\n")
            .respond("config set-socks-port 1080", 0, "")
            .respond("config set-dns 8.8.8.8", 0, "");
        let settings = Settings::new(&cli);

        assert_eq!(settings.mode(), Ok(VpnMode::Socks));
        assert_eq!(settings.set_socks_port("1080"), Ok(1080));
        assert_eq!(settings.set_dns("8.8.8.8"), Ok("8.8.8.8".into()));
        assert!(settings.set_socks_port("70000").is_err());
        assert!(!cli.called("config set-socks-port 70000"));
    }
}
