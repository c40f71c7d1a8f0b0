use std::time::Duration;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::{ansi::strip_ansi, vpn_cli::CommandRunner};

const DEFAULT_DEVICE_LIMIT: u32 = 2;
const EMAIL_DISPLAY_LIMIT: usize = 20;

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"Logged in as (.+)$").expect("email pattern"));
static DEVICES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Up to (\d+) devices").expect("device pattern"));
static TRAFFIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.?\d*)\s*(GB|MB)\s*left").expect("traffic pattern"));
static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("date pattern"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Premium,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LicenseInfo {
    pub tier: Tier,
    pub device_limit: u32,
    pub traffic_remaining: Option<String>,
    /// `YYYY-MM-DD` as printed by the client.
    pub expiry: Option<String>,
    pub email: Option<String>,
}

impl Default for LicenseInfo {
    fn default() -> Self {
        Self {
            tier: Tier::Free,
            device_limit: DEFAULT_DEVICE_LIMIT,
            traffic_remaining: None,
            expiry: None,
            email: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    CommandFailed,
    TimedOut,
    NotInstalled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "license", rename_all = "snake_case")]
pub enum LicenseReport {
    Available(LicenseInfo),
    Unavailable(UnavailableReason),
}

/// Days of subscription left, counting today.
///
/// The `+ 1` makes a licence that expires today report one day left and
/// yesterday's report zero.
// TODO: confirm against the client whether the expiry day itself is still paid.
pub fn days_until_expiry(expiry: &str, today: NaiveDate) -> Option<i64> {
    let expiry = NaiveDate::parse_from_str(expiry.trim(), "%Y-%m-%d").ok()?;
    Some(((expiry - today).num_days() + 1).max(0))
}

pub fn parse_license(text: &str) -> LicenseInfo {
    let mut info = LicenseInfo::default();
    if text.trim().is_empty() {
        info.tier = Tier::Unknown;
        return info;
    }

    for line in text.lines() {
        let line = line.trim();
        let upper = line.to_uppercase();
        let lower = line.to_lowercase();

        if let Some(captures) = EMAIL.captures(line) {
            let email = captures[1].replace(['(', ')'], "");
            let email = email.trim();
            if !email.is_empty() {
                info.email = Some(email.to_string());
            }
        }

        if line.contains("FREE version") {
            info.tier = Tier::Free;
        } else if upper.contains("PREMIUM") {
            info.tier = Tier::Premium;
        }

        if line.contains("devices simultaneously")
            && let Some(captures) = DEVICES.captures(line)
            && let Ok(limit) = captures[1].parse::<u32>()
        {
            info.device_limit = limit;
        }

        if (line.contains("GB left") || line.contains("MB left"))
            && let Some(captures) = TRAFFIC.captures(line)
        {
            info.traffic_remaining = Some(format!("{} {}", &captures[1], &captures[2]));
        }

        if (lower.contains("renewed on")
            || lower.contains("expires on")
            || lower.contains("valid until"))
            && let Some(captures) = DATE.captures(line)
        {
            info.expiry = Some(captures[1].to_string());
        }
    }

    // a dated free plan is a paid plan the CLI labels oddly
    if info.tier == Tier::Free && info.expiry.is_some() {
        info.tier = Tier::Premium;
    }

    info
}

impl LicenseInfo {
    pub fn days_left(&self, today: NaiveDate) -> Option<i64> {
        self.expiry
            .as_deref()
            .and_then(|expiry| days_until_expiry(expiry, today))
    }

    /// Multi-line account description.
    pub fn summary(&self, today: NaiveDate) -> String {
        let user = self.email.as_deref().unwrap_or("not specified");
        let mut lines = vec![
            match self.tier {
                Tier::Premium => "PREMIUM plan".to_string(),
                Tier::Free => "FREE plan".to_string(),
                Tier::Unknown => "Unknown plan".to_string(),
            },
            format!("User: {user}"),
            format!("Up to {} devices simultaneously", self.device_limit),
        ];

        match self.tier {
            Tier::Premium => match (self.expiry.as_deref(), self.days_left(today)) {
                (Some(expiry), Some(days)) if days > 0 => {
                    lines.push(format!("Active until: {expiry}"));
                    lines.push(format!("Days left: {days}"));
                }
                (Some(expiry), Some(_)) => lines.push(format!("Subscription expired: {expiry}")),
                (Some(expiry), None) => lines.push(format!("Active until: {expiry}")),
                (None, _) => lines.push("Subscription active".into()),
            },
            Tier::Free | Tier::Unknown => match &self.traffic_remaining {
                Some(traffic) => lines.push(format!("Traffic left: {traffic}")),
                None => lines.push("Traffic limit: 3 GB per month".into()),
            },
        }

        lines.join("\n")
    }

    /// One-line account label for the status header.
    pub fn account_label(&self, today: NaiveDate) -> Option<String> {
        let email = self.email.as_deref()?;
        let email = if email.chars().count() > EMAIL_DISPLAY_LIMIT {
            format!("{}...", email.chars().take(15).collect::<String>())
        } else {
            email.to_string()
        };

        let label = match (self.tier, &self.traffic_remaining, self.expiry.as_deref()) {
            (Tier::Free, Some(traffic), _) => format!("{email} ({traffic})"),
            (Tier::Premium, _, Some(expiry)) => match self.days_left(today) {
                Some(0) => format!("{email} (licence expires today)"),
                Some(1) => format!("{email} (1 day of licence left)"),
                Some(days) => format!("{email} (licence expires in {days} days)"),
                None => format!("{email} (licence valid until {expiry})"),
            },
            _ => email,
        };
        Some(label)
    }
}

pub trait LicenseSource: Send + Sync {
    fn license(&self) -> LicenseReport;
}

pub struct CliLicenseSource<R> {
    runner: R,
    timeout: Duration,
}

impl<R: CommandRunner> CliLicenseSource<R> {
    pub fn new(runner: R, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

impl<R: CommandRunner> LicenseSource for CliLicenseSource<R> {
    fn license(&self) -> LicenseReport {
        let output = self.runner.run(&["license"], None, self.timeout);

        if output.timed_out {
            log::warn!("[license] license query timed out");
            return LicenseReport::Unavailable(UnavailableReason::TimedOut);
        }
        if output.spawn_error.is_some() {
            log::warn!("[license] license query failed: {}", output.failure_reason());
            return LicenseReport::Unavailable(UnavailableReason::NotInstalled);
        }
        if !output.success() {
            log::warn!("[license] license query failed: {}", output.failure_reason());
            return LicenseReport::Unavailable(UnavailableReason::CommandFailed);
        }

        let info = parse_license(&strip_ansi(&output.stdout));
        log::debug!("[license] tier {:?}, {} devices", info.tier, info.device_limit);
        LicenseReport::Available(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vpn_cli::fake::FakeCli;

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
    }

    const FREE_OUTPUT: &str = "\
Logged in as user@example.com
You are using the FREE version
Up to 2 devices simultaneously
1.75 GB left this month
";

    const PREMIUM_OUTPUT: &str = "\
Logged in as (premium.user@example.com)
PREMIUM subscription
Up to 10 devices simultaneously
Subscription is renewed on 2025-01-01
";

    #[test]
    fn parses_free_license() {
        let info = parse_license(FREE_OUTPUT);
        assert_eq!(info.tier, Tier::Free);
        assert_eq!(info.email.as_deref(), Some("user@example.com"));
        assert_eq!(info.device_limit, 2);
        assert_eq!(info.traffic_remaining.as_deref(), Some("1.75 GB"));
        assert_eq!(info.expiry, None);
    }

    #[test]
    fn parses_premium_license() {
        let info = parse_license(PREMIUM_OUTPUT);
        assert_eq!(info.tier, Tier::Premium);
        assert_eq!(info.email.as_deref(), Some("premium.user@example.com"));
        assert_eq!(info.device_limit, 10);
        assert_eq!(info.expiry.as_deref(), Some("2025-01-01"));
    }

    #[test]
    fn counts_days_including_today() {
        assert_eq!(days_until_expiry("2025-01-01", date("2024-12-31")), Some(2));
        assert_eq!(days_until_expiry("2025-01-01", date("2025-01-01")), Some(1));
        assert_eq!(days_until_expiry("2025-01-01", date("2025-03-01")), Some(0));
        assert_eq!(days_until_expiry("2025-13-45", date("2025-01-01")), None);
    }

    #[test]
    fn dated_free_license_becomes_premium() {
        let info = parse_license("You are using the FREE version\nValid until 2026-05-01\n");
        assert_eq!(info.tier, Tier::Premium);
    }

    #[test]
    fn empty_output_is_unknown_tier() {
        let info = parse_license("  \n");
        assert_eq!(info.tier, Tier::Unknown);
        assert_eq!(info.device_limit, 2);
    }

    #[test]
    fn later_lines_overwrite_earlier_ones() {
        let info =
            parse_license("Up to 3 devices simultaneously\nUp to 5 devices simultaneously\n");
        assert_eq!(info.device_limit, 5);
    }

    #[test]
    fn summarises_accounts() {
        let today = date("2024-12-31");

        let free = parse_license("Logged in as a@b.c\nYou are using the FREE version\n");
        assert!(free.summary(today).contains("Traffic limit: 3 GB per month"));

        let premium = parse_license(PREMIUM_OUTPUT);
        let summary = premium.summary(today);
        assert!(summary.contains("Active until: 2025-01-01"));
        assert!(summary.contains("Days left: 2"));
        assert!(
            premium
                .summary(date("2025-06-01"))
                .contains("Subscription expired: 2025-01-01")
        );
        assert_eq!(
            premium.account_label(today).as_deref(),
            Some("premium.user@ex... (licence expires in 2 days)")
        );
    }

    #[test]
    fn reports_unavailable_licence() {
        let cli = FakeCli::new().time_out("license");
        let source = CliLicenseSource::new(&cli, Duration::from_secs(10));
        assert_eq!(
            source.license(),
            LicenseReport::Unavailable(UnavailableReason::TimedOut)
        );

        let cli = FakeCli::new().respond("license", 1, "");
        let source = CliLicenseSource::new(&cli, Duration::from_secs(10));
        assert_eq!(
            source.license(),
            LicenseReport::Unavailable(UnavailableReason::CommandFailed)
        );

        let cli = FakeCli::new().respond("license", 0, FREE_OUTPUT);
        let source = CliLicenseSource::new(&cli, Duration::from_secs(10));
        assert!(matches!(
            source.license(),
            LicenseReport::Available(info) if info.tier == Tier::Free
        ));
    }
}
