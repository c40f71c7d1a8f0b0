use std::time::Duration;

use serde::Serialize;

use crate::{ansi::strip_ansi, vpn_cli::CommandRunner};

const TABLE_END_MARKERS: &[&str] = &[
    "You can connect to a location by running",
    "You are using a FREE version",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Location {
    pub iso: String,
    pub country: String,
    pub city: String,
    pub ping: u32,
}

/// Splits one table row: ISO first, ping last, city just before the ping and
/// the country in between (it may span several words).
pub fn parse_location_row(line: &str) -> Option<Location> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }

    let ping_token = parts[parts.len() - 1];
    if !ping_token.chars().all(|character| character.is_ascii_digit()) {
        return None;
    }
    let ping = ping_token.parse().ok()?;

    let middle = &parts[1..parts.len() - 1];
    let (city, country) = middle.split_last()?;

    Some(Location {
        iso: parts[0].to_string(),
        country: country.join(" "),
        city: city.to_string(),
        ping,
    })
}

pub fn parse_locations(text: &str) -> Vec<Location> {
    let mut locations = Vec::new();
    let mut header_found = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.contains("ISO") && line.contains("COUNTRY") && line.contains("CITY") {
            header_found = true;
            continue;
        }
        if !header_found {
            continue;
        }

        if TABLE_END_MARKERS.iter().any(|marker| line.contains(marker)) {
            break;
        }
        if line.starts_with("===") || line.starts_with("---") {
            continue;
        }

        match parse_location_row(line) {
            Some(location) => locations.push(location),
            None => log::debug!("[locations] skipping row: {line}"),
        }
    }

    locations
}

pub fn fetch_locations<R: CommandRunner>(
    runner: &R,
    timeout: Duration,
) -> Result<Vec<Location>, String> {
    let output = runner.run(&["list-locations"], None, timeout);
    if !output.success() {
        return Err(format!(
            "Failed to list locations: {}",
            output.failure_reason()
        ));
    }

    let locations = parse_locations(&strip_ansi(&output.stdout));
    log::info!("[locations] {} locations available", locations.len());
    Ok(locations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
ISO   COUNTRY              CITY                           PING ESTIMATE
==============================================================
DE    Germany              Frankfurt                      32
US    United States        Chicago                        118
GB    United Kingdom       London                         n/a
JP    Japan                Tokyo                          245

You can connect to a location by running `adguardvpn-cli connect -l <city, country or ISO code>`
XX    Trailing             Row                            1
";

    #[test]
    fn parses_table_rows() {
        let locations = parse_locations(TABLE);
        assert_eq!(locations.len(), 3);
        assert_eq!(
            locations[1],
            Location {
                iso: "US".into(),
                country: "United States".into(),
                city: "Chicago".into(),
                ping: 118,
            }
        );
        assert_eq!(locations[2].city, "Tokyo");
    }

    #[test]
    fn ignores_rows_before_header() {
        let text = "DE Germany Berlin 10\nISO COUNTRY CITY PING\nFR France Paris 20\n";
        let locations = parse_locations(text);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].iso, "FR");
    }

    #[test]
    fn rejects_short_or_non_numeric_rows() {
        assert_eq!(parse_location_row("DE Frankfurt 32"), None);
        assert_eq!(parse_location_row("DE Germany Frankfurt fast"), None);
    }
}
