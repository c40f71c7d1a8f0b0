use std::{
    net::{TcpStream, ToSocketAddrs},
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::license::Tier;

pub const MIRRORS: &[&str] = &[
    "https://adguard-vpn.com",
    "https://adguard-vpn.work",
    "https://adguardvpn-help.net",
];

pub const SITE_CACHE_TTL: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub type Probe = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Whether `url`'s host accepts a TCP connection on port 443 within three
/// seconds.
pub fn probe_https(url: &str) -> bool {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();

    let addresses = match (host, 443).to_socket_addrs() {
        Ok(addresses) => addresses,
        Err(error) => {
            log::debug!("[site] cannot resolve {host}: {error}");
            return false;
        }
    };

    for address in addresses {
        if TcpStream::connect_timeout(&address, PROBE_TIMEOUT).is_ok() {
            return true;
        }
    }
    log::debug!("[site] {host} is unreachable");
    false
}

/// Remembers the first reachable mirror for a fixed time.
pub struct SiteCache {
    mirrors: Vec<String>,
    ttl: Duration,
    clock: Box<dyn Clock>,
    probe: Probe,
    cached: Mutex<Option<(String, Instant)>>,
}

impl SiteCache {
    pub fn new(clock: Box<dyn Clock>, probe: Probe) -> Self {
        Self {
            mirrors: MIRRORS.iter().map(|mirror| mirror.to_string()).collect(),
            ttl: SITE_CACHE_TTL,
            clock,
            probe,
            cached: Mutex::new(None),
        }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemClock), Box::new(probe_https))
    }

    /// The cached mirror while it is fresh, otherwise the first mirror that
    /// answers the probe. Falls back to the primary mirror when none does;
    /// the fallback is cached too.
    pub fn available_site(&self) -> String {
        let now = self.clock.now();
        let mut cached = self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((site, checked_at)) = cached.as_ref()
            && now.duration_since(*checked_at) < self.ttl
        {
            return site.clone();
        }

        let site = self
            .mirrors
            .iter()
            .find(|mirror| (self.probe)(mirror.as_str()))
            .cloned()
            .unwrap_or_else(|| {
                log::warn!("[site] no mirror answered, falling back to {}", self.mirrors[0]);
                self.mirrors[0].clone()
            });

        log::info!("[site] using {site}");
        *cached = Some((site.clone(), now));
        site
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountLink {
    pub label: &'static str,
    pub url: String,
}

pub fn account_link(tier: Tier, site: String) -> AccountLink {
    AccountLink {
        label: match tier {
            Tier::Free => "Purchase a subscription",
            Tier::Premium | Tier::Unknown => "Renew the subscription",
        },
        url: site,
    }
}
