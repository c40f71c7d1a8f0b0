use std::{fs::File, io::Write, path::Path, time::Duration};

const USER_AGENT: &str = concat!("adguardvpn-manager/", env!("CARGO_PKG_VERSION"));
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

pub trait Fetcher: Send + Sync {
    /// Downloads `url` into `destination`, returning the number of bytes written.
    fn download(&self, url: &str, destination: &Path) -> Result<u64, String>;

    fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String, String>;
}

pub struct HttpFetcher;

impl HttpFetcher {
    fn client(timeout: Duration) -> Result<reqwest::blocking::Client, String> {
        reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|error| format!("Failed to build HTTP client: {error}"))
    }
}

impl Fetcher for HttpFetcher {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, String> {
        log::info!("[fetch] downloading {url} → {}", destination.display());

        let mut response = Self::client(DOWNLOAD_TIMEOUT)?
            .get(url)
            .send()
            .map_err(|error| format!("Download request failed: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "Download failed with status {} for {url}",
                status.as_u16()
            ));
        }

        let mut file = File::create(destination)
            .map_err(|error| format!("Failed to create {}: {error}", destination.display()))?;

        let written = match response.copy_to(&mut file) {
            Ok(written) => written,
            Err(error) => {
                drop(file);
                let _ = std::fs::remove_file(destination);
                return Err(format!("Failed to read response body: {error}"));
            }
        };

        file.flush()
            .map_err(|error| format!("Failed to flush {}: {error}", destination.display()))?;

        log::info!("[fetch] received {written} bytes");
        Ok(written)
    }

    fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String, String> {
        log::debug!("[fetch] GET {url}");

        let response = Self::client(timeout)?
            .get(url)
            .send()
            .map_err(|error| format!("HTTP request failed: {error}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("{url} returned status {}", status.as_u16()));
        }

        response
            .text()
            .map_err(|error| format!("Failed to read response body: {error}"))
    }
}

#[cfg(test)]
pub mod fake {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    /// Serves bytes from memory; unknown URLs fail like a 404.
    #[derive(Default)]
    pub struct FakeFetcher {
        files: HashMap<String, Vec<u8>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn serve(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.files.insert(url.to_string(), body.into());
            self
        }

        fn lookup(&self, url: &str) -> Result<&Vec<u8>, String> {
            self.requests.lock().unwrap().push(url.to_string());
            self.files
                .get(url)
                .ok_or_else(|| format!("Download failed with status 404 for {url}"))
        }
    }

    impl Fetcher for FakeFetcher {
        fn download(&self, url: &str, destination: &Path) -> Result<u64, String> {
            let body = self.lookup(url)?;
            std::fs::write(destination, body).map_err(|error| error.to_string())?;
            Ok(body.len() as u64)
        }

        fn fetch_text(&self, url: &str, _timeout: Duration) -> Result<String, String> {
            let body = self.lookup(url)?;
            Ok(String::from_utf8_lossy(body).into_owned())
        }
    }
}
