
use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use ureq::Agent;
use url::Url;

/// Accept header sent with page requests
pub const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
/// Accept header sent with image requests
pub const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

/// Configuration for outbound HTTP requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Total attempts per URL, including the first
    pub max_attempts: u32,
    /// Lower bound of the randomized pause before a retry, scaled by attempt number
    pub retry_delay_min_ms: u64,
    /// Upper bound of the randomized pause before a retry, scaled by attempt number
    pub retry_delay_max_ms: u64,
    pub page_connect_timeout_secs: u64,
    pub page_read_timeout_secs: u64,
    pub image_connect_timeout_secs: u64,
    pub image_read_timeout_secs: u64,
}

impl Default for FetchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_min_ms: 1000,
            retry_delay_max_ms: 3000,
            page_connect_timeout_secs: 10,
            page_read_timeout_secs: 30,
            image_connect_timeout_secs: 8,
            image_read_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Failed to read response body from {url}: {message}")]
    Body { url: String, message: String },

    #[error("Giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// HTTP status of the failure, looking through retry exhaustion
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Exhausted { last, .. } => last.status(),
            Self::Transport { .. } | Self::Body { .. } => None,
        }
    }
}

/// A browser identity whose headers agree with each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserProfile {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
}

pub const BROWSER_PROFILES: &[BrowserProfile] = &[
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        accept_language: "en-GB,en;q=0.9",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        accept_language: "en-US,en;q=0.5",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
        accept_language: "en-US,en;q=0.9",
    },
];

/// Ordered request headers; names are matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    headers: Vec<(&'static str, String)>,
}

impl HeaderSet {
    /// Headers for a page request from a randomly chosen browser profile
    #[inline]
    pub fn page() -> Self {
        let mut rng = rand::rng();
        let profile = BROWSER_PROFILES
            .choose(&mut rng)
            .copied()
            .unwrap_or(BROWSER_PROFILES[0]);
        let query = rng.random_range(1000..=9999);
        Self::for_profile(&profile, query)
    }

    /// Headers for fetching an image embedded in `referer`
    #[inline]
    pub fn image(referer: &Url) -> Self {
        let mut headers = Self::page();
        headers.apply_image_overrides(referer);
        headers
    }

    /// Deterministic page headers for one profile and search-referer query number
    #[inline]
    pub fn for_profile(profile: &BrowserProfile, query: u32) -> Self {
        Self {
            headers: vec![
                ("User-Agent", profile.user_agent.to_string()),
                ("Accept", PAGE_ACCEPT.to_string()),
                ("Accept-Language", profile.accept_language.to_string()),
                ("Cache-Control", "no-cache".to_string()),
                ("Pragma", "no-cache".to_string()),
                ("Upgrade-Insecure-Requests", "1".to_string()),
                (
                    "Referer",
                    format!("https://www.google.com/search?q={query}"),
                ),
            ],
        }
    }

    fn apply_image_overrides(&mut self, referer: &Url) {
        self.set("Accept", IMAGE_ACCEPT.to_string());
        self.set("Referer", referer.as_str().to_string());
        self.set("Sec-Fetch-Dest", "image".to_string());
        self.set("Sec-Fetch-Mode", "no-cors".to_string());
    }

    fn set(&mut self, name: &'static str, value: String) {
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => self.headers.push((name, value)),
        }
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.headers.iter().map(|(name, value)| (*name, value.as_str()))
    }
}

/// Connect and read limits for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

/// A successful (2xx) response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// One network session. Every request made through the same session shares
/// its connection pool, so a page and its images reuse connections.
#[derive(Debug, Clone)]
pub struct Session {
    agent: Agent,
}

/// HTTP fetcher with retry and randomized backoff
#[derive(Debug, Clone)]
pub struct Fetcher {
    config: FetchConfig,
}

impl Fetcher {
    #[inline]
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Open a fresh session; sessions are never shared between captures
    #[inline]
    pub fn session(&self) -> Session {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(10)
            .build()
            .into();
        Session { agent }
    }

    #[inline]
    pub fn page_timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.config.page_connect_timeout_secs),
            read: Duration::from_secs(self.config.page_read_timeout_secs),
        }
    }

    #[inline]
    pub fn image_timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.config.image_connect_timeout_secs),
            read: Duration::from_secs(self.config.image_read_timeout_secs),
        }
    }

    /// Fetch an HTML page with freshly rotated page headers
    #[inline]
    pub async fn fetch_page(
        &self,
        session: &Session,
        url: &Url,
    ) -> Result<FetchedResponse, FetchError> {
        self.fetch(session, url, &HeaderSet::page(), self.page_timeouts())
            .await
    }

    /// Fetch an image with image headers and the embedding page as referer
    #[inline]
    pub async fn fetch_image(
        &self,
        session: &Session,
        url: &Url,
        referer: &Url,
    ) -> Result<FetchedResponse, FetchError> {
        self.fetch(session, url, &HeaderSet::image(referer), self.image_timeouts())
            .await
    }

    /// Perform a GET with the configured attempt budget.
    ///
    /// Every failure, including a non-2xx status, consumes one attempt. Once the
    /// budget is spent the last failure is returned wrapped in
    /// [`FetchError::Exhausted`].
    #[inline]
    pub async fn fetch(
        &self,
        session: &Session,
        url: &Url,
        headers: &HeaderSet,
        timeouts: Timeouts,
    ) -> Result<FetchedResponse, FetchError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.retry_delay(attempt);
                debug!(
                    "Retrying request to {} (attempt {}/{}) after {:?}",
                    url, attempt, attempts, delay
                );
                sleep(delay).await;
            }

            match try_get(session, url, headers, timeouts).await {
                Ok(response) => {
                    debug!(
                        "Fetched {} ({} bytes, attempt {})",
                        url,
                        response.body.len(),
                        attempt
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts,
            last: Box::new(last_error.unwrap_or_else(|| FetchError::Transport {
                url: url.to_string(),
                message: "no attempt was made".to_string(),
            })),
        })
    }

    /// Randomized pause before `attempt`, scaled by the attempt number so
    /// concurrent retries drift apart
    fn retry_delay(&self, attempt: u32) -> Duration {
        let min = self.config.retry_delay_min_ms;
        let max = self.config.retry_delay_max_ms.max(min);
        let base = rand::rng().random_range(min..=max);
        Duration::from_millis(base.saturating_mul(u64::from(attempt)))
    }
}

impl Default for Fetcher {
    #[inline]
    fn default() -> Self {
        Self::new(FetchConfig::default())
    }
}

/// Attempt a single HTTP GET request without retry logic
async fn try_get(
    session: &Session,
    url: &Url,
    headers: &HeaderSet,
    timeouts: Timeouts,
) -> Result<FetchedResponse, FetchError> {
    let agent = session.agent.clone();
    let url_str = url.to_string();
    let headers = headers.clone();

    tokio::task::spawn_blocking(move || blocking_get(&agent, &url_str, &headers, timeouts))
        .await
        .map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: format!("request task failed: {e}"),
        })?
}

fn blocking_get(
    agent: &Agent,
    url: &str,
    headers: &HeaderSet,
    timeouts: Timeouts,
) -> Result<FetchedResponse, FetchError> {
    debug!("Making HTTP GET request to: {}", url);

    let mut request = agent
        .get(url)
        .config()
        .timeout_connect(Some(timeouts.connect))
        .timeout_recv_response(Some(timeouts.read))
        .timeout_recv_body(Some(timeouts.read))
        .build();
    for (name, value) in headers.iter() {
        request = request.header(name, value);
    }

    let mut response = request.call().map_err(|e| FetchError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status().as_u16();
    if status == 403 {
        warn!("HTTP 403 from {}: possible anti-scraping block", url);
    }
    if !(200..300).contains(&status) {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body = response
        .body_mut()
        .read_to_vec()
        .map_err(|e| FetchError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    Ok(FetchedResponse {
        status,
        content_type,
        body,
    })
}

/// Best-effort DNS lookup of the URL's host, preferring IPv4.
///
/// Returns an empty string when the host cannot be resolved.
#[inline]
pub async fn resolve_ip(url: &Url) -> String {
    let Some(host) = url.host_str() else {
        return String::new();
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.to_string();
    }

    let port = url.port_or_known_default().unwrap_or(80);
    match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => {
            let addrs: Vec<_> = addrs.map(|addr| addr.ip()).collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .map(ToString::to_string)
                .unwrap_or_default()
        }
        Err(e) => {
            debug!("Could not resolve {}: {}", host, e);
            String::new()
        }
    }
}
