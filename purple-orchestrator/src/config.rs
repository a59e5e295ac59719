//! Orchestrator configuration
//!
//! Defines all configurable parameters: remote endpoints and credentials,
//! resilience policy (timeouts, retries, circuit breaker), concurrency
//! limits and local output directories.

use purple_client::{StoreAuth, StoreSettings};
use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration
///
/// Every timeout and capacity is configurable so the pipeline can be tuned
/// for lab clusters as well as production SIEMs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to
    pub listen_addr: String,

    /// Emulation engine base URL (e.g., "http://localhost:8888")
    pub engine_url: String,
    pub engine_api_key: String,

    /// Search-index store base URL (e.g., "https://siem.local:9200")
    pub store_url: String,
    /// Index tag documents are written to
    pub store_index: String,
    /// Index pattern detection queries run against
    pub detection_index: String,
    pub store_api_key: String,
    pub store_user: String,
    pub store_password: String,
    pub store_verify_tls: bool,

    /// TCP connect timeout for store requests
    pub connect_timeout: Duration,
    /// Hard ceiling for one tag write, retries included
    pub store_timeout: Duration,
    pub max_retries: u32,

    /// Consecutive failures before the breaker opens
    pub breaker_threshold: u32,
    /// Cooldown before an open breaker lets a trial call through
    pub breaker_reset: Duration,

    /// Maximum simultaneous outbound tag writes
    pub tag_concurrency: usize,
    /// Rendering worker pool size
    pub report_workers: usize,
    pub report_timeout: Duration,

    pub fallback_dir: PathBuf,
    pub report_dir: PathBuf,
    /// Cap on techniques carried by one tag document
    pub max_techniques: usize,

    pub detection_enabled: bool,
    pub detection_timeout: Duration,
    /// Time after a run finishes before un-alerted techniques count as evaded
    pub evasion_window: Duration,

    /// Name printed in report headers and footers
    pub company_name: String,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// All variables are optional; see [`Config::from_lookup`] for names.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary key lookup
    ///
    /// Recognized keys (all optional):
    /// - PURPLE_LISTEN_ADDR (default: 0.0.0.0:8787)
    /// - PURPLE_ENGINE_URL, PURPLE_ENGINE_API_KEY
    /// - PURPLE_STORE_URL, PURPLE_STORE_INDEX, PURPLE_DETECTION_INDEX
    /// - PURPLE_STORE_API_KEY, PURPLE_STORE_USER, PURPLE_STORE_PASSWORD
    /// - PURPLE_STORE_VERIFY_TLS (default: true)
    /// - PURPLE_CONNECT_TIMEOUT, PURPLE_STORE_TIMEOUT (seconds)
    /// - PURPLE_STORE_MAX_RETRIES
    /// - PURPLE_BREAKER_THRESHOLD, PURPLE_BREAKER_RESET (seconds)
    /// - PURPLE_TAG_CONCURRENCY, PURPLE_REPORT_WORKERS
    /// - PURPLE_REPORT_TIMEOUT (seconds)
    /// - PURPLE_FALLBACK_DIR, PURPLE_REPORT_DIR, PURPLE_MAX_TECHNIQUES
    /// - PURPLE_DETECTION_ENABLED, PURPLE_DETECTION_TIMEOUT, PURPLE_EVASION_WINDOW
    /// - PURPLE_COMPANY_NAME
    ///
    /// Unparseable numeric or boolean values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let string = |key: &str, default: String| lookup(key).unwrap_or(default);
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let seconds = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|s| parse_bool(&s))
                .unwrap_or(default)
        };

        Self {
            listen_addr: string("PURPLE_LISTEN_ADDR", defaults.listen_addr),
            engine_url: string("PURPLE_ENGINE_URL", defaults.engine_url),
            engine_api_key: string("PURPLE_ENGINE_API_KEY", defaults.engine_api_key),
            store_url: string("PURPLE_STORE_URL", defaults.store_url),
            store_index: string("PURPLE_STORE_INDEX", defaults.store_index),
            detection_index: string("PURPLE_DETECTION_INDEX", defaults.detection_index),
            store_api_key: string("PURPLE_STORE_API_KEY", defaults.store_api_key),
            store_user: string("PURPLE_STORE_USER", defaults.store_user),
            store_password: string("PURPLE_STORE_PASSWORD", defaults.store_password),
            store_verify_tls: flag("PURPLE_STORE_VERIFY_TLS", defaults.store_verify_tls),
            connect_timeout: seconds("PURPLE_CONNECT_TIMEOUT", defaults.connect_timeout),
            store_timeout: seconds("PURPLE_STORE_TIMEOUT", defaults.store_timeout),
            max_retries: number("PURPLE_STORE_MAX_RETRIES", defaults.max_retries as u64) as u32,
            breaker_threshold: number("PURPLE_BREAKER_THRESHOLD", defaults.breaker_threshold as u64)
                as u32,
            breaker_reset: seconds("PURPLE_BREAKER_RESET", defaults.breaker_reset),
            tag_concurrency: number("PURPLE_TAG_CONCURRENCY", defaults.tag_concurrency as u64)
                as usize,
            report_workers: number("PURPLE_REPORT_WORKERS", defaults.report_workers as u64) as usize,
            report_timeout: seconds("PURPLE_REPORT_TIMEOUT", defaults.report_timeout),
            fallback_dir: lookup("PURPLE_FALLBACK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.fallback_dir),
            report_dir: lookup("PURPLE_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.report_dir),
            max_techniques: number("PURPLE_MAX_TECHNIQUES", defaults.max_techniques as u64)
                as usize,
            detection_enabled: flag("PURPLE_DETECTION_ENABLED", defaults.detection_enabled),
            detection_timeout: seconds("PURPLE_DETECTION_TIMEOUT", defaults.detection_timeout),
            evasion_window: seconds("PURPLE_EVASION_WINDOW", defaults.evasion_window),
            company_name: string("PURPLE_COMPANY_NAME", defaults.company_name),
        }
    }

    /// Connection settings for the store client
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            url: self.store_url.clone(),
            auth: StoreAuth::from_parts(&self.store_api_key, &self.store_user, &self.store_password),
            verify_tls: self.store_verify_tls,
            connect_timeout: self.connect_timeout,
            request_timeout: self.store_timeout,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, url) in [("engine_url", &self.engine_url), ("store_url", &self.store_url)] {
            if url.is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.store_index.is_empty() {
            anyhow::bail!("store_index cannot be empty");
        }

        if self.breaker_threshold == 0 {
            anyhow::bail!("breaker_threshold must be greater than 0");
        }

        if self.tag_concurrency == 0 {
            anyhow::bail!("tag_concurrency must be greater than 0");
        }

        if !(1..=10).contains(&self.report_workers) {
            anyhow::bail!(
                "report_workers must be between 1 and 10 (got {})",
                self.report_workers
            );
        }

        if !(5..=300).contains(&self.report_timeout.as_secs()) {
            anyhow::bail!(
                "report_timeout must be between 5 and 300 seconds (got {})",
                self.report_timeout.as_secs()
            );
        }

        if self.store_timeout.as_secs() == 0 {
            anyhow::bail!("store_timeout must be greater than 0");
        }

        if self.max_techniques == 0 {
            anyhow::bail!("max_techniques must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8787".to_string(),
            engine_url: "http://localhost:8888".to_string(),
            engine_api_key: String::new(),
            store_url: "http://localhost:9200".to_string(),
            store_index: "purple-team-logs".to_string(),
            detection_index: "purple-team-logs-*".to_string(),
            store_api_key: String::new(),
            store_user: String::new(),
            store_password: String::new(),
            store_verify_tls: true,
            connect_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(35),
            max_retries: 3,
            breaker_threshold: 5,
            breaker_reset: Duration::from_secs(60),
            tag_concurrency: 5,
            report_workers: 3,
            report_timeout: Duration::from_secs(30),
            fallback_dir: PathBuf::from("data/fallback_logs"),
            report_dir: PathBuf::from("data/reports"),
            max_techniques: 500,
            detection_enabled: true,
            detection_timeout: Duration::from_secs(10),
            evasion_window: Duration::from_secs(300),
            company_name: "Purple Team".to_string(),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
