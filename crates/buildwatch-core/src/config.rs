//! Configuration types for the buildwatch system
//!
//! Every recognized option is a typed field validated once at load time;
//! nothing is looked up by string key at the point of use.

use serde::{Deserialize, Serialize};

/// Main buildwatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Version endpoint settings
    pub endpoint: EndpointConfig,

    /// Static product catalog; order is the per-cycle processing order
    pub products: Vec<ProductConfig>,

    /// Polling scheduler settings
    #[serde(default)]
    pub poller: PollerConfig,

    /// Build store settings
    pub store: StoreConfig,

    /// Notification settings
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl WatchConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.products.is_empty() {
            return Err(crate::Error::config("no products configured"));
        }

        for product in &self.products {
            product.validate()?;
        }

        let mut names: Vec<&str> = self.products.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.products.len() {
            return Err(crate::Error::config("duplicate product names in catalog"));
        }

        self.endpoint.validate()?;
        self.poller.validate()?;
        self.store.validate()?;

        Ok(())
    }

    /// Look up a product by name
    pub fn product(&self, name: &str) -> Option<&ProductConfig> {
        self.products.iter().find(|p| p.name == name)
    }
}

/// Version endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the versioning endpoint, e.g. "http://us.patch.example.net:1119"
    pub version_url: String,

    /// Per-request timeout for version fetches (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Per-request timeout for encryption probe requests (seconds).
    /// Deliberately short: a dead CDN host must not stall the probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl EndpointConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.version_url.is_empty() {
            return Err(crate::Error::config("endpoint.version_url cannot be empty"));
        }
        if !self.version_url.starts_with("http://") && !self.version_url.starts_with("https://") {
            return Err(crate::Error::config(
                "endpoint.version_url must use http or https",
            ));
        }
        if self.request_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(crate::Error::config("endpoint timeouts must be > 0"));
        }
        Ok(())
    }
}

/// One tracked product (an independently versioned build stream)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductConfig {
    /// Wire identifier, e.g. "wow_beta"
    pub name: String,

    /// Public display name used in notifications
    pub public_name: String,

    /// Notification topic this product routes to
    pub topic: String,

    /// Regions the endpoint publishes for this product; the first entry is
    /// the primary region used for change comparison
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,

    /// Test/PTR branch flag
    #[serde(default)]
    pub test_branch: bool,

    /// Internal-only branch flag
    #[serde(default)]
    pub internal: bool,
}

impl ProductConfig {
    /// Region used for change comparison
    pub fn primary_region(&self) -> &str {
        &self.regions[0]
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::config("product name cannot be empty"));
        }
        if self.public_name.is_empty() {
            return Err(crate::Error::config(format!(
                "product '{}' is missing a public name",
                self.name
            )));
        }
        if self.topic.is_empty() {
            return Err(crate::Error::config(format!(
                "product '{}' is missing a topic",
                self.name
            )));
        }
        if self.regions.is_empty() {
            return Err(crate::Error::config(format!(
                "product '{}' must list at least one region",
                self.name
            )));
        }
        Ok(())
    }
}

/// Polling scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Interval between cycle starts (seconds)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Maximum number of concurrent product fetches per cycle
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Delay before the first tick (seconds)
    #[serde(default)]
    pub startup_delay_secs: u64,
}

impl PollerConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("poller.interval_secs must be > 0"));
        }
        if self.fetch_concurrency == 0 {
            return Err(crate::Error::config("poller.fetch_concurrency must be > 0"));
        }
        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_concurrency: default_fetch_concurrency(),
            startup_delay_secs: 0,
        }
    }
}

/// Build store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the cache document; the ledger and backups live beside it
    pub path: String,

    /// Maximum number of backup snapshots kept
    #[serde(default = "default_backup_cap")]
    pub backup_cap: usize,

    /// Maximum sequence numbers remembered per product
    #[serde(default = "default_ledger_cap")]
    pub ledger_cap: usize,

    /// Identity recorded as the writer of the cache document; used by the
    /// cross-instance staleness guard
    #[serde(default = "default_writer_id")]
    pub writer_id: String,
}

impl StoreConfig {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.path.is_empty() {
            return Err(crate::Error::config("store.path cannot be empty"));
        }
        if self.backup_cap == 0 {
            return Err(crate::Error::config("store.backup_cap must be > 0"));
        }
        if self.ledger_cap == 0 {
            return Err(crate::Error::config("store.ledger_cap must be > 0"));
        }
        if self.writer_id.is_empty() {
            return Err(crate::Error::config("store.writer_id cannot be empty"));
        }
        Ok(())
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Topic whose changes are also cross-posted to social platforms
    #[serde(default = "default_public_topic")]
    pub public_topic: String,

    /// Operator identity receiving out-of-band failure alerts
    #[serde(default)]
    pub operator_id: u64,

    /// Base URL of a diff viewer; when set, notices carry a deep link
    #[serde(default)]
    pub diff_url: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            public_topic: default_public_topic(),
            operator_id: 0,
            diff_url: None,
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_regions() -> Vec<String> {
    vec!["us".to_string()]
}

fn default_interval_secs() -> u64 {
    300
}

fn default_fetch_concurrency() -> usize {
    8
}

fn default_backup_cap() -> usize {
    10
}

fn default_ledger_cap() -> usize {
    64
}

fn default_writer_id() -> String {
    std::env::consts::OS.to_string()
}

fn default_public_topic() -> String {
    "games".to_string()
}
