//! Encryption probe against the CDN config endpoint
//!
//! A product's content is decryption-gated when its product config names a
//! decryption key. The config lives on the CDN hosts advertised by
//! `GET {endpoint}/{product}/cdns`, addressed by the config hash:
//!
//! ```text
//! http://{host}/{config_path}/{hash[0..2]}/{hash[2..4]}/{hash}
//! ```
//!
//! Hosts are tried in advertised order; a non-200 or a dead host advances
//! to the next one. Exhausting the list returns `None` (unknown), never
//! `false`, since absence of proof is not proof of absence.

use async_trait::async_trait;
use buildwatch_core::config::EndpointConfig;
use buildwatch_core::traits::EncryptionProbe;
use std::time::Duration;

use crate::wire;

/// JSON pointer to the key whose presence marks a config as encrypted
const ENCRYPTION_KEY_POINTER: &str = "/all/config/decryption_key_name";

/// CDN-config encryption probe
pub struct ConfigProbe {
    base_url: String,
    region: String,
    client: reqwest::Client,
}

/// Host list and config path advertised for one region
#[derive(Debug, Clone, PartialEq, Eq)]
struct CdnInfo {
    hosts: Vec<String>,
    config_path: String,
}

impl ConfigProbe {
    /// Create a new probe.
    ///
    /// `region` selects which row of the cdns response supplies the host
    /// list. The per-request timeout is deliberately short
    /// (`endpoint.probe_timeout_secs`); with H hosts the whole probe is
    /// bounded by H timeouts.
    pub fn new(endpoint: &EndpointConfig, region: impl Into<String>) -> Self {
        Self {
            base_url: endpoint.version_url.trim_end_matches('/').to_string(),
            region: region.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(endpoint.probe_timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Fetch and parse the cdns row for the configured region
    async fn fetch_cdn_info(&self, product: &str) -> Option<CdnInfo> {
        let url = format!("{}/{}/cdns", self.base_url, product);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("cdn info request for '{}' failed: {}", product, e);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            tracing::debug!(
                "cdn info for '{}' returned {}",
                product,
                response.status()
            );
            return None;
        }

        let body = response.text().await.ok()?;
        parse_cdn_info(&body, &self.region)
    }
}

#[async_trait]
impl EncryptionProbe for ConfigProbe {
    async fn probe(&self, product: &str, product_config: &str) -> Option<bool> {
        let info = self.fetch_cdn_info(product).await?;

        for host in &info.hosts {
            let Some(url) = config_url(host, &info.config_path, product_config) else {
                tracing::warn!(
                    "product config hash '{}' too short to address",
                    product_config
                );
                return None;
            };

            tracing::debug!("probing product config for '{}' at {}", product, url);
            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!("cdn host '{}' unreachable: {}", host, e);
                    continue;
                }
            };

            if response.status() != reqwest::StatusCode::OK {
                tracing::debug!(
                    "cdn host '{}' returned {}, trying next",
                    host,
                    response.status()
                );
                continue;
            }

            match response.json::<serde_json::Value>().await {
                Ok(doc) => {
                    let encrypted = doc.pointer(ENCRYPTION_KEY_POINTER).is_some();
                    tracing::info!("'{}' product config found, encrypted={}", product, encrypted);
                    return Some(encrypted);
                }
                Err(e) => {
                    tracing::debug!("cdn host '{}' served unparseable config: {}", host, e);
                    continue;
                }
            }
        }

        tracing::info!("all cdn hosts exhausted for '{}', encryption unknown", product);
        None
    }
}

/// Parse a cdns response body into the row for `region` (first row as the
/// fallback)
fn parse_cdn_info(body: &str, region: &str) -> Option<CdnInfo> {
    let table = wire::parse(body).ok()?;

    let row = table
        .rows
        .iter()
        .find(|row| table.cell(row, "Name") == Some(region))
        .or_else(|| table.rows.first())?;

    let hosts: Vec<String> = table
        .cell(row, "Hosts")?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if hosts.is_empty() {
        return None;
    }

    Some(CdnInfo {
        hosts,
        config_path: table.cell(row, "ConfigPath")?.to_string(),
    })
}

/// Address of a config blob on a CDN host; `None` for hashes too short to
/// shard into the two-level directory layout
fn config_url(host: &str, path: &str, hash: &str) -> Option<String> {
    let first = hash.get(0..2)?;
    let second = hash.get(2..4)?;
    Some(format!("http://{host}/{path}/{first}/{second}/{hash}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CDNS_BODY: &str = "Name!STRING:0|Path!STRING:0|Hosts!STRING:0|Servers!STRING:0|ConfigPath!STRING:0\n\
## seqn = 2241282\n\
us|tpr/wow|host1.example.net host2.example.net|https://srv.example.net|tpr/configs/data\n\
eu|tpr/wow|eu1.example.net|https://srv.example.net|tpr/configs/data\n";

    #[test]
    fn picks_the_requested_region_row() {
        let info = parse_cdn_info(CDNS_BODY, "us").unwrap();
        assert_eq!(
            info.hosts,
            vec!["host1.example.net".to_string(), "host2.example.net".to_string()]
        );
        assert_eq!(info.config_path, "tpr/configs/data");

        let eu = parse_cdn_info(CDNS_BODY, "eu").unwrap();
        assert_eq!(eu.hosts, vec!["eu1.example.net".to_string()]);
    }

    #[test]
    fn unknown_region_falls_back_to_first_row() {
        let info = parse_cdn_info(CDNS_BODY, "kr").unwrap();
        assert_eq!(info.hosts[0], "host1.example.net");
    }

    #[test]
    fn empty_host_list_is_unusable() {
        let body = "Name!STRING:0|Path!STRING:0|Hosts!STRING:0|Servers!STRING:0|ConfigPath!STRING:0\n\
## seqn = 1\n\
us|tpr/wow||srv|tpr/configs/data\n";
        assert_eq!(parse_cdn_info(body, "us"), None);
    }

    #[test]
    fn config_url_shards_by_hash_prefix() {
        assert_eq!(
            config_url("host1.example.net", "tpr/configs/data", "53020d32e1a25648").unwrap(),
            "http://host1.example.net/tpr/configs/data/53/02/53020d32e1a25648"
        );
        assert_eq!(config_url("h", "p", "abc"), None);
    }

    #[test]
    fn encryption_marker_lookup() {
        let encrypted: serde_json::Value = serde_json::json!({
            "all": { "config": { "decryption_key_name": "wowdev1" } }
        });
        assert!(encrypted.pointer(ENCRYPTION_KEY_POINTER).is_some());

        let clear: serde_json::Value = serde_json::json!({
            "all": { "config": { "vfs_root": "deadbeef" } }
        });
        assert!(clear.pointer(ENCRYPTION_KEY_POINTER).is_none());
    }
}
