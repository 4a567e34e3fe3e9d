// # HTTP Version Source
//
// This crate provides the HTTP implementations of the buildwatch-core
// seams that talk to the versioning endpoint:
//
// - [`HttpVersionSource`]: fetches `GET {endpoint}/{product}/versions` and
//   parses the line-oriented response into records
// - [`ConfigProbe`]: resolves the CDN host list and probes a product's
//   config for the decryption-gating marker
//
// Both confine `reqwest` to this crate; nothing in buildwatch-core knows
// HTTP exists. Every request carries its own timeout so a hung endpoint
// can stall at most one product's slot in a cycle.

pub mod probe;
pub mod wire;

pub use probe::ConfigProbe;

use async_trait::async_trait;
use buildwatch_core::config::EndpointConfig;
use buildwatch_core::model::{ProductVersions, VersionRecord};
use buildwatch_core::traits::VersionSource;
use buildwatch_core::{Error, Result};
use std::time::Duration;

/// Columns every versions response must carry
const REQUIRED_COLUMNS: &[&str] = &[
    "Region",
    "BuildConfig",
    "CDNConfig",
    "BuildId",
    "VersionsName",
    "ProductConfig",
];

/// HTTP-based version source
pub struct HttpVersionSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpVersionSource {
    /// Create a new HTTP version source
    pub fn new(endpoint: &EndpointConfig) -> Self {
        Self {
            base_url: endpoint.version_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(endpoint.request_timeout_secs))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl VersionSource for HttpVersionSource {
    async fn fetch(&self, product: &str) -> Result<ProductVersions> {
        let url = format!("{}/{}/versions", self.base_url, product);
        tracing::debug!("fetching versions from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::connect(product, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http_status(product, status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::connect(product, e.to_string()))?;

        parse_versions(product, &body)
    }
}

/// Parse a versions response body into per-region records
fn parse_versions(product: &str, body: &str) -> Result<ProductVersions> {
    let table = wire::parse(body).map_err(|e| match e {
        wire::WireError::TooShort => Error::empty_response(product),
        wire::WireError::NoHeader => Error::malformed(product, "no header line"),
    })?;

    let seqn = table
        .seqn
        .ok_or_else(|| Error::malformed(product, "missing seqn marker"))?;

    for column in REQUIRED_COLUMNS {
        if table.column(column).is_none() {
            return Err(Error::malformed(
                product,
                format!("missing column '{column}'"),
            ));
        }
    }

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let cell = |name: &str| {
            table
                .cell(row, name)
                .map(str::to_string)
                .ok_or_else(|| Error::malformed(product, format!("row short of '{name}'")))
        };

        let build = cell("BuildId")?;
        let versions_name = cell("VersionsName")?;
        let build_text = wire::strip_build_suffix(&versions_name, &build);

        records.push(VersionRecord {
            region: cell("Region")?,
            build_config: cell("BuildConfig")?,
            cdn_config: cell("CDNConfig")?,
            build,
            build_text,
            product_config: cell("ProductConfig")?,
            keyring: table
                .cell(row, "KeyRing")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            encrypted: None,
            seqn,
            observed_at: chrono::Utc::now(),
        });
    }

    if records.is_empty() {
        return Err(Error::empty_response(product));
    }

    Ok(ProductVersions { records, seqn })
}
