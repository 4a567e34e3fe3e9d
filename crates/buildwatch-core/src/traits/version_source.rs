//! Version source trait
//!
//! One implementation ships in the `buildwatch-http` crate, speaking the
//! line-oriented versioning endpoint. Implementations fetch and parse; they
//! make no accept decisions (owned by the store) and no scheduling
//! decisions (owned by the poller).

use crate::model::ProductVersions;
use async_trait::async_trait;

/// Trait for fetching version data for one product
///
/// Implementations must be thread-safe; the poller issues fetches for many
/// products concurrently. Every call must carry its own timeout: a hung
/// fetch may stall only its own product's slot, never the scheduler.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Fetch and parse the version response for `product`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Connect`] on connection or timeout failure
    /// - [`crate::Error::HttpStatus`] on a non-2xx response
    /// - [`crate::Error::EmptyResponse`] when the body is too short to parse
    /// - [`crate::Error::MalformedRecord`] when expected columns are missing
    ///
    /// All four are contained by the caller: the product is skipped for the
    /// cycle and retried on the next one.
    async fn fetch(&self, product: &str) -> Result<ProductVersions, crate::Error>;
}
