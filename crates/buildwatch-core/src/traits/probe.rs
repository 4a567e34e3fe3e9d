//! Encryption probe trait

use async_trait::async_trait;

/// Trait for determining whether a product's content is decryption-gated
///
/// The probe is a best-effort oracle: `Some(true)` / `Some(false)` are
/// conclusive observations, `None` means every avenue was exhausted without
/// proof either way. Absence of proof is not proof of absence, so an
/// implementation must never map "all hosts failed" to `Some(false)`.
#[async_trait]
pub trait EncryptionProbe: Send + Sync {
    /// Probe the product config identified by `product_config` (a content
    /// hash) for the encryption marker.
    ///
    /// Transport failures are handled internally (logged, next host tried)
    /// and surface only as `None`; the probe never fails a cycle.
    async fn probe(&self, product: &str, product_config: &str) -> Option<bool>;
}
