//! Social platform poster trait
//!
//! Boundary to secondary broadcast platforms. Posting is best-effort and
//! deduplicated per cycle by the dispatcher; implementations just publish
//! one plain-text post.

use async_trait::async_trait;

/// Trait for social platform implementations
#[async_trait]
pub trait SocialPoster: Send + Sync {
    /// Platform name for logging and dedupe bookkeeping
    fn name(&self) -> &'static str;

    /// Publish a plain-text post.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Destination`] on rejection; the dispatcher logs it
    /// and moves on to the remaining platforms.
    async fn post(&self, text: &str) -> Result<(), crate::Error>;
}
