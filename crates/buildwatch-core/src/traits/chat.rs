//! Chat platform client trait
//!
//! Boundary to the chat platform that hosts the notification channels and
//! direct messages. The concrete SDK lives outside this workspace; the
//! dispatcher only needs these two sends. Implementations perform one API
//! call per invocation and return errors for the dispatcher to contain:
//! no retry logic, no caching.

use crate::model::Notice;
use async_trait::async_trait;

/// Trait for chat platform implementations
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Deliver a rendered notice to a guild channel.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Destination`] when the channel is gone or the bot
    /// lacks permission. The dispatcher logs and moves on; it never rolls
    /// back the cache write that produced the notice.
    async fn send_channel_message(
        &self,
        channel_id: u64,
        notice: &Notice,
    ) -> Result<(), crate::Error>;

    /// Deliver a rendered notice to a user's direct messages.
    async fn send_direct_message(&self, user_id: u64, notice: &Notice) -> Result<(), crate::Error>;
}
