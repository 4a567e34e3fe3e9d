//! Subscription store trait
//!
//! Boundary to the preference/identity store that knows which guilds and
//! users want which notifications. The concrete store is external; the
//! dispatcher resolves destinations exclusively through this interface.

use async_trait::async_trait;
use std::collections::HashSet;

/// A guild channel enabled for a topic, with the products it watches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSubscription {
    /// Guild the channel belongs to
    pub guild_id: u64,
    /// Channel receiving the notices
    pub channel_id: u64,
    /// Products this guild watches; events outside this set are filtered out
    pub products: HashSet<String>,
}

/// A user with a direct-message subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSubscription {
    /// User receiving the notices
    pub user_id: u64,
    /// Products this user watches
    pub products: HashSet<String>,
}

/// Trait for subscription store implementations
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Guild channels enabled for a topic
    async fn channels_for_topic(
        &self,
        topic: &str,
    ) -> Result<Vec<ChannelSubscription>, crate::Error>;

    /// Users with a direct-message subscription covering any of `products`
    async fn watchers_of(&self, products: &[&str]) -> Result<Vec<UserSubscription>, crate::Error>;
}
