//! Test doubles and common utilities for contract tests

#![allow(dead_code)]

use async_trait::async_trait;
use buildwatch_core::config::{PollerConfig, ProductConfig};
use buildwatch_core::error::{Error, Result};
use buildwatch_core::model::{DedupeToken, Notice, ProductVersions, UpdateEvent, VersionRecord};
use buildwatch_core::poller::PollerEvent;
use buildwatch_core::traits::{
    ChannelSubscription, ChatClient, EncryptionProbe, SocialPoster, SubscriptionStore,
    UserSubscription, VersionSource,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// The fields of the next `CycleCompleted` event, skipping everything else
pub struct CompletedCycle {
    pub events: Vec<UpdateEvent>,
    pub token: DedupeToken,
    pub warmed: bool,
    pub fetched: usize,
    pub failed: usize,
}

/// Wait for the poller's next completed cycle
pub async fn next_cycle(rx: &mut mpsc::Receiver<PollerEvent>) -> CompletedCycle {
    loop {
        match rx.recv().await.expect("poller event stream ended") {
            PollerEvent::CycleCompleted {
                events,
                token,
                warmed,
                fetched,
                failed,
            } => {
                return CompletedCycle {
                    events,
                    token,
                    warmed,
                    fetched,
                    failed,
                };
            }
            _ => continue,
        }
    }
}

/// Build a version record for the primary test region
pub fn record(build: &str, text: &str, seqn: u64) -> VersionRecord {
    VersionRecord {
        region: "us".to_string(),
        build_config: format!("bc-{build}"),
        cdn_config: format!("cc-{build}"),
        build: build.to_string(),
        build_text: text.to_string(),
        product_config: "pc0".to_string(),
        keyring: None,
        encrypted: None,
        seqn,
        observed_at: chrono::Utc::now(),
    }
}

/// Wrap a record as a one-region fetch result
pub fn versions(build: &str, text: &str, seqn: u64) -> ProductVersions {
    ProductVersions {
        records: vec![record(build, text, seqn)],
        seqn,
    }
}

/// Catalog entry with the given topic
pub fn product(name: &str, topic: &str) -> ProductConfig {
    ProductConfig {
        name: name.to_string(),
        public_name: format!("{name} Public"),
        topic: topic.to_string(),
        regions: vec!["us".to_string()],
        test_branch: false,
        internal: false,
    }
}

/// Poller settings for tests: long interval (tests run with paused time),
/// no startup delay
pub fn poller_config() -> PollerConfig {
    PollerConfig {
        interval_secs: 300,
        fetch_concurrency: 4,
        startup_delay_secs: 0,
    }
}

/// A version source serving whatever response was last set per product.
///
/// Tests drive the poller one cycle at a time and swap responses between
/// cycles; every fetch for a product returns its current response.
pub struct ScriptedVersionSource {
    responses: Mutex<HashMap<String, std::result::Result<ProductVersions, String>>>,
    fetch_count: Mutex<usize>,
}

impl ScriptedVersionSource {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fetch_count: Mutex::new(0),
        }
    }

    /// Set the response served for a product
    pub fn set(&self, product: &str, versions: ProductVersions) {
        self.responses
            .lock()
            .unwrap()
            .insert(product.to_string(), Ok(versions));
    }

    /// Make fetches for a product fail with a connect error
    pub fn set_failure(&self, product: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(product.to_string(), Err(message.to_string()));
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }
}

#[async_trait]
impl VersionSource for ScriptedVersionSource {
    async fn fetch(&self, product: &str) -> Result<ProductVersions> {
        *self.fetch_count.lock().unwrap() += 1;
        self.responses
            .lock()
            .unwrap()
            .get(product)
            .cloned()
            .ok_or_else(|| Error::empty_response(product))?
            .map_err(|message| Error::connect(product, message))
    }
}

/// A probe that always returns the same answer
pub struct FixedProbe {
    pub answer: Option<bool>,
    calls: Mutex<usize>,
}

impl FixedProbe {
    pub fn new(answer: Option<bool>) -> Self {
        Self {
            answer,
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EncryptionProbe for FixedProbe {
    async fn probe(&self, _product: &str, _product_config: &str) -> Option<bool> {
        *self.calls.lock().unwrap() += 1;
        self.answer
    }
}

/// Where a recorded delivery went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Channel(u64),
    User(u64),
}

/// A chat client that records every delivery and can be told to fail
/// specific destinations
pub struct RecordingChatClient {
    pub sent: Mutex<Vec<(Delivery, Notice)>>,
    failing_channels: Mutex<HashSet<u64>>,
}

impl RecordingChatClient {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing_channels: Mutex::new(HashSet::new()),
        }
    }

    /// Make deliveries to `channel_id` fail as if the channel were removed
    pub fn fail_channel(&self, channel_id: u64) {
        self.failing_channels.lock().unwrap().insert(channel_id);
    }

    pub fn deliveries(&self) -> Vec<(Delivery, Notice)> {
        self.sent.lock().unwrap().clone()
    }

    /// Notices delivered to one channel
    pub fn channel_notices(&self, channel_id: u64) -> Vec<Notice> {
        self.deliveries()
            .into_iter()
            .filter(|(d, _)| *d == Delivery::Channel(channel_id))
            .map(|(_, n)| n)
            .collect()
    }

    /// Notices delivered to one user's DMs
    pub fn user_notices(&self, user_id: u64) -> Vec<Notice> {
        self.deliveries()
            .into_iter()
            .filter(|(d, _)| *d == Delivery::User(user_id))
            .map(|(_, n)| n)
            .collect()
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn send_channel_message(&self, channel_id: u64, notice: &Notice) -> Result<()> {
        if self.failing_channels.lock().unwrap().contains(&channel_id) {
            return Err(Error::destination(
                format!("channel {channel_id}"),
                "unknown channel",
            ));
        }
        self.sent
            .lock()
            .unwrap()
            .push((Delivery::Channel(channel_id), notice.clone()));
        Ok(())
    }

    async fn send_direct_message(&self, user_id: u64, notice: &Notice) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((Delivery::User(user_id), notice.clone()));
        Ok(())
    }
}

/// A subscription store backed by fixed in-memory tables
pub struct StaticSubscriptions {
    channels: HashMap<String, Vec<ChannelSubscription>>,
    users: Vec<UserSubscription>,
}

impl StaticSubscriptions {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            users: Vec::new(),
        }
    }

    pub fn with_channel(
        mut self,
        topic: &str,
        guild_id: u64,
        channel_id: u64,
        products: &[&str],
    ) -> Self {
        self.channels
            .entry(topic.to_string())
            .or_default()
            .push(ChannelSubscription {
                guild_id,
                channel_id,
                products: products.iter().map(|p| p.to_string()).collect(),
            });
        self
    }

    pub fn with_user(mut self, user_id: u64, products: &[&str]) -> Self {
        self.users.push(UserSubscription {
            user_id,
            products: products.iter().map(|p| p.to_string()).collect(),
        });
        self
    }
}

#[async_trait]
impl SubscriptionStore for StaticSubscriptions {
    async fn channels_for_topic(&self, topic: &str) -> Result<Vec<ChannelSubscription>> {
        Ok(self.channels.get(topic).cloned().unwrap_or_default())
    }

    async fn watchers_of(&self, products: &[&str]) -> Result<Vec<UserSubscription>> {
        Ok(self
            .users
            .iter()
            .filter(|u| products.iter().any(|p| u.products.contains(*p)))
            .cloned()
            .collect())
    }
}

/// A social poster that records posts and can be told to fail
pub struct RecordingSocialPoster {
    name: &'static str,
    pub posts: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingSocialPoster {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            posts: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            name,
            posts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }
}

#[async_trait]
impl SocialPoster for RecordingSocialPoster {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn post(&self, text: &str) -> Result<()> {
        if self.fail {
            return Err(Error::destination(self.name, "rejected"));
        }
        self.posts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
