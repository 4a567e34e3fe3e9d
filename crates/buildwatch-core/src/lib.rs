// # buildwatch-core
//
// Core library for the buildwatch version-tracking system.
//
// ## Architecture Overview
//
// buildwatch continuously polls a line-oriented versioning endpoint for a
// static catalog of products, decides which fetches are genuinely new, and
// fans accepted changes out to subscribed destinations:
//
// - **VersionSource**: trait for fetching and parsing version data
// - **EncryptionProbe**: trait for the decryption-gating probe
// - **BuildStore**: durable cache owning the compare/accept decision
// - **Poller**: recurring task driving fetch → probe → compare cycles
// - **Dispatcher**: routes accepted changes to channels, DMs and social
//   platforms
//
// ## Design Principles
//
// 1. **Explicit construction**: every service is built once and injected;
//    there are no ambient singletons or global lookups
// 2. **One decision owner**: only the store decides New/Duplicate/Stale/
//    Unchanged; callers never peek at the cache to decide for themselves
// 3. **Contained failure**: per-product and per-destination failures never
//    abort sibling work; only store persistence failures fail a cycle
// 4. **Library-first**: the daemon is a thin shell, everything here is
//    usable (and tested) as a library

pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod poller;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{
    EndpointConfig, NotifyConfig, PollerConfig, ProductConfig, StoreConfig, WatchConfig,
};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use model::{
    CacheEntry, Decision, DedupeToken, Notice, ProductVersions, UpdateEvent, VersionRecord,
};
pub use poller::{Poller, PollerEvent};
pub use store::{FileBuildStore, MemoryBuildStore};
pub use traits::{
    BuildStore, ChatClient, ChannelSubscription, EncryptionProbe, Outcome, SocialPoster,
    SubscriptionStore, UserSubscription, VersionSource,
};
