//! Trait seams between the core and its collaborators
//!
//! The core never constructs its own I/O: the version client, the
//! encryption probe, the chat platform, the preference store, and the
//! social platforms are all injected as trait objects. Implementations of
//! [`VersionSource`] and [`EncryptionProbe`] ship in sibling crates; the
//! chat/subscription/social seams are boundaries to external systems and
//! only their interfaces live here.

pub mod build_store;
pub mod chat;
pub mod probe;
pub mod social;
pub mod subscriptions;
pub mod version_source;

pub use build_store::{BuildStore, Outcome};
pub use chat::ChatClient;
pub use probe::EncryptionProbe;
pub use social::SocialPoster;
pub use subscriptions::{ChannelSubscription, SubscriptionStore, UserSubscription};
pub use version_source::VersionSource;
