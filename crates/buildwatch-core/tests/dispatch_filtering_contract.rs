//! Contract: destination filtering and social cross-post dedupe
//!
//! A destination only ever sees the products it watches, a destination
//! left with nothing after filtering receives no payload at all, and the
//! secondary broadcast fires at most once per platform per cycle token no
//! matter how many chat destinations received the same change.

mod common;

use buildwatch_core::config::NotifyConfig;
use buildwatch_core::dispatch::Dispatcher;
use buildwatch_core::model::{DedupeToken, UpdateEvent};
use common::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn update(product: &str, topic: &str, old_build: &str, new_build: &str) -> UpdateEvent {
    UpdateEvent {
        product: product.to_string(),
        public_name: format!("{product} Public"),
        topic: topic.to_string(),
        old: Some(record(old_build, "1.0", 10)),
        new: record(new_build, "1.1", 11),
        changed: BTreeSet::from(["build", "build_text"]),
    }
}

fn notify_config() -> NotifyConfig {
    NotifyConfig {
        public_topic: "games".to_string(),
        operator_id: 0,
        diff_url: None,
    }
}

#[tokio::test]
async fn destinations_only_see_watched_products() {
    let chat = Arc::new(RecordingChatClient::new());
    let subs = Arc::new(
        StaticSubscriptions::new()
            .with_channel("games", 1, 11, &["alpha", "beta"])
            .with_channel("games", 2, 22, &["gamma"])
            .with_user(9, &["alpha"]),
    );

    let dispatcher = Dispatcher::new(chat.clone(), subs, Vec::new(), notify_config());

    let events = vec![
        update("alpha", "games", "100", "101"),
        update("gamma", "games", "300", "301"),
    ];
    dispatcher.dispatch(&events, DedupeToken::generate()).await;

    // channel 11 watches {alpha, beta}: it hears about alpha, never gamma
    let notices = chat.channel_notices(11);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].lines.len(), 1);
    assert!(notices[0].lines[0].contains("alpha"));
    assert!(!notices[0].lines.iter().any(|l| l.contains("gamma")));

    // channel 22 watches {gamma}: the mirror image
    let notices = chat.channel_notices(22);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].lines[0].contains("gamma"));
    assert!(!notices[0].lines.iter().any(|l| l.contains("alpha")));

    // user 9 gets a DM for alpha
    let notices = chat.user_notices(9);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].lines[0].contains("alpha"));
}

#[tokio::test]
async fn empty_after_filtering_means_no_payload() {
    let chat = Arc::new(RecordingChatClient::new());
    let subs = Arc::new(
        StaticSubscriptions::new()
            .with_channel("games", 3, 33, &["delta"])
            .with_user(7, &["delta"]),
    );

    let dispatcher = Dispatcher::new(chat.clone(), subs, Vec::new(), notify_config());

    let events = vec![update("alpha", "games", "100", "101")];
    dispatcher.dispatch(&events, DedupeToken::generate()).await;

    assert!(
        chat.deliveries().is_empty(),
        "a destination watching nothing that changed must stay silent"
    );
}

#[tokio::test]
async fn cross_post_happens_once_per_token() {
    let chat = Arc::new(RecordingChatClient::new());
    let subs = Arc::new(
        StaticSubscriptions::new()
            .with_channel("games", 1, 11, &["alpha"])
            .with_channel("games", 2, 22, &["alpha"])
            .with_channel("games", 3, 33, &["alpha"]),
    );
    let poster = Arc::new(RecordingSocialPoster::new("bluesky"));

    let dispatcher = Dispatcher::new(
        chat.clone(),
        subs,
        vec![poster.clone()],
        notify_config(),
    );

    let events = vec![update("alpha", "games", "100", "101")];
    let token = DedupeToken::generate();

    dispatcher.dispatch(&events, token).await;
    assert_eq!(chat.deliveries().len(), 3, "every channel is served");
    assert_eq!(poster.post_count(), 1, "one social post per cycle");

    // a redundant dispatch with the same token must not double-post
    dispatcher.dispatch(&events, token).await;
    assert_eq!(poster.post_count(), 1);

    // the next cycle carries a fresh token
    dispatcher.dispatch(&events, DedupeToken::generate()).await;
    assert_eq!(poster.post_count(), 2);
}

#[tokio::test]
async fn cross_post_covers_only_the_public_topic() {
    let chat = Arc::new(RecordingChatClient::new());
    let subs = Arc::new(StaticSubscriptions::new().with_channel("tools", 1, 11, &["beta"]));
    let poster = Arc::new(RecordingSocialPoster::new("bluesky"));

    let dispatcher = Dispatcher::new(
        chat.clone(),
        subs,
        vec![poster.clone()],
        notify_config(),
    );

    let events = vec![update("beta", "tools", "200", "201")];
    dispatcher.dispatch(&events, DedupeToken::generate()).await;

    assert_eq!(chat.channel_notices(11).len(), 1);
    assert_eq!(poster.post_count(), 0, "non-public topics never cross-post");
}

#[tokio::test]
async fn one_rejecting_platform_does_not_block_another() {
    let chat = Arc::new(RecordingChatClient::new());
    let subs = Arc::new(StaticSubscriptions::new().with_channel("games", 1, 11, &["alpha"]));
    let failing = Arc::new(RecordingSocialPoster::failing("microblog"));
    let working = Arc::new(RecordingSocialPoster::new("bluesky"));

    let dispatcher = Dispatcher::new(
        chat,
        subs,
        vec![failing.clone(), working.clone()],
        notify_config(),
    );

    let events = vec![update("alpha", "games", "100", "101")];
    dispatcher.dispatch(&events, DedupeToken::generate()).await;

    assert_eq!(failing.post_count(), 0);
    assert_eq!(working.post_count(), 1);
}
