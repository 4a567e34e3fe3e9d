//! Notification dispatcher
//!
//! Takes one cycle's accepted changes and fans them out:
//!
//! 1. group events by topic (the product→topic mapping is static config)
//! 2. resolve destinations through the subscription store
//! 3. filter each destination down to the products it actually watches;
//!    a destination left with nothing emits no payload at all
//! 4. render one notice per (topic, destination) pair
//! 5. deliver, isolating every failure to its own destination
//!
//! Changes on the public topic are additionally cross-posted to the
//! configured social platforms, at most once per platform per cycle,
//! keyed by the cycle's dedupe token, however many chat destinations
//! also received the same change.

use crate::config::NotifyConfig;
use crate::model::{DedupeToken, Notice, UpdateEvent};
use crate::poller::PollerEvent;
use crate::traits::{ChatClient, SocialPoster, SubscriptionStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Placeholder shown when a product has no prior record to diff against
const UNTRACKED_TEXT: &str = "untracked";
const UNTRACKED_BUILD: &str = "0.0.0";

/// Lock marker used in chat lines; swapped for the Unicode glyph in
/// social text
const LOCK_MARKER: &str = ":lock:";
const LOCK_GLYPH: char = '\u{1F510}';

/// Notification dispatcher
///
/// Holds its collaborators as injected trait objects; one instance per
/// process, fed from the poller's event channel.
pub struct Dispatcher {
    chat: Arc<dyn ChatClient>,
    subscriptions: Arc<dyn SubscriptionStore>,
    posters: Vec<Arc<dyn SocialPoster>>,
    config: NotifyConfig,

    /// Dedupe tokens already cross-posted, per platform
    sent: Mutex<HashMap<&'static str, HashSet<DedupeToken>>>,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        chat: Arc<dyn ChatClient>,
        subscriptions: Arc<dyn SubscriptionStore>,
        posters: Vec<Arc<dyn SocialPoster>>,
        config: NotifyConfig,
    ) -> Self {
        Self {
            chat,
            subscriptions,
            posters,
            config,
            sent: Mutex::new(HashMap::new()),
        }
    }

    /// Consume poller events until the channel closes
    ///
    /// Warming cycles and empty cycles dispatch nothing; failed cycles are
    /// routed to the operator channel.
    pub async fn run(&self, mut rx: mpsc::Receiver<PollerEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                PollerEvent::CycleCompleted {
                    events,
                    token,
                    warmed,
                    ..
                } => {
                    if warmed || events.is_empty() {
                        debug!("nothing to dispatch (warmed={})", warmed);
                        continue;
                    }
                    self.dispatch(&events, token).await;
                }
                PollerEvent::CycleFailed { error } => {
                    self.notify_operator(&format!("poll cycle failed: {error}"))
                        .await;
                }
                PollerEvent::FetchFailed {
                    product,
                    error,
                    retryable,
                } => {
                    debug!(
                        "fetch failed for '{}' (retryable={}): {}",
                        product, retryable, error
                    );
                }
                PollerEvent::Started { products } => {
                    debug!("poller started with {} products", products);
                }
                PollerEvent::Stopped { reason } => {
                    info!("poller stopped: {}", reason);
                }
            }
        }
    }

    /// Fan one cycle's events out to every subscribed destination
    pub async fn dispatch(&self, events: &[UpdateEvent], token: DedupeToken) {
        let now = Utc::now();
        let mut failures: Vec<String> = Vec::new();

        for (topic, topic_events) in group_by_topic(events) {
            info!("dispatching {} change(s) for topic '{}'", topic_events.len(), topic);

            self.deliver_channels(topic, &topic_events, now, &mut failures)
                .await;
            self.deliver_dms(&topic_events, now, &mut failures).await;

            if topic == self.config.public_topic {
                self.cross_post(&topic_events, now, token).await;
            }
        }

        if !failures.is_empty() {
            self.notify_operator(&format!(
                "{} delivery failure(s) this cycle:\n{}",
                failures.len(),
                failures.join("\n")
            ))
            .await;
        }
    }

    /// Deliver a topic's events to its subscribed guild channels
    async fn deliver_channels(
        &self,
        topic: &str,
        topic_events: &[&UpdateEvent],
        now: DateTime<Utc>,
        failures: &mut Vec<String>,
    ) {
        let channels = match self.subscriptions.channels_for_topic(topic).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!("failed to resolve channels for topic '{}': {}", topic, e);
                failures.push(format!("topic '{topic}' channel lookup: {e}"));
                return;
            }
        };

        for sub in channels {
            let watched: Vec<&UpdateEvent> = topic_events
                .iter()
                .copied()
                .filter(|e| sub.products.contains(&e.product))
                .collect();
            if watched.is_empty() {
                continue;
            }

            let notice = render_notice(&watched, now, self.config.diff_url.as_deref());
            if let Err(e) = self.chat.send_channel_message(sub.channel_id, &notice).await {
                warn!(
                    "delivery to channel {} (guild {}) failed: {}",
                    sub.channel_id, sub.guild_id, e
                );
                failures.push(format!("channel {}: {e}", sub.channel_id));
            }
        }
    }

    /// Deliver events to users with direct-message subscriptions
    async fn deliver_dms(
        &self,
        topic_events: &[&UpdateEvent],
        now: DateTime<Utc>,
        failures: &mut Vec<String>,
    ) {
        let names: Vec<&str> = topic_events.iter().map(|e| e.product.as_str()).collect();
        let watchers = match self.subscriptions.watchers_of(&names).await {
            Ok(watchers) => watchers,
            Err(e) => {
                warn!("failed to resolve watchers: {}", e);
                failures.push(format!("watcher lookup: {e}"));
                return;
            }
        };

        for sub in watchers {
            let watched: Vec<&UpdateEvent> = topic_events
                .iter()
                .copied()
                .filter(|e| sub.products.contains(&e.product))
                .collect();
            if watched.is_empty() {
                continue;
            }

            let notice = render_notice(&watched, now, self.config.diff_url.as_deref());
            if let Err(e) = self.chat.send_direct_message(sub.user_id, &notice).await {
                warn!("delivery to user {} failed: {}", sub.user_id, e);
                failures.push(format!("user {}: {e}", sub.user_id));
            }
        }
    }

    /// Cross-post the public topic's changes, at most once per platform
    /// per cycle token
    async fn cross_post(&self, events: &[&UpdateEvent], now: DateTime<Utc>, token: DedupeToken) {
        let text = render_social_text(events, now);

        for poster in &self.posters {
            let already_sent = {
                let sent = self.sent.lock().expect("sent-token lock");
                sent.get(poster.name()).is_some_and(|s| s.contains(&token))
            };
            if already_sent {
                debug!(
                    "social post already sent to {} for this cycle, skipping",
                    poster.name()
                );
                continue;
            }

            match poster.post(&text).await {
                Ok(()) => {
                    info!("cross-posted to {}", poster.name());
                    self.sent
                        .lock()
                        .expect("sent-token lock")
                        .entry(poster.name())
                        .or_default()
                        .insert(token);
                }
                Err(e) => {
                    warn!("cross-post to {} failed: {}", poster.name(), e);
                }
            }
        }
    }

    /// Send a diagnostic message to the operator's direct channel
    ///
    /// Consumers of the notification surface never see raw errors; the
    /// operator alone gets the detail, out of band.
    pub async fn notify_operator(&self, message: &str) {
        if self.config.operator_id == 0 {
            warn!("no operator configured, dropping alert: {}", message);
            return;
        }

        let notice = Notice {
            title: "buildwatch alert".to_string(),
            timestamp: Utc::now(),
            lines: message.lines().map(str::to_string).collect(),
            link: None,
        };

        if let Err(e) = self
            .chat
            .send_direct_message(self.config.operator_id, &notice)
            .await
        {
            warn!("failed to alert operator: {}", e);
        }
    }
}

/// Group events by topic, preserving first-appearance order
fn group_by_topic(events: &[UpdateEvent]) -> Vec<(&str, Vec<&UpdateEvent>)> {
    let mut topics: Vec<(&str, Vec<&UpdateEvent>)> = Vec::new();
    for event in events {
        match topics.iter_mut().find(|(topic, _)| *topic == event.topic) {
            Some((_, bucket)) => bucket.push(event),
            None => topics.push((event.topic.as_str(), vec![event])),
        }
    }
    topics
}

/// Render the notice for one destination's filtered events
fn render_notice(events: &[&UpdateEvent], now: DateTime<Utc>, diff_url: Option<&str>) -> Notice {
    Notice {
        title: "Branch updates".to_string(),
        timestamp: now,
        lines: events
            .iter()
            .map(|event| render_line(event, diff_url))
            .collect(),
        link: diff_url.map(str::to_string),
    }
}

/// One `old --> new` line for a single product, the changed halves bolded
fn render_line(event: &UpdateEvent, diff_url: Option<&str>) -> String {
    let (old_text, old_build) = match &event.old {
        Some(old) => (old.build_text.as_str(), old.build.as_str()),
        None => (UNTRACKED_TEXT, UNTRACKED_BUILD),
    };

    let new_text = if event.new.build_text != old_text {
        format!("**{}**", event.new.build_text)
    } else {
        event.new.build_text.clone()
    };
    let new_build = if event.new.build != old_build {
        format!("**{}**", event.new.build)
    } else {
        event.new.build.clone()
    };

    let mut line = format!(
        "`{} ({})`: {}.{} --> {}.{}",
        event.public_name, event.product, old_text, old_build, new_text, new_build
    );

    if event.new.encrypted == Some(true) {
        line.push(' ');
        line.push_str(LOCK_MARKER);
    }

    if let (Some(base), Some(old)) = (diff_url, &event.old) {
        line.push_str(&format!(
            " | [diff]({}?from={}&to={})",
            base, old.build, event.new.build
        ));
    }

    line
}

/// Plain-text rendition for social platforms: markdown stripped, the lock
/// marker swapped for its glyph, the diff link dropped
fn render_social_text(events: &[&UpdateEvent], now: DateTime<Utc>) -> String {
    let plural = if events.len() > 1 { "s" } else { "" };
    let mut text = format!("New build{plural} found:\n");

    for event in events {
        let line = render_line(event, None)
            .replace('`', "")
            .replace("**", "")
            .replace(LOCK_MARKER, &LOCK_GLYPH.to_string());
        text.push_str(&line);
        text.push('\n');
    }

    text.push_str(&format!("Found at: {}", now.format("%m-%d-%Y %H:%M:%S UTC")));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VersionRecord;
    use std::collections::BTreeSet;

    fn record(build: &str, text: &str, seqn: u64) -> VersionRecord {
        VersionRecord {
            region: "us".to_string(),
            build_config: "bc0".to_string(),
            cdn_config: "cc0".to_string(),
            build: build.to_string(),
            build_text: text.to_string(),
            product_config: "pc0".to_string(),
            keyring: None,
            encrypted: None,
            seqn,
            observed_at: Utc::now(),
        }
    }

    fn event(product: &str, topic: &str, old: Option<VersionRecord>, new: VersionRecord) -> UpdateEvent {
        let changed = match &old {
            Some(o) => new.changed_fields(o),
            None => BTreeSet::from(["build", "build_text"]),
        };
        UpdateEvent {
            product: product.to_string(),
            public_name: format!("{product} Public"),
            topic: topic.to_string(),
            old,
            new,
            changed,
        }
    }

    #[test]
    fn line_bolds_only_changed_halves() {
        let e = event(
            "alpha",
            "games",
            Some(record("100", "1.2.3", 10)),
            record("101", "1.2.3", 11),
        );
        let line = render_line(&e, None);
        assert_eq!(line, "`alpha Public (alpha)`: 1.2.3.100 --> 1.2.3.**101**");
    }

    #[test]
    fn line_for_untracked_product() {
        let e = event("alpha", "games", None, record("101", "1.2.4", 11));
        let line = render_line(&e, None);
        assert_eq!(
            line,
            "`alpha Public (alpha)`: untracked.0.0.0 --> **1.2.4**.**101**"
        );
    }

    #[test]
    fn line_marks_encrypted_builds() {
        let mut new = record("101", "1.2.4", 11);
        new.encrypted = Some(true);
        let e = event("alpha", "games", Some(record("100", "1.2.3", 10)), new);
        assert!(render_line(&e, None).ends_with(":lock:"));
    }

    #[test]
    fn line_appends_diff_link_when_configured() {
        let e = event(
            "alpha",
            "games",
            Some(record("100", "1.2.3", 10)),
            record("101", "1.2.4", 11),
        );
        let line = render_line(&e, Some("https://diffs.example.net/builds"));
        assert!(line.ends_with("| [diff](https://diffs.example.net/builds?from=100&to=101)"));
    }

    #[test]
    fn social_text_strips_markup_and_diff_link() {
        let mut new = record("101", "1.2.4", 11);
        new.encrypted = Some(true);
        let e = event("alpha", "games", Some(record("100", "1.2.3", 10)), new);
        let events = vec![&e];

        let text = render_social_text(&events, Utc::now());
        assert!(text.starts_with("New build found:\n"));
        assert!(text.contains("alpha Public (alpha): 1.2.3.100 --> 1.2.4.101"));
        assert!(!text.contains('`'));
        assert!(!text.contains("**"));
        assert!(!text.contains(LOCK_MARKER));
        assert!(text.contains(LOCK_GLYPH));
    }

    #[test]
    fn grouping_preserves_first_appearance_order() {
        let a = event("alpha", "games", None, record("1", "1.0", 1));
        let b = event("beta", "tools", None, record("2", "1.0", 2));
        let c = event("gamma", "games", None, record("3", "1.0", 3));
        let events = vec![a, b, c];

        let grouped = group_by_topic(&events);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "games");
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].0, "tools");
    }
}
