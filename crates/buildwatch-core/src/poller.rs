//! Polling scheduler
//!
//! The Poller is responsible for:
//! - Driving the recurring fetch cycle on a fixed interval
//! - Fetching all configured products with bounded parallelism
//! - Probing encryption only when a product's config hash changed
//! - Feeding candidates through the build store's accept decision
//! - Collecting accepted changes into one cycle's event list
//!
//! ## Cycle flow
//!
//! ```text
//! tick ──► fetch products (buffered, config order) ──► probe (conditional)
//!                                                          │
//!                              BuildStore.compare_and_update (serialized)
//!                                                          │
//!                         New decisions ──► CycleCompleted { events, token }
//! ```
//!
//! One cycle at a time: the loop awaits the cycle body, and ticks that
//! fire while it runs are skipped rather than queued or cancelled. A cycle
//! that overruns the interval finishes naturally and is logged.
//!
//! The very first cycle after process start, or any cycle that begins
//! with an empty store, only warms the cache: the store is updated for
//! every product but no events leave the poller, so a restart never
//! replays the whole catalog as news.

use crate::config::{PollerConfig, ProductConfig};
use crate::error::{Error, Result};
use crate::model::{DedupeToken, UpdateEvent, VersionRecord};
use crate::traits::{BuildStore, EncryptionProbe, VersionSource};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Capacity of the poller's event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events emitted by the Poller
#[derive(Debug, Clone)]
pub enum PollerEvent {
    /// Poller started
    Started {
        /// Number of configured products
        products: usize,
    },

    /// A fetch failed; the product sits this cycle out
    FetchFailed {
        /// Product whose fetch failed
        product: String,
        /// Error message
        error: String,
        /// Whether the next cycle is expected to succeed on its own
        retryable: bool,
    },

    /// A cycle finished
    CycleCompleted {
        /// Accepted changes; empty for warming cycles
        events: Vec<UpdateEvent>,
        /// This cycle's dedupe token
        token: DedupeToken,
        /// Whether this cycle only warmed the cache
        warmed: bool,
        /// Products fetched successfully
        fetched: usize,
        /// Products skipped on fetch failure
        failed: usize,
    },

    /// The whole cycle body failed; the schedule survives
    CycleFailed {
        /// Error description for the operator channel
        error: String,
    },

    /// Poller stopped
    Stopped {
        /// Why the loop exited
        reason: String,
    },
}

/// Recurring polling task
///
/// Constructed once per process with its collaborators injected; nothing
/// here reaches for globals. The store is the only shared mutable
/// resource, and every write goes through its serialized
/// `compare_and_update`.
pub struct Poller {
    /// Version source for fetching product data
    source: Arc<dyn VersionSource>,

    /// Encryption probe, consulted only on config-hash changes
    probe: Arc<dyn EncryptionProbe>,

    /// Build store owning the accept decision
    store: Arc<dyn BuildStore>,

    /// Static product catalog, in processing order
    products: Vec<ProductConfig>,

    /// Interval between cycle starts
    interval: Duration,

    /// Bound on concurrent fetches per cycle
    fetch_concurrency: usize,

    /// Delay before the first tick
    startup_delay: Duration,

    /// Event sender for external monitoring and dispatch
    event_tx: mpsc::Sender<PollerEvent>,
}

impl Poller {
    /// Create a new poller
    ///
    /// Returns the poller and the receiving end of its event channel. The
    /// dispatcher (or any other consumer) drains the receiver; if nobody
    /// does, events are dropped with a warning once the channel fills.
    pub fn new(
        source: Arc<dyn VersionSource>,
        probe: Arc<dyn EncryptionProbe>,
        store: Arc<dyn BuildStore>,
        products: Vec<ProductConfig>,
        config: &PollerConfig,
    ) -> (Self, mpsc::Receiver<PollerEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let poller = Self {
            source,
            probe,
            store,
            products,
            interval: Duration::from_secs(config.interval_secs),
            fetch_concurrency: config.fetch_concurrency,
            startup_delay: Duration::from_secs(config.startup_delay_secs),
            event_tx: tx,
        };

        (poller, rx)
    }

    /// Run the polling loop until SIGINT
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None, None).await
    }

    /// Run the polling loop with explicit readiness and shutdown signals
    ///
    /// `ready` delays the first tick until the surrounding system (e.g. a
    /// connected chat client) signals it is ready; `shutdown` ends the
    /// loop. Both are optional; tests and embedders use them, the
    /// production daemon relies on OS signals.
    pub async fn run_with_shutdown(
        &self,
        ready: Option<oneshot::Receiver<()>>,
        shutdown: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(ready, shutdown).await
    }

    async fn run_internal(
        &self,
        ready: Option<oneshot::Receiver<()>>,
        shutdown: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.emit_event(PollerEvent::Started {
            products: self.products.len(),
        });

        if let Some(ready) = ready {
            // A dropped sender counts as ready; waiting forever would be worse
            let _ = ready.await;
        }

        if !self.startup_delay.is_zero() {
            tokio::time::sleep(self.startup_delay).await;
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut first_cycle = true;

        if let Some(mut shutdown) = shutdown {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_cycle(first_cycle).await;
                        first_cycle = false;
                    }

                    _ = &mut shutdown => {
                        info!("shutdown signal received");
                        self.emit_event(PollerEvent::Stopped {
                            reason: "shutdown signal".to_string(),
                        });
                        break;
                    }
                }
            }
        } else {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_cycle(first_cycle).await;
                        first_cycle = false;
                    }

                    _ = tokio::signal::ctrl_c() => {
                        info!("shutdown signal received");
                        self.emit_event(PollerEvent::Stopped {
                            reason: "shutdown signal".to_string(),
                        });
                        break;
                    }
                }
            }
        }

        self.store.flush().await?;
        info!("store flushed, poller stopped");

        Ok(())
    }

    /// Run one cycle, containing any error so the schedule survives
    async fn run_cycle(&self, first_cycle: bool) {
        let started = tokio::time::Instant::now();

        if let Err(e) = self.poll_once(first_cycle).await {
            let fatal = match e {
                Error::FatalCycle(_) => e,
                other => Error::fatal(other.to_string()),
            };
            error!("{}", fatal);
            self.emit_event(PollerEvent::CycleFailed {
                error: fatal.to_string(),
            });
        }

        let elapsed = started.elapsed();
        if elapsed > self.interval {
            warn!(
                "poll cycle overran the interval ({:?} > {:?}); intervening ticks were skipped",
                elapsed, self.interval
            );
        }
    }

    /// One full fetch/probe/compare pass over the catalog
    async fn poll_once(&self, first_cycle: bool) -> Result<()> {
        let warming = first_cycle || self.store.entry_count().await? == 0;
        let token = DedupeToken::generate();

        debug!("fetching {} products", self.products.len());

        // Bounded fan-out; buffered() keeps results in catalog order, so
        // products are processed in their configured order
        let mut fetch_futs = Vec::with_capacity(self.products.len());
        for product in &self.products {
            fetch_futs.push(async move { (product, self.source.fetch(&product.name).await) });
        }
        let fetches: Vec<_> = futures::stream::iter(fetch_futs)
            .buffered(self.fetch_concurrency)
            .collect()
            .await;

        let mut events = Vec::new();
        let mut fetched = 0usize;
        let mut failed = 0usize;

        for (product, result) in fetches {
            let versions = match result {
                Ok(versions) => versions,
                Err(e) => {
                    warn!("skipping '{}' this cycle: {}", product.name, e);
                    self.emit_event(PollerEvent::FetchFailed {
                        product: product.name.clone(),
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                    failed += 1;
                    continue;
                }
            };

            let Some(record) = versions.for_region(product.primary_region()) else {
                warn!(
                    "response for '{}' has no row for region '{}'",
                    product.name,
                    product.primary_region()
                );
                self.emit_event(PollerEvent::FetchFailed {
                    product: product.name.clone(),
                    error: format!("no row for region '{}'", product.primary_region()),
                    retryable: false,
                });
                failed += 1;
                continue;
            };
            fetched += 1;

            let mut candidate = record.clone();

            // Probing every cycle would hammer the CDN hosts; the result
            // can only change when the config hash does
            let prior = self.store.entry(&product.name).await?;
            let config_changed = prior
                .as_ref()
                .map(|e| e.current.product_config != candidate.product_config)
                .unwrap_or(true);
            if config_changed && !candidate.product_config.is_empty() {
                candidate.encrypted = self
                    .probe
                    .probe(&product.name, &candidate.product_config)
                    .await;
            }

            // Store errors are the one thing that fails the whole cycle:
            // every later decision depends on a writable store
            let outcome = self
                .store
                .compare_and_update(&product.name, candidate.clone())
                .await?;

            debug!("'{}' decided {:?}", product.name, outcome.decision);

            if outcome.decision == crate::model::Decision::New {
                events.push(build_event(product, outcome.previous, candidate));
            }
        }

        if warming && !events.is_empty() {
            info!(
                "warming cycle cached {} products without notifying",
                events.len()
            );
            events.clear();
        }

        self.emit_event(PollerEvent::CycleCompleted {
            events,
            token,
            warmed: warming,
            fetched,
            failed,
        });

        Ok(())
    }

    /// Emit a poller event, dropping it with a warning if nobody keeps up
    fn emit_event(&self, event: PollerEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("poller event channel full, dropping event");
        }
    }
}

/// Build the cycle-scoped update event for an accepted record
fn build_event(
    product: &ProductConfig,
    previous: Option<VersionRecord>,
    accepted: VersionRecord,
) -> UpdateEvent {
    let changed = match &previous {
        Some(prev) => accepted.changed_fields(prev),
        None => BTreeSet::from(["build", "build_text"]),
    };

    UpdateEvent {
        product: product.name.clone(),
        public_name: product.public_name.clone(),
        topic: product.topic.clone(),
        old: previous,
        new: accepted,
        changed,
    }
}
