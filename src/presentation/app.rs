//! Command-line front end: one display slot per URL.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::entities::{ImageSource, SlotId};
use crate::infrastructure::image::{CacheStats, ImageLoader, Resolution, SlotReadyEvent};

/// How often the event loop checks whether fetches are still in flight.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What ended up in a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    /// The slot.
    pub slot: SlotId,
    /// URL requested for it.
    pub url: String,
    /// Tier that served it.
    pub source: ImageSource,
    /// Decoded width in pixels.
    pub width: u32,
    /// Decoded height in pixels.
    pub height: u32,
}

impl std::fmt::Display for SlotReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "slot {:>3}  {:<7}  {}x{}  {}",
            self.slot, self.source, self.width, self.height, self.url
        )
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Slots that received an image, in slot order.
    pub ready: Vec<SlotReport>,
    /// Slots that never received one.
    pub failed: Vec<(SlotId, String)>,
    /// Memory cache statistics after the run.
    pub stats: CacheStats,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for report in &self.ready {
            writeln!(f, "{report}")?;
        }
        for (slot, url) in &self.failed {
            writeln!(f, "slot {slot:>3}  failed   {url}")?;
        }
        write!(f, "{}", self.stats)
    }
}

/// Drives an [`ImageLoader`] the way a grid of display slots would.
pub struct App {
    loader: ImageLoader,
    events: mpsc::UnboundedReceiver<SlotReadyEvent>,
}

impl App {
    /// Creates the app around a loader and the receiving end of its event channel.
    #[must_use]
    pub const fn new(loader: ImageLoader, events: mpsc::UnboundedReceiver<SlotReadyEvent>) -> Self {
        Self { loader, events }
    }

    /// Returns the loader.
    #[must_use]
    pub const fn loader(&self) -> &ImageLoader {
        &self.loader
    }

    /// Resolves every URL into its own slot and waits up to `wait` for the
    /// network tier.
    pub async fn run(&mut self, urls: &[String], clear: bool, wait: Duration) -> RunSummary {
        if clear {
            self.loader.clear_all().await;
        }

        let mut ready = BTreeMap::new();
        let mut outstanding = BTreeMap::new();

        for (index, url) in urls.iter().enumerate() {
            let slot = SlotId(index);
            match self.loader.resolve(slot, url).await {
                Resolution::Ready(loaded) => {
                    ready.insert(
                        slot,
                        SlotReport {
                            slot,
                            url: url.clone(),
                            source: loaded.source,
                            width: loaded.image.width(),
                            height: loaded.image.height(),
                        },
                    );
                }
                Resolution::Pending => {
                    outstanding.insert(slot, url.clone());
                }
            }
        }

        if !outstanding.is_empty() {
            info!(pending = outstanding.len(), "Waiting for network loads");
            self.wait_for_slots(&mut outstanding, &mut ready, wait).await;
        }

        RunSummary {
            ready: ready.into_values().collect(),
            failed: outstanding.into_iter().collect(),
            stats: self.loader.memory_cache_stats(),
        }
    }

    async fn wait_for_slots(
        &mut self,
        outstanding: &mut BTreeMap<SlotId, String>,
        ready: &mut BTreeMap<SlotId, SlotReport>,
        wait: Duration,
    ) {
        let deadline = Instant::now() + wait;
        let mut settled = false;

        while !outstanding.is_empty() {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    Self::record(outstanding, ready, &event);
                }
                () = tokio::time::sleep(POLL_INTERVAL) => {
                    if self.loader.pending_count() == 0 {
                        // One more interval for events sent right after the
                        // last fetch left the registry.
                        if settled {
                            break;
                        }
                        settled = true;
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    debug!(remaining = outstanding.len(), "Gave up waiting for slots");
                    break;
                }
            }
        }

        while let Ok(event) = self.events.try_recv() {
            Self::record(outstanding, ready, &event);
        }
    }

    fn record(
        outstanding: &mut BTreeMap<SlotId, String>,
        ready: &mut BTreeMap<SlotId, SlotReport>,
        event: &SlotReadyEvent,
    ) {
        if let Some(url) = outstanding.remove(&event.slot) {
            ready.insert(
                event.slot,
                SlotReport {
                    slot: event.slot,
                    url,
                    source: ImageSource::Network,
                    width: event.image.width(),
                    height: event.image.height(),
                },
            );
        }
    }
}
