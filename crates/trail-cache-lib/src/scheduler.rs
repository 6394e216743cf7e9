//! Viewport-driven fetch scheduling across resolution tiers
//!
//! The scheduler owns, per tier, which cells are loaded and which are in flight. A viewport
//! update covers the viewport for each tier active at its zoom, starts throttled fetches for
//! new cells, cancels fetches that left view, and evicts fine-tier cells that are no longer
//! needed.
//!
//! Fetches run on spawned tasks and report back through a channel. Results are applied only
//! inside scheduler calls ([`ViewportFetchScheduler::pump`],
//! [`ViewportFetchScheduler::next_completion`], [`ViewportFetchScheduler::settle`]), so the
//! bookkeeping and the [`CellListener`] callbacks never run concurrently with each other.

use crate::cache::{InFlight, LoadedCell, TierCache};
use crate::cell::{CellId, Tier, Viewport};
use crate::config::CacheConfig;
use crate::covering::Coverer;
use crate::entities::{CellContent, CellEntities, decode_cell, scan_entity_ids};
use crate::runtime;
use crate::throttle::{FetchThrottler, Throttled};
use crate::transport::{FetchRequest, Transport};
use crate::{CacheError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receives decoded cells as they load and their ids as they unload
pub trait CellListener {
    fn on_load(&mut self, tier: Tier, cell: CellId, content: &CellContent);

    fn on_unload(&mut self, tier: Tier, cell: CellId, entities: &CellEntities);

    /// A fetch or decode failed; the cell will be retried on the next update
    fn on_error(&mut self, _tier: Tier, _cell: CellId, _error: &CacheError) {}
}

/// Out-of-band request for one entity, kept loaded regardless of the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PinRequest {
    pub entity_id: u64,
    pub precise: bool,
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerStats {
    pub fetches_started: u64,
    pub loads: u64,
    pub empty_loads: u64,
    pub failures: u64,
    pub cancellations: u64,
    pub unloads: u64,
}

struct Fetched {
    bytes: Arc<[u8]>,
    content: Option<CellContent>,
}

struct Completion {
    tier: Tier,
    cell: CellId,
    serial: u64,
    outcome: Result<Fetched>,
}

/// Multi-tier cell fetch scheduler
pub struct ViewportFetchScheduler<T, C> {
    config: CacheConfig,
    transport: T,
    coverer: C,
    throttler: FetchThrottler,
    tiers: [TierCache; 3],
    pin: Option<PinRequest>,
    /// Parent of every fetch token, cancelled on drop
    root: CancellationToken,
    sender: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    next_serial: u64,
    stats: SchedulerStats,
}

impl<T: Transport, C: Coverer> ViewportFetchScheduler<T, C> {
    /// Create a scheduler with its own throttle
    ///
    /// Must be called inside a tokio runtime, fetch tasks are spawned on it.
    pub fn new(config: CacheConfig, transport: T, coverer: C) -> Result<Self> {
        let throttler = FetchThrottler::new(config.max_requests_in_flight);
        Self::with_throttler(config, transport, coverer, throttler)
    }

    /// Create a scheduler sharing an existing throttle with other fetchers
    pub fn with_throttler(
        config: CacheConfig,
        transport: T,
        coverer: C,
        throttler: FetchThrottler,
    ) -> Result<Self> {
        config.validate()?;
        if !runtime::in_runtime_context() {
            return Err(CacheError::NoRuntime);
        }

        let (sender, completions) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            transport,
            coverer,
            throttler,
            tiers: Default::default(),
            pin: None,
            root: CancellationToken::new(),
            sender,
            completions,
            next_serial: 0,
            stats: SchedulerStats::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn throttler(&self) -> &FetchThrottler {
        &self.throttler
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn pin(&self) -> Option<PinRequest> {
        self.pin
    }

    pub fn is_loaded(&self, tier: Tier, cell: CellId) -> bool {
        self.tiers[tier.index()].is_loaded(cell)
    }

    pub fn is_in_flight(&self, tier: Tier, cell: CellId) -> bool {
        self.tiers[tier.index()].is_in_flight(cell)
    }

    pub fn loaded_count(&self, tier: Tier) -> usize {
        self.tiers[tier.index()].loaded_count()
    }

    /// Loaded cells of a tier, sorted
    pub fn loaded_cells(&self, tier: Tier) -> Vec<CellId> {
        let mut cells: Vec<CellId> = self.tiers[tier.index()].loaded_cells().collect();
        cells.sort_unstable();
        cells
    }

    /// Fetches started and not yet applied, across all tiers
    pub fn in_flight_count(&self) -> usize {
        self.tiers.iter().map(TierCache::in_flight_count).sum()
    }

    /// Bring the cache in line with a new camera position
    ///
    /// Returns after updating bookkeeping and dispatching fetches; loads arrive through
    /// later calls. Unloads of evicted cells are delivered to `listener` before returning.
    pub fn update_viewport<L: CellListener + ?Sized>(&mut self, viewport: Viewport, listener: &mut L) {
        #[cfg(feature = "profiling")]
        profiling::scope!("ViewportFetchScheduler::update_viewport");

        let zoom = viewport.zoom;
        let rects = viewport.rects();

        let mut coverings: [Vec<CellId>; 3] = Default::default();
        let mut used = HashSet::new();
        used.insert(CellId::PIN);
        for tier in Tier::ALL {
            if !self.config.is_active(tier, zoom) {
                continue;
            }
            let level = self.config.tier(tier).level;
            let mut cells: Vec<CellId> = rects
                .iter()
                .flat_map(|rect| self.coverer.cover(rect, level))
                .collect();
            cells.sort_unstable();
            cells.dedup();
            used.extend(cells.iter().copied());
            coverings[tier.index()] = cells;
        }

        for tier in Tier::ALL {
            for cell in std::mem::take(&mut coverings[tier.index()]) {
                if !self.tiers[tier.index()].is_known(cell) {
                    self.start_fetch(tier, cell, FetchRequest::Cell { tier, cell });
                }
            }
        }
        self.retry_pin();

        for tier in Tier::ALL {
            let cancelled = self.tiers[tier.index()].cancel_unused(&used);
            if !cancelled.is_empty() {
                tracing::debug!(%tier, count = cancelled.len(), "Cancelled fetches outside the viewport");
                self.stats.cancellations += cancelled.len() as u64;
            }
        }

        if self.config.is_active(Tier::Fine, zoom) {
            let evicted = self.tiers[Tier::Fine.index()].evict_unused(&used);
            for (cell, loaded) in evicted {
                self.emit_unload(Tier::Fine, cell, loaded, listener);
            }
        }

        tracing::trace!(
            zoom,
            used = used.len(),
            in_flight = self.in_flight_count(),
            "Viewport updated"
        );
    }

    /// Replace the pinned entity, or clear it with `None`
    ///
    /// An unchanged request only refetches a pin whose last fetch failed.
    pub fn set_pin<L: CellListener + ?Sized>(&mut self, request: Option<PinRequest>, listener: &mut L) {
        if self.pin == request {
            self.retry_pin();
            return;
        }

        let fine = &mut self.tiers[Tier::Fine.index()];
        if fine.cancel(CellId::PIN) {
            self.stats.cancellations += 1;
        }
        if let Some(loaded) = fine.unload(CellId::PIN) {
            self.emit_unload(Tier::Fine, CellId::PIN, loaded, listener);
        }

        self.pin = request;
        self.retry_pin();
    }

    /// Fetch the pin when it is set but neither loaded nor in flight
    fn retry_pin(&mut self) {
        let Some(pin) = self.pin else {
            return;
        };
        if self.tiers[Tier::Fine.index()].is_known(CellId::PIN) {
            return;
        }
        self.start_fetch(
            Tier::Fine,
            CellId::PIN,
            FetchRequest::Pin {
                entity_id: pin.entity_id,
                precise: pin.precise,
            },
        );
    }

    /// Apply every completion that is already available, returning how many took effect
    pub fn pump<L: CellListener + ?Sized>(&mut self, listener: &mut L) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions.try_recv() {
            if self.apply(completion, listener) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next completion that takes effect
    ///
    /// Returns false immediately when nothing is in flight.
    pub async fn next_completion<L: CellListener + ?Sized>(&mut self, listener: &mut L) -> bool {
        while self.in_flight_count() > 0 {
            match self.completions.recv().await {
                Some(completion) => {
                    if self.apply(completion, listener) {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }

    /// Wait until every started fetch has been applied
    pub async fn settle<L: CellListener + ?Sized>(&mut self, listener: &mut L) {
        while self.next_completion(listener).await {}
    }

    fn start_fetch(&mut self, tier: Tier, cell: CellId, request: FetchRequest) {
        let serial = self.next_serial;
        self.next_serial += 1;

        let token = self.root.child_token();
        let throttled = self
            .throttler
            .schedule(token.clone(), self.transport.fetch(&request));
        let sender = self.sender.clone();

        runtime::spawn(async move {
            let outcome = match throttled.await {
                Throttled::Cancelled => {
                    tracing::trace!(%tier, %cell, "Fetch dropped after cancellation");
                    return;
                }
                Throttled::Completed(result) => result.and_then(|bytes| {
                    let content = decode_cell(&bytes)?;
                    Ok(Fetched {
                        bytes: Arc::from(bytes),
                        content,
                    })
                }),
            };
            // The scheduler may already be gone
            let _ = sender.send(Completion {
                tier,
                cell,
                serial,
                outcome,
            });
        });

        self.tiers[tier.index()].begin(
            cell,
            InFlight {
                token,
                serial,
                started: instant::Instant::now(),
            },
        );
        self.stats.fetches_started += 1;
        tracing::debug!(%tier, %cell, ?request, "Fetch started");
    }

    fn apply<L: CellListener + ?Sized>(&mut self, completion: Completion, listener: &mut L) -> bool {
        let Completion {
            tier,
            cell,
            serial,
            outcome,
        } = completion;

        let cache = &mut self.tiers[tier.index()];
        let Some(entry) = cache.finish(cell, serial) else {
            tracing::trace!(%tier, %cell, serial, "Discarding superseded completion");
            return false;
        };
        let elapsed_ms = entry.started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Fetched {
                bytes,
                content: Some(content),
            }) => {
                cache.mark_loaded(cell, LoadedCell::Buffer(bytes));
                self.stats.loads += 1;
                tracing::debug!(
                    %tier,
                    %cell,
                    paths = content.paths.len(),
                    trails = content.trails.len(),
                    elapsed_ms,
                    "Cell loaded"
                );
                listener.on_load(tier, cell, &content);
            }
            Ok(Fetched { content: None, .. }) => {
                cache.mark_loaded(cell, LoadedCell::Empty);
                self.stats.empty_loads += 1;
                tracing::trace!(%tier, %cell, elapsed_ms, "Cell is empty");
            }
            Err(error) => {
                self.stats.failures += 1;
                tracing::warn!(%tier, %cell, %error, elapsed_ms, "Fetch failed, will retry on next update");
                listener.on_error(tier, cell, &error);
            }
        }
        true
    }

    fn emit_unload<L: CellListener + ?Sized>(
        &mut self,
        tier: Tier,
        cell: CellId,
        loaded: LoadedCell,
        listener: &mut L,
    ) {
        match loaded {
            LoadedCell::Empty => tracing::trace!(%tier, %cell, "Evicted empty cell"),
            LoadedCell::Buffer(bytes) => match scan_entity_ids(&bytes) {
                Ok(entities) => {
                    self.stats.unloads += 1;
                    tracing::debug!(
                        %tier,
                        %cell,
                        paths = entities.path_ids.len(),
                        trails = entities.trail_ids.len(),
                        "Cell unloaded"
                    );
                    listener.on_unload(tier, cell, &entities);
                }
                Err(error) => {
                    tracing::warn!(%tier, %cell, %error, "Could not recover ids of evicted cell");
                }
            },
        }
    }
}

impl<T, C> Drop for ViewportFetchScheduler<T, C> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
