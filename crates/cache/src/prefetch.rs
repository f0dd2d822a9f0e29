//! The prefetch cache.
//!
//! [`PrefetchCache`] lives on the interactive thread. Each cursor move or
//! sequence change recomputes the [`CacheWindow`], evicts what left it and
//! starts a fresh window pass on its own thread. Sequence changes also
//! restart the thumbnail pass, which fans out over a [`WorkerPool`].
//! Background results come back through a [`TaskQueue`] and only become
//! [`CacheEvent`]s when the owner calls [`PrefetchCache::process_pending`].
//!
//! A pass never writes to an item after its token was cancelled: the token
//! is checked under the item's slot lock right before every write, and
//! the owner cancels the old token before it evicts anything.

use crate::{
    nearest_first, CacheConfig, CacheWindow, DecodedImage, ImageSlot, Item, LoadError,
    Materializer, Sequence, SequenceChange,
};
use imgview_scheduler::{CancellationToken, TaskQueue, WorkerPool, WorkerPoolConfig};
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The hot window was recomputed; `indices` are nearest-first.
    WindowChanged {
        cursor: Option<usize>,
        indices: Vec<usize>,
    },
    ItemLoaded {
        index: usize,
    },
    ItemFailed {
        index: usize,
        reason: String,
    },
    ThumbnailReady {
        index: usize,
    },
    ThumbnailFailed {
        index: usize,
        reason: String,
    },
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    pub window_passes_started: u64,
    pub window_passes_completed: u64,
    pub window_passes_cancelled: u64,
    pub items_decoded: u64,
    pub thumbnails_built: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    passes_started: AtomicU64,
    passes_completed: AtomicU64,
    passes_cancelled: AtomicU64,
    items_decoded: AtomicU64,
    thumbnails_built: AtomicU64,
    evictions: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

enum PassEvent {
    Loaded(Arc<Item>),
    LoadFailed(Arc<Item>, String),
    Thumbnail(Arc<Item>, Result<DecodedImage, String>),
}

/// State shared with the pass threads and thumbnail tasks.
struct Shared {
    materializer: Materializer,
    events: TaskQueue<PassEvent>,
    counters: Counters,
}

/// A running window or thumbnail-dispatch thread.
struct Pass {
    token: CancellationToken,
    thread: JoinHandle<()>,
}

impl Pass {
    fn join(self) {
        if self.thread.join().is_err() {
            error!("prefetch pass thread panicked");
        }
    }
}

/// Keeps the items around the cursor decoded and builds thumbnails for
/// the whole sequence in the background.
///
/// # Example
///
/// ```no_run
/// use imgview_cache::{scan_directory, CacheConfig, ImageDecoder, Materializer, PrefetchCache};
/// use std::path::Path;
///
/// let mut cache = PrefetchCache::new(CacheConfig::default(), Materializer::new(ImageDecoder));
/// cache.replace_sequence(scan_directory(Path::new("photos")).unwrap());
/// cache.set_cursor(3);
///
/// for event in cache.process_pending() {
///     println!("{event:?}");
/// }
/// ```
pub struct PrefetchCache {
    config: CacheConfig,
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    sequence: Sequence,
    window: CacheWindow,
    /// Items of the current window, nearest first.
    resident: Vec<Arc<Item>>,
    window_pass: Option<Pass>,
    thumbnail_pass: Option<Pass>,
    pending: Vec<CacheEvent>,
    shut_down: bool,
}

impl PrefetchCache {
    pub fn new(config: CacheConfig, materializer: Materializer) -> Self {
        let materializer = materializer
            .with_thumbnail_edge(config.thumbnail_edge)
            .with_transfer_poll(config.transfer_poll());
        let pool = WorkerPool::new(
            WorkerPoolConfig::new(config.thumbnail_workers.max(1))
                .with_thread_name("imgview-thumbnail"),
        );
        Self {
            config,
            shared: Arc::new(Shared {
                materializer,
                events: TaskQueue::new(),
                counters: Counters::default(),
            }),
            pool: Arc::new(pool),
            sequence: Sequence::new(),
            window: CacheWindow::default(),
            resident: Vec::new(),
            window_pass: None,
            thumbnail_pass: None,
            pending: Vec::new(),
            shut_down: false,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.sequence.cursor()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Item>> {
        self.sequence.get(index)
    }

    pub fn window(&self) -> &CacheWindow {
        &self.window
    }

    /// Reload the sequence from scratch.
    pub fn replace_sequence(&mut self, items: Vec<Item>) {
        self.apply(SequenceChange::Replace(items));
    }

    /// Move the cursor (clamped). Never blocks.
    pub fn set_cursor(&mut self, index: usize) {
        if self.shut_down {
            warn!("set_cursor after shutdown ignored");
            return;
        }
        let before = self.sequence.cursor();
        let after = self.sequence.set_cursor(index);
        if before == after {
            return;
        }

        let next = self.next_window();
        let departed = self
            .window
            .departed(&next)
            .into_iter()
            .filter_map(|index| self.sequence.get(index).cloned())
            .collect();
        self.begin_window(next, departed);
    }

    /// Apply an external change to the sequence. Never blocks.
    pub fn apply(&mut self, change: SequenceChange) {
        if self.shut_down {
            warn!("sequence change after shutdown ignored");
            return;
        }
        if let SequenceChange::Replace(items) = &change {
            info!("loading sequence of {} items", items.len());
        }
        if !self.sequence.apply(change) {
            return;
        }

        // Indices shifted, so diff by identity.
        let next = self.next_window();
        let departed = self
            .resident
            .iter()
            .filter(|item| {
                !next
                    .indices()
                    .iter()
                    .filter_map(|&index| self.sequence.get(index))
                    .any(|kept| Arc::ptr_eq(kept, item))
            })
            .cloned()
            .collect();
        self.begin_window(next, departed);
        self.start_thumbnail_pass();
    }

    fn next_window(&self) -> CacheWindow {
        match self.sequence.cursor() {
            Some(cursor) => {
                CacheWindow::compute(cursor, self.sequence.len(), self.config.cache_radius)
            }
            None => CacheWindow::default(),
        }
    }

    fn begin_window(&mut self, next: CacheWindow, departed: Vec<Arc<Item>>) {
        if let Some(pass) = &self.window_pass {
            pass.token.cancel();
        }

        let mut evicted = 0;
        for item in &departed {
            if item.evict_full() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.shared
                .counters
                .evictions
                .fetch_add(evicted, Ordering::Relaxed);
            debug!("evicted {evicted} items");
        }

        self.resident = next
            .indices()
            .iter()
            .filter_map(|&index| self.sequence.get(index).cloned())
            .collect();
        debug!("window {:?} around {:?}", next.indices(), next.cursor());
        self.pending.push(CacheEvent::WindowChanged {
            cursor: next.cursor(),
            indices: next.indices().to_vec(),
        });
        self.window = next;

        let previous = self.window_pass.take();
        let token = CancellationToken::new();
        let pass_token = token.clone();
        let items = self.resident.clone();
        let shared = self.shared.clone();
        bump(&shared.counters.passes_started);

        let spawned = thread::Builder::new()
            .name("imgview-window-pass".into())
            .spawn(move || {
                if let Some(previous) = previous {
                    previous.join();
                }
                run_window_pass(&shared, &items, &pass_token);
            });
        match spawned {
            Ok(thread) => self.window_pass = Some(Pass { token, thread }),
            Err(err) => {
                error!("failed to spawn window pass: {err}");
                bump(&self.shared.counters.passes_cancelled);
            }
        }
    }

    fn start_thumbnail_pass(&mut self) {
        if let Some(pass) = &self.thumbnail_pass {
            pass.token.cancel();
        }
        let previous = self.thumbnail_pass.take();
        let token = CancellationToken::new();
        let pass_token = token.clone();
        let order: Vec<Arc<Item>> = match self.sequence.cursor() {
            Some(cursor) => nearest_first(cursor, self.sequence.len())
                .into_iter()
                .filter_map(|index| self.sequence.get(index).cloned())
                .collect(),
            None => Vec::new(),
        };
        let shared = self.shared.clone();
        let pool = self.pool.clone();

        let spawned = thread::Builder::new()
            .name("imgview-thumbnail-dispatch".into())
            .spawn(move || {
                if let Some(previous) = previous {
                    previous.join();
                }
                pool.kill();
                dispatch_thumbnails(&shared, &pool, order, &pass_token);
            });
        match spawned {
            Ok(thread) => self.thumbnail_pass = Some(Pass { token, thread }),
            Err(err) => error!("failed to spawn thumbnail dispatcher: {err}"),
        }
    }

    /// Drain background results and return them as events, oldest first.
    ///
    /// Thumbnails are stored into their items here, on the calling thread.
    /// Results for items no longer in the sequence are dropped.
    pub fn process_pending(&mut self) -> Vec<CacheEvent> {
        let mut events = std::mem::take(&mut self.pending);
        for event in self.shared.events.drain() {
            match event {
                PassEvent::Loaded(item) => {
                    if !item.full().is_ready() {
                        continue;
                    }
                    if let Some(index) = self.sequence.position_of(&item) {
                        events.push(CacheEvent::ItemLoaded { index });
                    }
                }
                PassEvent::LoadFailed(item, reason) => {
                    if let Some(index) = self.sequence.position_of(&item) {
                        events.push(CacheEvent::ItemFailed { index, reason });
                    }
                }
                PassEvent::Thumbnail(item, result) => {
                    let failure = {
                        let mut slots = item.slots();
                        slots.thumbnail_queued = false;
                        match result {
                            Ok(image) => {
                                slots.thumbnail = ImageSlot::Ready(Arc::new(image));
                                bump(&self.shared.counters.thumbnails_built);
                                None
                            }
                            Err(reason) => {
                                slots.thumbnail = ImageSlot::missing(reason.clone());
                                Some(reason)
                            }
                        }
                    };
                    if let Some(index) = self.sequence.position_of(&item) {
                        events.push(match failure {
                            None => CacheEvent::ThumbnailReady { index },
                            Some(reason) => CacheEvent::ThumbnailFailed { index, reason },
                        });
                    }
                }
            }
        }
        events
    }

    /// True while a pass or thumbnail task is still running or queued.
    pub fn is_busy(&self) -> bool {
        let running = |pass: &Option<Pass>| pass.as_ref().is_some_and(|p| !p.thread.is_finished());
        running(&self.window_pass) || running(&self.thumbnail_pass) || self.pool.active()
    }

    pub fn stats(&self) -> PrefetchStats {
        let c = &self.shared.counters;
        PrefetchStats {
            window_passes_started: c.passes_started.load(Ordering::Relaxed),
            window_passes_completed: c.passes_completed.load(Ordering::Relaxed),
            window_passes_cancelled: c.passes_cancelled.load(Ordering::Relaxed),
            items_decoded: c.items_decoded.load(Ordering::Relaxed),
            thumbnails_built: c.thumbnails_built.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    /// Cancel and join both passes and discard queued thumbnail work.
    ///
    /// Blocks until background threads stop; meant for teardown.
    /// Idempotent. Later cursor moves and sequence changes are ignored.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for pass in [self.window_pass.take(), self.thumbnail_pass.take()]
            .into_iter()
            .flatten()
        {
            pass.token.cancel();
            pass.join();
        }
        self.pool.kill();
        debug!("prefetch cache shut down");
    }
}

impl Drop for PrefetchCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decode the window nearest-first, stopping at the first sign of
/// cancellation.
fn run_window_pass(shared: &Shared, items: &[Arc<Item>], token: &CancellationToken) {
    let counters = &shared.counters;
    for item in items {
        if token.is_cancelled() {
            bump(&counters.passes_cancelled);
            return;
        }
        if !item.needs_full() {
            continue;
        }

        item.slots().loading = true;
        trace!("decoding {}", item.id());
        let result = shared.materializer.load_full(item, token);

        let mut slots = item.slots();
        slots.loading = false;
        if token.is_cancelled() {
            drop(slots);
            bump(&counters.passes_cancelled);
            return;
        }
        match result {
            Ok(image) => {
                slots.full = ImageSlot::Ready(Arc::new(image));
                drop(slots);
                bump(&counters.items_decoded);
                shared.events.push(PassEvent::Loaded(item.clone()));
            }
            Err(LoadError::Cancelled) => {}
            Err(err) => {
                let reason = err.to_string();
                slots.full = ImageSlot::missing(reason.clone());
                drop(slots);
                warn!("failed to load {}: {reason}", item.id());
                shared.events.push(PassEvent::LoadFailed(item.clone(), reason));
            }
        }
    }
    bump(&counters.passes_completed);
}

fn dispatch_thumbnails(
    shared: &Arc<Shared>,
    pool: &WorkerPool,
    order: Vec<Arc<Item>>,
    token: &CancellationToken,
) {
    let mut submitted = 0usize;
    for item in order {
        if token.is_cancelled() {
            debug!("thumbnail pass cancelled after {submitted} submissions");
            return;
        }
        if !item.needs_thumbnail() {
            continue;
        }
        let task_shared = shared.clone();
        let task_token = token.clone();
        let handle = pool.submit(move || build_thumbnail(&task_shared, &item, &task_token));
        if handle.is_rejected() {
            debug!("thumbnail pool is stopping; dispatch abandoned");
            return;
        }
        submitted += 1;
    }
    debug!("queued {submitted} thumbnails");
}

fn build_thumbnail(shared: &Shared, item: &Arc<Item>, token: &CancellationToken) {
    if token.is_cancelled() || !item.needs_thumbnail() {
        return;
    }
    let result = match shared.materializer.load_thumbnail(item, token) {
        Ok(image) => Ok(image),
        Err(err) if err.is_cancelled() => return,
        Err(err) => {
            warn!("thumbnail for {} failed: {err}", item.id());
            Err(err.to_string())
        }
    };

    {
        let mut slots = item.slots();
        if token.is_cancelled() || !slots.thumbnail.is_empty() || slots.thumbnail_queued {
            return;
        }
        slots.thumbnail_queued = true;
    }
    shared.events.push(PassEvent::Thumbnail(item.clone(), result));
}
