use imgview_cache::{
    CacheConfig, CacheEvent, DecodeError, DecodedImage, Decoder, ImageSlot, Item, ItemState,
    Materializer, PrefetchCache, SequenceChange,
};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Decoder over files whose content is their own name. Content `bad`
/// fails to decode. Full decodes can be held at a gate; thumbnail
/// decodes take `thumb_delay`.
#[derive(Default)]
struct Probe {
    full: Mutex<Vec<String>>,
    thumbs: Mutex<Vec<String>>,
    thumb_delay: Duration,
    gate_closed: Mutex<bool>,
    gate: Condvar,
}

impl Probe {
    fn full_decodes(&self) -> Vec<String> {
        self.full.lock().unwrap().clone()
    }

    fn thumbnail_decodes(&self) -> Vec<String> {
        self.thumbs.lock().unwrap().clone()
    }

    fn thumbnail_decodes_of(&self, prefix: &str) -> Vec<String> {
        self.thumbnail_decodes()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect()
    }

    fn close_gate(&self) {
        *self.gate_closed.lock().unwrap() = true;
    }

    fn open_gate(&self) {
        *self.gate_closed.lock().unwrap() = false;
        self.gate.notify_all();
    }

    fn decode(bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        if bytes == b"bad" {
            return Err(DecodeError::Image("corrupt".into()));
        }
        Ok(DecodedImage::new(1, 1, vec![bytes[0], 0, 0, 255]))
    }
}

struct ProbeDecoder(Arc<Probe>);

impl Decoder for ProbeDecoder {
    fn decode_full(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        self.0
            .full
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(bytes).into_owned());
        let mut closed = self.0.gate_closed.lock().unwrap();
        while *closed {
            closed = self.0.gate.wait(closed).unwrap();
        }
        drop(closed);
        Probe::decode(bytes)
    }

    fn decode_thumbnail(&self, bytes: &[u8], _max_edge: u32) -> Result<DecodedImage, DecodeError> {
        self.0
            .thumbs
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(bytes).into_owned());
        thread::sleep(self.0.thumb_delay);
        Probe::decode(bytes)
    }
}

fn write_items(dir: &Path, names: &[&str]) -> Vec<Item> {
    names.iter().map(|name| item(dir, name)).collect()
}

fn item(dir: &Path, name: &str) -> Item {
    let path = dir.join(name);
    fs::write(&path, name).unwrap();
    Item::local(path)
}

fn cache_with(radius: usize) -> (PrefetchCache, Arc<Probe>) {
    let config = CacheConfig::default()
        .with_cache_radius(radius)
        .with_thumbnail_workers(2);
    cache_with_probe(config, Probe::default())
}

fn cache_with_probe(config: CacheConfig, probe: Probe) -> (PrefetchCache, Arc<Probe>) {
    let probe = Arc::new(probe);
    let cache = PrefetchCache::new(config, Materializer::new(ProbeDecoder(probe.clone())));
    (cache, probe)
}

fn named_items(dir: &Path, prefix: &str, count: usize) -> Vec<Item> {
    (0..count)
        .map(|i| item(dir, &format!("{prefix}{i}")))
        .collect()
}

/// Drain until every pass and thumbnail task has finished.
fn settle(cache: &mut PrefetchCache) -> Vec<CacheEvent> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = Vec::new();
    loop {
        events.extend(cache.process_pending());
        if !cache.is_busy() {
            events.extend(cache.process_pending());
            return events;
        }
        assert!(Instant::now() < deadline, "cache did not settle");
        thread::sleep(Duration::from_millis(5));
    }
}

fn resident(cache: &PrefetchCache) -> Vec<usize> {
    (0..cache.len())
        .filter(|&i| cache.get(i).unwrap().full().is_ready())
        .collect()
}

fn loaded(events: &[CacheEvent]) -> Vec<usize> {
    let mut indices: Vec<usize> = events
        .iter()
        .filter_map(|event| match event {
            CacheEvent::ItemLoaded { index } => Some(*index),
            _ => None,
        })
        .collect();
    indices.sort_unstable();
    indices
}

fn thumbnails_ready(events: &[CacheEvent]) -> Vec<usize> {
    let mut indices: Vec<usize> = events
        .iter()
        .filter_map(|event| match event {
            CacheEvent::ThumbnailReady { index } => Some(*index),
            _ => None,
        })
        .collect();
    indices.sort_unstable();
    indices
}

#[test]
fn test_window_follows_cursor_and_evicts() {
    let dir = TempDir::new().unwrap();
    let (mut cache, probe) = cache_with(1);

    cache.replace_sequence(write_items(dir.path(), &["A", "B", "C", "D", "E"]));
    let events = settle(&mut cache);
    assert_eq!(
        events.first(),
        Some(&CacheEvent::WindowChanged {
            cursor: Some(0),
            indices: vec![0, 1, 2],
        })
    );
    assert_eq!(resident(&cache), [0, 1, 2]);
    assert_eq!(loaded(&events), [0, 1, 2]);
    assert_eq!(thumbnails_ready(&events), [0, 1, 2, 3, 4]);
    assert_eq!(probe.full_decodes(), ["A", "B", "C"]);

    cache.set_cursor(2);
    assert_eq!(cache.window().indices(), &[2, 1, 3]);
    let a = cache.get(0).unwrap().clone();
    assert!(a.full().is_empty());
    assert!(a.thumbnail().is_ready());

    let events = settle(&mut cache);
    assert_eq!(resident(&cache), [1, 2, 3]);
    assert_eq!(loaded(&events), [3]);

    cache.set_cursor(4);
    assert_eq!(cache.window().indices(), &[4, 3, 2]);
    settle(&mut cache);
    assert_eq!(resident(&cache), [2, 3, 4]);
    assert_eq!(probe.full_decodes(), ["A", "B", "C", "D", "E"]);
    assert!(cache.get(1).unwrap().thumbnail().is_ready());

    let stats = cache.stats();
    assert_eq!(stats.window_passes_started, 3);
    assert_eq!(stats.window_passes_completed, 3);
    assert_eq!(stats.items_decoded, 5);
    assert_eq!(stats.evictions, 2);
    assert_eq!(stats.thumbnails_built, 5);
}

#[test]
fn test_window_pass_decodes_nearest_first() {
    let dir = TempDir::new().unwrap();
    let (mut cache, probe) = cache_with(2);

    let names = ["0", "1", "2", "3", "4", "5", "6", "7", "8"];
    cache.replace_sequence(write_items(dir.path(), &names));
    settle(&mut cache);

    cache.set_cursor(8);
    settle(&mut cache);
    let decodes = probe.full_decodes();
    // 4 was already resident
    assert_eq!(&decodes[5..], ["8", "7", "6", "5"]);
}

#[test]
fn test_rapid_cursor_moves_leave_no_stale_buffers() {
    let dir = TempDir::new().unwrap();
    let (mut cache, probe) = cache_with(1);
    let names = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

    probe.close_gate();
    cache.replace_sequence(write_items(dir.path(), &names));
    let deadline = Instant::now() + Duration::from_secs(5);
    while probe.full_decodes().is_empty() {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(2));
    }

    cache.set_cursor(5);
    cache.set_cursor(8);
    probe.open_gate();
    let events = settle(&mut cache);

    let stats = cache.stats();
    assert_eq!(stats.window_passes_started, 3);
    assert_eq!(stats.window_passes_completed, 1);
    assert_eq!(stats.window_passes_cancelled, 2);

    assert_eq!(resident(&cache), [7, 8, 9]);
    assert_eq!(loaded(&events), [7, 8, 9]);
    assert_eq!(probe.full_decodes(), ["0", "8", "7", "9"]);
    assert_eq!(cache.get(0).unwrap().state(), ItemState::Idle);
}

#[test]
fn test_failed_item_gets_placeholder() {
    let dir = TempDir::new().unwrap();
    let (mut cache, _probe) = cache_with(1);

    cache.replace_sequence(write_items(dir.path(), &["A", "bad", "C"]));
    let events = settle(&mut cache);

    assert_eq!(loaded(&events), [0, 2]);
    let failed = events.iter().find_map(|event| match event {
        CacheEvent::ItemFailed { index, reason } => Some((*index, reason.clone())),
        _ => None,
    });
    let (index, reason) = failed.unwrap();
    assert_eq!(index, 1);
    assert!(reason.contains("corrupt"));
    assert!(events
        .iter()
        .any(|event| matches!(event, CacheEvent::ThumbnailFailed { index: 1, .. })));

    let bad = cache.get(1).unwrap();
    assert_eq!(bad.state(), ItemState::Failed);
    match bad.full() {
        ImageSlot::Missing { placeholder, .. } => assert_eq!(placeholder.width(), 16),
        other => panic!("expected placeholder, got {other:?}"),
    }
    assert!(bad.thumbnail().image().is_some());
}

#[test]
fn test_sequence_changes_evict_by_identity() {
    let dir = TempDir::new().unwrap();
    let (mut cache, _probe) = cache_with(1);

    cache.replace_sequence(write_items(dir.path(), &["0", "1", "2", "3", "4", "5"]));
    settle(&mut cache);
    assert_eq!(resident(&cache), [0, 1, 2]);

    cache.apply(SequenceChange::Remove { index: 0 });
    assert_eq!(cache.cursor(), Some(0));
    assert_eq!(cache.get(0).unwrap().id(), dir.path().join("1").display().to_string());
    settle(&mut cache);
    assert_eq!(resident(&cache), [0, 1, 2]);

    let third = cache.get(2).unwrap().clone();
    cache.apply(SequenceChange::Insert {
        index: 0,
        item: item(dir.path(), "new"),
    });
    assert_eq!(cache.cursor(), Some(1));
    assert_eq!(cache.window().indices(), &[1, 0, 2]);
    assert!(third.full().is_empty());

    let events = settle(&mut cache);
    assert_eq!(resident(&cache), [0, 1, 2]);
    assert_eq!(loaded(&events), [0]);
    assert_eq!(thumbnails_ready(&events), [0]);
}

#[test]
fn test_shutdown_is_idempotent_and_final() {
    let dir = TempDir::new().unwrap();
    let (mut cache, _probe) = cache_with(1);

    cache.replace_sequence(write_items(dir.path(), &["A", "B", "C", "D"]));
    cache.shutdown();
    assert!(!cache.is_busy());

    cache.set_cursor(3);
    assert_eq!(cache.cursor(), Some(0));
    cache.shutdown();
}

#[test]
fn test_replaced_thumbnail_pass_stops_before_next_starts() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::default()
        .with_cache_radius(1)
        .with_thumbnail_workers(4);
    let (mut cache, probe) = cache_with_probe(
        config,
        Probe {
            thumb_delay: Duration::from_millis(20),
            ..Probe::default()
        },
    );

    cache.replace_sequence(named_items(dir.path(), "old", 100));
    let deadline = Instant::now() + Duration::from_secs(5);
    while probe.thumbnail_decodes().len() < 10 {
        assert!(Instant::now() < deadline, "thumbnails never started");
        thread::sleep(Duration::from_millis(2));
    }

    cache.replace_sequence(named_items(dir.path(), "new", 20));
    let old_at_replace = probe.thumbnail_decodes_of("old").len();
    let events = settle(&mut cache);

    // At most one more old decode per worker can slip in before the kill.
    let old_final = probe.thumbnail_decodes_of("old").len();
    assert!(old_final <= old_at_replace + 4, "{old_at_replace} -> {old_final}");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(probe.thumbnail_decodes_of("old").len(), old_final);

    assert_eq!(probe.thumbnail_decodes_of("new").len(), 20);
    assert_eq!(thumbnails_ready(&events), (0..20).collect::<Vec<_>>());
    assert!((0..20).all(|i| cache.get(i).unwrap().thumbnail().is_ready()));
}

#[test]
fn test_thumbnails_are_built_nearest_first() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::default()
        .with_cache_radius(1)
        .with_thumbnail_workers(1);
    let (mut cache, probe) = cache_with_probe(config, Probe::default());

    cache.replace_sequence(named_items(dir.path(), "a", 7));
    settle(&mut cache);
    cache.set_cursor(3);
    settle(&mut cache);

    cache.apply(SequenceChange::Replace(named_items(dir.path(), "b", 7)));
    assert_eq!(cache.cursor(), Some(3));
    settle(&mut cache);

    assert_eq!(
        probe.thumbnail_decodes_of("b"),
        ["b3", "b2", "b4", "b1", "b5", "b0", "b6"]
    );
}
