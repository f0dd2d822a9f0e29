//! `imgview browse`: drive a [`PrefetchCache`] over a directory.

use crate::watch::{DirChange, DirWatcher};
use crate::{load_config, BrowseArgs};
use anyhow::{Context, Result};
use imgview_cache::{
    scan_directory, CacheEvent, ImageDecoder, Item, Materializer, PrefetchCache, SequenceChange,
};
use log::info;
use serde::Serialize;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Line<'a> {
    Window {
        cursor: Option<usize>,
        indices: &'a [usize],
    },
    Loaded {
        index: usize,
        id: &'a str,
    },
    Failed {
        index: usize,
        id: &'a str,
        reason: &'a str,
    },
    Thumbnail {
        index: usize,
    },
    ThumbnailFailed {
        index: usize,
        reason: &'a str,
    },
    Added {
        path: String,
    },
    Removed {
        path: String,
    },
    Summary(Summary),
}

#[derive(Debug, Serialize)]
struct Summary {
    items: usize,
    cursor: Option<usize>,
    resident: Vec<usize>,
    thumbnails: usize,
    passes_started: u64,
    passes_completed: u64,
    passes_cancelled: u64,
    items_decoded: u64,
    evictions: u64,
}

struct Reporter {
    json: bool,
}

impl Reporter {
    fn emit(&self, line: &Line<'_>) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(line)?);
            return Ok(());
        }
        match line {
            Line::Window { cursor, indices } => match cursor {
                Some(cursor) => println!("window  cursor={cursor} {indices:?}"),
                None => println!("window  empty"),
            },
            Line::Loaded { index, id } => println!("loaded  #{index} {id}"),
            Line::Failed { index, id, reason } => println!("failed  #{index} {id}: {reason}"),
            Line::Thumbnail { index } => println!("thumb   #{index}"),
            Line::ThumbnailFailed { index, reason } => println!("thumb   #{index} failed: {reason}"),
            Line::Added { path } => println!("added   {path}"),
            Line::Removed { path } => println!("removed {path}"),
            Line::Summary(summary) => {
                println!(
                    "summary {} items, cursor {:?}, resident {:?}, {} thumbnails",
                    summary.items, summary.cursor, summary.resident, summary.thumbnails
                );
                println!(
                    "        passes {} started / {} completed / {} cancelled, {} decoded, {} evicted",
                    summary.passes_started,
                    summary.passes_completed,
                    summary.passes_cancelled,
                    summary.items_decoded,
                    summary.evictions
                );
            }
        }
        Ok(())
    }

    fn events(&self, cache: &PrefetchCache, events: Vec<CacheEvent>) -> Result<()> {
        let id = |index: usize| cache.get(index).map(|item| item.id()).unwrap_or("?");
        for event in &events {
            let line = match event {
                CacheEvent::WindowChanged { cursor, indices } => Line::Window {
                    cursor: *cursor,
                    indices,
                },
                CacheEvent::ItemLoaded { index } => Line::Loaded {
                    index: *index,
                    id: id(*index),
                },
                CacheEvent::ItemFailed { index, reason } => Line::Failed {
                    index: *index,
                    id: id(*index),
                    reason,
                },
                CacheEvent::ThumbnailReady { index } => Line::Thumbnail { index: *index },
                CacheEvent::ThumbnailFailed { index, reason } => Line::ThumbnailFailed {
                    index: *index,
                    reason,
                },
            };
            self.emit(&line)?;
        }
        Ok(())
    }
}

pub(crate) fn run_browse(args: BrowseArgs) -> Result<()> {
    if !args.dir.is_dir() {
        anyhow::bail!("not a directory: {}", args.dir.display());
    }
    let dir = args
        .dir
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", args.dir.display()))?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(radius) = args.radius {
        config.cache_radius = radius;
    }

    let items = scan_directory(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
    info!("browsing {} images in {}", items.len(), dir.display());

    let watcher = if args.watch {
        Some(DirWatcher::new(&dir).context("failed to watch directory")?)
    } else {
        None
    };
    let reporter = Reporter { json: args.json };
    let dwell = Duration::from_millis(args.dwell);

    let mut cache = PrefetchCache::new(config, Materializer::new(ImageDecoder));
    cache.replace_sequence(items);
    settle(&mut cache, &reporter, watcher.as_ref(), dwell)?;

    for _ in 0..args.steps {
        let next = cache.cursor().map_or(0, |cursor| cursor + 1);
        if next >= cache.len() {
            break;
        }
        cache.set_cursor(next);
        settle(&mut cache, &reporter, watcher.as_ref(), dwell)?;
    }

    reporter.emit(&Line::Summary(summarize(&cache)))?;
    cache.shutdown();
    Ok(())
}

/// Report events until background work is done and `dwell` has passed.
fn settle(
    cache: &mut PrefetchCache,
    reporter: &Reporter,
    watcher: Option<&DirWatcher>,
    dwell: Duration,
) -> Result<()> {
    let started = Instant::now();
    loop {
        if let Some(watcher) = watcher {
            for change in watcher.changes() {
                apply_change(cache, reporter, change)?;
            }
        }
        let events = cache.process_pending();
        let drained = events.is_empty();
        reporter.events(cache, events)?;
        if drained && !cache.is_busy() && started.elapsed() >= dwell {
            return Ok(());
        }
        thread::sleep(POLL);
    }
}

fn apply_change(cache: &mut PrefetchCache, reporter: &Reporter, change: DirChange) -> Result<()> {
    let position = |path: &Path| {
        let id = path.display().to_string();
        cache
            .sequence()
            .items()
            .iter()
            .position(|item| item.id() == id)
    };
    match change {
        DirChange::Added(path) => {
            if position(&path).is_some() || !path.is_file() {
                return Ok(());
            }
            let index = cache
                .sequence()
                .items()
                .iter()
                .position(|item| Path::new(item.id()).file_name() > path.file_name())
                .unwrap_or(cache.len());
            reporter.emit(&Line::Added {
                path: path.display().to_string(),
            })?;
            cache.apply(SequenceChange::Insert {
                index,
                item: Item::local(&path),
            });
        }
        DirChange::Removed(path) => {
            if let Some(index) = position(&path) {
                reporter.emit(&Line::Removed {
                    path: path.display().to_string(),
                })?;
                cache.apply(SequenceChange::Remove { index });
            }
        }
    }
    Ok(())
}

fn summarize(cache: &PrefetchCache) -> Summary {
    let items = cache.sequence().items();
    let stats = cache.stats();
    Summary {
        items: items.len(),
        cursor: cache.cursor(),
        resident: items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.full().is_ready())
            .map(|(index, _)| index)
            .collect(),
        thumbnails: items
            .iter()
            .filter(|item| item.thumbnail().is_ready())
            .count(),
        passes_started: stats.window_passes_started,
        passes_completed: stats.window_passes_completed,
        passes_cancelled: stats.window_passes_cancelled,
        items_decoded: stats.items_decoded,
        evictions: stats.evictions,
    }
}
