//! Items of the browsable sequence and their image slots.

use crate::DecodedImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where a remote item's bytes come from and where they are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub fetch_url: String,
    /// Smaller rendition used for thumbnails, if the server offers one
    pub thumbnail_url: Option<String>,
    /// Local file the full download is persisted to and reused from
    pub destination: Option<PathBuf>,
}

impl RemoteDescriptor {
    pub fn new(fetch_url: impl Into<String>) -> Self {
        Self {
            fetch_url: fetch_url.into(),
            thumbnail_url: None,
            destination: None,
        }
    }

    pub fn with_thumbnail_url(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    pub fn with_destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }
}

/// The backing store of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    LocalPath(PathBuf),
    ArchiveEntry { archive: PathBuf, entry: String },
    Remote(RemoteDescriptor),
}

impl ItemSource {
    fn identity(&self) -> String {
        match self {
            Self::LocalPath(path) => path.display().to_string(),
            Self::ArchiveEntry { archive, entry } => format!("{}!{entry}", archive.display()),
            Self::Remote(remote) => remote.fetch_url.clone(),
        }
    }
}

/// Contents of a full-image or thumbnail slot.
#[derive(Debug, Clone, Default)]
pub enum ImageSlot {
    #[default]
    Empty,
    Ready(Arc<DecodedImage>),
    /// Loading failed; `placeholder` is shown instead.
    Missing {
        reason: String,
        placeholder: Arc<DecodedImage>,
    },
}

impl ImageSlot {
    pub(crate) fn missing(reason: impl Into<String>) -> Self {
        Self::Missing {
            reason: reason.into(),
            placeholder: Arc::new(DecodedImage::placeholder()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The pixels to display: the image itself or its placeholder.
    pub fn image(&self) -> Option<&Arc<DecodedImage>> {
        match self {
            Self::Empty => None,
            Self::Ready(image) => Some(image),
            Self::Missing { placeholder, .. } => Some(placeholder),
        }
    }
}

/// Coarse state of an item's full image, for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Idle,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Default)]
pub(crate) struct Slots {
    pub(crate) full: ImageSlot,
    pub(crate) thumbnail: ImageSlot,
    pub(crate) loading: bool,
    /// A thumbnail result is waiting in the cache's result queue.
    pub(crate) thumbnail_queued: bool,
}

/// One element of the sequence.
///
/// Items are shared as `Arc<Item>` between the owning thread and the
/// background passes. Slots are only written by the pass currently
/// materializing the item, under the item's lock.
#[derive(Debug)]
pub struct Item {
    id: String,
    source: ItemSource,
    slots: Mutex<Slots>,
}

impl Item {
    pub fn new(source: ItemSource) -> Self {
        Self::with_id(source.identity(), source)
    }

    pub fn with_id(id: impl Into<String>, source: ItemSource) -> Self {
        Self {
            id: id.into(),
            source,
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn local(path: impl AsRef<Path>) -> Self {
        Self::new(ItemSource::LocalPath(path.as_ref().to_path_buf()))
    }

    pub fn remote(remote: RemoteDescriptor) -> Self {
        Self::new(ItemSource::Remote(remote))
    }

    /// Stable identity: path, `archive!entry`, or fetch URL.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &ItemSource {
        &self.source
    }

    pub(crate) fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn full(&self) -> ImageSlot {
        self.slots().full.clone()
    }

    pub fn thumbnail(&self) -> ImageSlot {
        self.slots().thumbnail.clone()
    }

    pub fn state(&self) -> ItemState {
        let slots = self.slots();
        if slots.loading {
            return ItemState::Loading;
        }
        match slots.full {
            ImageSlot::Empty => ItemState::Idle,
            ImageSlot::Ready(_) => ItemState::Ready,
            ImageSlot::Missing { .. } => ItemState::Failed,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.slots().loading
    }

    pub(crate) fn needs_full(&self) -> bool {
        self.slots().full.is_empty()
    }

    pub(crate) fn needs_thumbnail(&self) -> bool {
        let slots = self.slots();
        slots.thumbnail.is_empty() && !slots.thumbnail_queued
    }

    /// Drop the full image. Returns `true` if anything was resident.
    pub(crate) fn evict_full(&self) -> bool {
        let mut slots = self.slots();
        !std::mem::take(&mut slots.full).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_per_source() {
        assert_eq!(Item::local("/pics/a.png").id(), "/pics/a.png");
        let entry = Item::new(ItemSource::ArchiveEntry {
            archive: PathBuf::from("/pics/set.zip"),
            entry: "001.jpg".into(),
        });
        assert_eq!(entry.id(), "/pics/set.zip!001.jpg");
        let remote = Item::remote(RemoteDescriptor::new("https://host/img/1.jpg"));
        assert_eq!(remote.id(), "https://host/img/1.jpg");
    }

    #[test]
    fn test_state_transitions() {
        let item = Item::local("a.png");
        assert_eq!(item.state(), ItemState::Idle);
        assert!(item.needs_full());

        item.slots().loading = true;
        assert_eq!(item.state(), ItemState::Loading);
        assert!(item.is_loading());

        {
            let mut slots = item.slots();
            slots.loading = false;
            slots.full = ImageSlot::missing("corrupt");
        }
        assert_eq!(item.state(), ItemState::Failed);
        assert!(item.full().image().is_some());

        assert!(item.evict_full());
        assert!(!item.evict_full());
        assert_eq!(item.state(), ItemState::Idle);
    }

    #[test]
    fn test_eviction_keeps_thumbnail() {
        let item = Item::local("a.png");
        {
            let mut slots = item.slots();
            slots.full = ImageSlot::Ready(Arc::new(DecodedImage::placeholder()));
            slots.thumbnail = ImageSlot::Ready(Arc::new(DecodedImage::placeholder()));
        }
        assert!(item.evict_full());
        assert!(item.full().is_empty());
        assert!(item.thumbnail().is_ready());
        assert!(!item.needs_thumbnail());
    }

    #[test]
    fn test_queued_thumbnail_is_not_requested_again() {
        let item = Item::local("a.png");
        assert!(item.needs_thumbnail());
        item.slots().thumbnail_queued = true;
        assert!(!item.needs_thumbnail());
    }

    #[test]
    fn test_remote_descriptor_builder() {
        let remote = RemoteDescriptor::new("https://host/full.jpg")
            .with_thumbnail_url("https://host/thumb.jpg")
            .with_destination("/tmp/full.jpg");
        assert_eq!(remote.thumbnail_url.as_deref(), Some("https://host/thumb.jpg"));
        assert_eq!(remote.destination, Some(PathBuf::from("/tmp/full.jpg")));
    }
}
