//! Producing pixels for an item from its source.

use crate::{DecodedImage, Decoder, Item, ItemSource, LoadError, RemoteDescriptor};
use imgview_scheduler::CancellationToken;
use imgview_transfer::{EngineError, TransferEngine, TransferError, TransferOutcome};
use log::{debug, warn};
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Extensions [`scan_directory`] picks up, lower case.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff", "ico", "tga", "qoi",
];

/// Reads one entry out of an archive. Formats are the embedder's concern.
pub trait ArchiveReader: Send + Sync {
    fn read_entry(&self, archive: &Path, entry: &str) -> io::Result<Vec<u8>>;
}

enum Bytes {
    Owned(Vec<u8>),
    Shared(Arc<[u8]>),
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Bytes::Owned(bytes) => bytes,
            Bytes::Shared(bytes) => bytes,
        }
    }
}

#[derive(Clone, Copy)]
enum Rendition {
    Full,
    Thumbnail,
}

/// Loads items synchronously for the background passes.
///
/// Local files are read and decoded in place, archive entries go through
/// the configured [`ArchiveReader`], and remote items are downloaded with
/// the shared [`TransferEngine`] unless a previous download is already on
/// disk.
pub struct Materializer {
    decoder: Arc<dyn Decoder>,
    archive: Option<Arc<dyn ArchiveReader>>,
    engine: Option<Arc<TransferEngine>>,
    thumbnail_edge: u32,
    transfer_poll: Duration,
}

impl Materializer {
    pub fn new(decoder: impl Decoder + 'static) -> Self {
        Self {
            decoder: Arc::new(decoder),
            archive: None,
            engine: None,
            thumbnail_edge: 256,
            transfer_poll: Duration::from_millis(50),
        }
    }

    pub fn with_archive_reader(mut self, reader: impl ArchiveReader + 'static) -> Self {
        self.archive = Some(Arc::new(reader));
        self
    }

    pub fn with_engine(mut self, engine: Arc<TransferEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_thumbnail_edge(mut self, edge: u32) -> Self {
        self.thumbnail_edge = edge.max(1);
        self
    }

    /// How often a cooperative download wait re-checks its token.
    pub fn with_transfer_poll(mut self, interval: Duration) -> Self {
        self.transfer_poll = interval.max(Duration::from_millis(1));
        self
    }

    pub fn thumbnail_edge(&self) -> u32 {
        self.thumbnail_edge
    }

    pub fn load_full(&self, item: &Item, token: &CancellationToken) -> Result<DecodedImage, LoadError> {
        let bytes = self.read(item.source(), Rendition::Full, token)?;
        if token.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        Ok(self.decoder.decode_full(&bytes)?)
    }

    pub fn load_thumbnail(
        &self,
        item: &Item,
        token: &CancellationToken,
    ) -> Result<DecodedImage, LoadError> {
        let bytes = self.read(item.source(), Rendition::Thumbnail, token)?;
        if token.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        Ok(self.decoder.decode_thumbnail(&bytes, self.thumbnail_edge)?)
    }

    fn read(
        &self,
        source: &ItemSource,
        rendition: Rendition,
        token: &CancellationToken,
    ) -> Result<Bytes, LoadError> {
        if token.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        match source {
            ItemSource::LocalPath(path) => Ok(Bytes::Owned(fs::read(path)?)),
            ItemSource::ArchiveEntry { archive, entry } => {
                let reader = self.archive.as_ref().ok_or_else(|| {
                    LoadError::Unsupported(format!("no archive reader for {}", archive.display()))
                })?;
                Ok(Bytes::Owned(reader.read_entry(archive, entry)?))
            }
            ItemSource::Remote(remote) => self.read_remote(remote, rendition, token),
        }
    }

    fn read_remote(
        &self,
        remote: &RemoteDescriptor,
        rendition: Rendition,
        token: &CancellationToken,
    ) -> Result<Bytes, LoadError> {
        if let Some(path) = remote.destination.as_deref().filter(|p| p.is_file()) {
            return Ok(Bytes::Owned(fs::read(path)?));
        }
        if let (Rendition::Thumbnail, Some(url)) = (rendition, &remote.thumbnail_url) {
            return self.download(url, token).map(Bytes::Shared);
        }

        let bytes = self.download(&remote.fetch_url, token)?;
        if let Some(path) = &remote.destination {
            if let Err(err) = persist(path, &bytes) {
                warn!("could not save {} to {}: {err}", remote.fetch_url, path.display());
            }
        }
        Ok(Bytes::Shared(bytes))
    }

    /// Fetch `url` through the engine, polling `token` while waiting.
    fn download(&self, url: &str, token: &CancellationToken) -> Result<Arc<[u8]>, LoadError> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| LoadError::Unsupported(format!("no transfer engine for {url}")))?;
        let transfer = engine.fetch(url).map_err(|err| match err {
            EngineError::ShutDown => LoadError::Cancelled,
            other => LoadError::Network(TransferError::Request(other.to_string())),
        })?;
        debug!("downloading {url}");

        loop {
            if token.is_cancelled() {
                transfer.cancel();
                return Err(LoadError::Cancelled);
            }
            match transfer.wait_timeout(self.transfer_poll) {
                None => continue,
                Some(TransferOutcome::Completed(bytes)) => return Ok(bytes),
                Some(TransferOutcome::Cancelled) => return Err(LoadError::Cancelled),
                Some(TransferOutcome::Failed(err)) => return Err(err.into()),
            }
        }
    }
}

fn persist(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

/// True if `path` has one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Local items for every supported image directly inside `dir`, sorted by
/// file name.
pub fn scan_directory(dir: &Path) -> io::Result<Vec<Item>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image(&path) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths.into_iter().map(Item::local).collect())
}
