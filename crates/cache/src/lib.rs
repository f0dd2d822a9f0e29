//! imgview cache library
//!
//! Keeps the images around the cursor of a sequentially browsed
//! collection decoded, and builds thumbnails for the rest in the
//! background.
//!
//! - [`Item`] / [`ItemSource`]: one entry, backed by a local file, an
//!   archive entry or a remote URL.
//! - [`Materializer`]: reads and decodes an item, downloading remote ones
//!   through an [`imgview_transfer::TransferEngine`].
//! - [`Sequence`] and [`CacheWindow`]: the ordered items, the cursor and
//!   the set of indices kept decoded.
//! - [`PrefetchCache`]: drives window and thumbnail passes and reports
//!   [`CacheEvent`]s when drained.

mod config;
mod decode;
mod error;
mod item;
mod materialize;
mod prefetch;
mod sequence;
mod window;

pub use config::CacheConfig;
pub use decode::{DecodedImage, Decoder, ImageDecoder};
pub use error::{ConfigError, DecodeError, LoadError};
pub use item::{ImageSlot, Item, ItemSource, ItemState, RemoteDescriptor};
pub use materialize::{
    is_supported_image, scan_directory, ArchiveReader, Materializer, SUPPORTED_EXTENSIONS,
};
pub use prefetch::{CacheEvent, PrefetchCache, PrefetchStats};
pub use sequence::{Sequence, SequenceChange};
pub use window::{nearest_first, CacheWindow};
