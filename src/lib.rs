//! Chronological photo and video filmstrip over a local media catalog.
//!
//! The [`state::feed::FeedAdapter`] owns the feed. It asks the
//! [`state::loader::LibraryLoader`] for a background scan of the catalog,
//! merges the result around an optional live preview slot, and hands out
//! views whose rasters the [`decode`] engine fills in off the owning task.

pub mod config;
pub mod decode;
pub mod error;
pub mod export;
pub mod state;

pub use config::FeedConfig;
pub use decode::{Raster, Renderer, SizeHint, WorkerPool};
pub use error::{ConfigError, DecodeError, ExportError, LibraryError};
pub use state::data::{AssetDetail, AssetKind, AssetRecord, Rotation};
pub use state::feed::{FeedAdapter, FeedChange, FeedListener, UpdateReport, ViewHandle, Visual};
pub use state::library::{AssetSource, Catalog, CatalogSource, MediaTable};
pub use state::loader::LibraryLoader;
