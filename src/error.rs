//! Error types shared across the crate
//!
//! Each layer gets its own enum so callers can tell a broken catalog apart
//! from a corrupt photo. Background tasks never propagate these into the
//! feed; they log and give up on the single item.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the content store and the directory indexer
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The SQLite catalog rejected a statement
    #[error("catalog error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Filesystem access failed while opening or indexing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The directory to index does not exist or is not a directory
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

/// Errors raised while reading dimensions or decoding rasters
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The source file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The `image` crate failed to decode the data
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    /// The JPEG decoder failed
    #[error("JPEG decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),

    /// A decode produced a raster with zero width or height
    #[error("decoded raster is empty: {}", .0.display())]
    Empty(PathBuf),

    /// Video metadata extraction failed
    #[error("media probe failed for {}: {reason}", .path.display())]
    Probe { path: PathBuf, reason: String },
}

/// Errors raised by the print/export utility
#[derive(Debug, Error)]
pub enum ExportError {
    /// Writing the document failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the page image failed
    #[error("image encode failed: {0}")]
    Encode(#[from] image::ImageError),

    /// The page or raster has no drawable area
    #[error("invalid geometry: {0}")]
    Geometry(String),
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value the feed cannot work with
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
