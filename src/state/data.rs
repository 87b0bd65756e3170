//! Shared data structures for the feed
//!
//! These structs represent the data model that flows between
//! the content store, the loader and the feed adapter.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifier of an asset in the content store
pub type AssetId = i64;

/// Sentinel id carried by the live preview pseudo-asset
pub const PREVIEW_ID: AssetId = -1;

/// Clockwise rotation in right-angle steps
///
/// Photos store this as their orientation column, videos report it
/// through their container metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Map a degree value onto a right-angle rotation.
    ///
    /// Values are normalized modulo 360 first, so `-90` becomes `Cw270`.
    /// Anything that is not a multiple of 90 yields `None`.
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Quarter turns swap the width and height of the content
    #[inline]
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }

    /// Get the dimensions of content with this rotation applied
    pub fn apply_to(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

/// The closed set of things a feed slot can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// The live capture surface pinned to slot 0
    Preview,
    Photo,
    Video,
}

/// Kind-specific payload of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetDetail {
    Preview,
    /// Photos keep their stored orientation; it is applied to the raster
    /// after decoding
    Photo { orientation: Rotation },
    /// Video rotation is folded into the dimensions and not retained
    Video,
}

/// One row as returned by the content store, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetRow {
    pub id: AssetId,
    pub title: String,
    pub mime_type: String,
    pub date_taken: i64,
    pub date_modified: i64,
    pub path: String,
    /// Raw width as stored, may be zero or negative when unknown
    pub width: i64,
    /// Raw height as stored, may be zero or negative when unknown
    pub height: i64,
    /// Stored orientation in degrees (photos only, 0 for videos)
    pub orientation: i64,
}

/// Normalized, immutable representation of one feed entry
///
/// `width` and `height` are post-orientation: a portrait photo shot on a
/// landscape sensor reports its portrait dimensions here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    id: AssetId,
    title: String,
    mime_type: String,
    date_taken: i64,
    date_modified: i64,
    path: PathBuf,
    width: u32,
    height: u32,
    detail: AssetDetail,
}

impl AssetRecord {
    /// Build the live preview pseudo-asset with the surface dimensions
    pub fn preview(width: u32, height: u32) -> Self {
        Self {
            id: PREVIEW_ID,
            title: String::new(),
            mime_type: String::new(),
            date_taken: 0,
            date_modified: 0,
            path: PathBuf::new(),
            width,
            height,
            detail: AssetDetail::Preview,
        }
    }

    /// Build a photo record from a row and its raw (pre-orientation) dimensions
    pub fn photo(row: &AssetRow, raw_width: u32, raw_height: u32, orientation: Rotation) -> Self {
        let (width, height) = orientation.apply_to(raw_width, raw_height);
        Self::from_row(row, width, height, AssetDetail::Photo { orientation })
    }

    /// Build a video record, folding the container rotation into the dimensions
    pub fn video(row: &AssetRow, raw_width: u32, raw_height: u32, rotation: Rotation) -> Self {
        let (width, height) = rotation.apply_to(raw_width, raw_height);
        Self::from_row(row, width, height, AssetDetail::Video)
    }

    fn from_row(row: &AssetRow, width: u32, height: u32, detail: AssetDetail) -> Self {
        Self {
            id: row.id,
            title: row.title.clone(),
            mime_type: row.mime_type.clone(),
            date_taken: row.date_taken,
            date_modified: row.date_modified,
            path: PathBuf::from(&row.path),
            width,
            height,
            detail,
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn date_taken(&self) -> i64 {
        self.date_taken
    }

    pub fn date_modified(&self) -> i64 {
        self.date_modified
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Post-orientation (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn detail(&self) -> &AssetDetail {
        &self.detail
    }

    pub fn kind(&self) -> AssetKind {
        match self.detail {
            AssetDetail::Preview => AssetKind::Preview,
            AssetDetail::Photo { .. } => AssetKind::Photo,
            AssetDetail::Video => AssetKind::Video,
        }
    }

    pub fn is_preview(&self) -> bool {
        self.kind() == AssetKind::Preview
    }

    /// Position of `self` relative to `other` in the feed.
    ///
    /// Newest first: `date_taken` descending, then `date_modified`
    /// descending, then `title` descending, then `id` descending.
    /// `Ordering::Less` means `self` is shown before `other`.
    pub fn feed_order(&self, other: &Self) -> Ordering {
        other
            .date_taken
            .cmp(&self.date_taken)
            .then_with(|| other.date_modified.cmp(&self.date_modified))
            .then_with(|| other.title.cmp(&self.title))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl fmt::Display for AssetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            AssetDetail::Preview => write!(f, "preview {}x{}", self.width, self.height),
            AssetDetail::Photo { orientation } => write!(
                f,
                "photo #{} {} ({}, {}x{}, orientation={}, taken={})",
                self.id,
                self.path.display(),
                self.mime_type,
                self.width,
                self.height,
                orientation.degrees(),
                self.date_taken
            ),
            AssetDetail::Video => write!(
                f,
                "video #{} {} ({}, {}x{}, taken={})",
                self.id,
                self.path.display(),
                self.mime_type,
                self.width,
                self.height,
                self.date_taken
            ),
        }
    }
}

/// Sort records into feed order (stable)
pub fn sort_feed(records: &mut [AssetRecord]) {
    records.sort_by(AssetRecord::feed_order);
}
