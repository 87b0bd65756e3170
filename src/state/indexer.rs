//! Directory import into the content store
//!
//! Walks a folder, classifies media by extension and records the
//! metadata the feed needs. Dimensions that cannot be read cheaply are
//! stored as 0 and recovered later by the loader.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::NaiveDateTime;
use exif::{In, Reader, Tag};
use rusqlite::ErrorCode;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::library::{Catalog, NewAsset};
use crate::error::LibraryError;

/// Result of a folder import operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportResult {
    pub imported: usize,
    /// Paths already present in the catalog
    pub skipped: usize,
    /// Files that looked like media but could not be recorded
    pub failed: usize,
}

/// What an extension says about a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Photo(&'static str),
    Video(&'static str),
}

/// Classify a file extension, returning its MIME type
pub fn classify_extension(extension: &str) -> Option<MediaClass> {
    let class = match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => MediaClass::Photo("image/jpeg"),
        "png" => MediaClass::Photo("image/png"),
        "webp" => MediaClass::Photo("image/webp"),
        "gif" => MediaClass::Photo("image/gif"),
        "bmp" => MediaClass::Photo("image/bmp"),
        "tif" | "tiff" => MediaClass::Photo("image/tiff"),
        "mp4" | "m4v" => MediaClass::Video("video/mp4"),
        "3gp" => MediaClass::Video("video/3gpp"),
        "mov" => MediaClass::Video("video/quicktime"),
        "mkv" => MediaClass::Video("video/x-matroska"),
        "webm" => MediaClass::Video("video/webm"),
        _ => return None,
    };
    Some(class)
}

/// Import every photo and video under `folder` into the catalog.
///
/// Runs synchronously; call it from a blocking task.
pub fn index_directory(catalog: &Catalog, folder: &Path) -> Result<ImportResult, LibraryError> {
    if !folder.is_dir() {
        return Err(LibraryError::NotADirectory(folder.to_path_buf()));
    }
    // Stored paths are matched against an absolute storage prefix
    let folder = &folder.canonicalize()?;

    info!(folder = %folder.display(), "scanning folder");
    let mut result = ImportResult::default();

    for entry in WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(class) = path
            .extension()
            .and_then(|ext| classify_extension(&ext.to_string_lossy()))
        else {
            continue;
        };

        let asset = match describe(path, class) {
            Ok(asset) => asset,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read file metadata");
                result.failed += 1;
                continue;
            }
        };

        let inserted = match class {
            MediaClass::Photo(_) => catalog.insert_photo(&asset),
            MediaClass::Video(_) => catalog.insert_video(&asset),
        };

        match inserted {
            Ok(_) => {
                result.imported += 1;
                if result.imported % 100 == 0 {
                    debug!(imported = result.imported, "import progress");
                }
            }
            Err(LibraryError::Sql(rusqlite::Error::SqliteFailure(err, _)))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                result.skipped += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to import");
                result.failed += 1;
            }
        }
    }

    info!(
        imported = result.imported,
        skipped = result.skipped,
        failed = result.failed,
        "import complete"
    );
    Ok(result)
}

/// Collect catalog metadata for one file
fn describe(path: &Path, class: MediaClass) -> Result<NewAsset, std::io::Error> {
    let metadata = std::fs::metadata(path)?;
    let date_modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let title = path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let mut asset = NewAsset {
        path: path.to_string_lossy().to_string(),
        title,
        date_taken: date_modified,
        date_modified,
        ..Default::default()
    };

    match class {
        MediaClass::Photo(mime) => {
            asset.mime_type = mime.to_string();
            let exif = read_exif(path);
            if let Some(taken) = exif.date_taken {
                asset.date_taken = taken;
            }
            asset.orientation = exif.orientation;
            // Header-only read; zero tells the loader to recover them
            if let Ok((w, h)) = image::image_dimensions(path) {
                asset.width = w as i64;
                asset.height = h as i64;
            }
        }
        MediaClass::Video(mime) => {
            asset.mime_type = mime.to_string();
        }
    }

    Ok(asset)
}

#[derive(Debug, Default)]
struct ExifSummary {
    date_taken: Option<i64>,
    orientation: i64,
}

/// Pull capture time and orientation out of a photo's EXIF block
fn read_exif(path: &Path) -> ExifSummary {
    let mut summary = ExifSummary::default();

    let Ok(file) = File::open(path) else {
        return summary;
    };
    let Ok(exif) = Reader::new().read_from_container(&mut BufReader::new(file)) else {
        return summary;
    };

    if let Some(field) = exif.get_field(Tag::Orientation, In::PRIMARY) {
        if let Some(value) = field.value.get_uint(0) {
            summary.orientation = exif_orientation_degrees(value);
        }
    }

    if let Some(field) = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY) {
        let text = field.display_value().to_string();
        summary.date_taken = parse_exif_datetime(&text);
    }

    summary
}

/// Map an EXIF orientation tag onto clockwise degrees.
/// Mirrored variants have no rotation-only equivalent and map to 0.
fn exif_orientation_degrees(value: u32) -> i64 {
    match value {
        3 => 180,
        6 => 90,
        8 => 270,
        _ => 0,
    }
}

/// Parse an EXIF timestamp into epoch milliseconds.
///
/// `display_value` renders as `2024-05-01 12:30:00`, the raw tag as
/// `2024:05:01 12:30:00`; both are accepted.
fn parse_exif_datetime(text: &str) -> Option<i64> {
    let text = text.trim().trim_matches('"');
    ["%Y-%m-%d %H:%M:%S", "%Y:%m:%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
}
