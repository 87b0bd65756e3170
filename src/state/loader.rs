//! Library Loader
//!
//! Queries the photo and video tables for everything under the managed
//! storage directory, normalizes each row into an [`AssetRecord`] and
//! returns the merged feed in display order. Unreadable rows are dropped
//! with a log line; they never abort the scan.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::data::{sort_feed, AssetRecord, AssetRow, Rotation};
use super::library::{AssetSource, MediaTable};
use crate::decode::photo::read_dimensions;
use crate::decode::video::VideoMetadataSource;

pub struct LibraryLoader {
    source: Arc<dyn AssetSource>,
    videos: Arc<dyn VideoMetadataSource>,
    directory: String,
}

impl LibraryLoader {
    pub fn new(
        source: Arc<dyn AssetSource>,
        videos: Arc<dyn VideoMetadataSource>,
        directory: impl Into<String>,
    ) -> Self {
        Self {
            source,
            videos,
            directory: directory.into(),
        }
    }

    /// Run a full scan of both tables.
    ///
    /// Returns `None` when neither table produced a usable record, which
    /// the feed treats as "no data" rather than as a failure. Blocks on
    /// I/O; run it on a worker.
    pub fn scan(&self) -> Option<Vec<AssetRecord>> {
        let mut records: Vec<AssetRecord> = self
            .rows(MediaTable::Photos)
            .iter()
            .filter_map(build_photo)
            .collect();
        let photos = records.len();

        records.extend(
            self.rows(MediaTable::Videos)
                .iter()
                .filter_map(|row| build_video(self.videos.as_ref(), row)),
        );
        let videos = records.len() - photos;

        info!(photos, videos, directory = %self.directory, "library scan complete");

        if records.is_empty() {
            return None;
        }
        sort_feed(&mut records);
        Some(records)
    }

    /// Rows of one table; a failed query reads as an empty table
    fn rows(&self, table: MediaTable) -> Vec<AssetRow> {
        match self.source.query(table, &self.directory) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(?table, error = %e, "asset query failed");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for LibraryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryLoader")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

/// Stored orientation as a rotation; unknown angles count as upright
fn row_orientation(row: &AssetRow) -> Rotation {
    Rotation::from_degrees(row.orientation).unwrap_or_else(|| {
        warn!(id = row.id, orientation = row.orientation, "unsupported orientation, treating as 0");
        Rotation::None
    })
}

fn positive_dimensions(row: &AssetRow) -> Option<(u32, u32)> {
    let width = u32::try_from(row.width).ok().filter(|w| *w > 0)?;
    let height = u32::try_from(row.height).ok().filter(|h| *h > 0)?;
    Some((width, height))
}

/// Build a photo record, recovering missing dimensions from the file
pub fn build_photo(row: &AssetRow) -> Option<AssetRecord> {
    let (width, height) = match positive_dimensions(row) {
        Some(dims) => dims,
        None => {
            debug!(id = row.id, path = %row.path, "photo has no stored dimensions, reading file");
            match read_dimensions(Path::new(&row.path)) {
                Ok(dims) => dims,
                Err(e) => {
                    warn!(id = row.id, path = %row.path, error = %e, "dropping unreadable photo");
                    return None;
                }
            }
        }
    };

    Some(AssetRecord::photo(row, width, height, row_orientation(row)))
}

/// Build a video record; rotation and missing dimensions come from the
/// container metadata
pub fn build_video(videos: &dyn VideoMetadataSource, row: &AssetRow) -> Option<AssetRecord> {
    let stored = positive_dimensions(row);
    let path = Path::new(&row.path);

    let probed = videos.open(path).and_then(|retriever| retriever.info());
    match (probed, stored) {
        (Ok(info), Some((width, height))) => Some(AssetRecord::video(row, width, height, info.rotation)),
        (Ok(info), None) if info.width > 0 && info.height > 0 => {
            Some(AssetRecord::video(row, info.width, info.height, info.rotation))
        }
        (Ok(_), None) => {
            warn!(id = row.id, path = %row.path, "dropping video without dimensions");
            None
        }
        (Err(e), Some((width, height))) => {
            debug!(id = row.id, path = %row.path, error = %e, "video probe failed, using stored dimensions");
            Some(AssetRecord::video(row, width, height, Rotation::None))
        }
        (Err(e), None) => {
            warn!(id = row.id, path = %row.path, error = %e, "dropping unreadable video");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::decode::video::tests::{FakeVideo, FakeVideos};
    use crate::decode::video::VideoInfo;
    use crate::error::LibraryError;
    use crate::state::data::AssetKind;
    use std::sync::atomic::Ordering;

    /// Fixed rows per table, filtered and ordered the way the catalog does
    #[derive(Debug, Default, Clone)]
    pub(crate) struct StaticSource {
        pub photos: Vec<AssetRow>,
        pub videos: Vec<AssetRow>,
        pub fail_photos: bool,
    }

    impl AssetSource for StaticSource {
        fn query(&self, table: MediaTable, directory_prefix: &str) -> Result<Vec<AssetRow>, LibraryError> {
            let rows = match table {
                MediaTable::Photos if self.fail_photos => {
                    return Err(LibraryError::NotADirectory(directory_prefix.into()))
                }
                MediaTable::Photos => &self.photos,
                MediaTable::Videos => &self.videos,
            };
            let mut rows: Vec<_> = rows
                .iter()
                .filter(|r| r.path.starts_with(directory_prefix))
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.date_taken.cmp(&a.date_taken).then(b.id.cmp(&a.id)));
            Ok(rows)
        }
    }

    pub(crate) fn row(id: i64, path: &str, date_taken: i64, width: i64, height: i64) -> AssetRow {
        AssetRow {
            id,
            title: Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            mime_type: "image/jpeg".to_string(),
            date_taken,
            date_modified: date_taken,
            path: path.to_string(),
            width,
            height,
            orientation: 0,
        }
    }

    /// Two burst shots, P1 (id 5) and P2 (id 3), that tie on every key but id
    pub(crate) fn burst_photos() -> Vec<AssetRow> {
        [(5, "/dcim/Camera/P1.jpg"), (3, "/dcim/Camera/P2.jpg")]
            .into_iter()
            .map(|(id, path)| AssetRow {
                title: "burst".to_string(),
                ..row(id, path, 100, 4000, 3000)
            })
            .collect()
    }

    fn loader(source: StaticSource, videos: FakeVideos) -> LibraryLoader {
        LibraryLoader::new(Arc::new(source), Arc::new(videos), "/dcim/Camera/")
    }

    #[test]
    fn test_scan_merges_and_orders() {
        let source = StaticSource {
            photos: burst_photos(),
            videos: vec![row(1, "/dcim/Camera/V1.mp4", 200, 1920, 1080)],
            ..Default::default()
        };
        let videos = FakeVideos::default().with(
            "/dcim/Camera/V1.mp4",
            FakeVideo {
                info: Some(VideoInfo { width: 1920, height: 1080, rotation: Rotation::None }),
                ..Default::default()
            },
        );

        let feed = loader(source, videos).scan().unwrap();
        let ids: Vec<_> = feed.iter().map(AssetRecord::id).collect();
        assert_eq!(ids, vec![1, 5, 3]);
        assert_eq!(feed[0].kind(), AssetKind::Video);
    }

    #[test]
    fn test_scan_title_breaks_ties_before_id() {
        // Same date taken and modified; titles descend before ids do
        let source = StaticSource {
            photos: vec![
                row(5, "/dcim/Camera/P1.jpg", 100, 4000, 3000),
                row(3, "/dcim/Camera/P2.jpg", 100, 4000, 3000),
            ],
            ..Default::default()
        };
        let feed = loader(source, FakeVideos::default()).scan().unwrap();
        let ids: Vec<_> = feed.iter().map(AssetRecord::id).collect();
        assert_eq!(ids, vec![3, 5]);
    }

    #[test]
    fn test_scan_filters_by_directory() {
        let source = StaticSource {
            photos: vec![
                row(1, "/dcim/Camera/in.jpg", 1, 10, 10),
                row(2, "/dcim/Screenshots/out.jpg", 2, 10, 10),
            ],
            ..Default::default()
        };
        let feed = loader(source, FakeVideos::default()).scan().unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].id(), 1);
    }

    #[test]
    fn test_empty_scan_is_no_data() {
        assert!(loader(StaticSource::default(), FakeVideos::default()).scan().is_none());

        // Every row unreadable is no data as well
        let source = StaticSource {
            photos: vec![row(1, "/dcim/Camera/missing.jpg", 1, 0, 0)],
            ..Default::default()
        };
        assert!(loader(source, FakeVideos::default()).scan().is_none());
    }

    #[test]
    fn test_failed_query_does_not_abort_scan() {
        let source = StaticSource {
            photos: vec![row(1, "/dcim/Camera/a.jpg", 1, 10, 10)],
            videos: vec![row(2, "/dcim/Camera/b.mp4", 1, 640, 480)],
            fail_photos: true,
        };
        let feed = loader(source, FakeVideos::default()).scan().unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].id(), 2);
    }

    #[test]
    fn test_photo_dimension_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        image::RgbImage::new(30, 20).save(&good).unwrap();
        let bad = dir.path().join("bad.jpg");
        std::fs::write(&bad, b"garbage").unwrap();

        let mut r = row(1, &good.to_string_lossy(), 1, 0, -1);
        r.orientation = 90;
        let record = build_photo(&r).unwrap();
        // Recovered 30x20, then swapped by the orientation
        assert_eq!(record.dimensions(), (20, 30));

        assert!(build_photo(&row(2, &bad.to_string_lossy(), 1, 0, 0)).is_none());
    }

    #[test]
    fn test_unknown_orientation_is_upright() {
        let mut r = row(1, "/dcim/Camera/a.jpg", 1, 40, 30);
        r.orientation = 45;
        let record = build_photo(&r).unwrap();
        assert_eq!(record.dimensions(), (40, 30));
    }

    #[test]
    fn test_video_dimensions_and_rotation() {
        let videos = FakeVideos::default()
            .with(
                "/v/portrait.mp4",
                FakeVideo {
                    info: Some(VideoInfo { width: 1920, height: 1080, rotation: Rotation::Cw90 }),
                    ..Default::default()
                },
            )
            .with("/v/no_stream.mp4", FakeVideo::default());

        // Stored dimensions are kept, container rotation is applied
        let record = build_video(&videos, &row(1, "/v/portrait.mp4", 1, 1280, 720)).unwrap();
        assert_eq!(record.dimensions(), (720, 1280));

        // Zero dimensions come from the container
        let record = build_video(&videos, &row(2, "/v/portrait.mp4", 1, 0, 0)).unwrap();
        assert_eq!(record.dimensions(), (1080, 1920));

        // Probe failures keep positive stored dimensions without rotation
        let record = build_video(&videos, &row(3, "/v/no_stream.mp4", 1, 640, 480)).unwrap();
        assert_eq!(record.dimensions(), (640, 480));
        assert!(build_video(&videos, &row(4, "/v/no_stream.mp4", 1, 0, 0)).is_none());
        assert!(build_video(&videos, &row(5, "/v/missing.mp4", 1, 0, 0)).is_none());

        // Every opened handle was released
        assert_eq!(videos.opened.load(Ordering::SeqCst), 4);
        assert_eq!(videos.released.load(Ordering::SeqCst), 4);
    }
}
