use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::data::{AssetId, AssetRow};
use crate::error::LibraryError;

/// The two tables the feed is assembled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaTable {
    Photos,
    Videos,
}

impl MediaTable {
    fn name(self) -> &'static str {
        match self {
            MediaTable::Photos => "photos",
            MediaTable::Videos => "videos",
        }
    }
}

/// Tabular query contract the loader consumes.
///
/// Implementations return every row whose path starts with
/// `directory_prefix`, ordered by `date_taken DESC, id DESC`.
pub trait AssetSource: Send + Sync {
    fn query(&self, table: MediaTable, directory_prefix: &str) -> Result<Vec<AssetRow>, LibraryError>;
}

/// A new photo or video entry to insert into the catalog
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewAsset {
    pub path: String,
    pub title: String,
    pub mime_type: String,
    pub date_taken: i64,
    pub date_modified: i64,
    pub width: i64,
    pub height: i64,
    /// Photo orientation in degrees, ignored for videos
    pub orientation: i64,
}

/// The Catalog manages the SQLite content store.
/// It stores photo and video metadata for everything under the managed
/// storage directory.
pub struct Catalog {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl Catalog {
    /// Open or create the catalog database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let db_path = db_path.as_ref().to_path_buf();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        info!(path = %db_path.display(), "catalog opened");

        let catalog = Catalog {
            conn,
            db_path: Some(db_path),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    /// Open a throwaway catalog that lives only in memory
    pub fn open_in_memory() -> Result<Self, LibraryError> {
        let catalog = Catalog {
            conn: Connection::open_in_memory()?,
            db_path: None,
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    /// Create all necessary tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<(), LibraryError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS photos (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                path            TEXT NOT NULL UNIQUE,
                title           TEXT NOT NULL,
                mime_type       TEXT NOT NULL,
                date_taken      INTEGER NOT NULL,
                date_modified   INTEGER NOT NULL,
                orientation     INTEGER NOT NULL DEFAULT 0,
                width           INTEGER NOT NULL DEFAULT 0,
                height          INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS videos (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                path            TEXT NOT NULL UNIQUE,
                title           TEXT NOT NULL,
                mime_type       TEXT NOT NULL,
                date_taken      INTEGER NOT NULL,
                date_modified   INTEGER NOT NULL,
                width           INTEGER NOT NULL DEFAULT 0,
                height          INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_photos_date_taken ON photos(date_taken DESC, id DESC);
            CREATE INDEX IF NOT EXISTS idx_videos_date_taken ON videos(date_taken DESC, id DESC);",
        )?;
        debug!("catalog schema initialized");
        Ok(())
    }

    /// Get the path to the database file (`None` for in-memory catalogs)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Insert a photo, returning its new id
    pub fn insert_photo(&self, asset: &NewAsset) -> Result<AssetId, LibraryError> {
        self.conn.execute(
            "INSERT INTO photos (path, title, mime_type, date_taken, date_modified, orientation, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                asset.path,
                asset.title,
                asset.mime_type,
                asset.date_taken,
                asset.date_modified,
                asset.orientation,
                asset.width,
                asset.height,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert a video, returning its new id
    pub fn insert_video(&self, asset: &NewAsset) -> Result<AssetId, LibraryError> {
        self.conn.execute(
            "INSERT INTO videos (path, title, mime_type, date_taken, date_modified, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                asset.path,
                asset.title,
                asset.mime_type,
                asset.date_taken,
                asset.date_modified,
                asset.width,
                asset.height,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn photo_count(&self) -> Result<i64, LibraryError> {
        self.count(MediaTable::Photos)
    }

    pub fn video_count(&self) -> Result<i64, LibraryError> {
        self.count(MediaTable::Videos)
    }

    fn count(&self, table: MediaTable) -> Result<i64, LibraryError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Remove rows whose file no longer exists on disk.
    /// Returns how many rows were deleted.
    pub fn prune_missing(&self) -> Result<usize, LibraryError> {
        let mut removed = 0;
        for table in [MediaTable::Photos, MediaTable::Videos] {
            let rows: Vec<(i64, String)> = {
                let sql = format!("SELECT id, path FROM {}", table.name());
                let mut stmt = self.conn.prepare(&sql)?;
                let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                mapped.collect::<Result<_, _>>()?
            };

            let sql = format!("DELETE FROM {} WHERE id = ?1", table.name());
            for (id, path) in rows {
                if !Path::new(&path).exists() {
                    self.conn.execute(&sql, params![id])?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(removed, "pruned catalog rows for missing files");
        }
        Ok(removed)
    }
}

impl Catalog {
    /// Rows of `table` under `directory_prefix`, newest first.
    ///
    /// Same contract as [`AssetSource::query`]; background scans go
    /// through [`CatalogSource`] since the connection cannot be shared
    /// across threads.
    pub fn query(&self, table: MediaTable, directory_prefix: &str) -> Result<Vec<AssetRow>, LibraryError> {
        query_rows(&self.conn, table, directory_prefix)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Read-only view of an on-disk catalog for background threads.
///
/// `rusqlite::Connection` is not `Sync`, so instead of sharing the main
/// connection every query opens its own.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    db_path: PathBuf,
}

impl CatalogSource {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

impl AssetSource for CatalogSource {
    fn query(&self, table: MediaTable, directory_prefix: &str) -> Result<Vec<AssetRow>, LibraryError> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let rows = query_rows(&conn, table, directory_prefix);
        // Closing is best effort, the query result is already decided
        if let Err((_, e)) = conn.close() {
            debug!(error = %e, "failed to close catalog connection");
        }
        rows
    }
}

fn query_rows(conn: &Connection, table: MediaTable, directory_prefix: &str) -> Result<Vec<AssetRow>, LibraryError> {
    let orientation = match table {
        MediaTable::Photos => "orientation",
        MediaTable::Videos => "0",
    };
    let sql = format!(
        "SELECT id, COALESCE(title, ''), COALESCE(mime_type, ''), date_taken, date_modified, path, width, height, {orientation}
         FROM {}
         WHERE path LIKE ?1 ESCAPE '\\'
         ORDER BY date_taken DESC, id DESC",
        table.name()
    );

    let mut stmt = conn.prepare(&sql)?;
    let pattern = like_prefix(directory_prefix);
    let rows = stmt.query_map(params![pattern], map_row)?;
    let rows = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<AssetRow> {
    Ok(AssetRow {
        id: row.get(0)?,
        title: row.get(1)?,
        mime_type: row.get(2)?,
        date_taken: row.get(3)?,
        date_modified: row.get(4)?,
        path: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        orientation: row.get(8)?,
    })
}

/// Turn a directory prefix into a LIKE pattern, escaping wildcards
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(path: &str, date_taken: i64) -> NewAsset {
        NewAsset {
            path: path.to_string(),
            title: Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            mime_type: "image/jpeg".to_string(),
            date_taken,
            date_modified: date_taken,
            width: 4000,
            height: 3000,
            orientation: 90,
        }
    }

    #[test]
    fn test_query_orders_and_filters() {
        let catalog = Catalog::open_in_memory().unwrap();
        let a = catalog.insert_photo(&asset("/dcim/Camera/a.jpg", 100)).unwrap();
        let b = catalog.insert_photo(&asset("/dcim/Camera/b.jpg", 100)).unwrap();
        let c = catalog.insert_photo(&asset("/dcim/Camera/c.jpg", 300)).unwrap();
        catalog.insert_photo(&asset("/dcim/Other/d.jpg", 500)).unwrap();

        let rows = catalog.query(MediaTable::Photos, "/dcim/Camera/").unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        // date_taken DESC, then id DESC
        assert_eq!(ids, vec![c, b, a]);
        assert_eq!(rows[0].orientation, 90);
        assert_eq!(rows[0].title, "c");
    }

    #[test]
    fn test_videos_report_zero_orientation() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut clip = asset("/dcim/Camera/clip.mp4", 10);
        clip.mime_type = "video/mp4".to_string();
        catalog.insert_video(&clip).unwrap();

        let rows = catalog.query(MediaTable::Videos, "/dcim/Camera/").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].orientation, 0);
        assert_eq!(catalog.video_count().unwrap(), 1);
        assert_eq!(catalog.photo_count().unwrap(), 0);
    }

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("/a_b/"), "/a\\_b/%");
        assert_eq!(like_prefix("100%"), "100\\%%");

        let catalog = Catalog::open_in_memory().unwrap();
        catalog.insert_photo(&asset("/a_b/x.jpg", 1)).unwrap();
        catalog.insert_photo(&asset("/aXb/y.jpg", 2)).unwrap();
        let rows = catalog.query(MediaTable::Photos, "/a_b/").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].path, "/a_b/x.jpg");
    }

    #[test]
    fn test_duplicate_path_is_rejected() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.insert_photo(&asset("/dcim/a.jpg", 1)).unwrap();
        let err = catalog.insert_photo(&asset("/dcim/a.jpg", 2)).unwrap_err();
        assert!(matches!(err, LibraryError::Sql(_)));
    }

    #[test]
    fn test_catalog_source_reads_on_disk_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("catalog.db");
        let catalog = Catalog::open(&db).unwrap();
        catalog.insert_photo(&asset("/dcim/Camera/a.jpg", 1)).unwrap();
        assert_eq!(catalog.path(), Some(db.as_path()));

        let source = CatalogSource::new(&db);
        let rows = source.query(MediaTable::Photos, "/dcim/Camera").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(source.query(MediaTable::Videos, "/dcim/Camera").unwrap().is_empty());
    }

    #[test]
    fn test_prune_missing() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.jpg");
        std::fs::write(&kept, b"x").unwrap();

        let catalog = Catalog::open_in_memory().unwrap();
        catalog.insert_photo(&asset(&kept.to_string_lossy(), 1)).unwrap();
        catalog
            .insert_photo(&asset(&dir.path().join("gone.jpg").to_string_lossy(), 2))
            .unwrap();

        assert_eq!(catalog.prune_missing().unwrap(), 1);
        assert_eq!(catalog.photo_count().unwrap(), 1);
    }
}
