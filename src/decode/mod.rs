//! Decode Engine
//!
//! Turns a record plus the current size hints into a display raster.
//! Photos are sampled down while decoding, videos yield a cover picture
//! or a frame, the preview needs no decode at all.

pub mod photo;
pub mod pool;
pub mod sample;
pub mod scratch;
pub mod video;

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use tokio_util::sync::CancellationToken;

pub use photo::{decode_photo, read_dimensions, rotate, PhotoRequest};
pub use pool::WorkerPool;
pub use sample::{sample_factor, SizeHint};
pub use scratch::ScratchPool;
pub use video::{render_video, FfmpegSource, MetadataRetriever, VideoInfo, VideoMetadataSource};

use crate::error::DecodeError;
use crate::state::data::{AssetDetail, AssetRecord};

/// A decoded image shared between the feed and whoever displays it
pub type Raster = Arc<DynamicImage>;

/// Per-kind renderer shared by every background decode
#[derive(Clone)]
pub struct Renderer {
    scratch: Arc<ScratchPool>,
    videos: Arc<dyn VideoMetadataSource>,
    frame_time: Duration,
}

impl Renderer {
    pub fn new(scratch: Arc<ScratchPool>, videos: Arc<dyn VideoMetadataSource>, frame_time: Duration) -> Self {
        Self {
            scratch,
            videos,
            frame_time,
        }
    }

    /// Produce the raster for `record`.
    ///
    /// `Ok(None)` means there is nothing to show: the decode was
    /// cancelled, the video had no picture, or the record is the preview.
    pub fn render(
        &self,
        record: &AssetRecord,
        hint: SizeHint,
        cancel: &CancellationToken,
    ) -> Result<Option<DynamicImage>, DecodeError> {
        match record.detail() {
            AssetDetail::Preview => Ok(None),
            AssetDetail::Photo { orientation } => {
                let request = PhotoRequest {
                    path: record.path(),
                    width: record.width(),
                    height: record.height(),
                    orientation: *orientation,
                    hint,
                };
                decode_photo(&request, &self.scratch, cancel)
            }
            AssetDetail::Video => render_video(self.videos.as_ref(), record.path(), self.frame_time),
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("scratch", &self.scratch)
            .field("frame_time", &self.frame_time)
            .finish_non_exhaustive()
    }
}
