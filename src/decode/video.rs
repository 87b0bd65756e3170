//! Video metadata extraction and cover frame rendering
//!
//! Videos are opened through a [`MetadataRetriever`] handle. The default
//! implementation shells out to `ffprobe`/`ffmpeg`; tests substitute their
//! own source. Handles release whatever they hold when dropped, so every
//! exit path of a caller gives them back.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use image::DynamicImage;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::DecodeError;
use crate::state::data::Rotation;

/// Dimensions and rotation reported by a video container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    /// Coded width, before rotation
    pub width: u32,
    /// Coded height, before rotation
    pub height: u32,
    pub rotation: Rotation,
}

/// An open metadata handle for one video file
pub trait MetadataRetriever {
    fn info(&self) -> Result<VideoInfo, DecodeError>;

    /// Bytes of an embedded cover picture, if the container has one
    fn embedded_picture(&self) -> Result<Option<Vec<u8>>, DecodeError>;

    /// A representative frame near `at`
    fn frame_at(&self, at: Duration) -> Result<Option<DynamicImage>, DecodeError>;
}

/// Opens [`MetadataRetriever`] handles
pub trait VideoMetadataSource: Send + Sync {
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn MetadataRetriever + 'a>, DecodeError>;
}

/// Render the display raster for a video.
///
/// Prefers the embedded cover picture and falls back to a frame at
/// `frame_time`. Frames keep the decoder's native resolution.
pub fn render_video(
    source: &dyn VideoMetadataSource,
    path: &Path,
    frame_time: Duration,
) -> Result<Option<DynamicImage>, DecodeError> {
    let retriever = source.open(path)?;

    match retriever.embedded_picture() {
        Ok(Some(bytes)) => match image::load_from_memory(&bytes) {
            Ok(img) => return Ok(Some(img)),
            Err(e) => debug!(path = %path.display(), error = %e, "embedded picture is not decodable"),
        },
        Ok(None) => trace!(path = %path.display(), "no embedded picture"),
        Err(e) => debug!(path = %path.display(), error = %e, "embedded picture extraction failed"),
    }

    retriever.frame_at(frame_time)
}

/// `ffprobe`/`ffmpeg` backed metadata source
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl FfmpegSource {
    pub fn new(ffprobe: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self::new("ffprobe", "ffmpeg")
    }
}

impl VideoMetadataSource for FfmpegSource {
    fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn MetadataRetriever + 'a>, DecodeError> {
        // Run ffprobe to get stream information in JSON format
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
            .arg(path)
            .output()
            .map_err(|e| probe_error(path, format!("cannot run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(probe_error(path, format!("ffprobe exited with {}", output.status)));
        }

        let json: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| probe_error(path, format!("invalid ffprobe output: {e}")))?;
        let streams = json["streams"].as_array().cloned().unwrap_or_default();

        Ok(Box::new(FfmpegRetriever {
            source: self,
            path: path.to_path_buf(),
            streams,
        }))
    }
}

/// Probe results for one file; frames are pulled with `ffmpeg` on demand
struct FfmpegRetriever<'a> {
    source: &'a FfmpegSource,
    path: PathBuf,
    streams: Vec<Value>,
}

impl FfmpegRetriever<'_> {
    fn video_stream(&self) -> Option<&Value> {
        self.streams
            .iter()
            .find(|s| s["codec_type"] == "video" && !is_attached_pic(s))
    }

    fn cover_stream(&self) -> Option<&Value> {
        self.streams.iter().find(|s| is_attached_pic(s))
    }

    /// Run ffmpeg with `args` and capture what it writes to stdout
    fn capture(&self, args: &[String]) -> Result<Vec<u8>, DecodeError> {
        let output = Command::new(&self.source.ffmpeg)
            .args(args)
            .output()
            .map_err(|e| probe_error(&self.path, format!("cannot run ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(probe_error(&self.path, format!("ffmpeg exited with {}", output.status)));
        }
        Ok(output.stdout)
    }
}

impl MetadataRetriever for FfmpegRetriever<'_> {
    fn info(&self) -> Result<VideoInfo, DecodeError> {
        let stream = self
            .video_stream()
            .ok_or_else(|| probe_error(&self.path, "no video stream".to_string()))?;
        Ok(parse_video_info(stream))
    }

    fn embedded_picture(&self) -> Result<Option<Vec<u8>>, DecodeError> {
        let Some(index) = self.cover_stream().and_then(|s| s["index"].as_u64()) else {
            return Ok(None);
        };

        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            self.path.to_string_lossy().to_string(),
            "-map".to_string(),
            format!("0:{index}"),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-".to_string(),
        ];
        let bytes = self.capture(&args)?;
        Ok((!bytes.is_empty()).then_some(bytes))
    }

    fn frame_at(&self, at: Duration) -> Result<Option<DynamicImage>, DecodeError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-ss".to_string(),
            format!("{:.3}", at.as_secs_f64()),
            "-i".to_string(),
            self.path.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-c:v".to_string(),
            "png".to_string(),
            "-".to_string(),
        ];
        let bytes = self.capture(&args)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(image::load_from_memory(&bytes)?))
    }
}

impl Drop for FfmpegRetriever<'_> {
    fn drop(&mut self) {
        trace!(path = %self.path.display(), "metadata retriever released");
    }
}

fn is_attached_pic(stream: &Value) -> bool {
    stream["disposition"]["attached_pic"].as_i64() == Some(1)
}

fn probe_error(path: &Path, reason: String) -> DecodeError {
    DecodeError::Probe {
        path: path.to_path_buf(),
        reason,
    }
}

/// Read dimensions and clockwise rotation from an ffprobe stream object.
///
/// Older muxers report a `rotate` tag in clockwise degrees; newer ffprobe
/// builds report a display matrix whose `rotation` is counter-clockwise.
fn parse_video_info(stream: &Value) -> VideoInfo {
    let width = stream["width"].as_u64().unwrap_or(0) as u32;
    let height = stream["height"].as_u64().unwrap_or(0) as u32;

    let tagged = stream["tags"]["rotate"]
        .as_str()
        .and_then(|r| r.trim().parse::<i64>().ok());
    let matrix = stream["side_data_list"].as_array().and_then(|list| {
        list.iter()
            .find_map(|side| side["rotation"].as_f64())
            .map(|ccw| -(ccw.round() as i64))
    });

    let rotation = tagged
        .or(matrix)
        .and_then(Rotation::from_degrees)
        .unwrap_or_default();

    VideoInfo {
        width,
        height,
        rotation,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// What a fake video looks like to the retriever
    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeVideo {
        pub info: Option<VideoInfo>,
        pub cover: Option<Vec<u8>>,
        pub frame: Option<(u32, u32)>,
    }

    /// In-memory metadata source that counts opened and released handles
    #[derive(Debug, Default)]
    pub(crate) struct FakeVideos {
        pub videos: HashMap<PathBuf, FakeVideo>,
        pub opened: Arc<AtomicUsize>,
        pub released: Arc<AtomicUsize>,
    }

    impl FakeVideos {
        pub fn with(mut self, path: &str, video: FakeVideo) -> Self {
            self.videos.insert(PathBuf::from(path), video);
            self
        }
    }

    struct FakeRetriever {
        video: FakeVideo,
        path: PathBuf,
        released: Arc<AtomicUsize>,
    }

    impl MetadataRetriever for FakeRetriever {
        fn info(&self) -> Result<VideoInfo, DecodeError> {
            self.video
                .info
                .ok_or_else(|| probe_error(&self.path, "no video stream".to_string()))
        }

        fn embedded_picture(&self) -> Result<Option<Vec<u8>>, DecodeError> {
            Ok(self.video.cover.clone())
        }

        fn frame_at(&self, _at: Duration) -> Result<Option<DynamicImage>, DecodeError> {
            Ok(self
                .video
                .frame
                .map(|(w, h)| DynamicImage::ImageRgb8(RgbImage::new(w, h))))
        }
    }

    impl Drop for FakeRetriever {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl VideoMetadataSource for FakeVideos {
        fn open<'a>(&'a self, path: &Path) -> Result<Box<dyn MetadataRetriever + 'a>, DecodeError> {
            let video = self
                .videos
                .get(path)
                .cloned()
                .ok_or_else(|| probe_error(path, "no such file".to_string()))?;
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeRetriever {
                video,
                path: path.to_path_buf(),
                released: Arc::clone(&self.released),
            }))
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_render_prefers_cover_picture() {
        let videos = FakeVideos::default().with(
            "/v/a.mp4",
            FakeVideo {
                cover: Some(png_bytes(4, 3)),
                frame: Some((16, 9)),
                ..Default::default()
            },
        );

        let img = render_video(&videos, Path::new("/v/a.mp4"), Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(videos.opened.load(Ordering::SeqCst), 1);
        assert_eq!(videos.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_render_falls_back_to_frame() {
        let videos = FakeVideos::default()
            .with(
                "/v/no_cover.mp4",
                FakeVideo {
                    frame: Some((16, 9)),
                    ..Default::default()
                },
            )
            .with(
                "/v/bad_cover.mp4",
                FakeVideo {
                    cover: Some(b"garbage".to_vec()),
                    frame: Some((8, 8)),
                    ..Default::default()
                },
            );

        let img = render_video(&videos, Path::new("/v/no_cover.mp4"), Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(img.dimensions(), (16, 9));

        let img = render_video(&videos, Path::new("/v/bad_cover.mp4"), Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(img.dimensions(), (8, 8));
        assert_eq!(videos.released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_render_without_any_picture() {
        let videos = FakeVideos::default().with("/v/empty.mp4", FakeVideo::default());
        let result = render_video(&videos, Path::new("/v/empty.mp4"), Duration::ZERO).unwrap();
        assert!(result.is_none());
        assert_eq!(videos.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_video_info_rotate_tag() {
        let stream = json!({
            "codec_type": "video",
            "width": 1920,
            "height": 1080,
            "tags": { "rotate": "90" }
        });
        let info = parse_video_info(&stream);
        assert_eq!(info, VideoInfo { width: 1920, height: 1080, rotation: Rotation::Cw90 });
    }

    #[test]
    fn test_parse_video_info_display_matrix() {
        // Display matrix rotation is counter-clockwise
        let stream = json!({
            "codec_type": "video",
            "width": 1280,
            "height": 720,
            "side_data_list": [
                { "side_data_type": "Display Matrix", "rotation": -90 }
            ]
        });
        assert_eq!(parse_video_info(&stream).rotation, Rotation::Cw90);

        let stream = json!({ "width": 10, "height": 20 });
        let info = parse_video_info(&stream);
        assert_eq!(info.rotation, Rotation::None);
        assert_eq!((info.width, info.height), (10, 20));
    }

    #[test]
    fn test_attached_pic_detection() {
        assert!(is_attached_pic(&json!({ "disposition": { "attached_pic": 1 } })));
        assert!(!is_attached_pic(&json!({ "disposition": { "attached_pic": 0 } })));
        assert!(!is_attached_pic(&json!({})));
    }

    #[test]
    fn test_missing_ffprobe_is_a_probe_error() {
        let source = FfmpegSource::new("/nonexistent/ffprobe", "/nonexistent/ffmpeg");
        let err = source.open(Path::new("/tmp/whatever.mp4")).err().unwrap();
        assert!(matches!(err, DecodeError::Probe { .. }));
    }
}
