//! Photo dimension recovery and memory-bounded thumbnail decoding

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, Limits, RgbImage};
use jpeg_decoder::PixelFormat;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::sample::{sample_factor, scaled_dimensions, SizeHint};
use super::scratch::ScratchPool;
use crate::error::DecodeError;
use crate::state::data::Rotation;

/// Upper bound on allocations made by a single generic decode
pub const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// Recover the pixel dimensions of a photo whose catalog row has none.
///
/// Reads only the header first; if that fails the whole file is decoded
/// just to learn its size.
pub fn read_dimensions(path: &Path) -> Result<(u32, u32), DecodeError> {
    match header_dimensions(path) {
        Ok((w, h)) if w > 0 && h > 0 => return Ok((w, h)),
        Ok((w, h)) => debug!(path = %path.display(), w, h, "header reports empty dimensions"),
        Err(e) => debug!(path = %path.display(), error = %e, "header dimension read failed"),
    }

    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    if img.width() == 0 || img.height() == 0 {
        return Err(DecodeError::Empty(path.to_path_buf()));
    }
    Ok((img.width(), img.height()))
}

fn header_dimensions(path: &Path) -> Result<(u32, u32), DecodeError> {
    let dims = ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(dims)
}

/// Everything a background photo decode needs, snapshotted at submit time
#[derive(Debug, Clone, Copy)]
pub struct PhotoRequest<'a> {
    pub path: &'a Path,
    /// Post-orientation width from the record
    pub width: u32,
    /// Post-orientation height from the record
    pub height: u32,
    pub orientation: Rotation,
    pub hint: SizeHint,
}

/// Decode a downsampled, upright raster for a photo.
///
/// Returns `Ok(None)` when `cancel` fires before the decode or before the
/// rotation step. The scratch buffer goes back to `scratch` on every path.
pub fn decode_photo(
    request: &PhotoRequest<'_>,
    scratch: &ScratchPool,
    cancel: &CancellationToken,
) -> Result<Option<DynamicImage>, DecodeError> {
    decode_photo_with(request, scratch, cancel, |_| {})
}

/// [`decode_photo`] with a hook that sees the raster between decode and
/// rotation
fn decode_photo_with(
    request: &PhotoRequest<'_>,
    scratch: &ScratchPool,
    cancel: &CancellationToken,
    on_decoded: impl FnOnce(&DynamicImage),
) -> Result<Option<DynamicImage>, DecodeError> {
    let sample = sample_factor(request.hint, request.width, request.height);

    if cancel.is_cancelled() {
        trace!(path = %request.path.display(), "decode cancelled before start");
        return Ok(None);
    }

    let decoded = {
        let mut buf = scratch.checkout();
        File::open(request.path)?.read_to_end(&mut buf)?;
        decode_sampled(&buf, sample)?
    };

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(DecodeError::Empty(request.path.to_path_buf()));
    }

    debug!(
        path = %request.path.display(),
        sample,
        width = decoded.width(),
        height = decoded.height(),
        "photo decoded"
    );
    on_decoded(&decoded);

    if request.orientation == Rotation::None {
        return Ok(Some(decoded));
    }

    if cancel.is_cancelled() {
        trace!(path = %request.path.display(), "decode cancelled before rotation");
        return Ok(None);
    }

    Ok(Some(rotate(decoded, request.orientation)))
}

/// Rotate a raster clockwise by a right angle
pub fn rotate(img: DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::None => img,
        Rotation::Cw90 => img.rotate90(),
        Rotation::Cw180 => img.rotate180(),
        Rotation::Cw270 => img.rotate270(),
    }
}

/// Decode `bytes` at `1/sample` of their native size
fn decode_sampled(bytes: &[u8], sample: u32) -> Result<DynamicImage, DecodeError> {
    if image::guess_format(bytes).ok() == Some(ImageFormat::Jpeg) {
        if let Some(img) = decode_jpeg_scaled(bytes, sample)? {
            return Ok(img);
        }
    }
    decode_generic(bytes, sample)
}

/// JPEG fast path: let the decoder skip DCT coefficients instead of
/// decoding at full size and shrinking afterwards.
///
/// Returns `Ok(None)` for pixel formats this path doesn't handle, so the
/// caller can fall back to the generic decoder.
fn decode_jpeg_scaled(bytes: &[u8], sample: u32) -> Result<Option<DynamicImage>, DecodeError> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder.read_info()?;
    let Some(info) = decoder.info() else {
        return Ok(None);
    };

    let (target_w, target_h) = scaled_dimensions(u32::from(info.width), u32::from(info.height), sample);
    let (out_w, out_h) = if sample > 1 {
        let (w, h) = decoder.scale(target_w as u16, target_h as u16)?;
        (u32::from(w), u32::from(h))
    } else {
        (u32::from(info.width), u32::from(info.height))
    };

    let pixels = decoder.decode()?;
    let img = match info.pixel_format {
        PixelFormat::RGB24 => RgbImage::from_raw(out_w, out_h, pixels).map(DynamicImage::ImageRgb8),
        PixelFormat::L8 => GrayImage::from_raw(out_w, out_h, pixels).map(DynamicImage::ImageLuma8),
        _ => None,
    };
    let Some(img) = img else {
        return Ok(None);
    };

    // DCT scaling bottoms out at 1/8
    if img.width() > target_w || img.height() > target_h {
        return Ok(Some(img.resize_exact(target_w, target_h, FilterType::Triangle)));
    }
    Ok(Some(img))
}

fn decode_generic(bytes: &[u8], sample: u32) -> Result<DynamicImage, DecodeError> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let mut limits = Limits::default();
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    reader.limits(limits);

    let img = reader.decode()?;
    if sample <= 1 {
        return Ok(img);
    }
    let (w, h) = scaled_dimensions(img.width(), img.height(), sample);
    Ok(img.resize_exact(w, h, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};
    use std::path::PathBuf;

    /// Write a `width` x `height` image whose left half is red and right half blue
    fn write_fixture(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let img = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn request(path: &Path, width: u32, height: u32, orientation: Rotation, hint: SizeHint) -> PhotoRequest<'_> {
        PhotoRequest {
            path,
            width,
            height,
            orientation,
            hint,
        }
    }

    #[test]
    fn test_read_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_fixture(dir.path(), "a.png", 40, 20);
        assert_eq!(read_dimensions(&png).unwrap(), (40, 20));

        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"definitely not a jpeg").unwrap();
        assert!(read_dimensions(&broken).is_err());

        assert!(read_dimensions(&dir.path().join("missing.png")).is_err());
    }

    #[test]
    fn test_decode_png_downsampled() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_fixture(dir.path(), "wide.png", 64, 32);
        let pool = ScratchPool::new(1);
        let cancel = CancellationToken::new();

        let req = request(&png, 64, 32, Rotation::None, SizeHint::square(16));
        let img = decode_photo(&req, &pool, &cancel).unwrap().unwrap();
        // sample = 4
        assert_eq!(img.dimensions(), (16, 8));
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_decode_jpeg_downsampled() {
        let dir = tempfile::tempdir().unwrap();
        let jpg = write_fixture(dir.path(), "wide.jpg", 256, 128);
        let pool = ScratchPool::new(1);
        let cancel = CancellationToken::new();

        let req = request(&jpg, 256, 128, Rotation::None, SizeHint::square(64));
        let img = decode_photo(&req, &pool, &cancel).unwrap().unwrap();
        assert_eq!(img.dimensions(), (64, 32));

        // Beyond the decoder's 1/8 limit the remainder is resized
        let req = request(&jpg, 256, 128, Rotation::None, SizeHint::square(16));
        let img = decode_photo(&req, &pool, &cancel).unwrap().unwrap();
        assert_eq!(img.dimensions(), (16, 8));
    }

    #[test]
    fn test_decode_applies_orientation() {
        let dir = tempfile::tempdir().unwrap();
        // Stored sideways: raw 40x20, record dimensions are post-orientation
        let png = write_fixture(dir.path(), "side.png", 40, 20);
        let pool = ScratchPool::new(1);
        let cancel = CancellationToken::new();

        let req = request(&png, 20, 40, Rotation::Cw90, SizeHint::square(3000));
        let img = decode_photo(&req, &pool, &cancel).unwrap().unwrap();
        assert_eq!(img.dimensions(), (20, 40));
        // Red half was on the left, after a clockwise turn it is on top
        let rgb = img.to_rgb8();
        assert_eq!(rgb.get_pixel(10, 5).0, [255, 0, 0]);
        assert_eq!(rgb.get_pixel(10, 35).0, [0, 0, 255]);
    }

    #[test]
    fn test_cancelled_decode_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_fixture(dir.path(), "a.png", 8, 8);
        let pool = ScratchPool::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let req = request(&png, 8, 8, Rotation::Cw90, SizeHint::square(3000));
        assert!(decode_photo(&req, &pool, &cancel).unwrap().is_none());
        // Nothing was read
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_cancel_after_decode_skips_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_fixture(dir.path(), "side.png", 40, 20);
        let pool = ScratchPool::new(1);
        let cancel = CancellationToken::new();

        let req = request(&png, 20, 40, Rotation::Cw90, SizeHint::square(3000));
        let mut decoded = None;
        let result = decode_photo_with(&req, &pool, &cancel, |img| {
            decoded = Some(img.dimensions());
            cancel.cancel();
        })
        .unwrap();

        // The decode itself ran, its result was thrown away
        assert_eq!(decoded, Some((40, 20)));
        assert!(result.is_none());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"\x89PNG\r\n\x1a\nnope").unwrap();
        let pool = ScratchPool::new(1);
        let cancel = CancellationToken::new();

        let req = request(&broken, 100, 100, Rotation::None, SizeHint::square(3000));
        assert!(decode_photo(&req, &pool, &cancel).is_err());
        // The buffer still made it back
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_rotate() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(3, 1));
        assert_eq!(rotate(img.clone(), Rotation::None).dimensions(), (3, 1));
        assert_eq!(rotate(img.clone(), Rotation::Cw90).dimensions(), (1, 3));
        assert_eq!(rotate(img.clone(), Rotation::Cw180).dimensions(), (3, 1));
        assert_eq!(rotate(img, Rotation::Cw270).dimensions(), (1, 3));
    }
}
