//! Downsample factor selection
//!
//! Thumbnails are decoded at an integer fraction of the source size so a
//! 50 megapixel photo never has to be held in memory at full resolution.

/// Target decode bounds handed to background decodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHint {
    pub width: u32,
    pub height: u32,
}

impl SizeHint {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Same bound on both axes
    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    /// Derive hints from a requested display size.
    ///
    /// A non-positive request on either axis resets both hints to
    /// `default`; otherwise each axis is clamped to `default` independently.
    pub fn clamped(width: i32, height: i32, default: u32) -> Self {
        if width <= 0 || height <= 0 {
            return Self::square(default);
        }
        Self::new((width as u32).min(default), (height as u32).min(default))
    }
}

/// Compute the power-of-two downsample factor for a source of
/// `width` x `height` so the decoded raster still covers `hint`.
///
/// Doubles the factor while either hinted axis, scaled back up, falls
/// short of the source.
pub fn sample_factor(hint: SizeHint, width: u32, height: u32) -> u32 {
    let hint_w = u64::from(hint.width.max(1));
    let hint_h = u64::from(hint.height.max(1));
    let (width, height) = (u64::from(width), u64::from(height));

    let mut sample: u64 = 1;
    while hint_w * sample < width || hint_h * sample < height {
        sample *= 2;
    }
    sample.min(1 << 31) as u32
}

/// Dimensions of a source reduced by `sample`, never below 1x1
pub fn scaled_dimensions(width: u32, height: u32, sample: u32) -> (u32, u32) {
    let sample = sample.max(1);
    (width.div_ceil(sample).max(1), height.div_ceil(sample).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_factor() {
        // Already fits
        assert_eq!(sample_factor(SizeHint::square(3000), 3000, 2000), 1);
        // Needs halving on one axis only
        assert_eq!(sample_factor(SizeHint::new(1000, 3000), 1500, 800), 2);
        // Large source, small hint
        assert_eq!(sample_factor(SizeHint::new(256, 256), 4000, 3000), 16);
        // Exactly on the boundary does not double
        assert_eq!(sample_factor(SizeHint::new(500, 500), 1000, 1000), 2);
    }

    #[test]
    fn test_sample_factor_degenerate_hint() {
        // A zero hint is treated as 1 instead of looping forever
        assert_eq!(sample_factor(SizeHint::new(0, 0), 8, 3), 8);
        assert_eq!(sample_factor(SizeHint::square(10), 0, 0), 1);
    }

    #[test]
    fn test_clamped_hints() {
        assert_eq!(SizeHint::clamped(0, 0, 3000), SizeHint::square(3000));
        assert_eq!(SizeHint::clamped(-1, 5, 3000), SizeHint::square(3000));
        assert_eq!(SizeHint::clamped(100, 5000, 3000), SizeHint::new(100, 3000));
        assert_eq!(SizeHint::clamped(800, 600, 3000), SizeHint::new(800, 600));
    }

    #[test]
    fn test_scaled_dimensions() {
        assert_eq!(scaled_dimensions(4000, 3000, 16), (250, 188));
        assert_eq!(scaled_dimensions(3, 1, 8), (1, 1));
        assert_eq!(scaled_dimensions(10, 10, 0), (10, 10));
    }
}
