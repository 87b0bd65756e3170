//! Single-page print export
//!
//! Lays one raster out on a page and writes it as a minimal PDF: the
//! raster is JPEG-encoded into an image XObject, scaled to fill or fit the
//! printable area, centered, and clipped to that area.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ExportError;

/// Longest edge a raster may have before it is laid out
pub const MAX_PRINT_SIZE: u32 = 3500;

/// How the raster covers the printable area
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    /// Cover the whole area, cropping the overflow
    #[default]
    Fill,
    /// Show the whole raster, leaving bands on one axis
    Fit,
}

/// Standard paper sizes
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PagePreset {
    #[default]
    A4,
    Letter,
}

impl PagePreset {
    /// Page size in points (1/72 inch), portrait
    pub fn size_pt(self) -> (f32, f32) {
        match self {
            PagePreset::A4 => (595.28, 841.89),
            PagePreset::Letter => (612.0, 792.0),
        }
    }
}

/// A rectangle in PDF page space (origin bottom left, points)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Page size and the margin kept free on every side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
}

impl PageGeometry {
    pub fn new(width: f32, height: f32, margin: f32) -> Self {
        Self { width, height, margin }
    }

    pub fn from_preset(preset: PagePreset, margin: f32) -> Self {
        let (width, height) = preset.size_pt();
        Self::new(width, height, margin)
    }

    pub fn a4(margin: f32) -> Self {
        Self::from_preset(PagePreset::A4, margin)
    }

    pub fn letter(margin: f32) -> Self {
        Self::from_preset(PagePreset::Letter, margin)
    }

    /// The printable area inside the margins
    pub fn content_rect(&self) -> Rect {
        Rect {
            x: self.margin,
            y: self.margin,
            width: self.width - 2.0 * self.margin,
            height: self.height - 2.0 * self.margin,
        }
    }
}

/// Where the raster lands on the page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub scale: f32,
    /// Drawn raster bounds; may extend past `clip` when filling
    pub image: Rect,
    pub clip: Rect,
}

/// Scale a `width` x `height` raster onto the printable area and center it
pub fn compute_placement(
    width: u32,
    height: u32,
    page: &PageGeometry,
    mode: ScaleMode,
) -> Result<Placement, ExportError> {
    if width == 0 || height == 0 {
        return Err(ExportError::Geometry(format!("raster is {width}x{height}")));
    }
    let content = page.content_rect();
    if !(content.width > 0.0 && content.height > 0.0) {
        return Err(ExportError::Geometry(format!(
            "no printable area on a {}x{} page with margin {}",
            page.width, page.height, page.margin
        )));
    }

    let (w, h) = (width as f32, height as f32);
    let by_width = content.width / w;
    let by_height = content.height / h;
    let scale = match mode {
        ScaleMode::Fill => by_width.max(by_height),
        ScaleMode::Fit => by_width.min(by_height),
    };

    let drawn_w = w * scale;
    let drawn_h = h * scale;
    Ok(Placement {
        scale,
        image: Rect {
            x: content.x + (content.width - drawn_w) / 2.0,
            y: content.y + (content.height - drawn_h) / 2.0,
            width: drawn_w,
            height: drawn_h,
        },
        clip: content,
    })
}

/// Shrink `img` so its longest edge is at most `max_edge`
pub fn constrain(img: DynamicImage, max_edge: u32) -> DynamicImage {
    if img.width().max(img.height()) <= max_edge {
        return img;
    }
    img.resize(max_edge, max_edge, FilterType::Triangle)
}

/// Everything needed to turn a raster into a printed page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintJob {
    pub page: PageGeometry,
    pub mode: ScaleMode,
    pub jpeg_quality: u8,
}

impl Default for PrintJob {
    fn default() -> Self {
        Self {
            page: PageGeometry::a4(18.0),
            mode: ScaleMode::Fill,
            jpeg_quality: 90,
        }
    }
}

/// Write `raster` as a single-page PDF to `out`
pub fn write_pdf<W: Write>(out: W, raster: &DynamicImage, job: &PrintJob) -> Result<(), ExportError> {
    let rgb = raster.to_rgb8();
    let placement = compute_placement(rgb.width(), rgb.height(), &job.page, job.mode)?;

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, job.jpeg_quality.clamp(1, 100)).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;

    let Placement { image, clip, scale } = placement;
    let content = format!(
        "q\n{:.2} {:.2} {:.2} {:.2} re W n\n{:.2} 0 0 {:.2} {:.2} {:.2} cm\n/Im0 Do\nQ\n",
        clip.x, clip.y, clip.width, clip.height, image.width, image.height, image.x, image.y
    );
    debug!(scale, width = rgb.width(), height = rgb.height(), jpeg_bytes = jpeg.len(), "page laid out");

    let mut pdf = PdfWriter::new(out);
    pdf.raw(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n")?;
    pdf.object(1, b"<< /Type /Catalog /Pages 2 0 R >>")?;
    pdf.object(2, b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>")?;
    pdf.object(
        3,
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] \
             /Resources << /XObject << /Im0 4 0 R >> >> /Contents 5 0 R >>",
            job.page.width, job.page.height
        )
        .as_bytes(),
    )?;
    pdf.stream(
        4,
        &format!(
            "/Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB \
             /BitsPerComponent 8 /Filter /DCTDecode",
            rgb.width(),
            rgb.height()
        ),
        &jpeg,
    )?;
    pdf.stream(5, "", content.as_bytes())?;
    pdf.finish()?;
    Ok(())
}

/// Constrain `raster` and print it to a PDF file at `path`
pub fn print_to_file(path: &Path, raster: DynamicImage, job: &PrintJob) -> Result<(), ExportError> {
    let raster = constrain(raster, MAX_PRINT_SIZE);
    let file = BufWriter::new(File::create(path)?);
    write_pdf(file, &raster, job)?;
    info!(path = %path.display(), "page written");
    Ok(())
}

/// Emits numbered objects and remembers their offsets for the xref table
struct PdfWriter<W: Write> {
    out: W,
    written: usize,
    offsets: Vec<usize>,
}

impl<W: Write> PdfWriter<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            written: 0,
            offsets: Vec::new(),
        }
    }

    fn raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.written += bytes.len();
        Ok(())
    }

    /// Objects must be written in id order starting at 1
    fn begin(&mut self, id: usize) -> io::Result<()> {
        debug_assert_eq!(id, self.offsets.len() + 1);
        self.offsets.push(self.written);
        self.raw(format!("{id} 0 obj\n").as_bytes())
    }

    fn object(&mut self, id: usize, body: &[u8]) -> io::Result<()> {
        self.begin(id)?;
        self.raw(body)?;
        self.raw(b"\nendobj\n")
    }

    fn stream(&mut self, id: usize, dict: &str, data: &[u8]) -> io::Result<()> {
        self.begin(id)?;
        self.raw(format!("<< {dict} /Length {} >>\nstream\n", data.len()).as_bytes())?;
        self.raw(data)?;
        self.raw(b"\nendstream\nendobj\n")
    }

    fn finish(mut self) -> io::Result<()> {
        let xref_at = self.written;
        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", self.offsets.len() + 1);
        for offset in &self.offsets {
            table.push_str(&format!("{offset:010} 00000 n \n"));
        }
        table.push_str(&format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
            self.offsets.len() + 1
        ));
        self.raw(table.as_bytes())?;
        self.out.flush()
    }
}
