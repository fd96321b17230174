//! Demand-driven image representation.
//!
//! An [`Image`] is a [`Header`] describing the pixel shape, a [`Metadata`]
//! map, and a shared [`PixelSource`] that produces pixels for any requested
//! rectangle. Nothing is computed until someone calls [`Image::fetch`], so
//! a chain of conversions costs nothing until an encoder pulls pixels
//! through it.
//!
//! Cloning an image is the "copy" operation: the clone shares pixels with
//! the original but owns its metadata, so a saver can strip fields without
//! touching the caller's image.
//!
//! Pixels are packed band-interleaved, rows top to bottom, samples
//! native-endian.

pub mod format;
pub mod meta;

pub use format::{BandFormat, Coding, Interpretation};
pub use meta::{MetaValue, Metadata};

use crate::error::ForeignError;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Rows per strip when materializing a whole image.
const STRIP_HEIGHT: u32 = 64;

/// Largest width, height or band count a header read from outside may have.
pub const MAX_DIMENSION: u32 = 10_000_000;

/// Shape of an image's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub bands: u32,
    pub format: BandFormat,
    pub coding: Coding,
    pub interpretation: Interpretation,
    /// Horizontal resolution in pixels per millimetre.
    pub xres: f64,
    /// Vertical resolution in pixels per millimetre.
    pub yres: f64,
}

impl Header {
    pub fn new(
        width: u32,
        height: u32,
        bands: u32,
        format: BandFormat,
        interpretation: Interpretation,
    ) -> Self {
        Self {
            width,
            height,
            bands,
            format,
            coding: Coding::None,
            interpretation,
            xres: 1.0,
            yres: 1.0,
        }
    }

    /// A coded header: four uchar bands packed per pixel.
    pub fn coded(width: u32, height: u32, coding: Coding) -> Self {
        let interpretation = match coding {
            Coding::LabQ => Interpretation::LabQ,
            _ => Interpretation::SRgb,
        };
        Self {
            coding,
            ..Self::new(width, height, 4, BandFormat::UChar, interpretation)
        }
    }

    pub fn sizeof_pel(&self) -> usize {
        self.bands as usize * self.format.size()
    }

    pub fn sizeof_line(&self) -> usize {
        self.sizeof_pel() * self.width as usize
    }

    /// Uncompressed size of the whole image in bytes.
    pub fn sizeof_image(&self) -> u64 {
        self.sizeof_line() as u64 * self.height as u64
    }

    /// [`sizeof_image`](Self::sizeof_image) for untrusted headers: `None`
    /// when a dimension is over [`MAX_DIMENSION`] or the sizes overflow.
    pub fn checked_sizeof_image(&self) -> Option<u64> {
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION || self.bands > MAX_DIMENSION {
            return None;
        }
        let pel = u64::from(self.bands).checked_mul(self.format.size() as u64)?;
        let line = pel.checked_mul(u64::from(self.width))?;
        usize::try_from(line).ok()?;
        line.checked_mul(u64::from(self.height))
    }

    /// True when pixels of `other` can stand in for pixels of `self`.
    pub fn is_compatible(&self, other: &Header) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.bands == other.bands
            && self.coding == other.coding
            && self.format == other.format
    }

    /// Interpretation sanity-checked against the pixel shape, falling back
    /// to a default derived from bands and format.
    pub fn guess_interpretation(&self) -> Interpretation {
        if self.interpretation_is_sane() {
            self.interpretation
        } else {
            self.default_interpretation()
        }
    }

    fn interpretation_is_sane(&self) -> bool {
        match self.coding {
            Coding::LabQ => return self.interpretation == Interpretation::LabQ,
            Coding::Rad => return self.interpretation == Interpretation::SRgb,
            Coding::None => {}
        }
        let sixteen = matches!(self.format, BandFormat::UShort | BandFormat::Short);
        match self.interpretation {
            Interpretation::Multiband | Interpretation::BW => true,
            Interpretation::Grey16 => sixteen,
            Interpretation::Rgb16 => sixteen && self.bands >= 3,
            Interpretation::Histogram => self.height == 1 || self.width == 1,
            Interpretation::Fourier => self.format.is_complex(),
            Interpretation::Matrix => self.bands == 1,
            Interpretation::LabQ => false,
            Interpretation::LabS => self.format == BandFormat::Short && self.bands >= 3,
            Interpretation::Cmyk => self.bands >= 4,
            Interpretation::ScRgb | Interpretation::Xyz | Interpretation::Lab => {
                self.bands >= 3 && !self.format.is_8bit()
            }
            Interpretation::Lch
            | Interpretation::Cmc
            | Interpretation::Yxy
            | Interpretation::Hsv
            | Interpretation::Rgb
            | Interpretation::SRgb => self.bands >= 3,
        }
    }

    fn default_interpretation(&self) -> Interpretation {
        match self.coding {
            Coding::LabQ => return Interpretation::LabQ,
            Coding::Rad => return Interpretation::SRgb,
            Coding::None => {}
        }
        let colour = self.bands >= 3;
        match self.format {
            BandFormat::Complex | BandFormat::DpComplex => Interpretation::Fourier,
            BandFormat::UShort | BandFormat::Short if colour => Interpretation::Rgb16,
            BandFormat::UShort | BandFormat::Short => Interpretation::Grey16,
            _ if self.bands > 4 => Interpretation::Multiband,
            _ if colour => Interpretation::SRgb,
            _ => Interpretation::BW,
        }
    }

    /// Whether the last band is alpha.
    pub fn has_alpha(&self) -> bool {
        let interpretation = self.guess_interpretation();
        (self.bands == 2
            && matches!(interpretation, Interpretation::BW | Interpretation::Grey16))
            || (self.bands == 4 && interpretation != Interpretation::Cmyk)
            || self.bands > 4
    }

    /// Value of a fully opaque alpha sample.
    pub fn max_alpha(&self) -> f64 {
        match self.guess_interpretation() {
            Interpretation::Grey16 | Interpretation::Rgb16 => 65535.0,
            Interpretation::ScRgb => 1.0,
            _ => 255.0,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {}, {} band{}, {}",
            self.width,
            self.height,
            self.format,
            self.bands,
            if self.bands == 1 { "" } else { "s" },
            self.interpretation
        )?;
        if self.coding != Coding::None {
            write!(f, ", {} coded", self.coding)?;
        }
        Ok(())
    }
}

/// A rectangle of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub const fn whole(header: &Header) -> Self {
        Self::new(0, 0, header.width, header.height)
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn fits(&self, header: &Header) -> bool {
        self.left as u64 + self.width as u64 <= header.width as u64
            && self.top as u64 + self.height as u64 <= header.height as u64
    }
}

/// Produces pixels for any rectangle of an image on demand.
///
/// Implementations must be callable from several threads at once.
pub trait PixelSource: Send + Sync {
    /// Pixels for `rect`, packed row after row.
    fn fetch(&self, rect: &Rect) -> Result<Vec<u8>, ForeignError>;
}

/// Pixels held in one contiguous buffer.
pub struct MemorySource {
    line: usize,
    pel: usize,
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(header: &Header, data: Vec<u8>) -> Result<Self, ForeignError> {
        let expected = header.sizeof_image();
        if data.len() as u64 != expected {
            return Err(ForeignError::HeaderLoadMismatch(format!(
                "{} bytes of pixels for {} ({} expected)",
                data.len(),
                header,
                expected
            )));
        }
        Ok(Self {
            line: header.sizeof_line(),
            pel: header.sizeof_pel(),
            data,
        })
    }
}

impl PixelSource for MemorySource {
    fn fetch(&self, rect: &Rect) -> Result<Vec<u8>, ForeignError> {
        copy_rect(&self.data, self.line, self.pel, rect)
    }
}

/// Cut `rect` out of a packed buffer with `line` bytes per row.
pub(crate) fn copy_rect(
    data: &[u8],
    line: usize,
    pel: usize,
    rect: &Rect,
) -> Result<Vec<u8>, ForeignError> {
    let row_bytes = rect.width as usize * pel;
    let mut out = Vec::with_capacity(row_bytes * rect.height as usize);
    for y in rect.top..rect.top + rect.height {
        let start = y as usize * line + rect.left as usize * pel;
        let row = data.get(start..start + row_bytes).ok_or(ForeignError::BadRegion {
            left: rect.left,
            top: rect.top,
            width: rect.width,
            height: rect.height,
        })?;
        out.extend_from_slice(row);
    }
    Ok(out)
}

/// Header, metadata and lazily computed pixels.
#[derive(Clone)]
pub struct Image {
    header: Header,
    meta: Metadata,
    source: Arc<dyn PixelSource>,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("header", &self.header)
            .field("meta", &self.meta.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Image {
    pub fn new(header: Header, meta: Metadata, source: Arc<dyn PixelSource>) -> Self {
        Self {
            header,
            meta,
            source,
        }
    }

    /// Wrap an in-memory buffer. Fails when the buffer length disagrees
    /// with the header.
    pub fn from_memory(header: Header, data: Vec<u8>) -> Result<Self, ForeignError> {
        let source = MemorySource::new(&header, data)?;
        Ok(Self::new(header, Metadata::new(), Arc::new(source)))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn width(&self) -> u32 {
        self.header.width
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn bands(&self) -> u32 {
        self.header.bands
    }

    pub fn format(&self) -> BandFormat {
        self.header.format
    }

    pub fn coding(&self) -> Coding {
        self.header.coding
    }

    pub fn interpretation(&self) -> Interpretation {
        self.header.interpretation
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }

    pub fn source(&self) -> &Arc<dyn PixelSource> {
        &self.source
    }

    /// Same pixels, new header. The header must describe the same bytes.
    pub fn with_header(&self, header: Header) -> Image {
        Image {
            header,
            meta: self.meta.clone(),
            source: Arc::clone(&self.source),
        }
    }

    pub fn with_interpretation(&self, interpretation: Interpretation) -> Image {
        self.with_header(Header {
            interpretation,
            ..self.header
        })
    }

    /// Both images read from the same pixel source.
    pub fn same_pixels(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }

    /// Pixels may only be read top to bottom.
    pub fn is_sequential(&self) -> bool {
        self.meta.get_int(meta::SEQUENTIAL).unwrap_or(0) != 0
    }

    pub fn fetch(&self, rect: &Rect) -> Result<Vec<u8>, ForeignError> {
        if !rect.fits(&self.header) {
            return Err(ForeignError::BadRegion {
                left: rect.left,
                top: rect.top,
                width: rect.width,
                height: rect.height,
            });
        }
        self.source.fetch(rect)
    }

    /// Materialize every pixel.
    ///
    /// Strips are computed in parallel unless the image is sequential, in
    /// which case they are pulled strictly top to bottom.
    pub fn fetch_all(&self) -> Result<Vec<u8>, ForeignError> {
        let strips: Vec<Rect> = (0..self.header.height)
            .step_by(STRIP_HEIGHT as usize)
            .map(|top| {
                let height = STRIP_HEIGHT.min(self.header.height - top);
                Rect::new(0, top, self.header.width, height)
            })
            .collect();

        let chunks: Vec<Vec<u8>> = if self.is_sequential() {
            strips
                .iter()
                .map(|r| self.fetch(r))
                .collect::<Result<_, _>>()?
        } else {
            strips
                .par_iter()
                .map(|r| self.fetch(r))
                .collect::<Result<_, _>>()?
        };

        let mut data = Vec::with_capacity(self.header.sizeof_image() as usize);
        for chunk in chunks {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Copy the pixels into memory, dropping the computation behind them.
    pub fn to_memory(&self) -> Result<Image, ForeignError> {
        let data = self.fetch_all()?;
        let source = MemorySource::new(&self.header, data)?;
        Ok(Image::new(self.header, self.meta.clone(), Arc::new(source)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32, bands: u32) -> Image {
        let header = Header::new(width, height, bands, BandFormat::UChar, Interpretation::SRgb);
        let data = (0..header.sizeof_image()).map(|i| (i % 251) as u8).collect();
        Image::from_memory(header, data).unwrap()
    }

    #[test]
    fn fetch_cuts_out_rectangle() {
        let img = ramp(4, 3, 1);
        let px = img.fetch(&Rect::new(1, 1, 2, 2)).unwrap();
        assert_eq!(px, vec![5, 6, 9, 10]);
    }

    #[test]
    fn fetch_outside_image_is_bad_region() {
        let img = ramp(4, 3, 1);
        let err = img.fetch(&Rect::new(3, 0, 2, 1)).unwrap_err();
        assert!(matches!(err, ForeignError::BadRegion { .. }));
    }

    #[test]
    fn fetch_all_spans_several_strips() {
        let img = ramp(3, 150, 3);
        let all = img.fetch_all().unwrap();
        assert_eq!(all.len(), 3 * 150 * 3);
        assert_eq!(all[449], (449 % 251) as u8);
    }

    #[test]
    fn from_memory_rejects_wrong_length() {
        let header = Header::new(2, 2, 1, BandFormat::UChar, Interpretation::BW);
        assert!(Image::from_memory(header, vec![0; 3]).is_err());
    }

    #[test]
    fn checked_size_rejects_huge_headers() {
        let small = Header::new(5, 3, 2, BandFormat::Short, Interpretation::Multiband);
        assert_eq!(small.checked_sizeof_image(), Some(60));
        let over_cap = Header::new(MAX_DIMENSION + 1, 1, 1, BandFormat::UChar, Interpretation::BW);
        assert_eq!(over_cap.checked_sizeof_image(), None);
        let max = Header::new(u32::MAX, u32::MAX, u32::MAX, BandFormat::UChar, Interpretation::BW);
        assert_eq!(max.checked_sizeof_image(), None);
        let overflow = Header::new(
            MAX_DIMENSION,
            MAX_DIMENSION,
            MAX_DIMENSION,
            BandFormat::DpComplex,
            Interpretation::Multiband,
        );
        assert_eq!(overflow.checked_sizeof_image(), None);
    }

    #[test]
    fn clone_shares_pixels_but_not_metadata() {
        let img = ramp(2, 2, 3);
        let mut copy = img.clone();
        copy.meta_mut().set_int("x", 1);
        assert!(img.same_pixels(&copy));
        assert!(!img.meta().contains("x"));
    }

    #[test]
    fn guess_rejects_implausible_interpretation() {
        let cmyk_two_bands = Header::new(1, 1, 2, BandFormat::UChar, Interpretation::Cmyk);
        assert_eq!(cmyk_two_bands.guess_interpretation(), Interpretation::BW);
        let sixteen = Header::new(1, 1, 3, BandFormat::UShort, Interpretation::Grey16);
        assert_eq!(sixteen.guess_interpretation(), Interpretation::Grey16);
        let grey16_uchar = Header::new(1, 1, 1, BandFormat::UChar, Interpretation::Grey16);
        assert_eq!(grey16_uchar.guess_interpretation(), Interpretation::BW);
    }

    #[test]
    fn alpha_detection() {
        let rgba = Header::new(1, 1, 4, BandFormat::UChar, Interpretation::SRgb);
        let cmyk = Header::new(1, 1, 4, BandFormat::UChar, Interpretation::Cmyk);
        let grey_alpha = Header::new(1, 1, 2, BandFormat::UChar, Interpretation::BW);
        let rgb = Header::new(1, 1, 3, BandFormat::UChar, Interpretation::SRgb);
        assert!(rgba.has_alpha());
        assert!(!cmyk.has_alpha());
        assert!(grey_alpha.has_alpha());
        assert!(!rgb.has_alpha());
    }

    #[test]
    fn max_alpha_follows_depth() {
        let rgb16 = Header::new(1, 1, 4, BandFormat::UShort, Interpretation::Rgb16);
        assert_eq!(rgb16.max_alpha(), 65535.0);
        let srgb = Header::new(1, 1, 4, BandFormat::UChar, Interpretation::SRgb);
        assert_eq!(srgb.max_alpha(), 255.0);
    }
}
