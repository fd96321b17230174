//! PNG, JPEG, TIFF and WebP through the `image` crate.
//!
//! ## Loading
//!
//! The header step opens a decoder and reads dimensions, colour type, the
//! ICC profile and the EXIF block without touching pixel data. The decode
//! step decodes the whole image in one go.
//!
//! | `image` colour type | Bands | Format | Interpretation |
//! |---------------------|-------|--------|----------------|
//! | L8 / La8 | 1 / 2 | uchar | b-w |
//! | Rgb8 / Rgba8 | 3 / 4 | uchar | srgb |
//! | L16 / La16 | 1 / 2 | ushort | grey16 |
//! | Rgb16 / Rgba16 | 3 / 4 | ushort | rgb16 |
//! | Rgb32F / Rgba32F | 3 / 4 | float | scrgb |
//!
//! ## Saving
//!
//! Encoders write pixels and, where the encoder supports it, the ICC
//! profile. Other metadata is not written.
//!
//! | Saver | Options |
//! |-------|---------|
//! | png | `compression` 0-9 |
//! | jpeg | `Q` 1-100 (default 75) |
//! | tiff | |
//! | webp | (always lossless) |

use super::warn_unused;
use crate::error::ForeignError;
use crate::exif;
use crate::handler::{ImageInfo, LoadContext, Loader, SaveContext, Saver};
use crate::image::{meta, BandFormat, Header, Image, Interpretation, Metadata};
use crate::image::BandFormat::{UChar as UC, UShort as US};
use crate::io::{IoKind, LoadInput};
use crate::registry::{FormatDescriptor, FormatTable, RegistryBuilder, Saveable};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{self, PngEncoder};
use image::codecs::tiff::TiffEncoder;
use image::codecs::webp::WebPEncoder;
use image::{
    ColorType, DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageFormat,
    ImageReader,
};
use log::{debug, warn};
use std::io::{BufRead, Cursor, Seek};
use std::sync::Arc;

/// Bytes needed to tell the supported formats apart.
const SNIFF_LEN: usize = 16;

const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Static description of one image-crate format.
struct Codec {
    name: &'static str,
    description: &'static str,
    format: ImageFormat,
    suffixes: &'static [&'static str],
    priority: i32,
    saveable: Saveable,
    table: FormatTable,
}

const CODECS: [Codec; 4] = [
    Codec {
        name: "png",
        description: "Portable Network Graphics",
        format: ImageFormat::Png,
        suffixes: &[".png"],
        priority: 200,
        saveable: Saveable::MONO.union(Saveable::RGB).union(Saveable::ALPHA),
        table: FormatTable::new([UC, UC, US, US, US, US, UC, UC, UC, UC]),
    },
    Codec {
        name: "jpeg",
        description: "JPEG",
        format: ImageFormat::Jpeg,
        suffixes: &[".jpg", ".jpeg", ".jpe"],
        priority: 50,
        saveable: Saveable::MONO.union(Saveable::RGB),
        table: FormatTable::ALL_UCHAR,
    },
    Codec {
        name: "tiff",
        description: "Tagged Image File Format",
        format: ImageFormat::Tiff,
        suffixes: &[".tif", ".tiff"],
        priority: 50,
        saveable: Saveable::MONO.union(Saveable::RGB).union(Saveable::ALPHA),
        table: FormatTable::new([UC, UC, US, US, US, US, UC, UC, UC, UC]),
    },
    Codec {
        name: "webp",
        description: "WebP (lossless)",
        format: ImageFormat::WebP,
        suffixes: &[".webp"],
        priority: 0,
        saveable: Saveable::RGB.union(Saveable::ALPHA),
        table: FormatTable::ALL_UCHAR,
    },
];

/// Register a loader and a saver per I/O kind for every codec.
pub fn register(builder: &mut RegistryBuilder) -> Result<(), ForeignError> {
    for codec in &CODECS {
        for io in [IoKind::File, IoKind::Buffer, IoKind::Stream] {
            builder.register_loader(
                FormatDescriptor::loader(codec.name, io)
                    .description(codec.description)
                    .priority(codec.priority)
                    .suffixes(codec.suffixes)
                    .build(),
                Arc::new(CodecLoader {
                    format: codec.format,
                }),
            )?;
            builder.register_saver(
                FormatDescriptor::saver(codec.name, io)
                    .description(codec.description)
                    .priority(codec.priority)
                    .suffixes(codec.suffixes)
                    .saveable(codec.saveable)
                    .format_table(codec.table)
                    .build(),
                Arc::new(CodecSaver {
                    format: codec.format,
                }),
            )?;
        }
    }
    Ok(())
}

/// Bands, band format and interpretation for an `image` colour type.
fn shape(color: ColorType) -> Option<(u32, BandFormat, Interpretation)> {
    let shape = match color {
        ColorType::L8 => (1, UC, Interpretation::BW),
        ColorType::La8 => (2, UC, Interpretation::BW),
        ColorType::Rgb8 => (3, UC, Interpretation::SRgb),
        ColorType::Rgba8 => (4, UC, Interpretation::SRgb),
        ColorType::L16 => (1, US, Interpretation::Grey16),
        ColorType::La16 => (2, US, Interpretation::Grey16),
        ColorType::Rgb16 => (3, US, Interpretation::Rgb16),
        ColorType::Rgba16 => (4, US, Interpretation::Rgb16),
        ColorType::Rgb32F => (3, BandFormat::Float, Interpretation::ScRgb),
        ColorType::Rgba32F => (4, BandFormat::Float, Interpretation::ScRgb),
        _ => return None,
    };
    Some(shape)
}

/// Encoder colour type for a ready image.
fn extended_color(header: &Header) -> Option<ExtendedColorType> {
    let color = match (header.bands, header.format) {
        (1, UC) => ExtendedColorType::L8,
        (2, UC) => ExtendedColorType::La8,
        (3, UC) => ExtendedColorType::Rgb8,
        (4, UC) => ExtendedColorType::Rgba8,
        (1, US) => ExtendedColorType::L16,
        (2, US) => ExtendedColorType::La16,
        (3, US) => ExtendedColorType::Rgb16,
        (4, US) => ExtendedColorType::Rgba16,
        (3, BandFormat::Float) => ExtendedColorType::Rgb32F,
        (4, BandFormat::Float) => ExtendedColorType::Rgba32F,
        _ => return None,
    };
    Some(color)
}

// =============================================================================
// Loader
// =============================================================================

pub struct CodecLoader {
    format: ImageFormat,
}

impl Loader for CodecLoader {
    fn is_a(&self, input: &LoadInput) -> Result<bool, ForeignError> {
        let head = input.sniff(SNIFF_LEN)?;
        Ok(image::guess_format(&head).is_ok_and(|f| f == self.format))
    }

    fn header(&self, ctx: &LoadContext) -> Result<ImageInfo, ForeignError> {
        match ctx.input {
            LoadInput::File(path) => read_info(ImageReader::open(path)?, self.format, ctx),
            other => read_info(
                ImageReader::new(Cursor::new(other.read_all()?)),
                self.format,
                ctx,
            ),
        }
    }

    fn decode(&self, ctx: &LoadContext) -> Result<Image, ForeignError> {
        warn_unused(ctx.name, ctx.options);
        let decoded = match ctx.input {
            LoadInput::File(path) => decode(ImageReader::open(path)?, self.format, ctx)?,
            other => decode(
                ImageReader::new(Cursor::new(other.read_all()?)),
                self.format,
                ctx,
            )?,
        };
        to_image(decoded, ctx)
    }
}

fn read_info<R: BufRead + Seek>(
    mut reader: ImageReader<R>,
    format: ImageFormat,
    ctx: &LoadContext,
) -> Result<ImageInfo, ForeignError> {
    reader.set_format(format);
    let mut decoder = reader.into_decoder().map_err(|e| ctx.decode_error(e))?;
    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    let (bands, band_format, interpretation) = shape(color)
        .ok_or_else(|| ctx.decode_error(format!("unsupported colour type {color:?}")))?;
    let mut header = Header::new(width, height, bands, band_format, interpretation);
    let mut metadata = Metadata::new();

    match decoder.icc_profile() {
        Ok(Some(profile)) => metadata.set_blob(meta::ICC, profile),
        Ok(None) => {}
        Err(e) => warn!("{}: unreadable ICC profile: {e}", ctx.name),
    }
    match decoder.exif_metadata() {
        Ok(Some(blob)) => exif::attach(&mut metadata, &mut header, &blob),
        Ok(None) => {}
        Err(e) => warn!("{}: unreadable EXIF: {e}", ctx.name),
    }
    Ok(ImageInfo::new(header, metadata))
}

fn decode<R: BufRead + Seek>(
    mut reader: ImageReader<R>,
    format: ImageFormat,
    ctx: &LoadContext,
) -> Result<DynamicImage, ForeignError> {
    reader.set_format(format);
    reader.decode().map_err(|e| ctx.decode_error(e))
}

fn to_image(decoded: DynamicImage, ctx: &LoadContext) -> Result<Image, ForeignError> {
    let color = decoded.color();
    let (bands, format, interpretation) = shape(color)
        .ok_or_else(|| ctx.decode_error(format!("unsupported colour type {color:?}")))?;
    let header = Header::new(decoded.width(), decoded.height(), bands, format, interpretation);
    Image::from_memory(header, decoded.as_bytes().to_vec())
}

// =============================================================================
// Saver
// =============================================================================

pub struct CodecSaver {
    format: ImageFormat,
}

impl Saver for CodecSaver {
    fn save(&self, ready: &Image, ctx: &mut SaveContext) -> Result<(), ForeignError> {
        let header = ready.header();
        let color = extended_color(header)
            .ok_or_else(|| ctx.encode_error(format!("cannot write {header}")))?;
        let mut options = ctx.options.clone();
        let pixels = ready.fetch_all()?;
        let icc = ready.meta().get_blob(meta::ICC).map(<[u8]>::to_vec);

        let mut out = Cursor::new(Vec::new());
        let written = match self.format {
            ImageFormat::Png => {
                let compression = match options.take_parsed::<u8>("compression")? {
                    None => png::CompressionType::Default,
                    Some(0..=3) => png::CompressionType::Fast,
                    Some(4..=6) => png::CompressionType::Default,
                    Some(7..=9) => png::CompressionType::Best,
                    Some(n) => {
                        return Err(ForeignError::bad_option(
                            "compression",
                            format!("{n} is not in 0-9"),
                        ));
                    }
                };
                let encoder =
                    PngEncoder::new_with_quality(&mut out, compression, png::FilterType::Adaptive);
                write(encoder, icc, &pixels, header, color, ctx.name)
            }
            ImageFormat::Jpeg => {
                let quality = options
                    .take_parsed::<u8>("q")?
                    .unwrap_or(DEFAULT_JPEG_QUALITY);
                if !(1..=100).contains(&quality) {
                    return Err(ForeignError::bad_option(
                        "Q",
                        format!("{quality} is not in 1-100"),
                    ));
                }
                let encoder = JpegEncoder::new_with_quality(&mut out, quality);
                write(encoder, icc, &pixels, header, color, ctx.name)
            }
            ImageFormat::Tiff => write(TiffEncoder::new(&mut out), icc, &pixels, header, color, ctx.name),
            ImageFormat::WebP => write(
                WebPEncoder::new_lossless(&mut out),
                icc,
                &pixels,
                header,
                color,
                ctx.name,
            ),
            other => return Err(ctx.encode_error(format!("no encoder for {other:?}"))),
        };
        written.map_err(|e| ctx.encode_error(e))?;
        warn_unused(ctx.name, &options);
        ctx.target.write_encoded(out.get_ref())
    }
}

fn write(
    mut encoder: impl ImageEncoder,
    icc: Option<Vec<u8>>,
    pixels: &[u8],
    header: &Header,
    color: ExtendedColorType,
    name: &str,
) -> image::ImageResult<()> {
    if let Some(profile) = icc
        && encoder.set_icc_profile(profile).is_err()
    {
        debug!("{name}: encoder cannot embed an ICC profile");
    }
    encoder.write_image(pixels, header.width, header.height, color)
}
