//! The native `.nimg` container.
//!
//! Stores any image the pipeline can hold: every band format, LabQ and
//! Radiance coding, resolution and the complete metadata map. Pixels are
//! uncompressed, so a file or buffer can be read a region at a time; the
//! loader reports itself as `partial` for those inputs.
//!
//! ## Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | `NIMG` |
//! | 4 | 1 | version (1) |
//! | 5 | 1 | byte order: `I` little, `M` big |
//! | 6 | 1 | band format, promotion-table index |
//! | 7 | 1 | coding: 0 none, 1 LabQ, 2 Radiance |
//! | 8 | 12 | width, height, bands (u32) |
//! | 20 | 16 | x and y resolution, pixels per mm (f64) |
//! | 36 | 1 + n | interpretation name, length prefixed |
//! | .. | image size | pixels, band interleaved |
//! | .. | .. | metadata: u32 count, then per field u16 name length, name, u8 kind, u32 value length, value |
//!
//! Numbers use the byte order in the header. Files are written in the
//! machine's order; files from a machine of the other order are swapped
//! while reading.

use super::warn_unused;
use crate::error::ForeignError;
use crate::handler::{ImageInfo, LoadContext, Loader, SaveContext, Saver};
use crate::image::{
    copy_rect, meta, BandFormat, Coding, Header, Image, Interpretation, MetaValue, Metadata,
    PixelSource, Rect,
};
use crate::io::{IoKind, LoadInput};
use crate::registry::{CodingSet, ForeignFlags, FormatDescriptor, FormatTable, RegistryBuilder};
use log::warn;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

const MAGIC: &[u8; 4] = b"NIMG";
const VERSION: u8 = 1;
const SUFFIX: &str = ".nimg";

const KIND_INT: u8 = 0;
const KIND_DOUBLE: u8 = 1;
const KIND_STR: u8 = 2;
const KIND_BLOB: u8 = 3;

pub fn register(builder: &mut RegistryBuilder) -> Result<(), ForeignError> {
    for io in [IoKind::File, IoKind::Buffer, IoKind::Stream] {
        builder.register_loader(
            FormatDescriptor::loader("nimg", io)
                .description("imgport native")
                .priority(200)
                .suffixes(&[SUFFIX])
                .build(),
            Arc::new(NativeLoader),
        )?;
        builder.register_saver(
            FormatDescriptor::saver("nimg", io)
                .description("imgport native")
                .priority(200)
                .suffixes(&[SUFFIX])
                .format_table(FormatTable::IDENTITY)
                .coding(CodingSet::NONE | CodingSet::LABQ | CodingSet::RAD)
                .build(),
            Arc::new(NativeSaver),
        )?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Little,
    Big,
}

impl Order {
    const NATIVE: Order = if cfg!(target_endian = "big") {
        Order::Big
    } else {
        Order::Little
    };

    fn tag(self) -> u8 {
        match self {
            Order::Little => b'I',
            Order::Big => b'M',
        }
    }

    fn from_tag(tag: u8) -> Option<Order> {
        match tag {
            b'I' => Some(Order::Little),
            b'M' => Some(Order::Big),
            _ => None,
        }
    }

    /// Put `bytes`, given in native order, into this order.
    fn arrange<const N: usize>(self, mut bytes: [u8; N]) -> [u8; N] {
        if self != Order::NATIVE {
            bytes.reverse();
        }
        bytes
    }
}

fn coding_code(coding: Coding) -> u8 {
    match coding {
        Coding::None => 0,
        Coding::LabQ => 1,
        Coding::Rad => 2,
    }
}

fn coding_from_code(code: u8) -> Option<Coding> {
    match code {
        0 => Some(Coding::None),
        1 => Some(Coding::LabQ),
        2 => Some(Coding::Rad),
        _ => None,
    }
}

/// Reverse every sample in `data` in place.
fn swap_samples(data: &mut [u8], format: BandFormat) {
    let width = if format.is_complex() {
        format.size() / 2
    } else {
        format.size()
    };
    if width > 1 {
        for sample in data.chunks_exact_mut(width) {
            sample.reverse();
        }
    }
}

// =============================================================================
// Reading
// =============================================================================

struct Fields<'a, R> {
    reader: &'a mut R,
    order: Order,
}

impl<R: Read> Fields<'_, R> {
    fn bytes<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf)?;
        Ok(self.order.arrange(buf))
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u16(&mut self) -> io::Result<u16> {
        self.bytes().map(u16::from_ne_bytes)
    }

    fn u32(&mut self) -> io::Result<u32> {
        self.bytes().map(u32::from_ne_bytes)
    }

    fn i64(&mut self) -> io::Result<i64> {
        self.bytes().map(i64::from_ne_bytes)
    }

    fn f64(&mut self) -> io::Result<f64> {
        self.bytes().map(f64::from_ne_bytes)
    }

    fn vec(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
        if buf.len() < len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(buf)
    }

    fn string(&mut self, len: usize) -> io::Result<String> {
        String::from_utf8(self.vec(len)?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Everything in a file except the pixels.
#[derive(Debug)]
struct Layout {
    header: Header,
    order: Order,
    /// Offset of the first pixel.
    pixels: u64,
    meta: Metadata,
}

fn read_error(name: &str, e: io::Error) -> ForeignError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => ForeignError::decode(name, "file is truncated"),
        io::ErrorKind::InvalidData => ForeignError::decode(name, e),
        _ => e.into(),
    }
}

fn read_layout<R: Read + Seek>(reader: &mut R, name: &str) -> Result<Layout, ForeignError> {
    let bad = |message: String| ForeignError::decode(name, message);

    let mut start = [0u8; 6];
    reader.read_exact(&mut start).map_err(|e| read_error(name, e))?;
    if &start[..4] != MAGIC {
        return Err(bad("not a native image".to_string()));
    }
    if start[4] != VERSION {
        return Err(bad(format!("unsupported version {}", start[4])));
    }
    let order = Order::from_tag(start[5]).ok_or_else(|| bad("bad byte order tag".to_string()))?;

    let mut fields = Fields { reader, order };
    let header = read_header(&mut fields, name)?;

    let pixels = fields
        .reader
        .stream_position()
        .map_err(|e| read_error(name, e))?;
    let end = pixel_end(pixels, &header).ok_or_else(|| bad("image too large".to_string()))?;
    fields
        .reader
        .seek(SeekFrom::Start(end))
        .map_err(|e| read_error(name, e))?;
    let meta = read_meta(&mut fields).map_err(|e| read_error(name, e))?;

    Ok(Layout {
        header,
        order,
        pixels,
        meta,
    })
}

struct RawHeader {
    format: u8,
    coding: u8,
    width: u32,
    height: u32,
    bands: u32,
    xres: f64,
    yres: f64,
    interpretation: String,
}

fn read_header<R: Read>(fields: &mut Fields<'_, R>, name: &str) -> Result<Header, ForeignError> {
    let raw = (|| -> io::Result<RawHeader> {
        Ok(RawHeader {
            format: fields.u8()?,
            coding: fields.u8()?,
            width: fields.u32()?,
            height: fields.u32()?,
            bands: fields.u32()?,
            xres: fields.f64()?,
            yres: fields.f64()?,
            interpretation: {
                let len = fields.u8()? as usize;
                fields.string(len)?
            },
        })
    })()
    .map_err(|e| read_error(name, e))?;

    let bad = |message: String| ForeignError::decode(name, message);
    let format = BandFormat::ALL
        .get(raw.format as usize)
        .copied()
        .ok_or_else(|| bad(format!("bad band format {}", raw.format)))?;
    let coding = coding_from_code(raw.coding).ok_or_else(|| bad(format!("bad coding {}", raw.coding)))?;
    let interpretation = Interpretation::from_name(&raw.interpretation)
        .ok_or_else(|| bad(format!("unknown interpretation \"{}\"", raw.interpretation)))?;
    let (width, height, bands) = (raw.width, raw.height, raw.bands);
    if width == 0 || height == 0 || bands == 0 {
        return Err(bad(format!("empty image {width}x{height}x{bands}")));
    }
    if coding != Coding::None && (bands != 4 || format != BandFormat::UChar) {
        return Err(bad(format!("{coding} coding needs 4 uchar bands")));
    }
    let header = Header {
        coding,
        xres: raw.xres,
        yres: raw.yres,
        ..Header::new(width, height, bands, format, interpretation)
    };
    if header.checked_sizeof_image().is_none() {
        return Err(bad(format!("image too large {width}x{height}x{bands}")));
    }
    Ok(header)
}

/// Offset just past the pixels, if it fits.
fn pixel_end(pixels: u64, header: &Header) -> Option<u64> {
    pixels.checked_add(header.checked_sizeof_image()?)
}

fn read_meta<R: Read>(fields: &mut Fields<'_, R>) -> io::Result<Metadata> {
    let mut meta = Metadata::new();
    let count = fields.u32()?;
    for _ in 0..count {
        let name_len = fields.u16()? as usize;
        let name = fields.string(name_len)?;
        let kind = fields.u8()?;
        let len = fields.u32()? as usize;
        let value = match kind {
            KIND_INT if len == 8 => MetaValue::Int(fields.i64()?),
            KIND_DOUBLE if len == 8 => MetaValue::Double(fields.f64()?),
            KIND_STR => MetaValue::Str(fields.string(len)?),
            KIND_BLOB => MetaValue::Blob(fields.vec(len)?.into()),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad metadata field \"{name}\""),
                ));
            }
        };
        meta.set(name, value);
    }
    Ok(meta)
}

/// Open the input and read its layout.
fn layout_of(input: &LoadInput, name: &str) -> Result<Layout, ForeignError> {
    match input {
        LoadInput::File(path) => read_layout(&mut BufReader::new(File::open(path)?), name),
        LoadInput::Buffer(bytes) => read_layout(&mut Cursor::new(Arc::clone(bytes)), name),
        LoadInput::Source(source) => read_layout(&mut Cursor::new(source.read_all()?), name),
    }
}

// =============================================================================
// Loader
// =============================================================================

pub struct NativeLoader;

impl Loader for NativeLoader {
    fn is_a(&self, input: &LoadInput) -> Result<bool, ForeignError> {
        Ok(input.sniff(MAGIC.len())?.as_slice() == MAGIC)
    }

    fn flags(&self, input: &LoadInput) -> ForeignFlags {
        let big_endian = input
            .sniff(6)
            .ok()
            .and_then(|head| head.get(5).copied())
            .is_some_and(|tag| Order::from_tag(tag) == Some(Order::Big));
        let partial = matches!(input, LoadInput::File(_) | LoadInput::Buffer(_));
        ForeignFlags::new()
            .with_partial(partial)
            .with_big_endian(big_endian)
    }

    fn header(&self, ctx: &LoadContext) -> Result<ImageInfo, ForeignError> {
        let layout = layout_of(ctx.input, ctx.name)?;
        Ok(ImageInfo::new(layout.header, layout.meta))
    }

    fn decode(&self, ctx: &LoadContext) -> Result<Image, ForeignError> {
        warn_unused(ctx.name, ctx.options);
        let layout = layout_of(ctx.input, ctx.name)?;
        let header = layout.header;
        let swap = (layout.order != Order::NATIVE).then_some(header.format);

        let source: Arc<dyn PixelSource> = match ctx.input {
            LoadInput::File(path) => Arc::new(FilePixels::new(
                File::open(path)?,
                layout.pixels,
                &header,
                swap,
            )),
            LoadInput::Buffer(bytes) => {
                let end = pixel_end(layout.pixels, &header)
                    .ok_or_else(|| ctx.decode_error("image too large"))?;
                if (bytes.len() as u64) < end {
                    return Err(ctx.decode_error("file is truncated"));
                }
                Arc::new(BufferPixels {
                    bytes: Arc::clone(bytes),
                    offset: layout.pixels as usize,
                    line: header.sizeof_line(),
                    pel: header.sizeof_pel(),
                    swap,
                })
            }
            LoadInput::Source(source) => {
                let all = source.read_all()?;
                let end = pixel_end(layout.pixels, &header)
                    .and_then(|end| usize::try_from(end).ok())
                    .ok_or_else(|| ctx.decode_error("image too large"))?;
                let mut data = all
                    .get(layout.pixels as usize..end)
                    .ok_or_else(|| ctx.decode_error("file is truncated"))?
                    .to_vec();
                if let Some(format) = swap {
                    swap_samples(&mut data, format);
                }
                return Image::from_memory(header, data);
            }
        };
        Ok(Image::new(header, Metadata::new(), source))
    }
}

/// Rows read from the file on demand.
pub(super) struct FilePixels {
    file: Mutex<File>,
    offset: u64,
    line: usize,
    pel: usize,
    swap: Option<BandFormat>,
}

impl FilePixels {
    /// Pixels of `header` packed from `offset`, samples swapped as `swap`
    /// when given.
    pub(super) fn new(file: File, offset: u64, header: &Header, swap: Option<BandFormat>) -> Self {
        Self {
            file: Mutex::new(file),
            offset,
            line: header.sizeof_line(),
            pel: header.sizeof_pel(),
            swap,
        }
    }
}

impl PixelSource for FilePixels {
    fn fetch(&self, rect: &Rect) -> Result<Vec<u8>, ForeignError> {
        let row_bytes = rect.width as usize * self.pel;
        let mut out = vec![0u8; row_bytes * rect.height as usize];
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        for (i, row) in out.chunks_exact_mut(row_bytes.max(1)).enumerate() {
            let y = u64::from(rect.top) + i as u64;
            let at = self.offset + y * self.line as u64 + u64::from(rect.left) * self.pel as u64;
            file.seek(SeekFrom::Start(at))?;
            file.read_exact(row)?;
        }
        if let Some(format) = self.swap {
            swap_samples(&mut out, format);
        }
        Ok(out)
    }
}

/// Regions cut straight out of the loaded buffer.
struct BufferPixels {
    bytes: Arc<[u8]>,
    offset: usize,
    line: usize,
    pel: usize,
    swap: Option<BandFormat>,
}

impl PixelSource for BufferPixels {
    fn fetch(&self, rect: &Rect) -> Result<Vec<u8>, ForeignError> {
        let mut out = copy_rect(&self.bytes[self.offset..], self.line, self.pel, rect)?;
        if let Some(format) = self.swap {
            swap_samples(&mut out, format);
        }
        Ok(out)
    }
}

// =============================================================================
// Saver
// =============================================================================

pub struct NativeSaver;

impl Saver for NativeSaver {
    fn save(&self, ready: &Image, ctx: &mut SaveContext) -> Result<(), ForeignError> {
        warn_unused(ctx.name, ctx.options);
        let bytes = encode(ready, Order::NATIVE, ctx.name)?;
        ctx.target.write_encoded(&bytes)
    }
}

struct Writer {
    out: Vec<u8>,
    order: Order,
}

impl Writer {
    fn put<const N: usize>(&mut self, native: [u8; N]) {
        self.out.extend_from_slice(&self.order.arrange(native));
    }
}

fn encode(image: &Image, order: Order, name: &str) -> Result<Vec<u8>, ForeignError> {
    let header = image.header();
    let mut w = Writer {
        out: Vec::with_capacity(64 + header.sizeof_image() as usize),
        order,
    };
    w.out.extend_from_slice(MAGIC);
    w.out.push(VERSION);
    w.out.push(order.tag());
    w.out.push(header.format.index() as u8);
    w.out.push(coding_code(header.coding));
    w.put(header.width.to_ne_bytes());
    w.put(header.height.to_ne_bytes());
    w.put(header.bands.to_ne_bytes());
    w.put(header.xres.to_ne_bytes());
    w.put(header.yres.to_ne_bytes());
    let interpretation = header.interpretation.name();
    w.out.push(interpretation.len() as u8);
    w.out.extend_from_slice(interpretation.as_bytes());

    let mut pixels = image.fetch_all()?;
    if order != Order::NATIVE {
        swap_samples(&mut pixels, header.format);
    }
    w.out.extend_from_slice(&pixels);
    drop(pixels);

    let fields: Vec<(&str, &MetaValue)> = image
        .meta()
        .iter()
        .filter(|(key, _)| *key != meta::SEQUENTIAL)
        .filter(|(key, value)| {
            let fits = key.len() <= usize::from(u16::MAX) && value_len(value) <= u32::MAX as usize;
            if !fits {
                warn!("{name}: field \"{key}\" too large to store");
            }
            fits
        })
        .collect();
    w.put((fields.len() as u32).to_ne_bytes());
    for (key, value) in fields {
        w.put((key.len() as u16).to_ne_bytes());
        w.out.extend_from_slice(key.as_bytes());
        let (kind, len) = match value {
            MetaValue::Int(_) => (KIND_INT, 8),
            MetaValue::Double(_) => (KIND_DOUBLE, 8),
            MetaValue::Str(s) => (KIND_STR, s.len()),
            MetaValue::Blob(b) => (KIND_BLOB, b.len()),
        };
        w.out.push(kind);
        w.put((len as u32).to_ne_bytes());
        match value {
            MetaValue::Int(v) => w.put(v.to_ne_bytes()),
            MetaValue::Double(v) => w.put(v.to_ne_bytes()),
            MetaValue::Str(s) => w.out.extend_from_slice(s.as_bytes()),
            MetaValue::Blob(b) => w.out.extend_from_slice(b),
        }
    }
    Ok(w.out)
}

fn value_len(value: &MetaValue) -> usize {
    match value {
        MetaValue::Int(_) | MetaValue::Double(_) => 8,
        MetaValue::Str(s) => s.len(),
        MetaValue::Blob(b) => b.len(),
    }
}
