//! Minimal EXIF reader and writer.
//!
//! An EXIF blob is a TIFF structure, optionally prefixed with `Exif\0\0`:
//! a byte-order mark (`II` or `MM`), the magic 42, and a chain of IFDs
//! (image file directories). Each IFD entry is 12 bytes: tag, type, value
//! count, then either the value itself (4 bytes or less) or an offset to it.
//! Three tags in IFD0 and the Exif IFD point at sub-IFDs:
//!
//! | Tag | Sub-IFD | Field prefix |
//! |-----|---------|--------------|
//! | 0x8769 | Exif | `exif-ifd2-` |
//! | 0x8825 | GPS | `exif-ifd3-` |
//! | 0xA005 | Interoperability | `exif-ifd4-` |
//!
//! Loaders call [`attach`] to store the blob as `exif-data` and expose
//! the tags they understand as `exif-ifd<N>-<Name>` string fields. Before a
//! save, [`update`] writes the image's current orientation, resolution,
//! dimensions and any edited text fields back into IFD0 and the Exif IFD,
//! keeping every other tag and sub-IFD as it was, in the original byte order.
//!
//! Only IFD0 and its sub-IFDs are read. IFD1, the thumbnail directory that
//! follows IFD0, is not parsed, so a rewritten blob ends after IFD0 and
//! the embedded JPEG thumbnail is gone.

use crate::error::ForeignError;
use crate::image::{meta, Header, Metadata};
use log::{debug, warn};

const PREFIX: &[u8] = b"Exif\0\0";
const FIELD_PREFIX: &str = "exif-ifd";

const EXIF_POINTER: u16 = 0x8769;
const GPS_POINTER: u16 = 0x8825;
const INTEROP_POINTER: u16 = 0xA005;

const ORIENTATION: u16 = 0x0112;
const X_RESOLUTION: u16 = 0x011A;
const Y_RESOLUTION: u16 = 0x011B;
const RESOLUTION_UNIT: u16 = 0x0128;
const PIXEL_X_DIMENSION: u16 = 0xA002;
const PIXEL_Y_DIMENSION: u16 = 0xA003;

// TIFF field types
const BYTE: u16 = 1;
const ASCII: u16 = 2;
const SHORT: u16 = 3;
const LONG: u16 = 4;
const RATIONAL: u16 = 5;
const UNDEFINED: u16 = 7;
const SLONG: u16 = 9;
const SRATIONAL: u16 = 10;

/// Sub-IFD nesting deeper than this is treated as corrupt.
const MAX_DEPTH: usize = 4;

/// IFD numbering used in field names.
const IFD0: u8 = 0;
const IFD_EXIF: u8 = 2;
const IFD_GPS: u8 = 3;
const IFD_INTEROP: u8 = 4;

struct TagInfo {
    ifd: u8,
    tag: u16,
    name: &'static str,
    /// ASCII tag that [`update`] may rewrite from its field.
    text: bool,
}

const fn tag(ifd: u8, tag: u16, name: &'static str) -> TagInfo {
    TagInfo {
        ifd,
        tag,
        name,
        text: false,
    }
}

const fn text(ifd: u8, tag: u16, name: &'static str) -> TagInfo {
    TagInfo {
        ifd,
        tag,
        name,
        text: true,
    }
}

static TAGS: &[TagInfo] = &[
    text(IFD0, 0x010E, "ImageDescription"),
    text(IFD0, 0x010F, "Make"),
    text(IFD0, 0x0110, "Model"),
    tag(IFD0, ORIENTATION, "Orientation"),
    tag(IFD0, X_RESOLUTION, "XResolution"),
    tag(IFD0, Y_RESOLUTION, "YResolution"),
    tag(IFD0, RESOLUTION_UNIT, "ResolutionUnit"),
    text(IFD0, 0x0131, "Software"),
    text(IFD0, 0x0132, "DateTime"),
    text(IFD0, 0x013B, "Artist"),
    text(IFD0, 0x8298, "Copyright"),
    tag(IFD_EXIF, 0x829A, "ExposureTime"),
    tag(IFD_EXIF, 0x829D, "FNumber"),
    tag(IFD_EXIF, 0x8827, "ISOSpeedRatings"),
    tag(IFD_EXIF, 0x9000, "ExifVersion"),
    text(IFD_EXIF, 0x9003, "DateTimeOriginal"),
    text(IFD_EXIF, 0x9004, "DateTimeDigitized"),
    tag(IFD_EXIF, 0x920A, "FocalLength"),
    tag(IFD_EXIF, 0xA001, "ColorSpace"),
    tag(IFD_EXIF, PIXEL_X_DIMENSION, "PixelXDimension"),
    tag(IFD_EXIF, PIXEL_Y_DIMENSION, "PixelYDimension"),
    text(IFD_EXIF, 0xA434, "LensModel"),
    text(IFD_GPS, 0x0001, "GPSLatitudeRef"),
    tag(IFD_GPS, 0x0002, "GPSLatitude"),
    text(IFD_GPS, 0x0003, "GPSLongitudeRef"),
    tag(IFD_GPS, 0x0004, "GPSLongitude"),
    text(IFD_INTEROP, 0x0001, "InteroperabilityIndex"),
];

fn type_size(kind: u16) -> usize {
    match kind {
        1 | 2 | 6 | 7 => 1,
        3 | 8 => 2,
        4 | 9 | 11 | 13 => 4,
        5 | 10 | 12 => 8,
        _ => 1,
    }
}

fn type_name(kind: u16) -> &'static str {
    match kind {
        BYTE => "Byte",
        ASCII => "ASCII",
        SHORT => "Short",
        LONG => "Long",
        RATIONAL => "Rational",
        UNDEFINED => "Undefined",
        SLONG => "SLong",
        SRATIONAL => "SRational",
        _ => "Unknown",
    }
}

fn sub_ifd_number(pointer: u16) -> Option<u8> {
    match pointer {
        EXIF_POINTER => Some(IFD_EXIF),
        GPS_POINTER => Some(IFD_GPS),
        INTEROP_POINTER => Some(IFD_INTEROP),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteOrder {
    big_endian: bool,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        let b = [b[0], b[1]];
        if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let b = [b[0], b[1], b[2], b[3]];
        if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        }
    }

    fn u16_bytes(self, v: u16) -> [u8; 2] {
        if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    }

    fn u32_bytes(self, v: u32) -> [u8; 4] {
        if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    tag: u16,
    kind: u16,
    count: u32,
    /// Raw value bytes, in the blob's byte order.
    value: Vec<u8>,
    sub: Option<Ifd>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Ifd {
    entries: Vec<Entry>,
}

impl Ifd {
    fn get(&self, tag: u16) -> Option<&Entry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    fn set(&mut self, entry: Entry) {
        match self.entries.iter_mut().find(|e| e.tag == entry.tag) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    fn remove(&mut self, tag: u16) {
        self.entries.retain(|e| e.tag != tag);
    }

    fn sub(&self, pointer: u16) -> Option<&Ifd> {
        self.get(pointer).and_then(|e| e.sub.as_ref())
    }

    fn sub_mut(&mut self, pointer: u16) -> Option<&mut Ifd> {
        self.entries
            .iter_mut()
            .find(|e| e.tag == pointer)
            .and_then(|e| e.sub.as_mut())
    }
}

/// A parsed EXIF blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Exif {
    order: ByteOrder,
    ifd0: Ifd,
}

impl Default for Exif {
    fn default() -> Self {
        Self::new()
    }
}

impl Exif {
    /// An empty little-endian blob.
    pub fn new() -> Self {
        Self {
            order: ByteOrder { big_endian: false },
            ifd0: Ifd::default(),
        }
    }

    /// Parse a blob, with or without the `Exif\0\0` prefix.
    pub fn parse(blob: &[u8]) -> Result<Self, ForeignError> {
        let tiff = blob.strip_prefix(PREFIX).unwrap_or(blob);
        if tiff.len() < 8 {
            return Err(corrupt("blob too short"));
        }
        let big_endian = match &tiff[..2] {
            b"MM" => true,
            b"II" => false,
            _ => return Err(corrupt("bad byte-order mark")),
        };
        let order = ByteOrder { big_endian };
        if order.u16(&tiff[2..4]) != 42 {
            return Err(corrupt("bad TIFF magic"));
        }
        let reader = Reader { data: tiff, order };
        let ifd0 = reader.ifd(order.u32(&tiff[4..8]) as usize, 0)?;
        Ok(Self { order, ifd0 })
    }

    pub fn is_big_endian(&self) -> bool {
        self.order.big_endian
    }

    /// Serialize with the `Exif\0\0` prefix. Only IFD0 and its sub-IFDs are
    /// written; IFD0's next-IFD offset is always 0.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(if self.order.big_endian { b"MM" } else { b"II" });
        tiff.extend_from_slice(&self.order.u16_bytes(42));
        tiff.extend_from_slice(&self.order.u32_bytes(8));
        write_ifd(&self.ifd0, &mut tiff, self.order);

        let mut blob = PREFIX.to_vec();
        blob.extend_from_slice(&tiff);
        blob
    }

    fn ifd(&self, number: u8) -> Option<&Ifd> {
        match number {
            IFD0 => Some(&self.ifd0),
            IFD_EXIF => self.ifd0.sub(EXIF_POINTER),
            IFD_GPS => self.ifd0.sub(GPS_POINTER),
            IFD_INTEROP => self.ifd0.sub(EXIF_POINTER)?.sub(INTEROP_POINTER),
            _ => None,
        }
    }

    fn ifd_mut(&mut self, number: u8) -> Option<&mut Ifd> {
        match number {
            IFD0 => Some(&mut self.ifd0),
            IFD_EXIF => self.ifd0.sub_mut(EXIF_POINTER),
            IFD_GPS => self.ifd0.sub_mut(GPS_POINTER),
            IFD_INTEROP => self.ifd0.sub_mut(EXIF_POINTER)?.sub_mut(INTEROP_POINTER),
            _ => None,
        }
    }

    fn short_entry(&self, tag: u16, v: u16) -> Entry {
        Entry {
            tag,
            kind: SHORT,
            count: 1,
            value: self.order.u16_bytes(v).to_vec(),
            sub: None,
        }
    }

    fn long_entry(&self, tag: u16, v: u32) -> Entry {
        Entry {
            tag,
            kind: LONG,
            count: 1,
            value: self.order.u32_bytes(v).to_vec(),
            sub: None,
        }
    }

    fn rational_entry(&self, tag: u16, v: f64) -> Entry {
        let denominator = 1000u32;
        let numerator = (v * f64::from(denominator)).round().clamp(0.0, f64::from(u32::MAX)) as u32;
        let mut value = self.order.u32_bytes(numerator).to_vec();
        value.extend_from_slice(&self.order.u32_bytes(denominator));
        Entry {
            tag,
            kind: RATIONAL,
            count: 1,
            value,
            sub: None,
        }
    }

    fn ascii_entry(tag: u16, text: &str) -> Entry {
        let mut value = text.as_bytes().to_vec();
        value.push(0);
        Entry {
            tag,
            kind: ASCII,
            count: value.len() as u32,
            value,
            sub: None,
        }
    }

    fn number(&self, entry: &Entry, index: usize) -> Option<f64> {
        let size = type_size(entry.kind);
        let b = entry.value.get(index * size..(index + 1) * size)?;
        match entry.kind {
            BYTE | UNDEFINED => Some(f64::from(b[0])),
            SHORT => Some(f64::from(self.order.u16(b))),
            LONG => Some(f64::from(self.order.u32(b))),
            SLONG => Some(f64::from(self.order.u32(b) as i32)),
            RATIONAL | SRATIONAL => {
                let (n, d) = (self.order.u32(&b[..4]), self.order.u32(&b[4..]));
                if d == 0 {
                    return Some(0.0);
                }
                if entry.kind == RATIONAL {
                    Some(f64::from(n) / f64::from(d))
                } else {
                    Some(f64::from(n as i32) / f64::from(d as i32))
                }
            }
            _ => None,
        }
    }

    /// Orientation tag from IFD0, 1 to 8.
    pub fn orientation(&self) -> Option<u16> {
        let entry = self.ifd0.get(ORIENTATION)?;
        self.number(entry, 0).map(|v| v as u16)
    }

    pub fn set_orientation(&mut self, orientation: u16) {
        let entry = self.short_entry(ORIENTATION, orientation);
        self.ifd0.set(entry);
    }

    /// Resolution in pixels per millimetre and the unit it was stored in.
    pub fn resolution(&self) -> Option<(f64, f64, ResolutionUnit)> {
        let x = self.number(self.ifd0.get(X_RESOLUTION)?, 0)?;
        let y = self.number(self.ifd0.get(Y_RESOLUTION)?, 0)?;
        let unit = match self
            .ifd0
            .get(RESOLUTION_UNIT)
            .and_then(|e| self.number(e, 0))
            .map(|v| v as u16)
        {
            Some(3) => ResolutionUnit::Centimetre,
            _ => ResolutionUnit::Inch,
        };
        Some((unit.to_ppmm(x), unit.to_ppmm(y), unit))
    }

    /// Store resolution given in pixels per millimetre.
    pub fn set_resolution(&mut self, xres: f64, yres: f64, unit: ResolutionUnit) {
        let x = self.rational_entry(X_RESOLUTION, unit.from_ppmm(xres));
        let y = self.rational_entry(Y_RESOLUTION, unit.from_ppmm(yres));
        let u = self.short_entry(RESOLUTION_UNIT, unit.code());
        self.ifd0.set(x);
        self.ifd0.set(y);
        self.ifd0.set(u);
    }

    /// Rewrite the pixel dimension tags, if the Exif IFD has them.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        let x = self.long_entry(PIXEL_X_DIMENSION, width);
        let y = self.long_entry(PIXEL_Y_DIMENSION, height);
        if let Some(exif) = self.ifd_mut(IFD_EXIF) {
            if exif.get(PIXEL_X_DIMENSION).is_some() {
                exif.set(x);
            }
            if exif.get(PIXEL_Y_DIMENSION).is_some() {
                exif.set(y);
            }
        }
    }

    /// Every known tag as `(field name, display value)`.
    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        for info in TAGS {
            let Some(entry) = self.ifd(info.ifd).and_then(|ifd| ifd.get(info.tag)) else {
                continue;
            };
            let value = self.display(entry);
            fields.push((
                format!("{FIELD_PREFIX}{}-{}", info.ifd, info.name),
                format!(
                    "{value} ({value}, {}, {} components, {} bytes)",
                    type_name(entry.kind),
                    entry.count,
                    entry.value.len()
                ),
            ));
        }
        fields
    }

    fn display(&self, entry: &Entry) -> String {
        match entry.kind {
            ASCII => {
                let text = entry.value.split(|b| *b == 0).next().unwrap_or_default();
                String::from_utf8_lossy(text).trim().to_string()
            }
            UNDEFINED => format!("{} bytes undefined data", entry.value.len()),
            _ => (0..entry.count as usize)
                .filter_map(|i| self.number(entry, i))
                .map(|v| format!("{}", (v * 1000.0).round() / 1000.0))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Set or remove text tags from `exif-ifd<N>-<Name>` fields in `meta`.
    fn update_text(&mut self, meta: &Metadata) {
        let has_fields = meta.keys().any(|k| k.starts_with(FIELD_PREFIX));
        if !has_fields {
            return;
        }
        for info in TAGS.iter().filter(|t| t.text) {
            let Some(ifd) = self.ifd_mut(info.ifd) else {
                continue;
            };
            let field = format!("{FIELD_PREFIX}{}-{}", info.ifd, info.name);
            match meta.get_str(&field) {
                Some(value) => ifd.set(Self::ascii_entry(info.tag, field_text(value))),
                None if ifd.get(info.tag).is_some() => ifd.remove(info.tag),
                None => {}
            }
        }
    }
}

/// Text before the ` (` that starts the type description.
fn field_text(value: &str) -> &str {
    value.split_once(" (").map_or(value, |(text, _)| text)
}

/// Units the resolution tags can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionUnit {
    Inch,
    Centimetre,
}

impl ResolutionUnit {
    /// Parse the `resolution-unit` metadata value.
    pub fn from_meta(value: Option<&str>) -> Self {
        match value {
            Some("cm") => ResolutionUnit::Centimetre,
            _ => ResolutionUnit::Inch,
        }
    }

    pub fn meta_name(self) -> &'static str {
        match self {
            ResolutionUnit::Inch => "in",
            ResolutionUnit::Centimetre => "cm",
        }
    }

    fn code(self) -> u16 {
        match self {
            ResolutionUnit::Inch => 2,
            ResolutionUnit::Centimetre => 3,
        }
    }

    fn mm(self) -> f64 {
        match self {
            ResolutionUnit::Inch => 25.4,
            ResolutionUnit::Centimetre => 10.0,
        }
    }

    fn to_ppmm(self, v: f64) -> f64 {
        v / self.mm()
    }

    fn from_ppmm(self, v: f64) -> f64 {
        v * self.mm()
    }
}

struct Reader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl Reader<'_> {
    fn slice(&self, offset: usize, len: usize) -> Result<&[u8], ForeignError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| corrupt("offset out of range"))
    }

    fn ifd(&self, offset: usize, depth: usize) -> Result<Ifd, ForeignError> {
        if depth > MAX_DEPTH {
            return Err(corrupt("IFDs nested too deeply"));
        }
        let count = self.order.u16(self.slice(offset, 2)?) as usize;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let raw = self.slice(offset + 2 + i * 12, 12)?;
            let tag = self.order.u16(&raw[0..2]);
            let kind = self.order.u16(&raw[2..4]);
            let count = self.order.u32(&raw[4..8]);
            let len = (count as usize)
                .checked_mul(type_size(kind))
                .ok_or_else(|| corrupt("value too large"))?;

            if sub_ifd_number(tag).is_some() {
                let at = self.order.u32(&raw[8..12]) as usize;
                match self.ifd(at, depth + 1) {
                    Ok(sub) => entries.push(Entry {
                        tag,
                        kind,
                        count: 1,
                        value: Vec::new(),
                        sub: Some(sub),
                    }),
                    Err(e) => debug!("exif: skipping sub-IFD {tag:#06x}: {e}"),
                }
                continue;
            }

            let value = if len <= 4 {
                raw[8..8 + len].to_vec()
            } else {
                let at = self.order.u32(&raw[8..12]) as usize;
                match self.slice(at, len) {
                    Ok(v) => v.to_vec(),
                    Err(_) => {
                        debug!("exif: skipping tag {tag:#06x} with bad offset");
                        continue;
                    }
                }
            };
            entries.push(Entry {
                tag,
                kind,
                count,
                value,
                sub: None,
            });
        }
        Ok(Ifd { entries })
    }
}

fn write_ifd(ifd: &Ifd, out: &mut Vec<u8>, order: ByteOrder) -> u32 {
    if out.len() % 2 == 1 {
        out.push(0);
    }
    let start = out.len();
    let mut entries: Vec<&Entry> = ifd.entries.iter().collect();
    entries.sort_by_key(|e| e.tag);

    out.resize(start + 2 + entries.len() * 12 + 4, 0);
    out[start..start + 2].copy_from_slice(&order.u16_bytes(entries.len() as u16));

    for (i, entry) in entries.iter().enumerate() {
        let at = start + 2 + i * 12;
        out[at..at + 2].copy_from_slice(&order.u16_bytes(entry.tag));
        out[at + 2..at + 4].copy_from_slice(&order.u16_bytes(entry.kind));
        if let Some(sub) = &entry.sub {
            out[at + 4..at + 8].copy_from_slice(&order.u32_bytes(1));
            let offset = write_ifd(sub, out, order);
            out[at + 8..at + 12].copy_from_slice(&order.u32_bytes(offset));
            continue;
        }
        out[at + 4..at + 8].copy_from_slice(&order.u32_bytes(entry.count));
        if entry.value.len() <= 4 {
            out[at + 8..at + 8 + entry.value.len()].copy_from_slice(&entry.value);
        } else {
            if out.len() % 2 == 1 {
                out.push(0);
            }
            let offset = out.len() as u32;
            out.extend_from_slice(&entry.value);
            out[at + 8..at + 12].copy_from_slice(&order.u32_bytes(offset));
        }
    }
    start as u32
}

fn corrupt(message: &str) -> ForeignError {
    ForeignError::decode("exif", message)
}

/// Store an EXIF blob on `meta` and expose its fields. Resolution found in
/// the blob is copied to `header`; orientation to the `orientation` field.
///
/// A blob that doesn't parse is kept as-is with no fields.
pub fn attach(meta: &mut Metadata, header: &mut Header, blob: &[u8]) {
    let exif = match Exif::parse(blob) {
        Ok(exif) => exif,
        Err(e) => {
            debug!("exif: {e}, keeping blob unparsed");
            meta.set_blob(meta::EXIF, blob.to_vec());
            return;
        }
    };
    let mut stored = PREFIX.to_vec();
    stored.extend_from_slice(blob.strip_prefix(PREFIX).unwrap_or(blob));
    meta.set_blob(meta::EXIF, stored);

    for (name, value) in exif.fields() {
        meta.set_str(name, value);
    }
    if let Some(orientation) = exif.orientation() {
        meta.set_int(meta::ORIENTATION, i64::from(orientation));
    }
    if let Some((xres, yres, unit)) = exif.resolution()
        && xres > 0.0
        && yres > 0.0
    {
        header.xres = xres;
        header.yres = yres;
        meta.set_str(meta::RESOLUTION_UNIT, unit.meta_name());
    }
}

/// Rebuild `exif-data` from the image's header and fields.
///
/// Images with neither an EXIF blob nor any `exif-ifd` field are left
/// alone. A blob that no longer parses is left untouched.
pub fn update(meta: &mut Metadata, header: &Header) {
    let has_fields = meta.keys().any(|k| k.starts_with(FIELD_PREFIX));
    let mut exif = match meta.get_blob(meta::EXIF) {
        Some(blob) => match Exif::parse(blob) {
            Ok(exif) => exif,
            Err(e) => {
                warn!("exif: not updating unreadable blob: {e}");
                return;
            }
        },
        None if has_fields => Exif::new(),
        None => return,
    };

    exif.update_text(meta);
    let unit = ResolutionUnit::from_meta(meta.get_str(meta::RESOLUTION_UNIT));
    exif.set_resolution(header.xres, header.yres, unit);
    exif.set_dimensions(header.width, header.height);
    if let Some(orientation) = meta.get_int(meta::ORIENTATION) {
        exif.set_orientation(orientation.clamp(1, 8) as u16);
    }
    meta.set_blob(meta::EXIF, exif.to_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BandFormat, Interpretation};

    /// Big-endian blob: IFD0 with Make, Orientation=6 and an Exif IFD
    /// holding PixelXDimension.
    fn sample_blob() -> Vec<u8> {
        let mut t = Vec::new();
        t.extend_from_slice(b"MM");
        t.extend_from_slice(&42u16.to_be_bytes());
        t.extend_from_slice(&8u32.to_be_bytes());
        // IFD0 at 8: 3 entries
        t.extend_from_slice(&3u16.to_be_bytes());
        // Make "Canon\0" at offset 50
        t.extend_from_slice(&0x010Fu16.to_be_bytes());
        t.extend_from_slice(&ASCII.to_be_bytes());
        t.extend_from_slice(&6u32.to_be_bytes());
        t.extend_from_slice(&50u32.to_be_bytes());
        // Orientation 6
        t.extend_from_slice(&ORIENTATION.to_be_bytes());
        t.extend_from_slice(&SHORT.to_be_bytes());
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&[0, 6, 0, 0]);
        // Exif IFD at 56
        t.extend_from_slice(&EXIF_POINTER.to_be_bytes());
        t.extend_from_slice(&LONG.to_be_bytes());
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&56u32.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(t.len(), 50);
        t.extend_from_slice(b"Canon\0");
        // Exif IFD: 1 entry
        t.extend_from_slice(&1u16.to_be_bytes());
        t.extend_from_slice(&PIXEL_X_DIMENSION.to_be_bytes());
        t.extend_from_slice(&LONG.to_be_bytes());
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&640u32.to_be_bytes());
        t.extend_from_slice(&0u32.to_be_bytes());
        t
    }

    fn header(width: u32, height: u32) -> Header {
        Header::new(width, height, 3, BandFormat::UChar, Interpretation::SRgb)
    }

    #[test]
    fn parses_ifd0_and_exif_ifd() {
        let exif = Exif::parse(&sample_blob()).unwrap();
        assert!(exif.is_big_endian());
        assert_eq!(exif.orientation(), Some(6));
        let fields = exif.fields();
        assert!(fields.contains(&(
            "exif-ifd0-Make".to_string(),
            "Canon (Canon, ASCII, 6 components, 6 bytes)".to_string()
        )));
        assert!(fields.iter().any(|(k, v)| k == "exif-ifd2-PixelXDimension" && v.starts_with("640 ")));
    }

    #[test]
    fn prefix_is_optional() {
        let mut prefixed = PREFIX.to_vec();
        prefixed.extend_from_slice(&sample_blob());
        assert_eq!(Exif::parse(&prefixed).unwrap(), Exif::parse(&sample_blob()).unwrap());
    }

    #[test]
    fn rewrite_preserves_tags_and_order() {
        let exif = Exif::parse(&sample_blob()).unwrap();
        let bytes = exif.to_bytes();
        assert!(bytes.starts_with(b"Exif\0\0MM"));
        assert_eq!(Exif::parse(&bytes).unwrap(), exif);
    }

    #[test]
    fn rewrite_drops_ifd1() {
        let mut blob = sample_blob();
        let ifd1 = blob.len() as u32;
        blob[46..50].copy_from_slice(&ifd1.to_be_bytes());
        // IFD1: Compression = 6 (JPEG thumbnail)
        blob.extend_from_slice(&1u16.to_be_bytes());
        blob.extend_from_slice(&0x0103u16.to_be_bytes());
        blob.extend_from_slice(&SHORT.to_be_bytes());
        blob.extend_from_slice(&1u32.to_be_bytes());
        blob.extend_from_slice(&[0, 6, 0, 0]);
        blob.extend_from_slice(&0u32.to_be_bytes());

        let exif = Exif::parse(&blob).unwrap();
        assert_eq!(exif, Exif::parse(&sample_blob()).unwrap());
        let bytes = exif.to_bytes();
        let tiff = &bytes[PREFIX.len()..];
        assert_eq!(&tiff[46..50], &[0, 0, 0, 0]);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Exif::parse(b"nope").is_err());
        assert!(Exif::parse(b"XX\0\x2a\0\0\0\x08").is_err());
        let mut truncated = sample_blob();
        truncated.truncate(20);
        assert!(Exif::parse(&truncated).is_err());
    }

    #[test]
    fn attach_sets_fields_and_orientation() {
        let mut meta = Metadata::new();
        let mut h = header(10, 10);
        attach(&mut meta, &mut h, &sample_blob());
        assert!(meta.get_blob(meta::EXIF).unwrap().starts_with(PREFIX));
        assert_eq!(meta.get_int(meta::ORIENTATION), Some(6));
        assert_eq!(
            meta.get_str("exif-ifd0-Make"),
            Some("Canon (Canon, ASCII, 6 components, 6 bytes)")
        );
    }

    #[test]
    fn update_writes_orientation_resolution_and_dimensions() {
        let mut meta = Metadata::new();
        let mut h = header(10, 10);
        attach(&mut meta, &mut h, &sample_blob());
        meta.set_int(meta::ORIENTATION, 3);
        let mut saved = header(320, 200);
        saved.xres = 10.0;
        saved.yres = 5.0;
        meta.set_str(meta::RESOLUTION_UNIT, "cm");

        update(&mut meta, &saved);

        let exif = Exif::parse(meta.get_blob(meta::EXIF).unwrap()).unwrap();
        assert_eq!(exif.orientation(), Some(3));
        let (x, y, unit) = exif.resolution().unwrap();
        assert_eq!(unit, ResolutionUnit::Centimetre);
        assert!((x - 10.0).abs() < 1e-6 && (y - 5.0).abs() < 1e-6);
        assert!(exif
            .fields()
            .iter()
            .any(|(k, v)| k == "exif-ifd2-PixelXDimension" && v.starts_with("320 ")));
        // sub-IFD kept
        assert!(exif.ifd(IFD_EXIF).is_some());
    }

    #[test]
    fn update_applies_edited_and_removed_text_fields() {
        let mut meta = Metadata::new();
        let mut h = header(10, 10);
        attach(&mut meta, &mut h, &sample_blob());
        meta.set_str("exif-ifd0-Make", "Nikon (Canon, ASCII, 6 components, 6 bytes)");
        meta.set_str("exif-ifd0-Artist", "Ada");

        update(&mut meta, &h);
        let exif = Exif::parse(meta.get_blob(meta::EXIF).unwrap()).unwrap();
        let fields = exif.fields();
        assert!(fields.iter().any(|(k, v)| k == "exif-ifd0-Make" && v.starts_with("Nikon (")));
        assert!(fields.iter().any(|(k, v)| k == "exif-ifd0-Artist" && v.starts_with("Ada (")));

        meta.remove("exif-ifd0-Artist");
        update(&mut meta, &h);
        let exif = Exif::parse(meta.get_blob(meta::EXIF).unwrap()).unwrap();
        assert!(!exif.fields().iter().any(|(k, _)| k == "exif-ifd0-Artist"));
    }

    #[test]
    fn update_leaves_images_without_exif_alone() {
        let mut meta = Metadata::new();
        meta.set_int(meta::ORIENTATION, 6);
        update(&mut meta, &header(4, 4));
        assert!(!meta.contains(meta::EXIF));
    }

    #[test]
    fn inch_resolution_round_trips_through_dpi() {
        let mut exif = Exif::new();
        exif.set_resolution(72.0 / 25.4, 72.0 / 25.4, ResolutionUnit::Inch);
        let (x, _, unit) = exif.resolution().unwrap();
        assert_eq!(unit, ResolutionUnit::Inch);
        assert!((x * 25.4 - 72.0).abs() < 1e-3);
    }
}
