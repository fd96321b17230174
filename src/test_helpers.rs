//! Shared test utilities: fake handlers and synthetic images.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let loader = FakeLoader::sniffing(b"FAKEX").arc();
//! let mut builder = Registry::builder();
//! builder
//!     .register_loader(loader_descriptor("x", IoKind::File, 0, &[]), loader.clone())
//!     .unwrap();
//!
//! // ... load something ...
//! assert_eq!(loader.decode_calls(), 1);
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::error::ForeignError;
use crate::handler::{ImageInfo, LoadContext, LoadStrategy, Loader, SaveContext, Saver};
use crate::image::{BandFormat, Header, Image, Interpretation, Metadata};
use crate::io::{IoKind, LoadInput};
use crate::registry::{FormatDescriptor, ForeignFlags};

// =========================================================================
// Files and images
// =========================================================================

pub fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// An in-memory image whose every sample is produced by `f(x, y, band)`.
pub fn synthetic(header: Header, f: impl Fn(u32, u32, u32) -> f64) -> Image {
    let mut data = Vec::with_capacity(header.sizeof_image() as usize);
    for y in 0..header.height {
        for x in 0..header.width {
            for b in 0..header.bands {
                header.format.write(f(x, y, b), &mut data);
            }
        }
    }
    Image::from_memory(header, data).unwrap()
}

/// An 8-bit sRGB image with a gradient in each band.
pub fn rgb_image(width: u32, height: u32) -> Image {
    let header = Header::new(width, height, 3, BandFormat::UChar, Interpretation::SRgb);
    synthetic(header, |x, y, b| ((x * 7 + y * 3 + b * 50) % 256) as f64)
}

/// Every pixel equal to `pixel`.
pub fn solid(header: Header, pixel: &[f64]) -> Image {
    let pixel = pixel.to_vec();
    synthetic(header, move |_, _, b| pixel[b as usize])
}

pub fn loader_descriptor(
    format: &str,
    io: IoKind,
    priority: i32,
    suffixes: &[&str],
) -> FormatDescriptor {
    FormatDescriptor::loader(format, io)
        .priority(priority)
        .suffixes(suffixes)
        .build()
}

// =========================================================================
// Fake loader
// =========================================================================

/// Loader that recognises a magic prefix and decodes to a solid image.
///
/// Counts calls so tests can check what the pipeline did and did not do.
pub struct FakeLoader {
    magic: Option<&'static [u8]>,
    header: Header,
    flags: ForeignFlags,
    strategy: LoadStrategy,
    fail_decode: Mutex<bool>,
    mismatch: bool,
    consume: bool,
    is_a_calls: AtomicUsize,
    header_calls: AtomicUsize,
    decode_calls: AtomicUsize,
}

impl FakeLoader {
    fn new(magic: Option<&'static [u8]>) -> Self {
        Self {
            magic,
            header: Header::new(8, 4, 3, BandFormat::UChar, Interpretation::SRgb),
            flags: ForeignFlags::NONE,
            strategy: LoadStrategy::HeaderThenDecode,
            fail_decode: Mutex::new(false),
            mismatch: false,
            consume: false,
            is_a_calls: AtomicUsize::new(0),
            header_calls: AtomicUsize::new(0),
            decode_calls: AtomicUsize::new(0),
        }
    }

    pub fn sniffing(magic: &'static [u8]) -> Self {
        Self::new(Some(magic))
    }

    pub fn suffix_only() -> Self {
        Self::new(None)
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn with_flags(mut self, flags: ForeignFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn header_only(mut self) -> Self {
        self.strategy = LoadStrategy::HeaderOnly;
        self
    }

    /// Decoding fails until [`set_failing(false)`](Self::set_failing).
    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail_decode.lock().unwrap() = fail;
    }

    /// Decoded pixels are one column wider than the header says.
    pub fn mismatched(mut self) -> Self {
        self.mismatch = true;
        self
    }

    /// Sniffing reads streams to the end and does not rewind.
    pub fn consuming(mut self) -> Self {
        self.consume = true;
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_a_calls(&self) -> usize {
        self.is_a_calls.load(Ordering::SeqCst)
    }

    pub fn header_calls(&self) -> usize {
        self.header_calls.load(Ordering::SeqCst)
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }

    fn pixels(&self, header: Header) -> Image {
        solid(header, &vec![42.0; header.bands as usize])
    }
}

impl Loader for FakeLoader {
    fn sniffs(&self) -> bool {
        self.magic.is_some()
    }

    fn is_a(&self, input: &LoadInput) -> Result<bool, ForeignError> {
        self.is_a_calls.fetch_add(1, Ordering::SeqCst);
        let Some(magic) = self.magic else {
            return Ok(false);
        };
        let head = match (input, self.consume) {
            (LoadInput::Source(source), true) => source.read_all()?,
            _ => input.sniff(magic.len())?,
        };
        Ok(head.starts_with(magic))
    }

    fn flags(&self, _input: &LoadInput) -> ForeignFlags {
        self.flags
    }

    fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    fn header(&self, _ctx: &LoadContext) -> Result<ImageInfo, ForeignError> {
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        let mut meta = Metadata::new();
        meta.set_str("fake-field", "from header");
        let mut info = ImageInfo::new(self.header, meta);
        if self.strategy == LoadStrategy::HeaderOnly {
            info.pixels = Some(self.pixels(self.header));
        }
        Ok(info)
    }

    fn decode(&self, ctx: &LoadContext) -> Result<Image, ForeignError> {
        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_decode.lock().unwrap() {
            return Err(ctx.decode_error("corrupt data"));
        }
        let header = if self.mismatch {
            Header {
                width: self.header.width + 1,
                ..self.header
            }
        } else {
            self.header
        };
        Ok(self.pixels(header))
    }
}

// =========================================================================
// Fake saver
// =========================================================================

/// Saver that records the images it is handed and writes a marker.
#[derive(Default)]
pub struct FakeSaver {
    pub saved: Mutex<Vec<Image>>,
}

impl FakeSaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn last(&self) -> Image {
        self.saved.lock().unwrap().last().cloned().unwrap()
    }
}

impl Saver for FakeSaver {
    fn save(&self, ready: &Image, ctx: &mut SaveContext) -> Result<(), ForeignError> {
        // pull every pixel so lazy failures surface here
        ready.fetch_all()?;
        self.saved.lock().unwrap().push(ready.clone());
        ctx.target.write_encoded(b"FAKE")
    }
}
