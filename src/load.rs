//! The load pipeline: one [`LoadOperation`] per load request.
//!
//! ```text
//! open ──► header read ──(first pixel request)──► decoding ──► decoded
//!                                                     │
//!                                                     └──► failed (permanent)
//! ```
//!
//! [`LoadOperation::open`] runs the loader's header step and returns. The
//! image it publishes carries the header and metadata but no pixels; the
//! first [`Image::fetch`] on it runs the loader's decode step, checks the
//! decoded shape against the header, and moves the pixels into a backing
//! store chosen by [`choose_store`](crate::store::choose_store).
//!
//! Decoding happens under a per-operation mutex. Threads that ask for
//! pixels while a decode is running wait for it and then see its result;
//! the loader is never asked to decode twice. A failed decode is final for
//! that operation: later requests get [`ForeignError::LoadFailed`] and the
//! operation is marked invalid so the cache never hands it out again.

use crate::config::LoadConfig;
use crate::error::ForeignError;
use crate::handler::{Access, FailOn, Invalidator, LoadContext, LoadStrategy};
use crate::image::{meta, Header, Image, Metadata, PixelSource, Rect};
use crate::io::LoadInput;
use crate::options::Options;
use crate::registry::{ForeignFlags, LoaderEntry};
use crate::store::{self, StoreKind};
use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard};

/// Options every load understands, taken out of the option bag before the
/// rest is handed to the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSettings {
    pub access: Access,
    pub fail_on: FailOn,
    /// Force the memory store.
    pub memory: bool,
    /// Allow the temporary-file store.
    pub disc: bool,
    pub disc_threshold: u64,
    /// Skip the cache lookup and replace any cached entry.
    pub revalidate: bool,
}

impl LoadSettings {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            access: config.access,
            fail_on: config.fail_on,
            memory: config.memory,
            disc: config.disc,
            disc_threshold: config.disc_threshold.bytes(),
            revalidate: false,
        }
    }

    /// Defaults from `config`, overridden and removed from `options`.
    pub fn take_from(options: &mut Options, config: &LoadConfig) -> Result<Self, ForeignError> {
        let mut settings = Self::from_config(config);
        if let Some(access) = options.take_parsed::<Access>("access")? {
            settings.access = access;
        }
        // older spelling of access=sequential
        if options.take_bool("sequential")? == Some(true) {
            settings.access = Access::Sequential;
        }
        if let Some(fail_on) = options.take_parsed::<FailOn>("fail_on")? {
            settings.fail_on = fail_on;
        }
        // deprecated boolean form of fail_on=warning
        if options.take_bool("fail")? == Some(true) {
            settings.fail_on = FailOn::Warning;
        }
        if let Some(memory) = options.take_bool("memory")? {
            settings.memory = memory;
        }
        if let Some(disc) = options.take_bool("disc")? {
            settings.disc = disc;
        }
        if let Some(revalidate) = options.take_bool("revalidate")? {
            settings.revalidate = revalidate;
        }
        Ok(settings)
    }
}

enum Phase {
    HeaderRead,
    Decoded(Image),
    Failed,
}

/// State of one load request.
pub struct LoadOperation {
    entry: LoaderEntry,
    input: LoadInput,
    options: Options,
    settings: LoadSettings,
    flags: ForeignFlags,
    header: Header,
    meta: Metadata,
    nocache: bool,
    invalidator: Invalidator,
    phase: Mutex<Phase>,
}

impl LoadOperation {
    /// Read the header and return an operation ready to decode on demand.
    pub fn open(
        entry: LoaderEntry,
        input: LoadInput,
        options: Options,
        settings: LoadSettings,
    ) -> Result<Arc<Self>, ForeignError> {
        let name = entry.descriptor.name().to_string();
        let mut flags = entry.loader.flags(&input);
        if flags.partial() && flags.sequential() {
            warn!("{name}: loader is both partial and sequential, treating as sequential");
            flags = flags.with_partial(false);
        }
        // a sequential loader read top to bottom can't be shared
        let nocache = flags.sequential() && settings.access != Access::Random;
        let invalidator = Invalidator::new();

        let info = {
            let ctx = LoadContext {
                name: &name,
                input: &input,
                options: &options,
                access: settings.access,
                fail_on: settings.fail_on,
                invalidator: invalidator.clone(),
            };
            entry.loader.header(&ctx).inspect_err(|_| invalidator.invalidate())?
        };

        let mut meta = info.meta;
        meta.set_str(meta::LOADER, name.as_str());
        if settings.access != Access::Random {
            meta.set_int(meta::SEQUENTIAL, 1);
        }

        let phase = match entry.loader.strategy() {
            LoadStrategy::HeaderThenDecode => Phase::HeaderRead,
            LoadStrategy::HeaderOnly => {
                let pixels = info.pixels.ok_or_else(|| {
                    invalidator.invalidate();
                    ForeignError::decode(&name, "header-only loader returned no pixels")
                })?;
                check_compatible(&info.header, pixels.header())
                    .inspect_err(|_| invalidator.invalidate())?;
                Phase::Decoded(pixels)
            }
        };

        debug!("{name}: opened {} as {}", input.describe(), info.header);
        Ok(Arc::new(Self {
            entry,
            input,
            options,
            settings,
            flags,
            header: info.header,
            meta,
            nocache,
            invalidator,
            phase: Mutex::new(phase),
        }))
    }

    pub fn name(&self) -> &str {
        self.entry.descriptor.name()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn flags(&self) -> ForeignFlags {
        self.flags
    }

    pub fn settings(&self) -> &LoadSettings {
        &self.settings
    }

    /// The operation must not be cached at all.
    pub fn nocache(&self) -> bool {
        self.nocache
    }

    /// The operation failed and must not be served from cache again.
    pub fn is_invalid(&self) -> bool {
        self.invalidator.is_invalid()
    }

    /// The published image: header and metadata now, pixels on demand.
    pub fn image(self: &Arc<Self>) -> Image {
        Image::new(
            self.header,
            self.meta.clone(),
            Arc::new(DeferredPixels {
                op: Arc::clone(self),
            }),
        )
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decoded pixels, decoding first if nobody has yet.
    pub fn pixels(&self) -> Result<Image, ForeignError> {
        let mut phase = self.lock();
        match &*phase {
            Phase::Decoded(image) => return Ok(image.clone()),
            Phase::Failed => return Err(ForeignError::LoadFailed(self.name().to_string())),
            Phase::HeaderRead => {}
        }
        match self.decode() {
            Ok(image) => {
                *phase = Phase::Decoded(image.clone());
                Ok(image)
            }
            Err(e) => {
                debug!("{}: decode failed: {e}", self.name());
                *phase = Phase::Failed;
                self.invalidator.invalidate();
                Err(e)
            }
        }
    }

    fn decode(&self) -> Result<Image, ForeignError> {
        let ctx = LoadContext {
            name: self.name(),
            input: &self.input,
            options: &self.options,
            access: self.settings.access,
            fail_on: self.settings.fail_on,
            invalidator: self.invalidator.clone(),
        };
        let decoded = self.entry.loader.decode(&ctx)?;
        check_compatible(&self.header, decoded.header())?;

        let kind = store::choose_store(
            self.settings.memory,
            self.flags,
            self.settings.access,
            self.header.sizeof_image(),
            self.settings.disc,
            self.settings.disc_threshold,
        );
        if kind != StoreKind::Direct {
            debug!("{}: decoding to {kind:?} store", self.name());
        }
        store::fill(kind, decoded)
    }
}

fn check_compatible(header: &Header, decoded: &Header) -> Result<(), ForeignError> {
    if header.is_compatible(decoded) {
        Ok(())
    } else {
        Err(ForeignError::HeaderLoadMismatch(format!(
            "header says {header}, decoded {decoded}"
        )))
    }
}

/// Pixel source of a published image: decodes on first fetch.
struct DeferredPixels {
    op: Arc<LoadOperation>,
}

impl PixelSource for DeferredPixels {
    fn fetch(&self, rect: &Rect) -> Result<Vec<u8>, ForeignError> {
        let pixels = self.op.pixels()?;
        pixels.fetch(rect).inspect_err(|_| self.op.invalidator.invalidate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadConfig;
    use crate::image::{BandFormat, Interpretation};
    use crate::io::IoKind;
    use crate::test_helpers::*;
    use std::sync::Arc;

    fn entry(loader: Arc<FakeLoader>) -> LoaderEntry {
        LoaderEntry {
            descriptor: Arc::new(loader_descriptor("fake", IoKind::Buffer, 0, &[])),
            loader,
        }
    }

    fn buffer() -> LoadInput {
        LoadInput::Buffer(Arc::from(&b"FAKEX"[..]))
    }

    fn settings() -> LoadSettings {
        LoadSettings::from_config(&LoadConfig::default())
    }

    #[test]
    fn open_reads_header_but_does_not_decode() {
        let loader = FakeLoader::sniffing(b"FAKEX").arc();
        let op = LoadOperation::open(entry(loader.clone()), buffer(), Options::new(), settings())
            .unwrap();
        let image = op.image();
        assert_eq!(image.width(), 8);
        assert_eq!(image.meta().get_str(meta::LOADER), Some("fakeload_buffer"));
        assert_eq!(image.meta().get_str("fake-field"), Some("from header"));
        assert_eq!(loader.header_calls(), 1);
        assert_eq!(loader.decode_calls(), 0);
    }

    #[test]
    fn first_fetch_decodes_once() {
        let loader = FakeLoader::sniffing(b"FAKEX").arc();
        let op = LoadOperation::open(entry(loader.clone()), buffer(), Options::new(), settings())
            .unwrap();
        let image = op.image();
        let px = image.fetch(&Rect::new(0, 0, 1, 1)).unwrap();
        assert_eq!(px, vec![42, 42, 42]);
        image.fetch_all().unwrap();
        op.image().fetch(&Rect::new(1, 1, 2, 2)).unwrap();
        assert_eq!(loader.decode_calls(), 1);
    }

    #[test]
    fn concurrent_first_fetches_share_one_decode() {
        let loader = FakeLoader::sniffing(b"FAKEX").arc();
        let op = LoadOperation::open(entry(loader.clone()), buffer(), Options::new(), settings())
            .unwrap();
        let image = op.image();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| image.fetch(&Rect::new(0, 0, 8, 4)).unwrap());
            }
        });
        assert_eq!(loader.decode_calls(), 1);
    }

    #[test]
    fn failed_decode_is_permanent_and_invalidates() {
        let loader = FakeLoader::sniffing(b"FAKEX").failing().arc();
        let op = LoadOperation::open(entry(loader.clone()), buffer(), Options::new(), settings())
            .unwrap();
        let image = op.image();
        let first = image.fetch(&Rect::new(0, 0, 1, 1)).unwrap_err();
        assert!(matches!(first, ForeignError::Decode { .. }));
        assert!(op.is_invalid());

        loader.set_failing(false);
        let second = image.fetch(&Rect::new(0, 0, 1, 1)).unwrap_err();
        assert!(matches!(second, ForeignError::LoadFailed(_)));
        assert_eq!(loader.decode_calls(), 1);
    }

    #[test]
    fn shape_mismatch_is_a_hard_error() {
        let loader = FakeLoader::sniffing(b"FAKEX").mismatched().arc();
        let op = LoadOperation::open(entry(loader), buffer(), Options::new(), settings()).unwrap();
        let err = op.image().fetch_all().unwrap_err();
        assert!(matches!(err, ForeignError::HeaderLoadMismatch(_)));
        assert!(op.is_invalid());
    }

    #[test]
    fn header_only_loader_is_decoded_at_open() {
        let loader = FakeLoader::sniffing(b"FAKEX").header_only().arc();
        let op = LoadOperation::open(entry(loader.clone()), buffer(), Options::new(), settings())
            .unwrap();
        assert_eq!(op.image().fetch(&Rect::new(0, 0, 1, 1)).unwrap(), vec![42, 42, 42]);
        assert_eq!(loader.decode_calls(), 0);
    }

    #[test]
    fn partial_and_sequential_resolves_to_sequential() {
        let flags = ForeignFlags::new().with_partial(true).with_sequential(true);
        let loader = FakeLoader::sniffing(b"FAKEX").with_flags(flags).arc();
        let mut s = settings();
        s.access = Access::Sequential;
        let op = LoadOperation::open(entry(loader), buffer(), Options::new(), s).unwrap();
        assert!(op.flags().sequential());
        assert!(!op.flags().partial());
        assert!(op.nocache());
        assert!(op.image().is_sequential());
    }

    #[test]
    fn sequential_loader_with_random_access_is_cacheable() {
        let flags = ForeignFlags::new().with_sequential(true);
        let loader = FakeLoader::sniffing(b"FAKEX").with_flags(flags).arc();
        let op = LoadOperation::open(entry(loader), buffer(), Options::new(), settings()).unwrap();
        assert!(!op.nocache());
        assert!(!op.image().is_sequential());
    }

    #[test]
    fn big_decode_spills_to_disc() {
        let header = Header::new(64, 64, 1, BandFormat::UChar, Interpretation::BW);
        let loader = FakeLoader::sniffing(b"FAKEX").with_header(header).arc();
        let mut s = settings();
        s.disc_threshold = 1024;
        let op = LoadOperation::open(entry(loader), buffer(), Options::new(), s).unwrap();
        assert_eq!(op.image().fetch_all().unwrap(), vec![42; 64 * 64]);
    }

    #[test]
    fn settings_are_taken_out_of_options() {
        let mut options = Options::parse("access=sequential,fail-on=error,memory,Q=3").unwrap();
        let s = LoadSettings::take_from(&mut options, &LoadConfig::default()).unwrap();
        assert_eq!(s.access, Access::Sequential);
        assert_eq!(s.fail_on, FailOn::Error);
        assert!(s.memory);
        assert_eq!(options.iter().collect::<Vec<_>>(), vec![("q", "3")]);
    }

    #[test]
    fn bad_access_value_is_reported() {
        let mut options = Options::parse("access=sideways").unwrap();
        assert!(matches!(
            LoadSettings::take_from(&mut options, &LoadConfig::default()),
            Err(ForeignError::BadOption { .. })
        ));
    }
}
