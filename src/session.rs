//! The caller-facing entry point.
//!
//! A [`Session`] ties together a registry snapshot, the resolved
//! configuration, the load cache and a colour engine. Everything a program
//! does with imgport goes through one:
//!
//! ```no_run
//! use imgport::config::ImgportConfig;
//! use imgport::session::Session;
//!
//! let session = Session::new(ImgportConfig::default());
//! let image = session.load_file("photo.jpg[access=sequential]")?;
//! session.save_file(&image, "photo.png[keep=icc]")?;
//! # Ok::<(), imgport::error::ForeignError>(())
//! ```
//!
//! Loads are discovered by content (or suffix, for loaders that cannot
//! sniff) and cached; saves are discovered by suffix and never cached.
//! Handlers can also be called by operation name with
//! [`load_with`](Session::load_with) and [`save_with`](Session::save_with).

use crate::cache::{self, CacheStats, LoadCache};
use crate::config::ImgportConfig;
use crate::error::ForeignError;
use crate::image::Image;
use crate::io::{LoadInput, SaveTarget, Source};
use crate::load::{LoadOperation, LoadSettings};
use crate::ops::colour::{BasicColour, ColourEngine};
use crate::options::{split_filename, Options};
use crate::registry::{LoaderEntry, Registry, SaverEntry};
use crate::save;
use log::debug;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Session {
    registry: Arc<Registry>,
    config: ImgportConfig,
    cache: LoadCache,
    colour: Arc<dyn ColourEngine>,
}

impl Session {
    /// A session over the built-in handlers.
    pub fn new(config: ImgportConfig) -> Self {
        Self::with_registry(Registry::global(), config)
    }

    pub fn with_registry(registry: Arc<Registry>, config: ImgportConfig) -> Self {
        let max_entries = if config.cache.enabled {
            config.cache.max_entries
        } else {
            0
        };
        Self {
            registry,
            config,
            cache: LoadCache::new(max_entries),
            colour: Arc::new(BasicColour),
        }
    }

    /// Replace the colour engine used when normalizing for save.
    pub fn with_colour(mut self, colour: Arc<dyn ColourEngine>) -> Self {
        self.colour = colour;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ImgportConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Forget every cached load.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load a file. `filename` may end in `[options]`.
    pub fn load_file(&self, filename: &str) -> Result<Image, ForeignError> {
        self.load_file_with(filename, Options::new())
    }

    /// Load a file with extra options; options in the filename win.
    pub fn load_file_with(&self, filename: &str, mut options: Options) -> Result<Image, ForeignError> {
        let entry = self.registry.find_load(filename)?.clone();
        options.extend(Options::from_filename(filename)?);
        let (name, _) = split_filename(filename);
        self.load(&entry, LoadInput::File(PathBuf::from(name)), options)
    }

    /// Load an encoded image held in memory.
    pub fn load_buffer(&self, bytes: &[u8], options: Options) -> Result<Image, ForeignError> {
        let input = LoadInput::Buffer(Arc::from(bytes));
        let entry = self.registry.find_load_input(&input)?.clone();
        self.load(&entry, input, options)
    }

    /// Load from a seekable stream. Stream loads are never cached.
    pub fn load_source(&self, source: &Source, options: Options) -> Result<Image, ForeignError> {
        let entry = self.registry.find_load_source(source)?.clone();
        source.rewind()?;
        self.load(&entry, LoadInput::Source(source.clone()), options)
    }

    /// Run a loader by operation name, e.g. `rawload` or `pngload_buffer`.
    pub fn load_with(
        &self,
        operation: &str,
        input: LoadInput,
        options: Options,
    ) -> Result<Image, ForeignError> {
        let entry = self.registry.loader(operation)?.clone();
        if entry.descriptor.io() != input.kind() {
            return Err(ForeignError::decode(
                operation,
                format!("cannot read {}", input.describe()),
            ));
        }
        if let LoadInput::File(path) = &input {
            if !path.exists() {
                return Err(ForeignError::InputNotFound(path.clone()));
            }
            if path.is_dir() {
                return Err(ForeignError::InputIsDirectory(path.clone()));
            }
        }
        if let LoadInput::Source(source) = &input {
            source.rewind()?;
        }
        self.load(&entry, input, options)
    }

    fn load(
        &self,
        entry: &LoaderEntry,
        input: LoadInput,
        mut options: Options,
    ) -> Result<Image, ForeignError> {
        let settings = LoadSettings::take_from(&mut options, &self.config.load)?;
        let name = entry.descriptor.name();
        let key = cache::load_key(name, &input, &options, &settings);

        if let Some(key) = &key
            && !settings.revalidate
            && let Some(op) = self.cache.lookup(key)
        {
            debug!("{name}: cache hit for {}", input.describe());
            return Ok(op.image());
        }

        let op = LoadOperation::open(entry.clone(), input, options, settings)?;
        if let Some(key) = key {
            self.cache.insert(key, Arc::clone(&op));
        }
        Ok(op.image())
    }

    // =========================================================================
    // Saving
    // =========================================================================

    /// Save to a file, choosing the saver by suffix. `filename` may end in
    /// `[options]`.
    pub fn save_file(&self, image: &Image, filename: &str) -> Result<(), ForeignError> {
        let entry = self.registry.find_save(filename)?;
        let (name, _) = split_filename(filename);
        let mut target = SaveTarget::File(PathBuf::from(name));
        self.save(entry, image, &mut target, Options::from_filename(filename)?)
    }

    /// Encode to memory. `suffix` names the format, as in `".png"` or
    /// `".jpg[Q=90]"`.
    pub fn save_buffer(&self, image: &Image, suffix: &str) -> Result<Vec<u8>, ForeignError> {
        let entry = self.registry.find_save_buffer(suffix)?;
        let mut target = SaveTarget::Buffer(Vec::new());
        self.save(entry, image, &mut target, Options::from_filename(suffix)?)?;
        Ok(target.into_buffer().unwrap_or_default())
    }

    /// Encode into any writer.
    pub fn save_target(
        &self,
        image: &Image,
        suffix: &str,
        writer: Box<dyn Write + Send>,
    ) -> Result<(), ForeignError> {
        let entry = self.registry.find_save_target(suffix)?;
        let mut target = SaveTarget::Stream(writer);
        self.save(entry, image, &mut target, Options::from_filename(suffix)?)
    }

    /// Run a saver by operation name.
    pub fn save_with(
        &self,
        operation: &str,
        image: &Image,
        target: &mut SaveTarget,
        options: Options,
    ) -> Result<(), ForeignError> {
        let entry = self.registry.saver(operation)?;
        self.save(entry, image, target, options)
    }

    fn save(
        &self,
        entry: &SaverEntry,
        image: &Image,
        target: &mut SaveTarget,
        options: Options,
    ) -> Result<(), ForeignError> {
        save::save(
            entry,
            image,
            target,
            options,
            &self.config.save,
            self.colour.as_ref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::meta;
    use crate::io::IoKind;
    use crate::registry::{FormatDescriptor, FormatTable, Saveable};
    use crate::test_helpers::*;
    use tempfile::TempDir;

    struct Fixture {
        session: Session,
        loader: Arc<FakeLoader>,
        saver: Arc<FakeSaver>,
    }

    fn fixture_with(loader: FakeLoader, config: ImgportConfig) -> Fixture {
        let loader = loader.arc();
        let saver = FakeSaver::new().arc();
        let mut builder = Registry::builder();
        for io in [IoKind::File, IoKind::Buffer, IoKind::Stream] {
            builder
                .register_loader(loader_descriptor("fake", io, 0, &[".fake"]), loader.clone())
                .unwrap();
            builder
                .register_saver(
                    FormatDescriptor::saver("fake", io)
                        .suffixes(&[".fake"])
                        .saveable(Saveable::RGB)
                        .format_table(FormatTable::ALL_UCHAR)
                        .build(),
                    saver.clone(),
                )
                .unwrap();
        }
        Fixture {
            session: Session::with_registry(Arc::new(builder.build()), config),
            loader,
            saver,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeLoader::sniffing(b"FAKEX"), ImgportConfig::default())
    }

    // =========================================================================
    // Loading and the cache
    // =========================================================================

    #[test]
    fn identical_buffer_loads_share_one_decode() {
        let f = fixture();
        let a = f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        let b = f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        a.fetch_all().unwrap();
        b.fetch_all().unwrap();
        assert_eq!(f.loader.header_calls(), 1);
        assert_eq!(f.loader.decode_calls(), 1);
        assert_eq!(f.session.cache_stats().hits, 1);
        assert_eq!(a.meta().get_str(meta::LOADER), Some("fakeload_buffer"));
    }

    #[test]
    fn different_options_are_different_loads() {
        let f = fixture();
        f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        f.session
            .load_buffer(b"FAKEX", Options::new().with("page", 1))
            .unwrap();
        assert_eq!(f.loader.header_calls(), 2);
    }

    #[test]
    fn revalidate_reopens_and_replaces() {
        let f = fixture();
        f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        f.session
            .load_buffer(b"FAKEX", Options::new().with("revalidate", true))
            .unwrap();
        f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        assert_eq!(f.loader.header_calls(), 2);
        assert_eq!(f.session.cache_stats().hits, 1);
    }

    #[test]
    fn failed_decode_is_retried_by_next_load() {
        let f = fixture_with(FakeLoader::sniffing(b"FAKEX").failing(), ImgportConfig::default());
        let first = f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        assert!(first.fetch_all().is_err());
        // the same image stays failed
        assert!(matches!(first.fetch_all(), Err(ForeignError::LoadFailed(_))));

        f.loader.set_failing(false);
        let second = f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        assert!(second.fetch_all().is_ok());
        assert_eq!(f.loader.decode_calls(), 2);
        assert_eq!(f.session.cache_stats().invalidated, 1);
    }

    #[test]
    fn stream_loads_are_not_cached() {
        let f = fixture();
        let source = Source::from_bytes(b"FAKEX".to_vec());
        f.session.load_source(&source, Options::new()).unwrap();
        f.session.load_source(&source, Options::new()).unwrap();
        assert_eq!(f.loader.header_calls(), 2);
        assert!(f.session.cache.is_empty());
    }

    #[test]
    fn disabled_cache_loads_every_time() {
        let mut config = ImgportConfig::default();
        config.cache.enabled = false;
        let f = fixture_with(FakeLoader::sniffing(b"FAKEX"), config);
        f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        f.session.load_buffer(b"FAKEX", Options::new()).unwrap();
        assert_eq!(f.loader.header_calls(), 2);
    }

    #[test]
    fn filename_options_reach_the_pipeline() {
        let f = fixture();
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "a.fake", b"FAKEX");
        let image = f
            .session
            .load_file(&format!("{}[access=sequential]", path.display()))
            .unwrap();
        assert_eq!(image.meta().get_int(meta::SEQUENTIAL), Some(1));
    }

    #[test]
    fn missing_file_fails_before_any_handler() {
        let f = fixture();
        let err = f.session.load_file("/nonexistent/a.fake").unwrap_err();
        assert!(matches!(err, ForeignError::InputNotFound(_)));
        assert_eq!(f.loader.is_a_calls(), 0);
    }

    #[test]
    fn load_by_name() {
        let f = fixture();
        let image = f
            .session
            .load_with(
                "fakeload_buffer",
                LoadInput::Buffer(Arc::from(&b"anything"[..])),
                Options::new(),
            )
            .unwrap();
        assert_eq!(image.width(), 8);
        assert!(matches!(
            f.session
                .load_with("nosuchload", LoadInput::Buffer(Arc::from(&b""[..])), Options::new()),
            Err(ForeignError::NoSuchOperation(_))
        ));
    }

    #[test]
    fn load_by_name_checks_input_kind() {
        let f = fixture();
        let result = f.session.load_with(
            "fakeload",
            LoadInput::Buffer(Arc::from(&b"FAKEX"[..])),
            Options::new(),
        );
        assert!(matches!(result, Err(ForeignError::Decode { .. })));
    }

    // =========================================================================
    // Saving
    // =========================================================================

    #[test]
    fn save_buffer_by_suffix_with_options() {
        let f = fixture();
        let image = rgb_image(4, 4);
        let bytes = f.session.save_buffer(&image, ".FAKE[strip]").unwrap();
        assert_eq!(bytes, b"FAKE");
        assert_eq!(f.saver.saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn save_file_writes_to_path_without_options() {
        let f = fixture();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.fake");
        f.session
            .save_file(&rgb_image(2, 2), &format!("{}[keep=none]", path.display()))
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"FAKE");
    }

    #[test]
    fn unknown_save_suffix() {
        let f = fixture();
        assert!(matches!(
            f.session.save_buffer(&rgb_image(2, 2), ".gif"),
            Err(ForeignError::UnknownFormat(_))
        ));
    }

    #[test]
    fn saves_are_not_cached() {
        let f = fixture();
        let image = rgb_image(2, 2);
        f.session.save_buffer(&image, ".fake").unwrap();
        f.session.save_buffer(&image, ".fake").unwrap();
        assert_eq!(f.saver.saved.lock().unwrap().len(), 2);
    }
}
