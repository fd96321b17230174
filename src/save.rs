//! The save pipeline.
//!
//! A save never touches the caller's image. [`SaveState`] builds a private
//! "ready" image in four steps and hands it to the encoder:
//!
//! 1. [`convert_saveable`] reshapes the pixels for the saver's descriptor.
//! 2. The result is copied, so metadata edits stay local.
//! 3. An ICC profile named by the `profile` option is attached, then
//!    [`update_metadata`] applies the keep mask.
//! 4. `page-height` is set if requested.
//!
//! The ready image lives until the encoder returns. Saves are never cached.

use crate::config::SaveConfig;
use crate::error::ForeignError;
use crate::handler::SaveContext;
use crate::image::{meta, Image};
use crate::io::SaveTarget;
use crate::metadata::{update_metadata, Keep};
use crate::normalize::convert_saveable;
use crate::ops::colour::ColourEngine;
use crate::options::Options;
use crate::registry::SaverEntry;
use log::{debug, warn};
use std::path::PathBuf;

/// Options every save understands.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveSettings {
    pub keep: Keep,
    /// Flatten colour, one value per band or one for all.
    pub background: Vec<f64>,
    /// Height of each page in a multi-page image.
    pub page_height: Option<u32>,
    /// ICC profile file to embed.
    pub profile: Option<PathBuf>,
}

impl SaveSettings {
    pub fn from_config(config: &SaveConfig) -> Self {
        Self {
            keep: config.keep,
            background: config.background.clone(),
            page_height: None,
            profile: None,
        }
    }

    /// Defaults from `config`, overridden and removed from `options`.
    pub fn take_from(options: &mut Options, config: &SaveConfig) -> Result<Self, ForeignError> {
        let mut settings = Self::from_config(config);
        // strip is the old spelling of keep=none; an explicit keep wins
        if options.take_bool("strip")? == Some(true) {
            settings.keep = Keep::NONE;
        }
        if let Some(keep) = options.take_parsed::<Keep>("keep")? {
            settings.keep = keep;
        }
        if let Some(profile) = options.remove("profile") {
            settings.profile = Some(PathBuf::from(profile));
            settings.keep |= Keep::ICC;
        }
        if let Some(background) = options.get_doubles("background")? {
            options.remove("background");
            settings.background = background;
        }
        if let Some(page_height) = options.take_parsed::<u32>("page_height")? {
            settings.page_height = (page_height > 0).then_some(page_height);
        }
        Ok(settings)
    }
}

/// One save request.
pub struct SaveState<'a> {
    entry: &'a SaverEntry,
    input: &'a Image,
    settings: SaveSettings,
    /// Options left for the encoder.
    options: Options,
}

impl<'a> SaveState<'a> {
    /// Take the generic save options out of `options`; the rest go to the
    /// encoder.
    pub fn new(
        entry: &'a SaverEntry,
        input: &'a Image,
        mut options: Options,
        config: &SaveConfig,
    ) -> Result<Self, ForeignError> {
        let settings = SaveSettings::take_from(&mut options, config)?;
        Ok(Self {
            entry,
            input,
            settings,
            options,
        })
    }

    pub fn settings(&self) -> &SaveSettings {
        &self.settings
    }

    /// Build the image the encoder will receive.
    pub fn ready(&self, colour: &dyn ColourEngine) -> Result<Image, ForeignError> {
        let descriptor = &self.entry.descriptor;
        let converted = convert_saveable(
            self.input,
            descriptor.saveable(),
            descriptor.format_table(),
            descriptor.coding(),
            &self.settings.background,
            colour,
        )?;

        // a copy: shares pixels, owns its metadata
        let mut ready = converted.clone();

        if let Some(path) = &self.settings.profile {
            let profile = std::fs::read(path)?;
            debug!("{}: embedding profile {}", descriptor.name(), path.display());
            ready.meta_mut().set_blob(meta::ICC, profile);
        }
        update_metadata(&mut ready, self.settings.keep);

        if let Some(page_height) = self.settings.page_height {
            if ready.height() % page_height != 0 {
                warn!(
                    "{}: page height {page_height} does not divide image height {}",
                    descriptor.name(),
                    ready.height()
                );
            }
            ready.meta_mut().set_int(meta::PAGE_HEIGHT, i64::from(page_height));
        }
        Ok(ready)
    }

    /// Normalize, then run the encoder into `target`.
    pub fn write(self, target: &mut SaveTarget, colour: &dyn ColourEngine) -> Result<(), ForeignError> {
        let name = self.entry.descriptor.name();
        if target.kind() != self.entry.descriptor.io() {
            return Err(ForeignError::encode(
                name,
                format!("cannot write to a {:?} target", target.kind()),
            ));
        }
        let ready = self.ready(colour)?;
        debug!("{name}: writing {}", ready.header());
        let mut ctx = SaveContext {
            name,
            options: &self.options,
            target,
        };
        self.entry.saver.save(&ready, &mut ctx)
    }
}

/// Save `image` with the saver in `entry`.
pub fn save(
    entry: &SaverEntry,
    image: &Image,
    target: &mut SaveTarget,
    options: Options,
    config: &SaveConfig,
    colour: &dyn ColourEngine,
) -> Result<(), ForeignError> {
    SaveState::new(entry, image, options, config)?.write(target, colour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::{self, Exif};
    use crate::icc::fake_profile;
    use crate::image::{BandFormat, Header, Interpretation, Rect};
    use crate::io::IoKind;
    use crate::ops::colour::BasicColour;
    use crate::registry::{FormatDescriptor, FormatTable, Saveable};
    use crate::test_helpers::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn entry(saveable: Saveable, saver: Arc<FakeSaver>) -> SaverEntry {
        SaverEntry {
            descriptor: Arc::new(
                FormatDescriptor::saver("fake", IoKind::Buffer)
                    .suffixes(&[".fake"])
                    .saveable(saveable)
                    .format_table(FormatTable::ALL_UCHAR)
                    .build(),
            ),
            saver,
        }
    }

    fn tagged_image() -> Image {
        let mut image = rgb_image(4, 4);
        let mut header = *image.header();
        let m = image.meta_mut();
        exif::attach(m, &mut header, &Exif::new().to_bytes());
        m.set_str("exif-ifd0-Make", "Canon");
        m.set_blob(meta::XMP, b"<x:xmpmeta/>".to_vec());
        m.set_blob(meta::ICC, fake_profile(b"RGB "));
        m.set_str(meta::IMAGE_DESCRIPTION, "a test");
        image
    }

    fn save_to_buffer(entry: &SaverEntry, image: &Image, options: Options) -> Vec<u8> {
        let mut target = SaveTarget::Buffer(Vec::new());
        save(entry, image, &mut target, options, &SaveConfig::default(), &BasicColour).unwrap();
        target.into_buffer().unwrap()
    }

    // =========================================================================
    // Settings
    // =========================================================================

    #[test]
    fn settings_take_generic_options_only() {
        let mut options = Options::parse("keep=icc,Q=90,page_height=2,background=255 0 0").unwrap();
        let settings = SaveSettings::take_from(&mut options, &SaveConfig::default()).unwrap();
        assert_eq!(settings.keep, Keep::ICC);
        assert_eq!(settings.page_height, Some(2));
        assert_eq!(settings.background, vec![255.0, 0.0, 0.0]);
        assert_eq!(options.iter().collect::<Vec<_>>(), vec![("q", "90")]);
    }

    #[test]
    fn strip_means_keep_nothing() {
        let mut options = Options::parse("strip").unwrap();
        let settings = SaveSettings::take_from(&mut options, &SaveConfig::default()).unwrap();
        assert_eq!(settings.keep, Keep::NONE);
    }

    #[test]
    fn profile_forces_icc_into_keep() {
        let mut options = Options::parse("strip,profile=/tmp/p.icc").unwrap();
        let settings = SaveSettings::take_from(&mut options, &SaveConfig::default()).unwrap();
        assert_eq!(settings.keep, Keep::ICC);
        assert_eq!(settings.profile, Some(PathBuf::from("/tmp/p.icc")));
    }

    #[test]
    fn bad_keep_is_bad_option() {
        let mut options = Options::parse("keep=everything").unwrap();
        assert!(matches!(
            SaveSettings::take_from(&mut options, &SaveConfig::default()),
            Err(ForeignError::BadOption { .. })
        ));
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    #[test]
    fn encoder_gets_stripped_copy_and_options() {
        let saver = FakeSaver::new().arc();
        let entry = entry(Saveable::RGB, saver.clone());
        let image = tagged_image();

        let bytes = save_to_buffer(&entry, &image, Options::parse("keep=icc").unwrap());
        assert_eq!(bytes, b"FAKE");

        let ready = saver.last();
        assert!(ready.meta().contains(meta::ICC));
        assert!(!ready.meta().contains(meta::XMP));
        assert!(!ready.meta().contains(meta::IMAGE_DESCRIPTION));
        assert!(!ready.meta().contains(meta::EXIF));
        assert!(!ready.meta().contains("exif-ifd0-Make"));
        // caller's image untouched
        assert!(image.meta().contains(meta::XMP));
        assert!(image.meta().contains(meta::EXIF));
    }

    #[test]
    fn keep_exif_hands_encoder_a_rebuilt_blob() {
        let saver = FakeSaver::new().arc();
        let entry = entry(Saveable::RGB, saver.clone());
        let image = tagged_image();

        save_to_buffer(&entry, &image, Options::parse("keep=exif").unwrap());

        let ready = saver.last();
        assert!(!ready.meta().contains(meta::XMP));
        assert!(!ready.meta().contains(meta::ICC));
        let blob = ready.meta().get_blob(meta::EXIF).unwrap();
        assert_ne!(Some(blob), image.meta().get_blob(meta::EXIF));
        let fields = Exif::parse(blob).unwrap().fields();
        assert!(fields.iter().any(|(k, v)| k == "exif-ifd0-Make" && v.starts_with("Canon (")));
    }

    #[test]
    fn alpha_flattened_onto_background_option() {
        let saver = FakeSaver::new().arc();
        let entry = entry(Saveable::RGB, saver.clone());
        let header = Header::new(2, 2, 4, BandFormat::UChar, Interpretation::SRgb);
        let image = solid(header, &[10.0, 20.0, 30.0, 0.0]);

        save_to_buffer(&entry, &image, Options::parse("background=255 128 0").unwrap());

        let ready = saver.last();
        assert_eq!(ready.bands(), 3);
        assert_eq!(ready.fetch(&Rect::new(1, 1, 1, 1)).unwrap(), vec![255, 128, 0]);
    }

    #[test]
    fn profile_file_is_embedded() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(&tmp, "srgb.icc", &fake_profile(b"RGB "));
        let saver = FakeSaver::new().arc();
        let entry = entry(Saveable::RGB, saver.clone());

        let options = Options::new().with("strip", "true").with("profile", path.display());
        save_to_buffer(&entry, &rgb_image(2, 2), options);

        let ready = saver.last();
        assert_eq!(ready.meta().get_blob(meta::ICC), Some(&fake_profile(b"RGB ")[..]));
    }

    #[test]
    fn missing_profile_file_is_io_error() {
        let saver = FakeSaver::new().arc();
        let entry = entry(Saveable::RGB, saver);
        let mut target = SaveTarget::Buffer(Vec::new());
        let options = Options::new().with("profile", "/nonexistent/profile.icc");
        let result = save(
            &entry,
            &rgb_image(2, 2),
            &mut target,
            options,
            &SaveConfig::default(),
            &BasicColour,
        );
        assert!(matches!(result, Err(ForeignError::Io(_))));
    }

    #[test]
    fn page_height_is_set_on_ready_image() {
        let saver = FakeSaver::new().arc();
        let entry = entry(Saveable::RGB, saver.clone());
        save_to_buffer(&entry, &rgb_image(2, 4), Options::parse("page_height=2").unwrap());
        assert_eq!(saver.last().meta().get_int(meta::PAGE_HEIGHT), Some(2));
    }

    #[test]
    fn unsupported_model_fails_before_encoder() {
        let saver = FakeSaver::new().arc();
        let entry = entry(Saveable::ALPHA, saver.clone());
        let mut target = SaveTarget::Buffer(Vec::new());
        let result = save(
            &entry,
            &rgb_image(2, 2),
            &mut target,
            Options::new(),
            &SaveConfig::default(),
            &BasicColour,
        );
        assert!(matches!(result, Err(ForeignError::UnsupportedOutputModel)));
        assert!(saver.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn wrong_target_kind_is_refused() {
        let saver = FakeSaver::new().arc();
        let entry = entry(Saveable::RGB, saver);
        let tmp = TempDir::new().unwrap();
        let mut target = SaveTarget::File(tmp.path().join("x.fake"));
        let result = save(
            &entry,
            &rgb_image(2, 2),
            &mut target,
            Options::new(),
            &SaveConfig::default(),
            &BasicColour,
        );
        assert!(matches!(result, Err(ForeignError::Encode { .. })));
    }
}
