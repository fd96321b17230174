//! Handlers compiled into imgport.
//!
//! | Format | Load | Save | Suffixes | Notes |
//! |--------|------|------|----------|-------|
//! | PNG | file, buffer, source | file, buffer, target | `.png` | 8 and 16 bit, alpha |
//! | JPEG | file, buffer, source | file, buffer, target | `.jpg` `.jpeg` `.jpe` | 8 bit, no alpha, `Q` option |
//! | TIFF | file, buffer, source | file, buffer, target | `.tif` `.tiff` | 8 and 16 bit |
//! | WebP | file, buffer, source | file, buffer, target | `.webp` | lossless, 8 bit |
//! | native | file, buffer, source | file, buffer, target | `.nimg` | any shape, coding and metadata; partial reads from files |
//! | raw | file | | `.raw` | headerless samples, only by name |
//!
//! The image-crate codecs live in [`codec`], the native container in
//! [`native`] and the raw loader in [`raw`].

pub mod codec;
pub mod native;
pub mod raw;

use crate::error::ForeignError;
use crate::options::Options;
use crate::registry::{Registry, RegistryBuilder};
use log::warn;

type Register = fn(&mut RegistryBuilder) -> Result<(), ForeignError>;

/// A registry holding every built-in handler.
pub fn registry() -> Registry {
    let modules: [(&str, Register); 3] = [
        ("codec", codec::register),
        ("native", native::register),
        ("raw", raw::register),
    ];
    registry_from(&modules)
}

/// Register each module in turn. A module that fails is reported and
/// skipped; the others still register.
fn registry_from(modules: &[(&str, Register)]) -> Registry {
    let mut builder = Registry::builder();
    for (module, register) in modules {
        if let Err(e) = register(&mut builder) {
            warn!("built-in {module} handlers incomplete: {e}");
        }
    }
    builder.build()
}

/// Log options a handler did not recognise.
pub(crate) fn warn_unused(operation: &str, options: &Options) {
    for (key, value) in options.iter() {
        warn!("{operation}: ignoring unknown option {key}={value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoKind;

    #[test]
    fn every_builtin_is_registered() {
        let registry = registry();
        for name in [
            "pngload",
            "pngload_buffer",
            "pngload_source",
            "jpegsave",
            "tiffsave_target",
            "webpsave_buffer",
            "nimgload",
            "nimgsave_buffer",
            "rawload",
        ] {
            assert!(registry.descriptor(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn failing_module_does_not_stop_the_rest() {
        fn broken(_: &mut RegistryBuilder) -> Result<(), ForeignError> {
            Err(ForeignError::decode("broken", "codec unavailable"))
        }
        let modules: [(&str, Register); 2] = [("broken", broken), ("native", native::register)];
        let registry = registry_from(&modules);
        assert!(registry.descriptor("nimgload").is_some());
        assert!(registry.descriptor("pngload").is_none());
    }

    #[test]
    fn suffixes_cover_all_savers() {
        let suffixes = registry().suffixes();
        for s in [".png", ".jpg", ".tif", ".webp", ".nimg"] {
            assert!(suffixes.iter().any(|x| x == s), "{s} missing");
        }
        assert!(!suffixes.iter().any(|x| x == ".raw"));
    }

    #[test]
    fn raw_is_never_discovered() {
        let registry = registry();
        assert_eq!(
            registry.loader("rawload").unwrap().descriptor.io(),
            IoKind::File
        );
        assert!(registry.find_save(".raw").is_err());
    }
}
