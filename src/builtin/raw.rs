//! Headerless sample files.
//!
//! `rawload` never takes part in discovery: the caller names it and supplies
//! the shape.
//!
//! | Option | Default | |
//! |--------|---------|-|
//! | `width`, `height`, `bands` | required | |
//! | `format` | `uchar` | band format name |
//! | `interpretation` | `multiband` | |
//! | `offset` | 0 | bytes to skip before the first pixel |
//!
//! Samples are in machine byte order.

use super::native::FilePixels;
use super::warn_unused;
use crate::error::ForeignError;
use crate::handler::{ImageInfo, LoadContext, Loader};
use crate::image::{BandFormat, Header, Image, Interpretation, Metadata};
use crate::io::{IoKind, LoadInput};
use crate::options::Options;
use crate::registry::{ForeignFlags, FormatDescriptor, RegistryBuilder};
use std::fs::File;
use std::sync::Arc;

pub fn register(builder: &mut RegistryBuilder) -> Result<(), ForeignError> {
    builder.register_loader(
        FormatDescriptor::loader("raw", IoKind::File)
            .description("load raw data from a file")
            .suffixes(&[".raw"])
            .build(),
        Arc::new(RawLoader),
    )
}

#[derive(Debug, Clone, PartialEq)]
struct RawParams {
    header: Header,
    offset: u64,
}

impl RawParams {
    fn from_options(options: &Options) -> Result<(Self, Options), ForeignError> {
        let mut options = options.clone();
        let mut required = |key: &str| -> Result<u32, ForeignError> {
            match options.take_parsed::<u32>(key)? {
                Some(0) => Err(ForeignError::bad_option(key, "must be positive")),
                Some(v) => Ok(v),
                None => Err(ForeignError::bad_option(key, "required")),
            }
        };
        let width = required("width")?;
        let height = required("height")?;
        let bands = required("bands")?;

        let format = match options.remove("format") {
            Some(name) => BandFormat::from_name(&name).ok_or_else(|| {
                ForeignError::bad_option("format", format!("unknown band format \"{name}\""))
            })?,
            None => BandFormat::UChar,
        };
        let interpretation = match options.remove("interpretation") {
            Some(name) => Interpretation::from_name(&name).ok_or_else(|| {
                ForeignError::bad_option(
                    "interpretation",
                    format!("unknown interpretation \"{name}\""),
                )
            })?,
            None => Interpretation::Multiband,
        };
        let offset = options.take_parsed::<u64>("offset")?.unwrap_or(0);

        let header = Header::new(width, height, bands, format, interpretation);
        Ok((Self { header, offset }, options))
    }
}

pub struct RawLoader;

impl RawLoader {
    /// Shape from the options, checked against the file size.
    fn params(&self, ctx: &LoadContext) -> Result<(RawParams, File), ForeignError> {
        let LoadInput::File(path) = ctx.input else {
            return Err(ctx.decode_error("raw data can only be read from a file"));
        };
        let (params, rest) = RawParams::from_options(ctx.options)?;
        warn_unused(ctx.name, &rest);

        let file = File::open(path)?;
        let needed = params
            .header
            .checked_sizeof_image()
            .and_then(|bytes| params.offset.checked_add(bytes))
            .ok_or_else(|| ctx.decode_error("image too large"))?;
        let size = file.metadata()?.len();
        if size < needed {
            return Err(ctx.decode_error(format!(
                "file has {size} bytes, {} needs {needed}",
                params.header
            )));
        }
        Ok((params, file))
    }
}

impl Loader for RawLoader {
    fn sniffs(&self) -> bool {
        false
    }

    fn flags(&self, _input: &LoadInput) -> ForeignFlags {
        ForeignFlags::new().with_partial(true)
    }

    fn header(&self, ctx: &LoadContext) -> Result<ImageInfo, ForeignError> {
        let (params, _) = self.params(ctx)?;
        Ok(ImageInfo::new(params.header, Metadata::new()))
    }

    fn decode(&self, ctx: &LoadContext) -> Result<Image, ForeignError> {
        let (params, file) = self.params(ctx)?;
        let source = FilePixels::new(file, params.offset, &params.header, None);
        Ok(Image::new(params.header, Metadata::new(), Arc::new(source)))
    }
}
