//! The contract between the pipelines and format handlers.
//!
//! A format plugs in by implementing [`Loader`] and/or [`Saver`] and
//! registering them with a [`FormatDescriptor`](crate::registry::FormatDescriptor)
//! that states its suffixes, priority and what pixel shapes it can write.
//!
//! # Loaders
//!
//! Loading is split in two so that opening an image is cheap:
//!
//! 1. [`Loader::header`] reads dimensions, format and metadata without
//!    decoding pixels.
//! 2. [`Loader::decode`] produces pixels. The load pipeline calls it the
//!    first time anyone asks for a pixel, and checks the result against the
//!    header.
//!
//! Loaders whose format makes the split pointless report
//! [`LoadStrategy::HeaderOnly`] and hand back pixels from `header`.
//!
//! Sniffing ([`Loader::is_a`]) must only look at leading bytes. For streams
//! the pipeline rewinds before every sniff and the sniffer must leave the
//! stream rewound.

use crate::error::ForeignError;
use crate::image::{Header, Image, Metadata};
use crate::io::{LoadInput, SaveTarget};
use crate::options::Options;
use crate::registry::ForeignFlags;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How pixels will be read after load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Access {
    /// Any region, any order.
    #[default]
    Random,
    /// Top to bottom, with a small cache of recent rows.
    Sequential,
    /// Top to bottom, no cache.
    SequentialUnbuffered,
}

impl FromStr for Access {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "random" => Ok(Access::Random),
            "sequential" => Ok(Access::Sequential),
            "sequential-unbuffered" => Ok(Access::SequentialUnbuffered),
            other => Err(format!("unknown access pattern \"{other}\"")),
        }
    }
}

/// Error level at which a loader gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailOn {
    /// Never stop.
    #[default]
    None,
    /// Stop on a truncated file.
    Truncated,
    /// Stop on any decode error.
    Error,
    /// Stop on anything suspicious.
    Warning,
}

impl FromStr for FailOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(FailOn::None),
            "truncated" => Ok(FailOn::Truncated),
            "error" => Ok(FailOn::Error),
            "warning" => Ok(FailOn::Warning),
            other => Err(format!("unknown fail_on level \"{other}\"")),
        }
    }
}

/// Whether a loader splits header reading from pixel decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    HeaderThenDecode,
    HeaderOnly,
}

/// Result of a header read.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub header: Header,
    pub meta: Metadata,
    /// Pixels, for [`LoadStrategy::HeaderOnly`] loaders.
    pub pixels: Option<Image>,
}

impl ImageInfo {
    pub fn new(header: Header, meta: Metadata) -> Self {
        Self {
            header,
            meta,
            pixels: None,
        }
    }
}

/// Marks a load operation as not worth caching.
///
/// Shared between the load pipeline, the cache entry and any lazy pixel
/// source a loader builds, so a read error that surfaces long after the load
/// returned still keeps the operation out of the cache.
#[derive(Debug, Clone, Default)]
pub struct Invalidator(Arc<AtomicBool>);

impl Invalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_invalid(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a loader sees during one load.
pub struct LoadContext<'a> {
    /// Operation name, e.g. `pngload_buffer`.
    pub name: &'a str,
    pub input: &'a LoadInput,
    /// Options left after the pipeline took its own.
    pub options: &'a Options,
    pub access: Access,
    pub fail_on: FailOn,
    pub(crate) invalidator: Invalidator,
}

impl LoadContext<'_> {
    /// Keep this load out of the operation cache.
    pub fn invalidate(&self) {
        self.invalidator.invalidate();
    }

    /// Handle for lazy pixel sources that may fail after load returns.
    pub fn invalidator(&self) -> Invalidator {
        self.invalidator.clone()
    }

    pub fn decode_error(&self, message: impl std::fmt::Display) -> ForeignError {
        ForeignError::decode(self.name, message)
    }
}

/// A format decoder.
pub trait Loader: Send + Sync {
    /// Whether [`is_a`](Self::is_a) can recognise this format. Loaders that
    /// cannot sniff are matched by filename suffix only.
    fn sniffs(&self) -> bool {
        true
    }

    /// Check the leading bytes of `input`.
    fn is_a(&self, _input: &LoadInput) -> Result<bool, ForeignError> {
        Ok(false)
    }

    /// Capabilities for this particular input.
    fn flags(&self, _input: &LoadInput) -> ForeignFlags {
        ForeignFlags::NONE
    }

    fn strategy(&self) -> LoadStrategy {
        LoadStrategy::HeaderThenDecode
    }

    /// Read the header and metadata.
    fn header(&self, ctx: &LoadContext) -> Result<ImageInfo, ForeignError>;

    /// Produce pixels matching the header.
    fn decode(&self, ctx: &LoadContext) -> Result<Image, ForeignError> {
        Err(ctx.decode_error("loader has no separate decode step"))
    }
}

/// Everything a saver sees during one save.
pub struct SaveContext<'a> {
    pub name: &'a str,
    /// Saver-specific options.
    pub options: &'a Options,
    pub target: &'a mut SaveTarget,
}

impl SaveContext<'_> {
    pub fn encode_error(&self, message: impl std::fmt::Display) -> ForeignError {
        ForeignError::encode(self.name, message)
    }
}

/// A format encoder. Receives an image already normalized to the shape its
/// descriptor advertises.
pub trait Saver: Send + Sync {
    fn save(&self, ready: &Image, ctx: &mut SaveContext) -> Result<(), ForeignError>;
}
