//! Error type shared by the registry, the load and save pipelines and the
//! built-in handlers.
//!
//! Structural problems (missing input, no matching handler, a loader whose
//! decoded pixels disagree with its header) are fatal. Content problems the
//! pipeline can recover from, such as an ICC profile that does not fit the
//! image, are logged and swallowed by the caller. Handler errors keep the
//! handler's own message.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForeignError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file \"{}\" does not exist", .0.display())]
    InputNotFound(PathBuf),
    #[error("\"{}\" is a directory", .0.display())]
    InputIsDirectory(PathBuf),
    #[error("\"{0}\" is not a known file format")]
    UnknownFormat(String),
    #[error("saver does not support any output type")]
    UnsupportedOutputModel,
    #[error("images do not match between header and load: {0}")]
    HeaderLoadMismatch(String),
    #[error("{loader}: {message}")]
    Decode { loader: String, message: String },
    #[error("{saver}: {message}")]
    Encode { saver: String, message: String },
    #[error("colour conversion failed: {0}")]
    Colour(String),
    #[error("ICC profile not compatible with image: {0}")]
    IncompatibleIccProfile(String),
    #[error("handler \"{name}\" is misconfigured: {reason}")]
    MisconfiguredHandler { name: String, reason: String },
    #[error("{0}: load failed earlier")]
    LoadFailed(String),
    #[error("no such operation \"{0}\"")]
    NoSuchOperation(String),
    #[error("bad value for option \"{key}\": {message}")]
    BadOption { key: String, message: String },
    #[error("region {left},{top} {width}x{height} lies outside the image")]
    BadRegion {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    },
}

impl ForeignError {
    pub(crate) fn decode(loader: &str, message: impl std::fmt::Display) -> Self {
        ForeignError::Decode {
            loader: loader.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn encode(saver: &str, message: impl std::fmt::Display) -> Self {
        ForeignError::Encode {
            saver: saver.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn bad_option(key: &str, message: impl std::fmt::Display) -> Self {
        ForeignError::BadOption {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}
