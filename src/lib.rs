//! # imgport
//!
//! Format-agnostic image loading and saving. Programs ask a [`Session`] to
//! load a file, buffer or stream, or to save an image to a file, buffer or
//! writer; the session finds the right handler in a registry, runs it, and
//! hands back a lazily decoded image or the encoded bytes.
//!
//! # Architecture: Load and Save Pipelines
//!
//! ```text
//! load:  discover ─► header ─► (first fetch) decode ─► store ─► pixels
//! save:  discover ─► convert to saveable ─► copy ─► metadata policy ─► encode
//! ```
//!
//! Discovery tries loaders by descending priority: first every loader that
//! can sniff the leading bytes, then loaders that match by suffix only.
//! Savers are always chosen by suffix. Handlers plug in through the
//! [`Loader`](handler::Loader) and [`Saver`](handler::Saver) traits and
//! describe themselves with an immutable
//! [`FormatDescriptor`](registry::FormatDescriptor).
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | Entry point: discovery, load cache, save dispatch |
//! | [`registry`] | Descriptors, capability flags, priority ordering, discovery queries |
//! | [`handler`] | `Loader` / `Saver` traits and the contexts they receive |
//! | [`load`] | Header read, lazy decode under a per-load mutex, failure tracking |
//! | [`store`] | Memory, temporary-file or direct backing for decoded pixels |
//! | [`cache`] | sha256-keyed cache of load operations |
//! | [`normalize`] | Reshape an image into what a saver accepts |
//! | [`save`] | Save pipeline and the generic save options |
//! | [`metadata`] | Keep mask and metadata stripping before save |
//! | [`exif`] | EXIF blob parsing and rewriting |
//! | [`icc`] | ICC profile compatibility checks |
//! | [`image`] | Image header, metadata map, lazy pixel sources |
//! | [`ops`] | Pixel operations: cast, flatten, band extraction, unpacking, colour |
//! | [`options`] | `name[key=value,...]` option bags |
//! | [`io`] | Load inputs and save targets |
//! | [`builtin`] | PNG, JPEG, TIFF and WebP via the `image` crate, native and raw formats |
//! | [`config`] | `imgport.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//! | [`error`] | `ForeignError` |
//!
//! # Design Decisions
//!
//! ## Lazy Decode
//!
//! A load reads only the header. Pixels are decoded the first time anything
//! fetches a region, so `imgport header` never decodes and a pipeline that
//! only needs the shape pays nothing for the pixels. A decode that fails
//! fails for good on that operation, and the cache drops it so the next
//! identical load tries again from scratch.
//!
//! ## Saves Never Touch the Input
//!
//! The save pipeline builds a private copy whose metadata it edits, so the
//! same image can be saved to a stripped JPEG and a fully tagged TIFF one
//! after the other.

pub mod builtin;
pub mod cache;
pub mod config;
pub mod error;
pub mod exif;
pub mod handler;
pub mod icc;
pub mod image;
pub mod io;
pub mod load;
pub mod metadata;
pub mod normalize;
pub mod ops;
pub mod options;
pub mod output;
pub mod registry;
pub mod save;
pub mod session;
pub mod store;

pub use error::ForeignError;
pub use session::Session;

#[cfg(test)]
pub(crate) mod test_helpers;
