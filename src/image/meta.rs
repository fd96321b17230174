//! Named metadata attached to an image.
//!
//! Field names are an external contract shared with every handler, so the
//! well-known ones are exported as constants.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the operation that loaded the image.
pub const LOADER: &str = "vips-loader";
pub const EXIF: &str = "exif-data";
pub const XMP: &str = "xmp-data";
pub const IPTC: &str = "iptc-data";
pub const ICC: &str = "icc-profile-data";
pub const IMAGE_DESCRIPTION: &str = "image-description";
pub const PAGE_HEIGHT: &str = "page-height";
pub const N_PAGES: &str = "n-pages";
pub const RESOLUTION_UNIT: &str = "resolution-unit";
pub const ORIENTATION: &str = "orientation";
/// Set to 1 when pixels may only be read top to bottom.
pub const SEQUENTIAL: &str = "vips-sequential";

#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Int(i64),
    Double(f64),
    Str(String),
    Blob(Arc<[u8]>),
}

/// Ordered field map. Cloning is cheap for blobs, which are shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: BTreeMap<String, MetaValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&MetaValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            MetaValue::Int(v) => Some(*v),
            MetaValue::Double(v) => Some(*v as i64),
            MetaValue::Str(s) => s.trim().parse().ok(),
            MetaValue::Blob(_) => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            MetaValue::Int(v) => Some(*v as f64),
            MetaValue::Double(v) => Some(*v),
            MetaValue::Str(s) => s.trim().parse().ok(),
            MetaValue::Blob(_) => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name)? {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_blob(&self, name: &str) -> Option<&[u8]> {
        match self.fields.get(name)? {
            MetaValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: MetaValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn set_int(&mut self, name: impl Into<String>, value: i64) {
        self.set(name, MetaValue::Int(value));
    }

    pub fn set_double(&mut self, name: impl Into<String>, value: f64) {
        self.set(name, MetaValue::Double(value));
    }

    pub fn set_str(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set(name, MetaValue::Str(value.into()));
    }

    pub fn set_blob(&mut self, name: impl Into<String>, value: impl Into<Arc<[u8]>>) {
        self.set(name, MetaValue::Blob(value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<MetaValue> {
        self.fields.remove(name)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &MetaValue) -> bool) {
        self.fields.retain(|k, v| keep(k, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
