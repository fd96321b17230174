//! Which embedded metadata survives a save.
//!
//! Metadata fields fall into categories, selected with a [`Keep`] mask:
//!
//! | Category | Fields |
//! |----------|--------|
//! | EXIF | `exif-data`, structured `exif-ifd*` fields |
//! | XMP | `xmp-data` |
//! | IPTC | `iptc-data` |
//! | ICC | `icc-profile-data` |
//! | other | `image-description`, `png-comment-*`, `magickprofile-*`, any other `*-data` blob |
//!
//! Fields outside these categories (orientation, page height, loader name,
//! resolution unit ...) describe the image rather than embed data in it, and
//! are never removed.
//!
//! ## Update order
//!
//! [`update_metadata`] runs on the saver's private copy of the image:
//!
//! 1. If EXIF is kept, `exif-data` is rebuilt from the current fields and
//!    header (see [`crate::exif::update`]).
//! 2. Unless everything is kept, fields in dropped categories are removed.
//! 3. If ICC is kept, an attached profile that doesn't fit the image is
//!    removed quietly.

use crate::exif;
use crate::icc;
use crate::image::{meta, Image};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Set of metadata categories to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Keep(u8);

impl Keep {
    pub const NONE: Keep = Keep(0);
    pub const EXIF: Keep = Keep(1);
    pub const XMP: Keep = Keep(1 << 1);
    pub const IPTC: Keep = Keep(1 << 2);
    pub const ICC: Keep = Keep(1 << 3);
    pub const OTHER: Keep = Keep(1 << 4);
    pub const ALL: Keep = Keep(0b1_1111);

    const NAMED: [(Keep, &'static str); 5] = [
        (Keep::EXIF, "exif"),
        (Keep::XMP, "xmp"),
        (Keep::IPTC, "iptc"),
        (Keep::ICC, "icc"),
        (Keep::OTHER, "other"),
    ];

    pub const fn union(self, other: Keep) -> Keep {
        Keep(self.0 | other.0)
    }

    pub const fn contains(self, other: Keep) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for Keep {
    fn default() -> Self {
        Keep::ALL
    }
}

impl std::ops::BitOr for Keep {
    type Output = Keep;

    fn bitor(self, rhs: Keep) -> Keep {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for Keep {
    fn bitor_assign(&mut self, rhs: Keep) {
        *self = self.union(rhs);
    }
}

/// `"none"`, `"all"`, or category names joined with `|`, `:` or spaces:
/// `"exif|icc"`.
impl FromStr for Keep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut keep = Keep::NONE;
        for word in s
            .split(|c: char| c == '|' || c == ':' || c.is_whitespace())
            .filter(|w| !w.is_empty())
        {
            keep |= match word.to_ascii_lowercase().as_str() {
                "none" => Keep::NONE,
                "all" => Keep::ALL,
                other => Keep::NAMED
                    .iter()
                    .find(|(_, name)| *name == other)
                    .map(|(k, _)| *k)
                    .ok_or_else(|| format!("unknown metadata category \"{other}\""))?,
            };
        }
        Ok(keep)
    }
}

impl fmt::Display for Keep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Keep::ALL {
            return f.write_str("all");
        }
        let names: Vec<&str> = Keep::NAMED
            .iter()
            .filter(|(k, _)| self.contains(*k))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

impl TryFrom<String> for Keep {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Keep> for String {
    fn from(keep: Keep) -> String {
        keep.to_string()
    }
}

/// Category a metadata field belongs to, or `None` for fields that are
/// never stripped.
pub fn category(field: &str) -> Option<Keep> {
    match field {
        meta::EXIF => Some(Keep::EXIF),
        meta::XMP => Some(Keep::XMP),
        meta::IPTC => Some(Keep::IPTC),
        meta::ICC => Some(Keep::ICC),
        meta::IMAGE_DESCRIPTION => Some(Keep::OTHER),
        f if f.starts_with("exif-ifd") => Some(Keep::EXIF),
        f if f.starts_with("png-comment-")
            || f.starts_with("magickprofile-")
            || f.ends_with("-data") =>
        {
            Some(Keep::OTHER)
        }
        _ => None,
    }
}

/// Apply the keep mask to `image`'s metadata, in place.
pub fn update_metadata(image: &mut Image, keep: Keep) {
    let header = *image.header();

    if keep.contains(Keep::EXIF) {
        exif::update(image.meta_mut(), &header);
    }

    if keep != Keep::ALL {
        image
            .meta_mut()
            .retain(|name, _| category(name).is_none_or(|c| keep.contains(c)));
    }

    if keep.contains(Keep::ICC) {
        let verdict = image
            .meta()
            .get_blob(meta::ICC)
            .map(|profile| icc::check_compatible(profile, &header));
        if let Some(Err(e)) = verdict {
            debug!("dropping ICC profile: {e}");
            image.meta_mut().remove(meta::ICC);
        }
    }
}
