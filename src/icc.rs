//! ICC profile sanity checks.
//!
//! Profiles inherited from a source image often don't fit the image being
//! saved: a CMYK profile on an image that was converted to sRGB, an RGB
//! profile on a greyscale export. Some encoders refuse such files outright,
//! so the save pipeline drops any profile that fails [`check_compatible`].
//!
//! Only the 128-byte header is inspected:
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | profile size, big-endian u32 |
//! | 16 | data colour space signature |
//! | 36 | `acsp` magic |

use crate::error::ForeignError;
use crate::image::Header;

const HEADER_SIZE: usize = 128;
const MAGIC: &[u8] = b"acsp";
const MAGIC_OFFSET: usize = 36;
const COLOUR_SPACE_OFFSET: usize = 16;

/// Colour channels a profile's data colour space describes, if known.
pub fn profile_bands(profile: &[u8]) -> Option<u32> {
    let signature = profile.get(COLOUR_SPACE_OFFSET..COLOUR_SPACE_OFFSET + 4)?;
    match signature {
        b"GRAY" => Some(1),
        b"RGB " | b"Lab " | b"XYZ " => Some(3),
        b"CMYK" => Some(4),
        _ => None,
    }
}

/// Check that `profile` is well formed and describes as many colour
/// channels as `header` has (alpha not counted).
pub fn check_compatible(profile: &[u8], header: &Header) -> Result<(), ForeignError> {
    let bad = |why: String| Err(ForeignError::IncompatibleIccProfile(why));

    if profile.len() < HEADER_SIZE {
        return bad(format!("{} bytes is shorter than a profile header", profile.len()));
    }
    if &profile[MAGIC_OFFSET..MAGIC_OFFSET + 4] != MAGIC {
        return bad("missing acsp signature".to_string());
    }
    let declared = u32::from_be_bytes([profile[0], profile[1], profile[2], profile[3]]) as usize;
    if declared > profile.len() {
        return bad(format!("declares {declared} bytes, has {}", profile.len()));
    }

    let colour_bands = header.bands - u32::from(header.has_alpha());
    match profile_bands(profile) {
        Some(needed) if needed != colour_bands => bad(format!(
            "profile is for {needed}-channel data, image has {colour_bands}"
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) fn fake_profile(colour_space: &[u8; 4]) -> Vec<u8> {
    let mut profile = vec![0u8; HEADER_SIZE];
    profile[..4].copy_from_slice(&(HEADER_SIZE as u32).to_be_bytes());
    profile[COLOUR_SPACE_OFFSET..COLOUR_SPACE_OFFSET + 4].copy_from_slice(colour_space);
    profile[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(MAGIC);
    profile
}
