//! Reshape an arbitrary image into something a particular encoder accepts.
//!
//! Each saver's descriptor advertises what it can write: a set of colour
//! models ([`Saveable`]), the band formats it takes (a [`FormatTable`]
//! mapping every input format to the one the encoder wants) and the pixel
//! codings it understands ([`CodingSet`]). [`convert_saveable`] bridges the
//! gap in a fixed order:
//!
//! | Step | What happens |
//! |------|--------------|
//! | pass-through | already acceptable images are returned untouched |
//! | unpack | LabQ becomes sRGB, Radiance becomes float |
//! | colour model | mono, CMYK or RGB, whichever the saver allows first |
//! | alpha | flattened onto the background if the saver has no alpha |
//! | bands | surplus bands dropped |
//! | format | cast through the promotion table |
//! | coding | packed to LabQ / Radiance, or unpacked, as the saver needs |
//!
//! Every step is lazy; nothing is computed until the encoder fetches.

use crate::error::ForeignError;
use crate::image::{BandFormat, Coding, Image, Interpretation};
use crate::ops::coding;
use crate::ops::colour::ColourEngine;
use crate::ops::conversion::{cast, extract_bands, flatten};
use crate::registry::{CodingSet, FormatTable, Saveable};
use log::debug;

/// Convert `image` to a shape the saver described by `saveable`,
/// `format_table` and `codings` can write.
pub fn convert_saveable(
    image: &Image,
    saveable: Saveable,
    format_table: &FormatTable,
    codings: CodingSet,
    background: &[f64],
    colour: &dyn ColourEngine,
) -> Result<Image, ForeignError> {
    // coded, and the saver takes that coding as is
    if image.coding() != Coding::None && codings.accepts(image.coding()) {
        return Ok(image.clone());
    }
    // uncoded, any model, and the format needs no promotion
    if image.coding() == Coding::None
        && saveable.is_any()
        && format_table.get(image.format()) == image.format()
    {
        return Ok(image.clone());
    }

    let mut out = apply_saveable(image, saveable, colour)?;

    if out.coding() == Coding::None
        && out.header().has_alpha()
        && !saveable.contains(Saveable::ALPHA)
    {
        debug!("flattening alpha onto {background:?}");
        out = flatten(&out, background)?;
    }

    let max_bands = max_bands(&out, saveable);
    if max_bands > 0 && out.bands() > max_bands {
        debug!("dropping {} surplus bands", out.bands() - max_bands);
        out = extract_bands(&out, 0, max_bands)?;
    }

    if out.coding() == Coding::None {
        let target = format_table.get(out.format());
        let shift = !out.format().is_8bit() && target.is_8bit();
        out = cast(&out, target, shift);
    }

    recode(out, codings)
}

/// Colour-model half of the conversion.
fn apply_saveable(
    image: &Image,
    saveable: Saveable,
    colour: &dyn ColourEngine,
) -> Result<Image, ForeignError> {
    if saveable.is_any() {
        return Ok(image.clone());
    }

    // depth follows the source, not the float intermediates below
    let sixteen = image.format() == BandFormat::UShort;

    let mut image = match image.coding() {
        Coding::LabQ => colour.colourspace(image, Interpretation::SRgb)?,
        Coding::Rad => coding::rad_to_float(image)?,
        Coding::None => image.clone(),
    };

    if saveable.contains(Saveable::MONO) && image.bands() < 3 {
        return Ok(image);
    }

    if image.header().guess_interpretation() == Interpretation::Cmyk && image.bands() >= 4 {
        if saveable.contains(Saveable::CMYK) {
            return Ok(image);
        }
        debug!("importing CMYK to XYZ");
        image = colour.icc_import(&image, true)?;
    }

    if saveable.contains(Saveable::RGB) {
        let target = if sixteen {
            Interpretation::Rgb16
        } else {
            Interpretation::SRgb
        };
        return colour.colourspace(&image, target);
    }

    if saveable.contains(Saveable::CMYK) {
        let depth = if sixteen { 16 } else { 8 };
        return colour.icc_export(&image, depth);
    }

    if saveable.contains(Saveable::MONO) {
        let target = if sixteen {
            Interpretation::Grey16
        } else {
            Interpretation::BW
        };
        return colour.colourspace(&image, target);
    }

    Err(ForeignError::UnsupportedOutputModel)
}

/// Most bands the saver can take, or 0 for no limit.
fn max_bands(image: &Image, saveable: Saveable) -> u32 {
    let colour = if saveable.is_any() {
        image.bands()
    } else {
        match image.interpretation() {
            Interpretation::BW | Interpretation::Grey16 => 1,
            Interpretation::Rgb
            | Interpretation::Cmc
            | Interpretation::Lch
            | Interpretation::LabS
            | Interpretation::SRgb
            | Interpretation::Yxy
            | Interpretation::Xyz
            | Interpretation::Lab
            | Interpretation::Rgb16
            | Interpretation::ScRgb
            | Interpretation::Hsv => 3,
            Interpretation::Cmyk => 4,
            _ => return 0,
        }
    };
    if saveable.contains(Saveable::ALPHA) {
        colour + 1
    } else {
        colour
    }
}

fn recode(image: Image, codings: CodingSet) -> Result<Image, ForeignError> {
    if codings.accepts(image.coding()) {
        Ok(image)
    } else if codings.accepts(Coding::LabQ) {
        coding::lab_to_labq(&coding::decode(&image)?)
    } else if codings.accepts(Coding::Rad) {
        coding::float_to_rad(&coding::decode(&image)?)
    } else {
        coding::decode(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Header, Rect};
    use crate::ops::colour::BasicColour;
    use crate::test_helpers::*;

    const PNG_TABLE: FormatTable = FormatTable::new([
        BandFormat::UChar,
        BandFormat::UChar,
        BandFormat::UShort,
        BandFormat::UShort,
        BandFormat::UShort,
        BandFormat::UShort,
        BandFormat::UChar,
        BandFormat::UChar,
        BandFormat::UChar,
        BandFormat::UChar,
    ]);

    fn convert(image: &Image, saveable: Saveable, table: &FormatTable) -> Image {
        convert_saveable(image, saveable, table, CodingSet::NONE, &[0.0], &BasicColour).unwrap()
    }

    fn first_pixel(image: &Image) -> Vec<u8> {
        image.fetch(&Rect::new(0, 0, 1, 1)).unwrap()
    }

    // =========================================================================
    // Pass-through
    // =========================================================================

    #[test]
    fn any_with_identity_table_is_untouched() {
        let img = rgb_image(4, 4);
        let out = convert(&img, Saveable::ANY, &FormatTable::IDENTITY);
        assert!(out.same_pixels(&img));
        assert_eq!(out.header(), img.header());
    }

    #[test]
    fn accepted_coding_is_untouched() {
        let img = Image::from_memory(Header::coded(2, 2, Coding::LabQ), vec![0; 16]).unwrap();
        let out = convert_saveable(
            &img,
            Saveable::RGB,
            &FormatTable::ALL_UCHAR,
            CodingSet::NONE | CodingSet::LABQ,
            &[],
            &BasicColour,
        )
        .unwrap();
        assert!(out.same_pixels(&img));
    }

    #[test]
    fn normalizing_twice_changes_nothing_more() {
        let header = Header::new(3, 3, 4, BandFormat::UShort, Interpretation::Rgb16);
        let img = synthetic(header, |x, _, b| (x * 1000 + b * 10) as f64);
        let once = convert(&img, Saveable::RGB, &FormatTable::ALL_UCHAR);
        let twice = convert(&once, Saveable::RGB, &FormatTable::ALL_UCHAR);
        assert_eq!(once.format(), BandFormat::UChar);
        assert_eq!(once.bands(), 3);
        assert_eq!(twice.format(), once.format());
        assert_eq!(twice.bands(), once.bands());
        assert_eq!(once.fetch_all().unwrap(), twice.fetch_all().unwrap());
    }

    // =========================================================================
    // Colour model
    // =========================================================================

    #[test]
    fn mono_kept_for_mono_saver() {
        let img = solid(
            Header::new(2, 2, 1, BandFormat::UChar, Interpretation::BW),
            &[77.0],
        );
        let out = convert(&img, Saveable::MONO | Saveable::RGB, &FormatTable::ALL_UCHAR);
        assert_eq!(out.bands(), 1);
        assert_eq!(first_pixel(&out), vec![77]);
    }

    #[test]
    fn mono_promoted_for_rgb_only_saver() {
        let img = solid(
            Header::new(2, 2, 1, BandFormat::UChar, Interpretation::BW),
            &[77.0],
        );
        let out = convert(&img, Saveable::RGB, &FormatTable::ALL_UCHAR);
        assert_eq!(out.bands(), 3);
        assert_eq!(out.interpretation(), Interpretation::SRgb);
        assert_eq!(first_pixel(&out), vec![77, 77, 77]);
    }

    #[test]
    fn cmyk_kept_when_allowed() {
        let img = solid(
            Header::new(1, 1, 4, BandFormat::UChar, Interpretation::Cmyk),
            &[10.0, 20.0, 30.0, 40.0],
        );
        let out = convert(&img, Saveable::CMYK | Saveable::RGB, &FormatTable::ALL_UCHAR);
        assert_eq!(out.interpretation(), Interpretation::Cmyk);
        assert_eq!(first_pixel(&out), vec![10, 20, 30, 40]);
    }

    #[test]
    fn cmyk_imported_for_rgb_saver() {
        let img = solid(
            Header::new(1, 1, 4, BandFormat::UChar, Interpretation::Cmyk),
            &[0.0, 0.0, 0.0, 0.0],
        );
        let out = convert(&img, Saveable::RGB, &FormatTable::ALL_UCHAR);
        assert_eq!(out.interpretation(), Interpretation::SRgb);
        assert_eq!(out.bands(), 3);
        assert_eq!(first_pixel(&out), vec![255, 255, 255]);
    }

    #[test]
    fn sixteen_bit_cmyk_stays_sixteen_bit_as_rgb() {
        let img = solid(
            Header::new(1, 1, 4, BandFormat::UShort, Interpretation::Cmyk),
            &[0.0, 0.0, 0.0, 0.0],
        );
        let out = convert(&img, Saveable::RGB, &FormatTable::IDENTITY);
        assert_eq!(out.format(), BandFormat::UShort);
        assert_eq!(out.interpretation(), Interpretation::Rgb16);
        assert_eq!(out.bands(), 3);
    }

    #[test]
    fn sixteen_bit_cmyk_stays_sixteen_bit_as_mono() {
        let img = solid(
            Header::new(1, 1, 4, BandFormat::UShort, Interpretation::Cmyk),
            &[0.0, 0.0, 0.0, 0.0],
        );
        let out = convert(&img, Saveable::MONO, &FormatTable::IDENTITY);
        assert_eq!(out.format(), BandFormat::UShort);
        assert_eq!(out.interpretation(), Interpretation::Grey16);
        assert_eq!(out.bands(), 1);
    }

    #[test]
    fn rgb_exported_to_cmyk_only_saver() {
        let img = solid(
            Header::new(1, 1, 3, BandFormat::UChar, Interpretation::SRgb),
            &[0.0, 0.0, 0.0],
        );
        let out = convert(&img, Saveable::CMYK, &FormatTable::ALL_UCHAR);
        assert_eq!(out.interpretation(), Interpretation::Cmyk);
        assert_eq!(first_pixel(&out), vec![0, 0, 0, 255]);
    }

    #[test]
    fn colour_to_grey16_for_mono_only_saver() {
        let img = solid(
            Header::new(1, 1, 3, BandFormat::UShort, Interpretation::Rgb16),
            &[65535.0, 65535.0, 65535.0],
        );
        let out = convert(&img, Saveable::MONO, &FormatTable::IDENTITY);
        assert_eq!(out.interpretation(), Interpretation::Grey16);
        assert_eq!(out.format(), BandFormat::UShort);
        assert_eq!(out.bands(), 1);
    }

    #[test]
    fn no_allowed_model_is_an_error() {
        let img = rgb_image(2, 2);
        let err = convert_saveable(
            &img,
            Saveable::ALPHA,
            &FormatTable::ALL_UCHAR,
            CodingSet::NONE,
            &[],
            &BasicColour,
        )
        .unwrap_err();
        assert!(matches!(err, ForeignError::UnsupportedOutputModel));
    }

    // =========================================================================
    // Alpha, bands, format
    // =========================================================================

    #[test]
    fn alpha_flattened_when_saver_has_none() {
        let img = solid(
            Header::new(1, 1, 4, BandFormat::UChar, Interpretation::SRgb),
            &[200.0, 100.0, 50.0, 128.0],
        );
        let out = convert_saveable(
            &img,
            Saveable::RGB,
            &FormatTable::ALL_UCHAR,
            CodingSet::NONE,
            &[255.0],
            &BasicColour,
        )
        .unwrap();
        assert_eq!(first_pixel(&out), vec![227, 177, 152]);
    }

    #[test]
    fn alpha_kept_when_saver_allows_it() {
        let img = solid(
            Header::new(1, 1, 4, BandFormat::UChar, Interpretation::SRgb),
            &[200.0, 100.0, 50.0, 128.0],
        );
        let out = convert(&img, Saveable::RGB | Saveable::ALPHA, &FormatTable::ALL_UCHAR);
        assert_eq!(first_pixel(&out), vec![200, 100, 50, 128]);
    }

    #[test]
    fn surplus_bands_are_dropped() {
        let img = solid(
            Header::new(1, 1, 5, BandFormat::UChar, Interpretation::SRgb),
            &[1.0, 2.0, 3.0, 4.0, 5.0],
        );
        let out = convert(&img, Saveable::RGB | Saveable::ALPHA, &FormatTable::ALL_UCHAR);
        assert_eq!(out.bands(), 4);
        assert_eq!(first_pixel(&out), vec![1, 2, 3, 4]);
    }

    #[test]
    fn sixteen_bit_shifts_down_to_eight() {
        let img = solid(
            Header::new(1, 1, 1, BandFormat::UShort, Interpretation::Grey16),
            &[f64::from(0x1234)],
        );
        let out = convert(&img, Saveable::MONO, &FormatTable::ALL_UCHAR);
        assert_eq!(out.format(), BandFormat::UChar);
        assert_eq!(first_pixel(&out), vec![0x12]);
    }

    #[test]
    fn promotion_table_widens_int() {
        let img = solid(
            Header::new(1, 1, 1, BandFormat::Int, Interpretation::BW),
            &[300.0],
        );
        let out = convert(&img, Saveable::MONO, &PNG_TABLE);
        assert_eq!(out.format(), BandFormat::UShort);
        assert_eq!(first_pixel(&out), 300u16.to_ne_bytes().to_vec());
    }

    // =========================================================================
    // Coding
    // =========================================================================

    #[test]
    fn labq_is_unpacked_for_uncoded_saver() {
        // L=100, a=b=0
        let img = Image::from_memory(Header::coded(1, 1, Coding::LabQ), vec![255, 0, 0, 0xC0])
            .unwrap();
        let out = convert(&img, Saveable::RGB, &FormatTable::ALL_UCHAR);
        assert_eq!(out.coding(), Coding::None);
        assert_eq!(out.bands(), 3);
        let px = first_pixel(&out);
        assert!(px.iter().all(|v| *v >= 250), "{px:?}");
    }

    #[test]
    fn labq_to_any_saver_decodes_to_lab() {
        let img = Image::from_memory(Header::coded(1, 1, Coding::LabQ), vec![255, 0, 0, 0xC0])
            .unwrap();
        let out = convert(&img, Saveable::ANY, &FormatTable::IDENTITY);
        assert_eq!(out.coding(), Coding::None);
        assert_eq!(out.interpretation(), Interpretation::Lab);
        assert_eq!(out.format(), BandFormat::Float);
    }

    #[test]
    fn uncoded_packed_for_labq_saver() {
        let header = Header::new(1, 1, 3, BandFormat::Float, Interpretation::Lab);
        let mut data = Vec::new();
        for v in [50.0f32, 0.0, 0.0] {
            data.extend_from_slice(&v.to_ne_bytes());
        }
        let img = Image::from_memory(header, data).unwrap();
        let out = convert_saveable(
            &img,
            Saveable::ANY,
            &FormatTable::ALL_UCHAR,
            CodingSet::LABQ,
            &[],
            &BasicColour,
        )
        .unwrap();
        assert_eq!(out.coding(), Coding::LabQ);
        assert_eq!(out.bands(), 4);
    }
}
