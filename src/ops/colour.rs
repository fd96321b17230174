//! Colour-space conversion.
//!
//! The save pipeline only needs three colour services: move an image into a
//! named colour space, import CMYK through a profile, and export to CMYK.
//! [`ColourEngine`] is that seam. [`BasicColour`] implements it with the
//! textbook sRGB / XYZ / CIELAB formulas and a naive CMYK model; it does no
//! ICC-driven transforms, so embedded profiles are noted and otherwise
//! ignored.
//!
//! Every conversion goes through linear RGB. Extra bands past the colour
//! bands are treated as alpha and rescaled to the target's alpha range.

use super::coding;
use super::point_op;
use crate::error::ForeignError;
use crate::image::{meta, BandFormat, Coding, Header, Image, Interpretation};
use log::debug;

/// Colour transforms consumed by the saveable normalizer.
pub trait ColourEngine: Send + Sync {
    /// Convert to `target`, keeping any alpha bands.
    fn colourspace(&self, image: &Image, target: Interpretation) -> Result<Image, ForeignError>;

    /// Import a CMYK image to XYZ, through its embedded profile when
    /// `embedded` is set and one is attached, else a generic CMYK profile.
    fn icc_import(&self, image: &Image, embedded: bool) -> Result<Image, ForeignError>;

    /// Export to CMYK with 8 or 16 bits per sample.
    fn icc_export(&self, image: &Image, depth: u32) -> Result<Image, ForeignError>;
}

/// Formula-based colour engine with no colour management.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicColour;

impl ColourEngine for BasicColour {
    fn colourspace(&self, image: &Image, target: Interpretation) -> Result<Image, ForeignError> {
        convert(image, target, false)
    }

    fn icc_import(&self, image: &Image, embedded: bool) -> Result<Image, ForeignError> {
        if embedded && image.meta().contains(meta::ICC) {
            debug!("icc_import: embedded profile present, using generic CMYK model");
        }
        convert(image, Interpretation::Xyz, false)
    }

    fn icc_export(&self, image: &Image, depth: u32) -> Result<Image, ForeignError> {
        if depth != 8 && depth != 16 {
            return Err(ForeignError::bad_option("depth", format!("{depth} is not 8 or 16")));
        }
        convert(image, Interpretation::Cmyk, depth == 16)
    }
}

// sRGB primaries, D65
const RGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.412453, 0.357580, 0.180423],
    [0.212671, 0.715160, 0.072169],
    [0.019334, 0.119193, 0.950227],
];

const XYZ_TO_RGB: [[f64; 3]; 3] = [
    [3.240479, -1.537150, -0.498535],
    [-0.969256, 1.875991, 0.041556],
    [0.055648, -0.204043, 1.057311],
];

const X_N: f64 = 0.950456;
const Z_N: f64 = 1.088754;
const EPSILON: f64 = 0.008856;
const KAPPA_INV: f64 = 7.787;

fn srgb_to_linear(v: f64) -> f64 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f64) -> f64 {
    if v <= 0.04045 / 12.92 {
        v * 12.92
    } else {
        1.055 * v.max(0.0).powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f64) -> f64 {
    if t > EPSILON {
        t.cbrt()
    } else {
        KAPPA_INV * t + 16.0 / 116.0
    }
}

fn lab_f_inv(t: f64) -> f64 {
    if t > 0.206893 {
        t * t * t
    } else {
        (t - 16.0 / 116.0) / KAPPA_INV
    }
}

fn mul(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Colour spaces this engine can read and write.
fn supported(space: Interpretation) -> bool {
    matches!(
        space,
        Interpretation::BW
            | Interpretation::Grey16
            | Interpretation::SRgb
            | Interpretation::Rgb
            | Interpretation::Rgb16
            | Interpretation::ScRgb
            | Interpretation::Xyz
            | Interpretation::Lab
            | Interpretation::Cmyk
    )
}

/// Full-scale value of a display-referred sample.
fn white(space: Interpretation, format: BandFormat) -> f64 {
    match space {
        Interpretation::Grey16 | Interpretation::Rgb16 => 65535.0,
        Interpretation::Cmyk if matches!(format, BandFormat::UShort | BandFormat::Short) => {
            65535.0
        }
        _ => 255.0,
    }
}

fn alpha_max(space: Interpretation) -> f64 {
    match space {
        Interpretation::Grey16 | Interpretation::Rgb16 => 65535.0,
        Interpretation::ScRgb => 1.0,
        _ => 255.0,
    }
}

fn to_linear(space: Interpretation, scale: f64, v: &[f64]) -> [f64; 3] {
    match space {
        Interpretation::BW | Interpretation::Grey16 => [srgb_to_linear(v[0] / scale); 3],
        Interpretation::SRgb | Interpretation::Rgb | Interpretation::Rgb16 => [
            srgb_to_linear(v[0] / scale),
            srgb_to_linear(v[1] / scale),
            srgb_to_linear(v[2] / scale),
        ],
        Interpretation::Xyz => mul(&XYZ_TO_RGB, [v[0] / 100.0, v[1] / 100.0, v[2] / 100.0]),
        Interpretation::Lab => {
            let fy = (v[0] + 16.0) / 116.0;
            let fx = v[1] / 500.0 + fy;
            let fz = fy - v[2] / 200.0;
            mul(
                &XYZ_TO_RGB,
                [lab_f_inv(fx) * X_N, lab_f_inv(fy), lab_f_inv(fz) * Z_N],
            )
        }
        Interpretation::Cmyk => {
            let k = 1.0 - v[3] / scale;
            [
                srgb_to_linear((1.0 - v[0] / scale) * k),
                srgb_to_linear((1.0 - v[1] / scale) * k),
                srgb_to_linear((1.0 - v[2] / scale) * k),
            ]
        }
        // scRGB is already linear
        _ => [v[0], v[1], v[2]],
    }
}

fn from_linear(space: Interpretation, scale: f64, rgb: [f64; 3], out: &mut Vec<f64>) {
    match space {
        Interpretation::BW | Interpretation::Grey16 => {
            let y = mul(&RGB_TO_XYZ, rgb)[1];
            out.push(linear_to_srgb(y) * scale);
        }
        Interpretation::SRgb | Interpretation::Rgb | Interpretation::Rgb16 => {
            out.extend(rgb.iter().map(|c| linear_to_srgb(*c) * scale));
        }
        Interpretation::Xyz => out.extend(mul(&RGB_TO_XYZ, rgb).iter().map(|c| c * 100.0)),
        Interpretation::Lab => {
            let xyz = mul(&RGB_TO_XYZ, rgb);
            let fx = lab_f(xyz[0] / X_N);
            let fy = lab_f(xyz[1]);
            let fz = lab_f(xyz[2] / Z_N);
            out.extend([116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]);
        }
        Interpretation::Cmyk => {
            let [r, g, b] = rgb.map(|c| linear_to_srgb(c).clamp(0.0, 1.0));
            let k = 1.0 - r.max(g).max(b);
            if k >= 1.0 {
                out.extend([0.0, 0.0, 0.0, scale]);
            } else {
                let c = (1.0 - r - k) / (1.0 - k);
                let m = (1.0 - g - k) / (1.0 - k);
                let y = (1.0 - b - k) / (1.0 - k);
                out.extend([c * scale, m * scale, y * scale, k * scale]);
            }
        }
        _ => out.extend(rgb),
    }
}

fn target_format(space: Interpretation, sixteen: bool) -> BandFormat {
    match space {
        Interpretation::Grey16 | Interpretation::Rgb16 => BandFormat::UShort,
        Interpretation::Cmyk if sixteen => BandFormat::UShort,
        Interpretation::BW | Interpretation::SRgb | Interpretation::Rgb | Interpretation::Cmyk => {
            BandFormat::UChar
        }
        _ => BandFormat::Float,
    }
}

fn convert(image: &Image, target: Interpretation, sixteen: bool) -> Result<Image, ForeignError> {
    let image = if image.coding() == Coding::None {
        image.clone()
    } else {
        coding::decode(image)?
    };
    let header = *image.header();
    let guessed = header.guess_interpretation();
    let source = if supported(guessed) {
        guessed
    } else if header.bands >= 3 {
        Interpretation::SRgb
    } else {
        Interpretation::BW
    };
    if !supported(target) {
        return Err(ForeignError::Colour(format!("cannot convert to {target}")));
    }

    let out_format = target_format(target, sixteen);
    if source == target && header.format == out_format {
        return Ok(image.with_interpretation(target));
    }

    let in_colour = source.colour_bands().unwrap_or(1);
    let out_colour = target.colour_bands().unwrap_or(1);
    if header.bands < in_colour {
        return Err(ForeignError::Colour(format!(
            "{source} image needs {in_colour} bands, has {}",
            header.bands
        )));
    }
    let extra = header.bands - in_colour;
    let in_scale = white(source, header.format);
    let out_scale = white(target, out_format);
    let alpha_scale = alpha_max(target) / header.max_alpha();
    let round = out_format.is_int();
    let in_colour = in_colour as usize;

    let out = Header {
        bands: out_colour + extra,
        format: out_format,
        coding: Coding::None,
        interpretation: target,
        ..header
    };

    debug!("colourspace {source} -> {target} ({} -> {})", header.format, out_format);
    Ok(point_op(&image, out, move |px, dst| {
        let v = super::read_pixel(&header, px);
        let mut values = Vec::with_capacity(out.bands as usize);
        from_linear(target, out_scale, to_linear(source, in_scale, &v), &mut values);
        values.extend(v[in_colour..].iter().map(|a| a * alpha_scale));
        for value in values {
            out_format.write(if round { value.round() } else { value }, dst);
        }
    }))
}
