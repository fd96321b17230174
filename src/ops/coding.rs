//! Packed pixel codings.
//!
//! LabQ packs a Lab pixel into four bytes: the top 8 bits of a 10-bit L in
//! byte 0, the top 8 bits of 11-bit signed a and b in bytes 1 and 2, and the
//! low bits of all three in byte 3 (`LL aaa bbb`). L is scaled by 10.23, a
//! and b by 8.
//!
//! Rad is Radiance RGBE: three mantissa bytes and a shared exponent biased
//! by 128.

use super::conversion::cast;
use super::{point_op, read_pixel};
use crate::error::ForeignError;
use crate::image::{BandFormat, Coding, Header, Image, Interpretation};

/// Unpack LabQ to three float Lab bands.
pub fn labq_to_lab(image: &Image) -> Result<Image, ForeignError> {
    expect_coding(image, Coding::LabQ)?;
    let out = Header {
        bands: 3,
        format: BandFormat::Float,
        coding: Coding::None,
        interpretation: Interpretation::Lab,
        ..*image.header()
    };
    Ok(point_op(image, out, |px, dst| {
        let [l, a, b] = unpack_labq([px[0], px[1], px[2], px[3]]);
        for v in [l, a, b] {
            dst.extend_from_slice(&(v as f32).to_ne_bytes());
        }
    }))
}

/// Pack the first three bands of a Lab image into LabQ.
pub fn lab_to_labq(image: &Image) -> Result<Image, ForeignError> {
    expect_coding(image, Coding::None)?;
    if image.bands() < 3 {
        return Err(ForeignError::bad_option(
            "coding",
            format!("LabQ needs 3 bands, image has {}", image.bands()),
        ));
    }
    let input = *image.header();
    let out = Header::coded(input.width, input.height, Coding::LabQ);
    let out = Header {
        xres: input.xres,
        yres: input.yres,
        ..out
    };
    Ok(point_op(image, out, move |px, dst| {
        let v = read_pixel(&input, px);
        dst.extend_from_slice(&pack_labq([v[0], v[1], v[2]]));
    }))
}

/// Unpack Radiance RGBE to three float bands.
pub fn rad_to_float(image: &Image) -> Result<Image, ForeignError> {
    expect_coding(image, Coding::Rad)?;
    let out = Header {
        bands: 3,
        format: BandFormat::Float,
        coding: Coding::None,
        interpretation: Interpretation::ScRgb,
        ..*image.header()
    };
    Ok(point_op(image, out, |px, dst| {
        for v in unpack_rgbe([px[0], px[1], px[2], px[3]]) {
            dst.extend_from_slice(&(v as f32).to_ne_bytes());
        }
    }))
}

/// Pack the first three bands into Radiance RGBE.
pub fn float_to_rad(image: &Image) -> Result<Image, ForeignError> {
    expect_coding(image, Coding::None)?;
    if image.bands() < 3 {
        return Err(ForeignError::bad_option(
            "coding",
            format!("Rad needs 3 bands, image has {}", image.bands()),
        ));
    }
    let float = cast(image, BandFormat::Float, false);
    let input = *float.header();
    let out = Header {
        xres: input.xres,
        yres: input.yres,
        ..Header::coded(input.width, input.height, Coding::Rad)
    };
    Ok(point_op(&float, out, move |px, dst| {
        let v = read_pixel(&input, px);
        dst.extend_from_slice(&pack_rgbe([v[0], v[1], v[2]]));
    }))
}

/// Remove any coding, leaving plain band samples.
pub fn decode(image: &Image) -> Result<Image, ForeignError> {
    match image.coding() {
        Coding::None => Ok(image.clone()),
        Coding::LabQ => labq_to_lab(image),
        Coding::Rad => rad_to_float(image),
    }
}

fn expect_coding(image: &Image, coding: Coding) -> Result<(), ForeignError> {
    if image.coding() != coding {
        return Err(ForeignError::bad_option(
            "coding",
            format!("expected {coding} image, got {}", image.coding()),
        ));
    }
    Ok(())
}

pub(crate) fn unpack_labq(px: [u8; 4]) -> [f64; 3] {
    let l = ((px[0] as i32) << 2) | ((px[3] as i32) >> 6);
    let a = ((px[1] as i8 as i32) << 3) | (((px[3] as i32) >> 3) & 7);
    let b = ((px[2] as i8 as i32) << 3) | ((px[3] as i32) & 7);
    [l as f64 / 10.23, a as f64 / 8.0, b as f64 / 8.0]
}

pub(crate) fn pack_labq(lab: [f64; 3]) -> [u8; 4] {
    let l = (lab[0] * 10.23).round().clamp(0.0, 1023.0) as i32;
    let a = (lab[1] * 8.0).round().clamp(-1024.0, 1023.0) as i32;
    let b = (lab[2] * 8.0).round().clamp(-1024.0, 1023.0) as i32;
    [
        (l >> 2) as u8,
        (a >> 3) as u8,
        (b >> 3) as u8,
        (((l & 3) << 6) | ((a & 7) << 3) | (b & 7)) as u8,
    ]
}

pub(crate) fn unpack_rgbe(px: [u8; 4]) -> [f64; 3] {
    if px[3] == 0 {
        return [0.0; 3];
    }
    let f = 2f64.powi(px[3] as i32 - (128 + 8));
    [
        (px[0] as f64 + 0.5) * f,
        (px[1] as f64 + 0.5) * f,
        (px[2] as f64 + 0.5) * f,
    ]
}

pub(crate) fn pack_rgbe(rgb: [f64; 3]) -> [u8; 4] {
    let v = rgb[0].max(rgb[1]).max(rgb[2]);
    if !(v >= 1e-32) {
        return [0; 4];
    }
    let (mantissa, exponent) = frexp(v);
    let scale = mantissa * 256.0 / v;
    [
        (rgb[0] * scale).clamp(0.0, 255.0) as u8,
        (rgb[1] * scale).clamp(0.0, 255.0) as u8,
        (rgb[2] * scale).clamp(0.0, 255.0) as u8,
        (exponent + 128).clamp(0, 255) as u8,
    ]
}

/// Split a positive finite `v` into `m * 2^e` with `m` in `[0.5, 1)`.
fn frexp(v: f64) -> (f64, i32) {
    let mut e = v.log2().floor() as i32 + 1;
    let mut m = v / 2f64.powi(e);
    if m >= 1.0 {
        m /= 2.0;
        e += 1;
    } else if m < 0.5 {
        m *= 2.0;
        e -= 1;
    }
    (m, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Rect;

    #[test]
    fn labq_packs_low_bits_into_fourth_byte() {
        // L=50 -> 511.5 -> 512, a=-3 -> -24, b=10.25 -> 82
        let packed = pack_labq([50.0, -3.0, 10.25]);
        assert_eq!(packed[0], (512 >> 2) as u8);
        assert_eq!(packed[1], (-24i32 >> 3) as u8);
        assert_eq!(packed[2], (82 >> 3) as u8);
        // L low bits 00, a low bits 000, b low bits 010
        assert_eq!(packed[3], 0b00_000_010);
        let [l, a, b] = unpack_labq(packed);
        assert!((l - 50.05).abs() < 0.01);
        assert_eq!(a, -3.0);
        assert_eq!(b, 10.25);
    }

    #[test]
    fn rgbe_zero_exponent_is_black() {
        assert_eq!(unpack_rgbe([200, 10, 10, 0]), [0.0; 3]);
        assert_eq!(pack_rgbe([0.0, 0.0, 0.0]), [0; 4]);
    }

    #[test]
    fn rgbe_keeps_relative_magnitudes() {
        let packed = pack_rgbe([1.0, 0.5, 0.25]);
        assert_eq!(packed, [128, 64, 32, 129]);
        let [r, g, b] = unpack_rgbe(packed);
        assert!((r - 1.0).abs() < 0.01);
        assert!((g - 0.5).abs() < 0.01);
        assert!((b - 0.25).abs() < 0.01);
    }

    #[test]
    fn decode_labq_image() {
        let header = Header::coded(1, 1, Coding::LabQ);
        let img = Image::from_memory(header, pack_labq([100.0, 0.0, 0.0]).to_vec()).unwrap();
        let lab = decode(&img).unwrap();
        assert_eq!(lab.coding(), Coding::None);
        assert_eq!(lab.format(), BandFormat::Float);
        assert_eq!(lab.interpretation(), Interpretation::Lab);
        let px = lab.fetch(&Rect::new(0, 0, 1, 1)).unwrap();
        let l = f32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
        assert!((l - 100.0).abs() < 0.1);
    }

    #[test]
    fn float_to_rad_requires_three_bands() {
        let header = Header::new(1, 1, 1, BandFormat::Float, Interpretation::BW);
        let img = Image::from_memory(header, 1f32.to_ne_bytes().to_vec()).unwrap();
        assert!(float_to_rad(&img).is_err());
    }
}
