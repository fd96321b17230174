use super::{point_op, read_pixel};
use crate::error::ForeignError;
use crate::image::{BandFormat, Header, Image};

/// Composite the alpha band onto a solid background and drop it.
///
/// `background` holds one value per remaining band, or a single value used
/// for all of them. Each output sample is
/// `fg * a / max + bg * (1 - a / max)`, rounded for integer formats.
pub fn flatten(image: &Image, background: &[f64]) -> Result<Image, ForeignError> {
    let header = *image.header();
    if header.bands < 2 {
        return Ok(image.clone());
    }
    let colour_bands = (header.bands - 1) as usize;
    let background: Vec<f64> = match background.len() {
        0 => vec![0.0; colour_bands],
        1 => vec![background[0]; colour_bands],
        n if n == colour_bands => background.to_vec(),
        n => {
            return Err(ForeignError::bad_option(
                "background",
                format!("{n} values given for {colour_bands} bands"),
            ));
        }
    };
    let max_alpha = header.max_alpha();
    let format = header.format;
    let round = format.is_int();
    let out = Header {
        bands: header.bands - 1,
        ..header
    };

    Ok(point_op(image, out, move |px, dst| {
        let v = read_pixel(&header, px);
        let a = (v[colour_bands] / max_alpha).clamp(0.0, 1.0);
        for (fg, bg) in v[..colour_bands].iter().zip(&background) {
            let blended = fg * a + bg * (1.0 - a);
            format.write(if round { blended.round() } else { blended }, dst);
        }
    }))
}

/// Keep `n` bands starting at band `first`.
pub fn extract_bands(image: &Image, first: u32, n: u32) -> Result<Image, ForeignError> {
    let header = *image.header();
    if n == 0 || first + n > header.bands {
        return Err(ForeignError::bad_option(
            "n",
            format!("bands {first}..{} of a {}-band image", first + n, header.bands),
        ));
    }
    if first == 0 && n == header.bands {
        return Ok(image.clone());
    }
    let size = header.format.size();
    let start = first as usize * size;
    let end = start + n as usize * size;
    let out = Header { bands: n, ..header };
    Ok(point_op(image, out, move |px, dst| {
        dst.extend_from_slice(&px[start..end]);
    }))
}

/// Convert samples to `format`.
///
/// With `shift`, integer samples are shifted right by the difference in bit
/// width instead of being clamped, so 16-bit `0x1234` becomes 8-bit `0x12`.
/// Floats are truncated toward zero on the way to integer formats.
pub fn cast(image: &Image, format: BandFormat, shift: bool) -> Image {
    let header = *image.header();
    if header.format == format {
        return image.clone();
    }
    let in_fmt = header.format;
    let shift_by = if shift && in_fmt.is_int() && format.is_int() && in_fmt.bits() > format.bits()
    {
        in_fmt.bits() - format.bits()
    } else {
        0
    };
    let out = Header { format, ..header };
    point_op(image, out, move |px, dst| {
        for sample in px.chunks_exact(in_fmt.size()) {
            let v = in_fmt.read(sample);
            let v = if shift_by > 0 {
                ((v as i64) >> shift_by) as f64
            } else {
                v
            };
            format.write(v, dst);
        }
    })
}
