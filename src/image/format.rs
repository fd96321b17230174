//! Pixel numeric formats, coding states and colour interpretations.
//!
//! Samples are stored native-endian. Complex formats store a (real,
//! imaginary) pair per band; conversions that need a single number read the
//! real component.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric format of one band of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandFormat {
    UChar,
    Char,
    UShort,
    Short,
    UInt,
    Int,
    Float,
    Complex,
    Double,
    DpComplex,
}

impl BandFormat {
    /// Every format, in promotion-table order.
    pub const ALL: [BandFormat; 10] = [
        BandFormat::UChar,
        BandFormat::Char,
        BandFormat::UShort,
        BandFormat::Short,
        BandFormat::UInt,
        BandFormat::Int,
        BandFormat::Float,
        BandFormat::Complex,
        BandFormat::Double,
        BandFormat::DpComplex,
    ];

    /// Position of this format in a promotion table.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bytes per band sample.
    pub const fn size(self) -> usize {
        match self {
            BandFormat::UChar | BandFormat::Char => 1,
            BandFormat::UShort | BandFormat::Short => 2,
            BandFormat::UInt | BandFormat::Int | BandFormat::Float => 4,
            BandFormat::Complex | BandFormat::Double => 8,
            BandFormat::DpComplex => 16,
        }
    }

    pub const fn is_8bit(self) -> bool {
        matches!(self, BandFormat::UChar | BandFormat::Char)
    }

    pub const fn is_int(self) -> bool {
        matches!(
            self,
            BandFormat::UChar
                | BandFormat::Char
                | BandFormat::UShort
                | BandFormat::Short
                | BandFormat::UInt
                | BandFormat::Int
        )
    }

    pub const fn is_complex(self) -> bool {
        matches!(self, BandFormat::Complex | BandFormat::DpComplex)
    }

    /// Bit width of an integer sample. Zero for non-integer formats.
    pub const fn bits(self) -> u32 {
        if self.is_int() {
            (self.size() * 8) as u32
        } else {
            0
        }
    }

    /// Representable range of an integer format.
    pub fn range(self) -> Option<(f64, f64)> {
        match self {
            BandFormat::UChar => Some((0.0, u8::MAX as f64)),
            BandFormat::Char => Some((i8::MIN as f64, i8::MAX as f64)),
            BandFormat::UShort => Some((0.0, u16::MAX as f64)),
            BandFormat::Short => Some((i16::MIN as f64, i16::MAX as f64)),
            BandFormat::UInt => Some((0.0, u32::MAX as f64)),
            BandFormat::Int => Some((i32::MIN as f64, i32::MAX as f64)),
            _ => None,
        }
    }

    /// Read one sample. `bytes` must hold at least [`size`](Self::size) bytes.
    pub fn read(self, bytes: &[u8]) -> f64 {
        match self {
            BandFormat::UChar => bytes[0] as f64,
            BandFormat::Char => bytes[0] as i8 as f64,
            BandFormat::UShort => u16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
            BandFormat::Short => i16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
            BandFormat::UInt => u32::from_ne_bytes(four(bytes)) as f64,
            BandFormat::Int => i32::from_ne_bytes(four(bytes)) as f64,
            BandFormat::Float | BandFormat::Complex => f32::from_ne_bytes(four(bytes)) as f64,
            BandFormat::Double | BandFormat::DpComplex => f64::from_ne_bytes(eight(bytes)),
        }
    }

    /// Append one sample. Integer formats truncate toward zero and clamp to
    /// their range; complex formats get a zero imaginary part.
    pub fn write(self, value: f64, out: &mut Vec<u8>) {
        let clamped = match self.range() {
            Some((lo, hi)) if value.is_nan() => lo.max(0.0).min(hi),
            Some((lo, hi)) => value.trunc().clamp(lo, hi),
            None => value,
        };
        match self {
            BandFormat::UChar => out.push(clamped as u8),
            BandFormat::Char => out.push(clamped as i8 as u8),
            BandFormat::UShort => out.extend_from_slice(&(clamped as u16).to_ne_bytes()),
            BandFormat::Short => out.extend_from_slice(&(clamped as i16).to_ne_bytes()),
            BandFormat::UInt => out.extend_from_slice(&(clamped as u32).to_ne_bytes()),
            BandFormat::Int => out.extend_from_slice(&(clamped as i32).to_ne_bytes()),
            BandFormat::Float => out.extend_from_slice(&(clamped as f32).to_ne_bytes()),
            BandFormat::Complex => {
                out.extend_from_slice(&(clamped as f32).to_ne_bytes());
                out.extend_from_slice(&0f32.to_ne_bytes());
            }
            BandFormat::Double => out.extend_from_slice(&clamped.to_ne_bytes()),
            BandFormat::DpComplex => {
                out.extend_from_slice(&clamped.to_ne_bytes());
                out.extend_from_slice(&0f64.to_ne_bytes());
            }
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            BandFormat::UChar => "uchar",
            BandFormat::Char => "char",
            BandFormat::UShort => "ushort",
            BandFormat::Short => "short",
            BandFormat::UInt => "uint",
            BandFormat::Int => "int",
            BandFormat::Float => "float",
            BandFormat::Complex => "complex",
            BandFormat::Double => "double",
            BandFormat::DpComplex => "dpcomplex",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for BandFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn four(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn eight(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}

/// Pixel coding. Coded images always have four uchar bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coding {
    /// Plain band samples.
    None,
    /// Packed Lab: 10-bit L, 11-bit a and b in 32 bits.
    LabQ,
    /// Radiance RGBE: shared 8-bit exponent.
    Rad,
}

impl Coding {
    pub const fn name(self) -> &'static str {
        match self {
            Coding::None => "none",
            Coding::LabQ => "labq",
            Coding::Rad => "rad",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [Coding::None, Coding::LabQ, Coding::Rad]
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the bands of an image should be understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpretation {
    Multiband,
    #[serde(rename = "b-w")]
    BW,
    Grey16,
    Histogram,
    Fourier,
    Matrix,
    Xyz,
    Lab,
    LabQ,
    LabS,
    Lch,
    Cmc,
    Yxy,
    Hsv,
    Cmyk,
    Rgb,
    #[serde(rename = "srgb")]
    SRgb,
    #[serde(rename = "scrgb")]
    ScRgb,
    Rgb16,
}

impl Interpretation {
    const ALL: [Interpretation; 19] = [
        Interpretation::Multiband,
        Interpretation::BW,
        Interpretation::Grey16,
        Interpretation::Histogram,
        Interpretation::Fourier,
        Interpretation::Matrix,
        Interpretation::Xyz,
        Interpretation::Lab,
        Interpretation::LabQ,
        Interpretation::LabS,
        Interpretation::Lch,
        Interpretation::Cmc,
        Interpretation::Yxy,
        Interpretation::Hsv,
        Interpretation::Cmyk,
        Interpretation::Rgb,
        Interpretation::SRgb,
        Interpretation::ScRgb,
        Interpretation::Rgb16,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Interpretation::Multiband => "multiband",
            Interpretation::BW => "b-w",
            Interpretation::Grey16 => "grey16",
            Interpretation::Histogram => "histogram",
            Interpretation::Fourier => "fourier",
            Interpretation::Matrix => "matrix",
            Interpretation::Xyz => "xyz",
            Interpretation::Lab => "lab",
            Interpretation::LabQ => "labq",
            Interpretation::LabS => "labs",
            Interpretation::Lch => "lch",
            Interpretation::Cmc => "cmc",
            Interpretation::Yxy => "yxy",
            Interpretation::Hsv => "hsv",
            Interpretation::Cmyk => "cmyk",
            Interpretation::Rgb => "rgb",
            Interpretation::SRgb => "srgb",
            Interpretation::ScRgb => "scrgb",
            Interpretation::Rgb16 => "rgb16",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|i| i.name().eq_ignore_ascii_case(name))
    }

    /// Number of colour bands, not counting alpha.
    pub const fn colour_bands(self) -> Option<u32> {
        match self {
            Interpretation::BW | Interpretation::Grey16 => Some(1),
            Interpretation::Cmyk => Some(4),
            Interpretation::Xyz
            | Interpretation::Lab
            | Interpretation::LabS
            | Interpretation::Lch
            | Interpretation::Cmc
            | Interpretation::Yxy
            | Interpretation::Hsv
            | Interpretation::Rgb
            | Interpretation::SRgb
            | Interpretation::ScRgb
            | Interpretation::Rgb16 => Some(3),
            _ => None,
        }
    }
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
