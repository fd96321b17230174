//! The handful of pixel operations the save pipeline needs to reshape an
//! image for an encoder.
//!
//! | Module | Operations |
//! |--------|------------|
//! | [`conversion`] | flatten alpha, extract bands, cast between formats |
//! | [`coding`] | LabQ and Radiance pack / unpack |
//! | [`colour`] | colour-space conversion and CMYK import / export |
//!
//! Every operation is lazy: it returns a new [`Image`] whose pixel source
//! pulls the matching rectangle from its input and transforms it pixel by
//! pixel when fetched.

pub mod coding;
pub mod colour;
pub mod conversion;

use crate::error::ForeignError;
use crate::image::{Header, Image, PixelSource, Rect};
use std::sync::Arc;

type PixelFn = dyn Fn(&[u8], &mut Vec<u8>) + Send + Sync;

/// Computes each output pixel from the input pixel at the same position.
struct PointSource {
    input: Image,
    in_pel: usize,
    out_pel: usize,
    op: Box<PixelFn>,
}

impl PixelSource for PointSource {
    fn fetch(&self, rect: &Rect) -> Result<Vec<u8>, ForeignError> {
        let src = self.input.fetch(rect)?;
        let mut out = Vec::with_capacity(rect.area() * self.out_pel);
        for px in src.chunks_exact(self.in_pel) {
            (self.op)(px, &mut out);
        }
        Ok(out)
    }
}

/// Build a lazy per-pixel operation. `op` receives one input pixel and must
/// append exactly one output pixel of `header`'s shape.
pub(crate) fn point_op(
    input: &Image,
    header: Header,
    op: impl Fn(&[u8], &mut Vec<u8>) + Send + Sync + 'static,
) -> Image {
    let source = PointSource {
        input: input.clone(),
        in_pel: input.header().sizeof_pel(),
        out_pel: header.sizeof_pel(),
        op: Box::new(op),
    };
    Image::new(header, input.meta().clone(), Arc::new(source))
}

/// Read every band of one pixel as `f64`.
pub(crate) fn read_pixel(header: &Header, px: &[u8]) -> Vec<f64> {
    px.chunks_exact(header.format.size())
        .map(|s| header.format.read(s))
        .collect()
}
