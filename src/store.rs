//! Backing stores for decoded pixels.
//!
//! When a loader decodes, its output goes into one of three places:
//!
//! | Store | When | Cost |
//! |-------|------|------|
//! | direct | loader supports partial reads, or is sequential and the caller reads sequentially | nothing held, regions come straight from the loader |
//! | disc | image larger than the disc threshold | one temporary file, rows read back on demand |
//! | memory | everything else, or the caller asked for memory | the whole image in RAM |

use crate::error::ForeignError;
use crate::handler::Access;
use crate::image::{Header, Image, PixelSource, Rect};
use crate::registry::ForeignFlags;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

/// Rows written per chunk when spilling to disc.
const SPILL_ROWS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Direct,
    Disc,
}

/// Pick where decoded pixels should live.
///
/// `size` is the uncompressed image size in bytes; `disc` enables the
/// temporary-file store at all.
pub fn choose_store(
    memory: bool,
    flags: ForeignFlags,
    access: Access,
    size: u64,
    disc: bool,
    disc_threshold: u64,
) -> StoreKind {
    if memory {
        StoreKind::Memory
    } else if flags.partial() {
        StoreKind::Direct
    } else if flags.sequential() && access != Access::Random {
        StoreKind::Direct
    } else if disc && size > disc_threshold {
        StoreKind::Disc
    } else {
        StoreKind::Memory
    }
}

/// Move `image` into the chosen store.
pub fn fill(kind: StoreKind, image: Image) -> Result<Image, ForeignError> {
    match kind {
        StoreKind::Direct => Ok(image),
        StoreKind::Memory => image.to_memory(),
        StoreKind::Disc => spill_to_disc(&image),
    }
}

/// Rows kept in an anonymous temporary file.
struct DiscSource {
    file: Mutex<File>,
    line: usize,
    pel: usize,
}

impl PixelSource for DiscSource {
    fn fetch(&self, rect: &Rect) -> Result<Vec<u8>, ForeignError> {
        let row_bytes = rect.width as usize * self.pel;
        let mut out = vec![0u8; row_bytes * rect.height as usize];
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        for (i, row) in out.chunks_exact_mut(row_bytes.max(1)).enumerate() {
            let y = rect.top as u64 + i as u64;
            let offset = y * self.line as u64 + rect.left as u64 * self.pel as u64;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(row)?;
        }
        Ok(out)
    }
}

/// Write every row of `image` to a temporary file, top to bottom, and
/// return an image that reads from it.
pub fn spill_to_disc(image: &Image) -> Result<Image, ForeignError> {
    let header: Header = *image.header();
    let mut file = tempfile::tempfile()?;
    for top in (0..header.height).step_by(SPILL_ROWS as usize) {
        let rows = SPILL_ROWS.min(header.height - top);
        let chunk = image.fetch(&Rect::new(0, top, header.width, rows))?;
        file.write_all(&chunk)?;
    }
    file.flush()?;
    let source = DiscSource {
        file: Mutex::new(file),
        line: header.sizeof_line(),
        pel: header.sizeof_pel(),
    };
    Ok(Image::new(header, image.meta().clone(), Arc::new(source)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::rgb_image;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn memory_flag_wins() {
        let flags = ForeignFlags::new().with_partial(true);
        assert_eq!(
            choose_store(true, flags, Access::Random, 10 * MB, true, MB),
            StoreKind::Memory
        );
    }

    #[test]
    fn partial_loaders_read_directly() {
        let flags = ForeignFlags::new().with_partial(true);
        assert_eq!(
            choose_store(false, flags, Access::Random, 10 * MB, true, MB),
            StoreKind::Direct
        );
    }

    #[test]
    fn sequential_loader_direct_only_for_sequential_access() {
        let flags = ForeignFlags::new().with_sequential(true);
        assert_eq!(
            choose_store(false, flags, Access::Sequential, 10, true, MB),
            StoreKind::Direct
        );
        assert_eq!(
            choose_store(false, flags, Access::Random, 10, true, MB),
            StoreKind::Memory
        );
    }

    #[test]
    fn large_images_go_to_disc() {
        let none = ForeignFlags::NONE;
        assert_eq!(
            choose_store(false, none, Access::Random, 2 * MB, true, MB),
            StoreKind::Disc
        );
        assert_eq!(
            choose_store(false, none, Access::Random, 2 * MB, false, MB),
            StoreKind::Memory
        );
        assert_eq!(
            choose_store(false, none, Access::Random, MB, true, MB),
            StoreKind::Memory
        );
    }

    #[test]
    fn disc_store_reads_back_regions() {
        let img = rgb_image(70, 130);
        let disc = spill_to_disc(&img).unwrap();
        let rect = Rect::new(5, 64, 10, 3);
        assert_eq!(disc.fetch(&rect).unwrap(), img.fetch(&rect).unwrap());
        assert!(!disc.same_pixels(&img));
    }
}
