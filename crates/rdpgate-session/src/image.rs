//! Composition surface for decoded RemoteFX regions.

use rdpgate_graphics::image::{ImageRegion, ImageRegionMut, PixelFormat};
use rdpgate_pdu::geometry::{InclusiveRectangle, Rectangle as _};

/// A session-lifetime RGBA32 surface the RemoteFX decoder composites into.
///
/// The buffer is allocated once from the negotiated desktop size and reused
/// frame to frame; regions outside the surface are clipped on write.
#[derive(Debug)]
pub struct Framebuffer {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

impl Framebuffer {
    pub const PIXEL_FORMAT: PixelFormat = PixelFormat::RgbA32;

    pub fn new(width: u16, height: u16) -> Self {
        let len = usize::from(width) * usize::from(height) * usize::from(Self::PIXEL_FORMAT.bytes_per_pixel());

        Self {
            width,
            height,
            data: vec![0; len],
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Tightly packed RGBA32 pixels, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copies `source` onto the surface with its top-left corner at
    /// (`left`, `top`). Returns the surface rectangle actually written, or
    /// `None` when the destination lies entirely outside the surface.
    pub fn apply_region(&mut self, source: &ImageRegion<'_>, left: u16, top: u16) -> Option<InclusiveRectangle> {
        if self.width == 0 || self.height == 0 || left >= self.width || top >= self.height {
            return None;
        }

        let right = core::cmp::min(left + source.region.width() - 1, self.width - 1);
        let bottom = core::cmp::min(top + source.region.height() - 1, self.height - 1);

        let destination = InclusiveRectangle {
            left,
            top,
            right,
            bottom,
        };

        let step = self.width * u16::from(Self::PIXEL_FORMAT.bytes_per_pixel());
        let mut target = ImageRegionMut {
            region: destination.clone(),
            step,
            pixel_format: Self::PIXEL_FORMAT,
            data: &mut self.data,
        };

        source.copy_to(&mut target);

        Some(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_tile(size: u16, byte: u8) -> Vec<u8> {
        vec![byte; usize::from(size) * usize::from(size) * 4]
    }

    fn tile_region(data: &[u8], size: u16) -> ImageRegion<'_> {
        ImageRegion {
            region: InclusiveRectangle {
                left: 0,
                top: 0,
                right: size - 1,
                bottom: size - 1,
            },
            step: 0,
            pixel_format: PixelFormat::RgbA32,
            data,
        }
    }

    #[test]
    fn region_is_written_at_the_requested_offset() {
        let mut fb = Framebuffer::new(8, 8);
        let tile = solid_tile(2, 0xAA);

        let applied = fb.apply_region(&tile_region(&tile, 2), 4, 2).unwrap();

        assert_eq!(
            applied,
            InclusiveRectangle {
                left: 4,
                top: 2,
                right: 5,
                bottom: 3,
            }
        );

        // first pixel of the applied region
        let offset = (2 * 8 + 4) * 4;
        assert_eq!(&fb.data()[offset..offset + 4], &[0xAA; 4]);
        // pixel left of it untouched
        assert_eq!(&fb.data()[offset - 4..offset], &[0; 4]);
    }

    #[test]
    fn region_extending_past_the_surface_is_clipped() {
        let mut fb = Framebuffer::new(5, 5);
        let tile = solid_tile(4, 0x55);

        let applied = fb.apply_region(&tile_region(&tile, 4), 3, 3).unwrap();

        assert_eq!(applied.right, 4);
        assert_eq!(applied.bottom, 4);
    }

    #[test]
    fn region_fully_outside_the_surface_is_dropped() {
        let mut fb = Framebuffer::new(4, 4);
        let tile = solid_tile(2, 0xFF);

        assert_eq!(fb.apply_region(&tile_region(&tile, 2), 4, 0), None);
        assert!(fb.data().iter().all(|&b| b == 0));
    }
}
