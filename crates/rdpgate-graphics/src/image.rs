//! Raster region copies used to composite decoded tiles into a surface.

use core::{cmp, fmt};

use rdpgate_pdu::geometry::{InclusiveRectangle, Rectangle as _};

const MAX_ALPHA: u8 = 0xFF;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PixelFormat {
    RgbA32,
    RgbX32,
    BgrA32,
    BgrX32,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u8 {
        match self {
            Self::RgbA32 | Self::RgbX32 | Self::BgrA32 | Self::BgrX32 => 4,
        }
    }

    fn read_color(self, buffer: &[u8]) -> Rgba {
        match self {
            Self::RgbA32 => Rgba {
                r: buffer[0],
                g: buffer[1],
                b: buffer[2],
                a: buffer[3],
            },
            Self::RgbX32 => Rgba {
                r: buffer[0],
                g: buffer[1],
                b: buffer[2],
                a: MAX_ALPHA,
            },
            Self::BgrA32 => Rgba {
                b: buffer[0],
                g: buffer[1],
                r: buffer[2],
                a: buffer[3],
            },
            Self::BgrX32 => Rgba {
                b: buffer[0],
                g: buffer[1],
                r: buffer[2],
                a: MAX_ALPHA,
            },
        }
    }

    fn write_color(self, color: Rgba, buffer: &mut [u8]) {
        match self {
            Self::RgbA32 | Self::RgbX32 => {
                buffer[0] = color.r;
                buffer[1] = color.g;
                buffer[2] = color.b;
                buffer[3] = color.a;
            }
            Self::BgrA32 | Self::BgrX32 => {
                buffer[0] = color.b;
                buffer[1] = color.g;
                buffer[2] = color.r;
                buffer[3] = color.a;
            }
        }
    }

    fn channel_order_matches(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::RgbA32 | Self::RgbX32, Self::RgbA32 | Self::RgbX32)
                | (Self::BgrA32 | Self::BgrX32, Self::BgrA32 | Self::BgrX32)
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

pub struct ImageRegion<'a> {
    pub region: InclusiveRectangle,
    /// Row stride in bytes; 0 means tightly packed.
    pub step: u16,
    pub pixel_format: PixelFormat,
    pub data: &'a [u8],
}

impl fmt::Debug for ImageRegion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRegion")
            .field("region", &self.region)
            .field("step", &self.step)
            .field("pixel_format", &self.pixel_format)
            .field("data_len", &self.data.len())
            .finish()
    }
}

pub struct ImageRegionMut<'a> {
    pub region: InclusiveRectangle,
    pub step: u16,
    pub pixel_format: PixelFormat,
    pub data: &'a mut [u8],
}

impl fmt::Debug for ImageRegionMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRegionMut")
            .field("region", &self.region)
            .field("step", &self.step)
            .field("pixel_format", &self.pixel_format)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl ImageRegion<'_> {
    /// Copies the overlapping part of this region into `other`.
    ///
    /// The copied extent is the minimum of both region sizes, so a source
    /// tile larger than the remaining destination area is clipped.
    pub fn copy_to(&self, other: &mut ImageRegionMut<'_>) {
        let width = usize::from(cmp::min(self.region.width(), other.region.width()));
        let height = usize::from(cmp::min(self.region.height(), other.region.height()));

        let src_x = usize::from(self.region.left);
        let src_y = usize::from(self.region.top);
        let dst_x = usize::from(other.region.left);
        let dst_y = usize::from(other.region.top);

        let src_byte = usize::from(self.pixel_format.bytes_per_pixel());
        let dst_byte = usize::from(other.pixel_format.bytes_per_pixel());

        let src_step = if self.step == 0 {
            usize::from(self.region.width()) * src_byte
        } else {
            usize::from(self.step)
        };
        let dst_step = if other.step == 0 {
            width * dst_byte
        } else {
            usize::from(other.step)
        };

        if self.pixel_format.channel_order_matches(other.pixel_format) {
            let row_bytes = width * dst_byte;
            for y in 0..height {
                let src_start = (y + src_y) * src_step + src_x * src_byte;
                let dst_start = (y + dst_y) * dst_step + dst_x * dst_byte;
                other.data[dst_start..dst_start + row_bytes]
                    .copy_from_slice(&self.data[src_start..src_start + row_bytes]);
            }
        } else {
            for y in 0..height {
                let src = &self.data[(y + src_y) * src_step..];
                let dst = &mut other.data[(y + dst_y) * dst_step..];

                for x in 0..width {
                    let color = self.pixel_format.read_color(&src[(x + src_x) * src_byte..]);
                    other.pixel_format.write_color(color, &mut dst[(x + dst_x) * dst_byte..]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(left: u16, top: u16, right: u16, bottom: u16) -> InclusiveRectangle {
        InclusiveRectangle {
            left,
            top,
            right,
            bottom,
        }
    }

    #[test]
    fn same_format_copy_places_rows_at_destination_offset() {
        // 2x2 source into a 4x4 destination at (1, 1)
        let src_data: Vec<u8> = (0..16).collect();
        let src = ImageRegion {
            region: rect(0, 0, 1, 1),
            step: 8,
            pixel_format: PixelFormat::RgbA32,
            data: &src_data,
        };

        let mut dst_data = vec![0u8; 4 * 4 * 4];
        let mut dst = ImageRegionMut {
            region: rect(1, 1, 2, 2),
            step: 16,
            pixel_format: PixelFormat::RgbA32,
            data: &mut dst_data,
        };

        src.copy_to(&mut dst);

        assert_eq!(&dst_data[20..28], &src_data[0..8]);
        assert_eq!(&dst_data[36..44], &src_data[8..16]);
        assert!(dst_data[..20].iter().all(|&b| b == 0));
    }

    #[test]
    fn mismatched_channel_order_swaps_red_and_blue() {
        let src_data = [10, 20, 30, 40];
        let src = ImageRegion {
            region: rect(0, 0, 0, 0),
            step: 0,
            pixel_format: PixelFormat::RgbA32,
            data: &src_data,
        };

        let mut dst_data = [0u8; 4];
        let mut dst = ImageRegionMut {
            region: rect(0, 0, 0, 0),
            step: 0,
            pixel_format: PixelFormat::BgrA32,
            data: &mut dst_data,
        };

        src.copy_to(&mut dst);

        assert_eq!(dst_data, [30, 20, 10, 40]);
    }

    #[test]
    fn source_larger_than_destination_is_clipped() {
        let src_data = vec![0xAA; 4 * 4 * 4];
        let src = ImageRegion {
            region: rect(0, 0, 3, 3),
            step: 16,
            pixel_format: PixelFormat::RgbA32,
            data: &src_data,
        };

        let mut dst_data = vec![0u8; 2 * 2 * 4];
        let mut dst = ImageRegionMut {
            region: rect(0, 0, 1, 1),
            step: 8,
            pixel_format: PixelFormat::RgbA32,
            data: &mut dst_data,
        };

        src.copy_to(&mut dst);

        assert!(dst_data.iter().all(|&b| b == 0xAA));
    }
}
