//! Fixed-point YCbCr to RGBA conversion for decoded RemoteFX tiles.
//!
//! Coefficients are the ITU-R BT.601 factors scaled by 2^16; tile samples
//! carry 5 fractional bits, hence the final shift by 21.

const FIX_SHIFT: u32 = 16;
const FRACTION_SHIFT: u32 = 5;

// 1.403, 0.344, 0.714 and 1.770 scaled by 2^16.
const CR_TO_R: i32 = 91_947;
const CB_TO_G: i32 = 22_544;
const CR_TO_G: i32 = 46_792;
const CB_TO_B: i32 = 115_998;

#[derive(Debug)]
pub struct YCbCrBuffer<'a> {
    pub y: &'a [i16],
    pub cb: &'a [i16],
    pub cr: &'a [i16],
}

impl Iterator for YCbCrBuffer<'_> {
    type Item = YCbCr;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.y.is_empty() && !self.cb.is_empty() && !self.cr.is_empty() {
            let y = self.y[0];
            let cb = self.cb[0];
            let cr = self.cr[0];

            self.y = &self.y[1..];
            self.cb = &self.cb[1..];
            self.cr = &self.cr[1..];

            Some(YCbCr { y, cb, cr })
        } else {
            None
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct YCbCr {
    pub y: i16,
    pub cb: i16,
    pub cr: i16,
}

/// Converts planar YCbCr samples to packed RGBA with opaque alpha.
///
/// `output` is filled pixel by pixel; extra output space is left untouched.
pub fn ycbcr_to_rgba(input: YCbCrBuffer<'_>, output: &mut [u8]) {
    for (pixel, out) in input.zip(output.chunks_exact_mut(4)) {
        // Luma is stored biased by -128; lift it back and widen to the
        // fixed-point working precision.
        let y = (i32::from(pixel.y) + 4096) << FIX_SHIFT;
        let cb = i32::from(pixel.cb);
        let cr = i32::from(pixel.cr);

        let r = (y + cr * CR_TO_R) >> (FIX_SHIFT + FRACTION_SHIFT);
        let g = (y - cb * CB_TO_G - cr * CR_TO_G) >> (FIX_SHIFT + FRACTION_SHIFT);
        let b = (y + cb * CB_TO_B) >> (FIX_SHIFT + FRACTION_SHIFT);

        out[0] = clip(r);
        out[1] = clip(g);
        out[2] = clip(b);
        out[3] = 0xFF;
    }
}

fn clip(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chroma_maps_luma_to_gray() {
        // y = -4096/32 + 128 = 0 for the minimum sample,
        // y = 0/32 + 128 = 128 for a centered sample.
        let y = [-4096i16, 0];
        let cb = [0i16, 0];
        let cr = [0i16, 0];
        let mut output = [0u8; 8];

        ycbcr_to_rgba(YCbCrBuffer { y: &y, cb: &cb, cr: &cr }, &mut output);

        assert_eq!(output, [0, 0, 0, 0xFF, 128, 128, 128, 0xFF]);
    }

    #[test]
    fn saturated_luma_clamps_to_white() {
        let y = [i16::MAX];
        let cb = [0i16];
        let cr = [0i16];
        let mut output = [0u8; 4];

        ycbcr_to_rgba(YCbCrBuffer { y: &y, cb: &cb, cr: &cr }, &mut output);

        assert_eq!(output, [255, 255, 255, 0xFF]);
    }

    #[test]
    fn positive_cr_raises_red_and_lowers_green() {
        let y = [0i16];
        let cb = [0i16];
        let cr = [320i16]; // 10 in pixel units

        let mut output = [0u8; 4];
        ycbcr_to_rgba(YCbCrBuffer { y: &y, cb: &cb, cr: &cr }, &mut output);

        let [r, g, b, a] = output;
        assert!(r > 128);
        assert!(g < 128);
        assert_eq!(b, 128);
        assert_eq!(a, 0xFF);
    }

    #[test]
    fn conversion_stops_at_the_shortest_plane() {
        let y = [0i16; 2];
        let cb = [0i16; 1];
        let cr = [0i16; 2];
        let mut output = [0u8; 8];

        ycbcr_to_rgba(YCbCrBuffer { y: &y, cb: &cb, cr: &cr }, &mut output);

        assert_eq!(&output[..4], [128, 128, 128, 0xFF]);
        assert_eq!(&output[4..], [0, 0, 0, 0]);
    }
}
