//! Scalar dequantization of the ten RemoteFX sub-bands.
//!
//! Linear coefficient layout for a 64x64 tile:
//! HL1, LH1, HH1 (1024 each), HL2, LH2, HH2 (256 each),
//! HL3, LH3, HH3, LL3 (64 each).

use rdpgate_pdu::rfx::Quant;

const QUANT_MIN: u8 = 6;
const QUANT_MAX: u8 = 15;

pub fn decode(buffer: &mut [i16], quant: &Quant) {
    decode_block(&mut buffer[0..1024], quant.hl1);
    decode_block(&mut buffer[1024..2048], quant.lh1);
    decode_block(&mut buffer[2048..3072], quant.hh1);
    decode_block(&mut buffer[3072..3328], quant.hl2);
    decode_block(&mut buffer[3328..3584], quant.lh2);
    decode_block(&mut buffer[3584..3840], quant.hh2);
    decode_block(&mut buffer[3840..3904], quant.hl3);
    decode_block(&mut buffer[3904..3968], quant.lh3);
    decode_block(&mut buffer[3968..4032], quant.hh3);
    decode_block(&mut buffer[4032..4096], quant.ll3);
}

// Factor 0 is the identity; any other factor shifts left by factor - 1.
fn decode_block(buffer: &mut [i16], factor: u8) {
    if factor == 0 {
        return;
    }

    let shift = u32::from(factor) - 1;
    for value in buffer {
        *value = ((*value as u16) << shift) as i16;
    }
}

/// Checks that all ten sub-band factors are within the range the protocol
/// allows (6 to 15).
pub fn is_valid(quant: &Quant) -> bool {
    [
        quant.ll3, quant.lh3, quant.hl3, quant.hh3, quant.lh2, quant.hl2, quant.hh2, quant.lh1, quant.hl1, quant.hh1,
    ]
    .iter()
    .all(|&factor| (QUANT_MIN..=QUANT_MAX).contains(&factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_quant(factor: u8) -> Quant {
        Quant {
            ll3: factor,
            lh3: factor,
            hl3: factor,
            hh3: factor,
            lh2: factor,
            hl2: factor,
            hh2: factor,
            lh1: factor,
            hl1: factor,
            hh1: factor,
        }
    }

    #[test]
    fn factor_zero_is_identity() {
        let mut buffer = [0i16; 4096];
        buffer[0] = 3;
        buffer[4095] = -7;

        decode_block(&mut buffer, 0);

        assert_eq!(buffer[0], 3);
        assert_eq!(buffer[4095], -7);
    }

    #[test]
    fn factor_shifts_left_by_factor_minus_one() {
        let mut buffer = [1i16, -1, 2, 0];

        decode_block(&mut buffer, 6);

        assert_eq!(buffer, [32, -32, 64, 0]);
    }

    #[test]
    fn factor_one_shifts_by_zero() {
        let mut buffer = [5i16, -5];

        decode_block(&mut buffer, 1);

        assert_eq!(buffer, [5, -5]);
    }

    #[test]
    fn decode_applies_per_subband_factors() {
        let mut buffer = vec![1i16; 4096];
        let mut quant = flat_quant(6);
        quant.ll3 = 7;

        decode(&mut buffer, &quant);

        // ll3 occupies the last 64 coefficients
        assert!(buffer[..4032].iter().all(|&v| v == 32));
        assert!(buffer[4032..].iter().all(|&v| v == 64));
    }

    #[test]
    fn default_quant_is_valid() {
        assert!(is_valid(&Quant::default()));
    }

    #[test]
    fn out_of_range_factor_is_rejected() {
        let mut quant = flat_quant(6);
        quant.hh1 = 16;
        assert!(!is_valid(&quant));

        let mut quant = flat_quant(6);
        quant.ll3 = 5;
        assert!(!is_valid(&quant));
    }
}
