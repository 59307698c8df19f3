//! RemoteFX tile decoding primitives.
//!
//! A tile component goes through the stages in this order:
//! RLGR entropy decode, differential reconstruction of the LL3 sub-band,
//! per-sub-band dequantization, 3-level inverse DWT, and finally
//! YCbCr to RGBA conversion.

#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod color_conversion;
pub mod dwt;
pub mod image;
pub mod quantization;
pub mod rlgr;
pub mod subband_reconstruction;

mod utils;
