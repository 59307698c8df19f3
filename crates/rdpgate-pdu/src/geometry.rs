//! Rectangle types shared by the output and surface command PDUs.

use std::cmp::{max, min};

use rdpgate_core::{ensure_fixed_part_size, Decode, Encode, PduResult, ReadCursor, WriteCursor};

/// An **inclusive** rectangle.
///
/// The pixel at coordinate (right, bottom) is included in the rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusiveRectangle {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

/// An **exclusive** rectangle.
///
/// The pixel at coordinate (right, bottom) is not included in the rectangle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusiveRectangle {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

pub trait Rectangle: Sized {
    fn new(left: u16, top: u16, right: u16, bottom: u16) -> Self;

    fn left(&self) -> u16;
    fn top(&self) -> u16;
    fn right(&self) -> u16;
    fn bottom(&self) -> u16;

    fn width(&self) -> u16;
    fn height(&self) -> u16;

    fn empty() -> Self {
        Self::new(0, 0, 0, 0)
    }

    fn union_all(rectangles: &[Self]) -> Self {
        Self::new(
            rectangles.iter().map(Self::left).min().unwrap_or(0),
            rectangles.iter().map(Self::top).min().unwrap_or(0),
            rectangles.iter().map(Self::right).max().unwrap_or(0),
            rectangles.iter().map(Self::bottom).max().unwrap_or(0),
        )
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        let left = max(self.left(), other.left());
        let top = max(self.top(), other.top());
        let right = min(self.right(), other.right());
        let bottom = min(self.bottom(), other.bottom());

        if left <= right && top <= bottom {
            Some(Self::new(left, top, right, bottom))
        } else {
            None
        }
    }

    #[must_use]
    fn union(&self, other: &Self) -> Self {
        Self::new(
            min(self.left(), other.left()),
            min(self.top(), other.top()),
            max(self.right(), other.right()),
            max(self.bottom(), other.bottom()),
        )
    }
}

macro_rules! impl_rectangle_codec {
    ($type:ty, $name:expr) => {
        impl $type {
            const NAME: &'static str = $name;

            pub const FIXED_PART_SIZE: usize = 2 /* left */ + 2 /* top */ + 2 /* right */ + 2 /* bottom */;

            pub const ENCODED_SIZE: usize = Self::FIXED_PART_SIZE;
        }

        impl Encode for $type {
            fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
                ensure_fixed_part_size!(in: dst);

                dst.write_u16(self.left);
                dst.write_u16(self.top);
                dst.write_u16(self.right);
                dst.write_u16(self.bottom);

                Ok(())
            }

            fn name(&self) -> &'static str {
                Self::NAME
            }

            fn size(&self) -> usize {
                Self::FIXED_PART_SIZE
            }
        }

        impl<'de> Decode<'de> for $type {
            fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
                ensure_fixed_part_size!(in: src);

                let left = src.read_u16();
                let top = src.read_u16();
                let right = src.read_u16();
                let bottom = src.read_u16();

                Ok(Self {
                    left,
                    top,
                    right,
                    bottom,
                })
            }
        }
    };
}

impl_rectangle_codec!(InclusiveRectangle, "InclusiveRectangle");
impl_rectangle_codec!(ExclusiveRectangle, "ExclusiveRectangle");

macro_rules! impl_rectangle_accessors {
    ($type:ty) => {
        impl Rectangle for $type {
            fn new(left: u16, top: u16, right: u16, bottom: u16) -> Self {
                Self {
                    left,
                    top,
                    right,
                    bottom,
                }
            }

            fn left(&self) -> u16 {
                self.left
            }
            fn top(&self) -> u16 {
                self.top
            }
            fn right(&self) -> u16 {
                self.right
            }
            fn bottom(&self) -> u16 {
                self.bottom
            }

            fn width(&self) -> u16 {
                self.right - self.left + Self::WIDTH_BIAS
            }
            fn height(&self) -> u16 {
                self.bottom - self.top + Self::WIDTH_BIAS
            }
        }
    };
}

impl InclusiveRectangle {
    const WIDTH_BIAS: u16 = 1;
}

impl ExclusiveRectangle {
    const WIDTH_BIAS: u16 = 0;
}

impl_rectangle_accessors!(InclusiveRectangle);
impl_rectangle_accessors!(ExclusiveRectangle);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_rectangle_dimensions() {
        let r = InclusiveRectangle {
            left: 0,
            top: 0,
            right: 63,
            bottom: 63,
        };

        assert_eq!(r.width(), 64);
        assert_eq!(r.height(), 64);
    }

    #[test]
    fn intersect_disjoint_rectangles_is_none() {
        let a = InclusiveRectangle {
            left: 0,
            top: 0,
            right: 10,
            bottom: 10,
        };
        let b = InclusiveRectangle {
            left: 20,
            top: 20,
            right: 30,
            bottom: 30,
        };

        assert_eq!(a.intersect(&b), None);
    }

    #[test]
    fn union_all_covers_every_rectangle() {
        let rects = [
            InclusiveRectangle {
                left: 5,
                top: 5,
                right: 10,
                bottom: 10,
            },
            InclusiveRectangle {
                left: 0,
                top: 8,
                right: 30,
                bottom: 12,
            },
        ];

        let union = InclusiveRectangle::union_all(&rects);

        assert_eq!(
            union,
            InclusiveRectangle {
                left: 0,
                top: 5,
                right: 30,
                bottom: 12,
            }
        );
    }
}
