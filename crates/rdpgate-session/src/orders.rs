//! Drawing order decoding (MS-RDPEGDI 2.2.2.2.1).
//!
//! Primary orders are differential: the order type, the bounds and every
//! field persist from one order to the next, and the field-flag bits select
//! which fields the current order re-transmits. The decoder therefore keeps
//! one instance of each supported primary order as its running state.
//!
//! Secondary orders carry an explicit length and are skipped whole.

use rdpgate_core::ReadCursor;

use crate::SessionResult;

// control flags
const ORDER_STANDARD: u8 = 0x01;
const ORDER_SECONDARY: u8 = 0x02;
const ORDER_BOUNDS: u8 = 0x04;
const ORDER_TYPE_CHANGE: u8 = 0x08;
const ORDER_DELTA_COORDINATES: u8 = 0x10;
const ORDER_ZERO_BOUNDS_DELTAS: u8 = 0x20;
const ORDER_ZERO_FIELD_BYTES: u8 = 0xC0;

// primary order types
const ORDER_TYPE_DSTBLT: u8 = 0x00;
const ORDER_TYPE_PATBLT: u8 = 0x01;
const ORDER_TYPE_SCRBLT: u8 = 0x02;
const ORDER_TYPE_OPAQUE_RECT: u8 = 0x0A;
const ORDER_TYPE_MEMBLT: u8 = 0x0D;

// alternate secondary order types
const ALTSEC_FRAME_MARKER: u8 = 0x0D;

/// A secondary order header is 6 bytes and its orderLength field is
/// defined as the total order length minus 13.
const SECONDARY_LENGTH_BIAS: usize = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DstBlt {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    pub rop: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Brush {
    pub org_x: u8,
    pub org_y: u8,
    pub style: u8,
    pub hatch: u8,
    pub extra: [u8; 7],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatBlt {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    pub rop: u8,
    pub back_color: [u8; 3],
    pub fore_color: [u8; 3],
    pub brush: Brush,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrBlt {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    pub rop: u8,
    pub src_x: i16,
    pub src_y: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpaqueRect {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    pub color: [u8; 3],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemBlt {
    pub cache_id: u16,
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
    pub rop: u8,
    pub src_x: i16,
    pub src_y: i16,
    pub cache_index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawingOrder {
    DstBlt(DstBlt),
    PatBlt(PatBlt),
    ScrBlt(ScrBlt),
    OpaqueRect(OpaqueRect),
    MemBlt(MemBlt),
}

/// One decoded primary order, with the clipping bounds in effect when the
/// BOUNDS control flag was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryOrder {
    pub bounds: Option<Bounds>,
    pub order: DrawingOrder,
}

/// Stateful decoder for the orders carried by one fast-path Orders update
/// stream.
#[derive(Debug, Default)]
pub struct OrderDecoder {
    order_type: u8,
    bounds: Bounds,
    dst_blt: DstBlt,
    pat_blt: PatBlt,
    scr_blt: ScrBlt,
    opaque_rect: OpaqueRect,
    mem_blt: MemBlt,
}

impl OrderDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `number_of_orders` orders from `data`, returning the primary
    /// orders. Secondary orders and alternate secondary frame markers are
    /// consumed but not reported.
    pub fn decode_orders(&mut self, number_of_orders: u16, data: &[u8]) -> SessionResult<Vec<PrimaryOrder>> {
        let mut cursor = ReadCursor::new(data);
        let mut orders = Vec::new();

        for _ in 0..number_of_orders {
            ensure(&cursor, 1)?;
            let control = cursor.read_u8();

            if control & ORDER_STANDARD == 0 {
                self.skip_alternate_secondary(control, &mut cursor)?;
            } else if control & ORDER_SECONDARY != 0 {
                skip_secondary(&mut cursor)?;
            } else {
                orders.push(self.decode_primary(control, &mut cursor)?);
            }
        }

        Ok(orders)
    }

    fn decode_primary(&mut self, control: u8, cursor: &mut ReadCursor<'_>) -> SessionResult<PrimaryOrder> {
        if control & ORDER_TYPE_CHANGE != 0 {
            ensure(cursor, 1)?;
            self.order_type = cursor.read_u8();
        }

        let field_count = primary_field_count(self.order_type)
            .ok_or_else(|| reason_err!("Orders", "unsupported primary order type 0x{:02X}", self.order_type))?;

        let field_flags = read_field_flags(control, field_count, cursor)?;

        let bounds = if control & ORDER_BOUNDS != 0 {
            if control & ORDER_ZERO_BOUNDS_DELTAS == 0 {
                self.read_bounds(cursor)?;
            }
            Some(self.bounds)
        } else {
            None
        };

        let mut fields = FieldReader {
            cursor,
            field_flags,
            delta: control & ORDER_DELTA_COORDINATES != 0,
            index: 0,
        };

        let order = match self.order_type {
            ORDER_TYPE_DSTBLT => {
                let o = &mut self.dst_blt;
                o.x = fields.coord(o.x)?;
                o.y = fields.coord(o.y)?;
                o.width = fields.coord(o.width)?;
                o.height = fields.coord(o.height)?;
                o.rop = fields.byte(o.rop)?;
                DrawingOrder::DstBlt(*o)
            }
            ORDER_TYPE_PATBLT => {
                let o = &mut self.pat_blt;
                o.x = fields.coord(o.x)?;
                o.y = fields.coord(o.y)?;
                o.width = fields.coord(o.width)?;
                o.height = fields.coord(o.height)?;
                o.rop = fields.byte(o.rop)?;
                o.back_color = fields.color(o.back_color)?;
                o.fore_color = fields.color(o.fore_color)?;
                o.brush.org_x = fields.byte(o.brush.org_x)?;
                o.brush.org_y = fields.byte(o.brush.org_y)?;
                o.brush.style = fields.byte(o.brush.style)?;
                o.brush.hatch = fields.byte(o.brush.hatch)?;
                o.brush.extra = fields.brush_extra(o.brush.extra)?;
                DrawingOrder::PatBlt(*o)
            }
            ORDER_TYPE_SCRBLT => {
                let o = &mut self.scr_blt;
                o.x = fields.coord(o.x)?;
                o.y = fields.coord(o.y)?;
                o.width = fields.coord(o.width)?;
                o.height = fields.coord(o.height)?;
                o.rop = fields.byte(o.rop)?;
                o.src_x = fields.coord(o.src_x)?;
                o.src_y = fields.coord(o.src_y)?;
                DrawingOrder::ScrBlt(*o)
            }
            ORDER_TYPE_OPAQUE_RECT => {
                let o = &mut self.opaque_rect;
                o.x = fields.coord(o.x)?;
                o.y = fields.coord(o.y)?;
                o.width = fields.coord(o.width)?;
                o.height = fields.coord(o.height)?;
                o.color[0] = fields.byte(o.color[0])?;
                o.color[1] = fields.byte(o.color[1])?;
                o.color[2] = fields.byte(o.color[2])?;
                DrawingOrder::OpaqueRect(*o)
            }
            ORDER_TYPE_MEMBLT => {
                let o = &mut self.mem_blt;
                o.cache_id = fields.word(o.cache_id)?;
                o.x = fields.coord(o.x)?;
                o.y = fields.coord(o.y)?;
                o.width = fields.coord(o.width)?;
                o.height = fields.coord(o.height)?;
                o.rop = fields.byte(o.rop)?;
                o.src_x = fields.coord(o.src_x)?;
                o.src_y = fields.coord(o.src_y)?;
                o.cache_index = fields.word(o.cache_index)?;
                DrawingOrder::MemBlt(*o)
            }
            _ => unreachable!("checked by primary_field_count"),
        };

        Ok(PrimaryOrder { bounds, order })
    }

    // MS-RDPEGDI 2.2.2.2.1.1.1.1 TS_BOUNDS: a description byte selects, per
    // edge, an absolute 2-byte value, a 1-byte signed delta, or reuse.
    fn read_bounds(&mut self, cursor: &mut ReadCursor<'_>) -> SessionResult<()> {
        ensure(cursor, 1)?;
        let description = cursor.read_u8();

        let mut edge = |absolute_bit: u8, delta_bit: u8, current: i16| -> SessionResult<i16> {
            if description & absolute_bit != 0 {
                ensure(cursor, 2)?;
                Ok(cursor.read_i16())
            } else if description & delta_bit != 0 {
                ensure(cursor, 1)?;
                Ok(current.wrapping_add(i16::from(cursor.read_u8() as i8)))
            } else {
                Ok(current)
            }
        };

        self.bounds = Bounds {
            left: edge(0x01, 0x10, self.bounds.left)?,
            top: edge(0x02, 0x20, self.bounds.top)?,
            right: edge(0x04, 0x40, self.bounds.right)?,
            bottom: edge(0x08, 0x80, self.bounds.bottom)?,
        };

        Ok(())
    }

    fn skip_alternate_secondary(&mut self, control: u8, cursor: &mut ReadCursor<'_>) -> SessionResult<()> {
        let order_type = control >> 2;

        match order_type {
            ALTSEC_FRAME_MARKER => {
                ensure(cursor, 4)?;
                let action = cursor.read_u32();
                trace!(action, "Alternate secondary frame marker");
                Ok(())
            }
            // No length field, so an unsupported type cannot be skipped.
            unsupported => Err(reason_err!(
                "Orders",
                "unsupported alternate secondary order type 0x{unsupported:02X}"
            )),
        }
    }
}

fn skip_secondary(cursor: &mut ReadCursor<'_>) -> SessionResult<()> {
    ensure(cursor, 5)?;
    let order_length = usize::from(cursor.read_u16());
    let _extra_flags = cursor.read_u16();
    let order_type = cursor.read_u8();

    let payload = order_length + SECONDARY_LENGTH_BIAS;
    ensure(cursor, payload)?;
    cursor.advance(payload);

    trace!(order_type, "Skipped secondary drawing order");

    Ok(())
}

fn primary_field_count(order_type: u8) -> Option<u32> {
    match order_type {
        ORDER_TYPE_DSTBLT => Some(5),
        ORDER_TYPE_PATBLT => Some(12),
        ORDER_TYPE_SCRBLT => Some(7),
        ORDER_TYPE_OPAQUE_RECT => Some(7),
        ORDER_TYPE_MEMBLT => Some(9),
        _ => None,
    }
}

// The two high control bits give the number of trailing field-flag bytes
// the sender elided because they were zero.
fn read_field_flags(control: u8, field_count: u32, cursor: &mut ReadCursor<'_>) -> SessionResult<u32> {
    let total_bytes = usize::try_from(field_count.div_ceil(8)).unwrap_or(usize::MAX);
    let zero_bytes = usize::from((control & ORDER_ZERO_FIELD_BYTES) >> 6);

    let present_bytes = total_bytes
        .checked_sub(zero_bytes)
        .ok_or_else(|| general_err!("more zero field bytes than field bytes"))?;

    ensure(cursor, present_bytes)?;

    let mut field_flags = 0u32;
    for i in 0..present_bytes {
        field_flags |= u32::from(cursor.read_u8()) << (i * 8);
    }

    Ok(field_flags)
}

fn ensure(cursor: &ReadCursor<'_>, needed: usize) -> SessionResult<()> {
    if cursor.len() < needed {
        Err(general_err!("truncated drawing order"))
    } else {
        Ok(())
    }
}

struct FieldReader<'a, 'b> {
    cursor: &'b mut ReadCursor<'a>,
    field_flags: u32,
    delta: bool,
    index: u32,
}

impl FieldReader<'_, '_> {
    fn present(&mut self) -> bool {
        let present = self.field_flags & (1 << self.index) != 0;
        self.index += 1;
        present
    }

    fn coord(&mut self, current: i16) -> SessionResult<i16> {
        if !self.present() {
            return Ok(current);
        }

        if self.delta {
            ensure(self.cursor, 1)?;
            Ok(current.wrapping_add(i16::from(self.cursor.read_u8() as i8)))
        } else {
            ensure(self.cursor, 2)?;
            Ok(self.cursor.read_i16())
        }
    }

    fn byte(&mut self, current: u8) -> SessionResult<u8> {
        if !self.present() {
            return Ok(current);
        }

        ensure(self.cursor, 1)?;
        Ok(self.cursor.read_u8())
    }

    fn word(&mut self, current: u16) -> SessionResult<u16> {
        if !self.present() {
            return Ok(current);
        }

        ensure(self.cursor, 2)?;
        Ok(self.cursor.read_u16())
    }

    fn color(&mut self, current: [u8; 3]) -> SessionResult<[u8; 3]> {
        if !self.present() {
            return Ok(current);
        }

        ensure(self.cursor, 3)?;
        Ok(self.cursor.read_array::<3>())
    }

    fn brush_extra(&mut self, current: [u8; 7]) -> SessionResult<[u8; 7]> {
        if !self.present() {
            return Ok(current);
        }

        ensure(self.cursor, 7)?;
        Ok(self.cursor.read_array::<7>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_rect_with_all_fields() {
        let mut decoder = OrderDecoder::new();

        let data = [
            0x09, // STANDARD | TYPE_CHANGE
            0x0A, // OpaqueRect
            0x7F, // all 7 fields
            0x0A, 0x00, // x = 10
            0x14, 0x00, // y = 20
            0x1E, 0x00, // width = 30
            0x28, 0x00, // height = 40
            0x11, 0x22, 0x33, // color
        ];

        let orders = decoder.decode_orders(1, &data).unwrap();

        assert_eq!(
            orders,
            vec![PrimaryOrder {
                bounds: None,
                order: DrawingOrder::OpaqueRect(OpaqueRect {
                    x: 10,
                    y: 20,
                    width: 30,
                    height: 40,
                    color: [0x11, 0x22, 0x33],
                }),
            }]
        );
    }

    #[test]
    fn delta_coordinates_update_the_previous_order() {
        let mut decoder = OrderDecoder::new();

        let mut data = vec![
            0x09, 0x0A, 0x7F, // full OpaqueRect
            0x0A, 0x00, 0x14, 0x00, 0x1E, 0x00, 0x28, 0x00, 0x11, 0x22, 0x33,
        ];
        data.extend_from_slice(&[
            0x11, // STANDARD | DELTA_COORDINATES
            0x03, // x and y only
            0x05, // x += 5
            0xFB, // y -= 5
        ]);

        let orders = decoder.decode_orders(2, &data).unwrap();

        assert_eq!(orders.len(), 2);
        match orders[1].order {
            DrawingOrder::OpaqueRect(o) => {
                assert_eq!(o.x, 15);
                assert_eq!(o.y, 15);
                // untouched fields persist
                assert_eq!(o.width, 30);
                assert_eq!(o.color, [0x11, 0x22, 0x33]);
            }
            other => panic!("expected OpaqueRect, got {other:?}"),
        }
    }

    #[test]
    fn zero_field_bytes_are_elided() {
        let mut decoder = OrderDecoder::new();

        // MemBlt has two field-flag bytes; the high control bits say the
        // second one was elided.
        let data = [
            0x49, // STANDARD | TYPE_CHANGE | one zero field byte
            0x0D, // MemBlt
            0x01, // cacheId only
            0x07, 0x00,
        ];

        let orders = decoder.decode_orders(1, &data).unwrap();

        match orders[0].order {
            DrawingOrder::MemBlt(o) => assert_eq!(o.cache_id, 7),
            other => panic!("expected MemBlt, got {other:?}"),
        }
    }

    #[test]
    fn bounds_are_read_and_latched() {
        let mut decoder = OrderDecoder::new();

        let mut data = vec![
            0x0D, // STANDARD | BOUNDS | TYPE_CHANGE
            0x00, // DstBlt
            0x0F, // description: all four edges absolute
            0x01, 0x00, 0x02, 0x00, 0x63, 0x00, 0x64, 0x00,
            0x1F, // all 5 fields
            0x0A, 0x00, 0x0A, 0x00, 0x01, 0x00, 0x01, 0x00, 0xCC,
        ];
        // second order reuses the previous bounds
        data.extend_from_slice(&[
            0x25, // STANDARD | BOUNDS | ZERO_BOUNDS_DELTAS
            0x01, // x only
            0x0B, 0x00,
        ]);

        let orders = decoder.decode_orders(2, &data).unwrap();

        let expected = Bounds {
            left: 1,
            top: 2,
            right: 99,
            bottom: 100,
        };
        assert_eq!(orders[0].bounds, Some(expected));
        assert_eq!(orders[1].bounds, Some(expected));
    }

    #[test]
    fn secondary_order_is_skipped_by_its_length_field() {
        let mut decoder = OrderDecoder::new();

        let mut data = vec![
            0x03, // STANDARD | SECONDARY
            0x01, 0x00, // orderLength: 1 + 7 payload bytes follow
            0x00, 0x00, // extraFlags
            0x02, // orderType: cache bitmap
        ];
        data.extend_from_slice(&[0xEE; 8]);
        // followed by a primary order
        data.extend_from_slice(&[
            0x09, 0x00, 0x1F, // DstBlt, all fields
            0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x55,
        ]);

        let orders = decoder.decode_orders(2, &data).unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(
            orders[0].order,
            DrawingOrder::DstBlt(DstBlt {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
                rop: 0x55,
            })
        );
    }

    #[test]
    fn truncated_secondary_order_is_fatal() {
        let mut decoder = OrderDecoder::new();

        let data = [0x03, 0x20, 0x00, 0x00, 0x00, 0x02, 0xAA];

        assert!(decoder.decode_orders(1, &data).is_err());
    }

    #[test]
    fn unsupported_primary_type_is_fatal() {
        let mut decoder = OrderDecoder::new();

        // order type 0x09 (LineTo) is not in the decoded set
        let data = [0x09, 0x09, 0x00];

        assert!(decoder.decode_orders(1, &data).is_err());
    }

    #[test]
    fn alternate_secondary_frame_marker_is_consumed() {
        let mut decoder = OrderDecoder::new();

        // controlFlags 0x34: SECONDARY without STANDARD, type 0x0D
        let data = [0x34, 0x01, 0x00, 0x00, 0x00];

        let orders = decoder.decode_orders(1, &data).unwrap();
        assert!(orders.is_empty());
    }
}
