//! RemoteFX codec block structures (MS-RDPRFX).
//!
//! Every block starts with a common header whose blockLen counts the header
//! itself, so the payload length is blockLen minus the headers already read.

mod data_messages;
mod header_messages;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

use rdpgate_core::{
    cast_length, ensure_fixed_part_size, invalid_field_err, Decode, Encode, PduResult, ReadCursor, WriteCursor,
};

#[rustfmt::skip]
pub use self::data_messages::{
    ContextPdu, EntropyAlgorithm, FrameBeginPdu, FrameEndPdu, OperatingMode, Quant, RegionPdu, RfxRectangle, Tile,
    TileSetPdu,
};
pub use self::header_messages::{ChannelsPdu, CodecVersionsPdu, RfxChannel, SyncPdu};

const CODEC_ID: u8 = 1;
const CHANNEL_ID_FOR_CONTEXT: u8 = 0xFF;
const CHANNEL_ID_FOR_OTHER_VALUES: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block<'a> {
    Tile(Tile<'a>),
    Sync(SyncPdu),
    CodecVersions(CodecVersionsPdu),
    Channels(ChannelsPdu),
    CodecChannel(CodecChannel<'a>),
}

impl Block<'_> {
    const NAME: &'static str = "RfxBlock";

    const FIXED_PART_SIZE: usize = BlockHeader::FIXED_PART_SIZE;

    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Tile(_) => BlockType::Tile,
            Block::Sync(_) => BlockType::Sync,
            Block::CodecVersions(_) => BlockType::CodecVersions,
            Block::Channels(_) => BlockType::Channels,
            Block::CodecChannel(CodecChannel::Context(_)) => BlockType::Context,
            Block::CodecChannel(CodecChannel::FrameBegin(_)) => BlockType::FrameBegin,
            Block::CodecChannel(CodecChannel::FrameEnd(_)) => BlockType::FrameEnd,
            Block::CodecChannel(CodecChannel::Region(_)) => BlockType::Region,
            Block::CodecChannel(CodecChannel::TileSet(_)) => BlockType::Extension,
        }
    }
}

impl Encode for Block<'_> {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        let ty = self.block_type();
        let data_length = self.size();
        BlockHeader { ty, data_length }.encode(dst)?;

        if let Block::CodecChannel(ref channel) = self {
            let channel_id = channel.channel_id();
            CodecChannelHeader { channel_id }.encode(dst)?;
        }

        match self {
            Block::Tile(tile) => tile.encode(dst),
            Block::Sync(sync) => sync.encode(dst),
            Block::CodecVersions(versions) => versions.encode(dst),
            Block::Channels(channels) => channels.encode(dst),
            Block::CodecChannel(CodecChannel::Context(context)) => context.encode(dst),
            Block::CodecChannel(CodecChannel::FrameBegin(frame)) => frame.encode(dst),
            Block::CodecChannel(CodecChannel::FrameEnd(frame)) => frame.encode(dst),
            Block::CodecChannel(CodecChannel::Region(region)) => region.encode(dst),
            Block::CodecChannel(CodecChannel::TileSet(tile_set)) => tile_set.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
            + if matches!(self, Block::CodecChannel(_)) {
                CodecChannelHeader::FIXED_PART_SIZE
            } else {
                0
            }
            + match self {
                Block::Tile(tile) => tile.size(),
                Block::Sync(sync) => sync.size(),
                Block::CodecVersions(versions) => versions.size(),
                Block::Channels(channels) => channels.size(),
                Block::CodecChannel(CodecChannel::Context(context)) => context.size(),
                Block::CodecChannel(CodecChannel::FrameBegin(frame)) => frame.size(),
                Block::CodecChannel(CodecChannel::FrameEnd(frame)) => frame.size(),
                Block::CodecChannel(CodecChannel::Region(region)) => region.size(),
                Block::CodecChannel(CodecChannel::TileSet(tile_set)) => tile_set.size(),
            }
    }
}

impl<'de> Decode<'de> for Block<'de> {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        let header = BlockHeader::decode(src)?;
        let mut consumed = header.size();

        if header.ty.is_channel() {
            let channel = CodecChannelHeader::decode(src)?;
            let expected_id = if header.ty == BlockType::Context {
                CHANNEL_ID_FOR_CONTEXT
            } else {
                CHANNEL_ID_FOR_OTHER_VALUES
            };
            if channel.channel_id != expected_id {
                return Err(invalid_field_err!("channelId", "invalid channel id"));
            }
            consumed += channel.size();
        }

        let data_len = header
            .data_length
            .checked_sub(consumed)
            .ok_or_else(|| invalid_field_err!("blockLen", "invalid block length"))?;
        rdpgate_core::ensure_size!(in: src, size: data_len);
        let src = &mut ReadCursor::new(src.read_slice(data_len));

        match header.ty {
            BlockType::Tile => Ok(Self::Tile(Tile::decode(src)?)),
            BlockType::Sync => Ok(Self::Sync(SyncPdu::decode(src)?)),
            BlockType::CodecVersions => Ok(Self::CodecVersions(CodecVersionsPdu::decode(src)?)),
            BlockType::Channels => Ok(Self::Channels(ChannelsPdu::decode(src)?)),
            BlockType::Context => Ok(Self::CodecChannel(CodecChannel::Context(ContextPdu::decode(src)?))),
            BlockType::FrameBegin => Ok(Self::CodecChannel(CodecChannel::FrameBegin(FrameBeginPdu::decode(
                src,
            )?))),
            BlockType::FrameEnd => Ok(Self::CodecChannel(CodecChannel::FrameEnd(FrameEndPdu::decode(src)?))),
            BlockType::Region => Ok(Self::CodecChannel(CodecChannel::Region(RegionPdu::decode(src)?))),
            BlockType::Extension => Ok(Self::CodecChannel(CodecChannel::TileSet(TileSetPdu::decode(src)?))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecChannel<'a> {
    Context(ContextPdu),
    FrameBegin(FrameBeginPdu),
    FrameEnd(FrameEndPdu),
    Region(RegionPdu),
    TileSet(TileSetPdu<'a>),
}

impl CodecChannel<'_> {
    fn channel_id(&self) -> u8 {
        if matches!(self, CodecChannel::Context(_)) {
            CHANNEL_ID_FOR_CONTEXT
        } else {
            CHANNEL_ID_FOR_OTHER_VALUES
        }
    }
}

/// [2.2.2.1.1] TS_RFX_BLOCKT
///
/// [2.2.2.1.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdprfx/1e1b69a9-c2aa-4b13-bd44-23dcf96d4a74
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub ty: BlockType,
    /// The full block length, common header included.
    pub data_length: usize,
}

impl BlockHeader {
    const NAME: &'static str = "RfxBlockHeader";

    pub const FIXED_PART_SIZE: usize = 2 /* blockType */ + 4 /* blockLen */;
}

impl Encode for BlockHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.ty as u16);
        dst.write_u32(cast_length!("blockLen", self.data_length)?);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl Decode<'_> for BlockHeader {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let ty = src.read_u16();
        let ty = BlockType::from_u16(ty).ok_or_else(|| invalid_field_err!("blockType", "invalid block type"))?;
        let data_length = src.read_u32() as usize;
        data_length
            .checked_sub(Self::FIXED_PART_SIZE)
            .ok_or_else(|| invalid_field_err!("blockLen", "invalid block length"))?;

        Ok(Self { ty, data_length })
    }
}

/// [2.2.2.1.2] TS_RFX_CODEC_CHANNELT
///
/// [2.2.2.1.2]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdprfx/56b78b0c-6eef-40cc-b9da-96d21f197c14
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecChannelHeader {
    channel_id: u8,
}

impl CodecChannelHeader {
    const NAME: &'static str = "RfxCodecChannelHeader";

    const FIXED_PART_SIZE: usize = 1 /* codecId */ + 1 /* channelId */;
}

impl Encode for CodecChannelHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u8(CODEC_ID);
        dst.write_u8(self.channel_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl Decode<'_> for CodecChannelHeader {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let codec_id = src.read_u8();
        if codec_id != CODEC_ID {
            return Err(invalid_field_err!("codecId", "invalid codec id"));
        }

        let channel_id = src.read_u8();

        Ok(Self { channel_id })
    }
}

/// [2.2.3.1] TS_FRAME_ACKNOWLEDGE_PDU
///
/// [2.2.3.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdprfx/24364aa2-9a7f-4d86-bcfb-67f5a6c19064
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameAcknowledgePdu {
    pub frame_id: u32,
}

impl FrameAcknowledgePdu {
    const NAME: &'static str = "FrameAcknowledgePdu";

    const FIXED_PART_SIZE: usize = 4 /* frameId */;
}

impl Encode for FrameAcknowledgePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.frame_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl Decode<'_> for FrameAcknowledgePdu {
    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let frame_id = src.read_u32();

        Ok(Self { frame_id })
    }
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum BlockType {
    Tile = 0xCAC3,
    Sync = 0xCCC0,
    CodecVersions = 0xCCC1,
    Channels = 0xCCC2,
    Context = 0xCCC3,
    FrameBegin = 0xCCC4,
    FrameEnd = 0xCCC5,
    Region = 0xCCC6,
    Extension = 0xCCC7,
}

impl BlockType {
    fn is_channel(&self) -> bool {
        matches!(
            self,
            BlockType::Context | BlockType::FrameBegin | BlockType::FrameEnd | BlockType::Region | BlockType::Extension
        )
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_core::{decode, encode_vec};

    use super::*;

    // blockType Sync, blockLen 12, magic, version
    const SYNC_BLOCK_BUFFER: [u8; 12] = [
        0xC0, 0xCC, 0x0C, 0x00, 0x00, 0x00, 0xCA, 0xAC, 0xCC, 0xCA, 0x00, 0x01,
    ];

    // blockType Context, blockLen 13, codec channel header, ctxId, tileSize, properties
    const CONTEXT_BLOCK_BUFFER: [u8; 13] = [
        0xC3, 0xCC, 0x0D, 0x00, 0x00, 0x00, 0x01, 0xFF, 0x00, 0x40, 0x00, 0x2A, 0x28,
    ];

    #[test]
    fn decode_sync_block() {
        let block = decode::<Block<'_>>(SYNC_BLOCK_BUFFER.as_ref()).unwrap();

        assert_eq!(block, Block::Sync(SyncPdu));
        assert_eq!(block.size(), SYNC_BLOCK_BUFFER.len());
    }

    #[test]
    fn encode_sync_block() {
        assert_eq!(encode_vec(&Block::Sync(SyncPdu)).unwrap(), SYNC_BLOCK_BUFFER.as_ref());
    }

    #[test]
    fn decode_context_block() {
        let block = decode::<Block<'_>>(CONTEXT_BLOCK_BUFFER.as_ref()).unwrap();

        assert_eq!(
            block,
            Block::CodecChannel(CodecChannel::Context(ContextPdu {
                flags: OperatingMode::IMAGE_MODE,
                entropy_algorithm: EntropyAlgorithm::Rlgr3,
            }))
        );
        assert_eq!(encode_vec(&block).unwrap(), CONTEXT_BLOCK_BUFFER.as_ref());
    }

    #[test]
    fn context_block_rejects_wrong_channel_id() {
        let mut buffer = CONTEXT_BLOCK_BUFFER;
        buffer[7] = 0x00;

        assert!(decode::<Block<'_>>(buffer.as_ref()).is_err());
    }

    #[test]
    fn block_header_rejects_unknown_type() {
        assert!(decode::<Block<'_>>(&[0x00, 0xCB, 0x06, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn block_header_rejects_length_shorter_than_header() {
        assert!(decode::<Block<'_>>(&[0xC0, 0xCC, 0x05, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn frame_acknowledge_round_trip() {
        let pdu = FrameAcknowledgePdu { frame_id: 7 };
        let buffer = encode_vec(&pdu).unwrap();

        assert_eq!(buffer, [0x07, 0x00, 0x00, 0x00]);
        assert_eq!(decode::<FrameAcknowledgePdu>(&buffer).unwrap(), pdu);
    }
}
