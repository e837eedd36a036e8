//! Vector tile encoding: protobuf messages, command packing and the layer builder.
mod command;
mod encoder;
mod proto;

use bytes::{Bytes, BytesMut};
use prost::Message;

use crate::error::Result;

pub use command::{
    command_decode, command_encode, decode_geometry, zigzag_decode, zigzag_encode, CMD_CLOSE_PATH,
    CMD_LINE_TO, CMD_MOVE_TO,
};
pub use encoder::{LayerEncoder, EXTENT, VERSION};
pub use proto::{Feature, GeomType, Layer, Tile, Value};

/// Serialize a tile to its protobuf bytes.
pub fn encode_tile(tile: &Tile) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(tile.encoded_len());
    tile.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Parse protobuf bytes back into a tile.
pub fn decode_tile(buf: &[u8]) -> std::result::Result<Tile, prost::DecodeError> { Tile::decode(buf) }
