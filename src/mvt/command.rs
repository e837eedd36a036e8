//! Geometry command packing and zigzag parameter encoding.

/// MoveTo command id.
pub const CMD_MOVE_TO: u32 = 1;
/// LineTo command id.
pub const CMD_LINE_TO: u32 = 2;
/// ClosePath command id.
pub const CMD_CLOSE_PATH: u32 = 7;

/// Pack a command id and repeat count: `id | (count << 3)`.
#[inline]
pub fn command_encode(id: u32, count: u32) -> u32 { (id & 0x7) | (count << 3) }

/// Split a packed command into (id, count).
#[inline]
pub fn command_decode(packed: u32) -> (u32, u32) { (packed & 0x7, packed >> 3) }

/// Zigzag-encode a signed 32-bit parameter (arithmetic shift keeps the sign).
#[inline]
pub fn zigzag_encode(n: i32) -> u32 { ((n << 1) ^ (n >> 31)) as u32 }

#[inline]
pub fn zigzag_decode(n: u32) -> i32 { ((n >> 1) as i32) ^ -((n & 1) as i32) }

/// Decode a packed command stream into rings of absolute tile coordinates.
///
/// Each MoveTo starts a new ring. ClosePath ends it. The cursor carries
/// over between rings, matching how the stream was encoded. Returns `None`
/// if the stream is truncated or holds an unknown command.
pub fn decode_geometry(stream: &[u32]) -> Option<Vec<Vec<(i32, i32)>>> {
    let mut rings: Vec<Vec<(i32, i32)>> = Vec::new();
    let (mut x, mut y) = (0i32, 0i32);
    let mut i = 0;

    while i < stream.len() {
        let (id, count) = command_decode(stream[i]);
        i += 1;
        match id {
            CMD_MOVE_TO | CMD_LINE_TO => {
                for _ in 0..count {
                    let dx = zigzag_decode(*stream.get(i)?);
                    let dy = zigzag_decode(*stream.get(i + 1)?);
                    i += 2;
                    x = x.wrapping_add(dx);
                    y = y.wrapping_add(dy);
                    if id == CMD_MOVE_TO {
                        rings.push(Vec::new());
                    }
                    rings.last_mut()?.push((x, y));
                }
            }
            CMD_CLOSE_PATH => {}
            _ => return None,
        }
    }
    Some(rings)
}
