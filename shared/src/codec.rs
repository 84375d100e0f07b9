//! Byte-level wire codec shared by server and client.
//!
//! Every message travels as a frame: a big-endian `u32` payload length
//! followed by the payload. Integers inside payloads are big-endian;
//! strings are a `u32` byte length followed by UTF-8 bytes. Decoders
//! must consume their payload exactly; leftovers are a protocol error.

use crate::{Color, Direction, GameState, Player, Pos};
use thiserror::Error;

/// Size of the length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Upper bound on a single frame payload. A 255-player snapshot on a
/// large grid stays well below this; anything bigger is a corrupt peer.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message ended before the expected field")]
    UnexpectedEof,
    #[error("{0} byte(s) left over after decoding the message")]
    TrailingBytes(usize),
    #[error("invalid direction code {0}")]
    InvalidDirection(i32),
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("grid dimensions {0}x{1} are not representable")]
    InvalidGridSize(i32, i32),
}

/// Prepends the length header, turning a payload into a sendable frame.
pub fn frame(payload: Vec<u8>) -> Vec<u8> {
    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(&payload);
    framed
}

/// Reads the payload length out of a frame header.
pub fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> usize {
    u32::from_be_bytes(header) as usize
}

pub fn encode_name(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + name.len());
    put_string(&mut buf, name);
    buf
}

pub fn decode_name(payload: &[u8]) -> Result<String, DecodeError> {
    let mut reader = Reader::new(payload);
    let name = reader.string()?;
    reader.finish()?;
    Ok(name)
}

pub fn encode_color(color: Color) -> Vec<u8> {
    vec![color.r, color.g, color.b]
}

pub fn decode_color(payload: &[u8]) -> Result<Color, DecodeError> {
    let mut reader = Reader::new(payload);
    let color = Color::new(reader.u8()?, reader.u8()?, reader.u8()?);
    reader.finish()?;
    Ok(color)
}

pub fn encode_move(direction: Direction) -> Vec<u8> {
    direction.code().to_be_bytes().to_vec()
}

pub fn decode_move(payload: &[u8]) -> Result<Direction, DecodeError> {
    let mut reader = Reader::new(payload);
    let code = reader.i32()?;
    reader.finish()?;
    Direction::from_code(code).ok_or(DecodeError::InvalidDirection(code))
}

/// Serializes a snapshot in the fixed field order:
/// grid dimensions, player count, one record per player
/// (x, y, r, g, b, name, id, frame), then the raw grid cells.
pub fn encode_snapshot(state: &GameState) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + state.grid.len() + state.players.len() * 32);
    put_i32(&mut buf, state.grid_width);
    put_i32(&mut buf, state.grid_height);
    put_u32(&mut buf, state.players.len() as u32);
    for player in &state.players {
        put_i32(&mut buf, player.position.x);
        put_i32(&mut buf, player.position.y);
        buf.push(player.color.r);
        buf.push(player.color.g);
        buf.push(player.color.b);
        put_string(&mut buf, &player.name);
        buf.push(player.id);
        put_i32(&mut buf, state.frame);
    }
    buf.extend_from_slice(&state.grid);
    buf
}

pub fn decode_snapshot(payload: &[u8]) -> Result<GameState, DecodeError> {
    let mut reader = Reader::new(payload);
    let grid_width = reader.i32()?;
    let grid_height = reader.i32()?;
    let cell_count = match (grid_width, grid_height) {
        (w, h) if w >= 0 && h >= 0 => (w as usize).checked_mul(h as usize),
        _ => None,
    };
    let cell_count = cell_count.ok_or(DecodeError::InvalidGridSize(grid_width, grid_height))?;

    let player_count = reader.u32()?;
    let mut players = Vec::new();
    let mut frame = 0;
    for _ in 0..player_count {
        let x = reader.i32()?;
        let y = reader.i32()?;
        let color = Color::new(reader.u8()?, reader.u8()?, reader.u8()?);
        let name = reader.string()?;
        let id = reader.u8()?;
        frame = reader.i32()?;
        players.push(Player {
            id,
            name,
            color,
            position: Pos::new(x, y),
        });
    }

    let grid = reader.take(cell_count)?.to_vec();
    reader.finish()?;

    Ok(GameState {
        grid_width,
        grid_height,
        players,
        frame,
        grid,
    })
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    put_u32(buf, value.len() as u32);
    buf.extend_from_slice(value.as_bytes());
}

/// Sequential payload reader that tracks how much has been consumed,
/// so [`Reader::finish`] can enforce exact consumption.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn finish(self) -> Result<(), DecodeError> {
        let left = self.buf.len() - self.pos;
        if left != 0 {
            return Err(DecodeError::TrailingBytes(left));
        }
        Ok(())
    }
}
