//! Connection to the game server.
//!
//! The exchange is strictly alternating once the handshake is done: the
//! server pushes one state snapshot per tick, the client answers with at
//! most one move. Every operation runs under a timeout; a server that
//! stops talking ends the session with an error rather than a hang.

use log::{debug, warn};
use shared::codec::{self, DecodeError};
use shared::{Color, Direction, GameState};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Budget for any single protocol exchange with the server. Generous on
/// purpose: the first snapshot only arrives once the pre-game window has
/// elapsed.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection I/O failed")]
    Io(#[from] io::Error),
    #[error("server sent an undecodable message")]
    Decode(#[from] DecodeError),
    #[error("timed out waiting for the server")]
    TimedOut(#[from] tokio::time::error::Elapsed),
}

pub struct Connection {
    stream: TcpStream,
    frame_number: i32,
    last_frame_sent: i32,
    player_name: String,
}

impl Connection {
    /// Performs the handshake: announce the player name, receive the
    /// assigned color. Returns the live connection plus that color.
    pub async fn connect(addr: &str, player_name: &str) -> Result<(Connection, Color), ClientError> {
        debug!("{}: connecting to server at {}", player_name, addr);
        let mut stream = timeout(IO_TIMEOUT, TcpStream::connect(addr)).await??;
        stream.set_nodelay(true)?;

        timeout(
            IO_TIMEOUT,
            write_frame(&mut stream, codec::encode_name(player_name)),
        )
        .await??;
        let color_payload = timeout(IO_TIMEOUT, read_frame(&mut stream)).await??;
        let color = codec::decode_color(&color_payload)?;

        Ok((
            Connection {
                stream,
                frame_number: 0,
                last_frame_sent: -1,
                player_name: player_name.to_string(),
            },
            color,
        ))
    }

    /// Receives the next per-tick snapshot. The message must decode
    /// exactly; a malformed snapshot is a fatal protocol error.
    pub async fn receive_state(&mut self) -> Result<GameState, ClientError> {
        let payload = timeout(IO_TIMEOUT, read_frame(&mut self.stream)).await??;
        let state = codec::decode_snapshot(&payload)?;
        self.frame_number = state.frame;
        Ok(state)
    }

    /// Submits the move for the current frame. At most one move per
    /// received snapshot is accepted; a second send before the next
    /// snapshot is ignored with a warning.
    pub async fn send_move(&mut self, direction: Direction) -> Result<(), ClientError> {
        if self.frame_number == self.last_frame_sent {
            warn!(
                "{}: move for frame {} already sent, receive the next state first",
                self.player_name, self.frame_number
            );
            return Ok(());
        }
        timeout(
            IO_TIMEOUT,
            write_frame(&mut self.stream, codec::encode_move(direction)),
        )
        .await??;
        self.last_frame_sent = self.frame_number;
        Ok(())
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }
}

async fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut header = [0u8; codec::FRAME_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = codec::frame_len(header);
    if len > codec::MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("server announced an oversized frame of {} bytes", len),
        ));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn write_frame(stream: &mut TcpStream, payload: Vec<u8>) -> io::Result<()> {
    stream.write_all(&codec::frame(payload)).await
}
