//! Connection tracking for the tick loop.
//!
//! Each [`Connection`] exclusively owns its TCP stream; the registry is
//! the only place a stream lives, and everything else borrows it for the
//! duration of a call. All I/O here is non-blocking: a send that cannot
//! complete keeps its progress and is retried on the next poll pass, a
//! receive accumulates bytes until a whole frame is available.

use log::debug;
use shared::{codec, PlayerId};
use std::collections::HashMap;
use std::io;
use tokio::net::TcpStream;

/// A connected player's transport handle plus in-flight I/O state.
#[derive(Debug)]
pub struct Connection {
    id: PlayerId,
    stream: TcpStream,
    /// Outgoing frame and how much of it has hit the socket so far.
    outgoing: Vec<u8>,
    written: usize,
    /// Raw inbound bytes not yet assembled into a frame.
    incoming: Vec<u8>,
}

impl Connection {
    pub fn new(id: PlayerId, stream: TcpStream) -> Self {
        Self {
            id,
            stream,
            outgoing: Vec::new(),
            written: 0,
            incoming: Vec::new(),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Queues a frame for delivery, replacing any previous one. Delivery
    /// happens through [`Connection::try_flush`].
    pub fn start_send(&mut self, frame: &[u8]) {
        self.outgoing.clear();
        self.outgoing.extend_from_slice(frame);
        self.written = 0;
    }

    /// Pushes as much of the queued frame as the socket accepts right
    /// now. Returns `Ok(true)` once the frame is fully on the wire,
    /// `Ok(false)` if the socket is not ready for the rest yet.
    pub fn try_flush(&mut self) -> io::Result<bool> {
        while self.written < self.outgoing.len() {
            match self.stream.try_write(&self.outgoing[self.written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Drains whatever the socket has ready and returns one frame payload
    /// if a complete frame has arrived. `Ok(None)` means "nothing yet";
    /// an error means the peer is gone or is speaking garbage.
    pub fn try_recv_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(payload) = self.take_buffered_frame()? {
                return Ok(Some(payload));
            }
            let mut chunk = [0u8; 1024];
            match self.stream.try_read(&mut chunk) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => self.incoming.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn take_buffered_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.incoming.len() < codec::FRAME_HEADER_LEN {
            return Ok(None);
        }
        let header = [
            self.incoming[0],
            self.incoming[1],
            self.incoming[2],
            self.incoming[3],
        ];
        let len = codec::frame_len(header);
        if len > codec::MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer announced an oversized frame of {} bytes", len),
            ));
        }
        if self.incoming.len() < codec::FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        let payload = self.incoming[codec::FRAME_HEADER_LEN..codec::FRAME_HEADER_LEN + len].to_vec();
        self.incoming.drain(..codec::FRAME_HEADER_LEN + len);
        Ok(Some(payload))
    }
}

/// Maps player ids to their connections. Entries are added only while
/// the registration window is open and removed on elimination, timeout
/// or disconnect; an id is never bound to a second transport.
pub struct ConnectionRegistry {
    connections: HashMap<PlayerId, Connection>,
    max_clients: usize,
}

impl ConnectionRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_clients,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_clients
    }

    pub fn insert(&mut self, connection: Connection) {
        debug!("connection registered for player {}", connection.id());
        self.connections.insert(connection.id(), connection);
    }

    /// Drops the registry entry; the returned connection (and with it the
    /// socket) is closed when the caller lets go of it.
    pub fn remove(&mut self, id: PlayerId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.connections.keys().copied().collect()
    }
}
