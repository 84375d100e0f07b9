//! Server network layer: client acceptance and the tick-synchronized
//! broadcast/collect loop.
//!
//! Each tick runs the same sequence: broadcast the current snapshot to
//! every connection, collect one move from each under a hard deadline,
//! evict whoever missed it, apply the collected moves, advance the frame
//! counter. Eviction is terminal; there is no reconnection path.

use crate::config::Config;
use crate::connection::{Connection, ConnectionRegistry};
use crate::game::Game;
use log::{debug, error, info, warn};
use shared::{codec, Direction, PlayerId};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};

type HandshakeError = Box<dyn std::error::Error + Send + Sync>;

/// All the knobs of the tick protocol. The defaults match the intended
/// cadence of 10 ticks per second with a 100 ms communication deadline.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Fixed tick cadence.
    pub tick_period: Duration,
    /// How long one tick may spend on broadcast plus collect before the
    /// stragglers are evicted.
    pub comm_deadline: Duration,
    /// Pre-game window during which new clients are admitted.
    pub accept_window: Duration,
    /// Budget for each half of the per-connection handshake.
    pub handshake_timeout: Duration,
    /// Pause between inner poll passes of a tick.
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(100),
            comm_deadline: Duration::from_millis(100),
            accept_window: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Game state and connection registry, guarded by the one coarse lock
/// that serializes the acceptance task against the tick loop.
struct Shared {
    game: Game,
    connections: ConnectionRegistry,
}

pub struct GameServer {
    listener: TcpListener,
    shared: Arc<Mutex<Shared>>,
    timing: Timing,
}

impl GameServer {
    pub async fn new(
        addr: &str,
        conf: &Config,
        game: Game,
        timing: Timing,
    ) -> io::Result<GameServer> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(GameServer {
            listener,
            shared: Arc::new(Mutex::new(Shared {
                game,
                connections: ConnectionRegistry::new(conf.max_clients),
            })),
            timing,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the acceptance window and the tick loop until the game is
    /// decided. Dropping the registry on return closes every socket.
    pub async fn run(self) {
        let GameServer {
            listener,
            shared,
            timing,
        } = self;

        let accept_task = tokio::spawn(accept_clients(
            listener,
            Arc::clone(&shared),
            timing.clone(),
        ));
        game_loop(&shared, &timing).await;
        accept_task.abort();
    }
}

/// Admits clients until the pre-game window elapses. Afterwards nobody
/// joins for the rest of the session.
async fn accept_clients(listener: TcpListener, shared: Arc<Mutex<Shared>>, timing: Timing) {
    info!(
        "accepting clients for the next {} ms",
        timing.accept_window.as_millis()
    );
    let window_ends = Instant::now() + timing.accept_window;
    loop {
        let now = Instant::now();
        if now >= window_ends {
            break;
        }
        match timeout(window_ends - now, listener.accept()).await {
            Err(_) => break,
            Ok(Err(e)) => error!("failed to accept a connection: {}", e),
            Ok(Ok((stream, addr))) => {
                if let Err(e) = admit_client(stream, &shared, timing.handshake_timeout).await {
                    warn!("handshake with {} failed: {}", addr, e);
                }
            }
        }
    }
    info!("registration window closed");
}

/// The only blocking-style exchange in the protocol: receive the player
/// name, register the player, answer with the assigned color. After this
/// the connection only ever sees non-blocking tick I/O.
async fn admit_client(
    mut stream: TcpStream,
    shared: &Arc<Mutex<Shared>>,
    handshake_timeout: Duration,
) -> Result<(), HandshakeError> {
    stream.set_nodelay(true)?;
    let name_payload = timeout(handshake_timeout, read_frame(&mut stream)).await??;
    let name = codec::decode_name(&name_payload)?;

    let mut guard = shared.lock().await;
    if guard.connections.is_full() {
        warn!("server is full, turning away {}", name);
        return Ok(());
    }
    let id = match guard.game.add_player(&name) {
        Ok(id) => id,
        Err(e) => {
            warn!("cannot admit {}: {}", name, e);
            return Ok(());
        }
    };
    let color = guard.game.players()[&id].color;

    match timeout(
        handshake_timeout,
        write_frame(&mut stream, codec::encode_color(color)),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            guard.game.remove_player(id);
            return Err(e.into());
        }
        Err(e) => {
            guard.game.remove_player(id);
            return Err(e.into());
        }
    }

    guard.connections.insert(Connection::new(id, stream));
    info!("new client connected: {} with id {}", name, id);
    Ok(())
}

/// Waits out the pre-game window, then drives ticks at the fixed cadence
/// until at most one player is left. A tick that overruns its period
/// starts the next one at the next boundary, with no catch-up bursts.
async fn game_loop(shared: &Arc<Mutex<Shared>>, timing: &Timing) {
    sleep(timing.accept_window).await;

    let mut ticker = interval(timing.tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of an interval completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let mut guard = shared.lock().await;
        if guard.game.is_game_over() {
            info!(
                "game over with {} player(s) left",
                guard.game.players().len()
            );
            break;
        }
        let Shared { game, connections } = &mut *guard;
        run_tick(game, connections, timing).await;
    }
}

/// One full tick: broadcast, collect, evict stragglers, apply, advance.
async fn run_tick(game: &mut Game, connections: &mut ConnectionRegistry, timing: &Timing) {
    let frame = game.frame();

    // Connections whose player was eliminated last tick are reaped before
    // anything is sent to them.
    for id in connections.ids() {
        if !game.players().contains_key(&id) {
            debug!("server ({}): dropping connection of dead player {}", frame, id);
            connections.remove(id);
        }
    }

    let snapshot = game.snapshot();
    let frame_bytes = codec::frame(codec::encode_snapshot(&snapshot));
    let deadline = Instant::now() + timing.comm_deadline;

    let mut unsent: HashSet<PlayerId> = connections.ids().into_iter().collect();
    for &id in &unsent {
        if let Some(connection) = connections.get_mut(id) {
            connection.start_send(&frame_bytes);
        }
    }
    let mut awaiting: HashSet<PlayerId> = HashSet::new();
    let mut moves: HashMap<PlayerId, Direction> = HashMap::new();
    let mut lost: Vec<PlayerId> = Vec::new();

    while !unsent.is_empty() || !awaiting.is_empty() {
        // Broadcast pass: one non-blocking attempt per unsent connection;
        // whoever is not ready stays in the set for the next pass.
        for id in unsent.clone() {
            let Some(connection) = connections.get_mut(id) else {
                unsent.remove(&id);
                continue;
            };
            match connection.try_flush() {
                Ok(true) => {
                    debug!("server ({}): game state sent to player {}", frame, id);
                    unsent.remove(&id);
                    awaiting.insert(id);
                }
                Ok(false) => {}
                Err(e) => {
                    info!("player {} disconnected: {}", id, e);
                    unsent.remove(&id);
                    lost.push(id);
                }
            }
        }

        // Collect pass: a connection leaves the awaiting set with exactly
        // one accepted move for this tick.
        for id in awaiting.clone() {
            let Some(connection) = connections.get_mut(id) else {
                awaiting.remove(&id);
                continue;
            };
            match connection.try_recv_frame() {
                Ok(Some(payload)) => match codec::decode_move(&payload) {
                    Ok(direction) => {
                        debug!(
                            "server ({}): received direction {:?} from player {}",
                            frame, direction, id
                        );
                        awaiting.remove(&id);
                        moves.insert(id, direction);
                    }
                    Err(e) => {
                        warn!("player {} sent a malformed move: {}", id, e);
                        awaiting.remove(&id);
                        lost.push(id);
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    info!("player {} disconnected: {}", id, e);
                    awaiting.remove(&id);
                    lost.push(id);
                }
            }
        }

        if unsent.is_empty() && awaiting.is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            // Whoever has neither received the state nor answered by now
            // is evicted, even if their reply arrives a moment later.
            for id in unsent.drain().chain(awaiting.drain()) {
                info!(
                    "server ({}): player {} missed the communication deadline",
                    frame, id
                );
                lost.push(id);
            }
            break;
        }
        sleep(timing.poll_interval).await;
    }

    for id in lost {
        game.remove_player(id);
        connections.remove(id);
        moves.remove(&id);
    }

    game.move_players(moves);
    game.advance_frame();
}

async fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut header = [0u8; codec::FRAME_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = codec::frame_len(header);
    if len > codec::MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("peer announced an oversized frame of {} bytes", len),
        ));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn write_frame(stream: &mut TcpStream, payload: Vec<u8>) -> io::Result<()> {
    stream.write_all(&codec::frame(payload)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_timing() -> Timing {
        Timing {
            tick_period: Duration::from_millis(40),
            comm_deadline: Duration::from_millis(120),
            accept_window: Duration::from_millis(400),
            handshake_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn test_game() -> (Config, Game) {
        let conf = Config {
            grid_width: 50,
            grid_height: 50,
            ..Config::default()
        };
        let game = Game::new(conf.clone(), StdRng::seed_from_u64(11));
        (conf, game)
    }

    #[test]
    fn test_timing_defaults_match_the_protocol() {
        let timing = Timing::default();
        assert_eq!(timing.tick_period, Duration::from_millis(100));
        assert_eq!(timing.comm_deadline, Duration::from_millis(100));
        assert_eq!(timing.accept_window, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_handshake_assigns_a_color() {
        let (conf, game) = test_game();
        let server = GameServer::new("127.0.0.1:0", &conf, game, test_timing())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, codec::encode_name("probe")).await.unwrap();
        let color_payload = timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(color_payload.len(), 3);

        drop(stream);
        server_task.abort();
    }

    #[tokio::test]
    async fn test_first_snapshot_lists_every_admitted_player() {
        let (conf, game) = test_game();
        let server = GameServer::new("127.0.0.1:0", &conf, game, test_timing())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(server.run());

        // With a single player the game would already be decided, so two
        // clients register before the window closes.
        let mut one = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut one, codec::encode_name("one")).await.unwrap();
        read_frame(&mut one).await.unwrap(); // color
        let mut two = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut two, codec::encode_name("two")).await.unwrap();
        read_frame(&mut two).await.unwrap(); // color

        let payload = timeout(Duration::from_secs(2), read_frame(&mut one))
            .await
            .unwrap()
            .unwrap();
        let state = codec::decode_snapshot(&payload).unwrap();
        assert_eq!(state.grid_width, 50);
        assert_eq!(state.grid_height, 50);
        assert_eq!(state.frame, 0);
        assert_eq!(state.players.len(), 2);
        assert!(state.find_player("one").is_some());
        assert!(state.find_player("two").is_some());

        drop(one);
        drop(two);
        server_task.abort();
    }
}
