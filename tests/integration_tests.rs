//! Integration tests for the tick protocol across the real TCP stack.
//!
//! These tests run the actual server against the actual client library
//! on localhost sockets and validate the handshake, the per-tick
//! broadcast/collect exchange, and the deadline-based eviction.

use client::bot;
use client::connection::Connection;
use rand::rngs::StdRng;
use rand::SeedableRng;
use server::config::Config;
use server::game::Game;
use server::network::{GameServer, Timing};
use shared::GameState;
use std::time::Duration;
use tokio::time::timeout;

/// Short protocol timings so a whole session fits in a test budget.
fn test_timing() -> Timing {
    Timing {
        tick_period: Duration::from_millis(40),
        comm_deadline: Duration::from_millis(150),
        accept_window: Duration::from_millis(500),
        handshake_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(1),
    }
}

fn test_config(max_clients: usize) -> Config {
    Config {
        max_clients,
        ..Config::default()
    }
}

/// Starts a server on an ephemeral port, returns its address and the
/// running task.
async fn start_server(
    conf: Config,
    seed: u64,
) -> (String, tokio::task::JoinHandle<()>) {
    let game = Game::new(conf.clone(), StdRng::seed_from_u64(seed));
    let server = GameServer::new("127.0.0.1:0", &conf, game, test_timing())
        .await
        .expect("failed to bind test server");
    let addr = server.local_addr().unwrap().to_string();
    let handle = tokio::spawn(server.run());
    (addr, handle)
}

/// Plays along for up to `ticks` ticks, answering every snapshot with a
/// legal move, and returns the snapshots seen.
async fn run_responder(mut connection: Connection, ticks: usize, seed: u64) -> Vec<GameState> {
    let name = connection.player_name().to_string();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut states = Vec::new();
    for _ in 0..ticks {
        let state = match connection.receive_state().await {
            Ok(state) => state,
            Err(_) => break,
        };
        let me = match state.find_player(&name) {
            Some(player) => player.clone(),
            None => {
                states.push(state);
                break;
            }
        };
        if let Ok(direction) = bot::decide_move(&state, &me, None, 0, &mut rng) {
            let _ = connection.send_move(direction).await;
        }
        states.push(state);
    }
    states
}

/// PROTOCOL SESSION TESTS
mod session_tests {
    use super::*;

    /// Two clients complete the handshake and exchange several ticks;
    /// every snapshot lists both players and the frame counter advances.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_clients_stay_synchronized() {
        let (addr, server) = start_server(test_config(8), 21).await;

        let (alpha, _) = Connection::connect(&addr, "alpha").await.unwrap();
        let (beta, _) = Connection::connect(&addr, "beta").await.unwrap();

        let beta_task = tokio::spawn(run_responder(beta, 8, 2));
        let alpha_states = run_responder(alpha, 8, 1).await;
        let beta_states = beta_task.await.unwrap();

        assert!(alpha_states.len() >= 4, "alpha saw {} states", alpha_states.len());
        assert!(beta_states.len() >= 4);
        for state in &alpha_states {
            assert_eq!(state.players.len(), 2);
            assert_eq!(state.grid_width, 100);
            assert_eq!(state.grid_height, 100);
            assert_eq!(state.grid.len(), 100 * 100);
            assert!(state.find_player("alpha").is_some());
            assert!(state.find_player("beta").is_some());
        }
        for pair in alpha_states.windows(2) {
            assert!(pair[1].frame > pair[0].frame);
        }

        // Both clients hang up; the server notices, empties the game and
        // finishes the session on its own.
        timeout(Duration::from_secs(10), server)
            .await
            .expect("server did not finish after all clients left")
            .unwrap();
    }

    /// Heads move by exactly one cell per tick and old head cells stay
    /// owned by their player as trail.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn moves_are_applied_between_snapshots() {
        let (addr, server) = start_server(test_config(8), 33).await;

        let (alpha, _) = Connection::connect(&addr, "alpha").await.unwrap();
        let (beta, _) = Connection::connect(&addr, "beta").await.unwrap();

        let beta_task = tokio::spawn(run_responder(beta, 6, 4));
        let alpha_states = run_responder(alpha, 6, 3).await;
        beta_task.await.unwrap();

        for pair in alpha_states.windows(2) {
            let before = pair[0].find_player("alpha").unwrap();
            let after = pair[1].find_player("alpha").unwrap();
            let dx = (after.position.x - before.position.x).abs();
            let dy = (after.position.y - before.position.y).abs();
            assert_eq!(dx + dy, 1, "head must advance one cell per tick");
            // the vacated cell becomes trail, still owned by alpha
            assert_eq!(
                pair[1].cell(before.position.x, before.position.y),
                after.id
            );
        }

        timeout(Duration::from_secs(10), server).await.unwrap().unwrap();
    }

    /// A connection that never answers misses the communication deadline
    /// and is evicted, while the responsive clients play on untouched.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn silent_client_is_evicted_without_harming_others() {
        let (addr, server) = start_server(test_config(8), 55).await;

        let (alpha, _) = Connection::connect(&addr, "alpha").await.unwrap();
        let (beta, _) = Connection::connect(&addr, "beta").await.unwrap();
        // gamma completes the handshake, then goes silent forever
        let (gamma, _) = Connection::connect(&addr, "gamma").await.unwrap();

        let beta_task = tokio::spawn(run_responder(beta, 8, 6));
        let alpha_states = run_responder(alpha, 8, 5).await;
        let beta_states = beta_task.await.unwrap();
        drop(gamma);

        // gamma existed at the start of the session
        let first = alpha_states.first().unwrap();
        assert_eq!(first.players.len(), 3);
        let gamma_id = first.find_player("gamma").unwrap().id;

        // and is gone by the end, grid cells included, while alpha and
        // beta survived the whole window
        let last = alpha_states.last().unwrap();
        assert_eq!(last.players.len(), 2);
        assert!(last.find_player("gamma").is_none());
        assert!(last.find_player("alpha").is_some());
        assert!(last.find_player("beta").is_some());
        assert!(
            last.grid.iter().all(|&cell| cell != gamma_id),
            "evicted player's cells must be cleared"
        );
        assert!(beta_states.last().unwrap().find_player("beta").is_some());

        timeout(Duration::from_secs(10), server).await.unwrap().unwrap();
    }

    /// Once the pre-game window has elapsed no further client gets in.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_connection_is_not_admitted() {
        let (addr, server) = start_server(test_config(8), 77).await;

        tokio::time::sleep(test_timing().accept_window + Duration::from_millis(300)).await;

        let result = Connection::connect(&addr, "latecomer").await;
        assert!(result.is_err(), "latecomer must not complete the handshake");

        server.abort();
    }

    /// A server at its client capacity turns away further handshakes.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn full_server_turns_clients_away() {
        let (addr, server) = start_server(test_config(1), 99).await;

        let (first, _) = Connection::connect(&addr, "first").await.unwrap();
        let result = Connection::connect(&addr, "second").await;
        assert!(result.is_err(), "server over capacity must refuse the handshake");

        drop(first);
        server.abort();
    }
}
