//! Authoritative game state: the occupancy grid, the player registry and
//! the per-tick move resolution.
//!
//! The grid invariant maintained by every operation here: a cell holds a
//! player's id exactly when it is that player's head or part of their
//! tail, and [`shared::EMPTY_CELL`] otherwise.

use crate::config::Config;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use shared::{Color, Direction, GameState, PlayerId, Pos, EMPTY_CELL};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Tail length cap at frame 0; the cap grows by one cell per 100 frames.
const BASE_TAIL_LENGTH: i32 = 55;

/// Rejection-sampling budget per spawn, as a multiple of the cell count.
const SPAWN_ATTEMPTS_PER_CELL: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("no empty cell found for a new player after {0} attempts")]
    GridFull(usize),
    #[error("the 8-bit player id space is exhausted")]
    IdsExhausted,
}

/// A live player. Owned exclusively by [`Game`]; the tail is ordered
/// most-recent-first.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: Color,
    pub position: Pos,
    pub tail: VecDeque<Pos>,
}

pub struct Game {
    conf: Config,
    players: HashMap<PlayerId, Player>,
    grid: Vec<u8>,
    /// Next id to hand out; u16 so exhaustion of the u8 space is
    /// detectable instead of wrapping. Ids are never reused.
    next_id: u16,
    frame: i32,
    game_started: bool,
    rng: StdRng,
    palette: Vec<Color>,
}

impl Game {
    pub fn new(conf: Config, mut rng: StdRng) -> Self {
        let palette = build_palette(&mut rng);
        let cells = (conf.grid_width * conf.grid_height) as usize;
        Self {
            conf,
            players: HashMap::new(),
            grid: vec![EMPTY_CELL; cells],
            next_id: 1,
            frame: 0,
            game_started: false,
            rng,
            palette,
        }
    }

    /// Spawns a new player on a uniformly random empty cell.
    pub fn add_player(&mut self, name: &str) -> Result<PlayerId, GameError> {
        if self.next_id > PlayerId::MAX as u16 {
            return Err(GameError::IdsExhausted);
        }
        let id = self.next_id as PlayerId;

        let max_attempts =
            (self.conf.grid_width * self.conf.grid_height) as usize * SPAWN_ATTEMPTS_PER_CELL;
        let mut position = None;
        for _ in 0..max_attempts {
            let candidate = Pos::new(
                self.rng.gen_range(0..self.conf.grid_width),
                self.rng.gen_range(0..self.conf.grid_height),
            );
            if self.cell(candidate) == EMPTY_CELL {
                position = Some(candidate);
                break;
            }
        }
        let position = position.ok_or(GameError::GridFull(max_attempts))?;

        let color = self.palette[(id as usize - 1) % self.palette.len()];
        *self.cell_mut(position) = id;
        self.players.insert(
            id,
            Player {
                id,
                name: name.to_string(),
                color,
                position,
                tail: VecDeque::new(),
            },
        );
        self.next_id += 1;
        self.game_started = true;
        info!(
            "player {} ({}) spawned at ({}, {})",
            id, name, position.x, position.y
        );
        Ok(id)
    }

    /// Clears every cell belonging to `id` and drops the registry entry.
    /// Unknown ids are a no-op.
    pub fn remove_player(&mut self, id: PlayerId) {
        let Some(player) = self.players.remove(&id) else {
            return;
        };
        *self.cell_mut(player.position) = EMPTY_CELL;
        for tail_pos in &player.tail {
            *self.cell_mut(*tail_pos) = EMPTY_CELL;
        }
        info!("player {} ({}) removed", id, player.name);
    }

    /// The per-tick transition: resolves all proposed moves at once.
    ///
    /// An empty move map changes nothing at all; a tick that collected no
    /// moves performs no tail aging and no elimination.
    pub fn move_players(&mut self, moves: HashMap<PlayerId, Direction>) {
        if moves.is_empty() {
            return;
        }
        let max_tail_length = (BASE_TAIL_LENGTH + self.frame / 100) as usize;

        // Proposed head per mover; moves for unknown ids are dropped here.
        let mut proposed: HashMap<PlayerId, Pos> = HashMap::new();
        for (id, direction) in &moves {
            let Some(player) = self.players.get(id) else {
                continue;
            };
            let target = player.position + direction.vector();
            debug!(
                "player {} ({}) heading for ({},{}) from ({},{}) in frame {}",
                id, player.name, target.x, target.y, player.position.x, player.position.y,
                self.frame
            );
            proposed.insert(*id, target);
        }

        // All eliminations are applied before any surviving move commits,
        // so survivors never read half-updated occupancy.
        let colliding = self.check_collisions(&proposed);
        for id in &colliding {
            self.remove_player(*id);
            proposed.remove(id);
        }

        let width = self.conf.grid_width;
        for (id, target) in proposed {
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            self.grid[(target.y * width + target.x) as usize] = id;
            player.tail.push_front(player.position);
            player.position = target;
            if player.tail.len() > max_tail_length {
                if let Some(oldest) = player.tail.pop_back() {
                    self.grid[(oldest.y * width + oldest.x) as usize] = EMPTY_CELL;
                }
            }
        }
    }

    /// False until the first player has ever joined, then true once at
    /// most one player is left standing.
    pub fn is_game_over(&self) -> bool {
        self.game_started && self.players.len() <= 1
    }

    /// Consistent point-in-time copy for broadcast and rendering.
    /// Players are listed in ascending id order.
    pub fn snapshot(&self) -> GameState {
        let mut players: Vec<shared::Player> = self
            .players
            .values()
            .map(|p| shared::Player {
                id: p.id,
                name: p.name.clone(),
                color: p.color,
                position: p.position,
            })
            .collect();
        players.sort_by_key(|p| p.id);
        GameState {
            grid_width: self.conf.grid_width,
            grid_height: self.conf.grid_height,
            players,
            frame: self.frame,
            grid: self.grid.clone(),
        }
    }

    pub fn players(&self) -> &HashMap<PlayerId, Player> {
        &self.players
    }

    pub fn frame(&self) -> i32 {
        self.frame
    }

    pub fn advance_frame(&mut self) {
        self.frame += 1;
    }

    fn cell(&self, pos: Pos) -> u8 {
        self.grid[(pos.y * self.conf.grid_width + pos.x) as usize]
    }

    fn cell_mut(&mut self, pos: Pos) -> &mut u8 {
        &mut self.grid[(pos.y * self.conf.grid_width + pos.x) as usize]
    }

    fn legal_move(&self, target: Pos) -> bool {
        if !shared::is_inside_grid(target, self.conf.grid_width, self.conf.grid_height) {
            debug!("move to ({},{}) is out of bounds", target.x, target.y);
            return false;
        }
        if self.cell(target) != EMPTY_CELL {
            debug!(
                "move to ({},{}) runs into player {}",
                target.x,
                target.y,
                self.cell(target)
            );
            return false;
        }
        true
    }

    /// Returns every id whose proposed move loses this tick: both ends
    /// of any head-on pair, plus anyone heading out of bounds or into an
    /// occupied cell.
    fn check_collisions(&self, proposed: &HashMap<PlayerId, Pos>) -> HashSet<PlayerId> {
        let mut colliding = HashSet::new();
        for (&id1, &pos1) in proposed {
            for (&id2, &pos2) in proposed {
                if id1 < id2 && pos1 == pos2 {
                    debug!("players {} and {} are heading into the same cell", id1, id2);
                    colliding.insert(id1);
                    colliding.insert(id2);
                }
            }
        }
        for (&id, &target) in proposed {
            if !self.legal_move(target) {
                debug!("player {} proposed an illegal move", id);
                colliding.insert(id);
            }
        }
        colliding
    }

    #[cfg(test)]
    fn add_player_at(&mut self, name: &str, position: Pos) -> PlayerId {
        assert_eq!(self.cell(position), EMPTY_CELL);
        let id = self.next_id as PlayerId;
        let color = self.palette[(id as usize - 1) % self.palette.len()];
        *self.cell_mut(position) = id;
        self.players.insert(
            id,
            Player {
                id,
                name: name.to_string(),
                color,
                position,
                tail: VecDeque::new(),
            },
        );
        self.next_id += 1;
        self.game_started = true;
        id
    }
}

/// One precomputed color per possible id, drawn from the game's own RNG.
/// Components stay at or below 200 so trails remain visible on a light
/// background.
fn build_palette(rng: &mut StdRng) -> Vec<Color> {
    (0..PlayerId::MAX)
        .map(|_| {
            Color::new(
                rng.gen_range(0..=200),
                rng.gen_range(0..=200),
                rng.gen_range(0..=200),
            )
        })
        .collect()
}
