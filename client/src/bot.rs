//! Decision logic of the automated player: a random walk with a bias
//! toward keeping the current heading, constrained to legal cells.

use rand::rngs::StdRng;
use rand::Rng;
use shared::{Direction, GameState, Player};
use thiserror::Error;

/// Proposal budget per decision before the bot gives up. Only reachable
/// when the bot is fully boxed in.
const MAX_ATTEMPTS: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no valid move found after {attempts} attempts")]
pub struct NoValidMove {
    pub attempts: usize,
}

/// True when moving `direction` keeps the player on the grid and on an
/// unoccupied cell.
pub fn is_valid_move(state: &GameState, me: &Player, direction: Direction) -> bool {
    let target = me.position + direction.vector();
    state.is_inside(target) && state.is_cell_empty(target)
}

/// Picks a legal direction for this tick. `inertia` widens the sampling
/// range in favor of `previous`, so higher values mean straighter paths;
/// once the previous heading proves blocked the sampling turns uniform.
pub fn decide_move(
    state: &GameState,
    me: &Player,
    previous: Option<Direction>,
    inertia: u32,
    rng: &mut StdRng,
) -> Result<Direction, NoValidMove> {
    let mut inertial_weight = if previous.is_some() { inertia } else { 0 };

    for _ in 0..MAX_ATTEMPTS {
        let proposal = rng.gen_range(0..4 + inertial_weight as usize);
        let direction = if proposal < 4 {
            Direction::ALL[proposal]
        } else if let Some(prev) = previous {
            inertial_weight = 0;
            prev
        } else {
            continue;
        };
        if is_valid_move(state, me, direction) {
            return Ok(direction);
        }
    }

    Err(NoValidMove {
        attempts: MAX_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use shared::{Color, Pos};

    fn player_at(pos: Pos) -> Player {
        Player {
            id: 1,
            name: "bot".to_string(),
            color: Color::new(1, 2, 3),
            position: pos,
        }
    }

    fn open_state(me: &Player) -> GameState {
        let mut grid = vec![0u8; 100];
        grid[(me.position.y * 10 + me.position.x) as usize] = me.id;
        GameState {
            grid_width: 10,
            grid_height: 10,
            players: vec![me.clone()],
            frame: 0,
            grid,
        }
    }

    fn block(state: &mut GameState, pos: Pos) {
        state.grid[(pos.y * state.grid_width + pos.x) as usize] = 9;
    }

    #[test]
    fn test_picks_the_only_open_direction() {
        let me = player_at(Pos::new(5, 5));
        let mut state = open_state(&me);
        block(&mut state, Pos::new(5, 4));
        block(&mut state, Pos::new(6, 5));
        block(&mut state, Pos::new(5, 6));
        // only west stays open

        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            assert_eq!(
                decide_move(&state, &me, None, 0, &mut rng),
                Ok(Direction::West)
            );
        }
    }

    #[test]
    fn test_boxed_in_bot_reports_failure() {
        let me = player_at(Pos::new(0, 0));
        let mut state = open_state(&me);
        block(&mut state, Pos::new(1, 0));
        block(&mut state, Pos::new(0, 1));
        // the remaining two directions leave the grid

        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            decide_move(&state, &me, Some(Direction::North), 30, &mut rng),
            Err(NoValidMove { attempts: 200 })
        );
    }

    #[test]
    fn test_never_proposes_an_illegal_move() {
        let me = player_at(Pos::new(0, 0));
        let state = open_state(&me);
        // in the corner only east and south are legal

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let direction = decide_move(&state, &me, Some(Direction::North), 25, &mut rng).unwrap();
            assert!(matches!(direction, Direction::East | Direction::South));
        }
    }
}
