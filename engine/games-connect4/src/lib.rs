//! Connect-four implementation for the Arbor engine
//!
//! Connect-four is a two-player connection game where players drop discs into
//! a 7-column, 6-row vertically suspended grid. The objective is to be the
//! first to form a horizontal, vertical, or diagonal line of four discs.
//!
//! The board is stored in row-major order, with row 0 at the bottom:
//! ```text
//! Row 5: [35][36][37][38][39][40][41]  <- Top
//! Row 4: [28][29][30][31][32][33][34]
//! Row 3: [21][22][23][24][25][26][27]
//! Row 2: [14][15][16][17][18][19][20]
//! Row 1: [ 7][ 8][ 9][10][11][12][13]
//! Row 0: [ 0][ 1][ 2][ 3][ 4][ 5][ 6]  <- Bottom
//!         Col 0  1  2  3  4  5  6
//! ```
//! Actions are column indices 0-6. The symmetry group has two elements:
//! identity and the horizontal mirror.

use arbor_core::{ActionMask, ActionOutcome, Game, Seat, SymmetryMask, ValueVec};

#[cfg(test)]
mod tests;

/// Board dimensions
pub const COLS: usize = 7;
pub const ROWS: usize = 6;
pub const BOARD_SIZE: usize = COLS * ROWS; // 42

/// Connect-four game state.
///
/// Cells hold 0 (empty), 1 (seat 0, "Red") or 2 (seat 1, "Yellow").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct State {
    board: [u8; BOARD_SIZE],
    column_heights: [u8; COLS],
    current: Seat,
    /// 0 = ongoing, 1 = seat 0 won, 2 = seat 1 won, 3 = draw
    winner: u8,
    moves: u8,
}

impl State {
    pub fn new() -> Self {
        Self {
            board: [0; BOARD_SIZE],
            column_heights: [0; COLS],
            current: 0,
            winner: 0,
            moves: 0,
        }
    }

    pub fn board(&self) -> &[u8; BOARD_SIZE] {
        &self.board
    }

    pub fn current(&self) -> Seat {
        self.current
    }

    pub fn is_done(&self) -> bool {
        self.winner != 0
    }

    pub fn moves_played(&self) -> u32 {
        self.moves as u32
    }

    #[inline]
    fn pos(col: usize, row: usize) -> usize {
        row * COLS + col
    }

    /// Drop a disc for the current player. The column must not be full and
    /// the game must be ongoing.
    pub fn drop_piece(&mut self, column: u8) {
        let col = column as usize;
        debug_assert!(!self.is_done());
        debug_assert!(self.column_heights[col] < ROWS as u8);

        let row = self.column_heights[col] as usize;
        self.board[Self::pos(col, row)] = self.current + 1;
        self.column_heights[col] += 1;
        self.moves += 1;
        self.winner = self.check_winner_at(col, row);
        self.current = 1 - self.current;
    }

    pub fn legal_mask(&self) -> ActionMask {
        if self.is_done() {
            return ActionMask::EMPTY;
        }
        (0..COLS as u16)
            .filter(|&c| self.column_heights[c as usize] < ROWS as u8)
            .collect()
    }

    /// Check whether the disc at (col, row) completes a line of four.
    fn check_winner_at(&self, col: usize, row: usize) -> u8 {
        let player = self.board[Self::pos(col, row)];

        // Direction vectors: horizontal, vertical, diagonal /, diagonal \
        let directions: [(i32, i32); 4] = [(1, 0), (0, 1), (1, 1), (1, -1)];

        for (dc, dr) in directions {
            let mut count = 1;
            for sign in [1i32, -1] {
                let (mut c, mut r) = (col as i32 + sign * dc, row as i32 + sign * dr);
                while (0..COLS as i32).contains(&c)
                    && (0..ROWS as i32).contains(&r)
                    && self.board[Self::pos(c as usize, r as usize)] == player
                {
                    count += 1;
                    c += sign * dc;
                    r += sign * dr;
                }
            }
            if count >= 4 {
                return player;
            }
        }

        if self.column_heights.iter().all(|&h| h >= ROWS as u8) {
            return 3; // Draw
        }
        0
    }

    fn outcome_value(&self) -> Option<ValueVec> {
        match self.winner {
            0 => None,
            3 => Some(ValueVec::DRAW),
            w => Some(ValueVec::win_for(w - 1)),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirror a column index. Symmetry 0 is the identity, symmetry 1 the
/// horizontal mirror; both are their own inverses.
pub fn transform_column(col: u16, sym: u8) -> u16 {
    if sym == 0 {
        col
    } else {
        (COLS as u16 - 1) - col
    }
}

/// Connect-four marker type implementing the engine's `Game` contract.
#[derive(Debug)]
pub struct Connect4;

impl Game for Connect4 {
    const NAME: &'static str = "connect4";
    const NUM_ACTIONS: usize = COLS;
    const MAX_BRANCHING: usize = COLS;
    const NUM_SYMMETRIES: usize = 2;
    // Two occupancy planes plus a side-to-move pair.
    const INPUT_LEN: usize = 2 * BOARD_SIZE + 2;

    type FullState = State;
    type BaseState = State;
    type Key = u128;

    fn base_state(full: &State) -> State {
        *full
    }

    fn legal_actions(full: &State) -> ActionMask {
        full.legal_mask()
    }

    fn current_seat(base: &State) -> Seat {
        base.current
    }

    fn apply(full: &mut State, action: u16) -> ActionOutcome {
        full.drop_piece(action as u8);
        Self::outcome(full)
    }

    fn outcome(full: &State) -> ActionOutcome {
        match full.outcome_value() {
            Some(v) => ActionOutcome::Terminal(v),
            None => ActionOutcome::Continue,
        }
    }

    fn move_number(full: &State) -> u32 {
        full.moves_played()
    }

    fn symmetries(_full: &State) -> SymmetryMask {
        0b11
    }

    fn canonical_symmetry(base: &State) -> u8 {
        let mut mirrored = *base;
        Self::transform_state(&mut mirrored, 1);
        if Self::key(&mirrored) < Self::key(base) {
            1
        } else {
            0
        }
    }

    fn inverse_symmetry(sym: u8) -> u8 {
        sym
    }

    fn transform_state(base: &mut State, sym: u8) {
        if sym == 0 {
            return;
        }
        let old = base.board;
        for row in 0..ROWS {
            for col in 0..COLS {
                base.board[State::pos(COLS - 1 - col, row)] = old[State::pos(col, row)];
            }
        }
        base.column_heights.reverse();
    }

    fn transform_policy(policy: &mut [f32], sym: u8) {
        debug_assert_eq!(policy.len(), COLS);
        if sym != 0 {
            policy.reverse();
        }
    }

    fn transform_action(action: u16, sym: u8) -> u16 {
        transform_column(action, sym)
    }

    fn tensorize(base: &State, out: &mut [f32]) {
        debug_assert_eq!(out.len(), Self::INPUT_LEN);
        out.fill(0.0);
        for (i, &cell) in base.board.iter().enumerate() {
            match cell {
                1 => out[i] = 1.0,
                2 => out[BOARD_SIZE + i] = 1.0,
                _ => {}
            }
        }
        out[2 * BOARD_SIZE + base.current as usize] = 1.0;
    }

    fn key(base: &State) -> u128 {
        // Two 42-bit occupancy masks; the mover is derivable from the counts.
        let mut red = 0u64;
        let mut yellow = 0u64;
        for (i, &cell) in base.board.iter().enumerate() {
            match cell {
                1 => red |= 1 << i,
                2 => yellow |= 1 << i,
                _ => {}
            }
        }
        ((red as u128) << 64) | yellow as u128
    }

    fn action_to_str(action: u16) -> String {
        format!("{}", (b'a' + action as u8) as char)
    }

    fn render(base: &State) -> String {
        let mut s = String::new();
        for row in (0..ROWS).rev() {
            for col in 0..COLS {
                let c = match base.board[State::pos(col, row)] {
                    1 => 'R',
                    2 => 'Y',
                    _ => '.',
                };
                s.push(c);
                if col < COLS - 1 {
                    s.push(' ');
                }
            }
            s.push('\n');
        }
        s.push_str("a b c d e f g\n");
        s
    }
}
