//! Bit-parallel static evaluation of non-terminal positions
//!
//! Scores are always taken from the side to move's viewpoint: the same
//! pattern counter runs over both players' tile masks and the result is the
//! difference. Pattern matches are found by ANDing shifted copies of a tile
//! mask and the empty-cell mask, accumulating one match mask per weight
//! class so that each class costs a single popcount.

use crate::bitboard::BitBoard;
use crate::{HEIGHT, WIDTH};

/// Score of a position already won by the last player to move, from the
/// loser's viewpoint
pub const WIN_SCORE: i32 = 1000;

// bottom cell of every column
const fn bottom_row() -> u64 {
    let mut mask = 0;
    let mut column = 0;
    while column < WIDTH {
        mask |= 1 << (column * (HEIGHT + 1));
        column += 1;
    }
    mask
}

// every cell of the middle column
const CENTER: u64 = 0x3F << 21;

// every cell of the two columns flanking the middle
const INNER_MIDDLE: u64 = (0x3F << 14) | (0x3F << 28);

// middle three columns restricted to the bottom three rows
const SWEET_SPOT: u64 = (0x7 << 14) | (0x7 << 21) | (0x7 << 28);

// rows 0, 2 and 4 across the board; the first player's zugzwang rows
const ROW_024: u64 = bottom_row() * 0x15;

// rows 1, 3 and 5; the second player's zugzwang rows
const ROW_135: u64 = bottom_row() * 0x2A;

/// Scores a position for the side to move
///
/// Combines threat patterns (open, broken and half-open threes, two-in-four
/// runways) with positional bonuses for the center column, the sweet spot
/// above the bottom middle, and tiles on the rows each player controls under
/// zugzwang parity. Returns `-WIN_SCORE` if the last mover has already won;
/// the search normally handles terminal positions before evaluating
pub fn evaluate(board: &BitBoard) -> i32 {
    if board.is_win() {
        return -WIN_SCORE;
    }

    let mask = board.board_mask();
    let current = board.current_mask();
    let last_mover = current ^ mask;
    let empty = !mask;

    let mut current_score = count_patterns(current, empty);
    let mut last_score = count_patterns(last_mover, empty);

    current_score += positional(current);
    last_score += positional(last_mover);

    // zugzwang parity: each player gains from tiles on the rows they can
    // force the opponent to fill towards
    let (current_rows, last_rows) = if board.side_to_move() == 0 {
        (ROW_024, ROW_135)
    } else {
        (ROW_135, ROW_024)
    };
    current_score += (current & current_rows).count_ones() as i32 * 2;
    last_score += (last_mover & last_rows).count_ones() as i32 * 2;

    current_score - last_score
}

/// The old pair-counting heuristic, kept only for A/B comparison runs
pub fn evaluate_legacy(board: &BitBoard) -> i32 {
    if board.is_win() {
        return -WIN_SCORE;
    }

    let mask = board.board_mask();
    let current = board.current_mask();
    let last_mover = current ^ mask;

    let mut current_score = 0;
    let mut last_score = 0;

    // naive adjacency counting, no liveness check on the runs
    current_score += (current & (current >> (HEIGHT + 1))).count_ones() as i32 * 2;
    last_score += (last_mover & (last_mover >> (HEIGHT + 1))).count_ones() as i32 * 2;
    current_score += (current & (current >> 1)).count_ones() as i32 * 2;
    last_score += (last_mover & (last_mover >> 1)).count_ones() as i32 * 2;

    current_score += (current & CENTER).count_ones() as i32 * 3;
    last_score += (last_mover & CENTER).count_ones() as i32 * 3;

    current_score - last_score
}

fn positional(pieces: u64) -> i32 {
    (pieces & CENTER).count_ones() as i32 * 3
        + (pieces & INNER_MIDDLE).count_ones() as i32
        + (pieces & SWEET_SPOT).count_ones() as i32 * 4
}

/// Accumulates threat pattern matches for one player's tiles
///
/// Shapes are read low bit to high bit along each direction stride: 7 for
/// horizontal, 8 and 6 for the two diagonals. Vertical runs only count when
/// open above, because the ghost row caps every column
fn count_patterns(pos: u64, empty: u64) -> i32 {
    let mut w50 = 0u64;
    let mut w10 = 0u64;
    let mut w7 = 0u64;
    let mut w5 = 0u64;
    let mut w3 = 0u64;
    let mut w2 = 0u64;

    for s in [HEIGHT + 1, HEIGHT + 2, HEIGHT] {
        let p1 = pos >> s;
        let p2 = pos >> (2 * s);
        let p3 = pos >> (3 * s);
        let e1 = empty >> s;
        let e2 = empty >> (2 * s);
        let e3 = empty >> (3 * s);
        let e4 = empty >> (4 * s);

        w50 |= empty & p1 & p2 & p3 & e4; // _XXX_

        w10 |= pos & e1 & p2 & p3; // X_XX
        w10 |= pos & p1 & e2 & p3; // XX_X

        w7 |= pos & p1 & p2 & e3; // XXX_
        w7 |= empty & p1 & p2 & p3; // _XXX

        w3 |= pos & p1 & e2 & e3; // XX__
        w3 |= empty & e1 & p2 & p3; // __XX
        w3 |= pos & e1 & e2 & p3; // X__X
        w3 |= empty & p1 & p2 & e3; // _XX_
        w3 |= pos & e1 & p2 & e3; // X_X_
        w3 |= empty & p1 & e2 & p3; // _X_X

        w2 |= pos & p1 & e2; // XX_
        w2 |= empty & p1 & p2; // _XX
        w2 |= pos & e1 & p2; // X_X
    }

    // vertical: a three is only ever open on top
    let p1 = pos >> 1;
    w5 |= pos & p1 & (pos >> 2) & (empty >> 3); // XXX_
    w2 |= pos & p1 & (empty >> 2); // XX_

    w50.count_ones() as i32 * 50
        + w10.count_ones() as i32 * 10
        + w7.count_ones() as i32 * 7
        + w5.count_ones() as i32 * 5
        + w3.count_ones() as i32 * 3
        + w2.count_ones() as i32 * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_board_is_balanced() {
        assert_eq!(evaluate(&BitBoard::new()), 0);
        assert_eq!(evaluate_legacy(&BitBoard::new()), 0);
    }

    #[test]
    fn won_position_scores_against_side_to_move() {
        let board = BitBoard::from_moves("3434343").unwrap();
        assert_eq!(evaluate(&board), -WIN_SCORE);
        assert_eq!(evaluate_legacy(&board), -WIN_SCORE);
    }

    #[test]
    fn single_center_tile_favours_its_owner() {
        let mut board = BitBoard::new();
        board.play(3);
        // player two to move; the lone tile belongs to player one
        // center 3 + sweet spot 4 + parity row 2
        assert_eq!(evaluate(&board), -9);
    }

    #[test]
    fn single_edge_tile_is_worth_less_than_center() {
        let mut center = BitBoard::new();
        center.play(3);
        let mut edge = BitBoard::new();
        edge.play(0);
        assert!(evaluate(&edge) > evaluate(&center));
    }

    #[test]
    fn open_three_dominates_positional_bonuses() {
        // player one holds the bottom of columns 1..=3 with both ends open
        // while player two stacks the far edge
        let board = BitBoard::from_moves("16263").unwrap();
        // player two to move faces the open three
        assert_eq!(evaluate(&board), -85);
    }

    #[test]
    fn evaluation_is_finite_and_bounded() {
        let board = BitBoard::from_moves("33445500").unwrap();
        assert!(evaluate(&board).abs() < 9999);
        assert!(evaluate_legacy(&board).abs() < 9999);
    }
}
