//! A game engine for the board game 'Connect 4'
//!
//! The engine combines a bitboard board representation with a negamax game
//! tree search (alpha-beta pruning, principal variation search, late move
//! reductions) driven by an MTD(f) iterative deepening loop, a packed
//! transposition table with mirror symmetry reduction, a history heuristic
//! and a multithreaded opening book builder.
//!
//! # Basic Usage
//!
//! ```
//! use connect4_engine::{bitboard::BitBoard, engine::Engine};
//!
//! # use std::error::Error;
//! # fn main() -> Result<(), Box<dyn Error>> {
//! // Player one has stacked three tiles in the middle column
//! let board = BitBoard::from_moves("353535")?;
//! let engine = Engine::with_table_log2(16);
//!
//! // The engine completes the vertical four
//! assert_eq!(engine.best_move(&board, 4, false), Some(3));
//! # Ok(())
//! # }
//! ```

use static_assertions::*;
pub use anyhow;

pub mod transposition_table;

pub mod bitboard;

pub mod eval;

pub mod ordering;

pub mod engine;

pub mod opening_book;


/// The width of the game board in tiles
pub const WIDTH: usize = 7;

/// The height of the game board in tiles
pub const HEIGHT: usize = 6;

// ensure that the given dimensions fit in a u64 for the bitboard representation
const_assert!(WIDTH * (HEIGHT + 1) < 64);

// a column index must fit the 3-bit move field of a packed table entry
const_assert!(WIDTH <= 7);
