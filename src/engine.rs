//! An engine to choose moves in a game of Connect 4
//!
//! The search is a negamax with alpha-beta pruning, principal variation
//! search and late move reductions, backed by a shared transposition table
//! and a history heuristic, and driven from the root by MTD(f) inside an
//! iterative deepening loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use anyhow::Result;
use log::{debug, info};

use crate::bitboard::BitBoard;
use crate::eval::{self, WIN_SCORE};
use crate::opening_book::{OpeningBook, BOOK_PATH};
use crate::ordering::{ordered_moves, History};
use crate::transposition_table::{Bound, TTEntry, TranspositionTable};
use crate::{HEIGHT, WIDTH};

/// Scores the search can produce lie strictly inside this bound, so they
/// fit the 16-bit field of a packed transposition table entry
pub const SCORE_BOUND: i32 = 9999;

// heuristic searches stop deepening here; beyond it the table fills with
// entries the next, deeper game states reuse anyway
const MAX_HEURISTIC_DEPTH: usize = 20;

// once this many tiles are down the remaining tree is small enough to solve
const STRONG_SOLVER_MOVES: usize = 12;

// book workers snapshot the map to disk every this many new entries
const SNAPSHOT_INTERVAL: usize = 1000;

/// A Connect 4 engine
///
/// Owns the transposition table, the history counters and the opening book;
/// there is no process-wide state, so tests instantiate a fresh engine per
/// scenario for determinism. All internal state is behind atomics or a
/// mutex, which is what lets the book builder share one engine across its
/// worker threads.
///
/// # Position Scoring
/// Scores are taken from the side to move's viewpoint. A position the last
/// mover has won scores `-(1000 + depth)`; the depth bias makes the search
/// prefer wins it can reach sooner and losses it can postpone longer. Other
/// positions score by the static evaluator, or as 0 at the depth horizon
/// when strong-solver mode is on, so that only forced wins and losses
/// propagate to the root
pub struct Engine {
    transposition_table: TranspositionTable,
    history: History,
    opening_book: OpeningBook,
    strong_solver: AtomicBool,
    nodes_evaluated: AtomicU64,
}

impl Engine {
    /// Creates an engine with the default full-size transposition table
    pub fn new() -> Self {
        Self::with_table(TranspositionTable::new())
    }

    /// Creates an engine with a `2^bits`-slot transposition table
    ///
    /// Mostly useful to keep tests and short-lived processes from paying
    /// for the full 512 MiB table
    pub fn with_table_log2(bits: usize) -> Self {
        Self::with_table(TranspositionTable::with_log2(bits))
    }

    fn with_table(transposition_table: TranspositionTable) -> Self {
        Self {
            transposition_table,
            history: History::new(),
            opening_book: OpeningBook::new(),
            strong_solver: AtomicBool::new(false),
            nodes_evaluated: AtomicU64::new(0),
        }
    }

    /// The number of nodes evaluated by the most recent search
    pub fn nodes_evaluated(&self) -> u64 {
        self.nodes_evaluated.load(Ordering::Relaxed)
    }

    /// Whether the engine has switched to solving positions exactly
    pub fn strong_solver(&self) -> bool {
        self.strong_solver.load(Ordering::Relaxed)
    }

    /// Merges an opening book file into the in-memory book
    ///
    /// A missing file is not an error; the engine simply computes openings
    /// from scratch
    pub fn load_book<P: AsRef<std::path::Path>>(&self, path: P) -> Result<usize> {
        self.opening_book.load(path)
    }

    /// Writes the in-memory opening book to a file
    pub fn save_book<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        self.opening_book.save(path)
    }

    /// Chooses the best column for the side to move
    ///
    /// Consults the opening book first; otherwise runs MTD(f) under
    /// iterative deepening, feeding each depth's score to the next as its
    /// first guess. Once twelve or more tiles are down the engine switches
    /// permanently to strong-solver mode and aims `max_depth - num_moves`
    /// plies ahead; before that the deepening is capped at 20 plies.
    ///
    /// Returns `None` when the game is already decided or the board is
    /// full; callers check the terminal state before asking for a move
    pub fn best_move(&self, board: &BitBoard, max_depth: usize, use_old_eval: bool) -> Option<usize> {
        if board.is_win() || board.num_moves() == WIDTH * HEIGHT {
            return None;
        }

        let (hash, mirrored) = board.hash();
        if let Some(book_move) = self.opening_book.lookup(hash) {
            let column = if mirrored { WIDTH - 1 - book_move } else { book_move };
            debug!("book move for position {:#018x}: column {}", hash, column);
            return Some(column);
        }

        if board.num_moves() >= STRONG_SOLVER_MOVES {
            self.strong_solver.store(true, Ordering::Relaxed);
        }
        let target_depth = if self.strong_solver() {
            max_depth.saturating_sub(board.num_moves()).max(1)
        } else {
            max_depth.min(MAX_HEURISTIC_DEPTH)
        };

        self.nodes_evaluated.store(0, Ordering::Relaxed);
        let start = Instant::now();
        let mut best = None;
        let mut guess = 0;
        for depth in 1..=target_depth {
            let (score, column) = self.mtd(board, guess, depth as i32, use_old_eval);
            guess = score;
            if column.is_some() {
                best = column;
            }
            debug!(
                "depth {:2}: score {:5}, best {:?}, {} nodes, tt {:.2}% full, {} collisions, {:?} elapsed",
                depth,
                score,
                best,
                self.nodes_evaluated(),
                100.0 * self.transposition_table.used() as f64
                    / self.transposition_table.capacity() as f64,
                self.transposition_table.collisions(),
                start.elapsed(),
            );
        }

        // every iteration returning no move still leaves a legal fallback
        best.or_else(|| (0..WIDTH).find(|&column| board.playable(column)))
    }

    /// Converges on the true score of a position with zero-window probes
    ///
    /// Each probe around the running guess `g` fails either high or low,
    /// tightening one of the bounds until they meet. The transposition
    /// table makes the repeated probes cheap
    pub(crate) fn mtd(
        &self,
        board: &BitBoard,
        guess: i32,
        depth: i32,
        use_old_eval: bool,
    ) -> (i32, Option<usize>) {
        let mut upper = SCORE_BOUND;
        let mut lower = -SCORE_BOUND;
        let mut g = guess;
        let mut best = None;

        while lower < upper {
            let beta = g.max(lower + 1);
            let (score, column) = self.negamax(board, depth, beta - 1, beta, use_old_eval);
            g = score;
            if column.is_some() {
                best = column;
            }
            if g < beta {
                upper = g;
            } else {
                lower = g;
            }
        }
        (g, best)
    }

    /// Performs the game tree search
    ///
    /// Returns the score of the position (see [Position Scoring]) and the
    /// best column found, if any move was searched
    ///
    /// [Position Scoring]: #position-scoring
    fn negamax(
        &self,
        board: &BitBoard,
        depth: i32,
        mut alpha: i32,
        mut beta: i32,
        use_old_eval: bool,
    ) -> (i32, Option<usize>) {
        self.nodes_evaluated.fetch_add(1, Ordering::Relaxed);

        // remembered to classify the final score as exact or a bound
        let original_alpha = alpha;

        let (hash, mirrored) = board.hash();
        let mut tt_move = None;
        if let Some(entry) = self.transposition_table.probe(hash) {
            // stored moves are canonical; flip them back for this board
            let candidate = entry
                .best_move
                .map(|column| if mirrored { WIDTH - 1 - column } else { column });
            tt_move = candidate;
            if entry.depth >= depth {
                match entry.bound {
                    Bound::Exact => return (entry.score, candidate),
                    Bound::Lower => alpha = alpha.max(entry.score),
                    Bound::Upper => beta = beta.min(entry.score),
                }
                if alpha >= beta {
                    return (entry.score, candidate);
                }
            }
        }

        // the previous move won the game; losing later is better than sooner
        if board.is_win() {
            return (-(WIN_SCORE + depth), None);
        }

        if board.num_moves() == WIDTH * HEIGHT || depth == 0 {
            if self.strong_solver() {
                // unresolved horizons count as draws; only proven wins and
                // losses climb the tree
                return (0, None);
            }
            let score = if use_old_eval {
                eval::evaluate_legacy(board)
            } else {
                eval::evaluate(board)
            };
            return (score, None);
        }

        let side = board.side_to_move();
        let moves = ordered_moves(board, tt_move, &self.history);

        let mut best_score = -SCORE_BOUND;
        let mut best_move = None;

        for (i, &column) in moves.iter().enumerate() {
            let mut next = *board;
            next.play(column);

            let score = if i == 0 {
                // principal variation: the first move gets the full window
                -self.negamax(&next, depth - 1, -beta, -alpha, use_old_eval).0
            } else {
                // late moves are probed shallower first; a surprise raise
                // of alpha earns back the full depth
                let reduced = i >= 3 && depth >= 4;
                let probe_depth = if reduced { depth - 2 } else { depth - 1 };
                let mut score = -self
                    .negamax(&next, probe_depth, -alpha - 1, -alpha, use_old_eval)
                    .0;
                if reduced && score > alpha {
                    score = -self
                        .negamax(&next, depth - 1, -alpha - 1, -alpha, use_old_eval)
                        .0;
                }
                if score > alpha && score < beta {
                    score = -self.negamax(&next, depth - 1, -beta, -score, use_old_eval).0;
                }
                score
            };

            if score > best_score {
                best_score = score;
                best_move = Some(column);
            }
            if best_score > alpha {
                alpha = best_score;
            }
            if alpha >= beta {
                // the opponent will not allow this line; remember the
                // refutation for future ordering
                self.history.bump(side, column, depth);
                break;
            }
        }

        let bound = if best_score <= original_alpha {
            Bound::Upper
        } else if best_score >= beta {
            Bound::Lower
        } else {
            Bound::Exact
        };
        // normalize the stored move to the canonical orientation
        let canonical_move = best_move.map(|column| if mirrored { WIDTH - 1 - column } else { column });
        self.transposition_table.store(
            hash,
            TTEntry {
                score: best_score,
                depth,
                best_move: canonical_move,
                bound,
            },
        );

        (best_score, best_move)
    }

    /// Expands the opening book by solving every position a few moves deep
    ///
    /// Loads any book already at the canonical [`BOOK_PATH`], then spawns
    /// one worker per starting column. Each worker walks its subtree to
    /// `max_moves` plies, solving unknown positions by iterative deepening
    /// up to `search_depth` and recording the canonical best column. The
    /// map is snapshotted to disk every thousand new entries and saved once
    /// all workers finish
    ///
    /// [`BOOK_PATH`]: ../opening_book/constant.BOOK_PATH.html
    pub fn build_book(&self, max_moves: usize, search_depth: usize, use_old_eval: bool) -> Result<()> {
        self.build_book_to(BOOK_PATH, max_moves, search_depth, use_old_eval)
    }

    /// [`Engine::build_book`] with an explicit book file
    ///
    /// [`Engine::build_book`]: #method.build_book
    pub fn build_book_to<P: AsRef<std::path::Path>>(
        &self,
        path: P,
        max_moves: usize,
        search_depth: usize,
        use_old_eval: bool,
    ) -> Result<()> {
        let path = path.as_ref();
        self.opening_book.load(path)?;
        self.transposition_table.clear();

        // the empty board is symmetric and its best move is known
        let (hash, _) = BitBoard::new().hash();
        self.opening_book.insert(hash, 3);

        info!(
            "building opening book: {} plies, search depth {}",
            max_moves, search_depth
        );
        std::thread::scope(|scope| {
            for column in 0..WIDTH {
                scope.spawn(move || {
                    let mut board = BitBoard::new();
                    board.play(column);
                    self.expand_book(&board, path, 1, max_moves, search_depth, use_old_eval);
                });
            }
        });

        self.opening_book.save(path)?;
        info!("opening book complete: {} positions", self.opening_book.len());
        Ok(())
    }

    fn expand_book(
        &self,
        board: &BitBoard,
        path: &std::path::Path,
        ply: usize,
        max_moves: usize,
        search_depth: usize,
        use_old_eval: bool,
    ) {
        if ply >= max_moves || board.is_win() {
            return;
        }

        let (hash, mirrored) = board.hash();
        if !self.opening_book.contains(hash) {
            let mut best = 3;
            let mut guess = 0;
            for depth in 1..=search_depth {
                let (score, column) = self.mtd(board, guess, depth as i32, use_old_eval);
                guess = score;
                if let Some(column) = column {
                    best = column;
                }
            }

            let canonical = if mirrored { WIDTH - 1 - best } else { best };
            let entries = self.opening_book.insert(hash, canonical);
            if entries % SNAPSHOT_INTERVAL == 0 {
                // a failed snapshot is abandoned; the in-memory book stays
                // authoritative and the next interval retries
                if let Err(err) = self.opening_book.save(path) {
                    log::warn!("abandoning book snapshot: {:#}", err);
                } else {
                    info!("book snapshot: {} positions", entries);
                }
            }
        }

        for column in 0..WIDTH {
            if board.playable(column) {
                let mut next = *board;
                next.play(column);
                self.expand_book(&next, path, ply + 1, max_moves, search_depth, use_old_eval);
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
