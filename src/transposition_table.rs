//! A lock-free transposition table of packed 64-bit entries
//!
//! Each slot is a single `AtomicU64`, so concurrent readers and writers need
//! no locks: loads and stores are word-atomic and a torn or lost entry only
//! costs a cache miss, never a wrong answer, because every probe re-verifies
//! the stored signature against the full position hash.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use static_assertions::const_assert;

use crate::WIDTH;

/// Log2 of the default table size: 2^26 slots of 8 bytes, 512 MiB
pub const TABLE_LOG2: usize = 26;

// the packed score field is 16 bits signed
const_assert!(crate::engine::SCORE_BOUND <= i16::MAX as i32);
// a column index and the "no move" marker fit the 3-bit move field
const_assert!(WIDTH <= 7);

/// How a stored score bounds the true value of the position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// The score is the exact negamax value
    Exact,
    /// The search failed high; the true value is at least the score
    Lower,
    /// The search failed low; the true value is at most the score
    Upper,
}

/// An unpacked transposition table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TTEntry {
    pub score: i32,
    pub depth: i32,
    pub best_move: Option<usize>,
    pub bound: Bound,
}

/// A fixed-size table of packed entries indexed by canonical position hash
///
/// # Packed layout
/// ```comment
/// bits 63..32  signature: high half of the canonical hash
/// bits 31..16  score: signed 16 bits
/// bits 15..10  remaining search depth, 0..=63
/// bits  9..7   best column, 7 = none
/// bits  6..5   bound flag: 0 exact, 1 lower, 2 upper
/// bit   0      valid, always 1 when stored
/// ```
/// The valid bit distinguishes a stored zero score in slot zero's signature
/// range from a never-written slot, which is all zeroes.
pub struct TranspositionTable {
    slots: Vec<AtomicU64>,
    index_mask: u64,
    used: AtomicUsize,
    collisions: AtomicUsize,
}

impl TranspositionTable {
    /// Creates a table of the default 2^26 slots (512 MiB)
    pub fn new() -> Self {
        Self::with_log2(TABLE_LOG2)
    }

    /// Creates a table of `2^bits` slots; sizes stay a power of two so the
    /// index is a bitwise AND of the hash
    pub fn with_log2(bits: usize) -> Self {
        let len = 1usize << bits;
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || AtomicU64::new(0));
        Self {
            slots,
            index_mask: (len - 1) as u64,
            used: AtomicUsize::new(0),
            collisions: AtomicUsize::new(0),
        }
    }

    /// Looks up the entry stored for a canonical hash
    ///
    /// Returns `None` when the slot has never been written or holds a
    /// different position's signature. Callers still check the entry's
    /// depth before trusting its score
    pub fn probe(&self, hash: u64) -> Option<TTEntry> {
        let word = self.slots[(hash & self.index_mask) as usize].load(Ordering::Relaxed);
        if word == 0 || (word >> 32) != (hash >> 32) {
            return None;
        }
        Some(unpack(word))
    }

    /// Stores an entry for a canonical hash
    ///
    /// The slot is replaced if it is empty, holds the same signature, or the
    /// new entry was searched at least as deep as the old one. Shallower
    /// results never evict deeper ones
    pub fn store(&self, hash: u64, entry: TTEntry) {
        let slot = &self.slots[(hash & self.index_mask) as usize];
        let old = slot.load(Ordering::Relaxed);

        if old == 0 {
            self.used.fetch_add(1, Ordering::Relaxed);
        } else if (old >> 32) != (hash >> 32) {
            self.collisions.fetch_add(1, Ordering::Relaxed);
        }

        let same_signature = (old >> 32) == (hash >> 32);
        let old_depth = ((old >> 10) & 0x3F) as i32;
        if old == 0 || same_signature || entry.depth >= old_depth {
            slot.store(pack(hash, entry), Ordering::Relaxed);
        }
    }

    /// Empties every slot and resets the counters
    pub fn clear(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
        self.used.store(0, Ordering::Relaxed);
        self.collisions.store(0, Ordering::Relaxed);
    }

    /// The number of slots in the table
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The number of occupied slots; approximate under concurrent writers
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// The number of stores that hit a slot owned by a different position
    pub fn collisions(&self) -> usize {
        self.collisions.load(Ordering::Relaxed)
    }
}

impl Default for TranspositionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn pack(hash: u64, entry: TTEntry) -> u64 {
    let signature = hash & 0xFFFF_FFFF_0000_0000;
    let score = ((entry.score as i16 as u16) as u64) << 16;
    let depth = ((entry.depth.clamp(0, 63) as u64) & 0x3F) << 10;
    let best_move = (entry.best_move.unwrap_or(7) as u64) << 7;
    let flag = (match entry.bound {
        Bound::Exact => 0u64,
        Bound::Lower => 1,
        Bound::Upper => 2,
    }) << 5;
    signature | score | depth | best_move | flag | 1
}

fn unpack(word: u64) -> TTEntry {
    let best_move = ((word >> 7) & 0x7) as usize;
    TTEntry {
        score: ((word >> 16) as u16 as i16) as i32,
        depth: ((word >> 10) & 0x3F) as i32,
        best_move: (best_move < WIDTH).then_some(best_move),
        bound: match (word >> 5) & 0x3 {
            0 => Bound::Exact,
            1 => Bound::Lower,
            _ => Bound::Upper,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> TranspositionTable {
        TranspositionTable::with_log2(10)
    }

    fn entry(score: i32, depth: i32, best_move: Option<usize>, bound: Bound) -> TTEntry {
        TTEntry {
            score,
            depth,
            best_move,
            bound,
        }
    }

    #[test]
    fn pack_unpack_round_trip() {
        let cases = [
            entry(0, 0, None, Bound::Exact),
            entry(-1042, 17, Some(0), Bound::Lower),
            entry(9999, 63, Some(6), Bound::Upper),
            entry(-9999, 1, Some(3), Bound::Exact),
        ];
        for case in cases {
            let hash = 0xDEAD_BEEF_1234_5678;
            assert_eq!(unpack(pack(hash, case)), case);
            // the valid bit keeps even an all-default entry distinguishable
            assert_ne!(pack(hash, case) & 1, 0);
        }
    }

    #[test]
    fn probe_empty_table_misses() {
        assert_eq!(small().probe(0xABCD_EF01_2345_6789), None);
    }

    #[test]
    fn store_then_probe_hits() {
        let tt = small();
        let hash = 0x1122_3344_5566_7788;
        let stored = entry(42, 5, Some(2), Bound::Exact);
        tt.store(hash, stored);
        assert_eq!(tt.probe(hash), Some(stored));
        assert_eq!(tt.used(), 1);
    }

    #[test]
    fn zero_score_entry_is_not_mistaken_for_empty() {
        let tt = small();
        // a hash whose signature and index bits are all zero
        let hash = 0u64;
        tt.store(hash, entry(0, 0, None, Bound::Exact));
        assert_eq!(tt.probe(hash), Some(entry(0, 0, None, Bound::Exact)));
    }

    #[test]
    fn signature_mismatch_misses() {
        let tt = small();
        let hash = 0x1111_1111_0000_0001;
        tt.store(hash, entry(7, 3, Some(4), Bound::Lower));
        // same slot index, different signature
        let other = 0x2222_2222_0000_0001;
        assert_eq!(tt.probe(other), None);
    }

    #[test]
    fn shallower_entry_never_evicts_deeper() {
        let tt = small();
        let deep_hash = 0x1111_1111_0000_0001;
        let shallow_hash = 0x2222_2222_0000_0001; // collides on index
        tt.store(deep_hash, entry(10, 8, Some(3), Bound::Exact));
        tt.store(shallow_hash, entry(-5, 7, Some(1), Bound::Exact));

        assert_eq!(tt.probe(deep_hash), Some(entry(10, 8, Some(3), Bound::Exact)));
        assert_eq!(tt.probe(shallow_hash), None);
        assert_eq!(tt.collisions(), 1);
    }

    #[test]
    fn deeper_entry_evicts_shallower() {
        let tt = small();
        let old_hash = 0x1111_1111_0000_0001;
        let new_hash = 0x2222_2222_0000_0001;
        tt.store(old_hash, entry(10, 4, Some(3), Bound::Exact));
        tt.store(new_hash, entry(-5, 5, Some(1), Bound::Upper));

        assert_eq!(tt.probe(old_hash), None);
        assert_eq!(tt.probe(new_hash), Some(entry(-5, 5, Some(1), Bound::Upper)));
    }

    #[test]
    fn same_position_always_replaces() {
        let tt = small();
        let hash = 0x3333_3333_0000_0002;
        tt.store(hash, entry(10, 9, Some(3), Bound::Exact));
        tt.store(hash, entry(20, 2, Some(5), Bound::Lower));
        assert_eq!(tt.probe(hash), Some(entry(20, 2, Some(5), Bound::Lower)));
        assert_eq!(tt.used(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let tt = small();
        tt.store(0x4444_4444_0000_0003, entry(1, 1, None, Bound::Exact));
        tt.clear();
        assert_eq!(tt.probe(0x4444_4444_0000_0003), None);
        assert_eq!(tt.used(), 0);
        assert_eq!(tt.collisions(), 0);
    }
}
