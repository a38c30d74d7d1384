//! Lock-free chart with one atomic slot per `(cell, non-terminal)`.
//!
//! A slot holds `ordered_bits(inside) << 32 | edge_id`, where `edge_id` indexes an
//! append-only arena of entries. Because the inside probability sits in the high bits,
//! "install if better" is a single compare-and-swap on the slot, and a stale read can
//! never be mistaken for a newer one: every install allocates a fresh edge id.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::chart::{cell_index, num_cells, Chart, ChartEntry, TemporaryCell};
use crate::grammar::{Grammar, SymbolClasses};
use crate::symbols::NonTerminal;
use crate::utils::{from_ordered_bits, ordered_bits};

const EMPTY: u64 = 0;

const FIRST_BUCKET_BITS: u32 = 5;
const NUM_BUCKETS: usize = 28;

/// Append-only storage for entries, shared between threads without locking.
///
/// Buckets double in size, so ids stay stable and nothing is ever moved.
struct EdgeArena {
  next: AtomicUsize,
  buckets: [OnceLock<Box<[OnceLock<ChartEntry>]>>; NUM_BUCKETS],
}

impl EdgeArena {
  fn new() -> Self {
    Self {
      next: AtomicUsize::new(0),
      buckets: std::array::from_fn(|_| OnceLock::new()),
    }
  }

  fn locate(id: usize) -> (usize, usize) {
    let biased = id + (1 << FIRST_BUCKET_BITS);
    let bucket = (usize::BITS - 1 - biased.leading_zeros() - FIRST_BUCKET_BITS) as usize;
    (bucket, biased - (1 << (bucket as u32 + FIRST_BUCKET_BITS)))
  }

  /// `None` once ids no longer fit in a slot.
  fn push(&self, entry: ChartEntry) -> Option<u32> {
    let id = self.next.fetch_add(1, Ordering::Relaxed);
    let id32 = u32::try_from(id).ok()?;
    let (bucket, offset) = Self::locate(id);
    let storage = self.buckets.get(bucket)?.get_or_init(|| {
      let len = 1usize << (bucket as u32 + FIRST_BUCKET_BITS);
      (0..len).map(|_| OnceLock::new()).collect()
    });
    storage.get(offset)?.set(entry).ok()?;
    Some(id32)
  }

  fn get(&self, id: u32) -> Option<ChartEntry> {
    let (bucket, offset) = Self::locate(id as usize);
    self.buckets.get(bucket)?.get()?.get(offset)?.get().copied()
  }

  fn len(&self) -> usize {
    self.next.load(Ordering::Relaxed)
  }
}

/// One fixed-width bitset per cell, settable concurrently.
struct CellBits {
  words_per_cell: usize,
  words: Vec<AtomicU64>,
}

impl CellBits {
  fn new(cells: usize, num_nonterminals: usize) -> Self {
    let words_per_cell = num_nonterminals.div_ceil(64);
    Self {
      words_per_cell,
      words: (0..cells * words_per_cell).map(|_| AtomicU64::new(0)).collect(),
    }
  }

  fn insert(&self, cell: usize, nt: NonTerminal) {
    let word = cell * self.words_per_cell + nt as usize / 64;
    self.words[word].fetch_or(1 << (nt % 64), Ordering::SeqCst);
  }

  fn ones(&self, cell: usize) -> impl Iterator<Item = NonTerminal> + '_ {
    let base = cell * self.words_per_cell;
    (0..self.words_per_cell).flat_map(move |w| {
      let mut bits = self.words[base + w].load(Ordering::SeqCst);
      std::iter::from_fn(move || {
        if bits == 0 {
          return None;
        }
        let bit = bits.trailing_zeros();
        bits &= bits - 1;
        Some((w * 64) as NonTerminal + bit)
      })
    })
  }
}

pub struct HashSlotChart {
  size: usize,
  num_nonterminals: usize,
  classes: Arc<SymbolClasses>,
  slots: Vec<AtomicU64>,
  arena: EdgeArena,
  populated: CellBits,
  left_children: CellBits,
  right_children: CellBits,
  pos: CellBits,
  num_entries: AtomicUsize,
}

impl HashSlotChart {
  pub fn new(size: usize, grammar: &Grammar) -> Self {
    let num_nonterminals = grammar.num_nonterminals();
    let cells = num_cells(size);
    Self {
      size,
      num_nonterminals,
      classes: Arc::clone(grammar.classes()),
      slots: (0..cells * num_nonterminals).map(|_| AtomicU64::new(EMPTY)).collect(),
      arena: EdgeArena::new(),
      populated: CellBits::new(cells, num_nonterminals),
      left_children: CellBits::new(cells, num_nonterminals),
      right_children: CellBits::new(cells, num_nonterminals),
      pos: CellBits::new(cells, num_nonterminals),
      num_entries: AtomicUsize::new(0),
    }
  }

  fn slot(&self, start: usize, end: usize, nt: NonTerminal) -> &AtomicU64 {
    &self.slots[cell_index(start, end, self.size) * self.num_nonterminals + nt as usize]
  }

  /// Installs `entry` if its inside probability beats the current one.
  ///
  /// Safe to call from many threads at once. A caller that loses the race to a better
  /// entry gets `false` and should simply drop its edge.
  pub fn install(&self, start: usize, end: usize, entry: ChartEntry) -> bool {
    if entry.inside == f32::NEG_INFINITY || entry.inside.is_nan() {
      return false;
    }
    let slot = self.slot(start, end, entry.nonterminal);
    let score = ordered_bits(entry.inside) as u64;
    let beats = |current: u64| current == EMPTY || score > current >> 32;

    // sequentially consistent, so two workers installing neighbouring entries at once
    // can't both miss each other when they look for partners
    let mut current = slot.load(Ordering::SeqCst);
    if !beats(current) {
      return false;
    }
    let Some(id) = self.arena.push(entry) else {
      return false;
    };
    let packed = score << 32 | id as u64;
    loop {
      match slot.compare_exchange_weak(current, packed, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(previous) => {
          if previous == EMPTY {
            self.mark_populated(start, end, entry.nonterminal);
          }
          return true;
        }
        Err(actual) => {
          current = actual;
          if !beats(current) {
            return false;
          }
        }
      }
    }
  }

  fn mark_populated(&self, start: usize, end: usize, nt: NonTerminal) {
    let cell = cell_index(start, end, self.size);
    self.num_entries.fetch_add(1, Ordering::Relaxed);
    self.populated.insert(cell, nt);
    if self.classes.is_valid_left_child(nt) {
      self.left_children.insert(cell, nt);
    }
    if self.classes.is_valid_right_child(nt) {
      self.right_children.insert(cell, nt);
    }
    if self.classes.is_pos(nt) {
      self.pos.insert(cell, nt);
    }
  }

  fn scored(&self, bits: &CellBits, start: usize, end: usize) -> Vec<(NonTerminal, f32)> {
    bits
      .ones(cell_index(start, end, self.size))
      .map(|nt| (nt, self.inside(start, end, nt)))
      .collect()
  }

  /// Edges allocated so far, including ones that lost their slot.
  pub fn edges_allocated(&self) -> usize {
    self.arena.len()
  }
}

impl Chart for HashSlotChart {
  fn size(&self) -> usize {
    self.size
  }

  fn num_nonterminals(&self) -> usize {
    self.num_nonterminals
  }

  fn entry(&self, start: usize, end: usize, nt: NonTerminal) -> Option<ChartEntry> {
    match self.slot(start, end, nt).load(Ordering::SeqCst) {
      EMPTY => None,
      packed => self.arena.get(packed as u32),
    }
  }

  fn inside(&self, start: usize, end: usize, nt: NonTerminal) -> f32 {
    match self.slot(start, end, nt).load(Ordering::SeqCst) {
      EMPTY => f32::NEG_INFINITY,
      packed => from_ordered_bits((packed >> 32) as u32),
    }
  }

  fn entries(&self, start: usize, end: usize) -> Vec<ChartEntry> {
    let mut nts = self
      .populated
      .ones(cell_index(start, end, self.size))
      .collect::<Vec<_>>();
    nts.sort_unstable();
    nts
      .into_iter()
      .filter_map(|nt| self.entry(start, end, nt))
      .collect()
  }

  fn left_children(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)> {
    self.scored(&self.left_children, start, end)
  }

  fn right_children(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)> {
    self.scored(&self.right_children, start, end)
  }

  fn pos_entries(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)> {
    self.scored(&self.pos, start, end)
  }

  fn update_inside(&mut self, start: usize, end: usize, entry: ChartEntry) -> bool {
    self.install(start, end, entry)
  }

  fn finalize_cell(&mut self, cell: TemporaryCell) {
    for entry in cell.entries() {
      self.install(cell.start(), cell.end(), entry);
    }
  }

  fn num_entries(&self) -> usize {
    self.num_entries.load(Ordering::Relaxed)
  }

  fn is_populated(&self, start: usize, end: usize) -> bool {
    self
      .populated
      .ones(cell_index(start, end, self.size))
      .next()
      .is_some()
  }
}

impl fmt::Debug for HashSlotChart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HashSlotChart")
      .field("size", &self.size)
      .field("num_nonterminals", &self.num_nonterminals)
      .field("num_entries", &self.num_entries())
      .field("edges_allocated", &self.edges_allocated())
      .finish()
  }
}
