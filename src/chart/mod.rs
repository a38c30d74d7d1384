//! Span-indexed charts.
//!
//! A chart of a sentence of length `n` has one cell per span `(start, end)` with
//! `0 <= start < end <= n`. Each cell holds at most one entry per non-terminal: its
//! inside log probability plus a backpointer to the best derivation found for it.
//!
//! Two storage strategies implement the `Chart` trait:
//! - [`HashSlotChart`]: one atomic slot per `(cell, non-terminal)` supporting lock-free
//!   "install if better", used by the agenda parser and available to the cell-by-cell parsers;
//! - [`PackedArrayChart`]: dense temporary cells compacted into sorted parallel arrays,
//!   which also carries outside probabilities for the posterior decoders.
//!
//! Cell-by-cell parsers build a [`TemporaryCell`] and hand it to `Chart::finalize_cell`.

use std::fmt;

use crate::config::{ParserConfig, Semiring};
use crate::grammar::Grammar;
use crate::packing::{Children, PackingFunction};
use crate::symbols::{NonTerminal, SymbolTable, Terminal};
use crate::syntree::SynTree;
use crate::utils::log_sum_with;

pub mod hash;
pub mod packed;

pub use hash::HashSlotChart;
pub use packed::PackedArrayChart;

/// Position of `(start, end)` in row-major triangular order.
pub fn cell_index(start: usize, end: usize, size: usize) -> usize {
  debug_assert!(start < end && end <= size);
  start * (2 * size - start + 1) / 2 + (end - start - 1)
}

pub fn num_cells(size: usize) -> usize {
  size * (size + 1) / 2
}

/// How an entry was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backpointer {
  /// Rewrites the input word at the cell's start.
  Lexical { terminal: Terminal },
  /// Rewrites another entry of the same cell.
  Unary { child: NonTerminal },
  /// Splits the span at `start < midpoint < end`.
  Binary {
    left: NonTerminal,
    right: NonTerminal,
    midpoint: usize,
  },
}

impl Backpointer {
  /// The packed child field and midpoint stored by array-backed charts. Unary and lexical
  /// entries store the cell end as their midpoint.
  pub fn pack(&self, pf: &PackingFunction, end: usize) -> (i32, u32) {
    match *self {
      Self::Lexical { terminal } => (pf.pack_lexical(terminal), end as u32),
      Self::Unary { child } => (pf.pack_unary(child), end as u32),
      Self::Binary {
        left,
        right,
        midpoint,
      } => (pf.pack(left, right), midpoint as u32),
    }
  }

  pub fn unpack(pf: &PackingFunction, packed: i32, midpoint: u32) -> Self {
    match pf.unpack(packed) {
      Children::Lexical(terminal) => Self::Lexical { terminal },
      Children::Unary(child) => Self::Unary { child },
      Children::Binary(left, right) => Self::Binary {
        left,
        right,
        midpoint: midpoint as usize,
      },
    }
  }

  pub fn is_unary(&self) -> bool {
    matches!(self, Self::Unary { .. })
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartEntry {
  pub nonterminal: NonTerminal,
  pub inside: f32,
  pub backpointer: Backpointer,
}

impl ChartEntry {
  pub fn new(nonterminal: NonTerminal, inside: f32, backpointer: Backpointer) -> Self {
    Self {
      nonterminal,
      inside,
      backpointer,
    }
  }
}

/// Combines the scores of competing derivations under a semiring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulator {
  pub semiring: Semiring,
  pub delta: f32,
  pub approximate: bool,
}

impl Accumulator {
  pub fn viterbi() -> Self {
    Self {
      semiring: Semiring::Viterbi,
      delta: f32::INFINITY,
      approximate: false,
    }
  }

  pub fn from_config(config: &ParserConfig) -> Self {
    Self {
      semiring: config.semiring,
      delta: config.log_sum_delta,
      approximate: config.approximate_sum,
    }
  }

  /// Log-sum accumulation at the configured precision, whatever semiring searched.
  pub fn sum(config: &ParserConfig) -> Self {
    Self {
      semiring: Semiring::Sum,
      delta: config.log_sum_delta,
      approximate: config.approximate_sum,
    }
  }

  pub fn combine(&self, a: f32, b: f32) -> f32 {
    match self.semiring {
      Semiring::Viterbi => a.max(b),
      Semiring::Sum => log_sum_with(a, b, self.delta, self.approximate),
    }
  }
}

/// Dense per-cell scratch space, indexed directly by non-terminal.
///
/// Under the sum semiring `inside` accumulates every derivation while `viterbi` and the
/// backpointer keep tracking the single best one.
#[derive(Debug, Clone)]
pub struct TemporaryCell {
  start: usize,
  end: usize,
  inside: Vec<f32>,
  viterbi: Vec<f32>,
  backpointers: Vec<Option<Backpointer>>,
}

impl TemporaryCell {
  pub fn new(start: usize, end: usize, num_nonterminals: usize) -> Self {
    Self {
      start,
      end,
      inside: vec![f32::NEG_INFINITY; num_nonterminals],
      viterbi: vec![f32::NEG_INFINITY; num_nonterminals],
      backpointers: vec![None; num_nonterminals],
    }
  }

  pub fn start(&self) -> usize {
    self.start
  }

  pub fn end(&self) -> usize {
    self.end
  }

  pub fn inside(&self, nt: NonTerminal) -> f32 {
    self.inside[nt as usize]
  }

  pub fn entry(&self, nt: NonTerminal) -> Option<ChartEntry> {
    self.backpointers[nt as usize].map(|bp| ChartEntry::new(nt, self.inside[nt as usize], bp))
  }

  /// Adds a derivation of `nt`. Returns whether it became the best derivation.
  pub fn update(
    &mut self,
    nt: NonTerminal,
    inside: f32,
    backpointer: Backpointer,
    acc: &Accumulator,
  ) -> bool {
    let idx = nt as usize;
    if inside == f32::NEG_INFINITY || inside.is_nan() {
      return false;
    }
    self.inside[idx] = acc.combine(self.inside[idx], inside);
    if inside > self.viterbi[idx] {
      self.viterbi[idx] = inside;
      self.backpointers[idx] = Some(backpointer);
      true
    } else {
      false
    }
  }

  /// Folds another cell for the same span into this one.
  pub fn merge(&mut self, other: &TemporaryCell, acc: &Accumulator) {
    for idx in 0..self.inside.len() {
      let Some(bp) = other.backpointers[idx] else {
        continue;
      };
      self.inside[idx] = acc.combine(self.inside[idx], other.inside[idx]);
      if other.viterbi[idx] > self.viterbi[idx] {
        self.viterbi[idx] = other.viterbi[idx];
        self.backpointers[idx] = Some(bp);
      }
    }
  }

  /// Populated entries in non-terminal order.
  pub fn entries(&self) -> Vec<ChartEntry> {
    self
      .backpointers
      .iter()
      .enumerate()
      .filter_map(|(idx, bp)| {
        bp.map(|bp| ChartEntry::new(idx as NonTerminal, self.inside[idx], bp))
      })
      .collect()
  }

  pub fn len(&self) -> usize {
    self.backpointers.iter().filter(|bp| bp.is_some()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.backpointers.iter().all(Option::is_none)
  }
}

/// Read and update access shared by every chart storage strategy.
pub trait Chart: Send + Sync {
  /// Sentence length.
  fn size(&self) -> usize;

  fn num_nonterminals(&self) -> usize;

  fn entry(&self, start: usize, end: usize, nt: NonTerminal) -> Option<ChartEntry>;

  /// `-inf` when the cell has no entry for `nt`.
  fn inside(&self, start: usize, end: usize, nt: NonTerminal) -> f32 {
    self
      .entry(start, end, nt)
      .map_or(f32::NEG_INFINITY, |e| e.inside)
  }

  /// Outside log probability, `-inf` unless an outside pass has run.
  fn outside(&self, _start: usize, _end: usize, _nt: NonTerminal) -> f32 {
    f32::NEG_INFINITY
  }

  /// All entries of a cell, in non-terminal order.
  fn entries(&self, start: usize, end: usize) -> Vec<ChartEntry>;

  /// Populated non-terminals that can be the left child of a binary production.
  fn left_children(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)>;

  /// Populated non-terminals that can be the right child of a binary production.
  fn right_children(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)>;

  /// Populated parts of speech.
  fn pos_entries(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)>;

  /// Replaces the entry for `entry.nonterminal` if `entry` has a strictly higher inside
  /// probability. Returns whether the chart changed.
  fn update_inside(&mut self, start: usize, end: usize, entry: ChartEntry) -> bool;

  /// Commits a computed cell. The cell's entries replace or improve the stored ones.
  fn finalize_cell(&mut self, cell: TemporaryCell);

  /// Total number of entries across all cells.
  fn num_entries(&self) -> usize;

  fn is_populated(&self, start: usize, end: usize) -> bool {
    !self.entries(start, end).is_empty()
  }

  /// Whether the root cell holds `start_symbol`.
  fn has_parse(&self, start_symbol: NonTerminal) -> bool {
    self.size() > 0 && self.inside(0, self.size(), start_symbol) > f32::NEG_INFINITY
  }
}

/// The closed set of chart storages, chosen per parse.
#[derive(Debug)]
pub enum ChartStore {
  HashSlot(HashSlotChart),
  PackedArray(PackedArrayChart),
}

impl ChartStore {
  /// Compacts into a packed chart (a no-op if already packed), for the posterior decoders.
  pub fn into_packed(self, grammar: &Grammar) -> PackedArrayChart {
    match self {
      Self::HashSlot(chart) => PackedArrayChart::from_chart(&chart, grammar),
      Self::PackedArray(chart) => chart,
    }
  }

  pub fn as_chart(&self) -> &dyn Chart {
    match self {
      Self::HashSlot(chart) => chart,
      Self::PackedArray(chart) => chart,
    }
  }
}

/// Follows best backpointers down from `root` in the top cell.
pub fn extract_viterbi<C: Chart + ?Sized>(
  chart: &C,
  symbols: &SymbolTable,
  words: &[String],
  root: NonTerminal,
) -> Option<SynTree<String, String>> {
  if !chart.has_parse(root) {
    return None;
  }
  extract_entry(chart, symbols, words, 0, chart.size(), root, 0)
}

fn extract_entry<C: Chart + ?Sized>(
  chart: &C,
  symbols: &SymbolTable,
  words: &[String],
  start: usize,
  end: usize,
  nt: NonTerminal,
  unary_depth: usize,
) -> Option<SynTree<String, String>> {
  let entry = chart.entry(start, end, nt)?;
  let label = symbols.name(nt).to_string();
  let children = match entry.backpointer {
    Backpointer::Lexical { .. } => vec![SynTree::leaf(words.get(start)?.clone(), start)],
    Backpointer::Unary { child } => {
      // bound unary chains so a cyclic chart can't recurse forever
      if unary_depth > chart.num_nonterminals() {
        return None;
      }
      vec![extract_entry(chart, symbols, words, start, end, child, unary_depth + 1)?]
    }
    Backpointer::Binary {
      left,
      right,
      midpoint,
    } => vec![
      extract_entry(chart, symbols, words, start, midpoint, left, 0)?,
      extract_entry(chart, symbols, words, midpoint, end, right, 0)?,
    ],
  };
  Some(SynTree::branch(label, children))
}

/// Lists every cell with its entries, e.g. `[0,2] NP -> DT NN (-0.69315, 1)`.
pub struct ChartDisplay<'a, C: ?Sized> {
  chart: &'a C,
  symbols: &'a SymbolTable,
}

impl<'a, C: Chart + ?Sized> ChartDisplay<'a, C> {
  pub fn new(chart: &'a C, symbols: &'a SymbolTable) -> Self {
    Self { chart, symbols }
  }
}

impl<C: Chart + ?Sized> fmt::Display for ChartDisplay<'_, C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let n = self.chart.size();
    for span in 1..=n {
      for start in 0..=n - span {
        let end = start + span;
        let entries = self.chart.entries(start, end);
        if entries.is_empty() {
          continue;
        }
        writeln!(f, "[{},{}] {} entries", start, end, entries.len())?;
        for e in entries.iter() {
          let name = self.symbols.name(e.nonterminal);
          match e.backpointer {
            Backpointer::Lexical { terminal } => {
              write!(f, "  {} -> {} ({:.5}, {})", name, self.symbols.word(terminal), e.inside, end)?
            }
            Backpointer::Unary { child } => {
              write!(f, "  {} -> {} ({:.5}, {})", name, self.symbols.name(child), e.inside, end)?
            }
            Backpointer::Binary {
              left,
              right,
              midpoint,
            } => write!(
              f,
              "  {} -> {} {} ({:.5}, {})",
              name,
              self.symbols.name(left),
              self.symbols.name(right),
              e.inside,
              midpoint
            )?,
          }
          let outside = self.chart.outside(start, end, e.nonterminal);
          if outside > f32::NEG_INFINITY {
            write!(f, " outside={:.5}", outside)?;
          }
          writeln!(f)?;
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cell_indices_are_dense_and_unique() {
    let size = 6;
    let mut seen = vec![false; num_cells(size)];
    for start in 0..size {
      for end in start + 1..=size {
        let idx = cell_index(start, end, size);
        assert!(!seen[idx]);
        seen[idx] = true;
      }
    }
    assert!(seen.into_iter().all(|s| s));
  }

  #[test]
  fn temporary_cell_keeps_best_backpointer_under_sum() {
    let acc = Accumulator {
      semiring: Semiring::Sum,
      delta: 16.0,
      approximate: false,
    };
    let mut cell = TemporaryCell::new(0, 2, 3);
    let a = Backpointer::Binary {
      left: 0,
      right: 1,
      midpoint: 1,
    };
    let b = Backpointer::Unary { child: 1 };
    assert!(cell.update(2, 0.25f32.ln(), a, &acc));
    assert!(cell.update(2, 0.5f32.ln(), b, &acc));
    assert!(!cell.update(2, 0.25f32.ln(), a, &acc));

    let e = cell.entry(2).unwrap();
    assert_eq!(e.backpointer, b);
    assert!((e.inside.exp() - 1.0).abs() < 1e-5);
    assert_eq!(cell.len(), 1);
  }

  #[test]
  fn viterbi_cell_ignores_worse_candidates() {
    let acc = Accumulator::viterbi();
    let mut cell = TemporaryCell::new(0, 1, 2);
    assert!(cell.update(0, -1.0, Backpointer::Lexical { terminal: 0 }, &acc));
    assert!(!cell.update(0, -2.0, Backpointer::Lexical { terminal: 1 }, &acc));
    assert!(!cell.update(1, f32::NEG_INFINITY, Backpointer::Lexical { terminal: 0 }, &acc));
    assert_eq!(cell.inside(0), -1.0);
    assert_eq!(cell.entries().len(), 1);
  }

  #[test]
  fn backpointers_pack_through_the_packing_function() {
    let pf = PackingFunction::new(10).unwrap();
    let bps = [
      Backpointer::Lexical { terminal: 7 },
      Backpointer::Unary { child: 3 },
      Backpointer::Binary {
        left: 9,
        right: 2,
        midpoint: 4,
      },
    ];
    for bp in bps {
      let (packed, mid) = bp.pack(&pf, 6);
      assert_eq!(Backpointer::unpack(&pf, packed, mid), bp);
    }
  }
}
