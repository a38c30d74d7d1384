//! Packed parallel-array chart.
//!
//! Every cell owns a fixed stride of `num_nonterminals` slots in each of the global
//! arrays (`nonterminals`, `inside`, `packed_children`, `midpoints`, `outside`). Only
//! the first `num_entries[cell]` slots of a stride are live, sorted by non-terminal so
//! lookups are a binary search. Cells are written by compacting a dense
//! [`TemporaryCell`] with `finalize_cell`.
//!
//! Before posterior decoding, `compute_inside` re-sums every entry over all derivations
//! the chart can build and `compute_outside` fills the outside arrays.

use std::sync::Arc;

use crate::chart::{
  cell_index, num_cells, Accumulator, Backpointer, Chart, ChartEntry, TemporaryCell,
};
use crate::grammar::{Grammar, SymbolClasses};
use crate::packing::PackingFunction;
use crate::symbols::{NonTerminal, Terminal};

#[derive(Debug, Clone)]
pub struct PackedArrayChart {
  size: usize,
  num_nonterminals: usize,
  packing: PackingFunction,
  classes: Arc<SymbolClasses>,
  nonterminals: Vec<NonTerminal>,
  inside: Vec<f32>,
  packed_children: Vec<i32>,
  midpoints: Vec<u32>,
  outside: Vec<f32>,
  num_entries: Vec<usize>,
  total_entries: usize,
  has_outside: bool,
}

impl PackedArrayChart {
  pub fn new(size: usize, grammar: &Grammar) -> Self {
    let num_nonterminals = grammar.num_nonterminals();
    let cells = num_cells(size);
    let len = cells * num_nonterminals;
    Self {
      size,
      num_nonterminals,
      packing: *grammar.packing_function(),
      classes: Arc::clone(grammar.classes()),
      nonterminals: vec![0; len],
      inside: vec![f32::NEG_INFINITY; len],
      packed_children: vec![0; len],
      midpoints: vec![0; len],
      outside: vec![f32::NEG_INFINITY; len],
      num_entries: vec![0; cells],
      total_entries: 0,
      has_outside: false,
    }
  }

  /// Copies every entry of another chart.
  pub fn from_chart<C: Chart + ?Sized>(chart: &C, grammar: &Grammar) -> Self {
    let mut packed = Self::new(chart.size(), grammar);
    for span in 1..=chart.size() {
      for start in 0..=chart.size() - span {
        let end = start + span;
        packed.write_cell(start, end, &chart.entries(start, end));
      }
    }
    packed
  }

  fn offset(&self, start: usize, end: usize) -> usize {
    cell_index(start, end, self.size) * self.num_nonterminals
  }

  fn live(&self, start: usize, end: usize) -> std::ops::Range<usize> {
    let offset = self.offset(start, end);
    offset..offset + self.num_entries[cell_index(start, end, self.size)]
  }

  /// Absolute array index of `nt` in the cell, or where it would be inserted.
  fn search(&self, start: usize, end: usize, nt: NonTerminal) -> Result<usize, usize> {
    let range = self.live(start, end);
    let base = range.start;
    self.nonterminals[range]
      .binary_search(&nt)
      .map(|i| base + i)
      .map_err(|i| base + i)
  }

  fn entry_at(&self, idx: usize) -> ChartEntry {
    ChartEntry::new(
      self.nonterminals[idx],
      self.inside[idx],
      Backpointer::unpack(&self.packing, self.packed_children[idx], self.midpoints[idx]),
    )
  }

  fn store(&mut self, idx: usize, end: usize, entry: &ChartEntry) {
    let (children, midpoint) = entry.backpointer.pack(&self.packing, end);
    self.nonterminals[idx] = entry.nonterminal;
    self.inside[idx] = entry.inside;
    self.packed_children[idx] = children;
    self.midpoints[idx] = midpoint;
  }

  /// Overwrites a cell with `entries`, which must be sorted by non-terminal.
  fn write_cell(&mut self, start: usize, end: usize, entries: &[ChartEntry]) {
    let cell = cell_index(start, end, self.size);
    let offset = self.offset(start, end);
    for (i, entry) in entries.iter().enumerate() {
      self.store(offset + i, end, entry);
    }
    self.total_entries = self.total_entries + entries.len() - self.num_entries[cell];
    self.num_entries[cell] = entries.len();
  }

  pub fn packing_function(&self) -> &PackingFunction {
    &self.packing
  }

  pub fn has_outside(&self) -> bool {
    self.has_outside
  }

  /// Live non-terminals of a cell, ascending.
  pub fn cell_nonterminals(&self, start: usize, end: usize) -> &[NonTerminal] {
    &self.nonterminals[self.live(start, end)]
  }

  /// Inside probabilities parallel to `cell_nonterminals`.
  pub fn cell_inside(&self, start: usize, end: usize) -> &[f32] {
    &self.inside[self.live(start, end)]
  }

  /// Outside probabilities parallel to `cell_nonterminals`.
  pub fn cell_outside(&self, start: usize, end: usize) -> &[f32] {
    &self.outside[self.live(start, end)]
  }

  /// Packed children parallel to `cell_nonterminals`.
  pub fn cell_children(&self, start: usize, end: usize) -> &[i32] {
    &self.packed_children[self.live(start, end)]
  }

  pub fn cell_midpoints(&self, start: usize, end: usize) -> &[u32] {
    &self.midpoints[self.live(start, end)]
  }

  fn accumulate_outside(
    &mut self,
    start: usize,
    end: usize,
    nt: NonTerminal,
    value: f32,
    acc: &Accumulator,
  ) {
    if value == f32::NEG_INFINITY {
      return;
    }
    if let Ok(idx) = self.search(start, end, nt) {
      self.outside[idx] = acc.combine(self.outside[idx], value);
    }
  }

  /// Recomputes the inside probability of every entry under `acc`, combining all
  /// derivations built from the chart's own entries. The entry set and backpointers are
  /// left alone, so a chart searched under Viterbi (or pruned by the agenda or beam) gets
  /// summed inside probabilities over exactly what it contains.
  pub fn compute_inside(
    &mut self,
    grammar: &Grammar,
    terminals: &[Option<Terminal>],
    acc: &Accumulator,
  ) {
    let n = self.size;
    for span in 1..=n {
      for start in 0..=n - span {
        let end = start + span;
        let range = self.live(start, end);
        if range.is_empty() {
          continue;
        }
        let mut sums = vec![f32::NEG_INFINITY; range.len()];
        if span == 1 {
          if let Some(terminal) = terminals.get(start).copied().flatten() {
            for (sum, &nt) in sums.iter_mut().zip(self.nonterminals[range.clone()].iter()) {
              *sum = grammar.lexical_log_prob(nt, terminal);
            }
          }
        } else {
          self.binary_inside(grammar, start, end, &mut sums, acc);
        }
        self.unary_inside(grammar, start, end, &mut sums, acc);
        self.inside[range].copy_from_slice(&sums);
      }
    }
  }

  fn binary_inside(
    &self,
    grammar: &Grammar,
    start: usize,
    end: usize,
    sums: &mut [f32],
    acc: &Accumulator,
  ) {
    let parents = self.cell_nonterminals(start, end);
    for mid in start + 1..end {
      for (left, left_inside) in self.left_children(start, mid) {
        for p in grammar.productions_by_left_child(left) {
          let Some(right) = p.right_child() else {
            continue;
          };
          let Ok(pi) = parents.binary_search(&p.parent) else {
            continue;
          };
          let right_inside = self.inside(mid, end, right);
          if right_inside > f32::NEG_INFINITY {
            sums[pi] = acc.combine(sums[pi], p.log_prob + left_inside + right_inside);
          }
        }
      }
    }
  }

  /// Adds unary chains within a cell, one level at a time. A chain is at most as long as
  /// the cell has entries, which also bounds unary cycles.
  fn unary_inside(
    &self,
    grammar: &Grammar,
    start: usize,
    end: usize,
    sums: &mut [f32],
    acc: &Accumulator,
  ) {
    let nts = self.cell_nonterminals(start, end);
    let mut level = sums.to_vec();
    for _ in 0..nts.len() {
      let mut next = vec![f32::NEG_INFINITY; nts.len()];
      for (ci, &child) in nts.iter().enumerate() {
        if level[ci] == f32::NEG_INFINITY {
          continue;
        }
        for p in grammar.unary_productions_by_child(child) {
          if let Ok(pi) = nts.binary_search(&p.parent) {
            next[pi] = acc.combine(next[pi], p.log_prob + level[ci]);
          }
        }
      }
      if next.iter().all(|&v| v == f32::NEG_INFINITY) {
        break;
      }
      for (sum, &v) in sums.iter_mut().zip(next.iter()) {
        *sum = acc.combine(*sum, v);
      }
      level = next;
    }
  }

  /// Fills outside probabilities top-down, combining contexts under `acc`'s semiring.
  ///
  /// The root's start symbol gets outside 0. Each cell receives the binary contributions
  /// of every parent cell before its unary chains are followed downwards.
  pub fn compute_outside(&mut self, grammar: &Grammar, acc: &Accumulator) {
    self.outside.iter_mut().for_each(|o| *o = f32::NEG_INFINITY);
    self.has_outside = true;
    let n = self.size;
    if n == 0 {
      return;
    }
    if let Ok(idx) = self.search(0, n, grammar.start_symbol()) {
      self.outside[idx] = 0.0;
    }

    for span in (1..=n).rev() {
      for start in 0..=n - span {
        let end = start + span;
        self.unary_outside(grammar, start, end, acc);
        if span > 1 {
          self.binary_outside(grammar, start, end, acc);
        }
      }
    }
  }

  fn unary_outside(&mut self, grammar: &Grammar, start: usize, end: usize, acc: &Accumulator) {
    let range = self.live(start, end);
    let nts = self.nonterminals[range.clone()].to_vec();
    let mut level = self.outside[range.clone()].to_vec();
    for _ in 0..nts.len() {
      let mut next = vec![f32::NEG_INFINITY; nts.len()];
      for (ci, &child) in nts.iter().enumerate() {
        for p in grammar.unary_productions_by_child(child) {
          let Ok(pi) = nts.binary_search(&p.parent) else {
            continue;
          };
          if level[pi] > f32::NEG_INFINITY {
            next[ci] = acc.combine(next[ci], level[pi] + p.log_prob);
          }
        }
      }
      if next.iter().all(|&v| v == f32::NEG_INFINITY) {
        break;
      }
      for (outside, &v) in self.outside[range.clone()].iter_mut().zip(next.iter()) {
        *outside = acc.combine(*outside, v);
      }
      level = next;
    }
  }

  fn binary_outside(&mut self, grammar: &Grammar, start: usize, end: usize, acc: &Accumulator) {
    for mid in start + 1..end {
      let lefts = self
        .live(start, mid)
        .filter(|&i| self.classes.is_valid_left_child(self.nonterminals[i]))
        .map(|i| (self.nonterminals[i], self.inside[i]))
        .collect::<Vec<_>>();

      for (left, left_inside) in lefts {
        for p in grammar.productions_by_left_child(left) {
          let parent_outside = self.outside(start, end, p.parent);
          if parent_outside == f32::NEG_INFINITY {
            continue;
          }
          let Some(right) = p.right_child() else {
            continue;
          };
          let right_inside = self.inside(mid, end, right);
          if right_inside == f32::NEG_INFINITY {
            continue;
          }
          let context = parent_outside + p.log_prob;
          self.accumulate_outside(start, mid, left, context + right_inside, acc);
          self.accumulate_outside(mid, end, right, context + left_inside, acc);
        }
      }
    }
  }

  fn scored(
    &self,
    start: usize,
    end: usize,
    keep: impl Fn(NonTerminal) -> bool,
  ) -> Vec<(NonTerminal, f32)> {
    self
      .live(start, end)
      .filter(|&i| keep(self.nonterminals[i]))
      .map(|i| (self.nonterminals[i], self.inside[i]))
      .collect()
  }
}

impl Chart for PackedArrayChart {
  fn size(&self) -> usize {
    self.size
  }

  fn num_nonterminals(&self) -> usize {
    self.num_nonterminals
  }

  fn entry(&self, start: usize, end: usize, nt: NonTerminal) -> Option<ChartEntry> {
    self.search(start, end, nt).ok().map(|idx| self.entry_at(idx))
  }

  fn inside(&self, start: usize, end: usize, nt: NonTerminal) -> f32 {
    self
      .search(start, end, nt)
      .map_or(f32::NEG_INFINITY, |idx| self.inside[idx])
  }

  fn outside(&self, start: usize, end: usize, nt: NonTerminal) -> f32 {
    self
      .search(start, end, nt)
      .map_or(f32::NEG_INFINITY, |idx| self.outside[idx])
  }

  fn entries(&self, start: usize, end: usize) -> Vec<ChartEntry> {
    self.live(start, end).map(|idx| self.entry_at(idx)).collect()
  }

  fn left_children(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)> {
    self.scored(start, end, |nt| self.classes.is_valid_left_child(nt))
  }

  fn right_children(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)> {
    self.scored(start, end, |nt| self.classes.is_valid_right_child(nt))
  }

  fn pos_entries(&self, start: usize, end: usize) -> Vec<(NonTerminal, f32)> {
    self.scored(start, end, |nt| self.classes.is_pos(nt))
  }

  /// Overwrites an existing entry in place, or shifts the tail of the cell's stride
  /// right by one to insert a new one in sorted position.
  fn update_inside(&mut self, start: usize, end: usize, entry: ChartEntry) -> bool {
    if entry.inside == f32::NEG_INFINITY || entry.inside.is_nan() {
      return false;
    }
    match self.search(start, end, entry.nonterminal) {
      Ok(idx) => {
        if entry.inside > self.inside[idx] {
          self.store(idx, end, &entry);
          true
        } else {
          false
        }
      }
      Err(idx) => {
        let last = self.live(start, end).end;
        for arr_idx in (idx..last).rev() {
          self.nonterminals[arr_idx + 1] = self.nonterminals[arr_idx];
          self.inside[arr_idx + 1] = self.inside[arr_idx];
          self.packed_children[arr_idx + 1] = self.packed_children[arr_idx];
          self.midpoints[arr_idx + 1] = self.midpoints[arr_idx];
          self.outside[arr_idx + 1] = self.outside[arr_idx];
        }
        self.store(idx, end, &entry);
        self.outside[idx] = f32::NEG_INFINITY;
        self.num_entries[cell_index(start, end, self.size)] += 1;
        self.total_entries += 1;
        true
      }
    }
  }

  fn finalize_cell(&mut self, cell: TemporaryCell) {
    let (start, end) = (cell.start(), cell.end());
    if self.num_entries[cell_index(start, end, self.size)] == 0 {
      self.write_cell(start, end, &cell.entries());
    } else {
      for entry in cell.entries() {
        self.update_inside(start, end, entry);
      }
    }
  }

  fn num_entries(&self) -> usize {
    self.total_entries
  }

  fn is_populated(&self, start: usize, end: usize) -> bool {
    self.num_entries[cell_index(start, end, self.size)] > 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Semiring;

  fn grammar() -> Grammar {
    "S -> A B [0.5]\nS -> A A [0.5]\nA -> a\nB -> b [0.5]\nB -> a [0.5]"
      .parse()
      .unwrap()
  }

  fn nt(g: &Grammar, name: &str) -> NonTerminal {
    g.symbols().nonterminal(name).unwrap()
  }

  fn lexical(nt: NonTerminal, inside: f32) -> ChartEntry {
    ChartEntry::new(nt, inside, Backpointer::Lexical { terminal: 0 })
  }

  #[test]
  fn update_inside_inserts_sorted_and_only_improves() {
    let g = grammar();
    let (s, a, b) = (nt(&g, "S"), nt(&g, "A"), nt(&g, "B"));
    let mut chart = PackedArrayChart::new(2, &g);

    assert!(chart.update_inside(0, 1, lexical(b, -1.0)));
    assert!(chart.update_inside(0, 1, lexical(s, -2.0)));
    assert!(chart.update_inside(0, 1, lexical(a, -3.0)));
    assert_eq!(chart.cell_nonterminals(0, 1), &[s, a, b]);
    assert_eq!(chart.cell_inside(0, 1), &[-2.0, -3.0, -1.0]);

    assert!(!chart.update_inside(0, 1, lexical(a, -4.0)));
    assert!(chart.update_inside(0, 1, lexical(a, -0.5)));
    assert_eq!(chart.inside(0, 1, a), -0.5);
    assert_eq!(chart.num_entries(), 3);
    assert!(!chart.is_populated(1, 2));
  }

  #[test]
  fn finalize_compacts_a_temporary_cell() {
    let g = grammar();
    let (s, a, b) = (nt(&g, "S"), nt(&g, "A"), nt(&g, "B"));
    let acc = Accumulator::viterbi();
    let mut chart = PackedArrayChart::new(2, &g);

    let mut cell = TemporaryCell::new(0, 2, g.num_nonterminals());
    cell.update(
      s,
      -1.0,
      Backpointer::Binary {
        left: a,
        right: b,
        midpoint: 1,
      },
      &acc,
    );
    chart.finalize_cell(cell);

    let entry = chart.entry(0, 2, s).unwrap();
    assert_eq!(
      entry.backpointer,
      Backpointer::Binary {
        left: a,
        right: b,
        midpoint: 1
      }
    );
    assert_eq!(chart.left_children(0, 2), vec![]);
    assert_eq!(chart.cell_midpoints(0, 2), &[1]);
  }

  #[test]
  fn outside_of_an_ambiguous_sentence() {
    let g = grammar();
    let (s, a, b) = (nt(&g, "S"), nt(&g, "A"), nt(&g, "B"));
    let half = 0.5f32.ln();
    let mut chart = PackedArrayChart::new(2, &g);

    chart.update_inside(0, 1, lexical(a, 0.0));
    chart.update_inside(1, 2, lexical(a, 0.0));
    chart.update_inside(1, 2, lexical(b, half));
    let inside_s = (0.25f32 + 0.5).ln();
    chart.update_inside(
      0,
      2,
      ChartEntry::new(
        s,
        inside_s,
        Backpointer::Binary {
          left: a,
          right: a,
          midpoint: 1,
        },
      ),
    );

    let acc = Accumulator {
      semiring: Semiring::Sum,
      delta: 16.0,
      approximate: false,
    };
    chart.compute_outside(&g, &acc);
    assert!(chart.has_outside());
    assert_eq!(chart.outside(0, 2, s), 0.0);
    // A over "a" at 0: S -> A B (0.5 * 0.5) + S -> A A (0.5 * 1)
    assert!((chart.outside(0, 1, a).exp() - 0.75).abs() < 1e-5);
    assert!((chart.outside(1, 2, b).exp() - 0.5).abs() < 1e-5);
    assert!((chart.outside(1, 2, a).exp() - 0.5).abs() < 1e-5);

    // inside * outside of each word-level entry sums to Z across the cell
    let z = chart.inside(0, 2, s);
    let posterior_1 = (chart.inside(1, 2, a) + chart.outside(1, 2, a) - z).exp()
      + (chart.inside(1, 2, b) + chart.outside(1, 2, b) - z).exp();
    assert!((posterior_1 - 1.0).abs() < 1e-5);
  }

  #[test]
  fn inside_is_resummed_over_every_derivation() {
    let g = grammar();
    let (s, a, b) = (nt(&g, "S"), nt(&g, "A"), nt(&g, "B"));
    let word = g.terminal("a");
    let mut chart = PackedArrayChart::new(2, &g);

    // viterbi search keeps only S -> A A
    chart.update_inside(0, 1, lexical(a, 0.0));
    chart.update_inside(1, 2, lexical(a, 0.0));
    chart.update_inside(1, 2, lexical(b, 0.5f32.ln()));
    let binary = Backpointer::Binary {
      left: a,
      right: a,
      midpoint: 1,
    };
    chart.update_inside(0, 2, ChartEntry::new(s, 0.5f32.ln(), binary));

    let acc = Accumulator {
      semiring: Semiring::Sum,
      delta: 16.0,
      approximate: false,
    };
    chart.compute_inside(&g, &[word, word], &acc);
    assert!((chart.inside(0, 2, s).exp() - 0.75).abs() < 1e-5);
    assert_eq!(chart.entry(0, 2, s).unwrap().backpointer, binary);
    assert_eq!(chart.num_entries(), 4);
  }

  #[test]
  fn unary_chains_carry_inside_and_outside_mass() {
    let g: Grammar = "S -> X\nX -> Y [0.5]\nX -> a [0.5]\nY -> Z\nZ -> a".parse().unwrap();
    let (s, x, y, z) = (nt(&g, "S"), nt(&g, "X"), nt(&g, "Y"), nt(&g, "Z"));
    let word = g.terminal("a").unwrap();
    let mut chart = PackedArrayChart::new(1, &g);
    let entry = |nt, inside, backpointer| ChartEntry::new(nt, inside, backpointer);
    chart.update_inside(0, 1, entry(z, 0.0, Backpointer::Lexical { terminal: word }));
    chart.update_inside(0, 1, entry(y, 0.0, Backpointer::Unary { child: z }));
    chart.update_inside(0, 1, entry(x, 0.5f32.ln(), Backpointer::Lexical { terminal: word }));
    chart.update_inside(0, 1, entry(s, 0.5f32.ln(), Backpointer::Unary { child: x }));

    let acc = Accumulator {
      semiring: Semiring::Sum,
      delta: 16.0,
      approximate: false,
    };
    chart.compute_inside(&g, &[Some(word)], &acc);
    // X -> a directly plus X -> Y -> Z -> a
    assert!(chart.inside(0, 1, x).abs() < 1e-5);
    assert!(chart.inside(0, 1, s).abs() < 1e-5);

    chart.compute_outside(&g, &acc);
    let z_posterior = (chart.inside(0, 1, z) + chart.outside(0, 1, z)).exp();
    assert!((z_posterior - 0.5).abs() < 1e-5);
    assert!(chart.outside(0, 1, x).abs() < 1e-5);
  }

  #[test]
  fn converts_from_another_chart() {
    let g = grammar();
    let a = nt(&g, "A");
    let hash = crate::chart::HashSlotChart::new(2, &g);
    hash.install(1, 2, lexical(a, -1.0));
    let packed = PackedArrayChart::from_chart(&hash, &g);
    assert_eq!(packed.inside(1, 2, a), -1.0);
    assert_eq!(packed.num_entries(), 1);
  }
}
