//! Pruned beam search.
//!
//! Cells are visited bottom-up as in the exhaustive parser, but instead of committing
//! every derivation, the best derivation of each parent is queued by figure of merit and
//! at most `beam_width` entries are committed per cell. Edges scoring more than
//! `beam_delta` below the best edge popped in the cell are pruned. Each committed entry
//! queues its unary parents, so unary and binary derivations compete in the same beam.
//!
//! Alongside the chart a [`FomTable`] records, per entry, the best derivation scored by
//! accumulated figure of merit rather than inside probability.

use std::collections::BinaryHeap;

use tracing::trace;

use crate::chart::{
  cell_index, num_cells, Accumulator, Backpointer, Chart, ChartStore, HashSlotChart,
  PackedArrayChart, TemporaryCell,
};
use crate::config::{ChartStorage, DecodeMethod};
use crate::fom::SentenceFom;
use crate::grammar::Grammar;
use crate::parser::ecp::{cross_cell, lexical_cell};
use crate::parser::{Edge, ParseStats, Parser, Sentence};
use crate::symbols::{NonTerminal, SymbolTable};
use crate::syntree::SynTree;
use crate::utils::log_sum;

/// Best figure-of-merit derivation of every committed entry.
///
/// In max-product mode a derivation scores its own figure of merit plus its children's
/// scores; in max-sum mode the scores are combined with log-sum-exp.
#[derive(Debug, Clone)]
pub struct FomTable {
  size: usize,
  num_nonterminals: usize,
  sum: bool,
  scores: Vec<f32>,
  backpointers: Vec<Option<Backpointer>>,
}

impl FomTable {
  pub fn new(size: usize, num_nonterminals: usize, sum: bool) -> Self {
    let len = num_cells(size) * num_nonterminals;
    Self {
      size,
      num_nonterminals,
      sum,
      scores: vec![f32::NEG_INFINITY; len],
      backpointers: vec![None; len],
    }
  }

  fn index(&self, start: usize, end: usize, nt: NonTerminal) -> usize {
    cell_index(start, end, self.size) * self.num_nonterminals + nt as usize
  }

  pub fn score(&self, start: usize, end: usize, nt: NonTerminal) -> f32 {
    self.scores[self.index(start, end, nt)]
  }

  pub fn backpointer(&self, start: usize, end: usize, nt: NonTerminal) -> Option<Backpointer> {
    self.backpointers[self.index(start, end, nt)]
  }

  fn combine(&self, a: f32, b: f32) -> f32 {
    if self.sum { log_sum(a, b) } else { a + b }
  }

  /// Offers a derivation of `nt` whose top edge scored `fom`. Returns whether it became
  /// the entry's best.
  pub fn update(
    &mut self,
    start: usize,
    end: usize,
    nt: NonTerminal,
    fom: f32,
    backpointer: Backpointer,
  ) -> bool {
    let children = match backpointer {
      Backpointer::Lexical { .. } => None,
      Backpointer::Unary { child } => {
        // a unary over a unary could chain forever
        if matches!(self.backpointer(start, end, child), Some(Backpointer::Unary { .. }) | None) {
          return false;
        }
        Some(self.score(start, end, child))
      }
      Backpointer::Binary { left, right, midpoint } => {
        let left = self.score(start, midpoint, left);
        let right = self.score(midpoint, end, right);
        if left == f32::NEG_INFINITY || right == f32::NEG_INFINITY {
          return false;
        }
        Some(self.combine(left, right))
      }
    };
    let score = match children {
      None => fom,
      Some(children) => self.combine(fom, children),
    };
    let idx = self.index(start, end, nt);
    if score > self.scores[idx] {
      self.scores[idx] = score;
      self.backpointers[idx] = Some(backpointer);
      true
    } else {
      false
    }
  }

  /// Follows the figure-of-merit backpointers down from `root` over the whole sentence.
  pub fn extract(
    &self,
    symbols: &SymbolTable,
    words: &[String],
    root: NonTerminal,
  ) -> Option<SynTree<String, String>> {
    if self.size == 0 {
      return None;
    }
    self.extract_entry(symbols, words, 0, self.size, root, 0)
  }

  fn extract_entry(
    &self,
    symbols: &SymbolTable,
    words: &[String],
    start: usize,
    end: usize,
    nt: NonTerminal,
    unary_depth: usize,
  ) -> Option<SynTree<String, String>> {
    let children = match self.backpointer(start, end, nt)? {
      Backpointer::Lexical { .. } => vec![SynTree::leaf(words.get(start)?.clone(), start)],
      Backpointer::Unary { child } => {
        if unary_depth > self.num_nonterminals {
          return None;
        }
        vec![self.extract_entry(symbols, words, start, end, child, unary_depth + 1)?]
      }
      Backpointer::Binary { left, right, midpoint } => vec![
        self.extract_entry(symbols, words, start, midpoint, left, 0)?,
        self.extract_entry(symbols, words, midpoint, end, right, 0)?,
      ],
    };
    Some(SynTree::branch(symbols.name(nt).to_string(), children))
  }
}

pub fn parse(
  parser: &Parser<'_>,
  sentence: &Sentence,
  stats: &mut ParseStats,
) -> (ChartStore, FomTable) {
  let grammar = parser.grammar();
  let n = sentence.len();
  match parser.config().storage {
    ChartStorage::HashSlot => {
      let mut chart = HashSlotChart::new(n, grammar);
      let table = fill(parser, sentence, &mut chart, stats);
      (ChartStore::HashSlot(chart), table)
    }
    ChartStorage::PackedArray => {
      let mut chart = PackedArrayChart::new(n, grammar);
      let table = fill(parser, sentence, &mut chart, stats);
      (ChartStore::PackedArray(chart), table)
    }
  }
}

/// Runs the beam search over `chart`, returning the figure-of-merit derivations.
pub fn fill<C: Chart>(
  parser: &Parser<'_>,
  sentence: &Sentence,
  chart: &mut C,
  stats: &mut ParseStats,
) -> FomTable {
  let grammar = parser.grammar();
  let config = parser.config();
  let acc = Accumulator::viterbi();
  let n = sentence.len();
  let mut table = FomTable::new(
    n,
    grammar.num_nonterminals(),
    config.decode == DecodeMethod::FomSum,
  );

  // words are committed as-is, then the figure of merit can look at the whole lattice
  for start in 0..n {
    let cell = lexical_cell(grammar, sentence, start, &acc, stats);
    stats.edges_added += cell.len();
    chart.finalize_cell(cell);
  }
  let fom = parser.fom().init_sentence(grammar, sentence, &*chart);
  for start in 0..n {
    for e in chart.entries(start, start + 1) {
      let score = fom.score_lexical(start, start + 1, e.nonterminal, e.inside);
      table.update(start, start + 1, e.nonterminal, score, e.backpointer);
    }
  }

  let mut beam = Beam {
    grammar,
    fom: fom.as_ref(),
    table: &mut table,
    acc,
    width: config.beam_width,
    delta: config.beam_delta,
  };
  for span in 1..=n {
    for start in 0..=n - span {
      let end = start + span;
      let candidates = if span == 1 {
        chart
          .entries(start, end)
          .into_iter()
          .flat_map(|child| beam.unary_edges(start, end, child.nonterminal, child.inside))
          .collect::<Vec<_>>()
      } else {
        cross_cell(grammar, &*chart, start, end, &acc, config.segments, stats)
          .entries()
          .into_iter()
          .map(|e| Edge {
            start,
            end,
            parent: e.nonterminal,
            inside: e.inside,
            backpointer: e.backpointer,
            fom: beam.fom.score(start, end, e.nonterminal, e.inside),
          })
          .collect()
      };
      let cell = beam.run_cell(&*chart, start, end, candidates, stats);
      chart.finalize_cell(cell);
    }
  }
  table
}

struct Beam<'a> {
  grammar: &'a Grammar,
  fom: &'a dyn SentenceFom,
  table: &'a mut FomTable,
  acc: Accumulator,
  width: usize,
  delta: f32,
}

impl Beam<'_> {
  fn unary_edges(&self, start: usize, end: usize, child: NonTerminal, inside: f32) -> Vec<Edge> {
    self
      .grammar
      .unary_productions_by_child(child)
      .iter()
      .map(|p| {
        let inside = p.log_prob + inside;
        Edge {
          start,
          end,
          parent: p.parent,
          inside,
          backpointer: Backpointer::Unary { child },
          fom: self.fom.score(start, end, p.parent, inside),
        }
      })
      .collect()
  }

  /// Commits the best of `candidates` to a temporary cell for `(start, end)`.
  fn run_cell<C: Chart + ?Sized>(
    &mut self,
    chart: &C,
    start: usize,
    end: usize,
    candidates: Vec<Edge>,
    stats: &mut ParseStats,
  ) -> TemporaryCell {
    let mut agenda = candidates.into_iter().collect::<BinaryHeap<_>>();
    let mut cell = TemporaryCell::new(start, end, self.grammar.num_nonterminals());
    let mut best_fom = f32::NEG_INFINITY;
    let mut committed = 0;

    while committed < self.width {
      let Some(edge) = agenda.pop() else { break };
      if edge.fom < best_fom - self.delta {
        trace!(start, end, pruned = agenda.len() + 1, "beam threshold");
        break;
      }
      best_fom = best_fom.max(edge.fom);
      let current = cell.inside(edge.parent).max(chart.inside(start, end, edge.parent));
      if edge.inside <= current {
        continue;
      }

      cell.update(edge.parent, edge.inside, edge.backpointer, &self.acc);
      self.table.update(start, end, edge.parent, edge.fom, edge.backpointer);
      committed += 1;
      stats.edges_added += 1;

      let unaries = self.unary_edges(start, end, edge.parent, edge.inside);
      stats.edges_considered += unaries.len();
      agenda.extend(unaries);
    }
    cell
  }
}
