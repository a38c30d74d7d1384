//! Exhaustive cell-cross search.
//!
//! Cells are visited bottom-up by span, left to right, so both children of every binary
//! combination are final before their parent cell is computed. Each cell crosses the
//! left-child entries of `(start, mid)` with the right-child entries of `(mid, end)` for
//! every midpoint, then applies a single level of unary productions.

use std::ops::Range;

use rayon::prelude::*;

use crate::chart::{
  Accumulator, Backpointer, Chart, ChartStore, HashSlotChart, PackedArrayChart, TemporaryCell,
};
use crate::config::ChartStorage;
use crate::grammar::Grammar;
use crate::parser::{ParseStats, Parser, Sentence};

pub fn parse(parser: &Parser<'_>, sentence: &Sentence, stats: &mut ParseStats) -> ChartStore {
  let grammar = parser.grammar();
  let n = sentence.len();
  match parser.config().storage {
    ChartStorage::HashSlot => {
      let mut chart = HashSlotChart::new(n, grammar);
      fill(parser, sentence, &mut chart, stats);
      ChartStore::HashSlot(chart)
    }
    ChartStorage::PackedArray => {
      let mut chart = PackedArrayChart::new(n, grammar);
      fill(parser, sentence, &mut chart, stats);
      ChartStore::PackedArray(chart)
    }
  }
}

/// Computes every cell of `chart` in bottom-up order.
pub fn fill<C: Chart>(
  parser: &Parser<'_>,
  sentence: &Sentence,
  chart: &mut C,
  stats: &mut ParseStats,
) {
  let grammar = parser.grammar();
  let config = parser.config();
  let acc = Accumulator::from_config(config);
  let n = sentence.len();

  for start in 0..n {
    let mut cell = lexical_cell(grammar, sentence, start, &acc, stats);
    unary_pass(grammar, &mut cell, &acc, stats);
    stats.edges_added += cell.len();
    chart.finalize_cell(cell);
  }

  for span in 2..=n {
    for start in 0..=n - span {
      let mut cell = cross_cell(
        grammar,
        &*chart,
        start,
        start + span,
        &acc,
        config.segments,
        stats,
      );
      unary_pass(grammar, &mut cell, &acc, stats);
      stats.edges_added += cell.len();
      chart.finalize_cell(cell);
    }
  }
}

/// The lexical entries of the word at `start`. Unknown words give an empty cell.
pub(crate) fn lexical_cell(
  grammar: &Grammar,
  sentence: &Sentence,
  start: usize,
  acc: &Accumulator,
  stats: &mut ParseStats,
) -> TemporaryCell {
  let mut cell = TemporaryCell::new(start, start + 1, grammar.num_nonterminals());
  if let Some(terminal) = sentence.terminals()[start] {
    for p in grammar.lexical_productions(terminal) {
      stats.edges_considered += 1;
      cell.update(p.parent, p.log_prob, Backpointer::Lexical { terminal }, acc);
    }
  }
  cell
}

/// Applies unary productions once over the entries the cell held on entry. Parents
/// created here are not themselves rewritten again.
pub(crate) fn unary_pass(
  grammar: &Grammar,
  cell: &mut TemporaryCell,
  acc: &Accumulator,
  stats: &mut ParseStats,
) {
  for child in cell.entries() {
    for p in grammar.unary_productions_by_child(child.nonterminal) {
      stats.edges_considered += 1;
      cell.update(
        p.parent,
        p.log_prob + child.inside,
        Backpointer::Unary {
          child: child.nonterminal,
        },
        acc,
      );
    }
  }
}

/// All binary derivations of `(start, end)` from finished child cells.
///
/// With more than one segment the left-child non-terminal range is split and each
/// segment fills its own temporary cell in parallel; the cells are merged afterwards.
pub(crate) fn cross_cell<C: Chart + ?Sized>(
  grammar: &Grammar,
  chart: &C,
  start: usize,
  end: usize,
  acc: &Accumulator,
  segments: usize,
  stats: &mut ParseStats,
) -> TemporaryCell {
  let v = grammar.num_nonterminals();
  if segments <= 1 {
    let mut cell = TemporaryCell::new(start, end, v);
    stats.edges_considered += cross_segment(grammar, chart, &mut cell, 0..v, acc);
    return cell;
  }

  let segment_len = v.div_ceil(segments);
  let (cell, considered) = (0..segments)
    .into_par_iter()
    .map(|s| {
      let range = (s * segment_len).min(v)..((s + 1) * segment_len).min(v);
      let mut cell = TemporaryCell::new(start, end, v);
      let considered = cross_segment(grammar, chart, &mut cell, range, acc);
      (cell, considered)
    })
    .reduce(
      || (TemporaryCell::new(start, end, v), 0),
      |(mut a, considered_a), (b, considered_b)| {
        a.merge(&b, acc);
        (a, considered_a + considered_b)
      },
    );
  stats.edges_considered += considered;
  cell
}

fn cross_segment<C: Chart + ?Sized>(
  grammar: &Grammar,
  chart: &C,
  cell: &mut TemporaryCell,
  left_range: Range<usize>,
  acc: &Accumulator,
) -> usize {
  let (start, end) = (cell.start(), cell.end());
  let mut considered = 0;
  for mid in start + 1..end {
    let lefts = chart.left_children(start, mid);
    if lefts.is_empty() {
      continue;
    }
    let rights = chart.right_children(mid, end);
    for &(left, left_inside) in lefts.iter().filter(|(l, _)| left_range.contains(&(*l as usize))) {
      for &(right, right_inside) in rights.iter() {
        for p in grammar.productions_by_child_pair(left, right) {
          considered += 1;
          cell.update(
            p.parent,
            p.log_prob + left_inside + right_inside,
            Backpointer::Binary {
              left,
              right,
              midpoint: mid,
            },
            acc,
          );
        }
      }
    }
  }
  considered
}
