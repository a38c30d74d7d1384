//! Best-first agenda search.
//!
//! Candidate edges wait on one shared priority queue ordered by figure of merit. Workers
//! pop small batches, install each edge into a [`HashSlotChart`] if it beats the slot's
//! current entry, and push the new edge's frontier: unary parents in the same cell and
//! binary parents pairing it with already-populated neighbouring cells.
//!
//! Search stops once the agenda drains, or once the pop count reaches
//! `over_parse_tune` times the pops it took to find the first complete parse.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{trace, warn};

use crate::chart::{Backpointer, Chart, ChartEntry, HashSlotChart};
use crate::fom::SentenceFom;
use crate::grammar::Grammar;
use crate::parser::{Edge, ParseStats, Parser, Sentence};
use crate::symbols::NonTerminal;

const NO_TARGET: usize = usize::MAX;

struct Agenda<'a> {
  grammar: &'a Grammar,
  chart: &'a HashSlotChart,
  fom: &'a dyn SentenceFom,
  size: usize,
  over_parse_tune: f32,
  batch: usize,
  heap: Mutex<BinaryHeap<Edge>>,
  /// Batches popped but not yet fully processed.
  in_flight: AtomicUsize,
  pops: AtomicUsize,
  pushes: AtomicUsize,
  considered: AtomicUsize,
  added: AtomicUsize,
  target_pops: AtomicUsize,
  done: AtomicBool,
}

impl Agenda<'_> {
  fn next_batch(&self) -> Option<Vec<Edge>> {
    let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
    if heap.is_empty() {
      return if self.in_flight.load(Ordering::SeqCst) == 0 {
        None
      } else {
        Some(Vec::new())
      };
    }
    let take = self.batch.min(heap.len());
    let batch = (0..take).filter_map(|_| heap.pop()).collect();
    self.in_flight.fetch_add(1, Ordering::SeqCst);
    Some(batch)
  }

  fn work(&self) {
    while !self.done.load(Ordering::Relaxed) {
      let Some(batch) = self.next_batch() else {
        return;
      };
      if batch.is_empty() {
        // another worker holds edges whose frontier may refill the agenda
        std::thread::yield_now();
        continue;
      }
      for edge in batch {
        if self.done.load(Ordering::Relaxed) {
          break;
        }
        self.process(edge);
      }
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
  }

  fn process(&self, edge: Edge) {
    let pops = self.pops.fetch_add(1, Ordering::Relaxed) + 1;
    if pops >= self.target_pops.load(Ordering::Relaxed) {
      self.done.store(true, Ordering::Relaxed);
    }
    if !self.chart.install(edge.start, edge.end, edge.entry()) {
      return;
    }
    self.added.fetch_add(1, Ordering::Relaxed);
    trace!(
      start = edge.start,
      end = edge.end,
      parent = edge.parent,
      inside = edge.inside,
      fom = edge.fom,
      pops,
      "installed edge"
    );

    if edge.start == 0 && edge.end == self.size && edge.parent == self.grammar.start_symbol() {
      let target = (pops as f64 * self.over_parse_tune as f64) as usize;
      if self
        .target_pops
        .compare_exchange(NO_TARGET, target, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
      {
        trace!(pops, target, "first complete parse");
        if pops >= target {
          self.done.store(true, Ordering::Relaxed);
        }
      }
    }
    self.expand(edge.start, edge.end, edge.parent, edge.inside);
  }

  /// Pushes every edge that builds directly on the entry `nt` over `(start, end)`.
  fn expand(&self, start: usize, end: usize, nt: NonTerminal, inside: f32) {
    let mut frontier = Vec::new();
    let mut candidate =
      |start: usize, end: usize, parent: NonTerminal, inside: f32, backpointer: Backpointer| {
        if inside > self.chart.inside(start, end, parent) {
          frontier.push(Edge {
            start,
            end,
            parent,
            inside,
            backpointer,
            fom: self.fom.score(start, end, parent, inside),
          });
        }
      };

    for p in self.grammar.unary_productions_by_child(nt) {
      candidate(start, end, p.parent, p.log_prob + inside, Backpointer::Unary { child: nt });
    }
    for p in self.grammar.productions_by_left_child(nt) {
      let Some(right) = p.right_child() else { continue };
      for right_end in end + 1..=self.size {
        let right_inside = self.chart.inside(end, right_end, right);
        if right_inside > f32::NEG_INFINITY {
          let backpointer = Backpointer::Binary {
            left: nt,
            right,
            midpoint: end,
          };
          candidate(start, right_end, p.parent, p.log_prob + inside + right_inside, backpointer);
        }
      }
    }
    for p in self.grammar.productions_by_right_child(nt) {
      let Some(left) = p.left_child() else { continue };
      for left_start in 0..start {
        let left_inside = self.chart.inside(left_start, start, left);
        if left_inside > f32::NEG_INFINITY {
          let backpointer = Backpointer::Binary {
            left,
            right: nt,
            midpoint: start,
          };
          candidate(left_start, end, p.parent, p.log_prob + left_inside + inside, backpointer);
        }
      }
    }

    if frontier.is_empty() {
      return;
    }
    self.considered.fetch_add(frontier.len(), Ordering::Relaxed);
    self.pushes.fetch_add(frontier.len(), Ordering::Relaxed);
    let mut heap = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
    heap.extend(frontier);
  }
}

pub fn parse(parser: &Parser<'_>, sentence: &Sentence, stats: &mut ParseStats) -> HashSlotChart {
  let grammar = parser.grammar();
  let config = parser.config();
  let n = sentence.len();
  let chart = HashSlotChart::new(n, grammar);
  if n == 0 {
    return chart;
  }

  let mut seeds = Vec::new();
  for (start, terminal) in sentence.terminals().iter().enumerate() {
    let Some(terminal) = *terminal else { continue };
    for p in grammar.lexical_productions(terminal) {
      stats.edges_considered += 1;
      let entry = ChartEntry::new(p.parent, p.log_prob, Backpointer::Lexical { terminal });
      if chart.install(start, start + 1, entry) {
        seeds.push((start, p.parent));
      }
    }
  }
  stats.edges_added += chart.num_entries();

  let fom = parser.fom().init_sentence(grammar, sentence, &chart);
  let agenda = Agenda {
    grammar,
    chart: &chart,
    fom: fom.as_ref(),
    size: n,
    over_parse_tune: config.over_parse_tune,
    batch: config.agenda_batch.max(1),
    heap: Mutex::new(BinaryHeap::new()),
    in_flight: AtomicUsize::new(0),
    pops: AtomicUsize::new(0),
    pushes: AtomicUsize::new(0),
    considered: AtomicUsize::new(0),
    added: AtomicUsize::new(0),
    target_pops: AtomicUsize::new(NO_TARGET),
    done: AtomicBool::new(false),
  };

  for &(start, nt) in seeds.iter() {
    agenda.expand(start, start + 1, nt, chart.inside(start, start + 1, nt));
  }

  if config.agenda_workers <= 1 {
    agenda.work();
  } else {
    rayon::scope(|scope| {
      for _ in 0..config.agenda_workers {
        scope.spawn(|_| agenda.work());
      }
    });
  }

  stats.agenda_pops += agenda.pops.load(Ordering::Relaxed);
  stats.agenda_pushes += agenda.pushes.load(Ordering::Relaxed);
  stats.edges_considered += agenda.considered.load(Ordering::Relaxed);
  stats.edges_added += agenda.added.load(Ordering::Relaxed);
  drop(agenda);

  if !chart.has_parse(grammar.start_symbol()) {
    warn!(words = n, pops = stats.agenda_pops, "agenda emptied without a complete parse");
  }
  chart
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{ParserConfig, SearchStrategy};

  const GRAMMAR: &str = r#"
    S -> NP VP
    NP -> DT NN
    NP -> NN [0.1]
    VP -> VB NP
    VP -> VB [0.2]
    DT -> the
    NN -> dog [0.5]
    NN -> cat [0.5]
    VB -> sees
  "#;

  fn config(workers: usize, over_parse_tune: f32) -> ParserConfig {
    ParserConfig {
      strategy: SearchStrategy::Agenda,
      agenda_workers: workers,
      agenda_batch: 2,
      over_parse_tune,
      ..ParserConfig::default()
    }
  }

  fn run(g: &Grammar, config: ParserConfig, words: &[&str]) -> (HashSlotChart, ParseStats) {
    let parser = Parser::new(g, config);
    let sentence = Sentence::new(g, words);
    let mut stats = ParseStats::default();
    let chart = parse(&parser, &sentence, &mut stats);
    (chart, stats)
  }

  #[test]
  fn exhaustive_agenda_finds_the_viterbi_parse() {
    let g: Grammar = GRAMMAR.parse().unwrap();
    let words = ["the", "dog", "sees", "the", "cat"];
    let (chart, stats) = run(&g, config(1, f32::INFINITY), &words);
    let expected = (0.5f32 * 0.5).ln();
    assert!((chart.inside(0, 5, g.start_symbol()) - expected).abs() < 1e-5);
    assert!(stats.agenda_pops > 0);
    assert!(stats.agenda_pushes >= stats.agenda_pops);
  }

  #[test]
  fn many_workers_agree_with_one() {
    let g: Grammar = GRAMMAR.parse().unwrap();
    let words = ["the", "dog", "sees", "the", "cat"];
    let (single, _) = run(&g, config(1, f32::INFINITY), &words);
    let (multi, _) = run(&g, config(4, f32::INFINITY), &words);
    assert_eq!(
      single.inside(0, 5, g.start_symbol()),
      multi.inside(0, 5, g.start_symbol())
    );
  }

  #[test]
  fn stops_after_the_over_parse_budget() {
    let g: Grammar = GRAMMAR.parse().unwrap();
    let words = ["the", "dog", "sees", "the", "cat"];
    let (_, bounded) = run(&g, config(1, 1.0), &words);
    let (_, exhaustive) = run(&g, config(1, f32::INFINITY), &words);
    assert!(bounded.agenda_pops <= exhaustive.agenda_pops);
  }

  #[test]
  fn drains_without_a_parse() {
    let g: Grammar = GRAMMAR.parse().unwrap();
    let (chart, _) = run(&g, config(2, 1.0), &["the", "fish", "sees"]);
    assert!(!chart.has_parse(g.start_symbol()));
  }

  #[test]
  fn concurrent_neighbours_always_find_each_other() {
    let g: Grammar = GRAMMAR.parse().unwrap();
    let words = ["the", "dog", "sees", "the", "cat", "sees", "the", "dog"];
    let (single, _) = run(&g, config(1, f32::INFINITY), &words);
    let many = ParserConfig {
      agenda_batch: 1,
      ..config(8, f32::INFINITY)
    };
    for _ in 0..25 {
      let (multi, _) = run(&g, many.clone(), &words);
      for span in 1..=words.len() {
        for start in 0..=words.len() - span {
          let end = start + span;
          for nt in 0..g.num_nonterminals() as NonTerminal {
            assert_eq!(single.inside(start, end, nt), multi.inside(start, end, nt));
          }
        }
      }
    }
  }
}
