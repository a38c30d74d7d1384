//! Figures of merit: heuristic scores that rank candidate edges for the agenda and beam
//! parsers.
//!
//! A [`FigureOfMerit`] is a model shared read-only between parses. Once a sentence's
//! lexical cells are filled, the parser calls `init_sentence` to get a [`SentenceFom`]
//! holding whatever per-sentence tables the model needs.

use std::fmt;

use crate::chart::Chart;
use crate::grammar::Grammar;
use crate::parser::Sentence;
use crate::symbols::NonTerminal;

pub trait FigureOfMerit: Send + Sync + fmt::Debug {
  fn init_sentence<'a>(
    &'a self,
    grammar: &'a Grammar,
    sentence: &Sentence,
    chart: &dyn Chart,
  ) -> Box<dyn SentenceFom + 'a>;
}

/// Scores for one sentence.
pub trait SentenceFom: Send + Sync {
  fn score(&self, start: usize, end: usize, parent: NonTerminal, inside: f32) -> f32;

  /// Score of an edge rewriting a word directly.
  fn score_lexical(&self, start: usize, end: usize, parent: NonTerminal, inside: f32) -> f32 {
    self.score(start, end, parent, inside)
  }
}

/// Ranks edges by inside probability alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsideFom;

impl SentenceFom for InsideFom {
  fn score(&self, _start: usize, _end: usize, _parent: NonTerminal, inside: f32) -> f32 {
    inside
  }
}

impl FigureOfMerit for InsideFom {
  fn init_sentence<'a>(
    &'a self,
    _grammar: &'a Grammar,
    _sentence: &Sentence,
    _chart: &dyn Chart,
  ) -> Box<dyn SentenceFom + 'a> {
    Box::new(InsideFom)
  }
}

/// Inside probability divided by span length, so long spans aren't starved.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedInsideFom;

impl SentenceFom for NormalizedInsideFom {
  fn score(&self, start: usize, end: usize, _parent: NonTerminal, inside: f32) -> f32 {
    inside / (end - start) as f32
  }
}

impl FigureOfMerit for NormalizedInsideFom {
  fn init_sentence<'a>(
    &'a self,
    _grammar: &'a Grammar,
    _sentence: &Sentence,
    _chart: &dyn Chart,
  ) -> Box<dyn SentenceFom + 'a> {
    Box::new(NormalizedInsideFom)
  }
}

/// Boundary in/out model: approximates an edge's outside probability from the parts of
/// speech just outside its span.
///
/// The model holds three log-probability tables over the grammar's parts of speech plus a
/// sentence-boundary marker (written `None` in the setters):
/// - left boundary `P(nt | pos before the span)`,
/// - right boundary `P(pos after the span | nt)`,
/// - POS bigram transitions `P(pos | previous pos)`.
///
/// Per sentence, Viterbi forward and backward passes run over the POS lattice read from
/// the chart's span-1 cells; an edge `(start, end, nt)` then scores
/// `left(start, nt) + inside + right(end, nt)`.
#[derive(Debug, Clone)]
pub struct BoundaryInOut {
  num_nonterminals: usize,
  pos_slot: Vec<Option<usize>>,
  /// Parts of speech plus the boundary slot.
  num_slots: usize,
  left_boundary: Vec<f32>,
  right_boundary: Vec<f32>,
  pos_transition: Vec<f32>,
}

impl BoundaryInOut {
  /// A model with every table entry impossible.
  pub fn new(grammar: &Grammar) -> Self {
    Self::filled(grammar, f32::NEG_INFINITY)
  }

  /// A model that scores every context equally.
  pub fn uniform(grammar: &Grammar) -> Self {
    let slots = grammar.pos_symbols().len() + 1;
    Self::filled(grammar, -(slots as f32).ln())
  }

  fn filled(grammar: &Grammar, log_prob: f32) -> Self {
    let num_nonterminals = grammar.num_nonterminals();
    let mut pos_slot = vec![None; num_nonterminals];
    for (slot, &pos) in grammar.pos_symbols().iter().enumerate() {
      pos_slot[pos as usize] = Some(slot);
    }
    let num_slots = grammar.pos_symbols().len() + 1;
    Self {
      num_nonterminals,
      pos_slot,
      num_slots,
      left_boundary: vec![log_prob; num_nonterminals * num_slots],
      right_boundary: vec![log_prob; num_slots * num_nonterminals],
      pos_transition: vec![log_prob; num_slots * num_slots],
    }
  }

  fn boundary(&self) -> usize {
    self.num_slots - 1
  }

  fn slot(&self, pos: Option<NonTerminal>) -> Option<usize> {
    match pos {
      None => Some(self.boundary()),
      Some(nt) => self.pos_slot.get(nt as usize).copied().flatten(),
    }
  }

  /// Sets `log P(nt | previous)`. Ignored if `previous` is not a part of speech.
  pub fn set_left_boundary(
    &mut self,
    nt: NonTerminal,
    previous: Option<NonTerminal>,
    log_prob: f32,
  ) -> &mut Self {
    if let Some(slot) = self.slot(previous) {
      self.left_boundary[nt as usize * self.num_slots + slot] = log_prob;
    }
    self
  }

  /// Sets `log P(next | nt)`. Ignored if `next` is not a part of speech.
  pub fn set_right_boundary(
    &mut self,
    next: Option<NonTerminal>,
    nt: NonTerminal,
    log_prob: f32,
  ) -> &mut Self {
    if let Some(slot) = self.slot(next) {
      self.right_boundary[slot * self.num_nonterminals + nt as usize] = log_prob;
    }
    self
  }

  /// Sets `log P(pos | previous)`.
  pub fn set_pos_transition(
    &mut self,
    pos: Option<NonTerminal>,
    previous: Option<NonTerminal>,
    log_prob: f32,
  ) -> &mut Self {
    if let (Some(pos), Some(previous)) = (self.slot(pos), self.slot(previous)) {
      self.pos_transition[pos * self.num_slots + previous] = log_prob;
    }
    self
  }

  fn transition(&self, pos: usize, previous: usize) -> f32 {
    self.pos_transition[pos * self.num_slots + previous]
  }

  /// Emission scores per lattice position: index `k` in `1..=n` holds word `k - 1`.
  fn emissions(&self, chart: &dyn Chart, n: usize) -> Vec<Vec<(usize, f32)>> {
    let mut emissions = vec![Vec::new(); n + 2];
    for (k, e) in emissions.iter_mut().enumerate().take(n + 1).skip(1) {
      *e = chart
        .pos_entries(k - 1, k)
        .into_iter()
        .filter_map(|(pos, inside)| self.slot(Some(pos)).map(|slot| (slot, inside)))
        .collect();
    }
    emissions[0] = vec![(self.boundary(), 0.0)];
    emissions[n + 1] = vec![(self.boundary(), 0.0)];
    emissions
  }
}

impl FigureOfMerit for BoundaryInOut {
  fn init_sentence<'a>(
    &'a self,
    _grammar: &'a Grammar,
    sentence: &Sentence,
    chart: &dyn Chart,
  ) -> Box<dyn SentenceFom + 'a> {
    let n = sentence.len();
    let fb_size = n + 2;
    let slots = self.num_slots;
    let emissions = self.emissions(chart, n);

    let mut forward = vec![f32::NEG_INFINITY; fb_size * slots];
    forward[self.boundary()] = 0.0;
    for k in 1..fb_size {
      for &(pos, emission) in emissions[k].iter() {
        let best = emissions[k - 1]
          .iter()
          .map(|&(prev, _)| forward[(k - 1) * slots + prev] + self.transition(pos, prev))
          .fold(f32::NEG_INFINITY, f32::max);
        forward[k * slots + pos] = best + emission;
      }
    }

    let mut backward = vec![f32::NEG_INFINITY; fb_size * slots];
    backward[(fb_size - 1) * slots + self.boundary()] = 0.0;
    for k in (0..fb_size - 1).rev() {
      for &(pos, emission) in emissions[k].iter() {
        let best = emissions[k + 1]
          .iter()
          .map(|&(next, _)| backward[(k + 1) * slots + next] + self.transition(next, pos))
          .fold(f32::NEG_INFINITY, f32::max);
        backward[k * slots + pos] = best + emission;
      }
    }

    let v = self.num_nonterminals;
    let mut outside_left = vec![f32::NEG_INFINITY; fb_size * v];
    let mut outside_right = vec![f32::NEG_INFINITY; fb_size * v];
    for k in 0..fb_size {
      for nt in 0..v {
        outside_left[k * v + nt] = emissions[k]
          .iter()
          .map(|&(pos, _)| forward[k * slots + pos] + self.left_boundary[nt * slots + pos])
          .fold(f32::NEG_INFINITY, f32::max);
        outside_right[k * v + nt] = emissions[k]
          .iter()
          .map(|&(pos, _)| backward[k * slots + pos] + self.right_boundary[pos * v + nt])
          .fold(f32::NEG_INFINITY, f32::max);
      }
    }

    Box::new(BoundarySentence {
      num_nonterminals: v,
      outside_left,
      outside_right,
    })
  }
}

struct BoundarySentence {
  num_nonterminals: usize,
  outside_left: Vec<f32>,
  outside_right: Vec<f32>,
}

impl SentenceFom for BoundarySentence {
  fn score(&self, start: usize, end: usize, parent: NonTerminal, inside: f32) -> f32 {
    let v = self.num_nonterminals;
    // lattice position `start` holds the word before the span, `end + 1` the word after
    self.outside_left[start * v + parent as usize]
      + inside
      + self.outside_right[(end + 1) * v + parent as usize]
  }

  fn score_lexical(&self, _start: usize, _end: usize, _parent: NonTerminal, inside: f32) -> f32 {
    inside
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chart::{Backpointer, ChartEntry, HashSlotChart};

  fn grammar() -> Grammar {
    "S -> NP VP\nNP -> DT NN\nVP -> VB\nDT -> the\nNN -> dog\nVB -> barks"
      .parse()
      .unwrap()
  }

  fn lexical_chart(g: &Grammar, sentence: &Sentence) -> HashSlotChart {
    let chart = HashSlotChart::new(sentence.len(), g);
    for (i, t) in sentence.terminals().iter().enumerate() {
      let Some(t) = *t else { continue };
      for p in g.lexical_productions(t) {
        let entry = ChartEntry::new(p.parent, p.log_prob, Backpointer::Lexical { terminal: t });
        chart.install(i, i + 1, entry);
      }
    }
    chart
  }

  #[test]
  fn inside_foms() {
    assert_eq!(InsideFom.score(0, 4, 0, -2.0), -2.0);
    assert_eq!(NormalizedInsideFom.score(0, 4, 0, -2.0), -0.5);
  }

  #[test]
  fn uniform_boundary_model_scales_inside() {
    let g = grammar();
    let sentence = Sentence::new(&g, &["the", "dog", "barks"]);
    let chart = lexical_chart(&g, &sentence);
    let model = BoundaryInOut::uniform(&g);
    let fom = model.init_sentence(&g, &sentence, &chart);

    let np = g.symbols().nonterminal("NP").unwrap();
    let vp = g.symbols().nonterminal("VP").unwrap();
    // equal inside, same number of outside words: equal scores
    let a = fom.score(0, 2, np, -1.0);
    let b = fom.score(1, 3, vp, -1.0);
    assert!(a.is_finite());
    assert!((a - b).abs() < 1e-4);
    assert_eq!(fom.score_lexical(0, 1, np, -3.0), -3.0);
  }

  #[test]
  fn boundary_model_prefers_plausible_contexts() {
    let g = grammar();
    let sym = g.symbols();
    let (dt, nn, vb) = (
      sym.nonterminal("DT").unwrap(),
      sym.nonterminal("NN").unwrap(),
      sym.nonterminal("VB").unwrap(),
    );
    let np = sym.nonterminal("NP").unwrap();
    let vp = sym.nonterminal("VP").unwrap();
    let sentence = Sentence::new(&g, &["the", "dog", "barks"]);
    let chart = lexical_chart(&g, &sentence);

    let mut model = BoundaryInOut::uniform(&g);
    model
      .set_left_boundary(np, None, 0.0)
      .set_left_boundary(vp, Some(nn), 0.0)
      .set_left_boundary(vp, None, -10.0)
      .set_right_boundary(Some(vb), np, 0.0)
      .set_pos_transition(Some(nn), Some(dt), 0.0);
    let fom = model.init_sentence(&g, &sentence, &chart);

    assert!(fom.score(0, 2, np, -1.0) > fom.score(1, 3, np, -1.0));
    assert!(fom.score(2, 3, vp, -1.0) > fom.score(0, 1, vp, -1.0));
  }
}
