//! Max-rule-product decoding over coarse categories.
//!
//! For each cell, every coarse rule instantiation `A -> B C` at a midpoint is scored by
//! its posterior `q = r / Z`, where `r` sums `outside(A_x) * p(A_x -> B_y C_z) *
//! inside(B_y) * inside(C_z)` over all latent splits. The decoded tree maximizes the
//! product of its rules' `q`. Unlike max-constituent decoding this never produces a
//! tree using rules the grammar lacks.

use rustc_hash::FxHashMap;

use crate::chart::{cell_index, num_cells, Backpointer, Chart, PackedArrayChart};
use crate::config::ParserConfig;
use crate::grammar::Grammar;
use crate::parser::Sentence;
use crate::symbols::{NonTerminal, Terminal};
use crate::syntree::SynTree;
use crate::utils::log_sum_with;

/// Best coarse derivation of one `(cell, base category)`.
#[derive(Debug, Clone, Copy)]
struct MaxQ {
  score: f32,
  backpointer: Backpointer,
}

struct MaxRule<'a> {
  chart: &'a PackedArrayChart,
  grammar: &'a Grammar,
  words: &'a [String],
  terminals: &'a [Option<Terminal>],
  z: f32,
  local: bool,
  delta: f32,
  approximate: bool,
  num_bases: usize,
  table: Vec<Option<MaxQ>>,
}

pub fn max_rule_product(
  chart: &PackedArrayChart,
  grammar: &Grammar,
  config: &ParserConfig,
  sentence: &Sentence,
) -> Option<SynTree<String, String>> {
  let n = chart.size();
  let z = chart.inside(0, n, grammar.start_symbol());
  if n == 0 || z == f32::NEG_INFINITY {
    return None;
  }
  let num_bases = grammar.num_base_categories();
  let mut decoder = MaxRule {
    chart,
    grammar,
    words: sentence.words(),
    terminals: sentence.terminals(),
    z,
    local: config.local_max_rule,
    delta: config.log_sum_delta,
    approximate: config.approximate_sum,
    num_bases,
    table: vec![None; num_cells(n) * num_bases],
  };
  decoder.fill();
  decoder.extract(0, n, grammar.symbols().base_start_symbol(), 0)
}

impl MaxRule<'_> {
  fn index(&self, start: usize, end: usize, base: NonTerminal) -> usize {
    cell_index(start, end, self.chart.size()) * self.num_bases + base as usize
  }

  fn get(&self, start: usize, end: usize, base: NonTerminal) -> Option<MaxQ> {
    self.table[self.index(start, end, base)]
  }

  fn child_q(&self, start: usize, end: usize, base: NonTerminal) -> Option<f32> {
    if self.local {
      // children only need to exist
      self.get(start, end, base).map(|_| 0.0)
    } else {
      self.get(start, end, base).map(|q| q.score)
    }
  }

  fn offer(
    &mut self,
    start: usize,
    end: usize,
    base: NonTerminal,
    score: f32,
    backpointer: Backpointer,
  ) -> bool {
    let idx = self.index(start, end, base);
    match self.table[idx] {
      Some(current) if current.score >= score => false,
      _ => {
        self.table[idx] = Some(MaxQ { score, backpointer });
        true
      }
    }
  }

  fn log_sum(&self, a: f32, b: f32) -> f32 {
    log_sum_with(a, b, self.delta, self.approximate)
  }

  fn fill(&mut self) {
    let n = self.chart.size();
    for span in 1..=n {
      for start in 0..=n - span {
        let end = start + span;
        if span == 1 {
          self.lexical(start);
        } else {
          self.binary(start, end);
        }
        self.unary(start, end);
      }
    }
  }

  /// Every part of speech in a word's cell scores its lexical rule, whatever derivation
  /// the search kept for it.
  fn lexical(&mut self, start: usize) {
    let end = start + 1;
    let Some(terminal) = self.terminals.get(start).copied().flatten() else {
      return;
    };
    let symbols = self.grammar.symbols();
    let mut r: FxHashMap<NonTerminal, f32> = FxHashMap::default();
    for &nt in self.chart.cell_nonterminals(start, end) {
      if !self.grammar.is_pos(nt) {
        continue;
      }
      let score = self.chart.outside(start, end, nt) + self.grammar.lexical_log_prob(nt, terminal);
      if score == f32::NEG_INFINITY {
        continue;
      }
      let sum = r.entry(symbols.base_index(nt)).or_insert(f32::NEG_INFINITY);
      *sum = self.log_sum(*sum, score);
    }
    for (base, r) in r {
      self.offer(start, end, base, r - self.z, Backpointer::Lexical { terminal });
    }
  }

  fn binary(&mut self, start: usize, end: usize) {
    let symbols = self.grammar.symbols();
    for mid in start + 1..end {
      // (parent, left, right) base triple -> summed rule posterior mass
      let mut r: FxHashMap<(NonTerminal, NonTerminal, NonTerminal), f32> = FxHashMap::default();
      for (left, left_inside) in self.chart.left_children(start, mid) {
        for p in self.grammar.productions_by_left_child(left) {
          let Some(right) = p.right_child() else { continue };
          let parent_outside = self.chart.outside(start, end, p.parent);
          if parent_outside == f32::NEG_INFINITY {
            continue;
          }
          let right_inside = self.chart.inside(mid, end, right);
          if right_inside == f32::NEG_INFINITY {
            continue;
          }
          let key = (
            symbols.base_index(p.parent),
            symbols.base_index(left),
            symbols.base_index(right),
          );
          let score = parent_outside + p.log_prob + left_inside + right_inside;
          let sum = r.entry(key).or_insert(f32::NEG_INFINITY);
          *sum = self.log_sum(*sum, score);
        }
      }

      for ((parent, left, right), r) in r {
        let left_q = self.child_q(start, mid, left);
        let right_q = self.child_q(mid, end, right);
        let (Some(left_q), Some(right_q)) = (left_q, right_q) else {
          continue;
        };
        let backpointer = Backpointer::Binary {
          left,
          right,
          midpoint: mid,
        };
        self.offer(start, end, parent, r - self.z + left_q + right_q, backpointer);
      }
    }
  }

  /// One pass of unary rules. A unary may replace a cell's best derivation only when
  /// strictly better, and never on top of another unary.
  fn unary(&mut self, start: usize, end: usize) {
    let symbols = self.grammar.symbols();
    let mut r: FxHashMap<(NonTerminal, NonTerminal), f32> = FxHashMap::default();
    for child in self.chart.entries(start, end) {
      for p in self.grammar.unary_productions_by_child(child.nonterminal) {
        let parent_outside = self.chart.outside(start, end, p.parent);
        if parent_outside == f32::NEG_INFINITY {
          continue;
        }
        let key = (symbols.base_index(p.parent), symbols.base_index(child.nonterminal));
        if key.0 == key.1 {
          continue;
        }
        let sum = r.entry(key).or_insert(f32::NEG_INFINITY);
        *sum = self.log_sum(*sum, parent_outside + p.log_prob + child.inside);
      }
    }

    let mut candidates = r.into_iter().collect::<Vec<_>>();
    candidates.sort_unstable_by_key(|&(key, _)| key);
    for ((parent, child), r) in candidates {
      let Some(child_best) = self.get(start, end, child) else {
        continue;
      };
      if child_best.backpointer.is_unary() {
        continue;
      }
      let child_q = if self.local { 0.0 } else { child_best.score };
      self.offer(start, end, parent, r - self.z + child_q, Backpointer::Unary { child });
    }
  }

  fn extract(
    &self,
    start: usize,
    end: usize,
    base: NonTerminal,
    depth: usize,
  ) -> Option<SynTree<String, String>> {
    let best = self.get(start, end, base)?;
    let children = match best.backpointer {
      Backpointer::Lexical { .. } => vec![SynTree::leaf(self.words.get(start)?.clone(), start)],
      Backpointer::Unary { child } => {
        if depth > self.num_bases {
          return None;
        }
        vec![self.extract(start, end, child, depth + 1)?]
      }
      Backpointer::Binary { left, right, midpoint } => vec![
        self.extract(start, midpoint, left, 0)?,
        self.extract(midpoint, end, right, 0)?,
      ],
    };
    Some(SynTree::branch(
      self.grammar.symbols().base_name(base).to_string(),
      children,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chart::Accumulator;
  use crate::config::Semiring;
  use crate::parser::{ParseStats, Parser};

  fn decode(grammar: &str, words: &[&str], config: ParserConfig) -> Option<String> {
    let g: Grammar = grammar.parse().unwrap();
    let parser = Parser::new(&g, config.clone());
    let sentence = Sentence::new(&g, words);
    let mut chart = PackedArrayChart::new(sentence.len(), &g);
    crate::parser::ecp::fill(&parser, &sentence, &mut chart, &mut ParseStats::default());
    let acc = Accumulator::sum(&config);
    chart.compute_inside(&g, sentence.terminals(), &acc);
    chart.compute_outside(&g, &acc);
    max_rule_product(&chart, &g, &config, &sentence).map(|t| t.to_string())
  }

  fn sum() -> ParserConfig {
    ParserConfig {
      semiring: Semiring::Sum,
      ..ParserConfig::default()
    }
  }

  #[test]
  fn merges_latent_splits_before_choosing() {
    // the best single derivation uses X_1, but X's two splits together outweigh Y
    let grammar = r#"
      S -> X_1 [0.3]
      S -> X_2 [0.3]
      S -> Y [0.4]
      X_1 -> a
      X_2 -> a
      Y -> a
    "#;
    assert_eq!(decode(grammar, &["a"], sum()).as_deref(), Some("(S (X a))"));
  }

  #[test]
  fn binary_rules_and_unaries() {
    let grammar = "S -> NP VP\nNP -> DT NN\nVP -> VB\nDT -> the\nNN -> dog\nVB -> barks";
    assert_eq!(
      decode(grammar, &["the", "dog", "barks"], sum()).as_deref(),
      Some("(S (NP (DT the)(NN dog))(VP (VB barks)))")
    );
    let local = ParserConfig {
      local_max_rule: true,
      ..sum()
    };
    assert_eq!(
      decode(grammar, &["the", "dog", "barks"], local).as_deref(),
      Some("(S (NP (DT the)(NN dog))(VP (VB barks)))")
    );
  }

  #[test]
  fn parts_of_speech_derived_through_a_unary_still_score_their_word() {
    // X's best derivation is X -> Y, yet X -> a must still seed the table
    let grammar = "S -> X\nX -> a [0.1]\nX -> Y [0.9]\nY -> a";
    assert_eq!(decode(grammar, &["a"], sum()).as_deref(), Some("(S (X (Y a)))"));
    assert_eq!(
      decode(grammar, &["a"], ParserConfig::default()).as_deref(),
      Some("(S (X (Y a)))")
    );
  }

  #[test]
  fn no_parse_is_none() {
    let grammar = "S -> A B\nA -> a\nB -> b";
    assert_eq!(decode(grammar, &["a", "a"], sum()), None);
  }
}
