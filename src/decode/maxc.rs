//! Max-constituent decoding: the tree maximizing the expected number of correct labelled
//! constituents (Goodman), optionally over coarse categories (split-sum).
//!
//! Each cell gets a gain `g = P(label spans the cell | sentence) - lambda` for its best
//! label, and `maxc(cell) = g + max over midpoints of maxc(left) + maxc(right)`.

use rustc_hash::FxHashMap;

use crate::chart::{cell_index, num_cells, Accumulator, Backpointer, Chart, PackedArrayChart};
use crate::config::ParserConfig;
use crate::grammar::Grammar;
use crate::packing::Children;
use crate::symbols::NonTerminal;
use crate::syntree::{SynTree, NULL_LABEL};

#[derive(Debug, Clone, Copy)]
struct Candidate {
  label: u32,
  gain: f32,
  unary_child: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct MaxcCell {
  score: f32,
  label: u32,
  gain: f32,
  unary_child: Option<u32>,
  midpoint: usize,
}

struct Maxc<'a> {
  chart: &'a PackedArrayChart,
  grammar: &'a Grammar,
  words: &'a [String],
  /// Inside probability of the whole sentence.
  z: f32,
  lambda: f32,
  /// Label with coarse categories instead of split non-terminals.
  split_sum: bool,
  acc: Accumulator,
  cells: Vec<Option<MaxcCell>>,
}

pub fn goodman(
  chart: &PackedArrayChart,
  grammar: &Grammar,
  config: &ParserConfig,
  words: &[String],
) -> Option<SynTree<String, String>> {
  Maxc::new(chart, grammar, config, words, false).decode()
}

pub fn split_sum(
  chart: &PackedArrayChart,
  grammar: &Grammar,
  config: &ParserConfig,
  words: &[String],
) -> Option<SynTree<String, String>> {
  Maxc::new(chart, grammar, config, words, true).decode()
}

impl<'a> Maxc<'a> {
  fn new(
    chart: &'a PackedArrayChart,
    grammar: &'a Grammar,
    config: &ParserConfig,
    words: &'a [String],
    split_sum: bool,
  ) -> Self {
    let n = chart.size();
    Self {
      chart,
      grammar,
      words,
      z: chart.inside(0, n, grammar.start_symbol()),
      lambda: config.lambda,
      split_sum,
      acc: Accumulator::sum(config),
      cells: vec![None; num_cells(n)],
    }
  }

  fn cell(&self, start: usize, end: usize) -> Option<MaxcCell> {
    self.cells[cell_index(start, end, self.chart.size())]
  }

  fn root_label(&self) -> u32 {
    if self.split_sum {
      self.grammar.symbols().base_start_symbol()
    } else {
      self.grammar.start_symbol()
    }
  }

  fn name(&self, label: u32) -> &str {
    if self.split_sum {
      self.grammar.symbols().base_name(label)
    } else {
      self.grammar.symbols().name(label)
    }
  }

  fn unary_child(&self, packed: i32) -> Option<NonTerminal> {
    match self.chart.packing_function().unpack(packed) {
      Children::Unary(child) => Some(child),
      _ => None,
    }
  }

  fn penalty(&self, start: usize, end: usize) -> f32 {
    if end - start > 1 { self.lambda } else { 0.0 }
  }

  /// One candidate per split non-terminal in the cell.
  fn split_candidates(&self, start: usize, end: usize) -> Vec<Candidate> {
    let nts = self.chart.cell_nonterminals(start, end);
    let inside = self.chart.cell_inside(start, end);
    let outside = self.chart.cell_outside(start, end);
    let children = self.chart.cell_children(start, end);
    (0..nts.len())
      .map(|i| {
        let gain = if self.grammar.is_factored(nts[i]) {
          0.0
        } else {
          (inside[i] + outside[i] - self.z).exp() - self.penalty(start, end)
        };
        Candidate {
          label: nts[i],
          gain,
          unary_child: self.unary_child(children[i]),
        }
      })
      .collect()
  }

  /// One candidate per coarse category, its posterior summed over the splits. A category
  /// counts as unary-derived when its most probable split is.
  fn base_candidates(&self, start: usize, end: usize) -> Vec<Candidate> {
    let nts = self.chart.cell_nonterminals(start, end);
    let inside = self.chart.cell_inside(start, end);
    let outside = self.chart.cell_outside(start, end);
    let children = self.chart.cell_children(start, end);
    let symbols = self.grammar.symbols();

    // base -> (summed in+out, best split index, best split in+out)
    let mut bases: FxHashMap<NonTerminal, (f32, usize, f32)> = FxHashMap::default();
    for i in 0..nts.len() {
      let io = inside[i] + outside[i];
      let base = symbols.base_index(nts[i]);
      let slot = bases.entry(base).or_insert((f32::NEG_INFINITY, i, f32::NEG_INFINITY));
      slot.0 = self.acc.combine(slot.0, io);
      if io > slot.2 {
        slot.1 = i;
        slot.2 = io;
      }
    }

    let mut candidates = bases
      .into_iter()
      .map(|(base, (sum, best, _))| {
        let gain = if symbols.is_base_factored(base) {
          0.0
        } else {
          (sum - self.z).exp() - self.penalty(start, end)
        };
        let unary_child = self
          .unary_child(children[best])
          .map(|child| symbols.base_index(child))
          .filter(|&child| child != base);
        Candidate {
          label: base,
          gain,
          unary_child,
        }
      })
      .collect::<Vec<_>>();
    candidates.sort_unstable_by_key(|c| c.label);
    candidates
  }

  fn fill(&mut self) {
    let n = self.chart.size();
    let root_label = self.root_label();
    for span in 1..=n {
      for start in 0..=n - span {
        let end = start + span;
        let mut candidates = if self.split_sum {
          self.base_candidates(start, end)
        } else {
          self.split_candidates(start, end)
        };
        if span == n {
          candidates.retain(|c| c.label == root_label);
        }

        // ties go to unary parents, e.g. ROOT over S in the top cell
        let Some(best) = candidates.into_iter().reduce(|best, c| {
          let prefer_unary = c.unary_child.is_some() && best.unary_child.is_none();
          if c.gain > best.gain || (c.gain == best.gain && prefer_unary) {
            c
          } else {
            best
          }
        }) else {
          continue;
        };

        let (score, midpoint) = if span == 1 {
          (best.gain, end)
        } else {
          let split = (start + 1..end)
            .filter_map(|mid| {
              let left = self.cell(start, mid)?;
              let right = self.cell(mid, end)?;
              Some((left.score + right.score, mid))
            })
            .fold(None, |acc: Option<(f32, usize)>, (score, mid)| match acc {
              Some((best, _)) if best >= score => acc,
              _ => Some((score, mid)),
            });
          let Some((children, midpoint)) = split else {
            continue;
          };
          (best.gain + children, midpoint)
        };

        self.cells[cell_index(start, end, n)] = Some(MaxcCell {
          score,
          label: best.label,
          gain: best.gain,
          unary_child: best.unary_child,
          midpoint,
        });
      }
    }
  }

  fn decode(mut self) -> Option<SynTree<String, String>> {
    let n = self.chart.size();
    if n == 0 || self.z == f32::NEG_INFINITY {
      return None;
    }
    self.fill();
    self.extract(0, n)
  }

  fn extract(&self, start: usize, end: usize) -> Option<SynTree<String, String>> {
    let cell = self.cell(start, end)?;
    if end - start == 1 {
      return self.lexical_subtree(start, cell.label);
    }

    // a constituent is kept when its subtree adds expected correct constituents
    let is_root = start == 0 && end == self.chart.size();
    let label = if cell.score <= 0.0 && !is_root {
      NULL_LABEL.to_string()
    } else {
      self.name(cell.label).to_string()
    };
    let children = vec![
      self.extract(start, cell.midpoint)?,
      self.extract(cell.midpoint, end)?,
    ];
    Some(match cell.unary_child {
      Some(child) => {
        let inner = SynTree::branch(self.name(child).to_string(), children);
        SynTree::branch(label, vec![inner])
      }
      None => SynTree::branch(label, children),
    })
  }

  /// The chart's unary chain from `label` down to the word at `start`.
  fn lexical_subtree(&self, start: usize, label: u32) -> Option<SynTree<String, String>> {
    let nt = if self.split_sum {
      self.best_split(start, start + 1, label)?
    } else {
      label
    };
    self.unary_chain(start, nt, 0)
  }

  /// The split of `base` with the highest `inside + outside` in the cell.
  fn best_split(&self, start: usize, end: usize, base: NonTerminal) -> Option<NonTerminal> {
    let symbols = self.grammar.symbols();
    let nts = self.chart.cell_nonterminals(start, end);
    let inside = self.chart.cell_inside(start, end);
    let outside = self.chart.cell_outside(start, end);
    (0..nts.len())
      .filter(|&i| symbols.base_index(nts[i]) == base)
      .max_by(|&a, &b| (inside[a] + outside[a]).total_cmp(&(inside[b] + outside[b])))
      .map(|i| nts[i])
  }

  fn unary_chain(
    &self,
    start: usize,
    nt: NonTerminal,
    depth: usize,
  ) -> Option<SynTree<String, String>> {
    let entry = self.chart.entry(start, start + 1, nt)?;
    let label = if self.split_sum {
      self.grammar.symbols().base_name(self.grammar.base_category(nt))
    } else {
      self.grammar.symbols().name(nt)
    }
    .to_string();
    let child = match entry.backpointer {
      Backpointer::Lexical { .. } => SynTree::leaf(self.words.get(start)?.clone(), start),
      Backpointer::Unary { child } if depth <= self.grammar.num_nonterminals() => {
        self.unary_chain(start, child, depth + 1)?
      }
      _ => return None,
    };
    Some(SynTree::branch(label, vec![child]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::chart::extract_viterbi;
  use crate::config::Semiring;
  use crate::parser::{ParseStats, Parser, Sentence};

  fn chart_for(g: &Grammar, config: &ParserConfig, words: &[&str]) -> PackedArrayChart {
    let parser = Parser::new(g, config.clone());
    let sentence = Sentence::new(g, words);
    let mut chart = PackedArrayChart::new(sentence.len(), g);
    crate::parser::ecp::fill(&parser, &sentence, &mut chart, &mut ParseStats::default());
    let acc = Accumulator::sum(config);
    chart.compute_inside(g, sentence.terminals(), &acc);
    chart.compute_outside(g, &acc);
    chart
  }

  fn strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
  }

  fn sum_config() -> ParserConfig {
    ParserConfig {
      semiring: Semiring::Sum,
      ..ParserConfig::default()
    }
  }

  #[test]
  fn goodman_matches_viterbi_on_an_unambiguous_chart() {
    let g: Grammar = "S -> NP VP\nNP -> DT NN\nVP -> VB\nDT -> the\n\
                      NN -> dog [0.5]\nNN -> cat [0.5]\nVB -> barks [0.5]\nVB -> runs [0.5]"
      .parse()
      .unwrap();
    let words = ["the", "dog", "barks"];
    let chart = chart_for(&g, &sum_config(), &words);
    let w = strings(&words);
    let tree = goodman(&chart, &g, &sum_config(), &w).unwrap();
    let viterbi = extract_viterbi(&chart, g.symbols(), &w, g.start_symbol()).unwrap();
    assert_eq!(tree.unfactor().to_string(), viterbi.to_string());
  }

  #[test]
  fn split_sum_labels_coarse_categories() {
    let g: Grammar = r#"
      S -> NP_1 VP [0.5]
      S -> NP_2 VP [0.5]
      NP_1 -> DT NN
      NP_2 -> DT NN
      VP -> VB
      DT -> the
      NN -> dog
      VB -> barks
    "#
    .parse()
    .unwrap();
    let words = ["the", "dog", "barks"];
    let chart = chart_for(&g, &sum_config(), &words);
    let tree = split_sum(&chart, &g, &sum_config(), &strings(&words)).unwrap();
    assert_eq!(tree.unfactor().to_string(), "(S (NP (DT the)(NN dog))(VP (VB barks)))");
  }

  #[test]
  fn large_lambda_leaves_unlabelled_constituents() {
    let g: Grammar = "S -> A B\nB -> C D\nA -> a\nC -> c\nD -> d".parse().unwrap();
    let words = ["a", "c", "d"];
    let config = ParserConfig {
      lambda: 5.0,
      ..sum_config()
    };
    let chart = chart_for(&g, &config, &words);
    let tree = goodman(&chart, &g, &config, &strings(&words)).unwrap();
    assert!(tree.to_string().contains(NULL_LABEL));
    assert_eq!(tree.unfactor().to_string(), "(S (A a)(C c)(D d))");
  }

  #[test]
  fn unlabelling_follows_the_subtree_score() {
    // B alone loses 1 - lambda, but its two words win it back
    let g: Grammar = "S -> A B\nB -> C D\nA -> a\nC -> c\nD -> d".parse().unwrap();
    let words = ["a", "c", "d"];
    let config = ParserConfig {
      lambda: 2.0,
      ..sum_config()
    };
    let chart = chart_for(&g, &config, &words);
    let tree = goodman(&chart, &g, &config, &strings(&words)).unwrap();
    assert_eq!(tree.to_string(), "(S (A a)(B (C c)(D d)))");
  }

  #[test]
  fn goodman_prefers_the_most_probable_constituents_over_the_best_tree() {
    // best single tree uses X (0.4), but Y's two derivations carry 0.6 of the mass
    let g: Grammar = r#"
      S -> X C [0.4]
      S -> A Y [0.6]
      X -> A B
      Y -> B1 C [0.5]
      Y -> B2 C [0.5]
      A -> a
      B -> b
      B1 -> b
      B2 -> b
      C -> c
    "#
    .parse()
    .unwrap();
    let words = ["a", "b", "c"];
    let config = ParserConfig::default();
    let chart = chart_for(&g, &config, &words);
    let w = strings(&words);
    let viterbi = extract_viterbi(&chart, g.symbols(), &w, g.start_symbol()).unwrap();
    assert_eq!(viterbi.to_string(), "(S (X (A a)(B b))(C c))");
    let tree = goodman(&chart, &g, &config, &w).unwrap();
    assert!(tree.to_string().starts_with("(S (A a)(Y "), "{}", tree);
  }
}
