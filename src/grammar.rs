use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::GrammarError;
use crate::packing::PackingFunction;
use crate::rules::{Production, ProductionKind};
use crate::symbols::{NonTerminal, SymbolTable, Terminal, Vocabulary};

/// An immutable PCFG in Chomsky-normal form (plus unaries), indexed for chart parsing.
///
/// Every lookup the search strategies need is precomputed at build time, so a grammar
/// can be shared read-only between any number of concurrent parses.
#[derive(Debug, Clone)]
pub struct Grammar {
  symbols: SymbolTable,
  packing: PackingFunction,
  productions: Vec<Production>,
  by_child_pair: FxHashMap<i32, Vec<Production>>,
  by_left_child: Vec<Vec<Production>>,
  by_right_child: Vec<Vec<Production>>,
  unary_by_child: Vec<Vec<Production>>,
  lexical_by_terminal: Vec<Vec<Production>>,
  binary_probs: FxHashMap<(NonTerminal, i32), f32>,
  unary_probs: FxHashMap<(NonTerminal, NonTerminal), f32>,
  lexical_probs: FxHashMap<(NonTerminal, Terminal), f32>,
  classes: Arc<SymbolClasses>,
  pos_symbols: Vec<NonTerminal>,
}

/// Per-symbol flags consulted in the inner loops of chart search.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolClasses {
  left: Vec<bool>,
  right: Vec<bool>,
  pos: Vec<bool>,
  factored: Vec<bool>,
}

impl SymbolClasses {
  pub fn len(&self) -> usize {
    self.left.len()
  }

  pub fn is_empty(&self) -> bool {
    self.left.is_empty()
  }

  pub fn is_valid_left_child(&self, nt: NonTerminal) -> bool {
    self.left[nt as usize]
  }

  pub fn is_valid_right_child(&self, nt: NonTerminal) -> bool {
    self.right[nt as usize]
  }

  pub fn is_pos(&self, nt: NonTerminal) -> bool {
    self.pos[nt as usize]
  }

  pub fn is_factored(&self, nt: NonTerminal) -> bool {
    self.factored[nt as usize]
  }
}

static NO_PRODUCTIONS: &[Production] = &[];

impl Grammar {
  pub fn builder(start: &str) -> GrammarBuilder {
    GrammarBuilder::new(start)
  }

  pub fn symbols(&self) -> &SymbolTable {
    &self.symbols
  }

  pub fn packing_function(&self) -> &PackingFunction {
    &self.packing
  }

  pub fn num_nonterminals(&self) -> usize {
    self.symbols.num_nonterminals()
  }

  pub fn start_symbol(&self) -> NonTerminal {
    self.symbols.start_symbol()
  }

  /// All productions, in insertion order.
  pub fn productions(&self) -> &[Production] {
    &self.productions
  }

  pub fn productions_by_child_pair(&self, left: NonTerminal, right: NonTerminal) -> &[Production] {
    self
      .by_child_pair
      .get(&self.packing.pack(left, right))
      .map(Vec::as_slice)
      .unwrap_or(NO_PRODUCTIONS)
  }

  pub fn productions_by_left_child(&self, nt: NonTerminal) -> &[Production] {
    &self.by_left_child[nt as usize]
  }

  pub fn productions_by_right_child(&self, nt: NonTerminal) -> &[Production] {
    &self.by_right_child[nt as usize]
  }

  pub fn unary_productions_by_child(&self, nt: NonTerminal) -> &[Production] {
    &self.unary_by_child[nt as usize]
  }

  pub fn lexical_productions(&self, terminal: Terminal) -> &[Production] {
    &self.lexical_by_terminal[terminal as usize]
  }

  /// `-inf` when the grammar has no such rule.
  pub fn binary_log_prob(&self, parent: NonTerminal, left: NonTerminal, right: NonTerminal) -> f32 {
    self
      .binary_probs
      .get(&(parent, self.packing.pack(left, right)))
      .copied()
      .unwrap_or(f32::NEG_INFINITY)
  }

  pub fn unary_log_prob(&self, parent: NonTerminal, child: NonTerminal) -> f32 {
    self
      .unary_probs
      .get(&(parent, child))
      .copied()
      .unwrap_or(f32::NEG_INFINITY)
  }

  pub fn lexical_log_prob(&self, parent: NonTerminal, terminal: Terminal) -> f32 {
    self
      .lexical_probs
      .get(&(parent, terminal))
      .copied()
      .unwrap_or(f32::NEG_INFINITY)
  }

  /// Shared handle to the symbol flags, for charts that outlive a borrow of the grammar.
  pub fn classes(&self) -> &Arc<SymbolClasses> {
    &self.classes
  }

  pub fn is_valid_left_child(&self, nt: NonTerminal) -> bool {
    self.classes.is_valid_left_child(nt)
  }

  pub fn is_valid_right_child(&self, nt: NonTerminal) -> bool {
    self.classes.is_valid_right_child(nt)
  }

  pub fn is_pos(&self, nt: NonTerminal) -> bool {
    self.classes.is_pos(nt)
  }

  /// Every non-terminal with at least one lexical production.
  pub fn pos_symbols(&self) -> &[NonTerminal] {
    &self.pos_symbols
  }

  pub fn is_factored(&self, nt: NonTerminal) -> bool {
    self.symbols.is_factored(nt)
  }

  pub fn base_category(&self, nt: NonTerminal) -> NonTerminal {
    self.symbols.base_index(nt)
  }

  pub fn num_base_categories(&self) -> usize {
    self.symbols.base_vocabulary().len()
  }

  pub fn terminal(&self, word: &str) -> Option<Terminal> {
    self.symbols.terminal(word)
  }
}

impl fmt::Display for Grammar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.symbols)?;
    for p in self.productions.iter() {
      writeln!(f, "{}", p.display(&self.symbols))?;
    }
    Ok(())
  }
}

/// Collects productions by symbol name, then freezes them into a `Grammar`.
#[derive(Debug, Clone)]
pub struct GrammarBuilder {
  start: String,
  nonterminals: Vocabulary,
  lexicon: Vocabulary,
  productions: Vec<Production>,
  index: FxHashMap<(NonTerminal, ProductionKind), usize>,
}

impl GrammarBuilder {
  pub fn new(start: &str) -> Self {
    let mut nonterminals = Vocabulary::new();
    nonterminals.intern(start);
    Self {
      start: start.to_string(),
      nonterminals,
      lexicon: Vocabulary::new(),
      productions: Vec::new(),
      index: FxHashMap::default(),
    }
  }

  pub fn nonterminal(&mut self, name: &str) -> NonTerminal {
    self.nonterminals.intern(name)
  }

  pub fn terminal(&mut self, word: &str) -> Terminal {
    self.lexicon.intern(word)
  }

  pub fn binary(&mut self, parent: &str, left: &str, right: &str, log_prob: f32) -> &mut Self {
    let p = Production::binary(
      self.nonterminal(parent),
      self.nonterminal(left),
      self.nonterminal(right),
      log_prob,
    );
    self.push(p)
  }

  pub fn unary(&mut self, parent: &str, child: &str, log_prob: f32) -> &mut Self {
    let p = Production::unary(self.nonterminal(parent), self.nonterminal(child), log_prob);
    self.push(p)
  }

  pub fn lexical(&mut self, parent: &str, word: &str, log_prob: f32) -> &mut Self {
    let p = Production::lexical(self.nonterminal(parent), self.terminal(word), log_prob);
    self.push(p)
  }

  /// Adds a production; a repeated rule keeps its highest probability.
  pub fn push(&mut self, production: Production) -> &mut Self {
    match self.index.get(&(production.parent, production.kind)) {
      Some(&idx) => {
        let existing = &mut self.productions[idx];
        existing.log_prob = existing.log_prob.max(production.log_prob);
      }
      None => {
        self
          .index
          .insert((production.parent, production.kind), self.productions.len());
        self.productions.push(production);
      }
    }
    self
  }

  pub fn build(self) -> Result<Grammar, GrammarError> {
    if self.productions.is_empty() {
      return Err(GrammarError::Empty);
    }
    let start = 0;
    if !self.productions.iter().any(|p| p.parent == start) {
      return Err(GrammarError::UnknownStartSymbol(self.start));
    }

    let n = self.nonterminals.len();
    let packing = PackingFunction::new(n)?;
    let symbols = SymbolTable::new(self.nonterminals, self.lexicon, start);

    let mut by_child_pair: FxHashMap<i32, Vec<Production>> = FxHashMap::default();
    let mut by_left_child = vec![Vec::new(); n];
    let mut by_right_child = vec![Vec::new(); n];
    let mut unary_by_child = vec![Vec::new(); n];
    let mut lexical_by_terminal = vec![Vec::new(); symbols.lexicon().len()];
    let mut binary_probs = FxHashMap::default();
    let mut unary_probs = FxHashMap::default();
    let mut lexical_probs = FxHashMap::default();
    let mut valid_left = vec![false; n];
    let mut valid_right = vec![false; n];
    let mut pos = vec![false; n];

    for &p in self.productions.iter() {
      match p.kind {
        ProductionKind::Binary { left, right } => {
          let packed = packing.pack(left, right);
          by_child_pair.entry(packed).or_insert_with(Vec::new).push(p);
          by_left_child[left as usize].push(p);
          by_right_child[right as usize].push(p);
          binary_probs.insert((p.parent, packed), p.log_prob);
          valid_left[left as usize] = true;
          valid_right[right as usize] = true;
        }
        ProductionKind::Unary { child } => {
          unary_by_child[child as usize].push(p);
          unary_probs.insert((p.parent, child), p.log_prob);
        }
        ProductionKind::Lexical { terminal } => {
          lexical_by_terminal[terminal as usize].push(p);
          lexical_probs.insert((p.parent, terminal), p.log_prob);
          pos[p.parent as usize] = true;
        }
      }
    }

    let pos_symbols = (0..n as NonTerminal).filter(|&nt| pos[nt as usize]).collect();
    let factored = (0..n as NonTerminal).map(|nt| symbols.is_factored(nt)).collect();
    let classes = Arc::new(SymbolClasses {
      left: valid_left,
      right: valid_right,
      pos,
      factored,
    });

    Ok(Grammar {
      symbols,
      packing,
      productions: self.productions,
      by_child_pair,
      by_left_child,
      by_right_child,
      unary_by_child,
      lexical_by_terminal,
      binary_probs,
      unary_probs,
      lexical_probs,
      classes,
      pos_symbols,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn toy() -> Grammar {
    let mut b = Grammar::builder("S");
    b.binary("S", "NP", "VP", 0.0)
      .binary("NP", "DT", "NN", 0.0)
      .unary("VP", "VB", 0.0)
      .lexical("DT", "the", 0.0)
      .lexical("NN", "dog", 0.5f32.ln())
      .lexical("NN", "cat", 0.5f32.ln())
      .lexical("VB", "barks", 0.0);
    b.build().unwrap()
  }

  #[test]
  fn indexes_productions() {
    let g = toy();
    let sym = g.symbols();
    let np = sym.nonterminal("NP").unwrap();
    let vp = sym.nonterminal("VP").unwrap();
    let vb = sym.nonterminal("VB").unwrap();
    let nn = sym.nonterminal("NN").unwrap();

    assert_eq!(g.start_symbol(), sym.nonterminal("S").unwrap());
    assert_eq!(g.productions_by_child_pair(np, vp).len(), 1);
    assert!(g.productions_by_child_pair(vp, np).is_empty());
    assert_eq!(g.unary_productions_by_child(vb)[0].parent, vp);
    assert!(g.is_valid_left_child(np));
    assert!(!g.is_valid_left_child(vp));
    assert!(g.is_valid_right_child(vp));
    assert!(g.is_pos(nn));
    assert!(!g.is_pos(np));
    assert_eq!(g.pos_symbols().len(), 3);

    let dog = g.terminal("dog").unwrap();
    assert_eq!(g.lexical_productions(dog)[0].parent, nn);
    assert!((g.lexical_log_prob(nn, dog) - 0.5f32.ln()).abs() < 1e-6);
    assert_eq!(g.unary_log_prob(np, vb), f32::NEG_INFINITY);
    assert_eq!(g.binary_log_prob(g.start_symbol(), np, vp), 0.0);
  }

  #[test]
  fn duplicate_rules_keep_best_probability() {
    let mut b = Grammar::builder("S");
    b.unary("S", "A", -2.0).unary("S", "A", -1.0).lexical("A", "a", 0.0);
    let g = b.build().unwrap();
    assert_eq!(g.productions().len(), 2);
    let s = g.start_symbol();
    let a = g.symbols().nonterminal("A").unwrap();
    assert_eq!(g.unary_log_prob(s, a), -1.0);
  }

  #[test]
  fn start_symbol_must_have_productions() {
    let mut b = Grammar::builder("TOP");
    b.lexical("A", "a", 0.0);
    assert_eq!(
      b.build().unwrap_err(),
      GrammarError::UnknownStartSymbol("TOP".to_string())
    );
    assert_eq!(Grammar::builder("S").build().unwrap_err(), GrammarError::Empty);
  }
}
