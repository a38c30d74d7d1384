use std::fmt;

use rustc_hash::FxHashMap;

/// Index of a non-terminal in a grammar's `SymbolTable`.
pub type NonTerminal = u32;

/// Index of a word in a grammar's lexicon.
pub type Terminal = u32;

/// Prefix marking binarization artifacts.
pub const FACTORED_PREFIX: char = '@';

/// Separator between a coarse category and its latent split index, as in `NP_3`.
pub const SPLIT_SEPARATOR: char = '_';

/// Bidirectional string <-> id interning, frozen once the grammar is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
  names: Vec<String>,
  index: FxHashMap<String, u32>,
}

impl Vocabulary {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the id for `name`, adding it if it's new.
  pub fn intern(&mut self, name: &str) -> u32 {
    if let Some(&id) = self.index.get(name) {
      return id;
    }
    let id = self.names.len() as u32;
    self.names.push(name.to_string());
    self.index.insert(name.to_string(), id);
    id
  }

  pub fn get_index(&self, name: &str) -> Option<u32> {
    self.index.get(name).copied()
  }

  pub fn get_symbol(&self, id: u32) -> &str {
    &self.names[id as usize]
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
    self.names.iter().enumerate().map(|(i, s)| (i as u32, s.as_str()))
  }
}

/// Strips a latent split suffix: `NP_12` -> `NP`, `@S|NP_3` -> `@S|NP`.
pub fn base_category(name: &str) -> &str {
  match name.rfind(SPLIT_SEPARATOR) {
    Some(idx)
      if idx > 0
        && idx + 1 < name.len()
        && name[idx + 1..].bytes().all(|b| b.is_ascii_digit()) =>
    {
      &name[..idx]
    }
    _ => name,
  }
}

pub fn is_factored_name(name: &str) -> bool {
  name.starts_with(FACTORED_PREFIX)
}

/// Immutable symbol tables shared by every component that translates symbols to ids.
///
/// Holds the split (fine) non-terminal vocabulary, the coarse vocabulary obtained by
/// merging latent splits, and the lexicon.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTable {
  nonterminals: Vocabulary,
  lexicon: Vocabulary,
  base: Vocabulary,
  base_index: Vec<NonTerminal>,
  factored: Vec<bool>,
  base_factored: Vec<bool>,
  start: NonTerminal,
  base_start: NonTerminal,
}

impl SymbolTable {
  pub fn new(nonterminals: Vocabulary, lexicon: Vocabulary, start: NonTerminal) -> Self {
    let mut base = Vocabulary::new();
    let base_index = nonterminals
      .iter()
      .map(|(_, name)| base.intern(base_category(name)))
      .collect::<Vec<_>>();
    let factored = nonterminals
      .iter()
      .map(|(_, name)| is_factored_name(name))
      .collect();
    let base_factored = base.iter().map(|(_, name)| is_factored_name(name)).collect();
    let base_start = base_index[start as usize];

    Self {
      nonterminals,
      lexicon,
      base,
      base_index,
      factored,
      base_factored,
      start,
      base_start,
    }
  }

  pub fn num_nonterminals(&self) -> usize {
    self.nonterminals.len()
  }

  pub fn nonterminals(&self) -> &Vocabulary {
    &self.nonterminals
  }

  pub fn lexicon(&self) -> &Vocabulary {
    &self.lexicon
  }

  pub fn base_vocabulary(&self) -> &Vocabulary {
    &self.base
  }

  pub fn start_symbol(&self) -> NonTerminal {
    self.start
  }

  pub fn base_start_symbol(&self) -> NonTerminal {
    self.base_start
  }

  pub fn nonterminal(&self, name: &str) -> Option<NonTerminal> {
    self.nonterminals.get_index(name)
  }

  pub fn terminal(&self, word: &str) -> Option<Terminal> {
    self.lexicon.get_index(word)
  }

  pub fn name(&self, nt: NonTerminal) -> &str {
    self.nonterminals.get_symbol(nt)
  }

  pub fn word(&self, t: Terminal) -> &str {
    self.lexicon.get_symbol(t)
  }

  pub fn base_name(&self, base: NonTerminal) -> &str {
    self.base.get_symbol(base)
  }

  /// The coarse category of a split non-terminal.
  pub fn base_index(&self, nt: NonTerminal) -> NonTerminal {
    self.base_index[nt as usize]
  }

  pub fn is_factored(&self, nt: NonTerminal) -> bool {
    self.factored[nt as usize]
  }

  pub fn is_base_factored(&self, base: NonTerminal) -> bool {
    self.base_factored[base as usize]
  }
}

impl fmt::Display for SymbolTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "//** nonterminals:")?;
    for (_, nt) in self.nonterminals.iter() {
      write!(f, " {}", nt)?;
    }
    writeln!(f)?;
    writeln!(f, "//** start: {}", self.name(self.start))?;
    writeln!(f, "//** words: {}", self.lexicon.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn base_category_strips_numeric_split_suffix() {
    assert_eq!(base_category("NP_12"), "NP");
    assert_eq!(base_category("NP"), "NP");
    assert_eq!(base_category("@S|NP_VP"), "@S|NP_VP");
    assert_eq!(base_category("@S|NP_0"), "@S|NP");
    assert_eq!(base_category("_1"), "_1");
    assert_eq!(base_category("X_"), "X_");
  }

  #[test]
  fn split_symbols_share_a_base() {
    let mut nts = Vocabulary::new();
    let s = nts.intern("S_0");
    let np0 = nts.intern("NP_0");
    let np1 = nts.intern("NP_1");
    let fac = nts.intern("@NP_0");
    let table = SymbolTable::new(nts, Vocabulary::new(), s);

    assert_eq!(table.base_index(np0), table.base_index(np1));
    assert_ne!(table.base_index(np0), table.base_index(s));
    assert_eq!(table.base_vocabulary().len(), 3);
    assert_eq!(table.base_name(table.base_start_symbol()), "S");
    assert!(table.is_factored(fac));
    assert!(table.is_base_factored(table.base_index(fac)));
    assert!(!table.is_factored(np1));
  }
}
