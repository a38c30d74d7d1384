use std::fmt;

use crate::symbols::{NonTerminal, SymbolTable, Terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductionKind {
  Binary { left: NonTerminal, right: NonTerminal },
  Unary { child: NonTerminal },
  Lexical { terminal: Terminal },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Production {
  pub parent: NonTerminal,
  pub kind: ProductionKind,
  pub log_prob: f32,
}

impl Production {
  pub fn binary(parent: NonTerminal, left: NonTerminal, right: NonTerminal, log_prob: f32) -> Self {
    Self {
      parent,
      kind: ProductionKind::Binary { left, right },
      log_prob,
    }
  }

  pub fn unary(parent: NonTerminal, child: NonTerminal, log_prob: f32) -> Self {
    Self {
      parent,
      kind: ProductionKind::Unary { child },
      log_prob,
    }
  }

  pub fn lexical(parent: NonTerminal, terminal: Terminal, log_prob: f32) -> Self {
    Self {
      parent,
      kind: ProductionKind::Lexical { terminal },
      log_prob,
    }
  }

  /// Left child of a binary production, or the only child of a unary one.
  pub fn left_child(&self) -> Option<NonTerminal> {
    match self.kind {
      ProductionKind::Binary { left, .. } => Some(left),
      ProductionKind::Unary { child } => Some(child),
      ProductionKind::Lexical { .. } => None,
    }
  }

  pub fn right_child(&self) -> Option<NonTerminal> {
    match self.kind {
      ProductionKind::Binary { right, .. } => Some(right),
      _ => None,
    }
  }

  pub fn display<'a>(&'a self, symbols: &'a SymbolTable) -> ProductionDisplay<'a> {
    ProductionDisplay {
      production: self,
      symbols,
    }
  }
}

/// Formats a production with symbol names instead of ids.
pub struct ProductionDisplay<'a> {
  production: &'a Production,
  symbols: &'a SymbolTable,
}

impl fmt::Display for ProductionDisplay<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let p = self.production;
    write!(f, "{} ->", self.symbols.name(p.parent))?;
    match p.kind {
      ProductionKind::Binary { left, right } => {
        write!(f, " {} {}", self.symbols.name(left), self.symbols.name(right))?
      }
      ProductionKind::Unary { child } => write!(f, " {}", self.symbols.name(child))?,
      ProductionKind::Lexical { terminal } => write!(f, " {}", self.symbols.word(terminal))?,
    }
    write!(f, " [log={:.5}]", p.log_prob)
  }
}
