//! Encodes a production's children into the single `i32` stored in a chart backpointer.
//!
//! Binary child pairs map onto non-negative values. Unary and lexical children map onto
//! disjoint negative ranges (odd and even respectively), so one integer field is enough
//! to tell the three production kinds apart.

use crate::error::GrammarError;
use crate::symbols::{NonTerminal, Terminal};

/// Returned by `unpack_right` for a unary backpointer.
pub const UNARY_PRODUCTION: i32 = -1;

/// Returned by `unpack_right` for a lexical backpointer.
pub const LEXICAL_PRODUCTION: i32 = -2;

const MAX_SHIFT: u32 = 15;

/// The decoded form of a packed child field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Children {
  Binary(NonTerminal, NonTerminal),
  Unary(NonTerminal),
  Lexical(Terminal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingFunction {
  shift: u32,
  mask: i32,
}

impl PackingFunction {
  /// Builds a shift-based packing function for a vocabulary of `num_nonterminals` symbols.
  pub fn new(num_nonterminals: usize) -> Result<Self, GrammarError> {
    let mut shift = 1;
    while (1usize << shift) < num_nonterminals {
      shift += 1;
    }
    if shift > MAX_SHIFT {
      return Err(GrammarError::TooManySymbols {
        count: num_nonterminals,
        max: 1 << MAX_SHIFT,
      });
    }
    Ok(Self {
      shift,
      mask: (1 << shift) - 1,
    })
  }

  pub fn pack(&self, left: NonTerminal, right: NonTerminal) -> i32 {
    ((left as i32) << self.shift) | right as i32
  }

  pub fn pack_unary(&self, child: NonTerminal) -> i32 {
    -2 * child as i32 - 1
  }

  pub fn pack_lexical(&self, terminal: Terminal) -> i32 {
    -2 * terminal as i32 - 2
  }

  /// The left child of a binary pair, the child of a unary, or the word of a lexical entry.
  pub fn unpack_left(&self, packed: i32) -> u32 {
    if packed >= 0 {
      (packed >> self.shift) as u32
    } else if packed & 1 != 0 {
      ((-packed - 1) / 2) as u32
    } else {
      ((-packed - 2) / 2) as u32
    }
  }

  /// The right child of a binary pair, or one of `UNARY_PRODUCTION` / `LEXICAL_PRODUCTION`.
  pub fn unpack_right(&self, packed: i32) -> i32 {
    if packed >= 0 {
      packed & self.mask
    } else if packed & 1 != 0 {
      UNARY_PRODUCTION
    } else {
      LEXICAL_PRODUCTION
    }
  }

  pub fn unpack(&self, packed: i32) -> Children {
    let left = self.unpack_left(packed);
    match self.unpack_right(packed) {
      UNARY_PRODUCTION => Children::Unary(left),
      LEXICAL_PRODUCTION => Children::Lexical(left),
      right => Children::Binary(left, right as u32),
    }
  }

  /// Largest packed binary value plus one; every binary pair packs below it.
  pub fn binary_limit(&self) -> i32 {
    1 << (2 * self.shift)
  }
}
