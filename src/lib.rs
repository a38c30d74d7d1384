//! Chart parsing for probabilistic context-free grammars.
//!
//! A [`Grammar`] is read from text (or built with [`GrammarBuilder`]), then a [`Parser`]
//! fills a span-indexed chart with one of three search strategies and decodes a tree:
//!
//! ```
//! use chartparse::{Grammar, Parser, ParserConfig};
//!
//! let g: Grammar = r#"
//!   S -> NP VP
//!   NP -> DT NN
//!   VP -> VB
//!   DT -> the
//!   NN -> dog [0.5]
//!   NN -> cat [0.5]
//!   VB -> barks
//! "#
//! .parse()
//! .unwrap();
//!
//! let parser = Parser::new(&g, "strategy=beam,beam_width=10".parse().unwrap());
//! let result = parser.parse(&["the", "dog", "barks"]);
//! assert_eq!(
//!   result.tree.unwrap().to_string(),
//!   "(S (NP (DT the)(NN dog))(VP (VB barks)))"
//! );
//! ```

#[macro_use]
extern crate lazy_static;

pub mod chart;
pub mod config;
pub mod decode;
pub mod error;
pub mod fom;
pub mod grammar;
pub mod packing;
pub mod parse_grammar;
pub mod parser;
pub mod rules;
pub mod symbols;
pub mod syntree;
pub mod utils;

pub use crate::config::ParserConfig;
pub use crate::error::{ConfigError, GrammarError};
pub use crate::grammar::{Grammar, GrammarBuilder};
pub use crate::parser::{ParseResult, Parser};
pub use crate::syntree::SynTree;
pub use crate::utils::Err;

impl Grammar {
  /// Parses with the default configuration: exhaustive search, Viterbi decoding.
  pub fn parse(&self, input: &[&str]) -> Option<SynTree<String, String>> {
    Parser::new(self, ParserConfig::default()).parse(input).tree
  }
}

#[test]
fn test_unknown_words_do_not_parse() {
  let g: Grammar = r#"
    S -> NP VP
    NP -> DT NN
    VP -> VB
    DT -> the
    NN -> dog
    VB -> barks
  "#
  .parse()
  .unwrap();

  assert!(g.parse(&["the", "dog", "barks"]).is_some());
  assert!(g.parse(&["the", "fish", "barks"]).is_none());
  assert!(g.parse(&["dog", "the", "barks"]).is_none());
  assert!(g.parse(&[]).is_none());
}
