//! Line-oriented reader for text grammars.
//!
//! ```text
//! // comment
//! S -> NP VP [0.9]
//! S -> VP [0.1] ; VP -> VB
//! NP -> DT JJ NN [log=-0.5]
//! DT -> the
//! ```
//!
//! The first rule's symbol is the start symbol. Symbols that never appear on a left-hand
//! side are words. Rules with more than two children are right-binarized through
//! factored `@LHS|...` symbols.

use regex::Regex;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::GrammarError;
use crate::grammar::{Grammar, GrammarBuilder};
use crate::symbols::FACTORED_PREFIX;
use crate::utils::Err;

impl Grammar {
  pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, Err> {
    Ok(fs::read_to_string(path)?.parse()?)
  }
}

impl FromStr for Grammar {
  type Err = GrammarError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let rules = parse_rules(s)?;
    let first = rules.first().ok_or(GrammarError::Empty)?;
    let lhs_symbols = rules.iter().map(|r| r.lhs).collect::<FxHashSet<_>>();
    let is_word = |s: &str| !lhs_symbols.contains(s);

    let mut builder = GrammarBuilder::new(first.lhs);
    for rule in rules.iter() {
      match rule.rhs.as_slice() {
        [word] if is_word(*word) => {
          builder.lexical(rule.lhs, word, rule.log_prob);
        }
        [child] => {
          builder.unary(rule.lhs, child, rule.log_prob);
        }
        children => {
          if let Some(word) = children.iter().find(|c| is_word(**c)) {
            return Err(GrammarError::Malformed {
              line: rule.line,
              reason: format!("word {:?} in a rule with {} children", word, children.len()),
            });
          }
          binarize(&mut builder, rule.lhs, children, rule.log_prob);
        }
      }
    }

    builder.build()
  }
}

#[derive(Debug)]
struct RawRule<'a> {
  line: usize,
  lhs: &'a str,
  rhs: Vec<&'a str>,
  log_prob: f32,
}

/// `A -> B C D [p]` becomes `A -> B @A|C|D [p]` and `@A|C|D -> C D [1]`.
fn binarize(builder: &mut GrammarBuilder, lhs: &str, rhs: &[&str], log_prob: f32) {
  let n = rhs.len();
  let mut parent = lhs.to_string();
  let mut prob = log_prob;
  for i in 0..n - 2 {
    let factored = format!("{}{}|{}", FACTORED_PREFIX, lhs, rhs[i + 1..].join("|"));
    builder.binary(&parent, rhs[i], &factored, prob);
    parent = factored;
    prob = 0.0;
  }
  builder.binary(&parent, rhs[n - 2], rhs[n - 1], prob);
}

type Infallible<'a, T> = (T, &'a str);
type ParseResult<'a, T> = Result<(T, &'a str), String>;

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

/// Try to consume a regex, returning None if it doesn't match
fn optional_re<'a>(re: &'static Regex, s: &'a str) -> Infallible<'a, Option<&'a str>> {
  match re.find(s) {
    Some(m) if m.start() == 0 => (Some(m.as_str()), &s[m.end()..]),
    _ => (None, s),
  }
}

/// Try to consume a regex, failing if it doesn't match
fn needed_re<'a>(re: &'static Regex, s: &'a str) -> ParseResult<'a, &'a str> {
  if let (Some(c), rest) = optional_re(re, s) {
    Ok((c, rest))
  } else {
    Err(format!("couldn't match {} at {:?}", re, s))
  }
}

fn skip_whitespace(s: &str) -> &str {
  regex_static!(WHITESPACE, r"\s+");
  optional_re(&*WHITESPACE, s).1
}

/// A symbol is any run of characters other than whitespace, brackets and `;`.
fn parse_name(s: &str) -> ParseResult<'_, &str> {
  regex_static!(NAME, r"[^\s\[\];]+");
  needed_re(&*NAME, s).map_err(|err| format!("name: {}", err))
}

/// `[p]` with `p` a linear probability, or `[log=x]`.
fn parse_probability(s: &str, line: usize) -> Result<Infallible<'_, f32>, GrammarError> {
  regex_static!(PROB, r"^\[\s*(log\s*=\s*)?([^\]\s]*)\s*\]");
  let caps = PROB.captures(s).ok_or_else(|| GrammarError::Malformed {
    line,
    reason: format!("probability: couldn't match {} at {:?}", *PROB, s),
  })?;
  let end = caps.get(0).map_or(0, |m| m.end());
  let raw = caps.get(2).map_or("", |m| m.as_str());
  let is_log = caps.get(1).is_some();
  let bad = || GrammarError::BadProbability {
    line,
    value: raw.to_string(),
  };

  let value = raw.parse::<f32>().map_err(|_| bad())?;
  let log_prob = if is_log { value } else { value.ln() };
  if log_prob.is_nan() || log_prob > 0.0 || (!is_log && value <= 0.0) {
    return Err(bad());
  }
  Ok((log_prob, &s[end..]))
}

fn parse_rule(s: &str, line: usize) -> Result<RawRule<'_>, GrammarError> {
  #![allow(clippy::trivial_regex)]
  regex_static!(ARROW, "->");
  let malformed = |reason: String| GrammarError::Malformed { line, reason };

  let (lhs, s) = parse_name(s).map_err(|e| malformed(format!("rule symbol: {}", e)))?;
  let s = skip_whitespace(s);
  let (_, s) = needed_re(&*ARROW, s).map_err(|e| malformed(format!("rule arrow: {}", e)))?;

  let mut rhs = Vec::new();
  let mut log_prob = 0.0;
  let mut rem = s;
  loop {
    rem = skip_whitespace(rem);
    if rem.is_empty() {
      break;
    }
    if rem.starts_with('[') {
      let (p, s) = parse_probability(rem, line)?;
      log_prob = p;
      let s = skip_whitespace(s);
      if !s.is_empty() {
        return Err(malformed(format!("trailing input after probability: {:?}", s)));
      }
      break;
    }
    let (name, s) = parse_name(rem).map_err(|e| malformed(format!("rule child: {}", e)))?;
    rhs.push(name);
    rem = s;
  }

  if rhs.is_empty() {
    return Err(GrammarError::EmptyRule(lhs.to_string()));
  }
  Ok(RawRule {
    line,
    lhs,
    rhs,
    log_prob,
  })
}

fn parse_rules(s: &str) -> Result<Vec<RawRule<'_>>, GrammarError> {
  let mut rules = Vec::new();
  for (idx, text) in s.lines().enumerate() {
    let code = match text.find("//") {
      Some(comment) => &text[..comment],
      None => text,
    };
    for statement in code.split(';') {
      let statement = skip_whitespace(statement);
      if statement.is_empty() {
        continue;
      }
      rules.push(parse_rule(statement, idx + 1)?);
    }
  }
  Ok(rules)
}

#[test]
fn test_parse_toy_grammar() {
  let g: Grammar = r#"
    // toy
    S -> NP VP
    NP -> DT NN ; VP -> VB
    DT -> the
    NN -> dog [0.5]
    NN -> cat [log=-0.6931472]
    VB -> barks
  "#
  .parse()
  .unwrap();

  let sym = g.symbols();
  assert_eq!(sym.name(g.start_symbol()), "S");
  assert_eq!(g.num_nonterminals(), 6);
  assert_eq!(sym.lexicon().len(), 4);

  let nn = sym.nonterminal("NN").unwrap();
  let dog = g.terminal("dog").unwrap();
  let cat = g.terminal("cat").unwrap();
  assert!((g.lexical_log_prob(nn, dog) - 0.5f32.ln()).abs() < 1e-6);
  assert!((g.lexical_log_prob(nn, cat) - 0.5f32.ln()).abs() < 1e-6);

  let vp = sym.nonterminal("VP").unwrap();
  let vb = sym.nonterminal("VB").unwrap();
  assert_eq!(g.unary_log_prob(vp, vb), 0.0);
}

#[test]
fn test_binarizes_long_rules() {
  let g: Grammar = "S -> A B C D [0.25]\nA -> a\nB -> b\nC -> c\nD -> d"
    .parse()
    .unwrap();
  let sym = g.symbols();
  let s = g.start_symbol();
  let a = sym.nonterminal("A").unwrap();
  let bcd = sym.nonterminal("@S|B|C|D").unwrap();
  let cd = sym.nonterminal("@S|C|D").unwrap();
  let c = sym.nonterminal("C").unwrap();
  let d = sym.nonterminal("D").unwrap();

  assert!((g.binary_log_prob(s, a, bcd) - 0.25f32.ln()).abs() < 1e-6);
  assert_eq!(g.binary_log_prob(cd, c, d), 0.0);
  assert!(g.is_factored(bcd));
  assert!(!g.is_factored(a));
}

#[test]
fn test_grammar_errors() {
  assert_eq!("".parse::<Grammar>().unwrap_err(), GrammarError::Empty);
  assert_eq!(
    "// nothing here\n".parse::<Grammar>().unwrap_err(),
    GrammarError::Empty
  );
  assert_eq!(
    "S -> a [0]".parse::<Grammar>().unwrap_err(),
    GrammarError::BadProbability {
      line: 1,
      value: "0".to_string()
    }
  );
  assert!(matches!(
    "S -> a [1.5]".parse::<Grammar>(),
    Err(GrammarError::BadProbability { .. })
  ));
  assert_eq!(
    "S -> A\nA ->".parse::<Grammar>().unwrap_err(),
    GrammarError::EmptyRule("A".to_string())
  );
  assert!(matches!(
    "S -> A b\nA -> a".parse::<Grammar>(),
    Err(GrammarError::Malformed { line: 1, .. })
  ));
  assert!(matches!(
    "S A".parse::<Grammar>(),
    Err(GrammarError::Malformed { line: 1, .. })
  ));
}
