use thiserror::Error;

/// Failure to build or read a grammar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrammarError {
  #[error("empty ruleset")]
  Empty,
  #[error("couldn't parse rule at line {line}: {reason}")]
  Malformed { line: usize, reason: String },
  #[error("invalid probability {value:?} at line {line}")]
  BadProbability { line: usize, value: String },
  #[error("start symbol {0:?} is not a non-terminal")]
  UnknownStartSymbol(String),
  #[error("{0:?} has no right-hand side")]
  EmptyRule(String),
  #[error("{count} non-terminals exceed the packing function's capacity of {max}")]
  TooManySymbols { count: usize, max: usize },
}

/// Failure to read a `ParserConfig` from its `key=value` form.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("unknown option {0:?}")]
  UnknownKey(String),
  #[error("expected key=value, got {0:?}")]
  MissingValue(String),
  #[error("invalid value {value:?} for {key}")]
  InvalidValue { key: String, value: String },
}
