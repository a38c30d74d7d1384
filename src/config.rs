//! Parser options, fixed for the lifetime of a `Parser`.
//!
//! Options can be written as a comma-separated `key=value` list:
//!
//! ```
//! use chartparse::config::{DecodeMethod, ParserConfig, SearchStrategy};
//!
//! let config: ParserConfig = "strategy=beam,beam_width=20,decode=fommax".parse().unwrap();
//! assert_eq!(config.strategy, SearchStrategy::Beam);
//! assert_eq!(config.decode, DecodeMethod::FomMax);
//! assert_eq!(config.beam_width, 20);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::utils::DEFAULT_LOG_SUM_DELTA;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
  ExhaustiveCellCross,
  Agenda,
  Beam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartStorage {
  HashSlot,
  PackedArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMethod {
  ViterbiMax,
  Goodman,
  SplitSum,
  MaxRuleProd,
  FomMax,
  FomSum,
}

impl DecodeMethod {
  /// Whether the decoder reads outside probabilities.
  pub fn needs_outside(self) -> bool {
    matches!(self, Self::Goodman | Self::SplitSum | Self::MaxRuleProd)
  }
}

/// How competing derivations of one entry combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semiring {
  /// Keep the best derivation.
  Viterbi,
  /// Accumulate every derivation in log space.
  Sum,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
  pub strategy: SearchStrategy,
  /// Storage used by the cell-by-cell strategies; the agenda parser always uses hash slots.
  pub storage: ChartStorage,
  pub decode: DecodeMethod,
  /// Inside accumulation of the exhaustive parser. Posterior decoders re-sum the chart
  /// regardless.
  pub semiring: Semiring,
  /// Most edges committed per cell by the beam parser.
  pub beam_width: usize,
  /// Edges scoring further than this below a cell's best are pruned. `inf` disables it.
  pub beam_delta: f32,
  /// After the first complete parse the agenda parser keeps popping until
  /// `pops * over_parse_tune` edges have been popped.
  pub over_parse_tune: f32,
  /// Goodman / split-sum precision bias for spans longer than one.
  pub lambda: f32,
  pub log_sum_delta: f32,
  pub approximate_sum: bool,
  /// Score max-rule candidates without their children's q.
  pub local_max_rule: bool,
  /// Left-child segments computed in parallel per cell by the exhaustive parser.
  pub segments: usize,
  pub agenda_workers: usize,
  /// Edges a worker pops per visit to the shared agenda.
  pub agenda_batch: usize,
}

impl Default for ParserConfig {
  fn default() -> Self {
    Self {
      strategy: SearchStrategy::ExhaustiveCellCross,
      storage: ChartStorage::PackedArray,
      decode: DecodeMethod::ViterbiMax,
      semiring: Semiring::Viterbi,
      beam_width: 15,
      beam_delta: 7.0,
      over_parse_tune: 1.0,
      lambda: 0.0,
      log_sum_delta: DEFAULT_LOG_SUM_DELTA,
      approximate_sum: false,
      local_max_rule: false,
      segments: 1,
      agenda_workers: 1,
      agenda_batch: 100,
    }
  }
}

fn invalid(key: &str, value: &str) -> ConfigError {
  ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  }
}

fn parse_count(key: &str, value: &str) -> Result<usize, ConfigError> {
  match value.parse::<usize>() {
    Ok(n) if n > 0 => Ok(n),
    _ => Err(invalid(key, value)),
  }
}

fn parse_float(key: &str, value: &str, valid: fn(f32) -> bool) -> Result<f32, ConfigError> {
  match value.parse::<f32>() {
    Ok(f) if valid(f) => Ok(f),
    _ => Err(invalid(key, value)),
  }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value {
    "true" | "yes" | "1" => Ok(true),
    "false" | "no" | "0" => Ok(false),
    _ => Err(invalid(key, value)),
  }
}

impl ParserConfig {
  /// Applies a single `key=value` option.
  fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
      "strategy" => {
        self.strategy = match value {
          "ecp" | "exhaustive" => SearchStrategy::ExhaustiveCellCross,
          "agenda" => SearchStrategy::Agenda,
          "beam" => SearchStrategy::Beam,
          _ => return Err(invalid(key, value)),
        }
      }
      "storage" => {
        self.storage = match value {
          "hash" => ChartStorage::HashSlot,
          "packed" => ChartStorage::PackedArray,
          _ => return Err(invalid(key, value)),
        }
      }
      "decode" => {
        self.decode = match value {
          "viterbi" => DecodeMethod::ViterbiMax,
          "goodman" | "maxc" => DecodeMethod::Goodman,
          "splitsum" => DecodeMethod::SplitSum,
          "maxrule" => DecodeMethod::MaxRuleProd,
          "fommax" => DecodeMethod::FomMax,
          "fomsum" => DecodeMethod::FomSum,
          _ => return Err(invalid(key, value)),
        }
      }
      "semiring" => {
        self.semiring = match value {
          "viterbi" | "max" => Semiring::Viterbi,
          "sum" | "real" => Semiring::Sum,
          _ => return Err(invalid(key, value)),
        }
      }
      "beam_width" => self.beam_width = parse_count(key, value)?,
      "beam_delta" => self.beam_delta = parse_float(key, value, |f| f > 0.0)?,
      "over_parse_tune" => self.over_parse_tune = parse_float(key, value, |f| f >= 1.0)?,
      "lambda" => self.lambda = parse_float(key, value, f32::is_finite)?,
      "log_sum_delta" => self.log_sum_delta = parse_float(key, value, |f| f > 0.0)?,
      "approximate_sum" => self.approximate_sum = parse_bool(key, value)?,
      "local_max_rule" => self.local_max_rule = parse_bool(key, value)?,
      "segments" => self.segments = parse_count(key, value)?,
      "agenda_workers" => self.agenda_workers = parse_count(key, value)?,
      "agenda_batch" => self.agenda_batch = parse_count(key, value)?,
      _ => return Err(ConfigError::UnknownKey(key.to_string())),
    }
    Ok(())
  }
}

impl FromStr for ParserConfig {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut config = Self::default();
    for option in s.split(',').map(str::trim).filter(|o| !o.is_empty()) {
      let (key, value) = option
        .split_once('=')
        .ok_or_else(|| ConfigError::MissingValue(option.to_string()))?;
      config.set(key.trim(), value.trim())?;
    }

    if matches!(config.decode, DecodeMethod::FomMax | DecodeMethod::FomSum)
      && config.strategy != SearchStrategy::Beam
    {
      return Err(invalid("decode", "fom decoding requires strategy=beam"));
    }
    Ok(config)
  }
}

impl fmt::Display for ParserConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "strategy={:?} storage={:?} decode={:?} semiring={:?}",
      self.strategy, self.storage, self.decode, self.semiring
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_string_is_default() {
    assert_eq!("".parse::<ParserConfig>().unwrap(), ParserConfig::default());
  }

  #[test]
  fn parses_every_kind_of_option() {
    let config: ParserConfig =
      "strategy=agenda, storage=hash, decode=maxrule, semiring=sum, beam_delta=inf, \
       over_parse_tune=3, lambda=0.5, approximate_sum=true, agenda_workers=4, agenda_batch=10"
        .parse()
        .unwrap();
    assert_eq!(config.strategy, SearchStrategy::Agenda);
    assert_eq!(config.storage, ChartStorage::HashSlot);
    assert_eq!(config.decode, DecodeMethod::MaxRuleProd);
    assert_eq!(config.semiring, Semiring::Sum);
    assert_eq!(config.beam_delta, f32::INFINITY);
    assert_eq!(config.over_parse_tune, 3.0);
    assert_eq!(config.lambda, 0.5);
    assert!(config.approximate_sum);
    assert_eq!(config.agenda_workers, 4);
    assert_eq!(config.agenda_batch, 10);
  }

  #[test]
  fn rejects_bad_options() {
    assert_eq!(
      "colour=blue".parse::<ParserConfig>(),
      Err(ConfigError::UnknownKey("colour".to_string()))
    );
    assert_eq!(
      "beam_width".parse::<ParserConfig>(),
      Err(ConfigError::MissingValue("beam_width".to_string()))
    );
    assert!("beam_width=0".parse::<ParserConfig>().is_err());
    assert!("strategy=dfs".parse::<ParserConfig>().is_err());
    assert!("over_parse_tune=0.5".parse::<ParserConfig>().is_err());
    assert!("decode=fomsum".parse::<ParserConfig>().is_err());
    assert!("strategy=beam,decode=fomsum".parse::<ParserConfig>().is_ok());
  }
}
