//! Turning a populated chart into a tree.
//!
//! Every decoder returns `None` when the root cell lacks the start symbol. Trees come
//! back unfactored: binarization symbols and unlabelled constituents are spliced away.
//!
//! The posterior decoders need true posteriors whatever strategy or semiring filled the
//! chart, so they re-sum inside probabilities over the compacted chart before the
//! outside pass.

use tracing::{debug, warn};

use crate::chart::{extract_viterbi, Accumulator, Chart, ChartStore};
use crate::config::{DecodeMethod, ParserConfig};
use crate::grammar::Grammar;
use crate::parser::{SearchResult, Sentence};
use crate::syntree::SynTree;

pub mod maxc;
pub mod maxrule;

/// Decodes `searched` with the configured method. The returned chart is the one the
/// tree was read from: posterior decoders hand back the packed chart with summed inside
/// and outside probabilities filled in.
pub fn decode(
  grammar: &Grammar,
  config: &ParserConfig,
  sentence: &Sentence,
  searched: SearchResult,
) -> (Option<SynTree<String, String>>, ChartStore) {
  let symbols = grammar.symbols();
  let words = sentence.words();
  let start = grammar.start_symbol();

  if config.decode.needs_outside() {
    let mut chart = searched.chart.into_packed(grammar);
    let tree = if chart.has_parse(start) {
      let acc = Accumulator::sum(config);
      chart.compute_inside(grammar, sentence.terminals(), &acc);
      chart.compute_outside(grammar, &acc);
      debug!(z = chart.inside(0, chart.size(), start), "summed inside-outside");
      match config.decode {
        DecodeMethod::Goodman => maxc::goodman(&chart, grammar, config, words),
        DecodeMethod::SplitSum => maxc::split_sum(&chart, grammar, config, words),
        _ => maxrule::max_rule_product(&chart, grammar, config, sentence),
      }
    } else {
      None
    };
    return (tree.map(SynTree::unfactor), ChartStore::PackedArray(chart));
  }

  let tree = match (config.decode, &searched.fom_table) {
    (DecodeMethod::FomMax | DecodeMethod::FomSum, Some(table)) => {
      table.extract(symbols, words, start).or_else(|| {
        let tree = extract_viterbi(searched.chart.as_chart(), symbols, words, start);
        if tree.is_some() {
          warn!("root has no figure-of-merit derivation, decoding viterbi");
        }
        tree
      })
    }
    (DecodeMethod::FomMax | DecodeMethod::FomSum, None) => {
      warn!(decode = ?config.decode, "no figure-of-merit derivations recorded, decoding viterbi");
      extract_viterbi(searched.chart.as_chart(), symbols, words, start)
    }
    _ => extract_viterbi(searched.chart.as_chart(), symbols, words, start),
  };
  (tree.map(SynTree::unfactor), searched.chart)
}
