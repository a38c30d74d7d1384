//! Search strategies that populate a chart, and the `Parser` that runs one of them
//! followed by a decoder.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, debug_span};

use crate::chart::{Backpointer, ChartEntry, ChartStore};
use crate::config::{ParserConfig, SearchStrategy};
use crate::decode;
use crate::fom::{FigureOfMerit, InsideFom};
use crate::grammar::Grammar;
use crate::symbols::{NonTerminal, Terminal};
use crate::syntree::SynTree;

pub mod agenda;
pub mod beam;
pub mod ecp;

pub use beam::FomTable;

/// A tokenized input sentence, with each word resolved against the grammar's lexicon.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
  words: Vec<String>,
  terminals: Vec<Option<Terminal>>,
}

impl Sentence {
  /// Words the grammar doesn't know resolve to `None`; their span-1 cells stay empty.
  pub fn new(grammar: &Grammar, words: &[&str]) -> Self {
    Self {
      words: words.iter().map(|w| w.to_string()).collect(),
      terminals: words.iter().map(|w| grammar.terminal(w)).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.words.len()
  }

  pub fn is_empty(&self) -> bool {
    self.words.is_empty()
  }

  pub fn words(&self) -> &[String] {
    &self.words
  }

  pub fn terminals(&self) -> &[Option<Terminal>] {
    &self.terminals
  }
}

/// A candidate entry that has not been committed to the chart.
///
/// Edges order by figure of merit alone, so a `BinaryHeap<Edge>` pops the most
/// promising edge first.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
  pub start: usize,
  pub end: usize,
  pub parent: NonTerminal,
  pub inside: f32,
  pub backpointer: Backpointer,
  pub fom: f32,
}

impl Edge {
  pub fn entry(&self) -> ChartEntry {
    ChartEntry::new(self.parent, self.inside, self.backpointer)
  }
}

impl PartialEq for Edge {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Edge {
  fn cmp(&self, other: &Self) -> Ordering {
    self.fom.total_cmp(&other.fom)
  }
}

/// Counters collected while parsing. Best effort when several workers share a chart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseStats {
  /// Candidate derivations scored.
  pub edges_considered: usize,
  /// Derivations written to the chart.
  pub edges_added: usize,
  pub agenda_pushes: usize,
  pub agenda_pops: usize,
  pub elapsed: Duration,
}

/// A populated chart, plus the beam parser's figure-of-merit derivations when it ran.
#[derive(Debug)]
pub struct SearchResult {
  pub chart: ChartStore,
  pub fom_table: Option<FomTable>,
}

#[derive(Debug)]
pub struct ParseResult {
  /// `None` when the root cell never received the start symbol.
  pub tree: Option<SynTree<String, String>>,
  /// Inside log probability of the start symbol over the whole sentence.
  pub inside: f32,
  pub stats: ParseStats,
  /// The chart the tree was decoded from, including outside probabilities if the
  /// decoder computed them.
  pub chart: ChartStore,
}

impl ParseResult {
  pub fn is_parse(&self) -> bool {
    self.tree.is_some()
  }
}

/// Parses sentences against one grammar with a fixed configuration.
///
/// A `Parser` holds only shared references, so one instance can parse many sentences
/// from many threads at once.
#[derive(Debug, Clone)]
pub struct Parser<'g> {
  grammar: &'g Grammar,
  config: ParserConfig,
  fom: Arc<dyn FigureOfMerit>,
}

impl<'g> Parser<'g> {
  pub fn new(grammar: &'g Grammar, config: ParserConfig) -> Self {
    Self {
      grammar,
      config,
      fom: Arc::new(InsideFom),
    }
  }

  /// Replaces the figure of merit used by the agenda and beam strategies.
  pub fn with_fom(mut self, fom: Arc<dyn FigureOfMerit>) -> Self {
    self.fom = fom;
    self
  }

  pub fn grammar(&self) -> &'g Grammar {
    self.grammar
  }

  pub fn config(&self) -> &ParserConfig {
    &self.config
  }

  pub fn fom(&self) -> &dyn FigureOfMerit {
    self.fom.as_ref()
  }

  /// Populates a chart for `sentence` with the configured search strategy.
  pub fn search(&self, sentence: &Sentence, stats: &mut ParseStats) -> SearchResult {
    match self.config.strategy {
      SearchStrategy::ExhaustiveCellCross => SearchResult {
        chart: ecp::parse(self, sentence, stats),
        fom_table: None,
      },
      SearchStrategy::Agenda => SearchResult {
        chart: ChartStore::HashSlot(agenda::parse(self, sentence, stats)),
        fom_table: None,
      },
      SearchStrategy::Beam => {
        let (chart, table) = beam::parse(self, sentence, stats);
        SearchResult {
          chart,
          fom_table: Some(table),
        }
      }
    }
  }

  pub fn parse(&self, words: &[&str]) -> ParseResult {
    let _span = debug_span!("parse", words = words.len()).entered();
    let started = Instant::now();
    let sentence = Sentence::new(self.grammar, words);
    let mut stats = ParseStats::default();

    let searched = self.search(&sentence, &mut stats);
    let (tree, chart) = decode::decode(self.grammar, &self.config, &sentence, searched);

    let n = sentence.len();
    let start = self.grammar.start_symbol();
    let inside = if n > 0 {
      chart.as_chart().inside(0, n, start)
    } else {
      f32::NEG_INFINITY
    };
    stats.elapsed = started.elapsed();

    debug!(
      strategy = ?self.config.strategy,
      decode = ?self.config.decode,
      words = n,
      edges_considered = stats.edges_considered,
      edges_added = stats.edges_added,
      agenda_pops = stats.agenda_pops,
      parsed = tree.is_some(),
      elapsed = ?stats.elapsed,
      "parsed sentence"
    );

    ParseResult {
      tree,
      inside,
      stats,
      chart,
    }
  }
}
