use std::sync::Arc;

use chartparse::config::{ChartStorage, SearchStrategy};
use chartparse::fom::{BoundaryInOut, NormalizedInsideFom};
use chartparse::{Grammar, ParseResult, Parser, ParserConfig};

const UNAMBIGUOUS: &str = r#"
  S -> NP VP
  NP -> DT NN
  NP -> DT JJ NN [0.5]
  VP -> VB NP
  VP -> VB [0.5]
  DT -> the
  DT -> a
  JJ -> big
  NN -> dog [0.25]
  NN -> cat [0.25]
  NN -> bone [0.5]
  VB -> chases [0.5]
  VB -> sleeps [0.5]
"#;

const ATTACHMENT: &str = r#"
  S -> NP VP
  NP -> NP PP [0.3]
  NP -> DT NN [0.7]
  VP -> VB NP [0.6]
  VP -> VP PP [0.4]
  PP -> IN NP
  DT -> the
  NN -> man [0.5]
  NN -> telescope [0.5]
  VB -> saw
  IN -> with
"#;

fn exhaustive_configs() -> Vec<ParserConfig> {
  let ecp = ParserConfig::default();
  let segmented = ParserConfig {
    segments: 4,
    storage: ChartStorage::HashSlot,
    ..ParserConfig::default()
  };
  let agenda = ParserConfig {
    strategy: SearchStrategy::Agenda,
    over_parse_tune: f32::INFINITY,
    ..ParserConfig::default()
  };
  let parallel_agenda = ParserConfig {
    agenda_workers: 4,
    agenda_batch: 3,
    ..agenda.clone()
  };
  let beam = ParserConfig {
    strategy: SearchStrategy::Beam,
    beam_width: 1000,
    beam_delta: f32::INFINITY,
    ..ParserConfig::default()
  };
  vec![ecp, segmented, agenda, parallel_agenda, beam]
}

fn parse_all(g: &Grammar, words: &[&str]) -> Vec<(ParserConfig, ParseResult)> {
  exhaustive_configs()
    .into_iter()
    .map(|config| {
      let result = Parser::new(g, config.clone()).parse(words);
      (config, result)
    })
    .collect()
}

fn assert_agree(g: &Grammar, words: &[&str]) {
  let results = parse_all(g, words);
  let (_, reference) = &results[0];
  let expected = reference.tree.as_ref().map(|t| t.to_string());
  assert!(expected.is_some());
  for (config, result) in results.iter() {
    assert_eq!(result.tree.as_ref().map(|t| t.to_string()), expected, "{}", config);
    assert!((result.inside - reference.inside).abs() < 1e-5, "{}", config);
  }
}

#[test]
fn strategies_agree_on_an_unambiguous_grammar() {
  let g: Grammar = UNAMBIGUOUS.parse().unwrap();
  assert_agree(&g, &["the", "dog", "chases", "a", "big", "cat"]);
  assert_agree(&g, &["a", "big", "dog", "sleeps"]);
  assert_agree(&g, &["the", "cat", "chases", "the", "bone"]);
}

#[test]
fn strategies_agree_on_the_best_attachment() {
  let g: Grammar = ATTACHMENT.parse().unwrap();
  let words = "the man saw the man with the telescope".split(' ').collect::<Vec<_>>();
  assert_agree(&g, &words);

  let result = Parser::new(&g, ParserConfig::default()).parse(&words);
  assert_eq!(
    result.tree.unwrap().to_string(),
    concat!(
      "(S (NP (DT the)(NN man))",
      "(VP (VP (VB saw)(NP (DT the)(NN man)))(PP (IN with)(NP (DT the)(NN telescope)))))",
    )
  );
}

#[test]
fn every_strategy_reports_no_parse() {
  let g: Grammar = UNAMBIGUOUS.parse().unwrap();
  for (config, result) in parse_all(&g, &["the", "dog", "chases", "the", "unicorn"]) {
    assert!(!result.is_parse(), "{}", config);
  }
  for (config, result) in parse_all(&g, &["dog", "the", "sleeps"]) {
    assert!(!result.is_parse(), "{}", config);
  }
}

#[test]
fn figures_of_merit_drive_the_same_exhaustive_result() {
  let g: Grammar = ATTACHMENT.parse().unwrap();
  let words = "the man saw the man with the telescope".split(' ').collect::<Vec<_>>();
  let expected = Parser::new(&g, ParserConfig::default()).parse(&words);

  let foms: Vec<Arc<dyn chartparse::fom::FigureOfMerit>> =
    vec![Arc::new(NormalizedInsideFom), Arc::new(BoundaryInOut::uniform(&g))];
  for fom in foms {
    for config in exhaustive_configs().into_iter().skip(2) {
      let result = Parser::new(&g, config.clone()).with_fom(Arc::clone(&fom)).parse(&words);
      assert_eq!(result.tree, expected.tree, "{} {:?}", config, fom);
    }
  }
}

#[test]
fn narrow_beams_still_produce_well_formed_trees() {
  let g: Grammar = ATTACHMENT.parse().unwrap();
  let words = "the man saw the man with the telescope".split(' ').collect::<Vec<_>>();
  for width in 1..4 {
    let config = ParserConfig {
      strategy: SearchStrategy::Beam,
      beam_width: width,
      ..ParserConfig::default()
    };
    let result = Parser::new(&g, config).parse(&words);
    if let Some(tree) = result.tree {
      assert_eq!(tree.leaves(), words);
    }
    assert!(result.stats.edges_added > 0);
  }
}

#[test]
fn parser_is_shared_between_threads() {
  let g: Grammar = UNAMBIGUOUS.parse().unwrap();
  let parser = Parser::new(&g, ParserConfig::default());
  let sentences = [
    vec!["the", "dog", "sleeps"],
    vec!["a", "cat", "chases", "the", "bone"],
    vec!["the", "big", "dog", "sleeps"],
  ];
  std::thread::scope(|scope| {
    for words in sentences.iter() {
      let parser = &parser;
      scope.spawn(move || {
        let tree = parser.parse(words).tree.unwrap();
        assert_eq!(tree.leaves(), *words);
      });
    }
  });
}
