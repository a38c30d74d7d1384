use chartparse::chart::{Backpointer, Chart, ChartEntry, HashSlotChart, PackedArrayChart};
use chartparse::packing::{Children, PackingFunction};
use chartparse::{Grammar, Parser, ParserConfig};
use proptest::prelude::*;

const GRAMMAR: &str = r#"
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

fn grammar() -> Grammar {
  GRAMMAR.parse().unwrap()
}

// "the man saw the man" followed by any number of "with the telescope"
fn sentence(attachments: usize) -> Vec<&'static str> {
  let mut words = vec!["the", "man", "saw", "the", "man"];
  for _ in 0..attachments {
    words.extend(["with", "the", "telescope"]);
  }
  words
}

proptest! {
  #[test]
  fn packing_round_trips(
    size in 2usize..5000,
    left in 0u32..5000,
    right in 0u32..5000,
    word in 0u32..100_000,
  ) {
    let pf = PackingFunction::new(size).unwrap();
    let (left, right) = (left % size as u32, right % size as u32);

    let packed = pf.pack(left, right);
    prop_assert!(packed >= 0 && packed < pf.binary_limit());
    prop_assert_eq!(pf.unpack(packed), Children::Binary(left, right));
    prop_assert_eq!(pf.unpack(pf.pack_unary(left)), Children::Unary(left));
    prop_assert_eq!(pf.unpack(pf.pack_lexical(word)), Children::Lexical(word));
    prop_assert_ne!(pf.pack_unary(left), pf.pack_lexical(word));
    prop_assert!(pf.pack_unary(left) < 0 && pf.pack_lexical(word) < 0);
  }

  #[test]
  fn chart_entries_only_improve(scores in prop::collection::vec((0u32..4, -50.0f32..0.0), 1..40)) {
    let g = grammar();
    let hash = HashSlotChart::new(3, &g);
    let mut packed = PackedArrayChart::new(3, &g);
    let mut best = [f32::NEG_INFINITY; 4];

    for (nt, inside) in scores {
      let entry = ChartEntry::new(nt, inside, Backpointer::Unary { child: 0 });
      let improves = inside > best[nt as usize];
      prop_assert_eq!(hash.install(0, 2, entry), improves);
      prop_assert_eq!(packed.update_inside(0, 2, entry), improves);
      if improves {
        best[nt as usize] = inside;
      }
      for nt in 0..4 {
        prop_assert_eq!(hash.inside(0, 2, nt), best[nt as usize]);
        prop_assert_eq!(packed.inside(0, 2, nt), best[nt as usize]);
      }
    }

    let installed = best.iter().filter(|b| **b > f32::NEG_INFINITY).count();
    prop_assert_eq!(hash.entries(0, 2).len(), installed);
    prop_assert_eq!(packed.entries(0, 2).len(), installed);
    prop_assert!(packed.entries(0, 2).windows(2).all(|w| w[0].nonterminal < w[1].nonterminal));
  }

  #[test]
  fn every_decoder_preserves_the_words(
    attachments in 0usize..3,
    decode in 0usize..4,
    strategy in 0usize..3,
  ) {
    let g = grammar();
    let words = sentence(attachments);
    let config: ParserConfig = format!(
      "strategy={},decode={},semiring=sum,beam_width=50,beam_delta=inf,over_parse_tune=inf",
      ["ecp", "agenda", "beam"][strategy],
      ["viterbi", "goodman", "splitsum", "maxrule"][decode],
    )
    .parse()
    .unwrap();

    let result = Parser::new(&g, config).parse(&words);
    let tree = result.tree.unwrap();
    prop_assert_eq!(tree.leaves(), words.iter().collect::<Vec<_>>());
    prop_assert_eq!(tree.span(), (0, words.len()));
    prop_assert!(result.inside <= 0.0);
  }

  #[test]
  fn parse_probability_never_exceeds_the_sum(attachments in 0usize..3) {
    let g = grammar();
    let words = sentence(attachments);
    let viterbi = Parser::new(&g, ParserConfig::default()).parse(&words);
    let total = Parser::new(&g, "semiring=sum".parse().unwrap()).parse(&words);
    prop_assert!(viterbi.inside <= total.inside + 1e-5);
  }
}
