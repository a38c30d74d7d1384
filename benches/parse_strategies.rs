use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chartparse::{Grammar, Parser, ParserConfig};

const GRAMMAR_SRC: &str = include_str!("./attachment.pcfg");

fn parse(g: &Grammar, config: &ParserConfig, input: &[&str]) -> bool {
  Parser::new(g, config.clone()).parse(input).is_parse()
}

fn criterion_benchmark(c: &mut Criterion) {
  let grammar = GRAMMAR_SRC.parse::<Grammar>().unwrap();
  let input = "the old man saw the dog with the telescope in the park with the big tree"
    .split(' ')
    .collect::<Vec<_>>();

  let configs = [
    ("ecp viterbi", "strategy=ecp"),
    ("ecp hash storage", "strategy=ecp,storage=hash"),
    ("ecp segmented", "strategy=ecp,segments=4"),
    ("agenda", "strategy=agenda,over_parse_tune=2"),
    ("agenda parallel", "strategy=agenda,over_parse_tune=2,agenda_workers=4"),
    ("beam", "strategy=beam"),
    ("beam fommax", "strategy=beam,decode=fommax"),
    ("ecp goodman", "strategy=ecp,semiring=sum,decode=goodman"),
    ("ecp maxrule", "strategy=ecp,semiring=sum,decode=maxrule"),
  ];

  for (name, options) in configs {
    let config = options.parse::<ParserConfig>().unwrap();
    c.bench_function(name, |b| {
      b.iter(|| parse(black_box(&grammar), black_box(&config), black_box(&input)))
    });
  }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
