use std::env;
use std::io;
use std::io::Write;
use std::process;

use chartparse::chart::ChartDisplay;
use chartparse::{Err, Grammar, Parser, ParserConfig};
use tracing_subscriber::EnvFilter;

fn usage(prog_name: &str) -> String {
  format!(
    r"Usage: {} FILE [options]

Reads sentences from stdin, one per line, and prints the best parse of each.

Options:
  -h, --help            Print this message
  -c, --chart           Print the parse chart (defaults to not printing)
  -s, --stats           Print search statistics
  --config OPTIONS      Parser options as key=value pairs, e.g.
                        strategy=beam,beam_width=20,decode=maxrule,semiring=sum

Set RUST_LOG (e.g. RUST_LOG=chartparse=debug) for tracing output.",
    prog_name
  )
}

fn parse(parser: &Parser, sentence: &str, opts: &Args) -> Result<(), Err> {
  let sentence = sentence.split_whitespace().collect::<Vec<_>>();
  let result = parser.parse(&sentence);

  if opts.print_chart {
    println!(
      "chart:\n{}",
      ChartDisplay::new(result.chart.as_chart(), parser.grammar().symbols())
    );
  }

  match &result.tree {
    Some(tree) => println!("{}", tree),
    None => println!("()"),
  }

  if opts.print_stats {
    println!(
      "inside={:.5} considered={} added={} pushes={} pops={} time={:?}",
      result.inside,
      result.stats.edges_considered,
      result.stats.edges_added,
      result.stats.agenda_pushes,
      result.stats.agenda_pops,
      result.stats.elapsed
    );
  }

  Ok(())
}

struct Args {
  filename: String,
  config: ParserConfig,
  print_chart: bool,
  print_stats: bool,
}

impl Args {
  fn make_error_message(msg: &str, prog_name: impl AsRef<str>) -> String {
    format!("argument error: {}.\n\n{}", msg, usage(prog_name.as_ref()))
  }

  fn parse(v: Vec<String>) -> Result<Self, String> {
    let mut iter = v.into_iter();
    let Some(prog_name) = iter.next() else {
      return Err(Self::make_error_message("bad argument vector", "chartparse"));
    };

    let mut filename: Option<String> = None;
    let mut config = ParserConfig::default();
    let mut print_chart = false;
    let mut print_stats = false;

    while let Some(o) = iter.next() {
      if o == "-h" || o == "--help" {
        println!("{}", usage(&prog_name));
        process::exit(0);
      } else if o == "-c" || o == "--chart" {
        print_chart = true;
      } else if o == "-s" || o == "--stats" {
        print_stats = true;
      } else if o == "--config" {
        let Some(options) = iter.next() else {
          return Err(Self::make_error_message("--config needs a value", prog_name));
        };
        config = options
          .parse()
          .map_err(|e| Self::make_error_message(&format!("{}", e), &prog_name))?;
      } else if filename.is_none() {
        filename = Some(o);
      } else {
        return Err(Self::make_error_message("invalid arguments", prog_name));
      }
    }

    if let Some(filename) = filename {
      Ok(Self {
        filename,
        config,
        print_chart,
        print_stats,
      })
    } else {
      Err(Self::make_error_message("missing filename", prog_name))
    }
  }
}

fn main() -> Result<(), Err> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  let opts = match Args::parse(env::args().collect()) {
    Ok(opts) => opts,
    Err(msg) => {
      eprintln!("{}", msg);
      process::exit(255);
    }
  };

  let g = Grammar::read_from_file(&opts.filename)?;
  tracing::info!(
    nonterminals = g.num_nonterminals(),
    productions = g.productions().len(),
    config = %opts.config,
    "loaded grammar"
  );
  let parser = Parser::new(&g, opts.config.clone());

  let mut input = String::new();
  loop {
    print!("> ");
    io::stdout().flush()?;

    input.clear();
    if io::stdin().read_line(&mut input)? == 0 {
      // ctrl+d
      return Ok(());
    }
    let line = input.trim();
    if !line.is_empty() {
      parse(&parser, line, &opts)?;
    }
  }
}
