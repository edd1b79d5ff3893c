use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quicktext::{Args, LossName, ModelName, QuickText};

#[derive(Parser)]
#[command(
    about = "Word representations and text classification with subword features",
    long_about = None,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a classifier on lines of labeled text
    Supervised(TrainOptions),

    /// Train word vectors by predicting each context word from the center word
    Skipgram(TrainOptions),

    /// Train word vectors by predicting each word from its context
    Cbow(TrainOptions),

    /// Print precision and recall at K of a classifier on labeled data
    Test(QueryOptions),

    /// Print the K most likely labels of each line
    Predict(QueryOptions),

    /// Print the K most likely labels of each line, with their probabilities
    PredictProb(QueryOptions),

    /// Print vectors for words (or, for a classifier, lines) read from stdin
    PrintVectors {
        /// Model file written by training
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },
}

#[derive(clap::Args)]
struct TrainOptions {
    /// Training data
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// Output path prefix; `.bin` (and `.vec` for word vectors) is appended
    #[arg(long, value_name = "PREFIX")]
    output: PathBuf,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Number of tokens between learning rate updates
    #[arg(long, value_name = "N")]
    lr_update_rate: Option<u64>,

    /// Size of word vectors
    #[arg(long)]
    dim: Option<usize>,

    /// Size of the context window
    #[arg(long)]
    ws: Option<usize>,

    /// Number of passes over the training data
    #[arg(long)]
    epoch: Option<usize>,

    /// Minimal number of word occurrences
    #[arg(long, value_name = "N")]
    min_count: Option<u64>,

    /// Number of negatives sampled
    #[arg(long)]
    neg: Option<usize>,

    /// Max length of word n-grams
    #[arg(long, value_name = "N")]
    word_ngrams: Option<usize>,

    /// Loss function
    #[arg(long, value_enum)]
    loss: Option<LossName>,

    /// Number of buckets for hashed features
    #[arg(long)]
    bucket: Option<usize>,

    /// Min length of character n-grams
    #[arg(long)]
    minn: Option<usize>,

    /// Max length of character n-grams
    #[arg(long)]
    maxn: Option<usize>,

    /// Number of threads
    #[arg(long, value_name = "N")]
    thread: Option<usize>,

    /// Sampling threshold
    #[arg(short)]
    t: Option<f64>,

    /// Labels prefix
    #[arg(long)]
    label: Option<String>,

    /// Verbosity level
    #[arg(long)]
    verbose: Option<usize>,

    /// Slots in the vocabulary hash table
    #[arg(long, value_name = "N")]
    max_vocab_size: Option<usize>,
}

impl TrainOptions {
    fn apply(self, args: &mut Args) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(
                    if let Some(value) = self.$field {
                        args.$field = value;
                    }
                )*
            };
        }
        set!(
            lr,
            lr_update_rate,
            dim,
            ws,
            epoch,
            min_count,
            neg,
            word_ngrams,
            loss,
            bucket,
            minn,
            maxn,
            thread,
            t,
            label,
            verbose,
            max_vocab_size
        );
    }
}

#[derive(clap::Args)]
struct QueryOptions {
    /// Model file written by training
    #[arg(value_name = "MODEL")]
    model: PathBuf,

    /// Input text; `-` reads stdin
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Number of labels
    #[arg(value_name = "K", default_value_t = 1)]
    k: usize,
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let f = File::open(path).with_context(|| format!("can't open {path:?}"))?;
        Ok(Box::new(BufReader::new(f)))
    }
}

fn train(model: ModelName, options: TrainOptions) -> Result<()> {
    let mut args = match model {
        ModelName::Supervised => Args::supervised(),
        ModelName::Cbow => Args::cbow(),
        ModelName::Skipgram => Args::skipgram(),
    };
    let input = options.input.clone();
    let output = options.output.clone();
    options.apply(&mut args);

    let quicktext = QuickText::train(args, &input)?;

    let mut bin = output.clone();
    bin.as_mut_os_string().push(".bin");
    quicktext.save_model(&bin)?;
    if model != ModelName::Supervised {
        let mut vec = output;
        vec.as_mut_os_string().push(".vec");
        quicktext.save_vectors(&vec)?;
    }
    Ok(())
}

/// Loads a model and runs `run` over its input, writing to stdout.
fn query<F>(options: QueryOptions, run: F) -> Result<()>
where
    F: FnOnce(&QuickText, Box<dyn BufRead>, usize, &mut dyn Write) -> Result<()>,
{
    let quicktext = QuickText::load_model(&options.model)?;
    let input = open_input(&options.input)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    run(&quicktext, input, options.k, &mut out)?;
    out.flush().context("error writing output")?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Supervised(options) => train(ModelName::Supervised, options),
        Command::Skipgram(options) => train(ModelName::Skipgram, options),
        Command::Cbow(options) => train(ModelName::Cbow, options),
        Command::Test(options) => query(options, |quicktext, input, k, out| {
            let report = quicktext.test(input, k)?;
            writeln!(out, "{report}")?;
            Ok(())
        }),
        Command::Predict(options) => query(options, |quicktext, input, k, out| {
            quicktext.predict(input, k, false, out)
        }),
        Command::PredictProb(options) => query(options, |quicktext, input, k, out| {
            quicktext.predict(input, k, true, out)
        }),
        Command::PrintVectors { model } => {
            let quicktext = QuickText::load_model(&model)?;
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            quicktext.print_vectors(io::stdin().lock(), &mut out)?;
            out.flush().context("error writing output")?;
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
