use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::args::{Args, LossName, ModelName};
use crate::codec;
use crate::dictionary::{Dictionary, EntryType, TokenReader, EOS};
use crate::matrix::Matrix;
use crate::model::{Model, Targets};
use crate::real;
use crate::train::Trainer;
use crate::vector::Vector;

/// A trained model: dictionary plus parameter matrices.
pub struct QuickText {
    args: Args,
    dict: Dictionary,
    input: Matrix,
    output: Matrix,
    targets: Targets,
}

/// Precision and recall at `k` over a labeled file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestReport {
    pub k: usize,
    pub precision: f64,
    pub recall: f64,
    pub examples: usize,
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "P@{}: {:.3}", self.k, self.precision)?;
        writeln!(f, "R@{}: {:.3}", self.k, self.recall)?;
        write!(f, "Number of examples: {}", self.examples)
    }
}

fn target_kind(args: &Args) -> EntryType {
    if args.model == ModelName::Supervised {
        EntryType::Label
    } else {
        EntryType::Word
    }
}

impl QuickText {
    /// Builds the vocabulary from `corpus` and trains a model on it.
    pub fn train(mut args: Args, corpus: &Path) -> Result<Self> {
        args.validate()?;
        let f = File::open(corpus)
            .with_context(|| format!("can't open training data {corpus:?}"))?;
        let mut dict = Dictionary::new(args.clone());
        dict.read_from_file(BufReader::new(f))?;

        if args.model == ModelName::Supervised && dict.nlabels() == 0 {
            bail!("no labels found in {corpus:?}; labels start with {:?}", args.label);
        }
        if args.loss == LossName::Polarization {
            if dict.nlabels() == 0 {
                bail!("the polarization loss needs labels in the training data");
            }
            args.dim = dict.nlabels();
        }

        let mut input = Matrix::new(dict.nwords() + args.bucket, args.dim)?;
        if args.loss == LossName::Polarization {
            init_polarization(&input, &dict, args.dim);
        } else {
            input.uniform(1.0 / args.dim as real, &mut StdRng::seed_from_u64(1));
        }
        let output = Matrix::new(codec::output_rows(&args, &dict), args.dim)?;
        let counts = dict.get_counts(target_kind(&args));
        let targets = Targets::new(args.loss, &counts, &mut StdRng::seed_from_u64(0));

        Trainer {
            args: &args,
            dict: &dict,
            input: &input,
            output: &output,
            targets: &targets,
            corpus,
        }
        .run()?;

        Ok(QuickText {
            args,
            dict,
            input,
            output,
            targets,
        })
    }

    pub fn load_model(path: &Path) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("can't open model file {path:?}"))?;
        let (args, dict, input, output) = codec::load_model(&mut BufReader::new(f))
            .with_context(|| format!("error loading model {path:?}"))?;
        let targets = Targets::for_inference(args.loss, &dict.get_counts(target_kind(&args)));
        info!(
            nwords = dict.nwords(),
            nlabels = dict.nlabels(),
            dim = args.dim,
            "loaded model {path:?}"
        );
        Ok(QuickText {
            args,
            dict,
            input,
            output,
            targets,
        })
    }

    pub fn save_model(&self, path: &Path) -> Result<()> {
        let f = File::create(path).with_context(|| format!("can't create model file {path:?}"))?;
        codec::save_model(
            &mut BufWriter::new(f),
            &self.args,
            &self.dict,
            &self.input,
            &self.output,
        )
        .with_context(|| format!("error saving model {path:?}"))?;
        info!("saved model {path:?}");
        Ok(())
    }

    /// Writes every word's vector in the text `.vec` format.
    pub fn save_vectors(&self, path: &Path) -> Result<()> {
        let f = File::create(path).with_context(|| format!("can't create {path:?}"))?;
        let mut out = BufWriter::new(f);
        writeln!(out, "{} {}", self.dict.nwords(), self.args.dim)?;
        for id in 0..self.dict.nwords() {
            let word = self.dict.get_word(id);
            writeln!(out, "{word} {}", self.get_vector(word))
                .with_context(|| format!("error writing {path:?}"))?;
        }
        out.flush().with_context(|| format!("error writing {path:?}"))?;
        info!("saved word vectors {path:?}");
        Ok(())
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn input_matrix(&self) -> &Matrix {
        &self.input
    }

    pub fn output_matrix(&self) -> &Matrix {
        &self.output
    }

    fn engine(&self) -> Model<'_> {
        Model::new(&self.input, &self.output, &self.targets, &self.args, 0)
    }

    fn mean_of_rows(&self, ids: &[usize]) -> Vector {
        let mut vec = Vector::new(self.args.dim);
        for &id in ids {
            vec.add_row(&self.input, id, 1.0);
        }
        if !ids.is_empty() {
            vec.mul(1.0 / ids.len() as real);
        }
        vec
    }

    /// Mean of the word's subword rows. Works for words not in the
    /// vocabulary as long as they have character n-grams.
    pub fn get_vector(&self, word: &str) -> Vector {
        self.mean_of_rows(&self.dict.get_ngrams_for_word(word))
    }

    /// For each whitespace-separated word of `input`, prints the word and its vector.
    pub fn word_vectors<R: BufRead, W: Write + ?Sized>(&self, input: R, out: &mut W) -> Result<()> {
        let mut reader = TokenReader::new(input);
        let mut word = String::new();
        while reader.read_word(&mut word).context("error reading words")? {
            if word == EOS {
                continue;
            }
            writeln!(out, "{word} {}", self.get_vector(&word))?;
        }
        Ok(())
    }

    /// For each line of `input`, prints the mean of its feature rows.
    pub fn text_vectors<R: BufRead, W: Write + ?Sized>(&self, input: R, out: &mut W) -> Result<()> {
        let mut reader = TokenReader::new(input);
        let mut rng = StdRng::seed_from_u64(0);
        let (mut line, mut labels) = (vec![], vec![]);
        while !reader.at_end().context("error reading text")? {
            self.dict
                .read_line(&mut reader, &mut line, &mut labels, &mut rng)
                .context("error reading text")?;
            self.dict.add_ngrams(&mut line, self.args.word_ngrams);
            writeln!(out, "{}", self.mean_of_rows(&line))?;
        }
        Ok(())
    }

    /// Sentence vectors for classifiers, word vectors otherwise.
    pub fn print_vectors<R: BufRead, W: Write + ?Sized>(&self, input: R, out: &mut W) -> Result<()> {
        if self.args.model == ModelName::Supervised {
            self.text_vectors(input, out)
        } else {
            self.word_vectors(input, out)
        }
    }

    fn check_supervised(&self) -> Result<()> {
        if self.args.model != ModelName::Supervised {
            bail!("this model was not trained with labels; use a supervised model");
        }
        Ok(())
    }

    /// For each line of `input`, prints up to `k` labels, each followed by
    /// its probability if `print_prob` is set. Lines without known words
    /// print `n/a`.
    pub fn predict<R: BufRead, W: Write + ?Sized>(
        &self,
        input: R,
        k: usize,
        print_prob: bool,
        out: &mut W,
    ) -> Result<()> {
        self.check_supervised()?;
        let mut model = self.engine();
        let mut reader = TokenReader::new(input);
        let (mut line, mut labels) = (vec![], vec![]);
        while !reader.at_end().context("error reading input")? {
            self.dict
                .read_line(&mut reader, &mut line, &mut labels, &mut model.rng)
                .context("error reading input")?;
            self.dict.add_ngrams(&mut line, self.args.word_ngrams);
            if line.is_empty() {
                writeln!(out, "n/a")?;
                continue;
            }
            let predictions = model.predict(&line, k);
            let mut fields = Vec::with_capacity(predictions.len());
            for (score, label) in predictions {
                let label = self.dict.get_label(label);
                if print_prob {
                    fields.push(format!("{label} {}", score.exp()));
                } else {
                    fields.push(label.to_string());
                }
            }
            writeln!(out, "{}", fields.join(" "))?;
        }
        Ok(())
    }

    /// Precision and recall at `k` over every line of `input` that has
    /// both labels and known words.
    pub fn test<R: BufRead>(&self, input: R, k: usize) -> Result<TestReport> {
        self.check_supervised()?;
        if k == 0 {
            bail!("k must be positive");
        }
        let mut model = self.engine();
        let mut reader = TokenReader::new(input);
        let (mut line, mut labels) = (vec![], vec![]);
        let mut examples = 0;
        let mut nlabels = 0;
        let mut correct = 0;
        while !reader.at_end().context("error reading test data")? {
            self.dict
                .read_line(&mut reader, &mut line, &mut labels, &mut model.rng)
                .context("error reading test data")?;
            self.dict.add_ngrams(&mut line, self.args.word_ngrams);
            if labels.is_empty() || line.is_empty() {
                continue;
            }
            correct += model
                .predict(&line, k)
                .iter()
                .filter(|(_, label)| labels.contains(label))
                .count();
            examples += 1;
            nlabels += labels.len();
        }

        let ratio = |num: usize, den: usize| {
            if den == 0 {
                0.0
            } else {
                num as f64 / den as f64
            }
        };
        Ok(TestReport {
            k,
            precision: ratio(correct, k * examples),
            recall: ratio(correct, nlabels),
            examples,
        })
    }
}

/// Starts every word at its label indicator, scaled to sum to one, and
/// every n-gram bucket at a uniform `1/dim`.
fn init_polarization(input: &Matrix, dict: &Dictionary, dim: usize) {
    for id in 0..dict.nwords() {
        let labels = dict.get_labels(id);
        if labels.is_empty() {
            continue;
        }
        let indicator = Vector::from_indices(dim, &labels);
        input.add_row(&indicator, id, 1.0 / labels.len() as real);
    }
    let mut ones = Vector::new(dim);
    ones.ones();
    for row in dict.nwords()..input.rows() {
        input.add_row(&ones, row, 1.0 / dim as real);
    }
}
