//! Hogwild training: worker threads sharing the parameter matrices.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use tracing::{debug, info};

use crate::args::{Args, LossName, ModelName};
use crate::dictionary::{Dictionary, TokenReader};
use crate::matrix::Matrix;
use crate::model::{Model, Targets};
use crate::real;

/// State shared by all workers of one training run.
pub struct TrainContext {
    /// Tokens processed by all workers, updated in batches.
    token_count: AtomicU64,
    start: Instant,
}

impl TrainContext {
    pub fn new() -> Self {
        TrainContext {
            token_count: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn token_count(&self) -> u64 {
        self.token_count.load(Ordering::Relaxed)
    }
}

impl Default for TrainContext {
    fn default() -> Self {
        TrainContext::new()
    }
}

pub struct Trainer<'a> {
    pub args: &'a Args,
    pub dict: &'a Dictionary,
    pub input: &'a Matrix,
    pub output: &'a Matrix,
    pub targets: &'a Targets,
    pub corpus: &'a Path,
}

impl<'a> Trainer<'a> {
    /// Trains for `args.epoch` passes over the corpus and returns the
    /// average loss seen by the first worker.
    pub fn run(&self) -> Result<real> {
        self.run_with(&TrainContext::new())
    }

    /// Like `run`, counting processed tokens in `ctx`.
    pub fn run_with(&self, ctx: &TrainContext) -> Result<real> {
        let file_size = std::fs::metadata(self.corpus)
            .with_context(|| format!("can't read training data {:?}", self.corpus))?
            .len();
        let total = self.args.epoch as u64 * self.dict.ntokens();
        let progress = if self.args.verbose > 1 {
            let bar = ProgressBar::new(total);
            bar.set_style(ProgressStyle::with_template(
                "{elapsed_precise} [{bar:40}] {percent:>3}% {msg}",
            )?);
            Some(bar)
        } else {
            None
        };

        info!(
            threads = self.args.thread,
            epochs = self.args.epoch,
            "starting training using file {:?}",
            self.corpus
        );
        let results = thread::scope(|s| {
            let threads = (0..self.args.thread)
                .map(|id| {
                    let progress = progress.as_ref().filter(|_| id == 0);
                    let offset = file_size * id as u64 / self.args.thread as u64;
                    s.spawn(move || self.train_thread(ctx, id, offset, progress))
                })
                .collect::<Vec<_>>();
            threads
                .into_iter()
                .map(|thread| {
                    thread
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect::<Vec<Result<real>>>()
        });
        if let Some(bar) = progress {
            bar.finish();
        }

        let mut loss = 0.0;
        for (id, result) in results.into_iter().enumerate() {
            let thread_loss = result.with_context(|| format!("error in worker thread {id}"))?;
            if id == 0 {
                loss = thread_loss;
            }
        }
        info!(
            loss,
            seconds = ctx.start.elapsed().as_secs_f64(),
            "finished training"
        );
        Ok(loss)
    }

    fn train_thread(
        &self,
        ctx: &TrainContext,
        id: usize,
        offset: u64,
        progress: Option<&ProgressBar>,
    ) -> Result<real> {
        let file = File::open(self.corpus)
            .with_context(|| format!("can't open training data {:?}", self.corpus))?;
        let mut reader = TokenReader::new(BufReader::new(file));
        reader
            .seek(offset)
            .context("error seeking within training data")?;

        let mut model = Model::new(self.input, self.output, self.targets, self.args, id as u64);
        let total = self.args.epoch as u64 * self.dict.ntokens();
        let mut local_token_count = 0;
        let mut tokens_since_rewind = 0;
        let mut empty_passes = 0;
        let mut line = vec![];
        let mut labels = vec![];
        let mut bow = vec![];
        let mut lr = self.args.lr as real;
        while ctx.token_count() < total {
            let progress_ratio = ctx.token_count() as f64 / total as f64;
            lr = (self.args.lr * (1.0 - progress_ratio)) as real;

            if reader.is_eof() {
                if tokens_since_rewind == 0 {
                    empty_passes += 1;
                    if empty_passes >= 2 {
                        bail!("no trainable tokens in {:?}", self.corpus);
                    }
                } else {
                    empty_passes = 0;
                }
                tokens_since_rewind = 0;
            }
            let ntokens = self
                .dict
                .get_line(&mut reader, &mut line, &mut labels, &mut model.rng)
                .context("error reading training data")?;
            local_token_count += ntokens as u64;
            tokens_since_rewind += ntokens;

            match self.args.model {
                ModelName::Supervised => {
                    self.dict.add_ngrams(&mut line, self.args.word_ngrams);
                    self.supervised(&mut model, lr, &line, &labels);
                }
                ModelName::Cbow => self.cbow(&mut model, lr, &line, &mut bow),
                ModelName::Skipgram => self.skipgram(&mut model, lr, &line),
            }

            if local_token_count > self.args.lr_update_rate {
                let count = ctx
                    .token_count
                    .fetch_add(local_token_count, Ordering::Relaxed)
                    + local_token_count;
                local_token_count = 0;
                if let Some(bar) = progress {
                    self.report(ctx, bar, count.min(total), lr, model.get_loss());
                }
            }
        }
        if let Some(bar) = progress {
            self.report(ctx, bar, total, lr, model.get_loss());
        }
        debug!(thread = id, loss = model.get_loss(), "worker done");
        Ok(model.get_loss())
    }

    fn report(&self, ctx: &TrainContext, bar: &ProgressBar, count: u64, lr: real, loss: real) {
        let seconds = ctx.start.elapsed().as_secs_f64().max(1e-3);
        let words_per_sec = count as f64 / seconds / self.args.thread as f64;
        bar.set_position(count);
        bar.set_message(format!(
            "words/sec/thread: {words_per_sec:.0}  lr: {lr:.6}  loss: {loss:.6}"
        ));
    }

    fn supervised(&self, model: &mut Model, lr: real, line: &[usize], labels: &[usize]) {
        if labels.is_empty() || line.is_empty() {
            return;
        }
        let i = model.rng.gen_range(0..labels.len());
        model.update(line, labels[i], lr);
    }

    /// Trains input row `word` toward the word's label indicator.
    fn polarize(&self, model: &mut Model, lr: real, word: usize) {
        model.set_hidden_labels(&self.dict.get_labels(word));
        model.update_polarization(word, lr);
    }

    fn cbow(&self, model: &mut Model, lr: real, line: &[usize], bow: &mut Vec<usize>) {
        for w in 0..line.len() {
            if self.args.loss == LossName::Polarization {
                self.polarize(model, lr, line[w]);
            }
            let boundary = model.rng.gen_range(1..=self.args.ws);
            bow.clear();
            for c in w.saturating_sub(boundary)..(w + boundary + 1).min(line.len()) {
                if c != w {
                    bow.extend_from_slice(self.dict.get_ngrams(line[c]));
                }
            }
            model.update(bow, line[w], lr);
        }
    }

    fn skipgram(&self, model: &mut Model, lr: real, line: &[usize]) {
        for w in 0..line.len() {
            if self.args.loss == LossName::Polarization {
                self.polarize(model, lr, line[w]);
            }
            let boundary = model.rng.gen_range(1..=self.args.ws);
            let ngrams = self.dict.get_ngrams(line[w]);
            for c in w.saturating_sub(boundary)..(w + boundary + 1).min(line.len()) {
                if c != w {
                    model.update(ngrams, line[c], lr);
                }
            }
        }
    }
}
