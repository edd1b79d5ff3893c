//! Hyperparameters shared by the dictionary, the trainer and the model file.

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ModelName {
    /// Continuous bag of words: predict each word from the words around it.
    Cbow,
    /// Predict each surrounding word from the word in the middle.
    Skipgram,
    /// Predict the label of a line from its words.
    Supervised,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum LossName {
    /// Full softmax over every output row.
    Softmax,
    /// Hierarchical softmax over a Huffman tree.
    Hs,
    /// Negative sampling.
    Ns,
    /// Label polarization of the input rows, with negative sampling for the
    /// output side.
    Polarization,
}

/// Smallest vocabulary hash table that compaction at 75% load can keep
/// from filling up.
pub const MIN_VOCAB_SLOTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Args {
    pub model: ModelName,
    pub loss: LossName,
    /// Starting learning rate; decays linearly to zero.
    pub lr: f64,
    /// Number of tokens a worker processes between updates of the shared
    /// token counter.
    pub lr_update_rate: u64,
    /// Embedding dimension. Forced to the number of labels when training
    /// with the polarization loss.
    pub dim: usize,
    /// Maximum context window radius.
    pub ws: usize,
    pub epoch: usize,
    /// Words occurring fewer times are dropped from the vocabulary.
    pub min_count: u64,
    /// Negatives sampled per positive example.
    pub neg: usize,
    /// Length of word n-grams added as features in supervised mode.
    pub word_ngrams: usize,
    /// Number of hash buckets for subword and word n-gram features.
    pub bucket: usize,
    /// Minimum character n-gram length.
    pub minn: usize,
    /// Maximum character n-gram length; 0 disables character n-grams.
    pub maxn: usize,
    pub thread: usize,
    /// Subsampling threshold.
    pub t: f64,
    /// Tokens starting with this prefix are labels.
    pub label: String,
    pub verbose: usize,
    /// Slots in the vocabulary hash table.
    pub max_vocab_size: usize,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            model: ModelName::Skipgram,
            loss: LossName::Ns,
            lr: 0.05,
            lr_update_rate: 100,
            dim: 100,
            ws: 5,
            epoch: 5,
            min_count: 5,
            neg: 5,
            word_ngrams: 1,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            thread: 12,
            t: 1e-4,
            label: "__label__".to_string(),
            verbose: 2,
            max_vocab_size: 30_000_000,
        }
    }
}

impl Args {
    /// Defaults for training a classifier.
    pub fn supervised() -> Self {
        Args {
            model: ModelName::Supervised,
            loss: LossName::Softmax,
            lr: 0.1,
            min_count: 1,
            minn: 0,
            maxn: 0,
            ..Args::default()
        }
    }

    pub fn cbow() -> Self {
        Args {
            model: ModelName::Cbow,
            ..Args::default()
        }
    }

    pub fn skipgram() -> Self {
        Args::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 && self.loss != LossName::Polarization {
            bail!("dimension must be positive");
        }
        if self.epoch == 0 {
            bail!("number of epochs must be positive");
        }
        if self.thread == 0 {
            bail!("number of threads must be positive");
        }
        if self.ws == 0 && self.model != ModelName::Supervised {
            bail!("window size must be positive");
        }
        if self.maxn > 0 && self.minn > self.maxn {
            bail!(
                "minimum n-gram length {} exceeds maximum {}",
                self.minn,
                self.maxn
            );
        }
        if self.label.is_empty() {
            bail!("label prefix must not be empty");
        }
        if self.max_vocab_size < MIN_VOCAB_SLOTS {
            bail!(
                "vocabulary hash table needs at least {MIN_VOCAB_SLOTS} slots, got {}",
                self.max_vocab_size
            );
        }
        if matches!(self.loss, LossName::Ns | LossName::Polarization) && self.neg == 0 {
            bail!("negative sampling needs at least one negative");
        }
        if self.loss == LossName::Polarization && self.model == ModelName::Supervised {
            bail!("the polarization loss trains word vectors; use cbow or skipgram");
        }
        Ok(())
    }
}
