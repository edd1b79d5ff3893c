//! Word representations and text classification with hashed subword features.
//!
//! Training is "hogwild": worker threads share the parameter matrices and
//! update them without locks. See [`matrix::Real`].

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::Index;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

pub mod args;
pub mod codec;
pub mod dictionary;
pub mod matrix;
pub mod model;
mod quicktext;
pub mod train;
pub mod vector;

pub use args::{Args, LossName, ModelName};
pub use dictionary::{Dictionary, EntryType, TokenReader};
pub use matrix::Matrix;
pub use model::Model;
pub use quicktext::{QuickText, TestReport};
pub use vector::Vector;

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

/// Word vectors read back from a `.vec` text file.
pub struct Vectors {
    /// Embedding vector length (number of dimensions).
    size: usize,

    /// The vocabulary.
    vocab: Vec<String>,

    /// `embeddings[k * size..(k+1) * size]` is the vector embedding for word `k`.
    embeddings: Vec<real>,
}

impl Index<usize> for Vectors {
    type Output = [real];

    fn index(&self, i: usize) -> &[real] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

impl Vectors {
    pub fn load(file_name: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(file_name).context("error opening input file")?);
        let mut lines = f.lines();
        let header = lines
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .context("error reading input file")?;
        let mut fields = header.split_whitespace();
        let num_words: usize = fields
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .parse()
            .context("invalid input file")?;
        let size: usize = fields
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .parse()
            .context("invalid input file")?;

        let mut vocab: Vec<String> = Vec::with_capacity(num_words);
        let mut embeddings = Vec::with_capacity(num_words * size);
        for (line_num, line) in lines.take(num_words).enumerate() {
            let line = line.context("error reading input file")?;
            let mut fields = line.split_whitespace();
            let word = fields
                .next()
                .ok_or_else(|| anyhow!("missing word on line {}", line_num + 2))?;
            vocab.push(word.to_string());
            let before = embeddings.len();
            for field in fields {
                embeddings.push(field.parse::<real>().with_context(|| {
                    format!("invalid vector component on line {}", line_num + 2)
                })?);
            }
            anyhow::ensure!(
                embeddings.len() - before == size,
                "expected {size} vector components on line {}",
                line_num + 2
            );
        }
        anyhow::ensure!(
            vocab.len() == num_words,
            "expected {num_words} words, found {}",
            vocab.len()
        );

        Ok(Vectors {
            size,
            vocab,
            embeddings,
        })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    /// Returns the vector size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.vocab.iter().position(|v| v == word)
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }
}
