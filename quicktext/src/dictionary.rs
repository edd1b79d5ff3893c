//! The vocabulary: words, labels and hashed subword features.

use std::io::{self, BufRead, ErrorKind, Read, Seek, SeekFrom, Write};
use std::slice;

use anyhow::{bail, ensure, Context, Result};
use rand::Rng;
use tracing::{debug, info};

use crate::args::{Args, ModelName};
use crate::codec;
use crate::real;

/// End-of-sentence token, produced for every newline.
pub const EOS: &str = "</s>";
const BOW: &str = "<";
const EOW: &str = ">";

/// In unsupervised mode, lines are cut after this many words.
const MAX_LINE_SIZE: usize = 1024;

/// Hash table slot not holding any entry.
const EMPTY: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryType {
    Word,
    Label,
}

impl EntryType {
    fn tag(self) -> i32 {
        match self {
            EntryType::Word => 0,
            EntryType::Label => 1,
        }
    }

    fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(EntryType::Word),
            1 => Some(EntryType::Label),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub word: String,
    pub count: u64,
    pub kind: EntryType,
    /// The word's own id followed by the ids of its character n-grams.
    /// Empty for labels.
    pub subwords: Vec<usize>,
    /// Labels that were current while this word was read, in first-seen
    /// order. Only populated while reading a corpus; not saved.
    pub labels: Vec<String>,
}

/// 32-bit FNV-1a.
///
/// Bytes are sign-extended before mixing, as a signed `char` would be, so
/// that non-ASCII text hashes the same as in models from the reference tool.
pub fn hash(bytes: &[u8]) -> u32 {
    let mut h: u32 = 2166136261;
    for &b in bytes {
        h ^= b as i8 as i32 as u32;
        h = h.wrapping_mul(16777619);
    }
    h
}

/// True for UTF-8 continuation bytes (`10xxxxxx`).
fn is_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\n' | b'\r' | b'\t' | 0x0b | 0x0c | 0)
}

/// Splits a byte stream into whitespace-separated tokens. Each newline is
/// reported as the token [`EOS`].
pub struct TokenReader<R> {
    inner: R,
    /// A newline ended the last word; report it next.
    pending_eos: bool,
    eof: bool,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(inner: R) -> Self {
        TokenReader {
            inner,
            pending_eos: false,
            eof: false,
        }
    }

    /// True once a read has hit the end of the stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// True if there is nothing left to read.
    pub fn at_end(&mut self) -> io::Result<bool> {
        if self.pending_eos {
            return Ok(false);
        }
        loop {
            return match self.inner.fill_buf() {
                Ok(buf) => Ok(buf.is_empty()),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    fn read_byte(&mut self) -> Option<io::Result<u8>> {
        let mut byte = 0;
        loop {
            return match self.inner.read(slice::from_mut(&mut byte)) {
                Ok(0) => {
                    self.eof = true;
                    None
                }
                Ok(..) => Some(Ok(byte)),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => Some(Err(e)),
            };
        }
    }

    /// Reads the next token into `word`. Returns `Ok(false)` at end of stream.
    pub fn read_word(&mut self, word: &mut String) -> io::Result<bool> {
        word.clear();
        if self.pending_eos {
            self.pending_eos = false;
            word.push_str(EOS);
            return Ok(true);
        }

        let mut bytes = vec![];
        while let Some(b) = self.read_byte() {
            let b = b?;
            if is_space(b) {
                if bytes.is_empty() {
                    if b == b'\n' {
                        word.push_str(EOS);
                        return Ok(true);
                    }
                    continue;
                }
                if b == b'\n' {
                    self.pending_eos = true;
                }
                break;
            }
            bytes.push(b);
        }
        if bytes.is_empty() {
            return Ok(false);
        }
        word.push_str(&String::from_utf8_lossy(&bytes));
        Ok(true)
    }
}

impl<R: BufRead + Seek> TokenReader<R> {
    /// Moves to byte offset `pos`, which may be in the middle of a token.
    pub fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        self.pending_eos = false;
        self.eof = false;
        Ok(())
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        self.seek(0)
    }
}

#[derive(Debug)]
pub struct Dictionary {
    args: Args,
    /// Open-addressing hash table: slot -> index into `words`, or `EMPTY`.
    word2int: Vec<u32>,
    words: Vec<Entry>,
    /// Discard probability per id.
    pdiscard: Vec<real>,
    nwords: usize,
    nlabels: usize,
    ntokens: u64,
    /// The last label read; words read afterwards are associated with it.
    current_label: Option<String>,
}

impl Dictionary {
    pub fn new(args: Args) -> Self {
        let capacity = args.max_vocab_size;
        Dictionary {
            args,
            word2int: vec![EMPTY; capacity],
            words: vec![],
            pdiscard: vec![],
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
            current_label: None,
        }
    }

    pub fn nwords(&self) -> usize {
        self.nwords
    }

    pub fn nlabels(&self) -> usize {
        self.nlabels
    }

    /// Number of tokens read from the corpus, end-of-line tokens included.
    pub fn ntokens(&self) -> u64 {
        self.ntokens
    }

    /// Number of entries (words and labels).
    pub fn size(&self) -> usize {
        self.words.len()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.words
    }

    fn capacity(&self) -> usize {
        self.word2int.len()
    }

    /// Hash table slot holding `w`, or the empty slot where it would go.
    fn find(&self, w: &str) -> usize {
        let capacity = self.capacity();
        let mut h = hash(w.as_bytes()) as usize % capacity;
        while self.word2int[h] != EMPTY && self.words[self.word2int[h] as usize].word != w {
            h = (h + 1) % capacity;
        }
        h
    }

    pub fn get_id(&self, w: &str) -> Option<usize> {
        match self.word2int[self.find(w)] {
            EMPTY => None,
            id => Some(id as usize),
        }
    }

    pub fn get_type(&self, id: usize) -> EntryType {
        assert!(id < self.size(), "id {id} out of range");
        self.words[id].kind
    }

    pub fn get_word(&self, id: usize) -> &str {
        assert!(id < self.size(), "id {id} out of range");
        &self.words[id].word
    }

    /// Text of the label with label-relative id `lid`.
    pub fn get_label(&self, lid: usize) -> &str {
        assert!(lid < self.nlabels, "label {lid} out of range");
        &self.words[lid + self.nwords].word
    }

    /// Counts one occurrence of `w`, adding it if it is new.
    pub fn add(&mut self, w: &str) {
        // Probing needs at least one empty slot.
        assert!(
            self.words.len() + 1 < self.capacity(),
            "vocabulary hash table is full"
        );
        let h = self.find(w);
        self.ntokens += 1;
        if self.word2int[h] == EMPTY {
            let mut labels = vec![];
            let kind = if w.starts_with(&self.args.label) {
                self.current_label = Some(w.to_string());
                EntryType::Label
            } else {
                labels.extend(self.current_label.iter().cloned());
                EntryType::Word
            };
            self.words.push(Entry {
                word: w.to_string(),
                count: 1,
                kind,
                subwords: vec![],
                labels,
            });
            self.word2int[h] = (self.words.len() - 1) as u32;
        } else {
            let entry = &mut self.words[self.word2int[h] as usize];
            entry.count += 1;
            match entry.kind {
                EntryType::Label => self.current_label = Some(entry.word.clone()),
                EntryType::Word => {
                    if let Some(label) = &self.current_label {
                        if !entry.labels.contains(label) {
                            entry.labels.push(label.clone());
                        }
                    }
                }
            }
        }
    }

    /// Sorts entries (words first, then by decreasing count), drops words
    /// seen fewer than `t` times and rebuilds the hash table.
    pub fn threshold(&mut self, t: u64) {
        self.words
            .sort_by(|a, b| a.kind.cmp(&b.kind).then(b.count.cmp(&a.count)));
        self.words
            .retain(|e| e.kind == EntryType::Label || e.count >= t);
        self.words.shrink_to_fit();
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.word2int.fill(EMPTY);
        self.nwords = 0;
        self.nlabels = 0;
        for i in 0..self.words.len() {
            let h = self.find(&self.words[i].word);
            self.word2int[h] = i as u32;
            match self.words[i].kind {
                EntryType::Word => self.nwords += 1,
                EntryType::Label => self.nlabels += 1,
            }
        }
    }

    /// Appends the ids of the character n-grams of `word` (already wrapped
    /// in `<` and `>`) to `ngrams`.
    pub fn compute_ngrams(&self, word: &str, ngrams: &mut Vec<usize>) {
        if self.args.bucket == 0 {
            return;
        }
        let bytes = word.as_bytes();
        for i in 0..bytes.len() {
            if is_continuation(bytes[i]) {
                continue;
            }
            let mut j = i;
            let mut n = 1;
            while j < bytes.len() && n <= self.args.maxn {
                j += 1;
                while j < bytes.len() && is_continuation(bytes[j]) {
                    j += 1;
                }
                if n >= self.args.minn {
                    let h = hash(&bytes[i..j]) as usize % self.args.bucket;
                    ngrams.push(self.nwords + h);
                }
                n += 1;
            }
        }
    }

    fn init_ngrams(&mut self) {
        for i in 0..self.nwords {
            let mut subwords = vec![i];
            let wrapped = format!("{BOW}{}{EOW}", self.words[i].word);
            self.compute_ngrams(&wrapped, &mut subwords);
            self.words[i].subwords = subwords;
        }
    }

    /// The word's own id followed by its n-gram ids.
    pub fn get_ngrams(&self, id: usize) -> &[usize] {
        assert!(id < self.nwords, "word id {id} out of range");
        &self.words[id].subwords
    }

    /// Subword features of any word. Out-of-vocabulary words get only their
    /// n-grams.
    pub fn get_ngrams_for_word(&self, word: &str) -> Vec<usize> {
        match self.get_id(word) {
            Some(id) if id < self.nwords => self.words[id].subwords.clone(),
            _ => {
                let mut ngrams = vec![];
                self.compute_ngrams(&format!("{BOW}{word}{EOW}"), &mut ngrams);
                ngrams
            }
        }
    }

    fn init_table_discard(&mut self) {
        let t = self.args.t;
        let ntokens = self.ntokens;
        self.pdiscard = self
            .words
            .iter()
            .map(|e| {
                let f = (e.count as real / ntokens as real) as f64;
                ((t / f).sqrt() + t / f) as real
            })
            .collect();
    }

    pub fn discard_probability(&self, id: usize) -> real {
        self.pdiscard[id]
    }

    /// Subsampling: whether to skip this occurrence of word `id`, given a
    /// uniform draw `rand` in `[0, 1)`.
    pub fn discard(&self, id: usize, rand: real) -> bool {
        assert!(id < self.nwords, "word id {id} out of range");
        if self.args.model == ModelName::Supervised {
            return false;
        }
        rand > self.pdiscard[id]
    }

    /// Sorted label-relative ids of the labels word `id` was seen under.
    pub fn get_labels(&self, id: usize) -> Vec<usize> {
        assert!(id < self.nwords, "word id {id} out of range");
        let mut ids: Vec<usize> = self.words[id]
            .labels
            .iter()
            .filter_map(|label| self.get_id(label))
            .filter(|&lid| lid >= self.nwords)
            .map(|lid| lid - self.nwords)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Counts of all entries of one kind, in id order.
    pub fn get_counts(&self, kind: EntryType) -> Vec<u64> {
        self.words
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.count)
            .collect()
    }

    /// Appends hashed word n-grams of up to `n` words to `line`.
    pub fn add_ngrams(&self, line: &mut Vec<usize>, n: usize) {
        let bucket = self.args.bucket as u64;
        if n <= 1 || bucket == 0 {
            return;
        }
        let len = line.len();
        for i in 0..len {
            let mut h = line[i] as u64;
            for j in (i + 1)..len.min(i + n) {
                h = h.wrapping_mul(116049371).wrapping_add(line[j] as u64);
                line.push(self.nwords + (h % bucket) as usize);
            }
        }
    }

    /// Reads one line of known tokens. Words that survive subsampling go to
    /// `words`; labels go to `labels` as label-relative ids. Returns the
    /// number of known tokens read, before subsampling.
    pub fn read_line<R: BufRead, G: Rng + ?Sized>(
        &self,
        input: &mut TokenReader<R>,
        words: &mut Vec<usize>,
        labels: &mut Vec<usize>,
        rng: &mut G,
    ) -> io::Result<usize> {
        let mut token = String::new();
        let mut ntokens = 0;
        words.clear();
        labels.clear();
        while input.read_word(&mut token)? {
            if token == EOS {
                break;
            }
            let Some(id) = self.get_id(&token) else {
                continue;
            };
            ntokens += 1;
            match self.get_type(id) {
                EntryType::Word => {
                    if !self.discard(id, rng.gen::<real>()) {
                        words.push(id);
                    }
                }
                EntryType::Label => labels.push(id - self.nwords),
            }
            if words.len() > MAX_LINE_SIZE && self.args.model != ModelName::Supervised {
                break;
            }
        }
        Ok(ntokens)
    }

    /// Like [`read_line`](Self::read_line), but first rewinds a stream that
    /// has reached its end, so callers can cycle over a corpus.
    pub fn get_line<R: BufRead + Seek, G: Rng + ?Sized>(
        &self,
        input: &mut TokenReader<R>,
        words: &mut Vec<usize>,
        labels: &mut Vec<usize>,
        rng: &mut G,
    ) -> io::Result<usize> {
        if input.is_eof() {
            input.rewind()?;
        }
        self.read_line(input, words, labels, rng)
    }

    /// Builds the vocabulary from a corpus.
    pub fn read_from_file<R: BufRead>(&mut self, input: R) -> Result<()> {
        let mut input = TokenReader::new(input);
        let mut word = String::new();
        let mut min_threshold = 1;
        while input
            .read_word(&mut word)
            .context("error reading training data")?
        {
            ensure!(
                self.words.len() + 1 < self.capacity(),
                "vocabulary hash table of {} slots is full; raise max_vocab_size",
                self.capacity()
            );
            self.add(&word);
            if self.ntokens % 1_000_000 == 0 {
                debug!("read {}M words", self.ntokens / 1_000_000);
            }
            if self.words.len() as f64 > 0.75 * self.capacity() as f64 {
                self.threshold(min_threshold);
                min_threshold += 1;
            }
        }
        self.threshold(self.args.min_count);
        self.init_table_discard();
        self.init_ngrams();
        info!(
            ntokens = self.ntokens,
            nwords = self.nwords,
            nlabels = self.nlabels,
            "read vocabulary"
        );
        if self.words.is_empty() {
            bail!("empty vocabulary; try a smaller min_count");
        }
        Ok(())
    }

    pub fn save<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        codec::write_i32(out, self.words.len() as i32)?;
        codec::write_i32(out, self.nwords as i32)?;
        codec::write_i32(out, self.nlabels as i32)?;
        codec::write_i64(out, self.ntokens as i64)?;
        for e in &self.words {
            codec::write_cstr(out, &e.word)?;
            codec::write_i64(out, e.count as i64)?;
            codec::write_i32(out, e.kind.tag())?;
        }
        Ok(())
    }

    pub fn load<R: BufRead + ?Sized>(args: Args, input: &mut R) -> Result<Self> {
        let mut dict = Dictionary::new(args);
        let size = codec::read_i32(input)?;
        let nwords = codec::read_i32(input)?;
        let nlabels = codec::read_i32(input)?;
        let ntokens = codec::read_i64(input)?;
        ensure!(
            size >= 0
                && nwords >= 0
                && nlabels >= 0
                && i64::from(nwords) + i64::from(nlabels) == i64::from(size),
            "inconsistent dictionary header: size {size}, {nwords} words, {nlabels} labels"
        );
        ensure!(
            (size as usize) < dict.capacity(),
            "dictionary of {size} entries does not fit a table of {} slots",
            dict.capacity()
        );
        dict.ntokens = ntokens as u64;
        for i in 0..size as usize {
            let word = codec::read_cstr(input)?;
            let count = codec::read_i64(input)?;
            let tag = codec::read_i32(input)?;
            let Some(kind) = EntryType::from_tag(tag) else {
                bail!("invalid entry type {tag} for {word:?}");
            };
            let expected = if i < nwords as usize {
                EntryType::Word
            } else {
                EntryType::Label
            };
            ensure!(kind == expected, "entry {i} ({word:?}) is out of order");
            dict.words.push(Entry {
                word,
                count: count as u64,
                kind,
                subwords: vec![],
                labels: vec![],
            });
        }
        dict.rebuild_index();
        dict.init_table_discard();
        dict.init_ngrams();
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Cursor;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn small_args() -> Args {
        Args {
            bucket: 1000,
            max_vocab_size: 1000,
            min_count: 1,
            ..Args::default()
        }
    }

    fn dictionary(args: Args, corpus: &str) -> Dictionary {
        let mut dict = Dictionary::new(args);
        dict.read_from_file(corpus.as_bytes()).unwrap();
        dict
    }

    fn tokens(text: &str) -> Vec<String> {
        let mut reader = TokenReader::new(text.as_bytes());
        let mut word = String::new();
        let mut out = vec![];
        while reader.read_word(&mut word).unwrap() {
            out.push(word.clone());
        }
        out
    }

    /// Closed-form number of character n-grams of a word with `len`
    /// characters (markers included).
    fn expected_ngrams(len: usize, minn: usize, maxn: usize) -> usize {
        (0..len)
            .map(|i| {
                let longest = maxn.min(len - i);
                (longest + 1).saturating_sub(minn.max(1))
            })
            .sum()
    }

    #[test]
    fn fnv1a() {
        assert_eq!(hash(b""), 2166136261);
        assert_eq!(hash(b"a"), 0xe40c292c);
        assert_eq!(hash(b"foobar"), 0xbf9cf968);
        // High bytes are sign-extended.
        assert_eq!(hash(&[0xc3]), (2166136261u32 ^ 0xffff_ffc3).wrapping_mul(16777619));
    }

    #[test]
    fn tokenizing() {
        assert_eq!(
            tokens("a b\tc\n\nd\r\n  e"),
            vec!["a", "b", "c", EOS, EOS, "d", EOS, "e"]
        );
        assert_eq!(tokens("\x0bx\x0cy\0z"), vec!["x", "y", "z"]);
        assert!(tokens("").is_empty());
    }

    #[test]
    fn vocabulary_is_exactly_the_distinct_tokens() {
        let dict = dictionary(small_args(), "the cat\nthe dog\n");
        let words: HashSet<&str> = dict.entries().iter().map(|e| e.word.as_str()).collect();
        assert_eq!(words, HashSet::from(["the", "cat", "dog", EOS]));
        assert_eq!(dict.ntokens(), 6);
        assert_eq!(dict.nwords(), 4);
        assert_eq!(dict.nlabels(), 0);
        // Sorted by decreasing count.
        assert_eq!(dict.get_word(0), "the");
        assert_eq!(dict.entries()[0].count, 2);
    }

    #[test]
    fn words_before_labels() {
        let dict = dictionary(
            small_args(),
            "__label__b x y\n__label__a x\n__label__b z\n",
        );
        assert_eq!(dict.nlabels(), 2);
        assert_eq!(dict.nwords(), 4);
        assert_eq!(dict.size(), 6);
        for id in 0..dict.nwords() {
            assert_eq!(dict.get_type(id), EntryType::Word);
        }
        assert_eq!(dict.get_label(0), "__label__b");
        assert_eq!(dict.get_label(1), "__label__a");
        assert_eq!(dict.get_counts(EntryType::Label), vec![2, 1]);
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let args = Args {
            max_vocab_size: 64,
            ..small_args()
        };
        let mut dict = Dictionary::new(args);
        // 48 entries stay within the compaction trigger of a 64-slot table.
        let words: Vec<String> = (0..48).map(|i| format!("w{i}")).collect();
        for w in &words {
            dict.add(w);
        }
        dict.threshold(1);
        let ids: HashSet<usize> = words.iter().map(|w| dict.get_id(w).unwrap()).collect();
        assert_eq!(ids.len(), words.len());
        for w in &words {
            assert_eq!(dict.get_word(dict.get_id(w).unwrap()), w);
        }
        assert_eq!(dict.get_id("missing"), None);
    }

    #[test]
    fn pruning() {
        let corpus = "a a a a b b b c c d __label__x __label__y\n";
        let mut dict = Dictionary::new(small_args());
        let mut reader = TokenReader::new(corpus.as_bytes());
        let mut word = String::new();
        while reader.read_word(&mut word).unwrap() {
            dict.add(&word);
        }
        dict.threshold(3);
        assert!(dict
            .entries()
            .iter()
            .filter(|e| e.kind == EntryType::Word)
            .all(|e| e.count >= 3));
        assert_eq!(dict.nwords(), 2);
        // Labels survive any threshold.
        assert_eq!(dict.nlabels(), 2);
        assert_eq!(dict.nwords() + dict.nlabels(), dict.size());
        assert_eq!(dict.get_id("c"), None);
        assert_eq!(dict.get_id("a"), Some(0));
    }

    #[test]
    fn compaction_while_reading() {
        let args = Args {
            max_vocab_size: 16,
            ..small_args()
        };
        // 40 distinct rare words, one frequent word.
        let mut corpus = String::new();
        for i in 0..40 {
            corpus.push_str(&format!("common rare{i} "));
        }
        let dict = dictionary(args, &corpus);
        assert!(dict.size() <= 12);
        assert_eq!(dict.get_word(0), "common");
        assert_eq!(dict.ntokens(), 80);
    }

    #[test]
    fn too_many_labels_for_the_table() {
        let args = Args {
            max_vocab_size: 16,
            ..small_args()
        };
        let corpus: String = (0..20).map(|i| format!("__label__{i} ")).collect();
        let mut dict = Dictionary::new(args);
        assert!(dict.read_from_file(corpus.as_bytes()).is_err());
    }

    #[test]
    fn label_association_follows_corpus_order() {
        let dict = dictionary(
            small_args(),
            "early __label__a x\ny\n__label__b x\n",
        );
        let x = dict.get_id("x").unwrap();
        let y = dict.get_id("y").unwrap();
        let early = dict.get_id("early").unwrap();
        let eos = dict.get_id(EOS).unwrap();
        let a = dict.get_id("__label__a").unwrap() - dict.nwords();
        let b = dict.get_id("__label__b").unwrap() - dict.nwords();

        // No label was current yet.
        assert!(dict.get_labels(early).is_empty());
        let mut both = vec![a, b];
        both.sort();
        assert_eq!(dict.get_labels(x), both);
        // `y` is on a line without a label, but `__label__a` is still current.
        assert_eq!(dict.get_labels(y), vec![a]);
        // So is the end-of-line token.
        assert_eq!(dict.get_labels(eos), both);
    }

    #[test]
    fn ngram_counts_and_ranges() {
        let dict = dictionary(small_args(), "where héllo 日本語\n");
        for word in ["where", "héllo", "日本語", "unseen"] {
            let wrapped = format!("<{word}>");
            let mut ngrams = vec![];
            dict.compute_ngrams(&wrapped, &mut ngrams);
            assert_eq!(
                ngrams.len(),
                expected_ngrams(wrapped.chars().count(), 3, 6),
                "{word}"
            );
            assert!(ngrams
                .iter()
                .all(|&id| id >= dict.nwords() && id < dict.nwords() + 1000));
        }

        let id = dict.get_id("where").unwrap();
        let subwords = dict.get_ngrams(id);
        assert_eq!(subwords[0], id);
        assert_eq!(subwords.len(), 1 + expected_ngrams(7, 3, 6));
        assert_eq!(dict.get_ngrams_for_word("where"), subwords);
        assert_eq!(
            dict.get_ngrams_for_word("unseen").len(),
            expected_ngrams(8, 3, 6)
        );
    }

    #[test]
    fn ngrams_respect_character_boundaries() {
        let args = Args {
            minn: 1,
            maxn: 1,
            ..small_args()
        };
        let dict = dictionary(args, "é\n");
        let mut ngrams = vec![];
        dict.compute_ngrams("<é>", &mut ngrams);
        let bucket = |s: &str| dict.nwords() + hash(s.as_bytes()) as usize % 1000;
        assert_eq!(ngrams, vec![bucket("<"), bucket("é"), bucket(">")]);
    }

    #[test]
    fn no_ngrams_when_disabled() {
        let args = Args {
            max_vocab_size: 1000,
            ..Args::supervised()
        };
        let dict = dictionary(args, "__label__a hello world\n");
        let id = dict.get_id("hello").unwrap();
        assert_eq!(dict.get_ngrams(id), &[id]);
    }

    #[test]
    fn word_ngrams() {
        let dict = dictionary(small_args(), "a b c\n");
        let mut line = vec![0, 1, 2];
        dict.add_ngrams(&mut line, 1);
        assert_eq!(line, vec![0, 1, 2]);

        dict.add_ngrams(&mut line, 3);
        let nwords = dict.nwords() as u64;
        // Hashes of (0 1), (0 1 2) and (1 2).
        let expected: Vec<usize> = [1u64, 116049371 + 2, 116049371 + 2]
            .iter()
            .map(|h| (nwords + h % 1000) as usize)
            .collect();
        assert_eq!(&line[3..], &expected[..]);
    }

    #[test]
    fn discard_probabilities() {
        let args = Args {
            t: 0.01,
            ..small_args()
        };
        let dict = dictionary(args, &format!("{}b c", "a ".repeat(98)));
        let a = dict.get_id("a").unwrap();
        let f = 98.0f64 / 100.0;
        let expected = ((0.01 / f).sqrt() + 0.01 / f) as real;
        assert!((dict.discard_probability(a) - expected).abs() < 1e-6);
        let c = dict.get_id("c").unwrap();
        assert!(dict.discard_probability(c) > 1.0);
        assert!(!dict.discard(c, 0.999));
        assert!(dict.discard(a, 0.999));
    }

    #[test]
    fn discard_is_deterministic_for_a_seed() {
        let args = Args {
            t: 0.05,
            ..small_args()
        };
        let corpus = "the the the of of a b the c the of d\n".repeat(20);
        let dict = dictionary(args, &corpus);

        let read = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut reader = TokenReader::new(Cursor::new(corpus.as_bytes()));
            let (mut words, mut labels) = (vec![], vec![]);
            let mut kept = vec![];
            for _ in 0..20 {
                dict.get_line(&mut reader, &mut words, &mut labels, &mut rng)
                    .unwrap();
                kept.extend_from_slice(&words);
            }
            kept
        };
        let first = read(7);
        assert_eq!(first, read(7));
        // Frequent words are dropped some of the time.
        let the = dict.get_id("the").unwrap();
        let kept_the = first.iter().filter(|&&id| id == the).count();
        assert!(kept_the < 5 * 20);
    }

    #[test]
    fn lines_and_rewinding() {
        let args = Args {
            max_vocab_size: 1000,
            ..Args::supervised()
        };
        let dict = dictionary(args, "__label__a one two\n__label__b three\n");
        let mut rng = StdRng::seed_from_u64(0);
        let mut reader = TokenReader::new(Cursor::new(
            "__label__a one two unknown\n__label__b three".as_bytes(),
        ));
        let (mut words, mut labels) = (vec![], vec![]);

        let n = dict
            .get_line(&mut reader, &mut words, &mut labels, &mut rng)
            .unwrap();
        assert_eq!(n, 3);
        let ids = |ws: &[&str]| ws.iter().map(|w| dict.get_id(w).unwrap()).collect::<Vec<_>>();
        assert_eq!(words, ids(&["one", "two"]));
        assert_eq!(labels, vec![0]);

        let n = dict
            .get_line(&mut reader, &mut words, &mut labels, &mut rng)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(words, ids(&["three"]));
        assert_eq!(labels, vec![1]);
        assert!(reader.is_eof());

        // Wraps around to the first line.
        dict.get_line(&mut reader, &mut words, &mut labels, &mut rng)
            .unwrap();
        assert_eq!(words, ids(&["one", "two"]));
        assert_eq!(labels, vec![0]);
    }

    #[test]
    fn save_and_load() {
        let dict = dictionary(
            small_args(),
            "__label__pos good héllo good\n__label__neg bad\n",
        );
        let mut buf = vec![];
        dict.save(&mut buf).unwrap();

        let copy = Dictionary::load(small_args(), &mut Cursor::new(&buf)).unwrap();
        assert_eq!(copy.size(), dict.size());
        assert_eq!(copy.nwords(), dict.nwords());
        assert_eq!(copy.nlabels(), dict.nlabels());
        assert_eq!(copy.ntokens(), dict.ntokens());
        for (a, b) in copy.entries().iter().zip(dict.entries()) {
            assert_eq!(a.word, b.word);
            assert_eq!(a.count, b.count);
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.subwords, b.subwords);
            assert!(a.labels.is_empty());
        }
        for id in 0..dict.size() {
            assert_eq!(
                copy.discard_probability(id).to_bits(),
                dict.discard_probability(id).to_bits()
            );
            assert_eq!(copy.get_id(dict.get_word(id)), Some(id));
        }

        assert!(Dictionary::load(small_args(), &mut Cursor::new(&buf[..buf.len() - 2])).is_err());
    }

    #[test]
    fn load_rejects_overflowing_header() {
        let mut buf = vec![];
        codec::write_i32(&mut buf, 0).unwrap();
        codec::write_i32(&mut buf, i32::MAX).unwrap();
        codec::write_i32(&mut buf, i32::MAX).unwrap();
        codec::write_i64(&mut buf, 0).unwrap();
        let err = Dictionary::load(small_args(), &mut Cursor::new(&buf)).unwrap_err();
        assert!(err.to_string().contains("inconsistent dictionary header"));
    }
}
