use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, SaveError};
use crate::io::{build_output_path, read_lines};
use crate::model::counts::NGramCounts;
use crate::storage;
use crate::tokenizer::bpe::{BpeTokenizer, TokenId};

const ARTIFACT_MAGIC: [u8; 4] = *b"SGLM";

/// Interpolation weights for the three estimate orders.
///
/// The trigram estimate carries the most weight, then bigram, then
/// unigram; the three components sum to 1.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Weights {
	pub unigram: f64,
	pub bigram: f64,
	pub trigram: f64,
}

impl Default for Weights {
	fn default() -> Self {
		Self { unigram: 0.1, bigram: 0.3, trigram: 0.6 }
	}
}

impl Weights {
	/// Creates validated weights.
	///
	/// # Errors
	/// Returns an error if any component is negative or the sum is not
	/// 1 within floating tolerance.
	pub fn new(unigram: f64, bigram: f64, trigram: f64) -> Result<Self, String> {
		if unigram < 0.0 || bigram < 0.0 || trigram < 0.0 {
			return Err("Weights must be non-negative".to_owned());
		}
		if ((unigram + bigram + trigram) - 1.0).abs() > 1e-9 {
			return Err("Weights must sum to 1.0".to_owned());
		}
		Ok(Self { unigram, bigram, trigram })
	}
}

/// Interpolated trigram language model.
///
/// Owns the count tables built from a tokenized corpus and combines
/// the unigram, bigram and trigram maximum-likelihood estimates into a
/// smoothed next-token distribution over the whole vocabulary.
///
/// # Responsibilities
/// - Accumulate counts from tokenized sequences
/// - Answer per-order and interpolated probability queries
/// - Build the normalized next-token distribution for a context
/// - Persist and reload itself as a versioned binary artifact
///
/// # Invariants
/// - After training the model is read-only; arbitrarily many
///   generation requests may query it concurrently
/// - `vocab` is sorted and deduplicated, so distribution iteration
///   order (hence generation under a fixed random source) is
///   deterministic
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TrigramModel {
	counts: NGramCounts,
	weights: Weights,
	/// Sorted ids of every token observed in training.
	vocab: Vec<TokenId>,
}

impl TrigramModel {
	/// Creates an empty model with the given weights.
	pub fn new(weights: Weights) -> Self {
		Self {
			counts: NGramCounts::new(),
			weights,
			vocab: Vec::new(),
		}
	}

	/// Accumulates every sequence of `corpus` into the count tables
	/// and rebuilds the sorted vocabulary.
	pub fn train(&mut self, corpus: &[Vec<TokenId>], bos: TokenId) {
		for tokens in corpus {
			self.counts.add_sequence(tokens, bos);
		}
		self.vocab = self.counts.token_ids().collect();
		self.vocab.sort_unstable();
		info!(
			"trigram model trained: {} sequences, {} tokens, vocab {}",
			corpus.len(),
			self.counts.total_tokens(),
			self.vocab.len()
		);
	}

	/// Sorted ids of every token observed in training.
	pub fn vocab(&self) -> &[TokenId] {
		&self.vocab
	}

	/// Interpolation weights in use.
	pub fn weights(&self) -> Weights {
		self.weights
	}

	/// `count(w) / total_tokens`, 0 when nothing was counted.
	pub fn mle_unigram(&self, w: TokenId) -> f64 {
		let total = self.counts.total_tokens();
		if total == 0 {
			return 0.0;
		}
		self.counts.unigram(w) as f64 / total as f64
	}

	/// `count(prev, w) / unigram_total(prev)`, 0 on a zero denominator.
	pub fn mle_bigram(&self, w: TokenId, prev: TokenId) -> f64 {
		let denom = self.counts.unigram_total(prev);
		if denom == 0 {
			return 0.0;
		}
		self.counts.bigram(prev, w) as f64 / denom as f64
	}

	/// `count(prev2, prev, w) / bigram_total(prev2, prev)`, 0 on a
	/// zero denominator.
	pub fn mle_trigram(&self, w: TokenId, prev: TokenId, prev2: TokenId) -> f64 {
		let denom = self.counts.bigram_total(prev2, prev);
		if denom == 0 {
			return 0.0;
		}
		self.counts.trigram(prev2, prev, w) as f64 / denom as f64
	}

	/// Weighted blend of the three estimates for `w` after the context
	/// `(prev2, prev)`.
	pub fn interpolated(&self, w: TokenId, prev: TokenId, prev2: TokenId) -> f64 {
		self.weights.trigram * self.mle_trigram(w, prev, prev2)
			+ self.weights.bigram * self.mle_bigram(w, prev)
			+ self.weights.unigram * self.mle_unigram(w)
	}

	/// Evaluates the interpolated probability of every vocabulary
	/// token after `(prev2, prev)` and normalizes the result to sum 1.
	///
	/// Falls back to a uniform distribution when the raw sum is 0; an
	/// empty vocabulary yields an empty distribution. O(|vocabulary|)
	/// per call.
	pub fn next_token_distribution(&self, prev2: TokenId, prev: TokenId) -> Vec<(TokenId, f64)> {
		let mut probs: Vec<(TokenId, f64)> = self
			.vocab
			.iter()
			.map(|&w| (w, self.interpolated(w, prev, prev2)))
			.collect();

		let total: f64 = probs.iter().map(|(_, p)| p).sum();
		if total > 0.0 {
			for (_, p) in &mut probs {
				*p /= total;
			}
		} else if !probs.is_empty() {
			let uniform = 1.0 / probs.len() as f64;
			for (_, p) in &mut probs {
				*p = uniform;
			}
		}
		probs
	}

	/// Loads the model artifact derived from `filepath` (`<stem>.lm`)
	/// if it exists, otherwise encodes the corpus line per story,
	/// appends the end-of-text marker to each, trains and writes the
	/// artifact for fast reload.
	pub fn from_corpus<P: AsRef<Path>>(
		filepath: P,
		tokenizer: &BpeTokenizer,
	) -> Result<Self, Box<dyn std::error::Error>> {
		let artifact_path = build_output_path(&filepath, "lm")?;
		if artifact_path.exists() {
			return Ok(Self::load(&artifact_path)?);
		}

		let specials = tokenizer
			.specials()
			.ok_or("Tokenizer has no registered reserved markers")?;

		let corpus: Vec<Vec<TokenId>> = read_lines(&filepath)?
			.iter()
			.filter(|line| !line.trim().is_empty())
			.map(|line| {
				let mut ids = tokenizer.encode(line);
				ids.push(specials.eot);
				ids
			})
			.collect();

		let mut model = Self::new(Weights::default());
		model.train(&corpus, specials.bos);
		model.save(&artifact_path)?;
		info!("model artifact written to {}", artifact_path.display());
		Ok(model)
	}

	/// Writes the model as a versioned binary artifact.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SaveError> {
		storage::save(path, ARTIFACT_MAGIC, self)
	}

	/// Reads a model artifact written by [`save`](Self::save).
	///
	/// # Errors
	/// Fails fast with a [`LoadError`] on a missing, truncated,
	/// foreign or malformed file.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
		storage::load(path, ARTIFACT_MAGIC)
	}
}
