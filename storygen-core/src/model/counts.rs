use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tokenizer::bpe::TokenId;

/// Frequency tables for a trigram language model.
///
/// Tables are keyed by composite id tuples and accumulated over every
/// training sequence; the context totals are the denominators of the
/// conditional estimates.
///
/// # Invariants
/// - Counts only grow during training and are never mutated afterward
/// - `unigram_totals[w]` equals the number of times `w` was followed by
///   any token; `bigram_totals[(v, w)]` likewise for the ordered pair
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct NGramCounts {
	unigram: HashMap<TokenId, u64>,
	bigram: HashMap<(TokenId, TokenId), u64>,
	trigram: HashMap<(TokenId, TokenId, TokenId), u64>,
	unigram_totals: HashMap<TokenId, u64>,
	bigram_totals: HashMap<(TokenId, TokenId), u64>,
	total_tokens: u64,
}

impl NGramCounts {
	/// Creates empty tables.
	pub fn new() -> Self {
		Self::default()
	}

	/// Accumulates one tokenized sequence.
	///
	/// Prepends two begin-of-sequence markers, then walks the extended
	/// sequence once: the unigram count of the current token always
	/// grows; the bigram count and the preceding token's total grow
	/// once at least one prior token exists; the trigram count and the
	/// preceding pair's total grow once at least two exist. The scalar
	/// token total includes the two markers.
	pub fn add_sequence(&mut self, tokens: &[TokenId], bos: TokenId) {
		let mut full = Vec::with_capacity(tokens.len() + 2);
		full.push(bos);
		full.push(bos);
		full.extend_from_slice(tokens);

		self.total_tokens += full.len() as u64;

		for i in 0..full.len() {
			*self.unigram.entry(full[i]).or_insert(0) += 1;

			if i >= 1 {
				*self.bigram.entry((full[i - 1], full[i])).or_insert(0) += 1;
				*self.unigram_totals.entry(full[i - 1]).or_insert(0) += 1;
			}
			if i >= 2 {
				*self
					.trigram
					.entry((full[i - 2], full[i - 1], full[i]))
					.or_insert(0) += 1;
				*self
					.bigram_totals
					.entry((full[i - 2], full[i - 1]))
					.or_insert(0) += 1;
			}
		}
	}

	/// Count of `w`.
	pub fn unigram(&self, w: TokenId) -> u64 {
		self.unigram.get(&w).copied().unwrap_or(0)
	}

	/// Count of the ordered pair `(prev, w)`.
	pub fn bigram(&self, prev: TokenId, w: TokenId) -> u64 {
		self.bigram.get(&(prev, w)).copied().unwrap_or(0)
	}

	/// Count of the ordered triple `(prev2, prev, w)`.
	pub fn trigram(&self, prev2: TokenId, prev: TokenId, w: TokenId) -> u64 {
		self.trigram.get(&(prev2, prev, w)).copied().unwrap_or(0)
	}

	/// Successor total of `prev` (bigram denominator).
	pub fn unigram_total(&self, prev: TokenId) -> u64 {
		self.unigram_totals.get(&prev).copied().unwrap_or(0)
	}

	/// Successor total of `(prev2, prev)` (trigram denominator).
	pub fn bigram_total(&self, prev2: TokenId, prev: TokenId) -> u64 {
		self.bigram_totals.get(&(prev2, prev)).copied().unwrap_or(0)
	}

	/// Total number of counted tokens, begin markers included.
	pub fn total_tokens(&self) -> u64 {
		self.total_tokens
	}

	/// Iterator over every token id seen in training.
	pub fn token_ids(&self) -> impl Iterator<Item = TokenId> + '_ {
		self.unigram.keys().copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const BOS: TokenId = 900;

	#[test]
	fn one_sequence_fills_every_table() {
		let mut counts = NGramCounts::new();
		counts.add_sequence(&[1, 2, 1], BOS);

		// Extended walk: [BOS, BOS, 1, 2, 1]
		assert_eq!(counts.total_tokens(), 5);
		assert_eq!(counts.unigram(BOS), 2);
		assert_eq!(counts.unigram(1), 2);
		assert_eq!(counts.unigram(2), 1);

		assert_eq!(counts.bigram(BOS, BOS), 1);
		assert_eq!(counts.bigram(BOS, 1), 1);
		assert_eq!(counts.bigram(1, 2), 1);
		assert_eq!(counts.bigram(2, 1), 1);

		assert_eq!(counts.trigram(BOS, BOS, 1), 1);
		assert_eq!(counts.trigram(BOS, 1, 2), 1);
		assert_eq!(counts.trigram(1, 2, 1), 1);

		// BOS precedes BOS once and 1 once.
		assert_eq!(counts.unigram_total(BOS), 2);
		assert_eq!(counts.unigram_total(1), 1);
		assert_eq!(counts.unigram_total(2), 1);

		assert_eq!(counts.bigram_total(BOS, BOS), 1);
		assert_eq!(counts.bigram_total(1, 2), 1);
		// The last token has no successor.
		assert_eq!(counts.bigram_total(2, 1), 0);
	}

	#[test]
	fn sequences_accumulate_into_shared_tables() {
		let mut counts = NGramCounts::new();
		counts.add_sequence(&[7], BOS);
		counts.add_sequence(&[7], BOS);

		assert_eq!(counts.total_tokens(), 6);
		assert_eq!(counts.unigram(7), 2);
		assert_eq!(counts.bigram(BOS, 7), 2);
		assert_eq!(counts.trigram(BOS, BOS, 7), 2);
		assert_eq!(counts.bigram_total(BOS, BOS), 2);
	}

	#[test]
	fn unseen_keys_count_zero() {
		let counts = NGramCounts::new();
		assert_eq!(counts.unigram(1), 0);
		assert_eq!(counts.bigram(1, 2), 0);
		assert_eq!(counts.trigram(1, 2, 3), 0);
		assert_eq!(counts.unigram_total(1), 0);
		assert_eq!(counts.bigram_total(1, 2), 0);
		assert_eq!(counts.total_tokens(), 0);
	}
}
