use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, SaveError};
use crate::io::{build_output_path, read_file};
use crate::storage;
use crate::tokenizer::special::{BOS_GLYPH, EOP_GLYPH, EOS_GLYPH, EOT_GLYPH, SpecialTokens};

/// Integer id of a vocabulary token.
pub type TokenId = u32;

const ARTIFACT_MAGIC: [u8; 4] = *b"SGTK";

/// A single learned merge rule.
///
/// Encoding applies rules in exactly the order they were learned, each
/// rule in one full left-to-right pass before the next one runs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeRule {
	/// Left token of the merged pair.
	pub left: TokenId,
	/// Right token of the merged pair.
	pub right: TokenId,
	/// Id of the concatenated token.
	pub result: TokenId,
}

/// Byte-level BPE tokenizer.
///
/// The tokenizer stores a bidirectional byte-sequence ↔ id vocabulary
/// and an append-only ordered list of merge rules learned from a
/// training corpus.
///
/// # Responsibilities
/// - Learn merge rules by greedy most-frequent-pair selection
/// - Encode text to token ids and decode ids back to text
/// - Register the reserved marker tokens after training
/// - Persist and reload itself as a versioned binary artifact
///
/// # Invariants
/// - Ids 0–255 map to the 256 single raw bytes
/// - Ids ≥ 256 are assigned sequentially, one per learned merge, in
///   training order; replaying the merge list reproduces identical ids
/// - `id_to_token` is the exact inverse of `vocab`
#[derive(Serialize, Deserialize, Debug)]
pub struct BpeTokenizer {
	/// Token byte sequence to id.
	vocab: HashMap<Vec<u8>, TokenId>,
	/// Id to token byte sequence (derived reverse map).
	id_to_token: HashMap<TokenId, Vec<u8>>,
	/// Ordered merge rules, applied in this order on encode.
	merges: Vec<MergeRule>,
	/// Next id to assign.
	next_id: TokenId,
	/// Reserved markers, present once registered.
	specials: Option<SpecialTokens>,
}

impl Default for BpeTokenizer {
	fn default() -> Self {
		Self::new()
	}
}

impl BpeTokenizer {
	/// Creates a tokenizer whose vocabulary holds the 256 raw bytes.
	pub fn new() -> Self {
		let mut vocab = HashMap::with_capacity(256);
		let mut id_to_token = HashMap::with_capacity(256);
		for byte in 0..=255u8 {
			vocab.insert(vec![byte], TokenId::from(byte));
			id_to_token.insert(TokenId::from(byte), vec![byte]);
		}
		Self {
			vocab,
			id_to_token,
			merges: Vec::new(),
			next_id: 256,
			specials: None,
		}
	}

	/// Number of vocabulary entries, markers included.
	pub fn vocab_size(&self) -> usize {
		self.vocab.len()
	}

	/// Ordered merge rules learned so far.
	pub fn merges(&self) -> &[MergeRule] {
		&self.merges
	}

	/// Reserved markers, if [`ensure_specials`](Self::ensure_specials)
	/// has run.
	pub fn specials(&self) -> Option<SpecialTokens> {
		self.specials
	}

	/// Byte sequence of a token id, `None` for an unknown id.
	pub fn token_bytes(&self, id: TokenId) -> Option<&[u8]> {
		self.id_to_token.get(&id).map(Vec::as_slice)
	}

	/// Returns true if `id` is a registered reserved marker.
	pub fn is_special(&self, id: TokenId) -> bool {
		self.specials.is_some_and(|s| s.contains(id))
	}

	/// Learns merge rules from a raw corpus until `vocab_size` entries
	/// exist or no adjacent pair occurs more than once.
	///
	/// # Behavior
	/// - The corpus is split into words at space bytes; the space stays
	///   attached to the end of its word, so merges never cross word
	///   boundaries
	/// - Each step picks the pair with the highest aggregate count over
	///   all words weighted by word frequency; ties go to the
	///   lexicographically smallest `(left, right)` id pair, which keeps
	///   training reproducible
	/// - Every word is then rewritten with one non-overlapping
	///   left-to-right replacement pass, preserving frequencies
	///
	/// # Notes
	/// - Full corpus rescan per merge; fine for vocabularies in the low
	///   thousands
	/// - Expects a freshly constructed tokenizer; markers are
	///   registered separately after training
	pub fn train(&mut self, text: &str, vocab_size: usize) {
		info!("training byte-level BPE on {} bytes", text.len());

		// Word (as a token id sequence) to corpus frequency.
		let mut words: HashMap<Vec<TokenId>, u64> = HashMap::new();
		let mut current: Vec<TokenId> = Vec::new();
		for byte in text.bytes() {
			current.push(TokenId::from(byte));
			if byte == b' ' {
				*words.entry(std::mem::take(&mut current)).or_insert(0) += 1;
			}
		}
		if !current.is_empty() {
			*words.entry(current).or_insert(0) += 1;
		}

		while self.vocab.len() < vocab_size {
			let pairs = Self::pair_counts(&words);

			// Highest aggregate count first; on ties the smaller
			// (left, right) pair wins.
			let best = pairs
				.iter()
				.max_by(|(pair_a, count_a), (pair_b, count_b)| {
					count_a.cmp(count_b).then_with(|| pair_b.cmp(pair_a))
				})
				.map(|(&pair, &count)| (pair, count));

			let Some(((left, right), count)) = best else {
				break;
			};
			if count < 2 {
				break;
			}

			let rule = self.push_merge(left, right);

			let mut rewritten = HashMap::with_capacity(words.len());
			for (tokens, freq) in &words {
				*rewritten
					.entry(Self::apply_merge(tokens, &rule))
					.or_insert(0) += freq;
			}
			words = rewritten;

			if self.merges.len() % 100 == 0 {
				debug!("merge {}: vocab size {}", self.merges.len(), self.vocab.len());
			}
		}

		info!("BPE training complete, final vocab size {}", self.vocab.len());
	}

	/// Encodes text into token ids.
	///
	/// Starts from one token per raw byte, then applies every merge
	/// rule in training order, one exhaustive left-to-right
	/// non-overlapping pass per rule. Never fails: the byte vocabulary
	/// covers any input.
	pub fn encode(&self, text: &str) -> Vec<TokenId> {
		let mut tokens: Vec<TokenId> = text.bytes().map(TokenId::from).collect();
		for rule in &self.merges {
			if tokens.len() < 2 {
				break;
			}
			tokens = Self::apply_merge(&tokens, rule);
		}
		tokens
	}

	/// Decodes token ids back to text.
	///
	/// Unknown ids and reserved markers contribute nothing; invalid
	/// UTF-8 sequences are replaced. Never raises.
	pub fn decode(&self, ids: &[TokenId]) -> String {
		let mut bytes = Vec::new();
		for &id in ids {
			if self.is_special(id) {
				continue;
			}
			if let Some(token) = self.id_to_token.get(&id) {
				bytes.extend_from_slice(token);
			}
		}
		String::from_utf8_lossy(&bytes).into_owned()
	}

	/// Registers the four reserved markers as vocabulary entries and
	/// returns their ids.
	///
	/// Idempotent: a second call returns the ids registered by the
	/// first one.
	pub fn ensure_specials(&mut self) -> SpecialTokens {
		if let Some(specials) = self.specials {
			return specials;
		}
		let specials = SpecialTokens {
			bos: self.intern(BOS_GLYPH.as_bytes()),
			eos: self.intern(EOS_GLYPH.as_bytes()),
			eop: self.intern(EOP_GLYPH.as_bytes()),
			eot: self.intern(EOT_GLYPH.as_bytes()),
		};
		self.specials = Some(specials);
		specials
	}

	/// Loads the tokenizer artifact derived from `filepath`
	/// (`<stem>.tok`) if it exists, otherwise trains on the raw file,
	/// registers the markers and writes the artifact for fast reload.
	pub fn from_corpus<P: AsRef<Path>>(
		filepath: P,
		vocab_size: usize,
	) -> Result<Self, Box<dyn std::error::Error>> {
		let artifact_path = build_output_path(&filepath, "tok")?;
		if artifact_path.exists() {
			return Ok(Self::load(&artifact_path)?);
		}

		let text = read_file(&filepath)?;
		let mut tokenizer = Self::new();
		tokenizer.train(&text, vocab_size);
		tokenizer.ensure_specials();
		tokenizer.save(&artifact_path)?;
		info!("tokenizer artifact written to {}", artifact_path.display());
		Ok(tokenizer)
	}

	/// Writes the tokenizer as a versioned binary artifact.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SaveError> {
		storage::save(path, ARTIFACT_MAGIC, self)
	}

	/// Reads a tokenizer artifact written by [`save`](Self::save).
	///
	/// # Errors
	/// Fails fast with a [`LoadError`] on a missing, truncated,
	/// foreign or malformed file.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
		storage::load(path, ARTIFACT_MAGIC)
	}

	/// Aggregates adjacent-pair counts over all words, weighted by
	/// word frequency.
	fn pair_counts(words: &HashMap<Vec<TokenId>, u64>) -> HashMap<(TokenId, TokenId), u64> {
		let mut pairs: HashMap<(TokenId, TokenId), u64> = HashMap::new();
		for (tokens, freq) in words {
			for window in tokens.windows(2) {
				*pairs.entry((window[0], window[1])).or_insert(0) += freq;
			}
		}
		pairs
	}

	/// One non-overlapping left-to-right replacement pass of `rule`
	/// over `tokens`.
	fn apply_merge(tokens: &[TokenId], rule: &MergeRule) -> Vec<TokenId> {
		let mut out = Vec::with_capacity(tokens.len());
		let mut i = 0;
		while i < tokens.len() {
			if i + 1 < tokens.len() && tokens[i] == rule.left && tokens[i + 1] == rule.right {
				out.push(rule.result);
				i += 2;
			} else {
				out.push(tokens[i]);
				i += 1;
			}
		}
		out
	}

	/// Mints the merged token for `(left, right)` and appends the rule.
	fn push_merge(&mut self, left: TokenId, right: TokenId) -> MergeRule {
		let mut bytes = self.id_to_token[&left].clone();
		bytes.extend_from_slice(&self.id_to_token[&right]);

		let result = self.intern(&bytes);
		let rule = MergeRule { left, right, result };
		self.merges.push(rule);
		rule
	}

	/// Returns the id of `bytes`, assigning the next sequential id if
	/// the sequence is not in the vocabulary yet.
	fn intern(&mut self, bytes: &[u8]) -> TokenId {
		if let Some(&id) = self.vocab.get(bytes) {
			return id;
		}
		let id = self.next_id;
		self.next_id += 1;
		self.vocab.insert(bytes.to_vec(), id);
		self.id_to_token.insert(id, bytes.to_vec());
		id
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn trained(corpus: &str, vocab_size: usize) -> BpeTokenizer {
		let mut tokenizer = BpeTokenizer::new();
		tokenizer.train(corpus, vocab_size);
		tokenizer
	}

	#[test]
	fn first_merge_is_the_most_frequent_pair() {
		let tokenizer = trained("ab ab ab ab cd cd", 258);

		// ('a','b') and ('b',' ') both occur four times; the smaller
		// pair must win the tie.
		assert_eq!(
			tokenizer.merges()[0],
			MergeRule { left: 97, right: 98, result: 256 }
		);
		assert_eq!(tokenizer.encode("ab"), vec![256]);
	}

	#[test]
	fn training_is_reproducible() {
		let a = trained("the cat sat on the mat the cat sat", 300);
		let b = trained("the cat sat on the mat the cat sat", 300);

		assert_eq!(a.merges(), b.merges());
		assert_eq!(a.vocab_size(), b.vocab_size());
		assert_eq!(a.encode("the cat"), b.encode("the cat"));
	}

	#[test]
	fn vocabulary_never_exceeds_the_requested_size() {
		let tokenizer = trained("aa aa aa bb bb cc ", 258);
		assert!(tokenizer.vocab_size() <= 258);
		assert_eq!(tokenizer.vocab_size(), 258);
	}

	#[test]
	fn training_stops_when_pairs_are_exhausted() {
		// Every adjacent pair occurs exactly once.
		let tokenizer = trained("ab", 300);
		assert!(tokenizer.merges().is_empty());
		assert_eq!(tokenizer.vocab_size(), 256);
	}

	#[test]
	fn re_encoding_decoded_text_is_stable() {
		let tokenizer = trained("the cat sat on the mat the cat sat on the mat ", 280);

		let first = tokenizer.encode("the cat sat on the mat");
		let second = tokenizer.encode(&tokenizer.decode(&first));
		assert_eq!(first, second);
	}

	#[test]
	fn decode_skips_unknown_ids() {
		let tokenizer = BpeTokenizer::new();
		assert_eq!(tokenizer.decode(&[9999]), "");
		assert_eq!(tokenizer.decode(&[104, 9999, 105]), "hi");
	}

	#[test]
	fn decode_replaces_invalid_utf8() {
		let tokenizer = BpeTokenizer::new();
		// A lone continuation byte is not valid UTF-8.
		assert_eq!(tokenizer.decode(&[0xE2]), "\u{FFFD}");
	}

	#[test]
	fn marker_registration_is_idempotent_and_invisible() {
		let mut tokenizer = trained("ab ab ab ab ", 257);
		let size_before = tokenizer.vocab_size();

		let first = tokenizer.ensure_specials();
		let second = tokenizer.ensure_specials();
		assert_eq!(first, second);
		assert_eq!(tokenizer.vocab_size(), size_before + 4);

		for id in first.all() {
			assert!(tokenizer.is_special(id));
			assert_eq!(tokenizer.decode(&[id]), "");
		}
	}

	#[test]
	fn markers_never_come_out_of_encode() {
		let mut tokenizer = trained("ab ab ab ab ", 258);
		let specials = tokenizer.ensure_specials();

		let ids = tokenizer.encode("ab ab plain text");
		assert!(ids.iter().all(|id| !specials.contains(*id)));
	}

	#[test]
	fn artifact_round_trips_byte_for_byte() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("tokenizer.tok");

		let mut tokenizer = trained("the cat sat on the mat the cat sat ", 280);
		let specials = tokenizer.ensure_specials();
		tokenizer.save(&path).unwrap();

		let loaded = BpeTokenizer::load(&path).unwrap();
		assert_eq!(loaded.merges(), tokenizer.merges());
		assert_eq!(loaded.vocab_size(), tokenizer.vocab_size());
		assert_eq!(loaded.specials(), Some(specials));
		assert_eq!(loaded.encode("the cat sat"), tokenizer.encode("the cat sat"));
		for id in 0..loaded.next_id {
			assert_eq!(loaded.token_bytes(id), tokenizer.token_bytes(id));
		}
	}

	#[test]
	fn loading_garbage_is_a_fast_failure() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("broken.tok");
		std::fs::write(&path, b"not an artifact").unwrap();

		assert!(matches!(
			BpeTokenizer::load(&path),
			Err(LoadError::BadMagic { .. })
		));
	}
}
