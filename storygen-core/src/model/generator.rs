use rand::Rng;

use crate::error::GenerateError;
use crate::model::generation_input::GenerationInput;
use crate::model::trigram::TrigramModel;
use crate::tokenizer::bpe::{BpeTokenizer, TokenId};

/// One item of a generated stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fragment {
	/// A content token id.
	Token(TokenId),
	/// A paragraph boundary; renders as a blank line.
	ParagraphBreak,
}

/// Streaming story generator.
///
/// A lazy, single-pass, non-restartable iterator over generated
/// fragments. Each step samples one token from the model's
/// interpolated next-token distribution and applies the pacing and
/// stop policies.
///
/// # Responsibilities
/// - Weighted sampling over the normalized distribution
/// - Rejection of premature end-of-text draws
/// - Silent consumption of reserved markers
/// - Paragraph pacing from sentence-terminal glyphs
/// - Hard and soft stop conditions, plus the iteration safety cap
///
/// # Invariants
/// - State is owned exclusively by this stream and discarded with it;
///   the model and tokenizer are only ever read
/// - The context always holds at least the two seeded begin markers
/// - At most `3 × max_length` raw iterations run; hitting the cap
///   yields [`GenerateError::Exhausted`] instead of looping on
#[derive(Debug)]
pub struct StoryStream<'a, R: Rng> {
	model: &'a TrigramModel,
	tokenizer: &'a BpeTokenizer,
	input: GenerationInput,
	rng: R,

	context: Vec<TokenId>,
	emitted: usize,
	sentences_in_para: usize,
	iterations: usize,
	iteration_cap: usize,
	pending: Option<Fragment>,
	done: bool,
}

impl<'a, R: Rng> StoryStream<'a, R> {
	/// Creates a stream whose context starts with two begin markers
	/// followed by the already-tokenized prefix.
	pub fn new(
		model: &'a TrigramModel,
		tokenizer: &'a BpeTokenizer,
		prefix: &[TokenId],
		input: GenerationInput,
		rng: R,
	) -> Self {
		let mut context = Vec::with_capacity(prefix.len() + 2);
		context.push(input.specials.bos);
		context.push(input.specials.bos);
		context.extend_from_slice(prefix);

		let iteration_cap = input.max_length() * 3;

		Self {
			model,
			tokenizer,
			input,
			rng,
			context,
			emitted: 0,
			sentences_in_para: 0,
			iterations: 0,
			iteration_cap,
			pending: None,
			done: false,
		}
	}

	/// Number of content tokens yielded so far.
	pub fn emitted(&self) -> usize {
		self.emitted
	}

	/// Weighted draw from the distribution after the last two context
	/// tokens. `None` when the vocabulary is empty.
	fn sample_next(&mut self) -> Option<TokenId> {
		let len = self.context.len();
		let dist = self
			.model
			.next_token_distribution(self.context[len - 2], self.context[len - 1]);
		if dist.is_empty() {
			return None;
		}

		// Cumulative subtraction over the normalized distribution.
		let mut r: f64 = self.rng.random();
		let mut fallback = None;
		for (token, prob) in dist {
			if r < prob {
				return Some(token);
			}
			r -= prob;
			fallback = Some(token);
		}

		// Rounding can leave a sliver past the last bucket.
		fallback
	}
}

impl<R: Rng> Iterator for StoryStream<'_, R> {
	type Item = Result<Fragment, GenerateError>;

	fn next(&mut self) -> Option<Self::Item> {
		if let Some(fragment) = self.pending.take() {
			return Some(Ok(fragment));
		}
		if self.done {
			return None;
		}

		loop {
			if self.iterations >= self.iteration_cap {
				self.done = true;
				return Some(Err(GenerateError::Exhausted(self.iteration_cap)));
			}
			self.iterations += 1;

			let Some(next) = self.sample_next() else {
				self.done = true;
				return Some(Err(GenerateError::EmptyVocabulary));
			};

			// An end-of-text draw before the minimum is discarded
			// outright and resampled; the discarded draw still counts
			// toward the iteration cap.
			if next == self.input.specials.eot && self.emitted < self.input.min_tokens() {
				continue;
			}

			self.context.push(next);

			if self.input.specials.contains(next) {
				if next == self.input.specials.eot {
					self.done = true;
					return None;
				}
				// Other markers are consumed silently: no yield, no count.
				continue;
			}

			self.emitted += 1;

			// Decoded solely to test sentence-terminal membership.
			let text = self.tokenizer.decode(&[next]);
			if self.input.ends_sentence(&text) {
				self.sentences_in_para += 1;
				let threshold = self.rng.random_range(5..=6);
				if self.sentences_in_para >= threshold
					&& self.emitted < self.input.max_length() - 80
				{
					self.pending = Some(Fragment::ParagraphBreak);
					self.sentences_in_para = 0;
				}
			}

			if self.emitted >= self.input.max_length() {
				self.done = true;
			} else if self.emitted >= self.input.min_tokens() && self.input.ends_sentence(&text) {
				// Soft cap: the stop probability rises near the hard cap.
				let near_cap = self.emitted as f64 > self.input.max_length() as f64 * 0.9;
				if near_cap || self.rng.random::<f64>() < 0.1 {
					self.done = true;
				}
			}

			return Some(Ok(Fragment::Token(next)));
		}
	}
}

/// Collects a whole stream into text.
///
/// Token ids accumulate and are decoded in batches flushed at
/// paragraph boundaries, so multi-byte glyphs spanning token
/// boundaries survive decoding; paragraph breaks render as blank
/// lines.
pub fn generate<R: Rng>(
	model: &TrigramModel,
	tokenizer: &BpeTokenizer,
	prefix: &[TokenId],
	input: GenerationInput,
	rng: R,
) -> Result<String, GenerateError> {
	let mut text = String::new();
	let mut pending: Vec<TokenId> = Vec::new();

	for fragment in StoryStream::new(model, tokenizer, prefix, input, rng) {
		match fragment? {
			Fragment::Token(id) => pending.push(id),
			Fragment::ParagraphBreak => {
				text.push_str(&tokenizer.decode(&pending));
				pending.clear();
				text.push_str("\n\n");
			}
		}
	}
	text.push_str(&tokenizer.decode(&pending));

	Ok(text)
}

#[cfg(test)]
mod tests {
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	use super::*;
	use crate::model::trigram::Weights;
	use crate::tokenizer::special::SpecialTokens;

	const FULL_STOP: TokenId = 46;

	fn marker_tokenizer() -> (BpeTokenizer, SpecialTokens) {
		let mut tokenizer = BpeTokenizer::new();
		let specials = tokenizer.ensure_specials();
		(tokenizer, specials)
	}

	/// Model whose only content token decodes to '.'.
	fn full_stop_model(specials: SpecialTokens) -> TrigramModel {
		let mut model = TrigramModel::new(Weights::default());
		let corpus: Vec<Vec<TokenId>> = vec![vec![FULL_STOP; 50]; 5];
		model.train(&corpus, specials.bos);
		model
	}

	#[test]
	fn emitted_count_stays_inside_the_bounds() {
		let (tokenizer, specials) = marker_tokenizer();
		let model = full_stop_model(specials);

		let stream = StoryStream::new(
			&model,
			&tokenizer,
			&[],
			GenerationInput::new(specials),
			StdRng::seed_from_u64(7),
		);
		let fragments: Vec<Fragment> = stream.map(|f| f.unwrap()).collect();

		let emitted = fragments
			.iter()
			.filter(|f| matches!(f, Fragment::Token(_)))
			.count();
		assert!(emitted <= 800, "emitted {emitted}");
		assert!(emitted >= 600, "emitted {emitted}");
	}

	#[test]
	fn paragraphs_hold_five_or_six_sentences() {
		let (tokenizer, specials) = marker_tokenizer();
		let model = full_stop_model(specials);

		let stream = StoryStream::new(
			&model,
			&tokenizer,
			&[],
			GenerationInput::new(specials),
			StdRng::seed_from_u64(11),
		);

		// Every content token decodes to '.', so tokens per paragraph
		// equal sentence-terminal marks per paragraph.
		let mut paragraphs = vec![0usize];
		for fragment in stream {
			match fragment.unwrap() {
				Fragment::Token(_) => *paragraphs.last_mut().unwrap() += 1,
				Fragment::ParagraphBreak => paragraphs.push(0),
			}
		}

		assert!(paragraphs.len() > 1);
		for &sentences in &paragraphs[..paragraphs.len() - 1] {
			assert!(
				(5..=6).contains(&sentences),
				"paragraph held {sentences} sentences"
			);
		}
	}

	#[test]
	fn generation_is_deterministic_under_a_fixed_seed() {
		let (tokenizer, specials) = marker_tokenizer();
		let model = full_stop_model(specials);

		let run = |seed: u64| {
			generate(
				&model,
				&tokenizer,
				&[],
				GenerationInput::new(specials),
				StdRng::seed_from_u64(seed),
			)
			.unwrap()
		};

		assert_eq!(run(42), run(42));
	}

	#[test]
	fn collected_text_contains_paragraph_breaks_only() {
		let (tokenizer, specials) = marker_tokenizer();
		let model = full_stop_model(specials);

		let text = generate(
			&model,
			&tokenizer,
			&[],
			GenerationInput::new(specials),
			StdRng::seed_from_u64(3),
		)
		.unwrap();

		assert!(text.contains("\n\n"));
		// Marker glyphs never reach the visible stream.
		assert!(!text.contains('\u{FFF0}'));
		assert!(!text.contains('\u{FFF2}'));
		assert!(!text.contains('\u{FFF3}'));
	}

	#[test]
	fn marker_only_model_exhausts_the_iteration_cap() {
		let (tokenizer, specials) = marker_tokenizer();
		let mut model = TrigramModel::new(Weights::default());
		// Only markers ever get probability mass, so nothing can be
		// emitted and the minimum can never be reached.
		model.train(&[vec![specials.eot], vec![specials.eot]], specials.bos);

		let mut stream = StoryStream::new(
			&model,
			&tokenizer,
			&[],
			GenerationInput::new(specials),
			StdRng::seed_from_u64(5),
		);

		match stream.next() {
			Some(Err(GenerateError::Exhausted(cap))) => assert_eq!(cap, 2400),
			other => panic!("expected Exhausted, got {other:?}"),
		}
		assert!(stream.next().is_none());
	}

	#[test]
	fn empty_model_reports_empty_vocabulary() {
		let (tokenizer, specials) = marker_tokenizer();
		let model = TrigramModel::new(Weights::default());

		let mut stream = StoryStream::new(
			&model,
			&tokenizer,
			&[],
			GenerationInput::new(specials),
			StdRng::seed_from_u64(1),
		);

		assert!(matches!(
			stream.next(),
			Some(Err(GenerateError::EmptyVocabulary))
		));
		assert!(stream.next().is_none());
	}
}
