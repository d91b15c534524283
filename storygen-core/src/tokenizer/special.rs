use serde::{Deserialize, Serialize};

use crate::tokenizer::bpe::TokenId;

/// Sentinel glyph marking the beginning of a sequence.
pub const BOS_GLYPH: &str = "\u{FFF3}";
/// Sentinel glyph marking the end of a sequence.
pub const EOS_GLYPH: &str = "\u{FFF0}";
/// Sentinel glyph marking the end of a paragraph.
pub const EOP_GLYPH: &str = "\u{FFF1}";
/// Sentinel glyph marking the end of a text.
pub const EOT_GLYPH: &str = "\u{FFF2}";

/// Ids of the four reserved marker tokens.
///
/// # Invariants
/// - All four ids are distinct vocabulary entries
/// - Marker ids never appear in the output of `encode` on plain text;
///   they are inserted programmatically during corpus preparation and
///   by the generator's context seeding
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecialTokens {
	/// Begin-of-sequence marker, prepended twice before counting.
	pub bos: TokenId,
	/// End-of-sequence marker.
	pub eos: TokenId,
	/// End-of-paragraph marker.
	pub eop: TokenId,
	/// End-of-text marker, stops generation.
	pub eot: TokenId,
}

impl SpecialTokens {
	/// Returns true if `id` is one of the four reserved markers.
	pub fn contains(&self, id: TokenId) -> bool {
		id == self.bos || id == self.eos || id == self.eop || id == self.eot
	}

	/// All marker ids, in registration order.
	pub fn all(&self) -> [TokenId; 4] {
		[self.bos, self.eos, self.eop, self.eot]
	}
}
