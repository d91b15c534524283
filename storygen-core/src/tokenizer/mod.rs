//! Byte-level BPE tokenization.
//!
//! The tokenizer learns an ordered list of merge rules from a raw
//! corpus and maps between text and integer token ids. Ids 0–255 are
//! reserved for single raw bytes; every learned merge mints the next
//! sequential id, so replaying the merge list reproduces identical ids.

/// Merge learning, encoding, decoding and artifact persistence.
pub mod bpe;

/// Reserved marker tokens (BOS/EOS/EOP/EOT).
///
/// Markers are ordinary vocabulary entries registered after training;
/// they are never emitted as visible content.
pub mod special;
