//! Trigram language modeling and story generation.
//!
//! This module provides the counting, probability and generation
//! layers of the pipeline:
//! - Frequency tables over tokenized corpora (`counts`)
//! - Interpolated next-token probabilities (`trigram`)
//! - Generation parameters (`generation_input`)
//! - The streaming generator (`generator`)

/// Unigram/bigram/trigram frequency tables and context totals.
///
/// Accumulated once during training, read-only afterward.
pub mod counts;

/// Interpolated trigram model over the count tables.
///
/// Blends the three maximum-likelihood estimates with fixed weights
/// into a normalized next-token distribution.
pub mod trigram;

/// Generation parameters: length bounds, reserved markers and the
/// sentence-terminal glyph set used for pacing.
pub mod generation_input;

/// Streaming generator: bounded stochastic emission loop with
/// paragraph pacing, rejection sampling and stop policies.
pub mod generator;
