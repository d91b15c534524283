use thiserror::Error;

/// Errors raised while loading a persisted artifact.
///
/// A malformed or incomplete file is a fast, reported failure; it is
/// always distinguishable from a successful load of an empty model,
/// which simply yields a value with empty tables.
#[derive(Error, Debug)]
pub enum LoadError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Artifact file is too small to contain a header")]
	Truncated,

	#[error("Invalid magic number: expected {expected:?}, got {found:?}")]
	BadMagic { expected: [u8; 4], found: [u8; 4] },

	#[error("Unsupported artifact version: {0}")]
	UnsupportedVersion(u16),

	#[error("Malformed artifact payload: {0}")]
	Malformed(#[from] postcard::Error),
}

/// Errors raised while saving a persisted artifact.
#[derive(Error, Debug)]
pub enum SaveError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization failed: {0}")]
	Encode(#[from] postcard::Error),
}

/// Errors raised by the streaming generator.
#[derive(Error, Debug)]
pub enum GenerateError {
	/// The rejection-sampling loop hit its hard iteration bound
	/// without reaching a stop condition.
	#[error("Generation exceeded {0} iterations without reaching a stop condition")]
	Exhausted(usize),

	/// The model has no vocabulary to sample from.
	#[error("Model vocabulary is empty")]
	EmptyVocabulary,
}
