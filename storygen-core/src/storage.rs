use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{LoadError, SaveError};

/// Current on-disk format version. Bump on any layout change.
pub(crate) const FORMAT_VERSION: u16 = 1;

/// Header layout: 4-byte magic + little-endian `u16` version.
const HEADER_LEN: usize = 6;

/// Serializes `value` with postcard and writes it behind a
/// magic/version header.
pub(crate) fn save<T: Serialize, P: AsRef<Path>>(
	path: P,
	magic: [u8; 4],
	value: &T,
) -> Result<(), SaveError> {
	let payload = postcard::to_stdvec(value)?;

	let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
	bytes.extend_from_slice(&magic);
	bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
	bytes.extend_from_slice(&payload);

	fs::write(path, bytes)?;
	Ok(())
}

/// Reads an artifact written by [`save`], validating magic and version
/// before touching the payload.
pub(crate) fn load<T: DeserializeOwned, P: AsRef<Path>>(
	path: P,
	magic: [u8; 4],
) -> Result<T, LoadError> {
	let bytes = fs::read(path)?;

	if bytes.len() < HEADER_LEN {
		return Err(LoadError::Truncated);
	}

	let found = [bytes[0], bytes[1], bytes[2], bytes[3]];
	if found != magic {
		return Err(LoadError::BadMagic { expected: magic, found });
	}

	let version = u16::from_le_bytes([bytes[4], bytes[5]]);
	if version != FORMAT_VERSION {
		return Err(LoadError::UnsupportedVersion(version));
	}

	Ok(postcard::from_bytes(&bytes[HEADER_LEN..])?)
}

#[cfg(test)]
mod tests {
	use super::*;

	const MAGIC: [u8; 4] = *b"SGTS";

	#[test]
	fn round_trip_preserves_value() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("value.bin");

		let value: Vec<(u32, u64)> = vec![(1, 10), (2, 20)];
		save(&path, MAGIC, &value).unwrap();

		let loaded: Vec<(u32, u64)> = load(&path, MAGIC).unwrap();
		assert_eq!(loaded, value);
	}

	#[test]
	fn truncated_file_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("short.bin");
		fs::write(&path, b"SG").unwrap();

		match load::<Vec<u32>, _>(&path, MAGIC) {
			Err(LoadError::Truncated) => (),
			other => panic!("expected Truncated, got {other:?}"),
		}
	}

	#[test]
	fn wrong_magic_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("other.bin");
		save(&path, *b"XXXX", &vec![1u32]).unwrap();

		match load::<Vec<u32>, _>(&path, MAGIC) {
			Err(LoadError::BadMagic { found, .. }) => assert_eq!(found, *b"XXXX"),
			other => panic!("expected BadMagic, got {other:?}"),
		}
	}

	#[test]
	fn future_version_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("future.bin");

		let mut bytes = Vec::new();
		bytes.extend_from_slice(&MAGIC);
		bytes.extend_from_slice(&99u16.to_le_bytes());
		fs::write(&path, bytes).unwrap();

		match load::<Vec<u32>, _>(&path, MAGIC) {
			Err(LoadError::UnsupportedVersion(99)) => (),
			other => panic!("expected UnsupportedVersion, got {other:?}"),
		}
	}

	#[test]
	fn garbage_payload_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("garbage.bin");

		let mut bytes = Vec::new();
		bytes.extend_from_slice(&MAGIC);
		bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
		bytes.extend_from_slice(&[0xFF; 3]);
		fs::write(&path, bytes).unwrap();

		assert!(matches!(
			load::<String, _>(&path, MAGIC),
			Err(LoadError::Malformed(_))
		));
	}
}
