// Copyright 2018-2019 Parity Technologies (UK) Ltd.
// This file is part of substrate-archive.

// substrate-archive is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// substrate-archive is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with substrate-archive. If not, see <http://www.gnu.org/licenses/>.

//! C1: the wire envelope exchanged between a dispatcher and a worker.
//!
//! Grounded on `original_source/openquake/baselib/parallel2.py`'s `Pickled`
//! class: a byte string plus enough metadata (`clsname`, `calc_id`) to be
//! self-describing, with `__len__`/`unpickle` round-tripping and an
//! identity-keyed dedup cache (`pickle_sequence`) so that passing the same
//! large object to many tasks serializes it once.

use std::any::type_name;
use std::sync::Arc;

use hashbrown::HashMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::EnvelopeError;

/// A serialized value plus the byte length of its encoding, so transfer
/// accounting (`crate::transfer`) never has to re-encode to learn a size.
#[derive(Debug, Clone)]
pub struct Envelope {
	bytes: Arc<[u8]>,
	type_name: &'static str,
}

impl Envelope {
	/// Encode `value` with `bincode`, the way the teacher's AMQP jobs encode
	/// their payload with `serde_json` — same shape, denser wire format.
	pub fn encode<T: Serialize>(value: &T) -> Result<Self, EnvelopeError> {
		let type_name = type_name::<T>();
		let bytes = bincode::serialize(value)
			.map_err(|source| EnvelopeError::NotSerializable { type_name, source })?;
		Ok(Self { bytes: Arc::from(bytes.into_boxed_slice()), type_name })
	}

	/// Decode into `T`. `type_name` on the error is the declared type, not
	/// necessarily the one that was originally encoded (the wire format
	/// itself carries no type tag, matching the spec's assumption that
	/// sender and receiver agree on the shape out of band).
	pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
		bincode::deserialize(&self.bytes).map_err(|source| EnvelopeError::Corrupt {
			type_name: self.type_name,
			source,
		})
	}

	/// Size in bytes of the encoded form, used directly by
	/// `crate::transfer::SentBag`/`ReceivedSummary` without re-encoding.
	pub fn size(&self) -> usize {
		self.bytes.len()
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes
	}

	/// Wrap bytes that arrived off the wire (so no `T` was ever in hand to
	/// encode from) into an `Envelope` ready for `decode`. The declared
	/// type name on any resulting `EnvelopeError` is generic, since the
	/// receiving side only learns the real type from its own expectations.
	pub fn from_wire(bytes: impl Into<Arc<[u8]>>) -> Self {
		Self { bytes: bytes.into(), type_name: "wire" }
	}

	fn ptr_key(&self) -> usize {
		Arc::as_ptr(&self.bytes) as *const u8 as usize
	}
}

/// Encode a sequence of values, deduplicating by pointer identity the way
/// `pickle_sequence` dedups by `id(obj)`: repeated `Arc`-identical values
/// reuse the same `Envelope` (and therefore the same backing allocation)
/// instead of being re-encoded.
///
/// `items` are passed as `Arc<T>` specifically so identity is observable —
/// two value-equal-but-distinct `T`s are *not* deduplicated, matching
/// Python's `id()`-based cache rather than a value-based one.
pub fn encode_sequence<T: Serialize>(items: &[Arc<T>]) -> Result<Vec<Envelope>, EnvelopeError> {
	let mut cache: HashMap<usize, Envelope> = HashMap::new();
	let mut out = Vec::with_capacity(items.len());
	for item in items {
		let key = Arc::as_ptr(item) as usize;
		if let Some(hit) = cache.get(&key) {
			out.push(hit.clone());
			continue;
		}
		let encoded = Envelope::encode(item.as_ref())?;
		cache.insert(key, encoded.clone());
		out.push(encoded);
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_a_value() {
		let env = Envelope::encode(&vec![1u32, 2, 3]).unwrap();
		let back: Vec<u32> = env.decode().unwrap();
		assert_eq!(back, vec![1, 2, 3]);
	}

	#[test]
	fn size_matches_encoded_length() {
		let env = Envelope::encode(&"hello".to_string()).unwrap();
		assert_eq!(env.size(), env.as_bytes().len());
	}

	#[test]
	fn dedups_identical_arcs() {
		let shared = Arc::new(vec![0u8; 4096]);
		let items = vec![shared.clone(), shared.clone(), Arc::new(vec![0u8; 4096])];
		let encoded = encode_sequence(&items).unwrap();
		// the first two share the same backing allocation
		assert_eq!(encoded[0].ptr_key(), encoded[1].ptr_key());
		// the third is value-equal but a distinct allocation, so it is not
		// deduplicated against the first two
		assert_ne!(encoded[0].ptr_key(), encoded[2].ptr_key());
	}
}
