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

use thiserror::Error;

pub type StarmapResult<T> = Result<T, StarmapError>;

/// The error taxonomy from §7: every variant is fatal to the job unless
/// noted on the variant.
#[derive(Debug, Error)]
pub enum StarmapError {
	/// An argument or result couldn't be encoded/decoded.
	#[error(transparent)]
	Envelope(#[from] EnvelopeError),

	/// The user callable raised inside a worker. Fatal: the first one
	/// observed by a result stream terminates the fold.
	#[error("task {task_name:?} failed ({kind}): {message}")]
	RemoteTaskError { task_name: String, kind: String, message: String },

	/// A backend-level connection/liveness failure (lost worker, broken
	/// channel, dropped consumer).
	#[error("worker lost: {0}")]
	WorkerLost(String),

	/// The hard memory threshold was crossed on the client.
	#[error("memory exhausted: using {used_percent:.1}% (hard limit {hard_percent:.1}%)")]
	MemoryExhausted { used_percent: f32, hard_percent: f32 },

	/// The selected backend could not be brought up. Fatal at submission.
	#[error("backend unavailable: {0}")]
	BackendUnavailable(String),

	/// The remote-fleet transport itself errored.
	#[cfg(feature = "remote-fleet")]
	#[error(transparent)]
	Mq(#[from] lapin::Error),

	/// Failure loading/parsing a TOML configuration file.
	#[error(transparent)]
	Config(#[from] toml::de::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("{0}")]
	Msg(String),
}

impl From<String> for StarmapError {
	fn from(err: String) -> StarmapError {
		StarmapError::Msg(err)
	}
}

impl From<&str> for StarmapError {
	fn from(err: &str) -> StarmapError {
		StarmapError::Msg(err.to_string())
	}
}

/// Errors raised by the envelope codec (C1).
#[derive(Debug, Error)]
pub enum EnvelopeError {
	/// `value` contained an unencodable sub-value. The message names the
	/// enclosing type, per the spec.
	#[error("could not serialize value of type `{type_name}`: {source}")]
	NotSerializable {
		type_name: &'static str,
		#[source]
		source: bincode::Error,
	},

	/// The byte string was malformed on decode.
	#[error("corrupt envelope of declared type `{type_name}`: {source}")]
	Corrupt {
		type_name: &'static str,
		#[source]
		source: bincode::Error,
	},
}

/// A single failure raised by the user callable inside a worker, carried
/// back as the non-empty `error_kind`/`value` pair of a result triple (see
/// `crate::dispatch::ResultTriple`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskFailure {
	pub kind: String,
	pub message: String,
}

impl TaskFailure {
	pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
		Self { kind: kind.into(), message: message.into() }
	}

	/// Reconstruct a `TaskFailure` from a caught panic payload, the way the
	/// teacher's job runner turns a panic into a `PerformError`.
	pub fn from_panic(payload: &(dyn std::any::Any + Send + 'static)) -> Self {
		let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
			s.to_string()
		} else if let Some(s) = payload.downcast_ref::<String>() {
			s.clone()
		} else {
			"task panicked".to_string()
		};
		Self { kind: "Panic".to_string(), message }
	}
}
