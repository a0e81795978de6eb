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

//! A3: process-wide configuration.
//!
//! Grounded on the teacher's binary crates (`node-template-archive`,
//! `polkadot-archive`), which each parse a `toml` config file into a
//! `serde`-derived struct at startup. `Config` here covers the dispatch
//! core's own ambient knobs: which backend to default to, the memory
//! guard's thresholds, and the remote-fleet broker address.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispatch::BackendKind;
use crate::error::StarmapResult;

fn default_backend() -> String {
	// spec.md §4.5: "explicit argument wins; else a process-wide
	// configuration value is consulted; else local-pool."
	"local-pool".to_string()
}

fn default_soft_mem_percent() -> f32 {
	80.0
}

fn default_hard_mem_percent() -> f32 {
	95.0
}

fn default_local_pool_threads() -> usize {
	num_cpus::get()
}

fn default_task_queue() -> String {
	crate::DEFAULT_QUEUE.to_string()
}

fn default_amqp_url() -> String {
	"amqp://127.0.0.1:5672/%2f".to_string()
}

/// Process-wide settings, loadable from a TOML file or built
/// programmatically with [`Config::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	#[serde(default = "default_backend")]
	pub backend: String,
	#[serde(default = "default_soft_mem_percent")]
	pub soft_mem_percent: f32,
	#[serde(default = "default_hard_mem_percent")]
	pub hard_mem_percent: f32,
	#[serde(default = "default_local_pool_threads")]
	pub local_pool_threads: usize,
	#[serde(default = "default_task_queue")]
	pub task_queue: String,
	#[serde(default = "default_amqp_url")]
	pub amqp_url: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			backend: default_backend(),
			soft_mem_percent: default_soft_mem_percent(),
			hard_mem_percent: default_hard_mem_percent(),
			local_pool_threads: default_local_pool_threads(),
			task_queue: default_task_queue(),
			amqp_url: default_amqp_url(),
		}
	}
}

impl Config {
	pub fn from_toml_str(contents: &str) -> StarmapResult<Self> {
		Ok(toml::from_str(contents)?)
	}

	pub fn from_toml_file(path: impl AsRef<Path>) -> StarmapResult<Self> {
		let contents = std::fs::read_to_string(path)?;
		Self::from_toml_str(&contents)
	}

	pub fn backend_kind(&self) -> BackendKind {
		match self.backend.as_str() {
			"local-pool" | "local_pool" => BackendKind::LocalPool,
			"remote-fleet" | "remote_fleet" => BackendKind::RemoteFleet,
			_ => BackendKind::Sequential,
		}
	}

	pub fn local_pool_threads(&self) -> usize {
		self.local_pool_threads.max(1)
	}

	pub fn remote_fleet_url(&self) -> String {
		self.amqp_url.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::StarmapError;

	#[test]
	fn defaults_are_sane() {
		let config = Config::default();
		assert_eq!(config.backend_kind(), BackendKind::LocalPool);
		assert!(config.soft_mem_percent < config.hard_mem_percent);
	}

	#[test]
	fn parses_a_partial_toml_document() {
		let config = Config::from_toml_str("backend = \"local-pool\"\n").unwrap();
		assert_eq!(config.backend_kind(), BackendKind::LocalPool);
		assert_eq!(config.soft_mem_percent, default_soft_mem_percent());
	}

	#[test]
	fn rejects_malformed_toml() {
		let err = Config::from_toml_str("not valid = = toml").unwrap_err();
		assert!(matches!(err, StarmapError::Config(_)));
	}

	#[test]
	fn loads_from_a_file_on_disk() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		use std::io::Write;
		writeln!(file, "backend = \"remote-fleet\"\nhard_mem_percent = 99.0").unwrap();
		let config = Config::from_toml_file(file.path()).unwrap();
		assert_eq!(config.backend_kind(), BackendKind::RemoteFleet);
		assert_eq!(config.hard_mem_percent, 99.0);
	}
}
