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

//! C3: the memory guard.
//!
//! Grounded on `parallel2.py::check_mem_usage`, which reads
//! `psutil.virtual_memory().percent` and `socket.gethostname()` and raises
//! past a hard percentage, warns past a soft one. The percentage reader is
//! abstracted behind [`MemorySampler`] so tests can supply a deterministic
//! fake instead of needing Python's monkeypatch-a-module-function trick.

use std::sync::Arc;

use gethostname::gethostname;
use log::warn;
use sysinfo::{System, SystemExt};

use crate::error::StarmapError;

/// Reads the current memory-usage percentage. Implemented by
/// [`SystemMemorySampler`] in production; tests supply a fixed value.
pub trait MemorySampler: Send + Sync {
	fn sample(&self) -> f32;
}

/// Production sampler, backed by `sysinfo`.
pub struct SystemMemorySampler {
	system: parking_lot::Mutex<System>,
}

impl Default for SystemMemorySampler {
	fn default() -> Self {
		Self { system: parking_lot::Mutex::new(System::new()) }
	}
}

impl MemorySampler for SystemMemorySampler {
	fn sample(&self) -> f32 {
		let mut system = self.system.lock();
		system.refresh_memory();
		let total = system.total_memory();
		if total == 0 {
			return 0.0;
		}
		(system.used_memory() as f64 / total as f64 * 100.0) as f32
	}
}

/// Soft/hard memory thresholds, checked before and during dispatch.
///
/// The sampler is `Arc`-held rather than owned outright so an [`crate::
/// dispatch::Engine`] can keep one sampler alive for its whole lifetime
/// (a `sysinfo::System` refresh is not free) while still handing each
/// `Starmap::submit_all` call a fresh `MemoryGuard` of its own.
pub struct MemoryGuard {
	sampler: Arc<dyn MemorySampler>,
	soft_percent: f32,
	hard_percent: f32,
}

impl MemoryGuard {
	pub fn new(sampler: Arc<dyn MemorySampler>, soft_percent: f32, hard_percent: f32) -> Self {
		Self { sampler, soft_percent, hard_percent }
	}

	/// Backed by [`SystemMemorySampler`], with the thresholds from
	/// [`crate::config::Config`].
	pub fn system(soft_percent: f32, hard_percent: f32) -> Self {
		Self::new(Arc::new(SystemMemorySampler::default()), soft_percent, hard_percent)
	}

	/// Returns `Ok(used_percent)` if usage is below the hard limit, logging a
	/// warning (with the local hostname, matching `socket.gethostname()`) if
	/// it has crossed the soft limit. Returns `Err` once the hard limit is
	/// crossed.
	pub fn check(&self) -> Result<f32, StarmapError> {
		let used_percent = self.sampler.sample();
		if used_percent > self.hard_percent {
			return Err(StarmapError::MemoryExhausted {
				used_percent,
				hard_percent: self.hard_percent,
			});
		}
		if used_percent > self.soft_percent {
			warn!(
				"memory used: {:.1}% on {}",
				used_percent,
				gethostname().to_string_lossy()
			);
		}
		Ok(used_percent)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Fixed(f32);
	impl MemorySampler for Fixed {
		fn sample(&self) -> f32 {
			self.0
		}
	}

	#[test]
	fn ok_below_both_thresholds() {
		let guard = MemoryGuard::new(Arc::new(Fixed(50.0)), 80.0, 95.0);
		assert_eq!(guard.check().unwrap(), 50.0);
	}

	#[test]
	fn errs_past_the_hard_limit() {
		let guard = MemoryGuard::new(Arc::new(Fixed(99.0)), 80.0, 95.0);
		let err = guard.check().unwrap_err();
		assert!(matches!(err, StarmapError::MemoryExhausted { .. }));
	}

	#[test]
	fn warns_but_does_not_err_past_the_soft_limit() {
		let guard = MemoryGuard::new(Arc::new(Fixed(85.0)), 80.0, 95.0);
		assert_eq!(guard.check().unwrap(), 85.0);
	}
}
