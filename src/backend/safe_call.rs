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

//! The safe-call wrapper shared by every backend.
//!
//! Grounded verbatim on the teacher's `sa-work-queue::runner::get_single_job`/
//! `try_to_extract_panic_info`: a user callable is run behind
//! `catch_unwind` so a panic becomes a `TaskFailure` instead of taking down
//! a worker thread (or, for `Sequential`, the caller's own thread).
//! Corresponds to `safely_call`, imported and driven by
//! `original_source/openquake/baselib/parallel2.py`'s `Starmap._iter_sequential`.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::TaskFailure;

/// Run `f`, catching any panic and turning it into a `TaskFailure` rather
/// than propagating the unwind.
pub fn safe_call<F, Out>(f: F) -> Result<Out, TaskFailure>
where
	F: FnOnce() -> Result<Out, TaskFailure>,
{
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(result) => result,
		Err(payload) => Err(TaskFailure::from_panic(&*payload)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn passes_through_a_normal_result() {
		let result: Result<u32, TaskFailure> = safe_call(|| Ok(42));
		assert_eq!(result.unwrap(), 42);
	}

	#[test]
	fn turns_a_panic_into_a_task_failure() {
		let result: Result<u32, TaskFailure> = safe_call(|| panic!("kaboom"));
		let failure = result.unwrap_err();
		assert_eq!(failure.kind, "Panic");
		assert!(failure.message.contains("kaboom"));
	}
}
