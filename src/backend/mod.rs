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

//! The three interchangeable execution strategies (C5's "backend" capability).
//!
//! Grounded on the REDESIGN FLAGS resolution in `SPEC_FULL.md` §9: rather
//! than branching inline on an `OQ_DISTRIBUTE`-style enum the way
//! `Starmap.submit_all` does in `parallel2.py`, each strategy is an
//! independent implementation of the [`Backend`] trait, matching the
//! teacher's own pattern of giving each execution strategy (`ThreadPool` in
//! `archive/src/threadpools/block_exec_pool.rs`, `ThreadPoolMq` in
//! `sa-work-queue::threadpool`) its own concrete type behind a shared
//! capability.

use std::sync::Arc;

use crate::dispatch::{Task, TaskContext};
use crate::error::StarmapResult;
use crate::memory::MemoryGuard;
use crate::result_stream::ResultStream;
use crate::taskinfo::TelemetrySink;

pub mod local_pool;
#[cfg(feature = "remote-fleet")]
pub mod remote_fleet;
pub mod safe_call;
pub mod sequential;

/// Everything a `Backend::submit` call needs besides the task and its
/// chunks: where to persist telemetry, how many chunks to expect, the
/// name to record the chunked-sequence argument's bytes under in `sent`
/// bookkeeping (`spec.md` §3's "bytes encoded and shipped per argument
/// position"), and the memory guard every pulled result is checked against
/// (C3, `spec.md` §4.4 step 1).
pub struct SubmitContext {
	pub telemetry: Arc<dyn TelemetrySink>,
	pub submitted_count: usize,
	pub seq_arg_name: String,
	pub memory_guard: Option<MemoryGuard>,
}

/// Runs chunks of a task's arguments and reports results back through a
/// [`ResultStream`]. `submit` itself never blocks past what it takes to
/// hand work off — all actual execution happens lazily as the returned
/// stream is drained (or, for `Sequential`, is run eagerly since draining
/// it is the only thing a caller can do with it anyway).
pub trait Backend<T: Task> {
	fn submit(&self, task: Arc<T>, chunks: Vec<(TaskContext, Vec<T::Item>)>, ctx: SubmitContext) -> ResultStream<T::Output>;

	/// Release whatever resources this backend holds. Idempotent.
	fn close(&self) -> StarmapResult<()>;
}
