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

//! The in-process execution strategy, the Rust analogue of `OQ_DISTRIBUTE=no`
//! in `parallel2.py`'s `Starmap._iter_sequential`: run every block on the
//! calling thread, in block order, with no parallelism at all.

use std::sync::Arc;
use std::time::Instant;

use crate::backend::safe_call::safe_call;
use crate::backend::{Backend, SubmitContext};
use crate::dispatch::{Task, TaskContext};
use crate::envelope::Envelope;
use crate::error::StarmapResult;
use crate::monitor::Monitor;
use crate::result_stream::{finished_item, ResultStream};
use crate::transfer::{ReceivedSummary, SentBag, CONTEXT_KEY};

pub struct Sequential;

impl<T: Task> Backend<T> for Sequential {
	fn submit(&self, task: Arc<T>, chunks: Vec<(TaskContext, Vec<T::Item>)>, ctx: SubmitContext) -> ResultStream<T::Output> {
		let (tx, rx) = flume::unbounded();

		for (task_ctx, items) in chunks {
			let mut sent = SentBag::new();
			sent.record(ctx.seq_arg_name.as_str(), Envelope::encode(&items).map(|e| e.size()).unwrap_or(0));
			sent.record(CONTEXT_KEY, Envelope::encode(&task_ctx).map(|e| e.size()).unwrap_or(0));

			let started = Instant::now();
			let outcome = safe_call(|| task.run(items, task_ctx));
			let mut monitor = Monitor::new(task_ctx);
			monitor.duration = started.elapsed();

			let received = match &outcome {
				Ok(out) => ReceivedSummary {
					result_bytes: Envelope::encode(out).map(|e| e.size()).unwrap_or(0),
					monitor_bytes: 0,
				},
				Err(_) => ReceivedSummary::default(),
			};

			tx.send(Ok(finished_item(task_ctx.task_no, outcome, monitor, sent, received))).ok();
		}

		ResultStream::new(T::NAME, rx, ctx.submitted_count, ctx.memory_guard, ctx.telemetry)
	}

	fn close(&self) -> StarmapResult<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chunking::WeightedItem;
	use crate::error::TaskFailure;

	fn test_ctx(submitted_count: usize) -> SubmitContext {
		SubmitContext {
			telemetry: Arc::new(crate::taskinfo::NullTelemetrySink),
			submitted_count,
			seq_arg_name: "seq".to_string(),
			memory_guard: None,
		}
	}

	struct Sum;
	impl Task for Sum {
		const NAME: &'static str = "sum";
		type Item = u32;
		type Output = u32;
		fn run(&self, items: Vec<u32>, _ctx: TaskContext) -> Result<u32, TaskFailure> {
			Ok(items.into_iter().sum())
		}
	}

	struct AlwaysFails;
	impl Task for AlwaysFails {
		const NAME: &'static str = "always_fails";
		type Item = u32;
		type Output = u32;
		fn run(&self, _items: Vec<u32>, _ctx: TaskContext) -> Result<u32, TaskFailure> {
			Err(TaskFailure::new("ValueError", "nope"))
		}
	}

	#[test]
	fn runs_every_block_and_reduces_successfully() {
		use crate::chunking::split_in_blocks;

		let items = vec![WeightedItem::new(1u32, 1.0), WeightedItem::new(2u32, 1.0), WeightedItem::new(3u32, 1.0)];
		let blocks = split_in_blocks(items, 2);
		let chunks: Vec<_> = blocks
			.into_iter()
			.enumerate()
			.map(|(n, b)| (TaskContext { task_no: n as u32, weight: b.len() as f32 }, b))
			.collect();

		let stream = Sequential.submit(Arc::new(Sum), chunks, test_ctx(2));
		let total = stream.reduce(0u32, |acc, out| acc + out).unwrap();
		assert_eq!(total, 6);
	}

	#[test]
	fn a_failing_block_surfaces_as_a_remote_task_error() {
		let chunks = vec![(TaskContext { task_no: 0, weight: 1.0 }, vec![1u32])];
		let stream = Sequential.submit(Arc::new(AlwaysFails), chunks, test_ctx(1));
		let err = stream.reduce_default().unwrap_err();
		assert!(matches!(err, crate::error::StarmapError::RemoteTaskError { .. }));
	}

	#[test]
	fn a_hard_memory_threshold_aborts_the_stream_on_the_first_pull() {
		use crate::memory::MemoryGuard;
		use std::sync::Arc as StdArc;

		struct AlwaysHot;
		impl crate::memory::MemorySampler for AlwaysHot {
			fn sample(&self) -> f32 {
				99.0
			}
		}

		let chunks = vec![(TaskContext { task_no: 0, weight: 1.0 }, vec![1u32])];
		let mut ctx = test_ctx(1);
		ctx.memory_guard = Some(MemoryGuard::new(StdArc::new(AlwaysHot), 80.0, 95.0));
		let stream = Sequential.submit(Arc::new(Sum), chunks, ctx);
		let err = stream.reduce_default().unwrap_err();
		assert!(matches!(err, crate::error::StarmapError::MemoryExhausted { .. }));
	}
}
