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

//! C4: the lazy result stream.
//!
//! Grounded on `parallel2.py`'s `IterResult.__iter__`: a generator that
//! interleaves memory-pressure checks, monotonic progress-percentage
//! logging, and re-raising a worker-side exception as soon as it is
//! observed, terminating the fold. Backends never decode their channel
//! eagerly; `ResultStream::next` is the one place those concerns meet.

use std::sync::Arc;

use log::info;

use crate::dispatch::ResultTriple;
use crate::error::{StarmapError, StarmapResult};
use crate::memory::MemoryGuard;
use crate::monitor::Monitor;
use crate::taskinfo::{TaskInfoRow, TelemetrySink};
use crate::transfer::{ReceivedSummary, SentBag, TransferSnapshot};

/// One item drained from a backend's channel before it is interpreted:
/// either a finished task's triple, or a byte-accounting side-channel
/// update a backend reports alongside it.
pub struct BackendItem<Out> {
	pub triple: ResultTriple<Out>,
	pub sent: SentBag,
	pub received: ReceivedSummary,
}

/// Drains a backend's channel of task results in completion order,
/// surfacing a `RemoteTaskError` the instant one is observed and checking
/// memory pressure on every item, exactly as `IterResult.__iter__` does
/// with its `isinstance(result, BaseException)` branch and
/// `check_mem_usage()` call.
///
/// A channel item is `Err(StarmapError)` exactly when a backend hit a
/// condition it cannot express as a decoded `(value, error_kind, monitor)`
/// triple at all — a lost remote worker, a dropped connection — matching
/// `spec.md` §4.4 step 2's "item is itself an exception object" branch,
/// re-raised immediately ahead of the usual triple-decode error path in
/// step 3.
pub struct ResultStream<Out> {
	task_name: &'static str,
	receiver: flume::Receiver<StarmapResult<BackendItem<Out>>>,
	submitted_count: usize,
	received_count: usize,
	memory_guard: Option<MemoryGuard>,
	telemetry: Arc<dyn TelemetrySink>,
	transfer: TransferSnapshot,
	max_received_per_task: usize,
	last_reported_percent: Option<u32>,
	poisoned: bool,
}

impl<Out> ResultStream<Out> {
	pub fn new(
		task_name: &'static str,
		receiver: flume::Receiver<StarmapResult<BackendItem<Out>>>,
		submitted_count: usize,
		memory_guard: Option<MemoryGuard>,
		telemetry: Arc<dyn TelemetrySink>,
	) -> Self {
		Self {
			task_name,
			receiver,
			submitted_count,
			received_count: 0,
			memory_guard,
			telemetry,
			transfer: TransferSnapshot::default(),
			max_received_per_task: 0,
			last_reported_percent: None,
			poisoned: false,
		}
	}

	/// How many chunks will ultimately be produced. Known up front since
	/// this crate always materializes the chunked argument vector before
	/// dispatch (see `SPEC_FULL.md` §4.5) rather than streaming an
	/// unbounded generator, so there is no separate "count-first" item.
	pub fn submitted_count(&self) -> usize {
		self.submitted_count
	}

	/// Running snapshot of bytes sent/received so far.
	pub fn transfer(&self) -> &TransferSnapshot {
		&self.transfer
	}

	/// This stream's task name, e.g. for pairing with [`Self::transfer`] as
	/// an argument to `crate::transfer::sum_by_task_name_prefix`.
	pub fn task_name(&self) -> &'static str {
		self.task_name
	}

	/// A task name beginning with an underscore silences progress reporting
	/// and task-info telemetry (`spec.md` §4.5/§4.4).
	fn is_private(&self) -> bool {
		self.task_name.starts_with('_')
	}

	fn progress_percent(&self) -> u32 {
		if self.submitted_count == 0 {
			return 100;
		}
		((self.received_count as f64 / self.submitted_count as f64) * 100.0).floor() as u32
	}

	/// Log a progress line only when the integer percentage has strictly
	/// increased since the last report (P7), skipping private task names
	/// entirely.
	fn report_progress(&mut self) {
		if self.is_private() {
			return;
		}
		let percent = self.progress_percent();
		if self.last_reported_percent != Some(percent) {
			info!("{}: {}% complete", self.task_name, percent);
			self.last_reported_percent = Some(percent);
		}
	}

	/// Emitted once, after the stream is fully drained: a single transfer
	/// summary line plus the end-of-run telemetry persist (`spec.md` §4.4).
	fn finish(&mut self) {
		if self.is_private() {
			return;
		}
		let received_total = self.transfer.received.total();
		info!(
			"{}: received {} bytes, max {} bytes per task",
			self.task_name, received_total, self.max_received_per_task
		);
		self.telemetry.record_transfer_summary(
			self.task_name,
			self.transfer.sent.total(),
			received_total,
			self.max_received_per_task,
		);
	}

	/// Fold every successful output into `init` with `f`, stopping at the
	/// first error the way `IterResult.reduce` does.
	pub fn reduce<Acc>(mut self, init: Acc, mut f: impl FnMut(Acc, Out) -> Acc) -> StarmapResult<Acc> {
		let mut acc = init;
		while let Some(item) = self.next() {
			acc = f(acc, item?);
		}
		Ok(acc)
	}

	/// Collect every successful output into a `Vec`, stopping at the first
	/// error.
	pub fn reduce_default(self) -> StarmapResult<Vec<Out>> {
		self.reduce(Vec::new(), |mut acc, out| {
			acc.push(out);
			acc
		})
	}
}

impl<Out> Iterator for ResultStream<Out> {
	type Item = StarmapResult<Out>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.poisoned || self.received_count >= self.submitted_count {
			return None;
		}

		let received = match self.receiver.recv() {
			Ok(received) => received,
			Err(_) => {
				self.poisoned = true;
				return Some(Err(StarmapError::WorkerLost(format!(
					"{}: channel closed before all {} chunks reported back",
					self.task_name, self.submitted_count
				))));
			}
		};

		// spec.md §4.4 step 1: the memory guard runs on every pull, ahead of
		// interpreting what was pulled at all.
		if let Some(guard) = &self.memory_guard {
			if let Err(err) = guard.check() {
				self.poisoned = true;
				return Some(Err(err));
			}
		}

		// Step 2: a raw backend-level exception (a lost worker, a dropped
		// connection) is re-raised immediately, ahead of any triple decoding.
		let item = match received {
			Ok(item) => item,
			Err(backend_err) => {
				self.poisoned = true;
				return Some(Err(backend_err));
			}
		};

		// Step 3: a non-empty `error_kind` (a failed `outcome`) terminates
		// iteration right here, ahead of any accounting a successful task
		// would get — no received-size accounting, no progress advance, no
		// `record_task_info` for it (spec.md §4.4 step 3; `parallel2.py`'s
		// `if etype: raise` runs before `next(log_percent)`/`save_task_data`).
		let BackendItem { triple, sent, received } = item;
		let ResultTriple { task_no, outcome, monitor } = triple;

		let out = match outcome {
			Err(failure) => {
				self.poisoned = true;
				return Some(Err(StarmapError::RemoteTaskError {
					task_name: self.task_name.to_string(),
					kind: failure.kind,
					message: failure.message,
				}));
			}
			Ok(out) => out,
		};

		self.received_count += 1;
		self.max_received_per_task = self.max_received_per_task.max(received.total());
		self.transfer.record(sent, received);
		self.report_progress();

		if !self.is_private() {
			self.telemetry.record_task_info(TaskInfoRow { task_name: self.task_name.to_string(), task_no, monitor });
		}

		if self.received_count >= self.submitted_count {
			self.finish();
		}
		Some(Ok(out))
	}
}

/// Build a `BackendItem` for a task that ran and produced `outcome`,
/// stamping transfer sizes from the already-encoded envelopes.
pub fn finished_item<Out>(
	task_no: u32,
	outcome: Result<Out, crate::error::TaskFailure>,
	monitor: Monitor,
	sent: SentBag,
	received: ReceivedSummary,
) -> BackendItem<Out> {
	BackendItem { triple: ResultTriple { task_no, outcome, monitor }, sent, received }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::monitor::TaskContext;

	fn send_ok(tx: &flume::Sender<StarmapResult<BackendItem<u32>>>, task_no: u32, value: u32) {
		tx.send(Ok(finished_item(
			task_no,
			Ok(value),
			Monitor::new(TaskContext { task_no, weight: 1.0 }),
			SentBag::default(),
			ReceivedSummary::default(),
		)))
		.unwrap();
	}

	#[test]
	fn drains_in_completion_order_and_reduces() {
		let (tx, rx) = flume::unbounded();
		send_ok(&tx, 0, 10);
		send_ok(&tx, 1, 20);
		let stream = ResultStream::new("demo", rx, 2, None, Arc::new(crate::taskinfo::NullTelemetrySink));
		let total = stream.reduce(0u32, |acc, out| acc + out).unwrap();
		assert_eq!(total, 30);
	}

	#[test]
	fn a_task_failure_terminates_the_fold() {
		let (tx, rx) = flume::unbounded();
		send_ok(&tx, 0, 10);
		tx.send(Ok(finished_item(
			1,
			Err(crate::error::TaskFailure::new("ValueError", "boom")),
			Monitor::new(TaskContext { task_no: 1, weight: 1.0 }),
			SentBag::default(),
			ReceivedSummary::default(),
		)))
		.unwrap();
		let stream = ResultStream::new("demo", rx, 2, None, Arc::new(crate::taskinfo::NullTelemetrySink));
		let err = stream.reduce_default().unwrap_err();
		assert!(matches!(err, StarmapError::RemoteTaskError { .. }));
	}

	#[test]
	fn a_raw_backend_exception_is_reraised_immediately_ahead_of_any_triple() {
		// spec.md §4.4 step 2: "If the item is itself an exception object
		// ... re-raise it immediately" — distinct from a decoded triple
		// whose `error_kind` is non-empty (step 3, `RemoteTaskError`).
		let (tx, rx) = flume::unbounded::<StarmapResult<BackendItem<u32>>>();
		send_ok(&tx, 0, 10);
		tx.send(Err(StarmapError::WorkerLost("connection dropped".to_string()))).unwrap();
		send_ok(&tx, 2, 30);
		let stream = ResultStream::new("demo", rx, 3, None, Arc::new(crate::taskinfo::NullTelemetrySink));
		let err = stream.reduce_default().unwrap_err();
		assert!(matches!(err, StarmapError::WorkerLost(_)));
	}

	#[test]
	fn empty_submission_yields_no_items() {
		let (_tx, rx) = flume::unbounded::<StarmapResult<BackendItem<u32>>>();
		let stream = ResultStream::new("demo", rx, 0, None, Arc::new(crate::taskinfo::NullTelemetrySink));
		assert_eq!(stream.reduce_default().unwrap(), Vec::<u32>::new());
	}

	#[derive(Default)]
	struct RecordingSink {
		task_info_calls: parking_lot::Mutex<usize>,
		summary: parking_lot::Mutex<Option<(usize, usize, usize)>>,
	}

	impl TelemetrySink for RecordingSink {
		fn record_task_info(&self, _row: TaskInfoRow) {
			*self.task_info_calls.lock() += 1;
		}
		fn record_transfer_summary(&self, _task_name: &str, sent_total: usize, received_total: usize, received_max_per_task: usize) {
			*self.summary.lock() = Some((sent_total, received_total, received_max_per_task));
		}
	}

	fn send_with_bytes(tx: &flume::Sender<StarmapResult<BackendItem<u32>>>, task_no: u32, value: u32, received_bytes: usize) {
		let mut sent = SentBag::new();
		sent.record("seq", 10);
		tx.send(Ok(finished_item(
			task_no,
			Ok(value),
			Monitor::new(TaskContext { task_no, weight: 1.0 }),
			sent,
			ReceivedSummary { result_bytes: received_bytes, monitor_bytes: 0 },
		)))
		.unwrap();
	}

	#[test]
	fn finish_persists_one_summary_with_the_max_per_task() {
		let (tx, rx) = flume::unbounded();
		send_with_bytes(&tx, 0, 1, 100);
		send_with_bytes(&tx, 1, 2, 400);
		send_with_bytes(&tx, 2, 3, 50);
		let sink = Arc::new(RecordingSink::default());
		let stream = ResultStream::new("demo", rx, 3, None, sink.clone());
		let _ = stream.reduce_default().unwrap();
		let (sent_total, received_total, max_per_task) = (*sink.summary.lock()).unwrap();
		assert_eq!(sent_total, 30);
		assert_eq!(received_total, 550);
		assert_eq!(max_per_task, 400);
		assert_eq!(*sink.task_info_calls.lock(), 3);
	}

	#[test]
	fn a_leading_underscore_silences_task_info_and_the_summary() {
		let (tx, rx) = flume::unbounded();
		send_with_bytes(&tx, 0, 1, 100);
		let sink = Arc::new(RecordingSink::default());
		let stream = ResultStream::new("_private", rx, 1, None, sink.clone());
		let _ = stream.reduce_default().unwrap();
		assert_eq!(*sink.task_info_calls.lock(), 0);
		assert!(sink.summary.lock().is_none());
	}
}
