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

//! The telemetry persistence seam.
//!
//! `spec.md` §1 names a telemetry sink as an external collaborator, out of
//! scope for this crate. `SPEC_FULL.md` §3/§6 formalizes that boundary as a
//! trait so the dispatch core has a concrete call-through point instead of
//! an unstated assumption, matching the way the teacher's `tasks.rs`
//! `Environment<B, R, C>` bundles its storage backend as a generic
//! parameter rather than reaching for a global.

use crate::monitor::Monitor;

/// One row of per-task telemetry, ready to be handed to a [`TelemetrySink`].
#[derive(Debug, Clone)]
pub struct TaskInfoRow {
	pub task_name: String,
	pub task_no: u32,
	pub monitor: Monitor,
}

/// Records dispatch telemetry. The dispatch core calls through this trait;
/// it never knows or cares how (or whether) rows are persisted.
///
/// `record_task_info` is called once per *non-private* completed task
/// (`spec.md` §3's task-info row). `record_transfer_summary` is called once
/// per result stream, after natural exhaustion, with the run's cumulative
/// transfer counters (`spec.md` §4.4: "persist `{task_name: {sent, received:
/// {total, max_per_task}}}`" — a single end-of-run summary, not a per-task
/// running total).
pub trait TelemetrySink: Send + Sync {
	fn record_task_info(&self, row: TaskInfoRow);
	fn record_transfer_summary(&self, task_name: &str, sent_total: usize, received_total: usize, received_max_per_task: usize);
}

/// A `TelemetrySink` that discards everything, for tests and for callers
/// with no persistence layer of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
	fn record_task_info(&self, _row: TaskInfoRow) {}
	fn record_transfer_summary(&self, _task_name: &str, _sent_total: usize, _received_total: usize, _received_max_per_task: usize) {}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::monitor::TaskContext;

	#[test]
	fn null_sink_accepts_rows_without_panicking() {
		let sink = NullTelemetrySink;
		let row = TaskInfoRow {
			task_name: "demo".into(),
			task_no: 0,
			monitor: Monitor::new(TaskContext { task_no: 0, weight: 1.0 }),
		};
		sink.record_task_info(row);
		sink.record_transfer_summary("demo", 0, 0, 0);
	}
}
