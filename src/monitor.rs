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

//! Per-task telemetry returned alongside a task's result.
//!
//! Grounded on `parallel2.py`'s `Monitor`/`_genargs`, which stamps a
//! trailing `monitor.task_no`/`monitor.weight` onto the argument tuple sent
//! to a worker, and on the worker side accumulates named child timings. Per
//! the redesign taken in `SPEC_FULL.md` §3/§9, this crate splits that single
//! mutable object into two: [`TaskContext`] travels *to* the worker (read
//! only, built once by the splitter) and [`Monitor`] travels *from* the
//! worker as part of the result triple (write only, owned by the worker for
//! the duration of one task).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifies one dispatched chunk and its weight, handed to a worker
/// alongside its argument tuple. Replaces the tail-mutation of a `Monitor`
/// object in the original design.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskContext {
	pub task_no: u32,
	pub weight: f32,
}

/// One named sub-timing recorded inside a task, e.g. time spent decoding
/// its envelope versus running the user callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildTiming {
	pub name: String,
	pub duration: Duration,
}

/// Telemetry a worker reports back about a single task's execution. Plain
/// data: unlike the original's `Monitor`, this struct never travels to the
/// worker, only from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Monitor {
	pub task_no: u32,
	pub weight: f32,
	pub duration: Duration,
	pub children: Vec<ChildTiming>,
}

impl Monitor {
	pub fn new(ctx: TaskContext) -> Self {
		Self { task_no: ctx.task_no, weight: ctx.weight, duration: Duration::ZERO, children: Vec::new() }
	}

	pub fn record_child(&mut self, name: impl Into<String>, duration: Duration) {
		self.children.push(ChildTiming { name: name.into(), duration });
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn carries_task_no_and_weight_from_its_context() {
		let ctx = TaskContext { task_no: 3, weight: 2.5 };
		let monitor = Monitor::new(ctx);
		assert_eq!(monitor.task_no, 3);
		assert_eq!(monitor.weight, 2.5);
		assert!(monitor.children.is_empty());
	}

	#[test]
	fn accumulates_child_timings_in_order() {
		let mut monitor = Monitor::new(TaskContext { task_no: 0, weight: 1.0 });
		monitor.record_child("decode", Duration::from_millis(5));
		monitor.record_child("run", Duration::from_millis(20));
		assert_eq!(monitor.children.len(), 2);
		assert_eq!(monitor.children[0].name, "decode");
	}
}
