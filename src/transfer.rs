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

//! Transfer-size accounting.
//!
//! Grounded on `parallel2.py`'s `IterResult.save_task_data`/`get_pickled_sizes`
//! bookkeeping, which accumulates per-task sent/received byte counts for
//! diagnostics. `Envelope::size` (see `crate::envelope`) supplies the byte
//! counts directly, so no value is ever re-encoded purely to measure it.

use std::ops::AddAssign;

use hashbrown::HashMap;

/// Reserved `SentBag` key for a chunk's `TaskContext`, which travels
/// alongside the argument tuple rather than occupying one of its
/// positions, so it is never named by `Starmap::arg_name`.
pub const CONTEXT_KEY: &str = "__context__";

/// Bytes sent to a single task, keyed by argument-name (`spec.md` §3:
/// "Two bags keyed by argument-name: `sent`..."). The chunked-sequence
/// argument is recorded under whatever name `Starmap::arg_name` gives its
/// position; a chunk's `TaskContext` is recorded under [`CONTEXT_KEY`].
#[derive(Debug, Clone, Default)]
pub struct SentBag {
	by_arg: HashMap<String, usize>,
}

impl SentBag {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add `bytes` to whatever is already recorded under `arg_name`.
	pub fn record(&mut self, arg_name: impl Into<String>, bytes: usize) {
		*self.by_arg.entry(arg_name.into()).or_insert(0) += bytes;
	}

	/// Bytes recorded under a single argument-name key, `0` if none.
	pub fn get(&self, arg_name: &str) -> usize {
		self.by_arg.get(arg_name).copied().unwrap_or(0)
	}

	pub fn total(&self) -> usize {
		self.by_arg.values().sum()
	}
}

impl AddAssign for SentBag {
	fn add_assign(&mut self, rhs: Self) {
		for (key, bytes) in rhs.by_arg {
			*self.by_arg.entry(key).or_insert(0) += bytes;
		}
	}
}

/// Bytes received back from a single task: the encoded result plus its
/// `Monitor`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceivedSummary {
	pub result_bytes: usize,
	pub monitor_bytes: usize,
}

impl ReceivedSummary {
	pub fn total(&self) -> usize {
		self.result_bytes + self.monitor_bytes
	}
}

impl AddAssign for ReceivedSummary {
	fn add_assign(&mut self, rhs: Self) {
		self.result_bytes += rhs.result_bytes;
		self.monitor_bytes += rhs.monitor_bytes;
	}
}

/// A running snapshot of transfer totals across an entire `Starmap` run,
/// accumulated as a `ResultStream` is drained.
#[derive(Debug, Clone, Default)]
pub struct TransferSnapshot {
	pub sent: SentBag,
	pub received: ReceivedSummary,
}

impl TransferSnapshot {
	pub fn record(&mut self, sent: SentBag, received: ReceivedSummary) {
		self.sent += sent;
		self.received += received;
	}
}

/// A dict-of-accumulators keyed by an arbitrary label, the way
/// `parallel2.py`'s results are grouped and reduced per key before being
/// summed into a single value (`IterResult.sum`/`AccumDict` in the wider
/// OpenQuake codebase).
#[derive(Debug, Clone, Default)]
pub struct AccumDict<K, V> {
	inner: HashMap<K, V>,
}

impl<K, V> AccumDict<K, V>
where
	K: std::hash::Hash + Eq,
	V: Default + AddAssign + Clone,
{
	pub fn new() -> Self {
		Self { inner: HashMap::new() }
	}

	pub fn add(&mut self, key: K, value: V) {
		self.inner.entry(key).or_insert_with(V::default).add_assign(value);
	}

	pub fn get(&self, key: &K) -> Option<&V> {
		self.inner.get(key)
	}

	pub fn into_inner(self) -> HashMap<K, V> {
		self.inner
	}
}

/// Sum a sequence of same-shaped values, asserting (as `IterResult.sum`
/// does via its classmethod contract) that the sequence is non-empty.
pub fn sum<T>(values: impl IntoIterator<Item = T>) -> T
where
	T: Default + AddAssign,
{
	let mut iter = values.into_iter();
	let mut total = iter.next().expect("sum() requires at least one value");
	for v in iter {
		total += v;
	}
	total
}

/// `spec.md` §4.4's "Summation helper": combines the transfer counters of
/// several result streams that share a task-name prefix (split on `#`),
/// asserting the prefix invariant the way `IterResult.sum` does in
/// `parallel2.py` — there the classmethod refuses to sum `TaskInfo`/
/// `IterResult` instances whose `name` attributes disagree once split on
/// `#`, since that would silently combine unrelated jobs.
///
/// Takes `(task_name, snapshot)` pairs rather than whole `ResultStream`s so
/// it has no opinion on what `Out` type each stream yields — only their
/// transfer counters need to be combinable.
pub fn sum_by_task_name_prefix<'a>(streams: impl IntoIterator<Item = (&'a str, &'a TransferSnapshot)>) -> TransferSnapshot {
	let mut iter = streams.into_iter();
	let (first_name, first_snapshot) =
		iter.next().expect("sum_by_task_name_prefix requires at least one result stream");
	let prefix = task_name_prefix(first_name);
	let mut total = first_snapshot.clone();
	for (name, snapshot) in iter {
		let this_prefix = task_name_prefix(name);
		assert_eq!(
			this_prefix, prefix,
			"sum_by_task_name_prefix: task-name prefixes differ ({prefix:?} vs {this_prefix:?})"
		);
		total.record(snapshot.sent.clone(), snapshot.received.clone());
	}
	total
}

fn task_name_prefix(name: &str) -> &str {
	name.split('#').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sent_bag_total_is_summed_across_argument_names() {
		let mut bag = SentBag::new();
		bag.record("seq", 100);
		bag.record(CONTEXT_KEY, 8);
		assert_eq!(bag.total(), 108);
		assert_eq!(bag.get("seq"), 100);
		assert_eq!(bag.get("missing"), 0);
	}

	#[test]
	fn sent_bag_keeps_separate_argument_names_apart() {
		let mut bag = SentBag::new();
		bag.record("seq", 10);
		bag.record("grid", 5);
		assert_eq!(bag.get("seq"), 10);
		assert_eq!(bag.get("grid"), 5);
		assert_eq!(bag.total(), 15);
	}

	#[test]
	fn sent_bag_add_assign_merges_by_argument_name() {
		let mut a = SentBag::new();
		a.record("seq", 10);
		let mut b = SentBag::new();
		b.record("seq", 5);
		b.record("grid", 2);
		a += b;
		assert_eq!(a.get("seq"), 15);
		assert_eq!(a.get("grid"), 2);
	}

	#[test]
	fn transfer_snapshot_accumulates_across_records() {
		let mut snap = TransferSnapshot::default();
		let mut sent_a = SentBag::new();
		sent_a.record("seq", 10);
		sent_a.record(CONTEXT_KEY, 1);
		let mut sent_b = SentBag::new();
		sent_b.record("seq", 5);
		sent_b.record(CONTEXT_KEY, 1);
		snap.record(sent_a, ReceivedSummary { result_bytes: 20, monitor_bytes: 2 });
		snap.record(sent_b, ReceivedSummary { result_bytes: 15, monitor_bytes: 2 });
		assert_eq!(snap.sent.total(), 17);
		assert_eq!(snap.received.total(), 39);
	}

	#[test]
	fn accum_dict_groups_by_key() {
		let mut dict: AccumDict<&str, u64> = AccumDict::new();
		dict.add("a", 1);
		dict.add("a", 2);
		dict.add("b", 10);
		assert_eq!(*dict.get(&"a").unwrap(), 3);
		assert_eq!(*dict.get(&"b").unwrap(), 10);
	}

	#[test]
	#[should_panic(expected = "at least one value")]
	fn sum_rejects_empty_input() {
		let _: u64 = sum(Vec::<u64>::new());
	}

	fn snapshot(seq_bytes: usize, result_bytes: usize) -> TransferSnapshot {
		let mut snap = TransferSnapshot::default();
		let mut sent = SentBag::new();
		sent.record("seq", seq_bytes);
		snap.record(sent, ReceivedSummary { result_bytes, monitor_bytes: 0 });
		snap
	}

	#[test]
	fn sum_by_task_name_prefix_combines_streams_sharing_a_prefix() {
		let a = snapshot(10, 20);
		let b = snapshot(5, 15);
		let total = sum_by_task_name_prefix([("classical#0", &a), ("classical#1", &b)]);
		assert_eq!(total.sent.total(), 15);
		assert_eq!(total.received.total(), 35);
	}

	#[test]
	fn sum_by_task_name_prefix_accepts_a_bare_name_with_no_hash() {
		let a = snapshot(10, 20);
		let total = sum_by_task_name_prefix([("classical", &a)]);
		assert_eq!(total.sent.total(), 10);
	}

	#[test]
	#[should_panic(expected = "task-name prefixes differ")]
	fn sum_by_task_name_prefix_rejects_mismatched_prefixes() {
		let a = snapshot(10, 20);
		let b = snapshot(5, 15);
		let _ = sum_by_task_name_prefix([("classical#0", &a), ("event_based#1", &b)]);
	}
}
