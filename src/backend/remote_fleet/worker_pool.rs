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

//! The remote worker pool: the process(es) that actually run a `Task`.
//!
//! Grounded on `zeromq.py::workerpool`, which loops receiving
//! `(ident, pickled_args)` off a DEALER socket, dispatches each onto a
//! `multiprocessing.Pool`, and terminates cleanly on the sentinel message
//! `args[0] == 'stop'`. Over AMQP the identity frame becomes the message's
//! `reply_to` queue name and `correlation_id`; the sentinel is a reserved
//! message body checked before attempting to decode an envelope.
//!
//! A worker pool process is built against exactly one concrete `Task`
//! implementation (this crate has no way to ship Rust code over the wire
//! the way `pickle` ships a Python callable) — see the explicit-builder
//! REDESIGN FLAG in `SPEC_FULL.md` §9. `starmap-worker` (`src/bin/
//! worker_pool.rs`) is the standalone process entry point that calls
//! `run_worker_pool` for the deployment's task type.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection};
use log::{info, warn};

use crate::backend::safe_call::safe_call;
use crate::backend::remote_fleet::broker::Topology;
use crate::dispatch::{ResultTriple, Task, TaskContext};
use crate::envelope::Envelope;
use crate::error::StarmapResult;
use crate::monitor::Monitor;

/// Reserved message body that tells every consumer of the task queue to
/// stop pulling work and exit, the direct analogue of `zeromq.py`'s
/// `args[0] == 'stop'` check.
pub const STOP_SENTINEL: &[u8] = b"__starmap_stop__";

/// Run one worker pool process against `task`, consuming `topology`'s task
/// queue until a stop sentinel arrives or the connection drops.
///
/// `num_threads` bounds how many blocks this process runs concurrently,
/// matching `multiprocessing.Pool(ncores)` in the original. `basic_qos`
/// only bounds how many unacked deliveries the broker hands this consumer
/// at once; the actual concurrency comes from a pool of `num_threads`
/// permits (a `flume::bounded` channel standing in for a semaphore, since
/// `async-std` has none built in) that each spawned delivery must acquire
/// before running `task.run` and releases on completion — the same
/// bounded-fan-out shape `BackendKind::LocalPool`'s `threadpool::ThreadPool`
/// gives the in-process backend (`SPEC_FULL.md` §4.6).
pub async fn run_worker_pool<T: Task>(
	conn: &Connection,
	topology: &Topology,
	task: Arc<T>,
	num_threads: usize,
) -> StarmapResult<()> {
	let num_threads = num_threads.max(1);
	let channel = conn.create_channel().await?;
	topology.declare_task_queue(&channel).await?;
	channel.basic_qos(num_threads as u16, Default::default()).await?;

	let mut consumer = channel
		.basic_consume(
			&topology.task_queue,
			"starmap-worker",
			BasicConsumeOptions::default(),
			FieldTable::default(),
		)
		.await?;

	info!("starmap worker pool listening on `{}`", topology.task_queue);

	let (permits_tx, permits_rx) = flume::bounded::<()>(num_threads);
	for _ in 0..num_threads {
		permits_tx.send(()).expect("just created, never full before this loop");
	}

	while let Some(delivery) = consumer.next().await {
		let delivery = delivery?;
		if delivery.data == STOP_SENTINEL {
			info!("stop sentinel received, terminating worker pool");
			delivery.ack(BasicAckOptions::default()).await?;
			break;
		}

		// Blocks this loop, and so the next `basic_consume` pull, until a
		// permit frees up — the bound on in-flight blocks this process runs.
		permits_rx.recv_async().await.expect("permits_tx outlives every borrower");

		let task = task.clone();
		let channel = channel.clone();
		let permits_tx = permits_tx.clone();

		async_std::task::spawn(async move {
			let reply_to = delivery.properties.reply_to().clone();
			let correlation_id = delivery.properties.correlation_id().clone();

			let envelope = Envelope::from_wire(delivery.data.clone());
			let decoded: Result<(TaskContext, Vec<T::Item>), _> = envelope.decode();

			let reply_bytes = match decoded {
				Ok((ctx, items)) => {
					let started = Instant::now();
					let outcome = safe_call(|| task.run(items, ctx));
					let mut monitor = Monitor::new(ctx);
					monitor.duration = started.elapsed();
					let triple = ResultTriple { task_no: ctx.task_no, outcome, monitor };
					Envelope::encode(&triple).ok()
				}
				Err(err) => {
					warn!("dropping malformed delivery: {err}");
					None
				}
			};

			if let (Some(reply_bytes), Some(reply_to)) = (reply_bytes, reply_to) {
				if let Err(err) =
					publish_reply(&channel, reply_to.as_str(), correlation_id.as_ref().map(|c| c.as_str()), reply_bytes.as_bytes()).await
				{
					warn!("failed to publish reply: {err}");
				}
			}

			if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
				warn!("failed to ack delivery: {err}");
			}

			// Release the permit last, so acking and replying both count
			// against this delivery's slot.
			permits_tx.send(()).ok();
		});
	}

	Ok(())
}

async fn publish_reply(
	channel: &Channel,
	reply_to: &str,
	correlation_id: Option<&str>,
	payload: &[u8],
) -> StarmapResult<()> {
	let mut properties = BasicProperties::default();
	if let Some(id) = correlation_id {
		properties = properties.with_correlation_id(id.into());
	}
	channel
		.basic_publish("", reply_to, BasicPublishOptions::default(), payload.to_vec(), properties)
		.await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sentinel_is_never_a_valid_envelope_prefix() {
		// a real delivery's body is always a bincode-encoded
		// `(TaskContext, Vec<Item>)` tuple; the sentinel is a fixed literal
		// chosen so it can never collide with one by chance.
		let envelope = Envelope::encode(&(TaskContext { task_no: 0, weight: 1.0 }, vec![1u32])).unwrap();
		assert_ne!(envelope.as_bytes(), STOP_SENTINEL);
	}

	// Exercising `run_worker_pool` itself needs a live broker connection;
	// that belongs in an ignored integration test, not a unit test.
	#[test]
	#[ignore = "requires a running AMQP broker on amqp://127.0.0.1:5672"]
	fn run_worker_pool_exits_cleanly_on_stop_sentinel() {
		// See `tests/` for the broker-backed version of this scenario.
	}
}
