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

//! The client side of the remote-fleet backend: publishes blocks onto the
//! shared task queue and collects replies off an exclusive reply queue.
//!
//! Grounded on `zeromq.py::starmap`, which sends every argument tuple over
//! a DEALER socket, yields the submitted count, then yields replies as they
//! arrive — the same "materialize-then-drain" shape `ResultStream` gives
//! every backend here.

use std::sync::Arc;

use async_amqp::LapinAsyncStdExt;
use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};

use crate::backend::remote_fleet::broker::Topology;
use crate::backend::{Backend, SubmitContext};
use crate::config::Config;
use crate::dispatch::{ResultTriple, Task, TaskContext};
use crate::envelope::Envelope;
use crate::error::{StarmapError, StarmapResult};
use crate::result_stream::{BackendItem, ResultStream};
use crate::transfer::{ReceivedSummary, SentBag};

/// An open connection to the broker plus the shared task-queue topology.
/// One `RemoteFleetHandle` is reused by an `Engine` across every
/// `Starmap` run that picks `BackendKind::RemoteFleet`.
pub struct RemoteFleetHandle {
	conn: Connection,
	topology: Topology,
}

impl RemoteFleetHandle {
	pub fn connect(config: &Config) -> StarmapResult<Self> {
		let conn = async_std::task::block_on(Connection::connect(
			&config.remote_fleet_url(),
			ConnectionProperties::default().with_async_std(),
		))?;
		Ok(Self { conn, topology: Topology::new(config.task_queue.clone()) })
	}

	pub fn close(&self) -> StarmapResult<()> {
		async_std::task::block_on(self.conn.close(0, "starmap engine shutdown"))?;
		Ok(())
	}
}

impl<T: Task> Backend<T> for RemoteFleetHandle {
	fn submit(&self, _task: Arc<T>, chunks: Vec<(TaskContext, Vec<T::Item>)>, ctx: SubmitContext) -> ResultStream<T::Output> {
		let (tx, rx) = flume::unbounded();
		let conn = self.conn.clone();
		let topology = self.topology.clone();
		let seq_arg_name = ctx.seq_arg_name.clone();

		async_std::task::spawn(async move {
			if let Err(err) = publish_and_collect::<T>(&conn, &topology, chunks, &seq_arg_name, tx.clone()).await {
				// A connection-level failure (spec.md §4.7: "Worker process
				// loss ... surfaces as a backend-level exception object in
				// the reply stream"). Sent as `Err`, not a decoded triple, so
				// `ResultStream::next` re-raises it immediately (§4.4 step 2)
				// rather than reporting it as a `RemoteTaskError` (step 3).
				let _ = tx.send(Err(StarmapError::WorkerLost(err.to_string())));
			}
		});

		ResultStream::new(T::NAME, rx, ctx.submitted_count, ctx.memory_guard, ctx.telemetry)
	}

	fn close(&self) -> StarmapResult<()> {
		RemoteFleetHandle::close(self)
	}
}

async fn publish_and_collect<T: Task>(
	conn: &Connection,
	topology: &Topology,
	chunks: Vec<(TaskContext, Vec<T::Item>)>,
	seq_arg_name: &str,
	tx: flume::Sender<StarmapResult<BackendItem<T::Output>>>,
) -> StarmapResult<()> {
	let channel = conn.create_channel().await?;
	topology.declare_task_queue(&channel).await?;
	let reply_queue = topology.declare_reply_queue(&channel).await?;

	let mut consumer = channel
		.basic_consume(
			reply_queue.name().as_str(),
			"starmap-client",
			BasicConsumeOptions::default(),
			FieldTable::default(),
		)
		.await?;

	for (ctx, items) in &chunks {
		let envelope = Envelope::encode(&(*ctx, items))?;
		let properties = BasicProperties::default()
			.with_reply_to(reply_queue.name().clone())
			.with_correlation_id(ctx.task_no.to_string().into());
		channel
			.basic_publish(
				"",
				&topology.task_queue,
				BasicPublishOptions::default(),
				envelope.as_bytes().to_vec(),
				properties,
			)
			.await?;
	}

	// Keyed by `task_no` (1-based, spec.md §3) rather than by vector index,
	// since replies arrive in completion order, not submission order.
	let sent_bytes_by_task_no: hashbrown::HashMap<u32, usize> = chunks
		.iter()
		.map(|(ctx, items)| (ctx.task_no, Envelope::encode(&(*ctx, items)).map(|e| e.size()).unwrap_or(0)))
		.collect();

	for _ in 0..chunks.len() {
		let delivery = match consumer.next().await {
			Some(delivery) => delivery?,
			None => break,
		};
		let received_bytes = delivery.data.len();
		let envelope = Envelope::from_wire(delivery.data.clone());
		let triple: ResultTriple<T::Output> = envelope.decode()?;
		let mut sent = SentBag::new();
		sent.record(seq_arg_name, sent_bytes_by_task_no.get(&triple.task_no).copied().unwrap_or(0));
		let received = ReceivedSummary { result_bytes: received_bytes, monitor_bytes: 0 };
		delivery.ack(lapin::options::BasicAckOptions::default()).await?;
		tx.send(Ok(BackendItem { triple, sent, received })).ok();
	}

	Ok(())
}
