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

//! The broker topology: queue/exchange names both client and worker agree
//! on out of band. In ZeroMQ's ROUTER/DEALER proxy the broker is a
//! standalone process (`zeromq.proxy`); over AMQP the broker role is played
//! by the AMQP server itself; this module only names the shared queue.

use lapin::options::QueueDeclareOptions;
use lapin::types::FieldTable;
use lapin::{Channel, Error as LapinError, Queue};

/// Names the queue a task's blocks are published onto. Every remote worker
/// in the fleet consumes from this one queue; the AMQP server distributes
/// deliveries round-robin across however many workers are currently
/// consuming, the direct analogue of DEALER's least-recently-used routing.
#[derive(Debug, Clone)]
pub struct Topology {
	pub task_queue: String,
}

impl Topology {
	pub fn new(task_queue: impl Into<String>) -> Self {
		Self { task_queue: task_queue.into() }
	}

	pub async fn declare_task_queue(&self, channel: &Channel) -> Result<Queue, LapinError> {
		channel
			.queue_declare(&self.task_queue, QueueDeclareOptions::default(), FieldTable::default())
			.await
	}

	/// Declare an exclusive, auto-deleting reply queue for one client. The
	/// AMQP server names it; the client reads the name back off the
	/// returned `Queue` and stamps it into `reply_to` on every publish.
	pub async fn declare_reply_queue(&self, channel: &Channel) -> Result<Queue, LapinError> {
		channel
			.queue_declare(
				"",
				QueueDeclareOptions { exclusive: true, auto_delete: true, ..QueueDeclareOptions::default() },
				FieldTable::default(),
			)
			.await
	}
}
