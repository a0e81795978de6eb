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

//! Standalone remote-fleet worker process.
//!
//! Grounded on `original_source/openquake/baselib/zeromq.py`'s `__main__`
//! block, which parses a URL and an optional core count off `sys.argv` and
//! runs `workerpool` until it sees the stop sentinel. This binary is built
//! against one concrete `Task` — a demo echo task — since a deployment
//! embeds its own real task type and links against `starmap` as a library
//! rather than running this binary directly (see the explicit-builder
//! REDESIGN FLAG in `SPEC_FULL.md` §9).

use std::env;
use std::sync::Arc;

use async_amqp::LapinAsyncStdExt;
use lapin::{Connection, ConnectionProperties};
use starmap::backend::remote_fleet::{run_worker_pool, Topology};
use starmap::config::Config;
use starmap::dispatch::{Task, TaskContext};
use starmap::error::{StarmapResult, TaskFailure};

/// Echoes its input block back as output. Stands in for whatever real task
/// type a deployment links against.
struct Echo;

impl Task for Echo {
	const NAME: &'static str = "echo";
	type Item = String;
	type Output = Vec<String>;

	fn run(&self, items: Vec<String>, _ctx: TaskContext) -> Result<Vec<String>, TaskFailure> {
		Ok(items)
	}
}

fn main() -> StarmapResult<()> {
	#[cfg(feature = "logging")]
	starmap::logging::init_logger(log::LevelFilter::Info, None).ok();

	let config_path = env::args().nth(1);
	let config = match config_path {
		Some(path) => Config::from_toml_file(path)?,
		None => Config::default(),
	};
	let num_threads = env::args().nth(2).and_then(|n| n.parse().ok()).unwrap_or_else(|| config.local_pool_threads());

	async_std::task::block_on(async {
		let conn = Connection::connect(
			&config.remote_fleet_url(),
			ConnectionProperties::default().with_async_std(),
		)
		.await?;
		let topology = Topology::new(config.task_queue.clone());
		run_worker_pool(&conn, &topology, Arc::new(Echo), num_threads).await
	})
}
