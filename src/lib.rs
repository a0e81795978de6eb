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

//! Backend-agnostic parallel task dispatch.
//!
//! A [`dispatch::Task`] is a unit of work over a heterogeneous argument
//! sequence. [`chunking`] groups that sequence into roughly-equal-weight
//! blocks, [`dispatch::Engine`] hands each block to one of three
//! interchangeable [`backend`]s (in-process, a local thread pool, or a fleet
//! of remote workers behind a message broker), and [`result_stream`] folds
//! whatever comes back into a single lazily-drained iterator, accounting for
//! transfer size and memory pressure as it goes.

#![deny(unused_must_use)]

pub mod backend;
pub mod chunking;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod memory;
pub mod monitor;
pub mod result_stream;
pub mod taskinfo;
pub mod transfer;

pub use crate::dispatch::{apply, BackendKind, Engine, ResultTriple, Starmap, Task, TaskContext};
pub use crate::envelope::Envelope;
pub use crate::error::{StarmapError, StarmapResult, TaskFailure};
pub use crate::result_stream::ResultStream;

/// Default queue name new remote-fleet clients publish work onto, mirroring
/// the teacher's own `TASK_QUEUE` constant.
pub const DEFAULT_QUEUE: &str = "STARMAP_TASK_QUEUE";
