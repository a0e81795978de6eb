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

//! A2: colored terminal + rotating file logging, lifted directly from the
//! teacher's own `util::init_logger`.

use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};

/// Initialize a colored stdout logger plus an optional file sink. `level`
/// is the global filter; `log_file` additionally writes plain (uncolored)
/// output to disk when given.
pub fn init_logger(level: log::LevelFilter, log_file: Option<&str>) -> Result<(), fern::InitError> {
	let colors = ColoredLevelConfig::new()
		.info(Color::Green)
		.warn(Color::Yellow)
		.error(Color::Red)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	let mut dispatch = fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"[{}][{}][{}] {}",
				Local::now().format("%Y-%m-%d %H:%M:%S"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		.chain(std::io::stdout());

	if let Some(path) = log_file {
		dispatch = dispatch.chain(fern::log_file(path)?);
	}

	dispatch.apply()?;
	Ok(())
}
