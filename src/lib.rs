#![deny(rust_2018_idioms)]

use miette::IntoDiagnostic;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

pub use crate::actions::run;
pub use crate::args::Args;

pub(crate) mod actions;
pub(crate) mod args;

pub mod archive;
pub mod collector;
pub mod config;
pub mod crypto;
pub mod error;
pub mod glob;
pub mod index;
pub mod lock;
pub mod manifest;
pub mod notify;
pub mod orchestrator;
pub mod providers;
pub mod util;

pub mod diskspace;

#[allow(dead_code)] // not every code path needs it, but it's easier to have it everywhere
pub(crate) const APP_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Parse CLI arguments and set up logging, returning a guard that must be
/// held for the lifetime of the program (dropping it flushes the log file).
pub fn args() -> miette::Result<(Args, Option<WorkerGuard>)> {
	let args = crate::args::get_args();

	let level = match args.verbose.unwrap_or(0) {
		0 => LevelFilter::WARN,
		1 => LevelFilter::INFO,
		2 => LevelFilter::DEBUG,
		_ => LevelFilter::TRACE,
	};

	let filter = EnvFilter::builder()
		.with_default_directive(level.into())
		.from_env()
		.into_diagnostic()?;

	let guard = if let Some(path) = &args.log_file {
		let dir = if path.is_dir() {
			path.clone()
		} else {
			path.parent().unwrap_or(std::path::Path::new(".")).into()
		};
		let file_name = if path.is_dir() {
			format!(
				"openclaw-backup.{}.log",
				chrono::Utc::now().format("%Y-%m-%dT%H-%M-%SZ")
			)
		} else {
			path.file_name()
				.map(|n| n.to_string_lossy().into_owned())
				.unwrap_or_else(|| "openclaw-backup.log".into())
		};
		let appender = tracing_appender::rolling::never(dir, file_name);
		let (non_blocking, guard) = tracing_appender::non_blocking(appender);
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().with_writer(non_blocking))
			.init();
		Some(guard)
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().with_ansi(args.color.use_color()))
			.init();
		None
	};

	Ok((args, guard))
}
