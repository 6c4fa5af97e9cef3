use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Initialize colored stderr logging via fern.
///
/// `level` accepts the usual filter names (`error`..`trace`); anything
/// unrecognized falls back to `info`. Calling twice is an error from the
/// underlying logger and is surfaced as such.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
	let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Cyan)
		.trace(Color::BrightBlack);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} [{}] {} {}",
				chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		// The TLS stack is chatty at trace level; keep it at the configured
		// level's ceiling of debug.
		.level_for("rustls", level.min(LevelFilter::Debug))
		.chain(std::io::stderr())
		.apply()
		.map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

	Ok(())
}
