use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Initialize stderr logging at `level`.
///
/// Records go to stderr so the tables printed on stdout stay clean.
pub fn init_logging(level: LevelFilter) -> anyhow::Result<()> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} {:<5} [{}] {}",
				chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level)
		.chain(std::io::stderr())
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}
