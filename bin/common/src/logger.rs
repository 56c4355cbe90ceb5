use fern::colors::Color;
use log::info;

use crate::Config;

/// Installs the process-wide logger
///
/// Two sinks: a colored console stream at the level the flags selected,
/// and a plain-text file under `<data dir>/logs/<binary>.log` (or the
/// explicit `--log-file`) that captures at least debug detail for
/// post-mortems regardless of console verbosity.
pub fn init(config: &Config, binary_name: &str) -> Result<(), fern::InitError> {
    let log_file_path = match &config.log_file {
        Some(path) => path.clone(),
        None => {
            let mut path = config.data_dir();
            path.push("logs");
            path.push(binary_name);
            path.set_extension("log");
            path
        }
    };
    if let Some(parent) = log_file_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let colors = fern::colors::ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Cyan)
        .debug(Color::Green)
        .trace(Color::Magenta);

    let console_level = config.level_filter();
    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {} {}\t{}",
                chrono::Local::now().format("%H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message,
            ))
        })
        .level(console_level)
        .chain(std::io::stdout());

    // No escape codes in the file, full dates, never below debug
    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.target(),
                record.level(),
                message,
            ))
        })
        .level(std::cmp::max(console_level, log::LevelFilter::Debug))
        .chain(fern::log_file(&log_file_path)?);

    fern::Dispatch::new().chain(console).chain(file).apply()?;

    info!("Logging events to {}", log_file_path.display());
    Ok(())
}
