use std::path::PathBuf;

use structopt::StructOpt;

/// Flags shared by every Nocturne binary
#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct Config {
    /// Raises log verbosity once per occurrence (-v: debug, -vv: trace)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    pub verbosity: u8,

    /// Silences everything below warnings; wins over --verbose
    #[structopt(long)]
    pub quiet: bool,

    /// Directory holding chain data and log files
    /// If unset, the platform data directory for Nocturne is used
    #[structopt(long)]
    pub data_directory: Option<PathBuf>,

    /// Writes the log to an explicit file instead of
    /// <data-directory>/logs/<binary>.log
    #[structopt(long)]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// The console log filter selected by --quiet and --verbose
    pub fn level_filter(&self) -> log::LevelFilter {
        if self.quiet {
            return log::LevelFilter::Warn;
        }
        match self.verbosity {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// The effective data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_directory.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("net", "Nocturne Project", "Nocturne")
                .expect("No home directory to derive the default data directory from")
                .data_dir()
                .to_path_buf()
        })
    }
}
