//! Pieces shared by every Nocturne binary: logging setup and the common
//! command line flags

pub mod logger;

mod config;

pub use config::Config;
