use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use super::protocol::DEFAULT_PORT;

#[derive(Parser)]
pub struct DaemonArgs {
    /// Run in the current process instead of detaching.
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Port of the local socket used by the browser and the cli.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
}
