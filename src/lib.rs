//! Tracks how long the user actively spends on each website. A small daemon receives browser
//! events over a local socket, samples the active domain once a minute, keeps per-day totals in a
//! local ledger and periodically uploads them to a backend. The cli talks to the daemon and can
//! print daily reports straight from the ledger.

pub mod cli;
pub mod daemon;
pub mod fs;
pub mod utils;
