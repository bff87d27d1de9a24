use anyhow::Result;

/// The daemon runs every module on one thread. Ticks, commands and uploads interleave only at
/// await points.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
