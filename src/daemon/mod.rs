use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::Result;
use collection::{
    idle::IdleDetector,
    sampler::{Sampler, SAMPLING_PERIOD},
    tracker::{Inbound, TrackerModule},
};
use server::CommandServer;
use storage::{config_store::ConfigStore, ledger::UsageLedger, open_config, open_ledger};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use upload::{
    transport::{HttpTransport, UploadTransport},
    BatchUploader,
};

use crate::utils::clock::{Clock, DefaultClock};

pub mod args;
pub mod client;
pub mod collection;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod upload;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf, port: u16) -> Result<()> {
    let dir = std::path::absolute(dir)?;
    let config = Arc::new(open_config(&dir)?);
    let ledger = Arc::new(open_ledger(&dir)?);
    std::env::set_current_dir("/")?;

    let (sender, receiver) = mpsc::channel::<Inbound>(32);
    let shutdown_token = CancellationToken::new();
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);

    let server = CommandServer::bind(
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        sender,
        shutdown_token.clone(),
    )
    .await?;

    let tracker = create_tracker(
        receiver,
        ledger,
        config,
        HttpTransport::new()?,
        &shutdown_token,
        clock,
    )
    .await;

    info!("Daemon started");
    let (_, server_result, tracker_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token),
        server.run(),
        tracker.run(),
    );

    if let Err(server_result) = server_result {
        error!("Command server got an error {:?}", server_result);
    }

    if let Err(tracker_result) = tracker_result {
        error!("Tracker module got an error {:?}", tracker_result);
    }

    Ok(())
}

async fn create_tracker(
    receiver: mpsc::Receiver<Inbound>,
    ledger: Arc<UsageLedger>,
    config: Arc<ConfigStore>,
    transport: impl UploadTransport + 'static,
    shutdown_token: &CancellationToken,
    clock: Arc<dyn Clock>,
) -> TrackerModule {
    let threshold = match config.load().await {
        Ok(config) => config.idle_threshold(),
        Err(e) => {
            error!("Failed to load config, using default idle threshold {e:?}");
            storage::config_store::DEFAULT_IDLE_SECONDS
        }
    };

    let sampler = Sampler::new(
        ledger.clone(),
        clock.clone(),
        IdleDetector::from_seconds(threshold),
    );
    let uploader = BatchUploader::new(ledger, config.clone(), Arc::new(transport), clock.clone());

    TrackerModule::new(
        receiver,
        sampler,
        uploader,
        config,
        shutdown_token.clone(),
        SAMPLING_PERIOD,
        clock,
    )
}
