use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    daemon::{
        protocol::{Request, Response, StatusReport},
        storage::{config_store::ConfigStore, config_store::ConfigUpdate},
        upload::BatchUploader,
    },
    utils::clock::Clock,
};

use super::{sampler::Sampler, signals::EnvironmentSignal};

/// A request together with the channel its answer goes to.
#[derive(Debug)]
pub struct Inbound {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Event loop of the daemon. Everything touching the sampler goes through here, so ticks are
/// processed strictly in the order their triggers arrived.
pub struct TrackerModule {
    inbox: mpsc::Receiver<Inbound>,
    sampler: Sampler,
    uploader: BatchUploader,
    config: Arc<ConfigStore>,
    shutdown: CancellationToken,
    tick_period: Duration,
    time_provider: Arc<dyn Clock>,
}

impl TrackerModule {
    pub fn new(
        inbox: mpsc::Receiver<Inbound>,
        sampler: Sampler,
        uploader: BatchUploader,
        config: Arc<ConfigStore>,
        shutdown: CancellationToken,
        tick_period: Duration,
        time_provider: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inbox,
            sampler,
            uploader,
            config,
            shutdown,
            tick_period,
            time_provider,
        }
    }

    /// Executes the tracker event loop.
    pub async fn run(mut self) -> Result<()> {
        let mut tick_point = self.time_provider.instant() + self.tick_period;
        loop {
            tokio::select! {
                // Cancellation stops the loop. Time since the last tick is still recorded.
                _ = self.shutdown.cancelled() => {
                    info!("Stopping tracker");
                    self.tick().await;
                    return Ok(())
                }
                _ = self.time_provider.sleep_until(tick_point) => {
                    let now = self.time_provider.instant();
                    tick_point += self.tick_period;
                    if tick_point < now {
                        tick_point = now + self.tick_period;
                    }
                    self.tick_and_upload().await;
                }
                inbound = self.inbox.recv() => {
                    let Some(Inbound { request, reply }) = inbound else {
                        info!("All senders are gone, stopping tracker");
                        self.tick().await;
                        return Ok(())
                    };
                    debug!("Handling {:?}", request);
                    let response = self.handle(request).await;
                    if reply.send(response).is_err() {
                        debug!("Requester went away before the response was ready");
                    }
                }
            }
        }
    }

    async fn tick(&mut self) {
        if let Err(e) = self.sampler.tick().await {
            error!("Tick failed, unflushed time is kept in memory: {e:?}");
        }
    }

    async fn tick_and_upload(&mut self) {
        self.tick().await;
        self.uploader.spawn_attempt();
    }

    pub async fn handle(&mut self, request: Request) -> Response {
        match request.into_signal() {
            Ok(signal) => self.handle_signal(signal).await,
            Err(command) => self.handle_command(command).await,
        }
    }

    async fn handle_signal(&mut self, signal: EnvironmentSignal) -> Response {
        if self.sampler.observe(signal) {
            self.tick_and_upload().await;
        }
        Response::ack()
    }

    async fn handle_command(&mut self, command: Request) -> Response {
        match command {
            Request::GetStatus => self.status().await,
            Request::SetPaused { value } => {
                info!("Setting paused to {value}");
                self.sampler.set_paused(value);
                Response::Paused {
                    ok: true,
                    paused: self.sampler.paused(),
                }
            }
            Request::ForceUpload => self.force_upload().await,
            Request::ResetToday => {
                let today = self.sampler.today();
                match self.sampler.ledger().reset_day(&today).await {
                    Ok(()) => {
                        info!("Reset usage for {today}");
                        Response::ack()
                    }
                    Err(e) => {
                        error!("Failed to reset {today}: {e:?}");
                        Response::failed(format!("Failed to reset {today}: {e}"))
                    }
                }
            }
            Request::SetConfig(update) => self.set_config(update).await,
            signal => Response::failed(format!("{signal:?} is not a command")),
        }
    }

    async fn status(&self) -> Response {
        match self.config.load().await {
            Ok(config) => Response::Status(StatusReport {
                paused: self.sampler.paused(),
                idle_state: self.sampler.idle_state(),
                window_focused: self.sampler.window_focused(),
                backend_url: config.backend_url,
                current_domain: self.sampler.current_domain().map(str::to_string),
            }),
            Err(e) => {
                error!("Failed to load config: {e:?}");
                Response::failed(format!("Failed to load config: {e}"))
            }
        }
    }

    async fn force_upload(&mut self) -> Response {
        if let Err(e) = self.sampler.flush().await {
            return Response::failed(format!("Failed to flush usage: {e}"));
        }
        match self.uploader.attempt_upload().await {
            Ok(outcome) => {
                info!("Forced upload finished with {outcome:?}");
                Response::ack()
            }
            Err(e) => {
                error!("Forced upload failed: {e:?}");
                Response::failed(format!("Upload failed: {e}"))
            }
        }
    }

    async fn set_config(&mut self, update: ConfigUpdate) -> Response {
        match self.config.update(update).await {
            Ok(saved) => {
                if let Some(threshold) = saved.idle_seconds.filter(|v| *v > 0) {
                    info!("Idle detection threshold is now {threshold}s");
                    self.sampler.set_idle_threshold(threshold);
                }
                Response::Saved { ok: true, saved }
            }
            Err(e) => {
                error!("Failed to save config: {e:?}");
                Response::failed(format!("Failed to save config: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::{anyhow, Result};
    use chrono::{TimeZone, Utc};
    use tokio::sync::{mpsc, oneshot};
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            collection::{
                idle::IdleDetector,
                idle::IdleState,
                sampler::Sampler,
                tracker::Inbound,
            },
            protocol::{Request, Response, StatusReport},
            storage::{
                config_store::{ConfigStore, ConfigUpdate, DEFAULT_BACKEND_URL},
                kv_store::memory::MemoryStore,
                ledger::UsageLedger,
            },
            upload::{transport::MockUploadTransport, BatchUploader},
        },
        utils::{
            clock::{Clock, ManualClock},
            logging::TEST_LOGGING,
            time::day_key,
        },
    };

    use super::TrackerModule;

    struct Fixture {
        tracker: TrackerModule,
        inbox: mpsc::Sender<Inbound>,
        shutdown: CancellationToken,
        ledger: Arc<UsageLedger>,
        config: Arc<ConfigStore>,
        ledger_store: Arc<MemoryStore>,
        clock: ManualClock,
    }

    fn fixture(transport: MockUploadTransport) -> Fixture {
        *TEST_LOGGING;
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap());
        let ledger_store = Arc::new(MemoryStore::default());
        let ledger = Arc::new(UsageLedger::new(ledger_store.clone()));
        let config = Arc::new(ConfigStore::new(Arc::new(MemoryStore::default())));
        let sampler = Sampler::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            IdleDetector::from_seconds(30),
        );
        let uploader = BatchUploader::new(
            ledger.clone(),
            config.clone(),
            Arc::new(transport),
            Arc::new(clock.clone()),
        );
        let (inbox, receiver) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let tracker = TrackerModule::new(
            receiver,
            sampler,
            uploader,
            config.clone(),
            shutdown.clone(),
            Duration::from_secs(60),
            Arc::new(clock.clone()),
        );
        Fixture {
            tracker,
            inbox,
            shutdown,
            ledger,
            config,
            ledger_store,
            clock,
        }
    }

    fn offline() -> MockUploadTransport {
        let mut transport = MockUploadTransport::new();
        transport
            .expect_send()
            .returning(|_, _| Err(anyhow!("offline")));
        transport
    }

    #[tokio::test]
    async fn test_status_reflects_environment() -> Result<()> {
        let mut fixture = fixture(offline());
        fixture
            .tracker
            .handle(Request::WindowFocusChanged { focused: false })
            .await;
        fixture
            .tracker
            .handle(Request::IdleStateChanged {
                state: IdleState::Idle,
            })
            .await;

        let response = fixture.tracker.handle(Request::GetStatus).await;
        assert_eq!(
            response,
            Response::Status(StatusReport {
                paused: false,
                idle_state: IdleState::Idle,
                window_focused: false,
                backend_url: DEFAULT_BACKEND_URL.into(),
                current_domain: None,
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_pause_stops_attribution() -> Result<()> {
        let mut fixture = fixture(offline());
        let response = fixture
            .tracker
            .handle(Request::SetPaused { value: true })
            .await;
        assert_eq!(
            response,
            Response::Paused {
                ok: true,
                paused: true
            }
        );

        fixture.clock.advance_secs(30);
        fixture
            .tracker
            .handle(Request::TabActivated {
                url: Some("https://example.com".into()),
            })
            .await;

        assert!(fixture.ledger.snapshot().await?.days.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_force_upload_flushes_and_delivers() -> Result<()> {
        let mut transport = MockUploadTransport::new();
        transport
            .expect_send()
            .withf(|_, payload| payload.events.iter().any(|v| v.domain == "example.com"))
            .returning(|_, _| Ok(()));
        let mut fixture = fixture(transport);

        fixture
            .tracker
            .handle(Request::TabActivated {
                url: Some("https://example.com".into()),
            })
            .await;
        fixture.clock.advance_secs(20);
        fixture
            .tracker
            .handle(Request::TabActivated {
                url: Some("https://example.com/other".into()),
            })
            .await;

        let response = fixture.tracker.handle(Request::ForceUpload).await;
        assert_eq!(response, Response::ack());
        assert!(fixture.ledger.snapshot().await?.days.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_force_upload_while_offline_still_acknowledges() -> Result<()> {
        let mut fixture = fixture(offline());
        fixture
            .tracker
            .handle(Request::TabActivated {
                url: Some("https://example.com".into()),
            })
            .await;
        fixture.clock.advance_secs(20);
        fixture
            .tracker
            .handle(Request::WindowFocusChanged { focused: true })
            .await;

        let response = fixture.tracker.handle(Request::ForceUpload).await;
        assert_eq!(response, Response::ack());

        let today = fixture.tracker.sampler.today();
        assert_eq!(
            fixture.ledger.snapshot().await?.seconds(&today, "example.com"),
            20
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_today() -> Result<()> {
        let mut fixture = fixture(offline());
        fixture.ledger.merge("2000-01-01", "old.com", 10).await?;
        fixture
            .tracker
            .handle(Request::TabActivated {
                url: Some("https://example.com".into()),
            })
            .await;
        fixture.clock.advance_secs(20);
        fixture
            .tracker
            .handle(Request::TabActivated {
                url: Some("https://example.com".into()),
            })
            .await;

        let response = fixture.tracker.handle(Request::ResetToday).await;
        assert_eq!(response, Response::ack());

        let snapshot = fixture.ledger.snapshot().await?;
        assert!(snapshot.day(&fixture.tracker.sampler.today()).is_none());
        assert_eq!(snapshot.seconds("2000-01-01", "old.com"), 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_failure_is_reported() -> Result<()> {
        let mut fixture = fixture(offline());
        fixture.ledger_store.fail_writes(true);

        let response = fixture.tracker.handle(Request::ResetToday).await;
        assert!(!response.is_ok());
        assert!(matches!(response, Response::Failed { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_config_applies_idle_threshold() -> Result<()> {
        let mut fixture = fixture(offline());
        let response = fixture
            .tracker
            .handle(Request::SetConfig(ConfigUpdate {
                backend_url: Some("".into()),
                idle_seconds: Some(120),
                user_id: None,
            }))
            .await;

        assert_eq!(
            response,
            Response::Saved {
                ok: true,
                saved: ConfigUpdate {
                    backend_url: None,
                    idle_seconds: Some(120),
                    user_id: None,
                }
            }
        );
        assert_eq!(fixture.tracker.sampler.idle_threshold(), 120);
        assert_eq!(fixture.config.load().await?.idle_seconds, 120);

        // Zero is stored but not applied to detection.
        fixture
            .tracker
            .handle(Request::SetConfig(ConfigUpdate {
                idle_seconds: Some(0),
                ..Default::default()
            }))
            .await;
        assert_eq!(fixture.tracker.sampler.idle_threshold(), 120);
        Ok(())
    }

    async fn send(inbox: &mpsc::Sender<Inbound>, request: Request) -> Result<Response> {
        let (reply, response) = oneshot::channel();
        inbox.send(Inbound { request, reply }).await?;
        Ok(response.await?)
    }

    /// Drives the event loop with paused tokio time. Timer ticks credit time on their own, every
    /// tick is followed by an upload attempt and stopping records the last partial interval.
    #[tokio::test(start_paused = true)]
    async fn test_event_loop_ticks_uploads_and_flushes_on_stop() -> Result<()> {
        let sent = Arc::new(AtomicUsize::new(0));
        let mut transport = MockUploadTransport::new();
        let sent_clone = sent.clone();
        transport.expect_send().returning(move |_, _| {
            sent_clone.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("offline"))
        });
        let Fixture {
            tracker,
            inbox,
            shutdown,
            ledger,
            clock,
            ..
        } = fixture(transport);
        let today = day_key(clock.today());

        let (tracker_result, driver_result) = tokio::join!(tracker.run(), async {
            let result: Result<()> = async {
                send(
                    &inbox,
                    Request::TabActivated {
                        url: Some("https://example.com".into()),
                    },
                )
                .await?;
                // Nothing to upload yet.
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(sent.load(Ordering::SeqCst), 0);

                // Only the timer fires between now and the end of the sleep.
                clock.advance_secs(60);
                tokio::time::sleep(Duration::from_secs(60)).await;
                assert_eq!(ledger.snapshot().await?.seconds(&today, "example.com"), 60);
                assert_eq!(sent.load(Ordering::SeqCst), 1);

                clock.advance_secs(30);
                send(
                    &inbox,
                    Request::TabActivated {
                        url: Some("https://other.org".into()),
                    },
                )
                .await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(ledger.snapshot().await?.seconds(&today, "other.org"), 30);
                assert_eq!(sent.load(Ordering::SeqCst), 2);

                clock.advance_secs(20);
                Ok(())
            }
            .await;
            shutdown.cancel();
            result
        });
        tracker_result?;
        driver_result?;

        let snapshot = ledger.snapshot().await?;
        assert_eq!(snapshot.seconds(&today, "example.com"), 60);
        assert_eq!(snapshot.seconds(&today, "other.org"), 30 + 20);
        Ok(())
    }

    /// A timer that fires late is not followed by a burst of catch-up ticks. The next tick is one
    /// full period after the late one.
    #[tokio::test(start_paused = true)]
    async fn test_late_timer_reschedules_from_now() -> Result<()> {
        let sent = Arc::new(AtomicUsize::new(0));
        let mut transport = MockUploadTransport::new();
        let sent_clone = sent.clone();
        transport.expect_send().returning(move |_, _| {
            sent_clone.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("offline"))
        });
        let Fixture {
            tracker,
            inbox,
            shutdown,
            ledger,
            clock,
            ..
        } = fixture(transport);
        let today = day_key(clock.today());

        let (tracker_result, driver_result) = tokio::join!(tracker.run(), async {
            let result: Result<()> = async {
                send(
                    &inbox,
                    Request::TabActivated {
                        url: Some("https://example.com".into()),
                    },
                )
                .await?;

                // The 60s timer fires at 150s.
                clock.advance_secs(60);
                tokio::time::advance(Duration::from_secs(150)).await;
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(sent.load(Ordering::SeqCst), 1);

                tokio::time::sleep(Duration::from_secs(30)).await;
                assert_eq!(sent.load(Ordering::SeqCst), 1);

                tokio::time::sleep(Duration::from_secs(30)).await;
                assert_eq!(sent.load(Ordering::SeqCst), 2);
                Ok(())
            }
            .await;
            shutdown.cancel();
            result
        });
        tracker_result?;
        driver_result?;

        assert_eq!(ledger.snapshot().await?.seconds(&today, "example.com"), 60);
        Ok(())
    }
}
