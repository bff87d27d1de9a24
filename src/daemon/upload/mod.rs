//! Delivery of the local ledger to the backend.
//!
//! Uploads always send the whole ledger. A successful response removes exactly the uploaded
//! seconds, except in days reset while the request was in flight. A failure leaves the ledger as
//! is and the next attempt sends a larger snapshot. There
//! is no backoff and no attempt limit.

pub mod payload;
pub mod transport;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use payload::UploadPayload;
use tracing::{debug, error, info, info_span, warn, Instrument};
use transport::UploadTransport;

use crate::{
    daemon::storage::{config_store::ConfigStore, ledger::UsageLedger},
    utils::clock::Clock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Another attempt was already running.
    InFlight,
    /// Nothing to send.
    Empty,
    Delivered { events: usize },
    /// The backend was unreachable or rejected the payload.
    Failed,
}

#[derive(Clone)]
pub struct BatchUploader {
    ledger: Arc<UsageLedger>,
    config: Arc<ConfigStore>,
    transport: Arc<dyn UploadTransport>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<AtomicBool>,
}

/// Releases the single-flight flag when the attempt ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BatchUploader {
    pub fn new(
        ledger: Arc<UsageLedger>,
        config: Arc<ConfigStore>,
        transport: Arc<dyn UploadTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            config,
            transport,
            clock,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sends the current ledger to the backend unless an attempt is already running. Errors are
    /// persistence failures; delivery failures are reported as [UploadOutcome::Failed].
    pub async fn attempt_upload(&self) -> Result<UploadOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("Upload already in flight");
            return Ok(UploadOutcome::InFlight);
        };

        let config = self.config.load().await?;
        let checkpoint = self.ledger.checkpoint().await?;
        let entries = checkpoint.usage.entries();
        if entries.is_empty() {
            return Ok(UploadOutcome::Empty);
        }

        let clock = self.clock.clone();
        let payload = UploadPayload::from_entries(config.user_id, entries, || {
            clock.time().timestamp_millis()
        });
        let events = payload.events.len();

        let span = info_span!("Uploading usage", events, url = %config.backend_url);
        let delivery = self
            .transport
            .send(&config.backend_url, &payload)
            .instrument(span)
            .await;

        match delivery {
            Ok(()) => {
                self.ledger.acknowledge(&checkpoint).await?;
                info!("Uploaded {events} events");
                Ok(UploadOutcome::Delivered { events })
            }
            Err(e) => {
                warn!("Upload failed, keeping {events} events for the next attempt: {e:?}");
                Ok(UploadOutcome::Failed)
            }
        }
    }

    /// Runs an attempt in the background. The caller doesn't wait for the network.
    pub fn spawn_attempt(&self) {
        let uploader = self.clone();
        tokio::spawn(async move {
            if let Err(e) = uploader.attempt_upload().await {
                error!("Upload attempt failed: {e:?}");
            }
        });
    }

    #[cfg(test)]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use chrono::{TimeZone, Utc};
    use tokio::sync::Notify;

    use crate::{
        daemon::storage::{
            config_store::{ConfigStore, ConfigUpdate},
            kv_store::memory::MemoryStore,
            ledger::UsageLedger,
        },
        utils::{clock::ManualClock, logging::TEST_LOGGING},
    };

    use super::{
        payload::UploadPayload,
        transport::{MockUploadTransport, UploadTransport},
        BatchUploader, UploadOutcome,
    };

    struct Fixture {
        ledger: Arc<UsageLedger>,
        config: Arc<ConfigStore>,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            *TEST_LOGGING;
            Self {
                ledger: Arc::new(UsageLedger::new(Arc::new(MemoryStore::default()))),
                config: Arc::new(ConfigStore::new(Arc::new(MemoryStore::default()))),
                clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()),
            }
        }

        fn uploader(&self, transport: impl UploadTransport + 'static) -> BatchUploader {
            BatchUploader::new(
                self.ledger.clone(),
                self.config.clone(),
                Arc::new(transport),
                Arc::new(self.clock.clone()),
            )
        }
    }

    #[tokio::test]
    async fn test_empty_ledger_sends_nothing() -> Result<()> {
        let fixture = Fixture::new();
        let mut transport = MockUploadTransport::new();
        transport.expect_send().never();

        let outcome = fixture.uploader(transport).attempt_upload().await?;
        assert_eq!(outcome, UploadOutcome::Empty);
        Ok(())
    }

    #[tokio::test]
    async fn test_success_clears_uploaded_entries() -> Result<()> {
        let fixture = Fixture::new();
        fixture
            .config
            .update(ConfigUpdate {
                backend_url: Some("http://backend/api/track".into()),
                user_id: Some("alice".into()),
                ..Default::default()
            })
            .await?;
        fixture.ledger.merge("2024-03-04", "a.com", 30).await?;
        fixture.ledger.merge("2024-03-05", "b.com", 60).await?;

        let sent = Arc::new(Mutex::new(None::<(String, UploadPayload)>));
        let mut transport = MockUploadTransport::new();
        let sent_clone = sent.clone();
        transport.expect_send().times(1).returning(move |url, payload| {
            *sent_clone.lock().unwrap() = Some((url.to_string(), payload.clone()));
            Ok(())
        });

        let outcome = fixture.uploader(transport).attempt_upload().await?;

        assert_eq!(outcome, UploadOutcome::Delivered { events: 2 });
        assert!(fixture.ledger.snapshot().await?.days.is_empty());

        let (url, payload) = sent.lock().unwrap().take().unwrap();
        assert_eq!(url, "http://backend/api/track");
        assert_eq!(payload.user_id, "alice");
        let rows = payload
            .events
            .iter()
            .map(|v| (v.day.as_str(), v.domain.as_str(), v.seconds))
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![("2024-03-04", "a.com", 30), ("2024-03-05", "b.com", 60)]
        );
        let expected_ts = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap().timestamp_millis();
        assert!(payload.events.iter().all(|v| v.ts == expected_ts));
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_keeps_every_second_for_retry() -> Result<()> {
        let fixture = Fixture::new();
        fixture.ledger.merge("2024-03-05", "a.com", 30).await?;

        let mut failing = MockUploadTransport::new();
        failing
            .expect_send()
            .times(1)
            .returning(|_, _| Err(anyhow!("connection refused")));
        let outcome = fixture.uploader(failing).attempt_upload().await?;
        assert_eq!(outcome, UploadOutcome::Failed);

        fixture.ledger.merge("2024-03-05", "a.com", 20).await?;

        let mut transport = MockUploadTransport::new();
        transport
            .expect_send()
            .times(1)
            .withf(|_, payload| payload.events.len() == 1 && payload.events[0].seconds == 50)
            .returning(|_, _| Ok(()));
        let outcome = fixture.uploader(transport).attempt_upload().await?;

        assert_eq!(outcome, UploadOutcome::Delivered { events: 1 });
        assert!(fixture.ledger.snapshot().await?.days.is_empty());
        Ok(())
    }

    /// Transport that blocks until released, so a second attempt can overlap the first.
    struct GatedTransport {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl UploadTransport for GatedTransport {
        async fn send(&self, _url: &str, _payload: &UploadPayload) -> Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_single_flight() -> Result<()> {
        let fixture = Fixture::new();
        fixture.ledger.merge("2024-03-05", "a.com", 30).await?;

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let uploader = fixture.uploader(GatedTransport {
            entered: entered.clone(),
            release: release.clone(),
        });

        let first = tokio::spawn({
            let uploader = uploader.clone();
            async move { uploader.attempt_upload().await }
        });
        entered.notified().await;

        assert!(uploader.is_in_flight());
        assert_eq!(uploader.attempt_upload().await?, UploadOutcome::InFlight);

        release.notify_one();
        assert_eq!(first.await??, UploadOutcome::Delivered { events: 1 });
        assert!(!uploader.is_in_flight());
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_during_upload_survives() -> Result<()> {
        let fixture = Fixture::new();
        fixture.ledger.merge("2024-03-05", "a.com", 30).await?;

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let uploader = fixture.uploader(GatedTransport {
            entered: entered.clone(),
            release: release.clone(),
        });

        let attempt = tokio::spawn({
            let uploader = uploader.clone();
            async move { uploader.attempt_upload().await }
        });
        entered.notified().await;
        fixture.ledger.merge("2024-03-05", "a.com", 12).await?;
        release.notify_one();
        attempt.await??;

        assert_eq!(
            fixture.ledger.snapshot().await?.seconds("2024-03-05", "a.com"),
            12
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_during_upload_keeps_new_time() -> Result<()> {
        let fixture = Fixture::new();
        fixture.ledger.merge("2024-03-05", "a.com", 100).await?;

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let uploader = fixture.uploader(GatedTransport {
            entered: entered.clone(),
            release: release.clone(),
        });

        let attempt = tokio::spawn({
            let uploader = uploader.clone();
            async move { uploader.attempt_upload().await }
        });
        entered.notified().await;
        fixture.ledger.reset_day("2024-03-05").await?;
        fixture.ledger.merge("2024-03-05", "a.com", 30).await?;
        release.notify_one();

        assert_eq!(attempt.await??, UploadOutcome::Delivered { events: 1 });
        assert_eq!(
            fixture.ledger.snapshot().await?.seconds("2024-03-05", "a.com"),
            30
        );
        Ok(())
    }
}
