use std::{mem, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::{
    daemon::storage::{entities::DayUsage, ledger::UsageLedger},
    utils::{clock::Clock, time::day_key},
};

use super::{
    domain::resolve_domain,
    idle::{IdleDetector, IdleState},
    signals::{EnvironmentSignal, LOAD_COMPLETE},
};

/// Nominal period of the recurring timer tick.
pub const SAMPLING_PERIOD: Duration = Duration::from_secs(60);

/// A single tick never credits more than one sampling period. Larger gaps come from sleep or
/// missed timers and must not be attributed to whatever tab is active at wake-up.
const MAX_TICK_SECONDS: u64 = SAMPLING_PERIOD.as_secs();

/// Environment as seen at tick time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    pub active_domain: Option<String>,
    pub idle_state: IdleState,
    pub window_focused: bool,
    pub paused: bool,
}

impl EnvironmentSnapshot {
    fn is_attributable(&self) -> bool {
        !self.paused && self.idle_state == IdleState::Active && self.window_focused
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub elapsed: u64,
    pub attributed: Option<(String, u64)>,
}

/// The activity state machine. Signals update the environment, ticks turn elapsed wall-clock time
/// into seconds for the active domain and flush them into the ledger.
///
/// Attribution is decided by the snapshot at tick time only. A focus change in the middle of an
/// interval is not split: the whole interval goes to whatever the snapshot says when the tick
/// runs.
pub struct Sampler {
    ledger: Arc<UsageLedger>,
    clock: Arc<dyn Clock>,
    idle_detector: IdleDetector,
    last_tick: DateTime<Utc>,
    active_url: Option<String>,
    current_domain: Option<String>,
    idle_state: IdleState,
    window_focused: bool,
    paused: bool,
    accumulator: DayUsage,
}

impl Sampler {
    pub fn new(ledger: Arc<UsageLedger>, clock: Arc<dyn Clock>, idle_detector: IdleDetector) -> Self {
        let last_tick = clock.time();
        Self {
            ledger,
            clock,
            idle_detector,
            last_tick,
            active_url: None,
            current_domain: None,
            idle_state: IdleState::Active,
            window_focused: true,
            paused: false,
            accumulator: DayUsage::new(),
        }
    }

    /// Applies a signal to the environment. Returns whether it should trigger a tick.
    pub fn observe(&mut self, signal: EnvironmentSignal) -> bool {
        match signal {
            EnvironmentSignal::TabActivated { url } => {
                self.active_url = url;
                true
            }
            EnvironmentSignal::TabUpdated {
                url,
                status,
                active,
            } => {
                let should_tick = url.is_some() || status.as_deref() == Some(LOAD_COMPLETE);
                if active && url.is_some() {
                    self.active_url = url;
                }
                should_tick
            }
            EnvironmentSignal::WindowFocusChanged { focused } => {
                self.window_focused = focused;
                true
            }
            EnvironmentSignal::IdleStateChanged { state } => {
                self.idle_state = state;
                true
            }
            EnvironmentSignal::IdleTime { seconds } => {
                // Locking is only reported explicitly, raw idle time can't leave that state.
                if self.idle_state == IdleState::Locked {
                    return false;
                }
                let state = self.idle_detector.evaluate(seconds);
                if state == self.idle_state {
                    return false;
                }
                self.idle_state = state;
                true
            }
        }
    }

    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            active_domain: self.active_url.as_deref().and_then(resolve_domain),
            idle_state: self.idle_state,
            window_focused: self.window_focused,
            paused: self.paused,
        }
    }

    /// Evaluates the environment and flushes the result into the ledger. If the flush fails the
    /// attributed seconds stay in the accumulator and go out with the next flush.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let report = self.attribute();
        debug!("Tick {:?}", report);
        self.flush().await?;
        Ok(report)
    }

    fn attribute(&mut self) -> TickReport {
        let now = self.clock.time();
        let elapsed = (now - self.last_tick).num_seconds().max(0) as u64;
        self.last_tick = now;

        let snapshot = self.snapshot();
        if !snapshot.is_attributable() {
            self.current_domain = None;
            return TickReport {
                elapsed,
                attributed: None,
            };
        }

        self.current_domain = snapshot.active_domain.clone();
        let attributed = snapshot.active_domain.map(|domain| {
            let seconds = elapsed.min(MAX_TICK_SECONDS);
            if seconds > 0 {
                let total = self.accumulator.entry(domain.clone()).or_insert(0);
                *total = total.saturating_add(seconds);
            }
            (domain, seconds)
        });

        TickReport {
            elapsed,
            attributed,
        }
    }

    /// Merges the accumulator into today's bucket and clears it.
    pub async fn flush(&mut self) -> Result<()> {
        if self.accumulator.is_empty() {
            return Ok(());
        }
        let pending = mem::take(&mut self.accumulator);
        let day = self.today();
        if let Err(e) = self.ledger.merge_day(&day, &pending).await {
            error!("Failed to flush {} domains into {day}: {e:?}", pending.len());
            for (domain, seconds) in pending {
                let total = self.accumulator.entry(domain).or_insert(0);
                *total = total.saturating_add(seconds);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Day key the next flush will write into.
    pub fn today(&self) -> String {
        day_key(self.clock.today())
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn idle_state(&self) -> IdleState {
        self.idle_state
    }

    pub fn window_focused(&self) -> bool {
        self.window_focused
    }

    pub fn current_domain(&self) -> Option<&str> {
        self.current_domain.as_deref()
    }

    pub fn set_idle_threshold(&mut self, threshold_s: u32) {
        self.idle_detector.set_detection_interval(threshold_s);
    }

    pub fn idle_threshold(&self) -> u32 {
        self.idle_detector.threshold()
    }

    #[cfg(test)]
    pub fn pending_seconds(&self) -> u64 {
        self.accumulator.values().sum()
    }
}
