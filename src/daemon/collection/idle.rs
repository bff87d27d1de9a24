use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    #[default]
    Active,
    Idle,
    Locked,
}

impl Display for IdleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdleState::Active => write!(f, "active"),
            IdleState::Idle => write!(f, "idle"),
            IdleState::Locked => write!(f, "locked"),
        }
    }
}

/// Decides whether the user is idle from the time since their last input. The threshold is the
/// live idle-detection setting and can be changed at runtime.
pub struct IdleDetector {
    threshold_s: u32,
}

impl IdleDetector {
    pub fn from_seconds(threshold_s: u32) -> Self {
        Self { threshold_s }
    }

    pub fn set_detection_interval(&mut self, threshold_s: u32) {
        self.threshold_s = threshold_s;
    }

    pub fn threshold(&self) -> u32 {
        self.threshold_s
    }

    pub fn evaluate(&self, idle_seconds: u64) -> IdleState {
        if idle_seconds >= self.threshold_s as u64 {
            IdleState::Idle
        } else {
            IdleState::Active
        }
    }
}
