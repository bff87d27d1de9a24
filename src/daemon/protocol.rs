//! Messages exchanged over the daemon socket. A connection carries exactly one request line and
//! one response line, both JSON.

use serde::{Deserialize, Serialize};

use super::{
    collection::{idle::IdleState, signals::EnvironmentSignal},
    storage::config_store::ConfigUpdate,
};

pub const DEFAULT_PORT: u16 = 47615;
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    GetStatus,
    SetPaused {
        #[serde(default)]
        value: bool,
    },
    ForceUpload,
    ResetToday,
    SetConfig(ConfigUpdate),
    TabActivated {
        #[serde(default)]
        url: Option<String>,
    },
    TabUpdated {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default = "default_active")]
        active: bool,
    },
    WindowFocusChanged {
        focused: bool,
    },
    IdleStateChanged {
        state: IdleState,
    },
    IdleTime {
        seconds: u64,
    },
}

fn default_active() -> bool {
    true
}

impl Request {
    /// Splits environment observations from commands.
    pub fn into_signal(self) -> Result<EnvironmentSignal, Request> {
        match self {
            Request::TabActivated { url } => Ok(EnvironmentSignal::TabActivated { url }),
            Request::TabUpdated {
                url,
                status,
                active,
            } => Ok(EnvironmentSignal::TabUpdated {
                url,
                status,
                active,
            }),
            Request::WindowFocusChanged { focused } => {
                Ok(EnvironmentSignal::WindowFocusChanged { focused })
            }
            Request::IdleStateChanged { state } => Ok(EnvironmentSignal::IdleStateChanged { state }),
            Request::IdleTime { seconds } => Ok(EnvironmentSignal::IdleTime { seconds }),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub paused: bool,
    pub idle_state: IdleState,
    pub window_focused: bool,
    pub backend_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_domain: Option<String>,
}

/// Every request is answered with one of these, including failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Status(StatusReport),
    Paused { ok: bool, paused: bool },
    Saved { ok: bool, saved: ConfigUpdate },
    Failed { ok: bool, error: String },
    Ack { ok: bool },
}

impl Response {
    pub fn ack() -> Self {
        Response::Ack { ok: true }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Response::Failed {
            ok: false,
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Response::Status(_) => true,
            Response::Paused { ok, .. }
            | Response::Saved { ok, .. }
            | Response::Failed { ok, .. }
            | Response::Ack { ok } => *ok,
        }
    }
}
