use std::{fmt, io, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    notify::LaunchAtLogin,
    storage::{BlobStore, StorageError},
};

pub const SETTINGS_KEY: &str = "settings";

/// Allowed polling intervals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum PollInterval {
    OneMinute,
    #[default]
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
}

impl PollInterval {
    pub const ALL: [PollInterval; 4] = [
        PollInterval::OneMinute,
        PollInterval::FiveMinutes,
        PollInterval::FifteenMinutes,
        PollInterval::ThirtyMinutes,
    ];

    pub fn seconds(&self) -> u64 {
        match self {
            PollInterval::OneMinute => 60,
            PollInterval::FiveMinutes => 300,
            PollInterval::FifteenMinutes => 900,
            PollInterval::ThirtyMinutes => 1800,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }
}

impl TryFrom<u64> for PollInterval {
    type Error = String;

    fn try_from(seconds: u64) -> Result<Self, Self::Error> {
        PollInterval::ALL
            .into_iter()
            .find(|interval| interval.seconds() == seconds)
            .ok_or_else(|| format!("unsupported poll interval {seconds}s (use 60, 300, 900 or 1800)"))
    }
}

impl From<PollInterval> for u64 {
    fn from(interval: PollInterval) -> Self {
        interval.seconds()
    }
}

impl fmt::Display for PollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.seconds() {
            60 => write!(f, "1 minute"),
            secs => write!(f, "{} minutes", secs / 60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub poll_interval: PollInterval,
    #[serde(default = "default_notifications")]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub launch_at_login: bool,
}

fn default_notifications() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval: PollInterval::default(),
            notifications_enabled: default_notifications(),
            launch_at_login: false,
        }
    }
}

impl Settings {
    /// Reads settings; missing or unreadable data falls back to defaults.
    pub fn load(store: &impl BlobStore) -> Self {
        match store.load_blob(SETTINGS_KEY) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings: {err}");
                Self::default()
            }),
            Ok(None) => Self::default(),
            Err(err) => {
                warn!("Failed to load settings: {err}");
                Self::default()
            }
        }
    }

    /// Registers with the login-item collaborator and records the choice only
    /// if registration succeeded.
    pub fn set_launch_at_login(
        &mut self,
        enabled: bool,
        registrar: &impl LaunchAtLogin,
    ) -> io::Result<()> {
        registrar.register_launch_at_login(enabled)?;
        self.launch_at_login = enabled;
        Ok(())
    }

    pub fn save(&self, store: &impl BlobStore) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        store.persist_blob(SETTINGS_KEY, &bytes)
    }
}
