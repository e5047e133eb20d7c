//! Liveness reporting to the process supervisor

use std::sync::Mutex;
use std::time::Duration;

use sd_notify::NotifyState;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Heartbeat channel to whatever supervises the process
pub trait LivenessNotifier: Send + Sync {
    /// Startup finished, the service is advertising
    fn ready(&self) -> Result<()>;
    /// One cycle completed successfully
    fn heartbeat(&self) -> Result<()>;
    /// Graceful shutdown started
    fn stopping(&self) -> Result<()>;
    /// Free-form status line
    fn status(&self, status: &str) -> Result<()>;
}

// ----------------------------------------------------------------------------
// systemd
// ----------------------------------------------------------------------------

/// systemd notify-socket notifier; a no-op when `NOTIFY_SOCKET` is unset
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdNotifier;

impl SystemdNotifier {
    pub fn new() -> Self {
        Self
    }

    /// Watchdog timeout requested by the service manager, if any
    pub fn watchdog_timeout() -> Option<Duration> {
        let mut usec = 0u64;
        if sd_notify::watchdog_enabled(false, &mut usec) {
            Some(Duration::from_micros(usec))
        } else {
            None
        }
    }

    fn send(&self, state: &[NotifyState<'_>]) -> Result<()> {
        sd_notify::notify(false, state).map_err(|e| SyncError::Liveness(e.to_string()))
    }
}

impl LivenessNotifier for SystemdNotifier {
    fn ready(&self) -> Result<()> {
        self.send(&[NotifyState::Ready])
    }

    fn heartbeat(&self) -> Result<()> {
        debug!("WATCHDOG=1");
        self.send(&[NotifyState::Watchdog])
    }

    fn stopping(&self) -> Result<()> {
        self.send(&[NotifyState::Stopping])
    }

    fn status(&self, status: &str) -> Result<()> {
        self.send(&[NotifyState::Status(status)])
    }
}

// ----------------------------------------------------------------------------
// Disabled / Recording
// ----------------------------------------------------------------------------

/// Notifier used when supervision is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl LivenessNotifier for NoopNotifier {
    fn ready(&self) -> Result<()> {
        Ok(())
    }

    fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    fn stopping(&self) -> Result<()> {
        Ok(())
    }

    fn status(&self, _status: &str) -> Result<()> {
        Ok(())
    }
}

/// Notifier that keeps every message in memory, in systemd wire form
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Number of `WATCHDOG=1` heartbeats seen
    pub fn heartbeats(&self) -> usize {
        self.messages()
            .iter()
            .filter(|m| m.as_str() == "WATCHDOG=1")
            .count()
    }

    fn record(&self, message: String) -> Result<()> {
        self.messages
            .lock()
            .map_err(|e| SyncError::Liveness(e.to_string()))?
            .push(message);
        Ok(())
    }
}

impl LivenessNotifier for RecordingNotifier {
    fn ready(&self) -> Result<()> {
        self.record("READY=1".to_string())
    }

    fn heartbeat(&self) -> Result<()> {
        self.record("WATCHDOG=1".to_string())
    }

    fn stopping(&self) -> Result<()> {
        self.record("STOPPING=1".to_string())
    }

    fn status(&self, status: &str) -> Result<()> {
        self.record(format!("STATUS={status}"))
    }
}
