//! Wiring of sources, peripheral and supervisor for the binary

use std::sync::Arc;

use gattboard_ble::PlatformPeripheral;
use gattboard_core::{
    chunking, config::SyncConfig, EngineExit, HttpPrimarySource, LivenessNotifier, NoopNotifier,
    PeripheralService, RefreshOutput, RefreshPipeline, StopSignal, SyncEngine, SystemdNotifier,
    TimetableResolver,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;

// ----------------------------------------------------------------------------
// Refresh Report
// ----------------------------------------------------------------------------

/// Output of the `refresh` command
#[derive(Debug, Serialize)]
pub struct RefreshReport {
    pub snapshot: serde_json::Value,
    pub payload_bytes: usize,
    pub fallback_used: bool,
    /// Bytes per characteristic slot, in slot order
    pub slots: Vec<usize>,
}

impl RefreshReport {
    fn new(output: RefreshOutput, slots: Vec<usize>) -> Self {
        Self {
            payload_bytes: output.payload.len(),
            fallback_used: output.fallback_used,
            snapshot: output.snapshot.into_value(),
            slots,
        }
    }

    /// Pretty-printed JSON for the terminal
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

pub struct GattboardApp {
    config: SyncConfig,
}

impl GattboardApp {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Primary source and timetable fallback from configuration
    pub fn pipeline(&self) -> Result<RefreshPipeline> {
        let primary = HttpPrimarySource::new(&self.config.primary)?;
        let fallback = TimetableResolver::new(&self.config.fallback)?;
        Ok(RefreshPipeline::new(
            Arc::new(primary),
            Arc::new(fallback),
            &self.config,
        ))
    }

    /// Stop signal of the configured kind
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal::from_mode(self.config.engine.stop_signal)
    }

    fn notifier(&self) -> Arc<dyn LivenessNotifier> {
        if !self.config.engine.watchdog {
            return Arc::new(NoopNotifier);
        }

        if let Some(timeout) = SystemdNotifier::watchdog_timeout() {
            let interval = self.config.refresh_interval();
            if timeout <= interval {
                warn!(
                    "Watchdog timeout {:?} is not longer than the refresh interval {:?}; \
                    the supervisor will restart the service between cycles",
                    timeout, interval
                );
            } else {
                info!("systemd watchdog enabled ({:?})", timeout);
            }
        }
        Arc::new(SystemdNotifier::new())
    }

    /// Run the engine until `stop` is set or a cycle fails
    pub async fn run(&self, stop: StopSignal, dry_run: bool) -> Result<EngineExit> {
        let peripheral = if dry_run {
            info!("Dry run: publishing into an in-memory peripheral");
            PlatformPeripheral::in_memory()
        } else {
            PlatformPeripheral::new(&self.config.service)
        };
        info!(
            "Starting engine with {} peripheral, {} stop signal, refresh every {}s",
            peripheral.backend(),
            stop.kind(),
            self.config.engine.refresh_interval_secs
        );

        let peripheral: Box<dyn PeripheralService> = Box::new(peripheral);
        let mut engine = SyncEngine::new(
            &self.config,
            self.pipeline()?,
            peripheral,
            self.notifier(),
            stop,
        );

        Ok(engine.run().await?)
    }

    /// One refresh without touching the radio
    pub async fn refresh_once(&self) -> Result<RefreshReport> {
        let output = self.pipeline()?.refresh().await?;
        let assignment = chunking::layout(
            &output.payload,
            self.config.service.slot_capacity,
            self.config.service.characteristics.len(),
        )?;
        let slots = assignment.values().iter().map(Vec::len).collect();
        Ok(RefreshReport::new(output, slots))
    }
}
