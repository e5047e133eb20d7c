//! Scheduling and liveness loop
//!
//! Drives refresh → chunk → publish cycles on a fixed interval until the stop
//! signal is set. Any cycle error ends the run with a [`FatalError`]; the
//! engine never retries and never publishes a partial cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::chunking;
use crate::config::SyncConfig;
use crate::error::{FatalError, PeripheralError, Phase, SyncError};
use crate::liveness::LivenessNotifier;
use crate::peripheral::{PeripheralService, ServiceDescriptor, ServiceHandle};
use crate::pipeline::RefreshPipeline;
use crate::signal::StopSignal;

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

/// Lifecycle of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, service not registered yet
    Idle,
    /// Advertising and publishing cycles
    Running,
    /// Stop signal observed, service torn down
    Stopped,
    /// A fatal error ended the run
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Running => write!(f, "Running"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Summary of one successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub payload_len: usize,
    pub chunks: usize,
    pub fallback_used: bool,
    pub elapsed: Duration,
}

/// How a run ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineExit {
    /// Completed cycles
    pub cycles: u64,
}

impl EngineExit {
    pub fn exit_code(&self) -> i32 {
        0
    }
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Publishes refreshed snapshots into the peripheral's characteristic slots
pub struct SyncEngine {
    pipeline: RefreshPipeline,
    peripheral: Box<dyn PeripheralService>,
    notifier: Arc<dyn LivenessNotifier>,
    stop: StopSignal,
    descriptor: ServiceDescriptor,
    slot_capacity: usize,
    interval: Duration,
    handle: Option<ServiceHandle>,
    state: EngineState,
    cycles: u64,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        pipeline: RefreshPipeline,
        peripheral: Box<dyn PeripheralService>,
        notifier: Arc<dyn LivenessNotifier>,
        stop: StopSignal,
    ) -> Self {
        Self {
            pipeline,
            peripheral,
            notifier,
            stop,
            descriptor: ServiceDescriptor::from_config(&config.service),
            slot_capacity: config.service.slot_capacity,
            interval: config.refresh_interval(),
            handle: None,
            state: EngineState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Handle for requesting shutdown
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until the stop signal is observed or a cycle fails
    pub async fn run(&mut self) -> Result<EngineExit, FatalError> {
        self.stop.clear();

        if let Err(err) = self.start().await {
            self.state = EngineState::Failed;
            error!("Startup failed: {}", err);
            return Err(FatalError::new(Phase::Startup, 0, err));
        }

        loop {
            if self.stop.is_set() {
                info!("Stop signal observed after {} cycles", self.cycles);
                break;
            }

            match self.run_cycle().await {
                Ok(report) => {
                    info!(
                        "Cycle {} published {} bytes in {} slots ({}ms{})",
                        report.cycle,
                        report.payload_len,
                        report.chunks,
                        report.elapsed.as_millis(),
                        if report.fallback_used { ", timetable fallback" } else { "" }
                    );
                    self.heartbeat(&report);
                }
                Err(fatal) => {
                    self.state = EngineState::Failed;
                    error!("{}", fatal);
                    return Err(fatal);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.stop.wait() => {
                    debug!("Stop requested while sleeping");
                }
            }
        }

        self.shutdown().await
    }

    /// Register the service and start advertising (Idle → Running)
    async fn start(&mut self) -> Result<(), SyncError> {
        info!(
            "Registering service {} with {} characteristics",
            self.descriptor.uuid,
            self.descriptor.slot_count()
        );
        let handle = self.peripheral.register(&self.descriptor).await?;
        self.peripheral.start_advertising(&handle).await?;
        self.handle = Some(handle);
        self.state = EngineState::Running;
        info!("Advertising as {}", self.descriptor.local_name);

        if let Err(e) = self.notifier.ready() {
            warn!("Failed to notify supervisor: {}", e);
        }
        Ok(())
    }

    /// Run one refresh → chunk → publish step.
    ///
    /// The service must be registered; slot values only change once the whole
    /// payload has been chunked successfully.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, FatalError> {
        let cycle = self.cycles + 1;
        let started = Instant::now();

        let handle = self.handle.as_ref().ok_or_else(|| {
            FatalError::new(
                Phase::Publish,
                cycle,
                SyncError::Peripheral(PeripheralError::NotRegistered),
            )
        })?;

        debug!("Refreshing data (cycle {})", cycle);
        let output = self
            .pipeline
            .refresh()
            .await
            .map_err(|e| FatalError::new(Phase::Refresh, cycle, e))?;

        let assignment = chunking::layout(
            &output.payload,
            self.slot_capacity,
            self.descriptor.slot_count(),
        )
        .map_err(|e| FatalError::new(Phase::Chunking, cycle, e))?;

        self.peripheral
            .publish(handle, &assignment)
            .map_err(|e| FatalError::new(Phase::Publish, cycle, e.into()))?;

        self.cycles = cycle;
        Ok(CycleReport {
            cycle,
            payload_len: output.payload.len(),
            chunks: assignment.used_slots(),
            fallback_used: output.fallback_used,
            elapsed: started.elapsed(),
        })
    }

    fn heartbeat(&self, report: &CycleReport) {
        if let Err(e) = self.notifier.heartbeat() {
            warn!("Failed to send watchdog heartbeat: {}", e);
        }
        let status = format!(
            "cycle {}: {} bytes in {} slots",
            report.cycle, report.payload_len, report.chunks
        );
        if let Err(e) = self.notifier.status(&status) {
            debug!("Failed to send status: {}", e);
        }
    }

    /// Running → Stopped: stop advertising and tear down the service
    async fn shutdown(&mut self) -> Result<EngineExit, FatalError> {
        self.state = EngineState::Stopped;
        if let Err(e) = self.notifier.stopping() {
            warn!("Failed to notify supervisor: {}", e);
        }

        if let Some(handle) = self.handle.take() {
            self.peripheral
                .stop(handle)
                .await
                .map_err(|e| FatalError::new(Phase::Shutdown, self.cycles, e.into()))?;
        }

        info!("Engine stopped after {} cycles", self.cycles);
        Ok(EngineExit {
            cycles: self.cycles,
        })
    }
}
