//! Peripheral data synchronization engine
//!
//! Publishes a periodically refreshed JSON snapshot as a fixed set of BLE GATT
//! characteristics, so a central can read the current state without reaching
//! the origin data source.
//!
//! ## Architecture
//!
//! - [`chunking`] - split the serialized snapshot into slot-sized pieces
//! - [`departures`] - timetable scraping used when the primary feed has no departures
//! - [`source`] - authenticated fetch of the primary snapshot
//! - [`pipeline`] - fetch, fill missing attributes, serialize
//! - [`peripheral`] - service descriptor, slot store and the backend trait
//! - [`signal`] - stop signal with cooperative and threaded backings
//! - [`liveness`] - supervisor heartbeats (systemd watchdog)
//! - [`engine`] - the scheduling loop tying it together
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gattboard_core::{
//!     HttpPrimarySource, MemoryPeripheral, RefreshPipeline, StopSignal, SyncConfig,
//!     SyncEngine, SystemdNotifier, TimetableResolver,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::new()
//!     .with_endpoint("http://homeassistant.local:8123/api/states/sensor.board")
//!     .with_auth("token");
//! config.validate()?;
//!
//! let pipeline = RefreshPipeline::new(
//!     Arc::new(HttpPrimarySource::new(&config.primary)?),
//!     Arc::new(TimetableResolver::new(&config.fallback)?),
//!     &config,
//! );
//! let stop = StopSignal::for_host();
//! let mut engine = SyncEngine::new(
//!     &config,
//!     pipeline,
//!     Box::new(MemoryPeripheral::new()),
//!     Arc::new(SystemdNotifier::new()),
//!     stop.clone(),
//! );
//!
//! let exit = engine.run().await?;
//! println!("stopped after {} cycles", exit.cycles);
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod config;
pub mod departures;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod peripheral;
pub mod pipeline;
pub mod signal;
pub mod snapshot;
pub mod source;

pub use chunking::{assign, layout, reassemble, split, SlotAssignment};
pub use config::{
    ConfigError, EngineConfig, FallbackConfig, PrimaryConfig, ServiceConfig, StopSignalMode,
    SyncConfig,
};
pub use departures::{
    Clock, DepartureTable, FallbackSource, FixedClock, SystemClock, TimetableParser,
    TimetableResolver,
};
pub use engine::{CycleReport, EngineExit, EngineState, SyncEngine};
pub use error::{FatalError, PeripheralError, Phase, Result, SyncError};
pub use liveness::{LivenessNotifier, NoopNotifier, RecordingNotifier, SystemdNotifier};
pub use peripheral::{
    CharacteristicFlags, CharacteristicSlot, MemoryCentral, MemoryPeripheral, PeripheralService,
    ServiceDescriptor, ServiceHandle, SlotStore,
};
pub use pipeline::{RefreshOutput, RefreshPipeline};
pub use signal::{StopFlag, StopSignal};
pub use snapshot::DataSnapshot;
pub use source::{HttpPrimarySource, PrimarySource};
