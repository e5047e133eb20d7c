//! Stop signal for the scheduling loop
//!
//! The loop owns a [`StopSignal`] handle and checks it once per iteration. A
//! clone of the handle goes to whatever requests shutdown (signal handler,
//! BLE runtime thread, test). Two backings exist with the same observable
//! behaviour: a cooperative one built on a tokio `watch` channel, and a
//! threaded one built on `Mutex` + `Condvar` for hosts where the shutdown
//! request comes from a thread outside the engine's runtime.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::StopSignalMode;

/// Poll period used when awaiting the threaded flag from async code
const THREADED_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ----------------------------------------------------------------------------
// Stop Flag Trait
// ----------------------------------------------------------------------------

/// A set-once binary flag
#[async_trait]
pub trait StopFlag: Send + Sync {
    fn set(&self);
    fn clear(&self);
    fn is_set(&self) -> bool;
    /// Resolve once the flag is set
    async fn wait(&self);
}

// ----------------------------------------------------------------------------
// Cooperative Backing
// ----------------------------------------------------------------------------

/// Flag shared with tasks on the same async runtime
pub struct CooperativeStop {
    state: watch::Sender<bool>,
}

impl CooperativeStop {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }
}

impl Default for CooperativeStop {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StopFlag for CooperativeStop {
    fn set(&self) {
        self.state.send_replace(true);
    }

    fn clear(&self) {
        self.state.send_replace(false);
    }

    fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }
}

// ----------------------------------------------------------------------------
// Threaded Backing
// ----------------------------------------------------------------------------

/// Flag that any OS thread can set or block on
pub struct ThreadedStop {
    state: Mutex<bool>,
    changed: Condvar,
}

impl ThreadedStop {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block the calling thread until the flag is set or `timeout` elapses.
    /// Returns whether the flag is set.
    pub fn wait_blocking(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

impl Default for ThreadedStop {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StopFlag for ThreadedStop {
    fn set(&self) {
        *self.lock() = true;
        self.changed.notify_all();
    }

    fn clear(&self) {
        *self.lock() = false;
    }

    fn is_set(&self) -> bool {
        *self.lock()
    }

    async fn wait(&self) {
        while !self.is_set() {
            tokio::time::sleep(THREADED_POLL_INTERVAL).await;
        }
    }
}

// ----------------------------------------------------------------------------
// Stop Signal Handle
// ----------------------------------------------------------------------------

enum Backing {
    Cooperative(CooperativeStop),
    Threaded(ThreadedStop),
}

impl Backing {
    fn flag(&self) -> &dyn StopFlag {
        match self {
            Backing::Cooperative(flag) => flag,
            Backing::Threaded(flag) => flag,
        }
    }
}

/// Cloneable handle to a shared stop flag
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<Backing>,
}

impl StopSignal {
    pub fn cooperative() -> Self {
        Self {
            inner: Arc::new(Backing::Cooperative(CooperativeStop::new())),
        }
    }

    pub fn threaded() -> Self {
        Self {
            inner: Arc::new(Backing::Threaded(ThreadedStop::new())),
        }
    }

    /// Backing suited to the host platform.
    ///
    /// CoreBluetooth and WinRT deliver peripheral events on their own threads,
    /// so shutdown requests there come from outside the tokio runtime.
    pub fn for_host() -> Self {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            Self::threaded()
        } else {
            Self::cooperative()
        }
    }

    pub fn from_mode(mode: StopSignalMode) -> Self {
        match mode {
            StopSignalMode::Auto => Self::for_host(),
            StopSignalMode::Cooperative => Self::cooperative(),
            StopSignalMode::Threaded => Self::threaded(),
        }
    }

    /// Name of the backing, for logs
    pub fn kind(&self) -> &'static str {
        match *self.inner {
            Backing::Cooperative(_) => "cooperative",
            Backing::Threaded(_) => "threaded",
        }
    }

    pub fn set(&self) {
        self.inner.flag().set();
    }

    pub fn clear(&self) {
        self.inner.flag().clear();
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag().is_set()
    }

    pub async fn wait(&self) {
        self.inner.flag().wait().await;
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("kind", &self.kind())
            .field("set", &self.is_set())
            .finish()
    }
}
