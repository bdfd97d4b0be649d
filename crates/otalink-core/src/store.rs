//! Device status store.
//!
//! The store is the single owner of every mutable field an observer can
//! see. All reads and writes go through one mutex, so a reader never
//! observes a phase, counter and descriptor coming from different writers.
//! Critical sections never span I/O.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::model::{DeviceView, FirmwareDescriptor, LinkStatus, ProgressCounter, StatusSnapshot, UpdatePhase};
use crate::source::{ConfigError, StatusSource};

#[derive(Debug)]
struct DeviceState {
    status: StatusSnapshot,
    firmware: FirmwareDescriptor,
    phase: UpdatePhase,
}

impl DeviceState {
    fn view(&self) -> DeviceView {
        DeviceView {
            status: self.status.clone(),
            firmware: self.firmware.clone(),
            phase: self.phase,
        }
    }
}

/// In-memory device status store, shared as `Arc<StatusStore>`.
#[derive(Debug)]
pub struct StatusStore {
    state: Mutex<DeviceState>,
}

impl StatusStore {
    /// Create a store in the `Initial` phase with an empty link status.
    pub fn new(firmware: FirmwareDescriptor) -> Self {
        Self {
            state: Mutex::new(DeviceState {
                status: StatusSnapshot::default(),
                firmware,
                phase: UpdatePhase::Initial,
            }),
        }
    }

    // A panic while holding the lock cannot leave the state half-written:
    // every mutation is a single field assignment.
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read status, firmware and phase atomically.
    pub fn get(&self) -> DeviceView {
        self.lock().view()
    }

    pub fn phase(&self) -> UpdatePhase {
        self.lock().phase
    }

    /// Overwrite the phase, returning the previous one.
    pub fn set_phase(&self, phase: UpdatePhase) -> UpdatePhase {
        let mut state = self.lock();
        std::mem::replace(&mut state.phase, phase)
    }

    /// Run a read-check-write on the phase under one lock acquisition.
    ///
    /// `f` receives the current phase and returns the phase to store, or an
    /// error which leaves the phase untouched. Returns `(previous, current)`.
    pub fn transition<E>(
        &self,
        f: impl FnOnce(UpdatePhase) -> Result<UpdatePhase, E>,
    ) -> Result<(UpdatePhase, UpdatePhase), E> {
        let mut state = self.lock();
        let previous = state.phase;
        state.phase = f(previous)?;
        Ok((previous, state.phase))
    }

    /// Advance the progress counter and return the view it belongs to.
    pub fn advance_counter(&self) -> DeviceView {
        let mut state = self.lock();
        state.status.counter = state.status.counter.next();
        state.view()
    }

    pub fn counter(&self) -> ProgressCounter {
        self.lock().status.counter
    }

    pub fn set_firmware(&self, firmware: FirmwareDescriptor) {
        self.lock().firmware = firmware;
    }

    /// Replace the link status with a fresh read from `source`.
    ///
    /// The source is read before the lock is taken. On failure the error is
    /// returned and the previous link status stays in place.
    pub fn load_static_snapshot(&self, source: &dyn StatusSource) -> Result<(), ConfigError> {
        let link = source.load_link_status()?;
        debug!("Loaded {} link status fields", link.fields().len());
        self.lock().status.link = link;
        Ok(())
    }

    pub fn link_status(&self) -> LinkStatus {
        self.lock().status.link.clone()
    }
}
