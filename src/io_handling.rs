//! Uniform handling of instrument communication failures.
//!
//! Every manager operation that talks to a session runs through
//! [`IoHandler::run`]. Communication failures are reported once to the
//! handler's [`IoObserver`] together with the device address, and come back
//! as [`DeviceError::Communication`]. Everything else passes through
//! untouched.
//!
//! Unattended measurement scripts usually want to keep going when one device
//! flakes; [`FailSoft::fail_soft`] turns a communication error into `None`
//! while keeping lookup and argument errors loud:
//!
//! ```rust
//! use visa_device_manager::io_handling::FailSoft;
//! use visa_device_manager::session::mock::MockSessionManager;
//! use visa_device_manager::{DefaultInterfaceFactory, DeviceManager};
//!
//! let sessions = MockSessionManager::new();
//! sessions.instrument("GPIB0::7::INSTR").set_offline(true);
//!
//! let mut manager = DeviceManager::new(DefaultInterfaceFactory, sessions);
//! let added = manager.add_new_device_interface("GPIB0::7::INSTR").fail_soft()?;
//! assert!(added.is_none());
//! # Ok::<(), visa_device_manager::DeviceError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::error::{DeviceError, DeviceResult};
use crate::session::SessionError;

/// Manager operation being run under the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Opening a session for a new interface.
    Add,
    /// Reading from a device.
    Read,
    /// Writing to a device.
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Add => "add",
            Operation::Read => "read",
            Operation::Write => "write",
        };
        f.write_str(name)
    }
}

/// Receives communication failures intercepted by an [`IoHandler`].
pub trait IoObserver: Send + Sync {
    /// Called exactly once per intercepted failure.
    fn on_communication_error(&self, address: &str, operation: Operation, error: &SessionError);
}

/// Observer that emits one `tracing` error event per failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl IoObserver for TracingObserver {
    fn on_communication_error(&self, address: &str, operation: Operation, error: &SessionError) {
        error!(
            address = %address,
            operation = %operation,
            error = %error,
            details = ?error,
            "Communication with device failed"
        );
    }
}

/// Runs device operations and intercepts communication failures.
#[derive(Clone)]
pub struct IoHandler {
    observer: Arc<dyn IoObserver>,
}

impl IoHandler {
    /// Create a handler reporting to `observer`.
    pub fn new(observer: Arc<dyn IoObserver>) -> Self {
        Self { observer }
    }

    /// Run `op` on behalf of the device at `address`.
    ///
    /// The address is passed explicitly so reporting never depends on how
    /// the operation itself was invoked.
    ///
    /// # Errors
    /// A communication failure from the session layer is reported to the
    /// observer and returned as [`DeviceError::Communication`]. Other errors
    /// are returned unchanged and not reported.
    pub fn run<T, F>(&self, address: &str, operation: Operation, op: F) -> DeviceResult<T>
    where
        F: FnOnce() -> DeviceResult<T>,
    {
        match op() {
            Err(DeviceError::Session(source)) if source.is_communication() => {
                self.observer
                    .on_communication_error(address, operation, &source);
                Err(DeviceError::Communication {
                    address: address.to_string(),
                    operation,
                    source,
                })
            }
            other => other,
        }
    }
}

impl Default for IoHandler {
    fn default() -> Self {
        Self::new(Arc::new(TracingObserver))
    }
}

impl fmt::Debug for IoHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoHandler").finish_non_exhaustive()
    }
}

/// Fail-soft view of a device result.
pub trait FailSoft<T> {
    /// `Ok(Some(value))` on success, `Ok(None)` for an intercepted
    /// communication failure (already reported), `Err` for anything else.
    ///
    /// # Errors
    /// Returns every error that is not a communication failure.
    fn fail_soft(self) -> DeviceResult<Option<T>>;
}

impl<T> FailSoft<T> for DeviceResult<T> {
    fn fail_soft(self) -> DeviceResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_communication() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
