//! Address-keyed registry of instrument interfaces.
//!
//! A [`DeviceManager`] owns one [`DeviceInterface`] per resource address.
//! Each interface wraps an open session and keeps the history of values read
//! from its device. Reads and writes are dispatched by address; transport
//! failures are logged once with the address that caused them and surface
//! as [`DeviceError::Communication`], which [`FailSoft`] turns into an absent
//! result for unattended runs.
//!
//! Sessions come from a [`SessionManager`](session::SessionManager)
//! implementation. [`session::mock`] provides a scriptable simulated backend.
//!
//! ```rust
//! use visa_device_manager::session::mock::MockSessionManager;
//! use visa_device_manager::{DefaultInterfaceFactory, DeviceManager, Encoding, WriteOptions};
//!
//! let sessions = MockSessionManager::new();
//! let source = sessions.instrument("USB0::0x0957::0x0407::MY44012345::INSTR");
//!
//! let mut manager = DeviceManager::new(DefaultInterfaceFactory, sessions.clone());
//! manager.add_new_device_interface("USB0::0x0957::0x0407::MY44012345::INSTR")?;
//! manager.write_to_device(
//!     "USB0::0x0957::0x0407::MY44012345::INSTR",
//!     Encoding::Ascii,
//!     "SOUR:LIST ",
//!     Some(&[1.0, 2.0, 3.0]),
//!     &WriteOptions::default(),
//! )?;
//!
//! assert_eq!(source.writes(), vec![b"SOUR:LIST 1,2,3\n".to_vec()]);
//! # Ok::<(), visa_device_manager::DeviceError>(())
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod io_handling;
pub mod logging;
pub mod session;

pub use config::{ConfigError, ManagerConfig};
pub use device::{
    DefaultInterfaceFactory, DeviceInterface, DeviceManager, Encoding, InterfaceFactory, Reading,
    WriteOptions,
};
pub use error::{DeviceError, DeviceResult};
pub use io_handling::{FailSoft, IoHandler, IoObserver, Operation, TracingObserver};
