//! Device interfaces and the manager that owns them.

pub mod interface;
pub mod manager;

pub use interface::{
    DefaultInterfaceFactory, DeviceInterface, Encoding, InterfaceFactory, Reading, WriteOptions,
};
pub use manager::DeviceManager;
