//! f710d Daemon Library
//!
//! Public API for testing and integration.

pub mod config;
pub mod dbus;
pub mod nodes;
pub mod poll;
pub mod report;
pub mod store;
pub mod usb;

/// Re-export commonly used types
pub use config::{Config, ConfigError, DeviceId};
pub use dbus::{init_dbus_service, ProviderService, DBUS_INTERFACE, DBUS_NAME, DBUS_PATH};
pub use nodes::{Metadata, NodeError, NodeTable, NodeValue, FIELDS};
pub use poll::{LinkState, PollLoop, Step};
pub use report::{decode_report, ControllerState, DecodeError, REPORT_MIN_LEN};
pub use store::{Snapshot, StateStore};
pub use usb::{
    default_backend, ConnectionManager, DeviceHandle, LinkError, RusbBackend, UnavailableBackend,
    UsbBackend,
};
