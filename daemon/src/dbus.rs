//! D-Bus provider for the F710 node table
//!
//! Exports [`NodeTable`] on the session bus so other processes can read the
//! controller fields by address.
//!
//! ## Interface: org.f710d.Provider
//!
//! ### Methods:
//! - `Read(address: s) -> v` - Current value of a field
//! - `Write(address: s, value: v)` - Always rejected, fields are read-only
//! - `Metadata(address: s) -> s` - JSON descriptor, `null` for unknown addresses
//! - `Browse(address: s) -> as` - Child nodes (none)
//! - `Create(address: s)` / `Remove(address: s)`
//! - `Nodes() -> as` - Every registered address
//! - `Snapshot() -> s` - The whole snapshot as JSON
//!
//! ### Properties:
//! - `Connected: b`, `DaemonVersion: s`, `AddressRoot: s`

use zbus::zvariant::{OwnedValue, Value};
use zbus::{fdo, interface};

use crate::nodes::{FieldKind, NodeError, NodeTable, NodeValue};

/// D-Bus interface name
pub const DBUS_INTERFACE: &str = "org.f710d.Provider";

/// D-Bus object path
pub const DBUS_PATH: &str = "/org/f710d/Provider";

/// D-Bus bus name
pub const DBUS_NAME: &str = "org.f710d";

/// F710 provider D-Bus service
pub struct ProviderService {
    nodes: NodeTable,
    /// Daemon version
    version: String,
}

impl ProviderService {
    pub fn new(nodes: NodeTable) -> Self {
        Self {
            nodes,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[interface(name = "org.f710d.Provider")]
impl ProviderService {
    // =========================================================================
    // METHODS
    // =========================================================================

    /// Read one field
    async fn read(&self, address: &str) -> fdo::Result<OwnedValue> {
        let value = self.nodes.read(address).map_err(to_fdo)?;
        to_owned_value(value)
    }

    /// Write one field
    ///
    /// Non-string values fail with a type mismatch, everything else with an
    /// invalid address.
    async fn write(&self, address: &str, value: OwnedValue) -> fdo::Result<()> {
        let value = from_dbus_value(&value)?;
        self.nodes.write(address, &value).map_err(to_fdo)
    }

    /// Metadata descriptor as JSON
    async fn metadata(&self, address: &str) -> fdo::Result<String> {
        serde_json::to_string(&self.nodes.metadata(address))
            .map_err(|e| fdo::Error::Failed(format!("Metadata encoding failed: {}", e)))
    }

    async fn browse(&self, address: &str) -> Vec<String> {
        self.nodes.browse(address)
    }

    async fn create(&self, address: &str) -> fdo::Result<()> {
        self.nodes.create(address).map_err(to_fdo)
    }

    async fn remove(&self, address: &str) -> fdo::Result<()> {
        self.nodes.remove(address).map_err(to_fdo)
    }

    /// Every registered address
    async fn nodes(&self) -> Vec<String> {
        self.nodes.addresses()
    }

    /// Consistent copy of every field as JSON
    async fn snapshot(&self) -> fdo::Result<String> {
        serde_json::to_string(&self.nodes.store().snapshot())
            .map_err(|e| fdo::Error::Failed(format!("Snapshot encoding failed: {}", e)))
    }

    // =========================================================================
    // PROPERTIES
    // =========================================================================

    /// Controller connectivity flag
    #[zbus(property)]
    async fn connected(&self) -> bool {
        self.nodes.store().connected()
    }

    /// Get daemon version
    #[zbus(property)]
    async fn daemon_version(&self) -> &str {
        &self.version
    }

    #[zbus(property)]
    async fn address_root(&self) -> &str {
        self.nodes.root()
    }
}

/// Map a node error onto the standard D-Bus errors
pub fn to_fdo(error: NodeError) -> fdo::Error {
    match error {
        NodeError::InvalidAddress(_) | NodeError::TypeMismatch { .. } => {
            fdo::Error::InvalidArgs(error.to_string())
        }
        NodeError::Unsupported(_) => fdo::Error::NotSupported(error.to_string()),
    }
}

/// Convert a field value for the wire; D-Bus has no 32-bit float
pub fn to_owned_value(value: NodeValue) -> fdo::Result<OwnedValue> {
    let value = match value {
        NodeValue::Bool(b) => Value::from(b),
        NodeValue::String(s) => Value::from(s),
        NodeValue::Float32(f) => Value::from(f64::from(f)),
    };
    OwnedValue::try_from(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

/// Convert an incoming variant
pub fn from_dbus_value(value: &Value<'_>) -> fdo::Result<NodeValue> {
    match value {
        Value::Bool(b) => Ok(NodeValue::Bool(*b)),
        Value::Str(s) => Ok(NodeValue::String(s.to_string())),
        Value::F64(f) => Ok(NodeValue::Float32(*f as f32)),
        Value::Value(inner) => from_dbus_value(inner),
        other => Err(fdo::Error::InvalidArgs(format!(
            "Type mismatch: expected {}, got {}",
            FieldKind::String.tag(),
            other.value_signature()
        ))),
    }
}

/// Initialize and run the D-Bus service
///
/// Connects to the session bus, registers the service name, and exports
/// the interface at the specified object path.
///
/// # Returns
/// A `zbus::Connection` that should be kept alive for the service to run.
pub async fn init_dbus_service(nodes: NodeTable) -> zbus::Result<zbus::Connection> {
    let service = ProviderService::new(nodes);

    let connection = zbus::connection::Builder::session()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, service)?
        .build()
        .await?;

    tracing::info!(
        name = DBUS_NAME,
        path = DBUS_PATH,
        "D-Bus service registered"
    );

    Ok(connection)
}
