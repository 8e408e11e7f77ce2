//! Node table
//!
//! Maps every exposed address (`<root>/<field>`) to a getter over the
//! current [`Snapshot`] and a static metadata descriptor, and answers the
//! read/write/metadata/browse/create/remove requests of the node layer.

use serde::Serialize;
use std::fmt;

use crate::store::{Snapshot, StateStore};

/// Type address prefix used in metadata references
const TYPE_ADDRESS_PREFIX: &str = "types/datalayer/";

/// Placeholder description URL
const DESCRIPTION_URL: &str = "tbd";

// ============================================================================
// Values
// ============================================================================

/// Wire type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool8,
    String,
    Float32,
}

impl FieldKind {
    pub fn tag(self) -> &'static str {
        match self {
            FieldKind::Bool8 => "bool8",
            FieldKind::String => "string",
            FieldKind::Float32 => "float32",
        }
    }

    pub fn type_address(self) -> String {
        format!("{}{}", TYPE_ADDRESS_PREFIX, self.tag())
    }
}

/// A value read from or written to a node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeValue {
    Bool(bool),
    String(String),
    Float32(f32),
}

impl NodeValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            NodeValue::Bool(_) => FieldKind::Bool8,
            NodeValue::String(_) => FieldKind::String,
            NodeValue::Float32(_) => FieldKind::Float32,
        }
    }
}

// ============================================================================
// Field table
// ============================================================================

/// One exposed field
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    pub get: fn(&Snapshot) -> NodeValue,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

macro_rules! bool_field {
    ($name:literal, $description:literal, $field:ident) => {
        Field {
            name: $name,
            kind: FieldKind::Bool8,
            description: $description,
            get: |s| NodeValue::Bool(s.state.$field),
        }
    };
}

macro_rules! axis_field {
    ($name:literal, $description:literal, $field:ident) => {
        Field {
            name: $name,
            kind: FieldKind::Float32,
            description: $description,
            get: |s| NodeValue::Float32(s.state.$field),
        }
    };
}

/// Every exposed field, in registration order
pub static FIELDS: [Field; 18] = [
    Field {
        name: "controller-connected",
        kind: FieldKind::Bool8,
        description: "Controller connected",
        get: |s| NodeValue::Bool(s.connected),
    },
    Field {
        name: "full-data",
        kind: FieldKind::String,
        description: "Full controller data",
        get: |s| NodeValue::String(s.full_data.clone()),
    },
    bool_field!("left-button", "Left trigger LB pressed down", left_bumper),
    bool_field!("right-button", "Right trigger RB pressed down", right_bumper),
    bool_field!("left-button-bottom", "Left trigger LT pressed down", left_trigger),
    bool_field!("right-button-bottom", "Right trigger RT pressed down", right_trigger),
    bool_field!("b-button", "B button pressed down", b),
    bool_field!("y-button", "Y button pressed down", y),
    bool_field!("x-button", "X button pressed down", x),
    bool_field!("a-button", "A button pressed down", a),
    bool_field!("up-cross-button", "Up cross button pressed down", dpad_up),
    bool_field!("down-cross-button", "Down cross button pressed down", dpad_down),
    bool_field!("left-cross-button", "Left cross button pressed down", dpad_left),
    bool_field!("right-cross-button", "Right cross button pressed down", dpad_right),
    axis_field!("Left-Joystick-X", "Left Joystick X", left_x),
    axis_field!("Left-Joystick-Y", "Left Joystick Y", left_y),
    axis_field!("Right-Joystick-X", "Right Joystick X", right_x),
    axis_field!("Right-Joystick-Y", "Right Joystick Y", right_y),
];

/// Look up a field by its identifier
pub fn field(name: &str) -> Option<&'static Field> {
    FIELDS.iter().find(|f| f.name == name)
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeClass {
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllowedOperations {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(rename = "type")]
    pub kind: String,
    pub target_address: String,
}

/// Descriptor returned for a known address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub node_class: NodeClass,
    pub operations: AllowedOperations,
    pub description: String,
    pub description_url: String,
    pub unit: String,
    pub references: Vec<Reference>,
}

impl Metadata {
    /// Read-only variable descriptor for `field`
    pub fn for_field(field: &Field) -> Self {
        let target = field.kind.type_address();
        Self {
            node_class: NodeClass::Variable,
            operations: AllowedOperations {
                read: true,
                write: false,
                create: false,
                delete: false,
            },
            description: field.description.to_string(),
            description_url: DESCRIPTION_URL.to_string(),
            unit: String::new(),
            references: vec![
                Reference {
                    kind: "readType".to_string(),
                    target_address: target.clone(),
                },
                Reference {
                    kind: "writeType".to_string(),
                    target_address: target,
                },
            ],
        }
    }
}

// ============================================================================
// Node table
// ============================================================================

/// Address resolution over the shared [`StateStore`]
#[derive(Debug, Clone)]
pub struct NodeTable {
    root: String,
    store: StateStore,
}

impl NodeTable {
    pub fn new(address_root: &str, store: StateStore) -> Self {
        let table = Self {
            root: address_root.trim_matches('/').to_string(),
            store,
        };
        tracing::info!(root = %table.root, nodes = FIELDS.len(), "Provider nodes registered");
        table
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Every registered address, in registration order
    pub fn addresses(&self) -> Vec<String> {
        FIELDS
            .iter()
            .map(|f| format!("{}/{}", self.root, f.name))
            .collect()
    }

    /// Resolve `<root>/<field>` to its field
    pub fn resolve(&self, address: &str) -> Option<&'static Field> {
        let name = address
            .trim_start_matches('/')
            .strip_prefix(self.root.as_str())?
            .strip_prefix('/')?;
        field(name)
    }

    /// Current value of the field at `address`
    pub fn read(&self, address: &str) -> Result<NodeValue, NodeError> {
        let field = self
            .resolve(address)
            .ok_or_else(|| NodeError::InvalidAddress(address.to_string()))?;
        Ok((field.get)(&self.store.snapshot()))
    }

    /// Every field is read-only; the value type is checked first
    pub fn write(&self, address: &str, value: &NodeValue) -> Result<(), NodeError> {
        if value.kind() != FieldKind::String {
            return Err(NodeError::TypeMismatch {
                expected: FieldKind::String,
                found: value.kind(),
            });
        }
        tracing::debug!(address, "Rejected write to read-only node");
        Err(NodeError::InvalidAddress(address.to_string()))
    }

    /// Descriptor for a known address, `None` otherwise
    pub fn metadata(&self, address: &str) -> Option<Metadata> {
        self.resolve(address).map(Metadata::for_field)
    }

    /// Child nodes, there are none
    pub fn browse(&self, _address: &str) -> Vec<String> {
        Vec::new()
    }

    pub fn create(&self, address: &str) -> Result<(), NodeError> {
        tracing::debug!(address, "Create request accepted");
        Ok(())
    }

    pub fn remove(&self, address: &str) -> Result<(), NodeError> {
        Err(NodeError::Unsupported(format!("remove {}", address)))
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    InvalidAddress(String),
    TypeMismatch { expected: FieldKind, found: FieldKind },
    Unsupported(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::InvalidAddress(a) => write!(f, "Invalid address: {}", a),
            NodeError::TypeMismatch { expected, found } => write!(
                f,
                "Type mismatch: expected {}, got {}",
                expected.tag(),
                found.tag()
            ),
            NodeError::Unsupported(op) => write!(f, "Unsupported operation: {}", op),
        }
    }
}

impl std::error::Error for NodeError {}
