//! Transport interface identity and type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a transport interface
///
/// `id` is the key. `index` is the position assigned by the snapshot that
/// produced it and changes between refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceIdentity {
    pub id: String,
    pub index: usize,
}

impl fmt::Display for InterfaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.id, self.index)
    }
}

/// Transport technology behind an interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceType {
    /// GigE Vision
    Gev,
    /// USB3 Vision
    Usb3,
    Other(String),
}

impl InterfaceType {
    /// Parse the value of an `InterfaceType` node
    pub fn from_node_value(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "GEV" => Self::Gev,
            "U3V" | "USB3" => Self::Usb3,
            _ => Self::Other(value.trim().to_string()),
        }
    }

    pub fn is_gev(&self) -> bool {
        matches!(self, Self::Gev)
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gev => f.write_str("GEV"),
            Self::Usb3 => f.write_str("U3V"),
            Self::Other(s) => f.write_str(s),
        }
    }
}
