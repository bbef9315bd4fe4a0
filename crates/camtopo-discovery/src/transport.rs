//! Transport layer seam
//!
//! A [`Transport`] enumerates interfaces and devices on demand and reports
//! hot-plug changes through the [`EventSink`] handed to it by the registry.
//! The registry never assumes anything about how or when the transport
//! detects a change.

use camtopo_core::NodeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::dispatcher::SignalQueue;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    #[error("Device {0} not found")]
    DeviceNotFound(u64),
    #[error("Device {serial} is not reachable on its adapter subnet: {reason}")]
    InvalidAddress { serial: u64, reason: String },
    #[error("Event delivery already started")]
    AlreadyStarted,
}

/// Arrival or removal notification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopologyEvent {
    DeviceArrival { interface_id: String, serial: u64 },
    DeviceRemoval { interface_id: String, serial: u64 },
    InterfaceArrival { interface_id: String },
    InterfaceRemoval { interface_id: String },
}

impl TopologyEvent {
    pub fn interface_id(&self) -> &str {
        match self {
            Self::DeviceArrival { interface_id, .. }
            | Self::DeviceRemoval { interface_id, .. }
            | Self::InterfaceArrival { interface_id }
            | Self::InterfaceRemoval { interface_id } => interface_id,
        }
    }

    pub fn serial(&self) -> Option<u64> {
        match self {
            Self::DeviceArrival { serial, .. } | Self::DeviceRemoval { serial, .. } => Some(*serial),
            _ => None,
        }
    }

    pub fn is_device_event(&self) -> bool {
        self.serial().is_some()
    }
}

impl fmt::Display for TopologyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceArrival { interface_id, serial } => {
                write!(f, "device {} arrived on {}", serial, interface_id)
            }
            Self::DeviceRemoval { interface_id, serial } => {
                write!(f, "device {} removed from {}", serial, interface_id)
            }
            Self::InterfaceArrival { interface_id } => write!(f, "interface {} arrived", interface_id),
            Self::InterfaceRemoval { interface_id } => write!(f, "interface {} removed", interface_id),
        }
    }
}

/// Sending half handed to a transport for hot-plug notifications
#[derive(Clone)]
pub struct EventSink {
    queue: Arc<SignalQueue>,
}

impl EventSink {
    pub(crate) fn new(queue: Arc<SignalQueue>) -> Self {
        Self { queue }
    }

    /// Queue an event for dispatch. Returns `false` once the registry is gone.
    pub fn emit(&self, event: TopologyEvent) -> bool {
        self.queue.emit(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}

/// One interface as reported by a transport enumeration
pub struct TransportInterface {
    /// Interface node map (`InterfaceID`, `InterfaceType`, ...)
    pub nodes: Arc<dyn NodeMap>,
    /// Transport-layer node maps of the attached devices
    pub devices: Vec<Arc<dyn NodeMap>>,
}

/// Source of topology information and hot-plug signals
pub trait Transport: Send + Sync {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// System-level node map (`EnumerateGEVInterfaces`, ...)
    fn system_nodes(&self) -> Arc<dyn NodeMap>;

    /// Enumerate the hardware as it is right now. May block.
    fn enumerate(&self) -> Result<Vec<TransportInterface>, TransportError>;

    /// Open a device and return its device node map
    fn open_device(&self, serial: u64) -> Result<Arc<dyn NodeMap>, TransportError>;

    /// Begin delivering hot-plug events to `sink`
    fn start(&self, sink: EventSink) -> Result<(), TransportError>;

    /// Stop delivering events. Must be idempotent.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_event_accessors() {
        let arrival = TopologyEvent::DeviceArrival {
            interface_id: "eth0".to_string(),
            serial: 42,
        };
        assert_eq!(arrival.interface_id(), "eth0");
        assert_eq!(arrival.serial(), Some(42));
        assert!(arrival.is_device_event());
        assert_eq!(arrival.to_string(), "device 42 arrived on eth0");

        let removal = TopologyEvent::InterfaceRemoval {
            interface_id: "usb1".to_string(),
        };
        assert_eq!(removal.serial(), None);
        assert_eq!(removal.to_string(), "interface usb1 removed");
    }

    #[test]
    fn test_sink_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(Arc::new(SignalQueue::new(tx)));
        assert!(sink.emit(TopologyEvent::InterfaceArrival {
            interface_id: "eth0".to_string()
        }));
        drop(rx);
        assert!(!sink.emit(TopologyEvent::InterfaceArrival {
            interface_id: "eth0".to_string()
        }));
    }
}
