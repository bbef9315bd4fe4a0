//! GigE address configuration operations
//!
//! Listing, lookup by serial or MAC, automatic force-IP across GEV
//! interfaces, and explicit IP configuration. Results are returned as data
//! so the CLI decides how to print them.

use camtopo_core::{names, parse_serial, DeviceInfo, InterfaceType, MacAddress, TopologyError};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

use crate::handle::DeviceHandle;
use crate::registry::TopologyRegistry;

pub const WRONG_SUBNET_WARNING: &str =
    "Warning: Camera is on a wrong subnet. Run auto force IP (with -a option) to configure the camera correctly.";

/// Why the persistent settings of a device could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFailure {
    WrongSubnet,
    Other(String),
}

impl fmt::Display for OpenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongSubnet => f.write_str(WRONG_SUBNET_WARNING),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Everything the tool can tell about one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub serial: u64,
    pub info: DeviceInfo,
    /// Set when the device could not be opened for its persistent settings
    pub open_failure: Option<OpenFailure>,
}

impl DeviceReport {
    /// Read transport-layer info, then open the device for persistent settings
    pub fn collect(device: &DeviceHandle) -> Self {
        let info = device.info();
        match device.open() {
            Ok(nodes) => Self {
                serial: device.serial(),
                info: info.with_device_nodes(nodes.as_ref()),
                open_failure: None,
            },
            Err(TopologyError::InvalidAddress { serial, reason }) => {
                warn!(serial, reason = %reason, "Device outside adapter subnet");
                Self {
                    serial: device.serial(),
                    info,
                    open_failure: Some(OpenFailure::WrongSubnet),
                }
            }
            Err(e) => Self {
                serial: device.serial(),
                info,
                open_failure: Some(OpenFailure::Other(e.to_string())),
            },
        }
    }
}

/// An interface with its device reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceReport {
    pub id: String,
    pub kind: InterfaceType,
    pub label: String,
    pub devices: Vec<DeviceReport>,
}

/// Report every interface of the current snapshot with its devices
pub fn list_interfaces(registry: &TopologyRegistry) -> Result<Vec<InterfaceReport>, TopologyError> {
    let interfaces = registry.interfaces()?;
    let reports: Vec<InterfaceReport> = interfaces
        .iter()
        .map(|iface| InterfaceReport {
            id: iface.id().to_string(),
            kind: iface.kind().clone(),
            label: iface.display_label().to_string(),
            devices: iface.devices().iter().map(DeviceReport::collect).collect(),
        })
        .collect();
    debug!(interfaces = reports.len(), "Listed interfaces");
    Ok(reports)
}

/// Look a device up by its serial as typed by the user
pub fn find_by_serial(
    registry: &TopologyRegistry,
    serial: &str,
) -> Result<Option<DeviceReport>, TopologyError> {
    let Some(serial) = parse_serial(serial) else {
        return Ok(None);
    };
    Ok(registry
        .device_by_serial(serial)?
        .map(|device| DeviceReport::collect(&device)))
}

/// Every device whose MAC matches
pub fn find_by_mac(
    registry: &TopologyRegistry,
    mac: MacAddress,
) -> Result<Vec<DeviceReport>, TopologyError> {
    Ok(registry
        .devices()?
        .iter()
        .filter(|device| device.info().mac == Some(mac))
        .map(DeviceReport::collect)
        .collect())
}

/// Result of `AutoForceIP` on one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceIpOutcome {
    Executed,
    /// The interface has no writable `AutoForceIP` node
    Unavailable,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceIpReport {
    pub id: String,
    pub label: String,
    pub outcome: ForceIpOutcome,
}

/// Run `AutoForceIP` on every GEV interface
///
/// Non-GEV interfaces are skipped. A failure on one interface does not stop
/// the others.
pub fn auto_force_ip(registry: &TopologyRegistry) -> Result<Vec<ForceIpReport>, TopologyError> {
    let mut reports = Vec::new();
    for iface in registry.interfaces()? {
        if !iface.kind().is_gev() {
            debug!(interface = %iface.id(), kind = %iface.kind(), "Skipping non-GEV interface");
            continue;
        }

        let writable = iface
            .nodes()
            .node(names::AUTO_FORCE_IP)
            .is_some_and(|node| node.is_available() && node.is_writable());
        let outcome = if !writable {
            ForceIpOutcome::Unavailable
        } else {
            match iface.execute(names::AUTO_FORCE_IP) {
                Ok(()) => {
                    info!(interface = %iface.id(), "AutoForceIP executed");
                    ForceIpOutcome::Executed
                }
                Err(e) => {
                    warn!(interface = %iface.id(), error = %e, "AutoForceIP failed");
                    ForceIpOutcome::Failed(e.to_string())
                }
            }
        };

        reports.push(ForceIpReport {
            id: iface.id().to_string(),
            label: iface.display_label().to_string(),
            outcome,
        });
    }
    Ok(reports)
}

/// How the user named a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    Serial(u64),
    Mac(MacAddress),
}

impl DeviceSelector {
    /// The all-zero serial or MAC, which never names a device
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Serial(serial) => *serial == 0,
            Self::Mac(mac) => mac.is_zero(),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(serial) => write!(f, "serial {}", serial),
            Self::Mac(mac) => write!(f, "MAC {}", mac),
        }
    }
}

/// Static IP settings for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpConfiguration {
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl IpConfiguration {
    /// No field may be 0.0.0.0
    pub fn is_complete(&self) -> bool {
        [self.ip, self.subnet_mask, self.gateway]
            .iter()
            .all(|addr| !addr.is_unspecified())
    }
}

/// Assign a specific IP configuration to one device
///
/// No transport supports this; it always fails with `NotSupported`.
pub fn configure_device(
    registry: &TopologyRegistry,
    selector: DeviceSelector,
    config: IpConfiguration,
) -> Result<(), TopologyError> {
    if registry.is_released() {
        return Err(TopologyError::AlreadyReleased);
    }
    debug!(target_device = %selector, ip = %config.ip, "Explicit IP configuration requested");
    Err(TopologyError::NotSupported(
        "forcing a specific IP address, netmask and gateway to a device".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimDevice, SimInterface, SimulatedTransport};
    use std::sync::Arc;

    fn setup() -> (SimulatedTransport, TopologyRegistry) {
        let sim = SimulatedTransport::new();
        sim.add_interface(
            SimInterface::gev("eth0")
                .with_display_name("Intel I210")
                .with_subnet(Ipv4Addr::new(192, 168, 10, 1), Ipv4Addr::new(255, 255, 255, 0))
                .with_device(
                    SimDevice::new(100)
                        .with_address(
                            Ipv4Addr::new(192, 168, 10, 20),
                            Ipv4Addr::new(255, 255, 255, 0),
                            Ipv4Addr::new(192, 168, 10, 1),
                        )
                        .with_mac(MacAddress::from_u64(0x0011_2233_4455)),
                )
                .with_device(SimDevice::new(101).unreachable()),
        );
        sim.add_interface(SimInterface::gev("eth1").without_auto_force_ip());
        sim.add_interface(SimInterface::usb3("usb0").with_device(SimDevice::new(200)));
        let registry = TopologyRegistry::detached(Arc::new(sim.clone())).unwrap();
        (sim, registry)
    }

    #[test]
    fn test_list_reports_wrong_subnet() {
        let (_sim, registry) = setup();
        let reports = list_interfaces(&registry).unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].label, "Intel I210");
        assert_eq!(reports[0].devices.len(), 2);

        let good = &reports[0].devices[0];
        assert!(good.open_failure.is_none());
        assert_eq!(good.info.persistent_ip_address, Some(0xC0A8_0A14));

        let bad = &reports[0].devices[1];
        assert_eq!(bad.open_failure, Some(OpenFailure::WrongSubnet));
        assert_eq!(bad.info.persistent_ip_address, None);
        assert_eq!(reports[1].label, "Unknown Interface (Display name not readable)");
        registry.release().unwrap();
    }

    #[test]
    fn test_find_by_serial_and_mac() {
        let (_sim, registry) = setup();
        assert_eq!(find_by_serial(&registry, "100").unwrap().unwrap().serial, 100);
        assert!(find_by_serial(&registry, "999").unwrap().is_none());
        assert!(find_by_serial(&registry, "not-a-serial").unwrap().is_none());

        let mac: MacAddress = "00-11-22-33-44-55".parse().unwrap();
        let found = find_by_mac(&registry, mac).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].serial, 100);
        registry.release().unwrap();
    }

    #[test]
    fn test_auto_force_ip_per_interface() {
        let (sim, registry) = setup();
        let reports = auto_force_ip(&registry).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].outcome, ForceIpOutcome::Executed);
        assert_eq!(reports[1].outcome, ForceIpOutcome::Unavailable);
        assert_eq!(sim.force_ip_runs(), 1);

        registry.refresh().unwrap();
        let fixed = find_by_serial(&registry, "101").unwrap().unwrap();
        assert!(fixed.open_failure.is_none());
        registry.release().unwrap();
    }

    #[test]
    fn test_configure_not_supported() {
        let (_sim, registry) = setup();
        let config = IpConfiguration {
            ip: Ipv4Addr::new(192, 168, 10, 50),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 10, 1),
        };
        assert!(config.is_complete());
        assert!(matches!(
            configure_device(&registry, DeviceSelector::Serial(100), config),
            Err(TopologyError::NotSupported(_))
        ));
        registry.release().unwrap();
    }

    #[test]
    fn test_zero_selectors() {
        assert!(DeviceSelector::Serial(0).is_zero());
        assert!(DeviceSelector::Mac(MacAddress::ZERO).is_zero());
        assert!(!DeviceSelector::Serial(7).is_zero());
        let config = IpConfiguration {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            subnet_mask: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::new(10, 0, 0, 1),
        };
        assert!(!config.is_complete());
    }
}
