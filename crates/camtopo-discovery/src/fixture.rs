//! TOML topology fixtures for the simulated transport
//!
//! ```toml
//! gev_enumeration = true
//!
//! [[interface]]
//! id = "eth0"
//! type = "GEV"
//! display_name = "Intel I210 Gigabit"
//! address = "192.168.10.1"
//! subnet_mask = "255.255.255.0"
//!
//! [[interface.device]]
//! serial = 21290000
//! vendor = "FLIR"
//! model = "Blackfly S"
//! ip = "192.168.10.20"
//! mac = "00:11:22:33:44:55"
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::simulated::{SimInterface, SimulatedTransport};

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Failed to read fixture {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse fixture: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid fixture: {0}")]
    Invalid(String),
}

fn default_gev_enumeration() -> Option<bool> {
    Some(true)
}

/// Parsed fixture file
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default = "default_gev_enumeration")]
    pub gev_enumeration: Option<bool>,
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<SimInterface>,
}

impl Fixture {
    pub fn parse(content: &str) -> Result<Self, FixtureError> {
        let fixture: Fixture = toml::from_str(content)?;
        fixture.validate()?;
        Ok(fixture)
    }

    fn validate(&self) -> Result<(), FixtureError> {
        let mut ids = std::collections::HashSet::new();
        let mut serials = std::collections::HashSet::new();
        for iface in &self.interfaces {
            if !ids.insert(iface.id.as_str()) {
                return Err(FixtureError::Invalid(format!("interface {} listed twice", iface.id)));
            }
            for device in &iface.devices {
                if !serials.insert(device.serial) {
                    return Err(FixtureError::Invalid(format!(
                        "device {} listed twice",
                        device.serial
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn into_transport(self) -> SimulatedTransport {
        SimulatedTransport::from_interfaces(self.interfaces, self.gev_enumeration)
    }
}

/// Load a fixture file into a simulated transport
pub fn load_fixture(path: &Path) -> Result<SimulatedTransport, FixtureError> {
    let content = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let fixture = Fixture::parse(&content)?;
    info!(
        path = %path.display(),
        interfaces = fixture.interfaces.len(),
        "Loaded topology fixture"
    );
    Ok(fixture.into_transport())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use std::io::Write;
    use std::net::Ipv4Addr;

    const SAMPLE: &str = r#"
[[interface]]
id = "eth0"
display_name = "Intel I210"
address = "192.168.10.1"
subnet_mask = "255.255.255.0"

[[interface.device]]
serial = 100
vendor = "FLIR"
model = "Blackfly S"
ip = "192.168.10.20"
mac = "00-11-22-33-44-55"

[[interface.device]]
serial = 101
reachable = false

[[interface]]
id = "usb0"
type = "U3V"
auto_force_ip = false
"#;

    #[test]
    fn test_parse_sample() {
        let fixture = Fixture::parse(SAMPLE).unwrap();
        assert_eq!(fixture.gev_enumeration, Some(true));
        assert_eq!(fixture.interfaces.len(), 2);
        let eth0 = &fixture.interfaces[0];
        assert_eq!(eth0.kind, "GEV");
        assert_eq!(eth0.devices.len(), 2);
        assert_eq!(eth0.devices[0].ip, Some(Ipv4Addr::new(192, 168, 10, 20)));
        assert_eq!(eth0.devices[0].mac.unwrap().to_string(), "00:11:22:33:44:55");
        assert!(!eth0.devices[1].reachable);
        assert_eq!(fixture.interfaces[1].kind, "U3V");
    }

    #[test]
    fn test_duplicate_serial_rejected() {
        let content = r#"
[[interface]]
id = "eth0"
[[interface.device]]
serial = 1
[[interface]]
id = "eth1"
[[interface.device]]
serial = 1
"#;
        assert!(matches!(Fixture::parse(content), Err(FixtureError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let sim = load_fixture(file.path()).unwrap();
        assert_eq!(sim.interface_ids(), vec!["eth0", "usb0"]);
        assert_eq!(sim.device_count(), 2);
        assert_eq!(sim.enumerate().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = load_fixture(Path::new("/nonexistent/camtopo-fixture.toml")).unwrap_err();
        assert!(matches!(err, FixtureError::Read { .. }));
    }
}
