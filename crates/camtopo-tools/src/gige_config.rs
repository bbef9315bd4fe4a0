//! `gige-config`: list GigE cameras, auto-configure their addresses, or look
//! one up by serial number or MAC address

use anyhow::Result;
use camtopo_core::{parse_ipv4, parse_serial, AddressParseError, MacAddress, TopologyError};
use camtopo_discovery::{
    auto_force_ip, configure_device, find_by_mac, find_by_serial, list_interfaces, DeviceReport,
    DeviceSelector, ForceIpOutcome, IpConfiguration, TopologyRegistry,
};
use clap::Parser;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::config::DEFAULT_CONFIG_PATH;

pub const HEADER: &str = "*** camtopo GigE Config Utility ***";

pub const USAGE: &str = "\
Usage:

gige-config [-a | -s SerialNumber | -m MACAddress]
gige-config -s <SerialNumber> -i <ipAddress> -n <netMask> -g <gateway>
gige-config -m <MACAddress> -i <ipAddress> -n <netMask> -g <gateway>

Options:
No arguments will list all discoverable cameras
-a : Auto-configure all discoverable cameras
-s : Serial number is used to specify camera
-m : MAC address is used to specify camera
     Bytes of MAC address must be separated by either a ':' or '-' character
-i : IP-address to assign to camera. Cannot be all zeros.
-n : Subnet mask to assign to camera. Cannot be all zeros.
-g : Default gateway to assign to camera. Cannot be all zeros.
";

#[derive(Parser, Debug)]
#[command(name = "gige-config")]
#[command(about = "List and configure GigE Vision cameras")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(long, env = crate::config::CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Auto-configure all discoverable cameras
    #[arg(short = 'a', short_alias = 'A', conflicts_with_all = ["serial", "mac", "ip", "netmask", "gateway"])]
    pub auto: bool,

    /// Serial number of the camera
    #[arg(short = 's', short_alias = 'S', value_name = "SerialNumber", conflicts_with = "mac")]
    pub serial: Option<String>,

    /// MAC address of the camera, bytes separated by ':' or '-'
    #[arg(short = 'm', short_alias = 'M', value_name = "MACAddress")]
    pub mac: Option<String>,

    /// IP address to assign
    #[arg(short = 'i', short_alias = 'I', value_name = "ipAddress", requires_all = ["netmask", "gateway"])]
    pub ip: Option<String>,

    /// Subnet mask to assign
    #[arg(short = 'n', short_alias = 'N', value_name = "netMask", requires_all = ["ip", "gateway"])]
    pub netmask: Option<String>,

    /// Default gateway to assign
    #[arg(short = 'g', short_alias = 'G', value_name = "gateway", requires_all = ["ip", "netmask"])]
    pub gateway: Option<String>,
}

/// Arguments that parse but do not form a valid command
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("Either a serial number or a MAC address is required")]
    MissingSelector,
    #[error("A serial number and a MAC address cannot be combined")]
    ConflictingSelectors,
    #[error("IP address, subnet mask and gateway must be given together")]
    IncompleteConfiguration,
    #[error("Invalid serial number: {0}")]
    Serial(String),
    #[error(transparent)]
    Address(#[from] AddressParseError),
    #[error("Serial number, MAC address and IP settings cannot be all zeros")]
    Zero,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    AutoConfigure,
    BySerial(String),
    ByMac(MacAddress),
    Configure {
        selector: DeviceSelector,
        config: IpConfiguration,
    },
}

fn parse_address(raw: Option<&str>) -> Result<Ipv4Addr, UsageError> {
    let raw = raw.ok_or(UsageError::IncompleteConfiguration)?;
    Ok(Ipv4Addr::from(parse_ipv4(raw)?))
}

impl Args {
    /// Resolve the flags into one command
    pub fn command(&self) -> Result<Command, UsageError> {
        if self.auto {
            return Ok(Command::AutoConfigure);
        }

        let configuring = self.ip.is_some() || self.netmask.is_some() || self.gateway.is_some();
        let selector = match (&self.serial, &self.mac) {
            (Some(_), Some(_)) => return Err(UsageError::ConflictingSelectors),
            (None, None) if configuring => return Err(UsageError::MissingSelector),
            (None, None) => return Ok(Command::List),
            (Some(serial), None) if !configuring => return Ok(Command::BySerial(serial.clone())),
            (None, Some(mac)) if !configuring => return Ok(Command::ByMac(mac.parse()?)),
            (Some(serial), None) => DeviceSelector::Serial(
                parse_serial(serial).ok_or_else(|| UsageError::Serial(serial.clone()))?,
            ),
            (None, Some(mac)) => DeviceSelector::Mac(mac.parse()?),
        };

        let config = IpConfiguration {
            ip: parse_address(self.ip.as_deref())?,
            subnet_mask: parse_address(self.netmask.as_deref())?,
            gateway: parse_address(self.gateway.as_deref())?,
        };
        if selector.is_zero() || !config.is_complete() {
            return Err(UsageError::Zero);
        }
        Ok(Command::Configure { selector, config })
    }
}

fn print_info<W: Write>(out: &mut W, report: &DeviceReport) -> Result<()> {
    for (label, value) in report.info.lines() {
        writeln!(out, "{} : {}", label, value)?;
    }
    if let Some(failure) = &report.open_failure {
        writeln!(out, "{}", failure)?;
    }
    Ok(())
}

fn list_all<W: Write>(registry: &TopologyRegistry, out: &mut W) -> Result<()> {
    writeln!(out, "---> Listing all discoverable cameras...")?;
    writeln!(out)?;

    for iface in list_interfaces(registry)? {
        if !iface.kind.is_gev() {
            debug!(interface = %iface.id, kind = %iface.kind, "Not listing non-GEV interface");
            continue;
        }
        writeln!(out, "*** {} ***", iface.label)?;
        if iface.devices.is_empty() {
            writeln!(out, "No devices detected.")?;
            writeln!(out)?;
            continue;
        }
        for (index, report) in iface.devices.iter().enumerate() {
            writeln!(out, "** Device {} **", index)?;
            print_info(out, report)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn show_serial<W: Write>(registry: &TopologyRegistry, serial: &str, out: &mut W) -> Result<()> {
    writeln!(out, "---> Listing device info from serial number...")?;
    writeln!(out)?;
    match find_by_serial(registry, serial)? {
        Some(report) => {
            print_info(out, &report)?;
            writeln!(out)?;
        }
        None => writeln!(out, "--> Could not discover camera with serial number: {}", serial)?,
    }
    Ok(())
}

fn show_mac<W: Write>(registry: &TopologyRegistry, mac: MacAddress, out: &mut W) -> Result<()> {
    writeln!(out, "---> Listing device info from MAC Address...")?;
    writeln!(out)?;
    let reports = find_by_mac(registry, mac)?;
    if reports.is_empty() {
        writeln!(out, "--> Could not discover camera with MAC address: {}", mac)?;
    }
    for report in &reports {
        print_info(out, report)?;
        writeln!(out)?;
    }
    Ok(())
}

fn auto_configure<W: Write>(registry: &TopologyRegistry, out: &mut W) -> Result<()> {
    writeln!(out, "---> Setting all GigE cameras discovered to an IP configuration")?;
    writeln!(out, "---> that will allow it to work with camtopo...")?;
    writeln!(out)?;

    for report in auto_force_ip(registry)? {
        writeln!(out, "*** {} ***", report.label)?;
        match report.outcome {
            ForceIpOutcome::Executed => writeln!(out, "AutoForceIP executed")?,
            ForceIpOutcome::Unavailable => {
                writeln!(out, "Warning : Force IP node not available for this interface")?
            }
            ForceIpOutcome::Failed(reason) => writeln!(out, "Error: {}", reason)?,
        }
        writeln!(out)?;
    }

    writeln!(out, "---> Auto-configuration complete")?;
    writeln!(out)?;
    Ok(())
}

fn configure<W: Write>(
    registry: &TopologyRegistry,
    selector: DeviceSelector,
    config: IpConfiguration,
    out: &mut W,
) -> Result<()> {
    match configure_device(registry, selector, config) {
        Ok(()) => writeln!(out, "Configured camera with {}", selector)?,
        Err(TopologyError::NotSupported(what)) => {
            writeln!(out, "camtopo currently does not support {}!", what)?
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Run `command` against `registry`, writing the report to `out`
pub fn execute<W: Write>(registry: &TopologyRegistry, command: &Command, out: &mut W) -> Result<()> {
    match command {
        Command::List => list_all(registry, out),
        Command::AutoConfigure => auto_configure(registry, out),
        Command::BySerial(serial) => show_serial(registry, serial, out),
        Command::ByMac(mac) => show_mac(registry, *mac, out),
        Command::Configure { selector, config } => configure(registry, *selector, *config, out),
    }
}
