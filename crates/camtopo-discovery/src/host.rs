//! Host network adapters as GigE interfaces
//!
//! Lists the machine's network adapters and reports each one as a GEV
//! interface. Camera discovery on the wire is out of scope, so interfaces
//! never carry devices. A background thread polls the adapter list and
//! reports adapters that appear or disappear.

use camtopo_core::{names, NodeMap, StaticNodeMap};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::transport::{EventSink, TopologyEvent, Transport, TransportError, TransportInterface};

/// Which adapters are listed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterPolicy {
    /// Only adapters with an IPv4 address
    #[cfg_attr(target_os = "macos", default)]
    ActiveOnly,
    #[cfg_attr(not(target_os = "macos"), default)]
    All,
}

/// One host adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub mac: Option<String>,
}

impl Adapter {
    fn display_name(&self) -> String {
        match (self.ipv4, self.netmask) {
            (Some(ip), Some(mask)) => format!("{} ({}/{})", self.name, ip, u32::from(mask).count_ones()),
            (Some(ip), None) => format!("{} ({})", self.name, ip),
            _ => self.name.clone(),
        }
    }

    fn nodes(&self) -> StaticNodeMap {
        StaticNodeMap::new()
            .with_string(names::INTERFACE_ID, self.name.clone())
            .with_string(names::INTERFACE_TYPE, "GEV")
            .with_string(names::INTERFACE_DISPLAY_NAME, self.display_name())
    }
}

fn is_virtual(name: &str) -> bool {
    name.starts_with("lo")
        || name.starts_with("docker")
        || name.starts_with("br-")
        || name.starts_with("veth")
}

/// Merge per-address entries into one adapter per name, then apply the policy
pub fn select_adapters(raw: Vec<Adapter>, policy: AdapterPolicy) -> Vec<Adapter> {
    let mut merged: Vec<Adapter> = Vec::new();
    for adapter in raw {
        if is_virtual(&adapter.name) {
            continue;
        }
        match merged.iter_mut().find(|a| a.name == adapter.name) {
            Some(existing) => {
                if existing.ipv4.is_none() {
                    existing.ipv4 = adapter.ipv4;
                    existing.netmask = adapter.netmask;
                }
                if existing.mac.is_none() {
                    existing.mac = adapter.mac;
                }
            }
            None => merged.push(adapter),
        }
    }

    if policy == AdapterPolicy::ActiveOnly {
        merged.retain(|a| a.ipv4.is_some());
    }
    merged
}

fn list_adapters(policy: AdapterPolicy) -> Result<Vec<Adapter>, TransportError> {
    let raw = NetworkInterface::show()
        .map_err(|e| TransportError::Unavailable(format!("Failed to list network adapters: {}", e)))?;

    let adapters = raw
        .into_iter()
        .map(|iface| {
            let v4 = iface.addr.iter().find_map(|addr| match addr {
                Addr::V4(v4) => Some((v4.ip, v4.netmask)),
                _ => None,
            });
            Adapter {
                name: iface.name,
                ipv4: v4.map(|(ip, _)| ip),
                netmask: v4.and_then(|(_, mask)| mask),
                mac: iface.mac_addr,
            }
        })
        .collect();

    Ok(select_adapters(adapters, policy))
}

struct Poller {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

/// Transport over the host's network adapters
pub struct HostTransport {
    policy: AdapterPolicy,
    poll_interval: Duration,
    poller: Mutex<Option<Poller>>,
}

impl Default for HostTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HostTransport {
    pub fn new() -> Self {
        Self::with_policy(AdapterPolicy::default(), Duration::from_secs(2))
    }

    pub fn with_policy(policy: AdapterPolicy, poll_interval: Duration) -> Self {
        Self {
            policy,
            poll_interval,
            poller: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> AdapterPolicy {
        self.policy
    }
}

fn adapter_names(policy: AdapterPolicy) -> Result<BTreeSet<String>, TransportError> {
    Ok(list_adapters(policy)?.into_iter().map(|a| a.name).collect())
}

/// One poll: diff against `known` and adopt the new listing.
/// A failed listing changes nothing.
fn poll_tick(
    known: &mut BTreeSet<String>,
    listed: Result<BTreeSet<String>, TransportError>,
) -> Vec<TopologyEvent> {
    match listed {
        Ok(current) => {
            let changes = adapter_changes(known, &current);
            *known = current;
            changes
        }
        Err(e) => {
            warn!(error = %e, "Adapter listing failed, keeping the previous set");
            Vec::new()
        }
    }
}

/// Events that turn `before` into `after`
fn adapter_changes(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Vec<TopologyEvent> {
    let removed = before.difference(after).map(|name| TopologyEvent::InterfaceRemoval {
        interface_id: name.clone(),
    });
    let added = after.difference(before).map(|name| TopologyEvent::InterfaceArrival {
        interface_id: name.clone(),
    });
    removed.chain(added).collect()
}

impl Transport for HostTransport {
    fn name(&self) -> &str {
        "host"
    }

    fn system_nodes(&self) -> Arc<dyn NodeMap> {
        Arc::new(StaticNodeMap::new().with_bool(names::ENUMERATE_GEV_INTERFACES, true))
    }

    fn enumerate(&self) -> Result<Vec<TransportInterface>, TransportError> {
        let adapters = list_adapters(self.policy)?;
        debug!(count = adapters.len(), policy = ?self.policy, "Listed host adapters");
        Ok(adapters
            .iter()
            .map(|adapter| TransportInterface {
                nodes: Arc::new(adapter.nodes()),
                devices: Vec::new(),
            })
            .collect())
    }

    fn open_device(&self, serial: u64) -> Result<Arc<dyn NodeMap>, TransportError> {
        Err(TransportError::DeviceNotFound(serial))
    }

    fn start(&self, sink: EventSink) -> Result<(), TransportError> {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let policy = self.policy;
        let interval = self.poll_interval;
        let flag = stop.clone();
        let mut known = adapter_names(policy)?;

        let handle = thread::Builder::new()
            .name("camtopo-host-poll".to_string())
            .spawn(move || {
                let (lock, cvar) = &*flag;
                loop {
                    {
                        let mut stopped = lock.lock();
                        if !*stopped {
                            cvar.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }

                    for event in poll_tick(&mut known, adapter_names(policy)) {
                        info!(event = %event, "Host adapter change");
                        if !sink.emit(event) {
                            return;
                        }
                    }
                }
                debug!("Host adapter polling stopped");
            })
            .map_err(|e| TransportError::Unavailable(format!("Failed to start adapter polling: {}", e)))?;

        *poller = Some(Poller { stop, handle });
        Ok(())
    }

    fn stop(&self) {
        let Some(poller) = self.poller.lock().take() else {
            return;
        };
        let (lock, cvar) = &*poller.stop;
        *lock.lock() = true;
        cvar.notify_all();
        if poller.handle.thread().id() != thread::current().id() && poller.handle.join().is_err() {
            warn!("Host adapter polling thread panicked");
        }
    }
}

impl Drop for HostTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
