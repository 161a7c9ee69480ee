//! `system_network_info`: interfaces that are up, with IPv4 and MAC address.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sysinfo::Networks;
use tracing::debug;

use crate::collector::traits::FileSystem;
use crate::probe::{Cadence, Platform, Probe, ProbeError};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

const SYS_CLASS_NET: &str = "/sys/class/net";
const IFF_UP: u32 = 0x1;
const UNKNOWN: &str = "unknown";

fn network_desc() -> FamilyDesc {
    FamilyDesc::new(
        "system_network_info",
        "Information about network interfaces",
        &["interface", "ip_address", "mac_address"],
    )
}

/// Addresses of one interface as reported by the OS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddrs {
    pub mac: Option<String>,
    pub ipv4: Option<Ipv4Addr>,
}

/// Source of per-interface addresses.
pub trait AddressSource: Send + Sync + 'static {
    fn addresses(&self) -> HashMap<String, InterfaceAddrs>;
}

/// Interface addresses via `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoAddresses;

impl AddressSource for SysinfoAddresses {
    fn addresses(&self) -> HashMap<String, InterfaceAddrs> {
        let networks = Networks::new_with_refreshed_list();
        networks
            .iter()
            .map(|(name, data)| {
                let ipv4 = data.ip_networks().iter().find_map(|net| match net.addr {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                });
                let mac = data.mac_address();
                let mac = (!mac.is_unspecified()).then(|| mac.to_string());
                (name.clone(), InterfaceAddrs { mac, ipv4 })
            })
            .collect()
    }
}

/// Normalizes a MAC string; the all-zero address counts as absent.
fn normalize_mac(raw: &str) -> Option<String> {
    let mac = raw.trim().to_ascii_lowercase();
    if mac.is_empty() || mac.chars().all(|c| c == '0' || c == ':') {
        None
    } else {
        Some(mac)
    }
}

/// Parses a `/sys/class/net/<if>/flags` value such as `0x1003`.
fn parse_flags(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(hex, 16).ok()
}

fn tuple(name: &str, addrs: &InterfaceAddrs) -> LabelTuple {
    let ip = addrs
        .ipv4
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let mac = addrs.mac.as_deref().unwrap_or(UNKNOWN);
    LabelTuple::new([name, ip.as_str(), mac])
}

/// Picks the sysfs reader on Linux and `sysinfo` elsewhere.
pub fn for_platform<F>(platform: &Platform, fs: F) -> Arc<dyn Probe>
where
    F: FileSystem + 'static,
{
    if platform.is_linux() {
        Arc::new(SysfsNetworkProbe::new(fs, SysinfoAddresses))
    } else {
        Arc::new(AddressNetworkProbe::new(SysinfoAddresses))
    }
}

/// Reads link state and MAC from `/sys/class/net`; IPv4 addresses come
/// from an [`AddressSource`].
pub struct SysfsNetworkProbe<F, A> {
    fs: F,
    root: PathBuf,
    addresses: A,
}

impl<F: FileSystem, A: AddressSource> SysfsNetworkProbe<F, A> {
    pub fn new(fs: F, addresses: A) -> Self {
        Self {
            fs,
            root: PathBuf::from(SYS_CLASS_NET),
            addresses,
        }
    }

    fn is_up(&self, dir: &Path) -> bool {
        self.fs
            .read_to_string(&dir.join("flags"))
            .ok()
            .and_then(|raw| parse_flags(&raw))
            .is_some_and(|flags| flags & IFF_UP != 0)
    }
}

impl<F: FileSystem + 'static, A: AddressSource> Probe for SysfsNetworkProbe<F, A> {
    fn desc(&self) -> FamilyDesc {
        network_desc()
    }

    fn cadence(&self) -> Cadence {
        Cadence::Fast
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        let entries = self
            .fs
            .read_dir(&self.root)
            .map_err(|e| ProbeError::io(&self.root, e))?;
        let known = self.addresses.addresses();

        for dir in entries {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !self.is_up(&dir) {
                debug!(interface = name, "interface down, skipping");
                continue;
            }
            let mac = self
                .fs
                .read_to_string(&dir.join("address"))
                .ok()
                .and_then(|raw| normalize_mac(&raw));
            let ipv4 = known.get(name).and_then(|a| a.ipv4);
            snapshot.insert(tuple(name, &InterfaceAddrs { mac, ipv4 }));
        }
        Ok(())
    }
}

/// Reports every interface an [`AddressSource`] knows about.
///
/// Without link flags, an interface counts as up when it has at least one
/// address assigned.
pub struct AddressNetworkProbe<A> {
    addresses: A,
}

impl<A: AddressSource> AddressNetworkProbe<A> {
    pub fn new(addresses: A) -> Self {
        Self { addresses }
    }
}

impl<A: AddressSource> Probe for AddressNetworkProbe<A> {
    fn desc(&self) -> FamilyDesc {
        network_desc()
    }

    fn cadence(&self) -> Cadence {
        Cadence::Fast
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        for (name, addrs) in self.addresses.addresses() {
            if addrs.ipv4.is_none() && addrs.mac.is_none() {
                continue;
            }
            snapshot.insert(tuple(&name, &addrs));
        }
        Ok(())
    }
}
