//! Gateway identity: the hardware address reported as `gw_mac`.
//!
//! Interfaces are read from sysfs and considered in interface index order.
//! The first one that is up and has a non-zero hardware address wins.

use crate::mac_address::MacAddress;
use std::fs;
use std::path::Path;

/// Where the kernel lists network interfaces.
pub const SYSFS_NET: &str = "/sys/class/net";

/// `IFF_UP` from `<net/if.h>`.
const IFF_UP: u32 = 0x1;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Interface {
    name: String,
    index: u32,
    flags: u32,
    address: Option<MacAddress>,
}

impl Interface {
    fn read(dir: &Path) -> Option<Self> {
        let name = dir.file_name()?.to_string_lossy().into_owned();
        let index = read_attribute(dir, "ifindex")?.parse().ok()?;
        let flags = read_attribute(dir, "flags")?;
        let flags = u32::from_str_radix(flags.trim_start_matches("0x"), 16).ok()?;
        // Only 6-byte Ethernet addresses are accepted. Any other non-empty
        // hardware address (20-byte InfiniBand, for instance) is skipped
        // instead of being reported as the gateway address.
        let address = read_attribute(dir, "address")
            .and_then(|value| value.parse::<MacAddress>().ok())
            .filter(|mac| !mac.is_zero());

        Some(Self {
            name,
            index,
            flags,
            address,
        })
    }

    fn is_up(&self) -> bool {
        self.flags & IFF_UP != 0
    }
}

fn read_attribute(dir: &Path, attribute: &str) -> Option<String> {
    fs::read_to_string(dir.join(attribute))
        .ok()
        .map(|value| value.trim().to_string())
}

/// Find the gateway address among the interfaces listed under `root`.
pub fn discover_gateway_mac(root: &Path) -> Option<MacAddress> {
    let mut interfaces: Vec<Interface> = fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .filter_map(|entry| Interface::read(&entry.path()))
        .collect();
    interfaces.sort_by_key(|interface| interface.index);

    let chosen = interfaces
        .into_iter()
        .find(|interface| interface.is_up() && interface.address.is_some())?;
    tracing::debug!(interface = %chosen.name, "gateway interface selected");
    chosen.address
}

/// Resolve the gateway address from the host, falling back to
/// `00:00:00:00:00:00` when no interface qualifies.
pub fn resolve_gateway_mac() -> String {
    match discover_gateway_mac(Path::new(SYSFS_NET)) {
        Some(mac) => mac.to_string(),
        None => {
            tracing::warn!("no network interface with a hardware address is up");
            MacAddress::ZERO.to_string()
        }
    }
}
