//! Turns sweep results into final device records.
use log::debug;

use crate::address::Subnet;
use crate::mac::resolve_macs;
use crate::model::{Device, MacTable};
use crate::sweep::Sweeper;

/// Fills in each device's MAC from `macs`. Devices whose address is not in
/// the table keep an empty MAC. Order is preserved.
///
/// ```rust
/// # use netscanner::aggregate::merge;
/// # use netscanner::model::{Device, MacTable};
/// # use std::net::Ipv4Addr;
/// let ip = Ipv4Addr::new(10, 0, 0, 5);
/// let macs = MacTable::from([(ip, "AA:BB:CC:DD:EE:FF".to_owned())]);
/// let devices = merge(vec![Device::discovered(ip, String::new(), "Windows")], &macs);
/// assert_eq!(devices[0].mac, "AA:BB:CC:DD:EE:FF");
/// ```
pub fn merge(devices: Vec<Device>, macs: &MacTable) -> Vec<Device> {
    devices
        .into_iter()
        .map(|mut device| {
            if let Some(mac) = macs.get(&device.ip) {
                mac.clone_into(&mut device.mac);
            }
            device
        })
        .collect()
}

/// Sweeps `subnets`, then reads the ARP cache and merges it in.
///
/// The cache is read after the sweep because the echo probes are what
/// populate it for hosts on the local link.
pub async fn discover(sweeper: &Sweeper, subnets: &[Subnet]) -> Vec<Device> {
    let devices = sweeper.sweep_all(subnets).await;
    debug!("{} devices answered, resolving MAC addresses", devices.len());
    let macs = resolve_macs().await;
    merge(devices, &macs)
}

#[cfg(test)]
mod tests {
    use super::merge;
    use crate::model::{Device, MacTable};
    use std::net::Ipv4Addr;

    fn devices() -> Vec<Device> {
        vec![
            Device::discovered(Ipv4Addr::new(192, 168, 1, 10), "host10".to_owned(), "Linux/macOS"),
            Device::discovered(Ipv4Addr::new(192, 168, 1, 20), String::new(), "Windows"),
        ]
    }

    fn macs() -> MacTable {
        MacTable::from([
            (Ipv4Addr::new(192, 168, 1, 10), "00:11:22:33:44:55".to_owned()),
            (Ipv4Addr::new(192, 168, 1, 99), "66:77:88:99:AA:BB".to_owned()),
        ])
    }

    #[test]
    fn known_addresses_get_their_mac() {
        let merged = merge(devices(), &macs());

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].mac, "00:11:22:33:44:55");
        assert_eq!(merged[0].hostname, "host10");
        assert!(merged[1].mac.is_empty());
    }

    #[test]
    fn stale_mac_is_overwritten() {
        let mut stale = devices();
        stale[0].mac = "DE:AD:BE:EF:00:00".to_owned();

        let merged = merge(stale, &macs());
        assert_eq!(merged[0].mac, "00:11:22:33:44:55");
    }

    #[test]
    fn merge_is_idempotent() {
        let once = merge(devices(), &macs());
        let twice = merge(once.clone(), &macs());
        assert_eq!(once, twice);
        assert_eq!(merge(devices(), &macs()), once);
    }

    #[test]
    fn empty_table_changes_nothing() {
        assert_eq!(merge(devices(), &MacTable::new()), devices());
    }
}
