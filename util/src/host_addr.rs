use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

use systemstat::{Platform, System};

use crate::Error;

/// Local IPv4 address and the interface that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceAddress {
    pub address: Ipv4Addr,
    pub interface_name: String,
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.interface_name)
    }
}

/// One enumeration of the host: address -> owning interface.
pub type Inventory = BTreeMap<Ipv4Addr, String>;

/// An interface as the OS reports it, with its IPv4 addresses in report order.
///
/// Interfaces with no IPv4 address at all are still listed, so that a known
/// but unaddressed interface can be told apart from an unknown one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub addrs: Vec<Ipv4Addr>,
}

impl Link {
    pub fn new(name: impl Into<String>, addrs: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        Link {
            name: name.into(),
            addrs: addrs.into_iter().collect(),
        }
    }
}

/// Walk the OS interface table once.
fn list_links() -> Result<Vec<Link>, Error> {
    let system = System::new();
    let networks = system.networks().map_err(Error::Enumerate)?;

    let links = networks
        .values()
        .map(|net| {
            let addrs = net.addrs.iter().filter_map(|n| match n.addr {
                systemstat::IpAddr::V4(v) => Some(v),
                _ => None,
            });
            Link::new(net.name.clone(), addrs)
        })
        .collect();

    Ok(links)
}

/// Enumerate every non-loopback IPv4 address on the host.
pub fn enumerate() -> Result<Inventory, Error> {
    inventory_from(&list_links()?)
}

/// Non-loopback IPv4 addresses owned by the interface called `name`.
///
/// A known interface with nothing usable gives an empty set, not an error.
pub fn enumerate_for_interface(name: &str) -> Result<BTreeSet<Ipv4Addr>, Error> {
    addresses_of(&list_links()?, name)
}

/// The source set for the dispatcher, optionally restricted to one interface.
///
/// Unlike [`enumerate_for_interface`], an empty result is a startup failure here.
pub fn sources_for(interface: Option<&str>) -> Result<Vec<InterfaceAddress>, Error> {
    sources_from(&list_links()?, interface)
}

pub(crate) fn inventory_from(links: &[Link]) -> Result<Inventory, Error> {
    let mut inventory = Inventory::new();

    for link in links {
        for addr in link.addrs.iter().filter(|a| !a.is_loopback()) {
            // Last writer wins when two interfaces report the same address.
            inventory.insert(*addr, link.name.clone());
        }
    }

    if inventory.is_empty() {
        return Err(Error::NoInterfacesFound);
    }

    Ok(inventory)
}

pub(crate) fn addresses_of(links: &[Link], name: &str) -> Result<BTreeSet<Ipv4Addr>, Error> {
    let mut found = false;
    let mut addrs = BTreeSet::new();

    for link in links.iter().filter(|l| l.name == name) {
        found = true;
        addrs.extend(link.addrs.iter().filter(|a| !a.is_loopback()));
    }

    if !found {
        return Err(Error::InterfaceNotFound {
            name: name.to_string(),
        });
    }

    Ok(addrs)
}

pub(crate) fn sources_from(
    links: &[Link],
    interface: Option<&str>,
) -> Result<Vec<InterfaceAddress>, Error> {
    let Some(name) = interface else {
        let inventory = inventory_from(links)?;
        return Ok(inventory
            .into_iter()
            .map(|(address, interface_name)| InterfaceAddress {
                address,
                interface_name,
            })
            .collect());
    };

    let addrs = addresses_of(links, name)?;
    if addrs.is_empty() {
        return Err(Error::NoAddressesForInterface {
            name: name.to_string(),
        });
    }

    Ok(addrs
        .into_iter()
        .map(|address| InterfaceAddress {
            address,
            interface_name: name.to_string(),
        })
        .collect())
}
