//! Network definitions applied to links, and the devices links are built from.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

/// Address assigned to an interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Local address.
    pub local: IpAddr,
    /// Prefix length of the attached subnet.
    pub prefix_len: u8,
}

impl Address {
    /// Creates an address with the given prefix length.
    #[must_use]
    pub const fn new(local: IpAddr, prefix_len: u8) -> Self {
        Self { local, prefix_len }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.local, self.prefix_len)
    }
}

/// Route installed through an interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    /// Destination prefix; `None` is the default route.
    pub destination: Option<(IpAddr, u8)>,
    /// Next hop.
    pub gateway: IpAddr,
}

impl Route {
    /// Default route through `gateway`.
    #[must_use]
    pub const fn default_via(gateway: IpAddr) -> Self {
        Self {
            destination: None,
            gateway,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.destination {
            Some((prefix, len)) => write!(formatter, "{prefix}/{len} via {}", self.gateway),
            None => write!(formatter, "default via {}", self.gateway),
        }
    }
}

/// Configuration applied to every link it matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Network {
    /// Name of the definition, for diagnostics.
    pub name: String,
    /// Bridge master the link joins, by interface name.
    pub bridge: Option<String>,
    /// Addresses assigned in order.
    pub addresses: Vec<Address>,
    /// Routes installed in order once every address is set.
    pub routes: Vec<Route>,
}

impl Network {
    /// Creates an empty definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a bridge master to join.
    #[must_use]
    pub fn with_bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = Some(bridge.into());
        self
    }

    /// Appends an address.
    #[must_use]
    pub fn with_address(mut self, address: Address) -> Self {
        self.addresses.push(address);
        self
    }

    /// Appends a route.
    #[must_use]
    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }
}

/// Hardware address of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Wraps raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Raw octets.
    #[must_use]
    pub const fn octets(self) -> [u8; 6] {
        self.0
    }
}

/// Error returned when a MAC address string cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid hardware address: {0}")]
pub struct MacAddrParseError(String);

impl FromStr for MacAddr {
    type Err = MacAddrParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = value.split(':');
        for octet in &mut octets {
            let part = parts
                .next()
                .filter(|part| part.len() == 2)
                .ok_or_else(|| MacAddrParseError(value.to_owned()))?;
            *octet =
                u8::from_str_radix(part, 16).map_err(|_| MacAddrParseError(value.to_owned()))?;
        }
        if parts.next().is_some() {
            return Err(MacAddrParseError(value.to_owned()));
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, f] = self.octets();
        write!(formatter, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{f:02x}")
    }
}

/// Device-appeared notification for a network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Kernel interface index; zero is never valid.
    pub ifindex: u32,
    /// Interface name.
    pub ifname: String,
    /// Textual hardware address, as reported by the device database.
    pub address: Option<String>,
    /// Device type, e.g. `bridge`.
    pub devtype: Option<String>,
}

impl Device {
    /// Creates a plain device with no address or type.
    #[must_use]
    pub fn new(ifindex: u32, ifname: impl Into<String>) -> Self {
        Self {
            ifindex,
            ifname: ifname.into(),
            address: None,
            devtype: None,
        }
    }

    /// Returns `true` when the device is a bridge master.
    #[must_use]
    pub fn is_bridge(&self) -> bool {
        self.devtype.as_deref() == Some("bridge")
    }
}

/// Looks up the network definition that applies to a device.
pub trait NetworkMatcher {
    /// Returns the matching definition, if any.
    fn network_for(&self, device: &Device) -> Option<Network>;
}

impl<F> NetworkMatcher for F
where
    F: Fn(&Device) -> Option<Network>,
{
    fn network_for(&self, device: &Device) -> Option<Network> {
        self(device)
    }
}
