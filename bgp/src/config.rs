// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::BGP_PORT;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// How the transport connection for a session is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Dial the remote peer.
    Active,

    /// Listen for and accept a connection from the remote peer.
    Passive,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Role::Active),
            "passive" => Ok(Role::Passive),
            other => Err(Error::InvalidRole(other.to_owned())),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Role::Active => write!(f, "active"),
            Role::Passive => write!(f, "passive"),
        }
    }
}

/// The description of one peer relationship. Values of this type are only
/// produced by a successful parse, and are never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionParameters {
    local_as: u16,
    local_address: IpAddr,
    remote_as: u16,
    remote_address: IpAddr,
    role: Role,
}

impl SessionParameters {
    pub fn new(
        local_as: u16,
        local_address: IpAddr,
        remote_as: u16,
        remote_address: IpAddr,
        role: Role,
    ) -> Self {
        Self {
            local_as,
            local_address,
            remote_as,
            remote_address,
            role,
        }
    }

    pub fn local_as(&self) -> u16 {
        self.local_as
    }

    pub fn local_address(&self) -> IpAddr {
        self.local_address
    }

    pub fn remote_as(&self) -> u16 {
        self.remote_as
    }

    pub fn remote_address(&self) -> IpAddr {
        self.remote_address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn parse_asn(s: &str) -> Result<u16, Error> {
        s.parse().map_err(|_| Error::InvalidAsn(s.to_owned()))
    }

    fn parse_address(s: &str) -> Result<IpAddr, Error> {
        s.parse().map_err(|_| Error::InvalidAddress(s.to_owned()))
    }
}

/// Parse the five token form
/// `<local_as> <local_address> <remote_as> <remote_address> <active|passive>`.
impl FromStr for SessionParameters {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let [local_as, local_address, remote_as, remote_address, role] =
            tokens.as_slice()
        else {
            return Err(Error::ParameterCount(tokens.len()));
        };
        Ok(Self {
            local_as: Self::parse_asn(local_as)?,
            local_address: Self::parse_address(local_address)?,
            remote_as: Self::parse_asn(remote_as)?,
            remote_address: Self::parse_address(remote_address)?,
            role: role.parse()?,
        })
    }
}

impl Display for SessionParameters {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.local_as,
            self.local_address,
            self.remote_as,
            self.remote_address,
            self.role
        )
    }
}

pub const DEFAULT_HOLD_TIME: u16 = 90;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(100);

/// Session tunables that are not part of the peer description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    /// TCP port dialed or listened on.
    pub port: u16,

    /// Hold time proposed in our open message, in seconds.
    pub hold_time: u16,

    /// BGP identifier to send. Falls back to the local address when that is
    /// an IPv4 address.
    pub router_id: Option<Ipv4Addr>,

    /// Upper bound on a single outbound connection attempt.
    pub connect_timeout: Duration,

    /// How often blocking transport operations check for a stop request.
    pub resolution: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            port: BGP_PORT,
            hold_time: DEFAULT_HOLD_TIME,
            router_id: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            resolution: DEFAULT_RESOLUTION,
        }
    }
}

impl SessionSettings {
    pub fn bgp_identifier(&self, params: &SessionParameters) -> Ipv4Addr {
        match (self.router_id, params.local_address()) {
            (Some(id), _) => id,
            (None, IpAddr::V4(addr)) => addr,
            (None, IpAddr::V6(_)) => Ipv4Addr::UNSPECIFIED,
        }
    }

    pub fn local_sockaddr(&self, params: &SessionParameters) -> SocketAddr {
        SocketAddr::new(params.local_address(), self.port)
    }

    pub fn remote_sockaddr(&self, params: &SessionParameters) -> SocketAddr {
        SocketAddr::new(params.remote_address(), self.port)
    }
}
