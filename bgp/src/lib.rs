// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod config;
pub mod connection;
pub mod connection_tcp;
pub mod error;
pub mod log;
pub mod messages;
pub mod queue;
pub mod session;

#[cfg(test)]
#[macro_use]
extern crate lazy_static;

#[cfg(test)]
mod proptest;


pub const BGP_PORT: u16 = 179;
pub const COMPONENT_BGP: &str = "bgp";
pub const MOD_NEIGHBOR: &str = "neighbor";
