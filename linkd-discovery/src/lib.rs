//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Link discovery for P4Runtime/gNMI programmable devices.
//!
//! The [`controller::Controller`] drives a lifecycle state machine that
//! connects to a device, binds to its installed pipeline, wins mastership
//! for the link-agent role, installs an LLDP intercept rule and then
//! periodically emits and intercepts LLDP frames to maintain a
//! freshness-based table of ingress adjacencies. Discovered links are
//! mirrored into a configuration tree served over northbound gNMI.

pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod links;
pub mod ports;
pub mod tasks;

pub use controller::{Controller, Link, Port, PortStatus, State};
