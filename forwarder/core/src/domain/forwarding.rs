// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Forwarding Declarations
//!
//! Declarative description of which guest ports a VM exposes on the host.
//!
//! A [`ForwardingConfig`] is the only durable state of the engine: chain
//! names are derived from `vm_name` on every invocation and never stored.
//! The whole [`ForwardingConfigs`] collection is the unit of serialization,
//! so every mutation is a read-modify-write of the collection.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Forwarding aggregate, port specs and collection invariants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::chain::{ChainNameError, VmChains};

/// Transport protocol of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ForwardingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(ForwardingError::InvalidPortSpec(format!(
                "unknown protocol '{}', expected tcp or udp",
                other
            ))),
        }
    }
}

/// A single host port forwarded to a single guest port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub vm_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn new(protocol: Protocol, host_port: u16, vm_port: u16) -> Self {
        Self {
            host_port,
            vm_port,
            protocol,
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}->{}", self.protocol, self.host_port, self.vm_port)
    }
}

/// Parses `PROTO:HOST_PORT:VM_PORT` (e.g. `tcp:1100:3000`).
/// The protocol may be omitted, in which case tcp is assumed.
impl FromStr for PortMapping {
    type Err = ForwardingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let (protocol, host, vm) = match parts.as_slice() {
            [proto, host, vm] => (proto.parse::<Protocol>()?, *host, *vm),
            [host, vm] => (Protocol::Tcp, *host, *vm),
            _ => {
                return Err(ForwardingError::InvalidPortSpec(format!(
                    "'{}' is not of the form proto:host_port:vm_port",
                    s
                )))
            }
        };

        Ok(Self::new(protocol, parse_port(host, s)?, parse_port(vm, s)?))
    }
}

/// A contiguous host port range forwarded to a contiguous guest port range.
///
/// Bounds default to zero when absent from the stored JSON; a range with any
/// zero bound is kept in the store but never compiled into rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    #[serde(default)]
    pub vm_start_port: u16,
    #[serde(default)]
    pub vm_end_port: u16,
    #[serde(default)]
    pub host_start_port: u16,
    #[serde(default)]
    pub host_end_port: u16,
    pub protocol: Protocol,
}

impl PortRange {
    pub fn new(protocol: Protocol, host: (u16, u16), vm: (u16, u16)) -> Self {
        Self {
            vm_start_port: vm.0,
            vm_end_port: vm.1,
            host_start_port: host.0,
            host_end_port: host.1,
            protocol,
        }
    }

    /// Reason this range cannot be turned into rules, if any.
    pub fn defect(&self) -> Option<&'static str> {
        if self.vm_start_port == 0
            || self.vm_end_port == 0
            || self.host_start_port == 0
            || self.host_end_port == 0
        {
            return Some("all four port bounds must be non-zero");
        }
        if self.vm_start_port > self.vm_end_port || self.host_start_port > self.host_end_port {
            return Some("range start exceeds range end");
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.defect().is_none()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}->{}-{}",
            self.protocol,
            self.host_start_port,
            self.host_end_port,
            self.vm_start_port,
            self.vm_end_port
        )
    }
}

/// Parses `PROTO:HOST_START-HOST_END:VM_START-VM_END` (e.g. `udp:30000-30100:30000-30100`).
impl FromStr for PortRange {
    type Err = ForwardingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        let (protocol, host, vm) = match parts.as_slice() {
            [proto, host, vm] => (proto.parse::<Protocol>()?, *host, *vm),
            [host, vm] => (Protocol::Tcp, *host, *vm),
            _ => {
                return Err(ForwardingError::InvalidPortSpec(format!(
                    "'{}' is not of the form proto:host_start-host_end:vm_start-vm_end",
                    s
                )))
            }
        };

        let bounds = |part: &str| -> Result<(u16, u16), ForwardingError> {
            let (start, end) = part.split_once('-').ok_or_else(|| {
                ForwardingError::InvalidPortSpec(format!("'{}' in '{}' is not a start-end range", part, s))
            })?;
            Ok((parse_port(start, s)?, parse_port(end, s)?))
        };

        Ok(Self::new(protocol, bounds(host)?, bounds(vm)?))
    }
}

fn parse_port(raw: &str, spec: &str) -> Result<u16, ForwardingError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ForwardingError::InvalidPortSpec(format!("invalid port '{}' in '{}'", raw, spec)))
}

/// Routing declaration for one VM: which ports it exposes and to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    /// libvirt domain name; unique key of the collection
    #[serde(alias = "domain")]
    pub vm_name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub port_map: Vec<PortMapping>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub port_range: Vec<PortRange>,

    /// Address of the host's bridge-facing interface
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<Ipv4Addr>,

    /// Guest address on the libvirt network
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<Ipv4Addr>,

    /// When set, only traffic sourced from this address is forwarded
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<Ipv4Addr>,

    /// Egress interface scoping the forward-accept rules
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ForwardingConfig {
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            port_map: Vec::new(),
            port_range: Vec::new(),
            host_ip: None,
            private_ip: None,
            external_ip: None,
            interface: None,
            last_updated: None,
        }
    }

    pub fn with_addresses(mut self, host_ip: Ipv4Addr, private_ip: Ipv4Addr) -> Self {
        self.host_ip = Some(host_ip);
        self.private_ip = Some(private_ip);
        self
    }

    pub fn with_external_ip(mut self, external_ip: Ipv4Addr) -> Self {
        self.external_ip = Some(external_ip);
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_port(mut self, mapping: PortMapping) -> Self {
        self.port_map.push(mapping);
        self
    }

    pub fn with_range(mut self, range: PortRange) -> Self {
        self.port_range.push(range);
        self
    }

    /// Derive this VM's chain identities.
    pub fn chains(&self) -> Result<VmChains, ChainNameError> {
        VmChains::for_vm(&self.vm_name)
    }

    /// Fold `update` into this declaration.
    ///
    /// Addresses and interface are replaced when present in `update`; port
    /// mappings and ranges are appended unless an identical entry exists.
    pub fn merge_from(&mut self, update: &ForwardingConfig) {
        if update.host_ip.is_some() {
            self.host_ip = update.host_ip;
        }
        if update.private_ip.is_some() {
            self.private_ip = update.private_ip;
        }
        if update.external_ip.is_some() {
            self.external_ip = update.external_ip;
        }
        if update.interface.is_some() {
            self.interface = update.interface.clone();
        }

        for mapping in &update.port_map {
            if !self.port_map.contains(mapping) {
                self.port_map.push(*mapping);
            }
        }
        for range in &update.port_range {
            if !self.port_range.contains(range) {
                self.port_range.push(*range);
            }
        }
    }
}

/// The full set of declarations, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingConfigs {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub configs: Vec<ForwardingConfig>,

    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ForwardingConfigs {
    pub fn find(&self, vm_name: &str) -> Option<&ForwardingConfig> {
        self.configs.iter().find(|c| c.vm_name == vm_name)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Insert or replace the declaration keyed by `config.vm_name`.
    ///
    /// Fails if the VM name cannot be turned into chain names, or if its
    /// chains would alias those of a different VM already in the collection.
    pub fn upsert(&mut self, mut config: ForwardingConfig, now: DateTime<Utc>) -> Result<(), ForwardingError> {
        self.ensure_unaliased(&config.vm_name)?;
        config.last_updated = Some(now);

        match self.configs.iter_mut().find(|c| c.vm_name == config.vm_name) {
            Some(existing) => *existing = config,
            None => self.configs.push(config),
        }
        self.last_updated = Some(now);
        Ok(())
    }

    /// Merge `update` into the stored declaration for the same VM, or insert
    /// it when none exists. Returns the resulting declaration.
    pub fn merge(&mut self, update: ForwardingConfig, now: DateTime<Utc>) -> Result<ForwardingConfig, ForwardingError> {
        self.ensure_unaliased(&update.vm_name)?;

        let merged = match self.configs.iter_mut().find(|c| c.vm_name == update.vm_name) {
            Some(existing) => {
                existing.merge_from(&update);
                existing.last_updated = Some(now);
                existing.clone()
            }
            None => {
                let mut inserted = update;
                inserted.last_updated = Some(now);
                self.configs.push(inserted.clone());
                inserted
            }
        };
        self.last_updated = Some(now);
        Ok(merged)
    }

    /// Remove the declaration for `vm_name`. Returns whether one existed.
    pub fn remove(&mut self, vm_name: &str, now: DateTime<Utc>) -> bool {
        let before = self.configs.len();
        self.configs.retain(|c| c.vm_name != vm_name);
        let removed = self.configs.len() != before;
        if removed {
            self.last_updated = Some(now);
        }
        removed
    }

    fn ensure_unaliased(&self, vm_name: &str) -> Result<(), ForwardingError> {
        let candidate = VmChains::for_vm(vm_name)?;

        for other in self.configs.iter().filter(|c| c.vm_name != vm_name) {
            let Ok(existing) = VmChains::for_vm(&other.vm_name) else {
                continue;
            };
            if let Some(shared) = candidate.shared_name(&existing) {
                return Err(ForwardingError::ChainCollision {
                    vm_name: vm_name.to_string(),
                    other: other.vm_name.clone(),
                    chain: shared.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Forwarding declaration errors
#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("Invalid port specification: {0}")]
    InvalidPortSpec(String),

    #[error(transparent)]
    ChainName(#[from] ChainNameError),

    #[error("Chain {chain} of VM '{vm_name}' would alias VM '{other}'")]
    ChainCollision {
        vm_name: String,
        other: String,
        chain: String,
    },
}

/// Treat `null`, a missing value and `""` alike. Older stores wrote empty
/// strings for unset addresses and timestamps.
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Older stores wrote unset lists as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
