// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bridge netfilter switch.
//!
//! With `br_netfilter` loaded, bridged guest traffic also traverses the
//! host's iptables chains, which breaks guest-to-guest traffic on the libvirt
//! bridge once the forward chains are in place.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const BRIDGE_NF_CALL_IPTABLES: &str = "/proc/sys/net/bridge/bridge-nf-call-iptables";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeFilterState {
    /// The switch was set to `0`
    Disabled,
    /// The switch was already `0`
    AlreadyDisabled,
    /// `br_netfilter` is not loaded
    Absent,
}

/// Write `0` to the bridge netfilter switch at `path`.
pub fn disable_bridge_filtering(path: &Path) -> std::io::Result<BridgeFilterState> {
    let current = match fs::read_to_string(path) {
        Ok(current) => current,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Bridge netfilter switch absent");
            return Ok(BridgeFilterState::Absent);
        }
        Err(e) => return Err(e),
    };

    if current.trim() == "0" {
        return Ok(BridgeFilterState::AlreadyDisabled);
    }

    fs::write(path, "0\n")?;
    tracing::info!(path = %path.display(), "Disabled bridge netfilter");
    Ok(BridgeFilterState::Disabled)
}
