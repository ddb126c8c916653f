// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Chain Identity
//!
//! Every forwarded VM owns three custom chains: an ingress NAT chain
//! (`DNAT-<vm>`), an egress NAT chain (`SNAT-<vm>`) and a forward-accept
//! chain (`FWD-<vm>`). Names are recomputed from the VM name on every
//! invocation.
//!
//! The kernel caps chain identifiers at 28 bytes. Longer names keep their
//! prefix, truncate the VM name and append the first 8 hex digits of the
//! SHA-256 of the full VM name, so two long names sharing a prefix still map
//! to distinct chains.

use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::domain::command::Table;

/// Longest chain identifier the packet filter accepts
pub const MAX_CHAIN_NAME_LEN: usize = 28;

const DIGEST_SUFFIX_LEN: usize = 8;

/// Characters the packet filter refuses in chain names, besides whitespace.
const FORBIDDEN_CHARS: &[char] = &['!', '\'', '"', '\\', '/', ':'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainNameError {
    #[error("VM name is empty")]
    Empty,

    #[error("VM name '{vm_name}' contains character {ch:?} not allowed in chain names")]
    InvalidCharacter { vm_name: String, ch: char },
}

/// Role of a per-VM chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainRole {
    /// Destination NAT for traffic addressed to the host
    IngressNat,
    /// Source NAT and masquerade for traffic leaving the guest
    EgressNat,
    /// Forward-accept rules for the guest's private address
    Forward,
}

impl ChainRole {
    /// Creation order. Teardown destroys in the same order.
    pub const ALL: [ChainRole; 3] = [ChainRole::IngressNat, ChainRole::EgressNat, ChainRole::Forward];

    pub fn prefix(&self) -> &'static str {
        match self {
            ChainRole::IngressNat => "DNAT",
            ChainRole::EgressNat => "SNAT",
            ChainRole::Forward => "FWD",
        }
    }

    pub fn table(&self) -> Table {
        match self {
            ChainRole::IngressNat | ChainRole::EgressNat => Table::Nat,
            ChainRole::Forward => Table::Filter,
        }
    }
}

/// Derive the chain name for `vm_name` in `role`.
pub fn chain_name(vm_name: &str, role: ChainRole) -> Result<String, ChainNameError> {
    validate_vm_name(vm_name)?;

    let prefix = role.prefix();
    let natural = format!("{}-{}", prefix, vm_name);
    if natural.len() <= MAX_CHAIN_NAME_LEN {
        return Ok(natural);
    }

    let digest = hex::encode(Sha256::digest(vm_name.as_bytes()));
    let budget = MAX_CHAIN_NAME_LEN - prefix.len() - 2 - DIGEST_SUFFIX_LEN;
    let truncated = truncate_at_char_boundary(vm_name, budget);

    Ok(format!("{}-{}-{}", prefix, truncated, &digest[..DIGEST_SUFFIX_LEN]))
}

fn validate_vm_name(vm_name: &str) -> Result<(), ChainNameError> {
    if vm_name.is_empty() {
        return Err(ChainNameError::Empty);
    }
    if let Some(ch) = vm_name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return Err(ChainNameError::InvalidCharacter {
            vm_name: vm_name.to_string(),
            ch,
        });
    }
    Ok(())
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// One named chain owned by a VM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmChain {
    role: ChainRole,
    name: String,
}

impl VmChain {
    pub fn new(vm_name: &str, role: ChainRole) -> Result<Self, ChainNameError> {
        Ok(Self {
            role,
            name: chain_name(vm_name, role)?,
        })
    }

    pub fn role(&self) -> ChainRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> Table {
        self.role.table()
    }
}

impl fmt::Display for VmChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The three chains of one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmChains {
    pub ingress: VmChain,
    pub egress: VmChain,
    pub forward: VmChain,
}

impl VmChains {
    pub fn for_vm(vm_name: &str) -> Result<Self, ChainNameError> {
        Ok(Self {
            ingress: VmChain::new(vm_name, ChainRole::IngressNat)?,
            egress: VmChain::new(vm_name, ChainRole::EgressNat)?,
            forward: VmChain::new(vm_name, ChainRole::Forward)?,
        })
    }

    /// Chains in creation order.
    pub fn in_order(&self) -> [&VmChain; 3] {
        [&self.ingress, &self.egress, &self.forward]
    }

    /// First chain name these chains share with `other`, if any.
    pub fn shared_name<'a>(&'a self, other: &VmChains) -> Option<&'a str> {
        self.in_order()
            .into_iter()
            .find(|mine| other.in_order().iter().any(|theirs| theirs.name() == mine.name()))
            .map(VmChain::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_is_verbatim() {
        assert_eq!(chain_name("spark", ChainRole::IngressNat).unwrap(), "DNAT-spark");
        assert_eq!(chain_name("spark", ChainRole::EgressNat).unwrap(), "SNAT-spark");
        assert_eq!(chain_name("spark", ChainRole::Forward).unwrap(), "FWD-spark");
    }

    #[test]
    fn test_name_at_limit_is_verbatim() {
        let vm = "a".repeat(MAX_CHAIN_NAME_LEN - "DNAT-".len());
        let name = chain_name(&vm, ChainRole::IngressNat).unwrap();
        assert_eq!(name.len(), MAX_CHAIN_NAME_LEN);
        assert_eq!(name, format!("DNAT-{}", vm));
    }

    #[test]
    fn test_long_names_fit_and_keep_prefix() {
        let names = [
            "kafka-broker-production-eu-west-1".to_string(),
            "x".repeat(200),
            "hadoop-datanode-with-a-very-long-domain-name".to_string(),
            "ünïcödé-vm-näme-that-goes-on-and-on".to_string(),
        ];

        for vm in names.iter() {
            for role in ChainRole::ALL {
                let name = chain_name(vm, role).unwrap();
                assert!(name.len() <= MAX_CHAIN_NAME_LEN, "{} is too long", name);
                assert!(name.starts_with(&format!("{}-", role.prefix())));
            }
        }
    }

    #[test]
    fn test_truncation_is_deterministic() {
        let vm = "kafka-broker-production-eu-west-1";
        assert_eq!(
            chain_name(vm, ChainRole::Forward).unwrap(),
            chain_name(vm, ChainRole::Forward).unwrap()
        );
    }

    #[test]
    fn test_shared_prefix_names_do_not_collide() {
        let a = VmChains::for_vm("kafka-broker-production-eu-west-1").unwrap();
        let b = VmChains::for_vm("kafka-broker-production-eu-west-2").unwrap();
        assert_ne!(a.ingress.name(), b.ingress.name());
        assert_eq!(a.shared_name(&b), None);
    }

    #[test]
    fn test_rejects_unusable_names() {
        assert_eq!(chain_name("", ChainRole::IngressNat), Err(ChainNameError::Empty));
        assert!(matches!(
            chain_name("my vm", ChainRole::IngressNat),
            Err(ChainNameError::InvalidCharacter { ch: ' ', .. })
        ));
        assert!(chain_name("vm:1", ChainRole::Forward).is_err());
    }

    #[test]
    fn test_roles_map_to_tables() {
        let chains = VmChains::for_vm("spark").unwrap();
        let tables: Vec<Table> = chains.in_order().iter().map(|c| c.table()).collect();
        assert_eq!(tables, vec![Table::Nat, Table::Nat, Table::Filter]);
    }
}
