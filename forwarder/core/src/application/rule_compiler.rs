// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rule Compiler
//!
//! Pure translation of a forwarding declaration into packet-filter commands.
//! Nothing here reads the store or touches the kernel.
//!
//! A start batch is always `create`, then `populate`, then `link`: a
//! built-in chain must never jump into a custom chain that does not exist
//! yet or is still half-filled. A stop batch is the exact inverse: `unlink`
//! first, then flush and delete each chain.
//!
//! Per port mapping the populate phase emits four rules:
//!
//! | Chain  | Rule |
//! |--------|------|
//! | `DNAT` | host address + host port → private address + VM port |
//! | `SNAT` | VM port sourced from the guest → source rewritten to host address |
//! | `SNAT` | guest-to-guest hairpin on the VM port → `MASQUERADE` |
//! | `FWD`  | accept forwarded traffic for the guest's VM port |

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::domain::chain::{ChainNameError, VmChain, VmChains};
use crate::domain::command::{ChainOp, CommandBatch, FilterCommand, Stage, Table};
use crate::domain::forwarding::{ForwardingConfig, PortMapping, PortRange, Protocol};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("VM '{vm_name}' has no {field} configured")]
    MissingAddress { vm_name: String, field: &'static str },

    #[error(transparent)]
    ChainName(#[from] ChainNameError),
}

/// Everything the start compiler needs, borrowed from a declaration.
#[derive(Debug, Clone, Copy)]
pub struct StartRequest<'a> {
    pub chains: &'a VmChains,
    pub host_ip: Ipv4Addr,
    pub private_ip: Ipv4Addr,
    pub external_ip: Option<Ipv4Addr>,
    pub interface: Option<&'a str>,
    pub port_maps: &'a [PortMapping],
    pub port_ranges: &'a [PortRange],
}

/// Port selector of one populate block, already rendered.
struct PortSpec {
    protocol: Protocol,
    /// `--dport` on the DNAT match
    host_dport: String,
    /// `--to` target of the DNAT rule, without the address
    dnat_ports: String,
    /// `--dport` on the SNAT, MASQUERADE and ACCEPT rules
    vm_dport: String,
}

impl From<&PortMapping> for PortSpec {
    fn from(mapping: &PortMapping) -> Self {
        Self {
            protocol: mapping.protocol,
            host_dport: mapping.host_port.to_string(),
            dnat_ports: mapping.vm_port.to_string(),
            vm_dport: mapping.vm_port.to_string(),
        }
    }
}

impl From<&PortRange> for PortSpec {
    fn from(range: &PortRange) -> Self {
        Self {
            protocol: range.protocol,
            host_dport: format!("{}:{}", range.host_start_port, range.host_end_port),
            dnat_ports: format!("{}-{}", range.vm_start_port, range.vm_end_port),
            vm_dport: format!("{}:{}", range.vm_start_port, range.vm_end_port),
        }
    }
}

fn chain_command(chain: &VmChain, op: ChainOp, stage: Stage) -> FilterCommand {
    FilterCommand::new(chain.table(), op, chain.name(), stage)
}

/// `-N` for each chain, in creation order.
pub fn create_chains(chains: &VmChains) -> CommandBatch {
    let mut batch = CommandBatch::new();
    for chain in chains.in_order() {
        batch.push(chain_command(chain, ChainOp::NewChain, Stage::Create));
    }
    batch
}

/// `-F` then `-X` for each chain, in creation order.
pub fn destroy_chains(chains: &VmChains) -> CommandBatch {
    let mut batch = CommandBatch::new();
    for chain in chains.in_order() {
        batch.push(chain_command(chain, ChainOp::Flush, Stage::Destroy));
        batch.push(chain_command(chain, ChainOp::DeleteChain, Stage::Destroy));
    }
    batch
}

/// The jumps from built-in chains into the VM's chains.
///
/// `op` is [`ChainOp::Insert`] when linking and [`ChainOp::Delete`] when
/// unlinking; the match criteria are identical so `-D` removes exactly what
/// `-I` added.
pub fn link_chains(chains: &VmChains, host_ip: Ipv4Addr, private_ip: Ipv4Addr, op: ChainOp) -> CommandBatch {
    let stage = if op == ChainOp::Delete { Stage::Unlink } else { Stage::Link };
    let host = host_ip.to_string();
    let private = private_ip.to_string();

    let mut batch = CommandBatch::new();
    for builtin in ["OUTPUT", "PREROUTING"] {
        batch.push(
            FilterCommand::new(Table::Nat, op, builtin, stage)
                .args(["-d", host.as_str(), "-j", chains.ingress.name()]),
        );
    }
    batch.push(
        FilterCommand::new(Table::Nat, op, "POSTROUTING", stage)
            .args(["-s", private.as_str(), "-d", private.as_str(), "-j", chains.egress.name()]),
    );
    batch.push(
        FilterCommand::new(chains.forward.table(), op, "FORWARD", stage)
            .args(["-d", private.as_str(), "-j", chains.forward.name()]),
    );
    batch
}

fn populate_block(request: &StartRequest<'_>, spec: &PortSpec, block: usize) -> CommandBatch {
    let stage = Stage::Populate { block };
    let chains = request.chains;
    let proto = spec.protocol.as_str();
    let host = request.host_ip.to_string();
    let private = request.private_ip.to_string();

    let mut dnat = chain_command(&chains.ingress, ChainOp::Append, stage)
        .args(["-p", proto, "-d", host.as_str(), "--dport", spec.host_dport.as_str()]);
    if let Some(external) = request.external_ip {
        dnat = dnat.arg("-s").arg(external.to_string());
    }
    let dnat = dnat.args(["-j", "DNAT", "--to"]).arg(format!("{}:{}", private, spec.dnat_ports));

    let snat = chain_command(&chains.egress, ChainOp::Append, stage).args([
        "-p",
        proto,
        "-s",
        private.as_str(),
        "--dport",
        spec.vm_dport.as_str(),
        "-j",
        "SNAT",
        "--to-source",
        host.as_str(),
    ]);

    let masquerade = chain_command(&chains.egress, ChainOp::Append, stage).args([
        "-p",
        proto,
        "-s",
        private.as_str(),
        "-d",
        private.as_str(),
        "--dport",
        spec.vm_dport.as_str(),
        "-j",
        "MASQUERADE",
    ]);

    let mut accept = chain_command(&chains.forward, ChainOp::Append, stage)
        .args(["-p", proto, "-d", private.as_str(), "--dport", spec.vm_dport.as_str()]);
    if let Some(interface) = request.interface {
        accept = accept.args(["-o", interface]);
    }
    let accept = accept.args(["-j", "ACCEPT"]);

    let mut batch = CommandBatch::new();
    batch.push(dnat);
    batch.push(snat);
    batch.push(masquerade);
    batch.push(accept);
    batch
}

/// Rules for every port mapping, then every usable port range.
///
/// Ranges with a zero bound or an inverted interval are logged and skipped;
/// they never abort the remaining blocks.
pub fn populate_chains(request: &StartRequest<'_>) -> CommandBatch {
    let mut batch = CommandBatch::new();
    let mut block = 0;

    for mapping in request.port_maps {
        batch.append(populate_block(request, &PortSpec::from(mapping), block));
        block += 1;
    }

    for range in request.port_ranges {
        if let Some(defect) = range.defect() {
            tracing::warn!(
                chain = %request.chains.ingress,
                range = %range,
                reason = defect,
                "Skipping unusable port range"
            );
            continue;
        }
        batch.append(populate_block(request, &PortSpec::from(range), block));
        block += 1;
    }

    batch
}

pub fn compile_start(request: &StartRequest<'_>) -> CommandBatch {
    let mut batch = create_chains(request.chains);
    batch.append(populate_chains(request));
    batch.append(link_chains(
        request.chains,
        request.host_ip,
        request.private_ip,
        ChainOp::Insert,
    ));
    batch
}

pub fn compile_stop(chains: &VmChains, host_ip: Ipv4Addr, private_ip: Ipv4Addr) -> CommandBatch {
    let mut batch = link_chains(chains, host_ip, private_ip, ChainOp::Delete);
    batch.append(destroy_chains(chains));
    batch
}

/// Stop followed by start, so a reconnect converges whatever state the
/// kernel was left in.
pub fn compile_reconnect(request: &StartRequest<'_>) -> CommandBatch {
    let mut batch = compile_stop(request.chains, request.host_ip, request.private_ip);
    batch.append(compile_start(request));
    batch
}

fn required_addresses(config: &ForwardingConfig) -> Result<(Ipv4Addr, Ipv4Addr), CompileError> {
    let host_ip = config.host_ip.ok_or_else(|| CompileError::MissingAddress {
        vm_name: config.vm_name.clone(),
        field: "host_ip",
    })?;
    let private_ip = config.private_ip.ok_or_else(|| CompileError::MissingAddress {
        vm_name: config.vm_name.clone(),
        field: "private_ip",
    })?;
    Ok((host_ip, private_ip))
}

fn with_request<F>(config: &ForwardingConfig, f: F) -> Result<CommandBatch, CompileError>
where
    F: FnOnce(&StartRequest<'_>) -> CommandBatch,
{
    let chains = config.chains()?;
    let (host_ip, private_ip) = required_addresses(config)?;
    let request = StartRequest {
        chains: &chains,
        host_ip,
        private_ip,
        external_ip: config.external_ip,
        interface: config.interface.as_deref(),
        port_maps: &config.port_map,
        port_ranges: &config.port_range,
    };
    Ok(f(&request))
}

pub fn compile_start_for(config: &ForwardingConfig) -> Result<CommandBatch, CompileError> {
    with_request(config, compile_start)
}

pub fn compile_stop_for(config: &ForwardingConfig) -> Result<CommandBatch, CompileError> {
    let chains = config.chains()?;
    let (host_ip, private_ip) = required_addresses(config)?;
    Ok(compile_stop(&chains, host_ip, private_ip))
}

pub fn compile_reconnect_for(config: &ForwardingConfig) -> Result<CommandBatch, CompileError> {
    with_request(config, compile_reconnect)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spark() -> ForwardingConfig {
        ForwardingConfig::new("spark")
            .with_addresses(Ipv4Addr::new(192, 168, 1, 194), Ipv4Addr::new(192, 168, 122, 101))
            .with_port(PortMapping::new(Protocol::Tcp, 1100, 3000))
    }

    fn stage_rank(stage: Stage) -> u8 {
        match stage {
            Stage::Create => 0,
            Stage::Populate { .. } => 1,
            Stage::Link => 2,
            Stage::Unlink => 3,
            Stage::Destroy => 4,
        }
    }

    #[test]
    fn test_direct_mapping_scenario() {
        let lines = compile_start_for(&spark()).unwrap().render_lines("iptables");
        assert_eq!(
            lines,
            vec![
                "iptables -t nat -N DNAT-spark",
                "iptables -t nat -N SNAT-spark",
                "iptables -t filter -N FWD-spark",
                "iptables -t nat -A DNAT-spark -p tcp -d 192.168.1.194 --dport 1100 -j DNAT --to 192.168.122.101:3000",
                "iptables -t nat -A SNAT-spark -p tcp -s 192.168.122.101 --dport 3000 -j SNAT --to-source 192.168.1.194",
                "iptables -t nat -A SNAT-spark -p tcp -s 192.168.122.101 -d 192.168.122.101 --dport 3000 -j MASQUERADE",
                "iptables -t filter -A FWD-spark -p tcp -d 192.168.122.101 --dport 3000 -j ACCEPT",
                "iptables -t nat -I OUTPUT -d 192.168.1.194 -j DNAT-spark",
                "iptables -t nat -I PREROUTING -d 192.168.1.194 -j DNAT-spark",
                "iptables -t nat -I POSTROUTING -s 192.168.122.101 -d 192.168.122.101 -j SNAT-spark",
                "iptables -t filter -I FORWARD -d 192.168.122.101 -j FWD-spark",
            ]
        );
    }

    #[test]
    fn test_external_ip_and_interface() {
        let config = spark()
            .with_external_ip(Ipv4Addr::new(203, 0, 113, 7))
            .with_interface("virbr0");
        let lines = compile_start_for(&config).unwrap().render_lines("iptables");

        assert_eq!(
            lines[3],
            "iptables -t nat -A DNAT-spark -p tcp -d 192.168.1.194 --dport 1100 -s 203.0.113.7 -j DNAT --to 192.168.122.101:3000"
        );
        assert_eq!(
            lines[6],
            "iptables -t filter -A FWD-spark -p tcp -d 192.168.122.101 --dport 3000 -o virbr0 -j ACCEPT"
        );
    }

    #[test]
    fn test_port_range_rules() {
        let config = ForwardingConfig::new("spark")
            .with_addresses(Ipv4Addr::new(192, 168, 1, 194), Ipv4Addr::new(192, 168, 122, 101))
            .with_range(PortRange::new(Protocol::Udp, (40000, 40010), (30000, 30010)));
        let lines = compile_start_for(&config).unwrap().render_lines("iptables");

        assert_eq!(lines.len(), 3 + 4 + 4);
        assert_eq!(
            lines[3],
            "iptables -t nat -A DNAT-spark -p udp -d 192.168.1.194 --dport 40000:40010 -j DNAT --to 192.168.122.101:30000-30010"
        );
        assert!(lines[4].contains("--dport 30000:30010 -j SNAT"));
        assert!(lines[5].contains("--dport 30000:30010 -j MASQUERADE"));
        assert!(lines[6].contains("--dport 30000:30010 -j ACCEPT"));
    }

    #[test]
    fn test_invalid_ranges_are_skipped() {
        let config = spark()
            .with_range(PortRange::new(Protocol::Tcp, (0, 10), (1, 10)))
            .with_range(PortRange::new(Protocol::Tcp, (20, 10), (20, 10)))
            .with_range(PortRange::new(Protocol::Tcp, (5000, 5001), (6000, 6001)));
        let batch = compile_start_for(&config).unwrap();

        let blocks: Vec<usize> = batch
            .iter()
            .filter_map(|c| match c.stage {
                Stage::Populate { block } => Some(block),
                _ => None,
            })
            .collect();
        assert_eq!(blocks, vec![0, 0, 0, 0, 1, 1, 1, 1]);
        assert!(!batch.render_lines("iptables").iter().any(|l| l.contains("--dport 0:10")));
    }

    #[test]
    fn test_start_phases_are_ordered() {
        let config = spark().with_range(PortRange::new(Protocol::Udp, (7000, 7005), (7000, 7005)));
        let batch = compile_start_for(&config).unwrap();
        let ranks: Vec<u8> = batch.iter().map(|c| stage_rank(c.stage)).collect();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn test_stop_is_inverse_of_start() {
        let config = spark();
        let start = compile_start_for(&config).unwrap();
        let stop = compile_stop_for(&config).unwrap();

        let created: Vec<&str> = start
            .iter()
            .filter(|c| c.op == ChainOp::NewChain)
            .map(|c| c.chain.as_str())
            .collect();
        let destroyed: Vec<&str> = stop
            .iter()
            .filter(|c| c.op == ChainOp::DeleteChain)
            .map(|c| c.chain.as_str())
            .collect();
        assert_eq!(created, destroyed);

        let links: Vec<(String, Vec<String>)> = start
            .iter()
            .filter(|c| c.op == ChainOp::Insert)
            .map(|c| (c.chain.clone(), c.args.clone()))
            .collect();
        let unlinks: Vec<(String, Vec<String>)> = stop
            .iter()
            .filter(|c| c.op == ChainOp::Delete)
            .map(|c| (c.chain.clone(), c.args.clone()))
            .collect();
        assert_eq!(links, unlinks);

        let ranks: Vec<u8> = stop.iter().map(|c| stage_rank(c.stage)).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_stop_lines() {
        let lines = compile_stop_for(&spark()).unwrap().render_lines("iptables");
        assert_eq!(lines[0], "iptables -t nat -D OUTPUT -d 192.168.1.194 -j DNAT-spark");
        assert_eq!(
            &lines[4..],
            &[
                "iptables -t nat -F DNAT-spark",
                "iptables -t nat -X DNAT-spark",
                "iptables -t nat -F SNAT-spark",
                "iptables -t nat -X SNAT-spark",
                "iptables -t filter -F FWD-spark",
                "iptables -t filter -X FWD-spark",
            ]
        );
    }

    #[test]
    fn test_reconnect_is_stop_then_start() {
        let config = spark();
        let mut expected = compile_stop_for(&config).unwrap();
        expected.append(compile_start_for(&config).unwrap());
        assert_eq!(compile_reconnect_for(&config).unwrap(), expected);
    }

    #[test]
    fn test_missing_address() {
        let config = ForwardingConfig::new("spark").with_port(PortMapping::new(Protocol::Tcp, 1, 2));
        assert_eq!(
            compile_start_for(&config),
            Err(CompileError::MissingAddress {
                vm_name: "spark".to_string(),
                field: "host_ip"
            })
        );
    }

    #[test]
    fn test_long_vm_name_chains_fit() {
        let config = ForwardingConfig::new("analytics-cluster-worker-node-0042")
            .with_addresses(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(192, 168, 122, 5))
            .with_port(PortMapping::new(Protocol::Tcp, 80, 8080));
        let batch = compile_start_for(&config).unwrap();
        assert!(batch
            .iter()
            .all(|c| c.chain.len() <= crate::domain::chain::MAX_CHAIN_NAME_LEN));
    }
}
