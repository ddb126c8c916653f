// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Perimeter Firewall Block
//!
//! Alternate exposure path for hosts where the forwarding rules should live
//! in the perimeter firewall's own rule file (ufw `before.rules`) instead of
//! live kernel chains. The engine owns a single block of that file, bounded
//! by two sentinel lines:
//!
//! ```text
//! #KVM_GO_START
//! *nat
//! :PREROUTING ACCEPT [0:0]
//! -A PREROUTING -p tcp --dport 9999 -j DNAT --to-destination 192.168.122.109:9999
//! COMMIT
//! #KVM_GO_END
//! ```
//!
//! The block is "inactive" when every non-blank line inside it is commented.
//! Everything outside the sentinels is never modified.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure text transformations on the perimeter rule block

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::domain::forwarding::{ForwardingConfig, Protocol};

pub const DEFAULT_START_MARKER: &str = "#KVM_GO_START";
pub const DEFAULT_END_MARKER: &str = "#KVM_GO_END";
pub const DEFAULT_COMMENT_MARKER: &str = "#";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PerimeterError {
    #[error("No '{start}' ... '{end}' block found in rule file")]
    BlockNotFound { start: String, end: String },

    #[error("VM '{0}' has no private address to expose")]
    MissingPrivateAddress(String),

    #[error("Rule file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Reload command '{command}' failed: {reason}")]
    Reload { command: String, reason: String },
}

/// Storage of the externally owned rule file.
pub trait RuleFile: Send + Sync {
    fn read(&self) -> Result<String, PerimeterError>;

    /// Replace the file content atomically.
    fn write(&self, text: &str) -> Result<(), PerimeterError>;

    /// Ask the firewall to pick up the new content.
    fn reload(&self) -> Result<(), PerimeterError>;

    /// Read, transform and write back as one step. Returns whether the text
    /// changed. Implementations shared between processes hold a lock across
    /// the whole edit.
    fn edit(&self, transform: &dyn Fn(&str) -> Result<String, PerimeterError>) -> Result<bool, PerimeterError> {
        rewrite(self, transform)
    }
}

/// Unguarded read-transform-write; writes only when the text changed.
pub fn rewrite<F>(file: &F, transform: &dyn Fn(&str) -> Result<String, PerimeterError>) -> Result<bool, PerimeterError>
where
    F: RuleFile + ?Sized,
{
    let before = file.read()?;
    let after = transform(&before)?;
    if after == before {
        return Ok(false);
    }
    file.write(&after)?;
    Ok(true)
}

/// Sentinels and comment marker of the managed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerimeterBlock {
    #[serde(default = "default_start_marker")]
    pub start_marker: String,

    #[serde(default = "default_end_marker")]
    pub end_marker: String,

    #[serde(default = "default_comment_marker")]
    pub comment_marker: String,
}

impl Default for PerimeterBlock {
    fn default() -> Self {
        Self {
            start_marker: default_start_marker(),
            end_marker: default_end_marker(),
            comment_marker: default_comment_marker(),
        }
    }
}

impl PerimeterBlock {
    pub fn new(start_marker: impl Into<String>, end_marker: impl Into<String>) -> Self {
        Self {
            start_marker: start_marker.into(),
            end_marker: end_marker.into(),
            comment_marker: default_comment_marker(),
        }
    }

    /// Line indices of the opening and closing sentinels.
    fn locate(&self, lines: &[&str]) -> Option<(usize, usize)> {
        let start = lines.iter().position(|l| l.trim() == self.start_marker)?;
        let end = lines[start + 1..]
            .iter()
            .position(|l| l.trim() == self.end_marker)
            .map(|offset| start + 1 + offset)?;
        Some((start, end))
    }

    fn is_line_commented(&self, line: &str) -> bool {
        line.trim_start().starts_with(&self.comment_marker)
    }

    fn comment_line(&self, line: &str) -> String {
        if line.trim().is_empty() || self.is_line_commented(line) {
            return line.to_string();
        }
        format!("{} {}", self.comment_marker, line)
    }

    fn uncomment_line(&self, line: &str) -> String {
        let trimmed = line.trim_start();
        match trimmed.strip_prefix(self.comment_marker.as_str()) {
            Some(rest) => rest.strip_prefix(' ').unwrap_or(rest).to_string(),
            None => line.to_string(),
        }
    }

    fn matches_rule(&self, line: &str, rule: &str) -> bool {
        let line = line.trim();
        let rule = rule.trim();
        line == rule || line == format!("{} {}", self.comment_marker, rule)
    }

    /// Whether the block is inactive: every non-blank line between the
    /// sentinels is commented. A missing or empty block counts as inactive.
    pub fn is_block_commented(&self, text: &str) -> bool {
        let lines: Vec<&str> = text.split('\n').collect();
        let Some((start, end)) = self.locate(&lines) else {
            return true;
        };
        lines[start + 1..end]
            .iter()
            .filter(|l| !l.trim().is_empty())
            .all(|l| self.is_line_commented(l))
    }

    /// Comment (`comment = true`) or uncomment every line of the block.
    /// Sentinels are left alone and text without a block is returned as is.
    pub fn set_block_commented(&self, text: &str, comment: bool) -> String {
        let lines: Vec<&str> = text.split('\n').collect();
        let Some((start, end)) = self.locate(&lines) else {
            return text.to_string();
        };

        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if i <= start || i >= end {
                    line.to_string()
                } else if comment {
                    self.comment_line(line)
                } else {
                    self.uncomment_line(line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Insert `rule` right before the closing sentinel, commented to match
    /// the block's current state. No-op if the rule is already in the block.
    pub fn add_rule(&self, text: &str, rule: &str) -> Result<String, PerimeterError> {
        let lines: Vec<&str> = text.split('\n').collect();
        let (start, end) = self.locate(&lines).ok_or_else(|| self.not_found())?;

        if lines[start + 1..end].iter().any(|l| self.matches_rule(l, rule)) {
            return Ok(text.to_string());
        }

        let rule = rule.trim();
        let inserted = if self.is_block_commented(text) {
            format!("{} {}", self.comment_marker, rule)
        } else {
            rule.to_string()
        };

        let mut result: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        result.insert(end, inserted);
        Ok(result.join("\n"))
    }

    /// Delete every block line equal to `rule` or its commented form.
    pub fn remove_rule(&self, text: &str, rule: &str) -> String {
        let lines: Vec<&str> = text.split('\n').collect();
        let Some((start, end)) = self.locate(&lines) else {
            return text.to_string();
        };

        lines
            .iter()
            .enumerate()
            .filter(|(i, line)| !(*i > start && *i < end && self.matches_rule(line, rule)))
            .map(|(_, line)| *line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Non-blank lines strictly inside the block, as written.
    pub fn block_lines<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let lines: Vec<&str> = text.split('\n').collect();
        match self.locate(&lines) {
            Some((start, end)) => lines[start + 1..end]
                .iter()
                .copied()
                .filter(|l| !l.trim().is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether the block is active and mentions `private_ip`.
    pub fn is_exposed(&self, text: &str, private_ip: Ipv4Addr) -> bool {
        let needle = format!("{}:", private_ip);
        !self.is_block_commented(text)
            && self.block_lines(text).iter().any(|l| l.contains(&needle))
    }

    fn not_found(&self) -> PerimeterError {
        PerimeterError::BlockNotFound {
            start: self.start_marker.clone(),
            end: self.end_marker.clone(),
        }
    }
}

/// Build a `PREROUTING` DNAT line for the perimeter block.
///
/// `host_ports` and `vm_ports` are either a single port or an
/// iptables-style range (`8888:8890` on the match side, `8888-8890` on the
/// destination side).
pub fn perimeter_rule(
    protocol: Protocol,
    host_ports: &str,
    private_ip: Ipv4Addr,
    vm_ports: &str,
    comment: &str,
) -> String {
    format!(
        "-A PREROUTING -p {} --dport {} -j DNAT --to-destination {}:{} -m comment --comment \"{}\"",
        protocol,
        host_ports,
        private_ip,
        vm_ports,
        comment.replace('"', "'")
    )
}

/// Perimeter lines equivalent to the kernel-chain rules of `config`: one per
/// port mapping and one per usable port range.
pub fn rules_for_config(config: &ForwardingConfig) -> Result<Vec<String>, PerimeterError> {
    let private_ip = config
        .private_ip
        .ok_or_else(|| PerimeterError::MissingPrivateAddress(config.vm_name.clone()))?;

    let mut rules = Vec::with_capacity(config.port_map.len() + config.port_range.len());

    for mapping in &config.port_map {
        rules.push(perimeter_rule(
            mapping.protocol,
            &mapping.host_port.to_string(),
            private_ip,
            &mapping.vm_port.to_string(),
            &format!("kvmfwd {} host {} to vm {}", config.vm_name, mapping.host_port, mapping.vm_port),
        ));
    }

    for range in config.port_range.iter().filter(|r| r.is_valid()) {
        rules.push(perimeter_rule(
            range.protocol,
            &format!("{}:{}", range.host_start_port, range.host_end_port),
            private_ip,
            &format!("{}-{}", range.vm_start_port, range.vm_end_port),
            &format!(
                "kvmfwd {} host {}-{} to vm {}-{}",
                config.vm_name,
                range.host_start_port,
                range.host_end_port,
                range.vm_start_port,
                range.vm_end_port
            ),
        ));
    }

    Ok(rules)
}

fn default_start_marker() -> String {
    DEFAULT_START_MARKER.to_string()
}

fn default_end_marker() -> String {
    DEFAULT_END_MARKER.to_string()
}

fn default_comment_marker() -> String {
    DEFAULT_COMMENT_MARKER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::forwarding::{PortMapping, PortRange};
    use std::collections::BTreeSet;

    const ACTIVE: &str = "\n#KVM_GO_START\n*nat\n:PREROUTING ACCEPT [0:0]\n-A PREROUTING -p tcp --dport 9999 -j DNAT --to-destination 192.168.122.109:9999\nCOMMIT\n#KVM_GO_END\n\n# all other non-local packets are dropped\n-A ufw-not-local -j DROP\nCOMMIT\n";

    const INACTIVE: &str = "\n#KVM_GO_START\n# *nat\n# :PREROUTING ACCEPT [0:0]\n# -A PREROUTING -p tcp --dport 9999 -j DNAT --to-destination 192.168.122.109:9999\n# COMMIT\n#KVM_GO_END\n\n# all other non-local packets are dropped\n-A ufw-not-local -j DROP\nCOMMIT\n";

    fn outside_block(text: &str) -> Vec<&str> {
        let lines: Vec<&str> = text.split('\n').collect();
        let end = lines.iter().position(|l| *l == DEFAULT_END_MARKER).unwrap();
        lines[end..].to_vec()
    }

    #[test]
    fn test_detects_block_state() {
        let block = PerimeterBlock::default();
        assert!(!block.is_block_commented(ACTIVE));
        assert!(block.is_block_commented(INACTIVE));
        assert!(block.is_block_commented("no block here\n"));
    }

    #[test]
    fn test_toggle_round_trip() {
        let block = PerimeterBlock::default();
        assert_eq!(block.set_block_commented(ACTIVE, true), INACTIVE);
        assert_eq!(block.set_block_commented(INACTIVE, false), ACTIVE);
    }

    #[test]
    fn test_toggle_is_idempotent() {
        let block = PerimeterBlock::default();
        let once = block.set_block_commented(ACTIVE, true);
        let twice = block.set_block_commented(&once, true);
        assert_eq!(once, twice);
        assert!(block.is_block_commented(&twice));

        let active = block.set_block_commented(ACTIVE, false);
        assert_eq!(active, ACTIVE);
    }

    #[test]
    fn test_toggle_never_touches_outside_lines() {
        let block = PerimeterBlock::default();
        let toggled = block.set_block_commented(ACTIVE, true);
        assert_eq!(outside_block(&toggled), outside_block(ACTIVE));
        assert!(toggled.contains("\n-A ufw-not-local -j DROP\n"));
    }

    #[test]
    fn test_add_rule_matches_block_state() {
        let block = PerimeterBlock::default();
        let rule = "-A PREROUTING -p udp --dport 27016 -j DNAT --to-destination 192.168.122.109:27016";

        let active = block.add_rule(ACTIVE, rule).unwrap();
        assert!(active.contains(&format!("{}\n#KVM_GO_END", rule)));

        let inactive = block.add_rule(INACTIVE, rule).unwrap();
        assert!(inactive.contains(&format!("# {}\n#KVM_GO_END", rule)));
        assert!(block.is_block_commented(&inactive));
    }

    #[test]
    fn test_add_rule_is_noop_when_present() {
        let block = PerimeterBlock::default();
        let rule = "-A PREROUTING -p tcp --dport 9999 -j DNAT --to-destination 192.168.122.109:9999";
        assert_eq!(block.add_rule(ACTIVE, rule).unwrap(), ACTIVE);
        assert_eq!(block.add_rule(INACTIVE, rule).unwrap(), INACTIVE);
    }

    #[test]
    fn test_remove_undoes_add() {
        let block = PerimeterBlock::default();
        let rule = "-A PREROUTING -p tcp --dport 8080 -j DNAT --to-destination 192.168.122.50:80";

        for text in [ACTIVE, INACTIVE] {
            let added = block.add_rule(text, rule).unwrap();
            let removed = block.remove_rule(&added, rule);

            let before: BTreeSet<&str> = block.block_lines(text).into_iter().collect();
            let after: BTreeSet<&str> = block.block_lines(&removed).into_iter().collect();
            assert_eq!(before, after);
            assert_eq!(removed, text);
        }
    }

    #[test]
    fn test_remove_leaves_other_lines() {
        let block = PerimeterBlock::default();
        let removed = block.remove_rule(ACTIVE, "COMMIT");
        assert!(!block.block_lines(&removed).contains(&"COMMIT"));
        assert!(removed.ends_with("-A ufw-not-local -j DROP\nCOMMIT\n"));
    }

    #[test]
    fn test_add_rule_without_block_fails() {
        let block = PerimeterBlock::default();
        let result = block.add_rule("*filter\nCOMMIT\n", "-A PREROUTING -j ACCEPT");
        assert!(matches!(result, Err(PerimeterError::BlockNotFound { .. })));
    }

    #[test]
    fn test_is_exposed() {
        let block = PerimeterBlock::default();
        let ip = Ipv4Addr::new(192, 168, 122, 109);
        assert!(block.is_exposed(ACTIVE, ip));
        assert!(!block.is_exposed(INACTIVE, ip));
        assert!(!block.is_exposed(ACTIVE, Ipv4Addr::new(192, 168, 122, 10)));
    }

    #[test]
    fn test_rules_for_config() {
        let config = ForwardingConfig::new("hadoop")
            .with_addresses(Ipv4Addr::new(192, 168, 1, 225), Ipv4Addr::new(192, 168, 122, 109))
            .with_port(PortMapping::new(Protocol::Tcp, 9999, 8088))
            .with_range(PortRange::new(Protocol::Udp, (30000, 30100), (30000, 30100)))
            .with_range(PortRange::new(Protocol::Udp, (0, 30100), (30000, 30100)));

        let rules = rules_for_config(&config).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[0],
            "-A PREROUTING -p tcp --dport 9999 -j DNAT --to-destination 192.168.122.109:8088 -m comment --comment \"kvmfwd hadoop host 9999 to vm 8088\""
        );
        assert!(rules[1].contains("--dport 30000:30100"));
        assert!(rules[1].contains("192.168.122.109:30000-30100"));
    }

    #[test]
    fn test_rules_require_private_address() {
        let config = ForwardingConfig::new("bare");
        assert_eq!(
            rules_for_config(&config),
            Err(PerimeterError::MissingPrivateAddress("bare".to_string()))
        );
    }
}
