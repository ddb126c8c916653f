// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Perimeter Service
//!
//! Read-transform-write over the perimeter rule file, as one
//! [`RuleFile::edit`]. The file is only rewritten (and the firewall only
//! reloaded) when the text actually changes.

use std::sync::Arc;

use crate::domain::forwarding::ForwardingConfig;
use crate::domain::perimeter::{rules_for_config, PerimeterBlock, PerimeterError, RuleFile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerimeterStatus {
    pub active: bool,
    pub rules: Vec<String>,
}

pub struct PerimeterService {
    block: PerimeterBlock,
    file: Arc<dyn RuleFile>,
}

impl PerimeterService {
    pub fn new(block: PerimeterBlock, file: Arc<dyn RuleFile>) -> Self {
        Self { block, file }
    }

    pub fn status(&self) -> Result<PerimeterStatus, PerimeterError> {
        let text = self.file.read()?;
        Ok(PerimeterStatus {
            active: !self.block.is_block_commented(&text),
            rules: self
                .block
                .block_lines(&text)
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }

    /// Uncomment the block. Returns whether the file changed.
    pub fn enable(&self) -> Result<bool, PerimeterError> {
        self.update(|text| Ok(self.block.set_block_commented(text, false)))
    }

    /// Comment the block out. Returns whether the file changed.
    pub fn disable(&self) -> Result<bool, PerimeterError> {
        self.update(|text| Ok(self.block.set_block_commented(text, true)))
    }

    /// Add the perimeter equivalent of `config`'s mappings.
    pub fn expose(&self, config: &ForwardingConfig) -> Result<bool, PerimeterError> {
        let rules = rules_for_config(config)?;
        self.update(|text| {
            rules
                .iter()
                .try_fold(text.to_string(), |acc, rule| self.block.add_rule(&acc, rule))
        })
    }

    /// Remove the perimeter equivalent of `config`'s mappings.
    pub fn withdraw(&self, config: &ForwardingConfig) -> Result<bool, PerimeterError> {
        let rules = rules_for_config(config)?;
        self.update(|text| {
            Ok(rules
                .iter()
                .fold(text.to_string(), |acc, rule| self.block.remove_rule(&acc, rule)))
        })
    }

    pub fn is_exposed(&self, config: &ForwardingConfig) -> Result<bool, PerimeterError> {
        let private_ip = config
            .private_ip
            .ok_or_else(|| PerimeterError::MissingPrivateAddress(config.vm_name.clone()))?;
        let text = self.file.read()?;
        Ok(self.block.is_exposed(&text, private_ip))
    }

    fn update<F>(&self, transform: F) -> Result<bool, PerimeterError>
    where
        F: Fn(&str) -> Result<String, PerimeterError>,
    {
        if !self.file.edit(&transform)? {
            tracing::debug!("Perimeter rule file already in requested state");
            return Ok(false);
        }

        self.file.reload()?;
        tracing::info!("Perimeter rule file updated");
        Ok(true)
    }
}
