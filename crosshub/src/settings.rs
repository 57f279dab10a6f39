// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration. These structs are deserialized from the
//! operator's config file; `validate()` is called once at startup
//! before any indexer is constructed.

use anyhow::ensure;
use ethers::types::H256;
use serde::{Deserialize, Serialize};

use crosshub_types::{ChainId, HUB_CHAIN_ID};

/// Config-store indexer settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigStoreSettings {
    // Block the config-store contract was deployed at.
    pub deployment_block: u64,
    // Transaction hashes of known-malformed historical updates to skip
    // without logging noise. Operational data, not a security boundary.
    #[serde(default)]
    pub denied_update_hashes: Vec<H256>,
    // Approximate block age under which a malformed update is logged at
    // warn instead of debug.
    #[serde(default = "default_recent_block_window")]
    pub recent_block_window: u64,
}

fn default_recent_block_window() -> u64 {
    7200
}

impl Default for ConfigStoreSettings {
    fn default() -> Self {
        Self {
            deployment_block: 0,
            denied_update_hashes: Vec::new(),
            recent_block_window: default_recent_block_window(),
        }
    }
}

/// Hub-pool indexer settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerSettings {
    // Block the hub-pool contract was deployed at.
    pub deployment_block: u64,
    // Chain the hub pool lives on.
    #[serde(default = "default_hub_chain_id")]
    pub hub_chain_id: ChainId,
}

fn default_hub_chain_id() -> ChainId {
    HUB_CHAIN_ID
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            deployment_block: 0,
            hub_chain_id: default_hub_chain_id(),
        }
    }
}

/// Realized-LP-fee engine settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeeSettings {
    // Utilization values tied to quote timestamps younger than this are
    // not cached; the chain may still be revising them.
    #[serde(default = "default_cache_safe_lag_secs")]
    pub cache_safe_lag_secs: u64,
    // Capacity of the utilization LRU cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    // Concurrency cap for collaborator fan-out.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_cache_safe_lag_secs() -> u64 {
    3600
}

fn default_cache_capacity() -> usize {
    4096
}

fn default_concurrency() -> usize {
    8
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            cache_safe_lag_secs: default_cache_safe_lag_secs(),
            cache_capacity: default_cache_capacity(),
            concurrency: default_concurrency(),
        }
    }
}

/// Bundle-aggregation settings.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BundleSettings {
    // Depth bound for previous-bundle reconstruction. The protocol
    // keeps at most one proposal pending, so anything past a couple of
    // levels indicates corrupted on-chain state.
    #[serde(default = "default_max_reconstruction_depth")]
    pub max_reconstruction_depth: u32,
}

fn default_max_reconstruction_depth() -> u32 {
    4
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            max_reconstruction_depth: default_max_reconstruction_depth(),
        }
    }
}

/// Top-level engine settings as read from the operator config file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineSettings {
    pub config_store: ConfigStoreSettings,
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub fees: FeeSettings,
    #[serde(default)]
    pub bundle: BundleSettings,
}

impl EngineSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.config_store.deployment_block <= self.ledger.deployment_block
                || self.ledger.deployment_block == 0
                || self.config_store.deployment_block == 0,
            "config store must be deployed no later than the hub pool it configures"
        );
        ensure!(self.fees.cache_capacity > 0, "fee cache capacity must be positive");
        ensure!(self.fees.concurrency > 0, "fee concurrency must be positive");
        ensure!(
            self.bundle.max_reconstruction_depth > 0,
            "bundle reconstruction depth must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineSettings::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut settings = EngineSettings::default();
        settings.fees.concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_deserialize_kebab_case_with_defaults() {
        let json = r#"{
            "config-store": { "deployment-block": 100 },
            "ledger": { "deployment-block": 200, "hub-chain-id": 1 }
        }"#;
        let settings: EngineSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.config_store.deployment_block, 100);
        assert_eq!(settings.ledger.hub_chain_id, 1);
        assert_eq!(settings.fees.concurrency, default_concurrency());
        settings.validate().unwrap();
    }
}
