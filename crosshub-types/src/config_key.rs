// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Global config-store key enumeration.
//!
//! On-chain the key is a `bytes32` holding the UTF-8 key name padded
//! with trailing zeros. Updates under any key outside this enumeration
//! are ignored by the store.

use std::fmt;

use ethers::types::H256;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalConfigKey {
    MaxRelayerRepaymentLeafSize,
    MaxPoolRebalanceLeafSize,
    Version,
    DisabledChains,
    ChainIdIndices,
    LiteChainIdIndices,
}

impl GlobalConfigKey {
    pub const ALL: [GlobalConfigKey; 6] = [
        GlobalConfigKey::MaxRelayerRepaymentLeafSize,
        GlobalConfigKey::MaxPoolRebalanceLeafSize,
        GlobalConfigKey::Version,
        GlobalConfigKey::DisabledChains,
        GlobalConfigKey::ChainIdIndices,
        GlobalConfigKey::LiteChainIdIndices,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalConfigKey::MaxRelayerRepaymentLeafSize => "MAX_RELAYER_REPAYMENT_LEAF_SIZE",
            GlobalConfigKey::MaxPoolRebalanceLeafSize => "MAX_POOL_REBALANCE_LEAF_SIZE",
            GlobalConfigKey::Version => "VERSION",
            GlobalConfigKey::DisabledChains => "DISABLED_CHAINS",
            GlobalConfigKey::ChainIdIndices => "CHAIN_ID_INDICES",
            GlobalConfigKey::LiteChainIdIndices => "LITE_CHAIN_ID_INDICES",
        }
    }

    pub fn from_str_key(key: &str) -> Option<Self> {
        Self::ALL.iter().find(|k| k.as_str() == key).copied()
    }

    /// Decodes the on-chain `bytes32` form: strip trailing zero padding,
    /// interpret as UTF-8, match against the enumeration.
    pub fn from_bytes32(key: &H256) -> Option<Self> {
        let bytes = key.as_bytes();
        let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let text = std::str::from_utf8(&bytes[..end]).ok()?;
        Self::from_str_key(text)
    }

    pub fn to_bytes32(&self) -> H256 {
        let mut out = [0u8; 32];
        let bytes = self.as_str().as_bytes();
        out[..bytes.len()].copy_from_slice(bytes);
        H256::from(out)
    }
}

impl fmt::Display for GlobalConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
