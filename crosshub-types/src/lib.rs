// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Protocol vocabulary shared across the crosshub reconstruction engine:
//! chain identifiers, log-ordering primitives, typed on-chain event
//! payloads, rate models, token-config decoding, and settlement leaf
//! structures. This crate is pure data with no I/O and no async.

#![allow(clippy::too_many_arguments)]

use ethers::types::{U256, U512};

pub mod config_key;
pub mod events;
pub mod rate_model;
pub mod settlement;
pub mod token_config;

pub use config_key::GlobalConfigKey;
pub use events::{EventMeta, EventOrdinal, EventRecord};
pub use rate_model::RateModel;
pub use token_config::{RouteKey, SpokeTargetBalance, TokenConfig};

/// EVM-style chain identifier.
pub type ChainId = u64;

/// The settlement hub's own chain.
pub const HUB_CHAIN_ID: ChainId = 1;

/// Chain-index list in force before the dynamic `CHAIN_ID_INDICES` key
/// existed on-chain. Position in this list maps a chain to its slot in
/// bundle evaluation-block arrays.
pub const PROTOCOL_DEFAULT_CHAIN_ID_INDICES: [ChainId; 5] = [1, 10, 137, 288, 42161];

/// Version reported before any `VERSION` update has been observed.
pub const DEFAULT_CONFIG_STORE_VERSION: u64 = 0;

/// Highest config-store version whose update semantics this client
/// understands. Stores that move past this require a newer client.
pub const SUPPORTED_CONFIG_STORE_VERSION: u64 = 4;

/// Sentinel block/timestamp meaning "latest known" in point-in-time
/// queries.
pub const LATEST_BLOCK: u64 = u64::MAX;

/// `1.0` in the protocol's 18-decimal fixed-point representation.
pub fn fixed_point_one() -> U256 {
    U256::exp10(18)
}

/// `a * b / denom` through a 512-bit intermediate, saturating on the
/// way back down. A zero denominator yields zero.
pub fn mul_div(a: U256, b: U256, denom: U256) -> U256 {
    if denom.is_zero() {
        return U256::zero();
    }
    let wide = a.full_mul(b) / U512::from(denom);
    U256::try_from(wide).unwrap_or(U256::MAX)
}
