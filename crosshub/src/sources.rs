// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Collaborator traits at the engine boundary.
//!
//! Everything chain-facing lives behind these traits: paginated log
//! queries, live contract reads, block/time resolution, pool
//! utilization, and the fee curve itself. The engine consumes fully
//! materialized batches and re-sorts them defensively; pagination,
//! retries and timeouts are the collaborator's business.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use thiserror::Error;

use crosshub_types::events::{
    CancelledRootBundle, CrossChainContractsUpdate, DisputedRootBundle, EventRecord,
    GlobalConfigUpdate, L1TokenEnabled, LivePendingBundle, ProposedRootBundle,
    RawExecutedRootBundle, RouteUpdate, TokenConfigUpdate,
};
use crosshub_types::settlement::{BundleInputs, ChainBlockRange};
use crosshub_types::RateModel;

/// Error type for collaborator calls. Propagated to the engine caller
/// uninterpreted; the engine adds no retry policy of its own.
#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EventSourceError {
    /// Whether this error is worth retrying at the caller's policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EventSourceError::Rpc(_))
    }
}

/// One fetched range of config-store logs. `global_config_timestamps`
/// is parallel to `global_config_updates`; a length mismatch is a
/// fatal batch-shape error at ingest.
#[derive(Clone, Debug, Default)]
pub struct ConfigStoreEventBatch {
    pub token_config_updates: Vec<EventRecord<TokenConfigUpdate>>,
    pub global_config_updates: Vec<EventRecord<GlobalConfigUpdate>>,
    pub global_config_timestamps: Vec<u64>,
}

/// One fetched range of hub-pool logs.
#[derive(Clone, Debug, Default)]
pub struct HubEventBatch {
    pub route_updates: Vec<EventRecord<RouteUpdate>>,
    pub cross_chain_contracts: Vec<EventRecord<CrossChainContractsUpdate>>,
    pub l1_tokens_enabled: Vec<EventRecord<L1TokenEnabled>>,
    pub proposals: Vec<EventRecord<ProposedRootBundle>>,
    pub disputes: Vec<EventRecord<DisputedRootBundle>>,
    pub cancellations: Vec<EventRecord<CancelledRootBundle>>,
    pub executions: Vec<EventRecord<RawExecutedRootBundle>>,
}

/// Log access for the config-store contract.
#[async_trait]
pub trait ConfigStoreEventSource: Send + Sync {
    /// Latest block the source can serve consistently.
    async fn latest_block(&self) -> Result<u64, EventSourceError>;

    /// All config-store events in `[from_block, to_block]`, with block
    /// timestamps for the global-config updates.
    async fn config_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<ConfigStoreEventBatch, EventSourceError>;
}

/// Log and live-state access for the hub-pool contract.
#[async_trait]
pub trait HubPoolEventSource: Send + Sync {
    /// Latest block the source can serve consistently.
    async fn latest_block(&self) -> Result<u64, EventSourceError>;

    /// All hub-pool events in `[from_block, to_block]`.
    async fn hub_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<HubEventBatch, EventSourceError>;

    /// Live `rootBundleProposal` read. `None` when the slot is empty.
    async fn pending_bundle(&self) -> Result<Option<LivePendingBundle>, EventSourceError>;
}

/// Timestamp/block resolution on the hub chain.
#[async_trait]
pub trait BlockTimeResolver: Send + Sync {
    /// Latest block with `timestamp <= timestamp`, if any exists.
    async fn block_for_timestamp(&self, timestamp: u64) -> Result<Option<u64>, EventSourceError>;

    /// Timestamp of a known block.
    async fn block_timestamp(&self, block: u64) -> Result<u64, EventSourceError>;
}

/// Liquidity-pool utilization reads against the hub contract.
#[async_trait]
pub trait PoolUtilizationSource: Send + Sync {
    /// Pool utilization for `l1_token` at `block`, 1e18 fixed point.
    async fn utilization(&self, l1_token: Address, block: u64)
        -> Result<U256, EventSourceError>;

    /// Pool utilization at `block` assuming `relay_amount` more of
    /// `l1_token` were lent out.
    async fn utilization_post_relay(
        &self,
        l1_token: Address,
        block: u64,
        relay_amount: U256,
    ) -> Result<U256, EventSourceError>;
}

/// The fee curve: turns a rate model plus a utilization move into a
/// realized LP fee percentage (1e18 fixed point).
pub trait LpFeeModel: Send + Sync {
    fn realized_lp_fee_pct(
        &self,
        model: &RateModel,
        utilization_before: U256,
        utilization_after: U256,
    ) -> U256;
}

/// Upstream classification: already-bucketed fills and deposits for a
/// set of per-chain bundle block ranges.
#[async_trait]
pub trait BundleInputProvider: Send + Sync {
    async fn bundle_inputs(
        &self,
        ranges: &[ChainBlockRange],
    ) -> Result<BundleInputs, EventSourceError>;
}
