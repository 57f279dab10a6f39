// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Log-derived event records and their ordering.
//!
//! Everything the engine ingests arrives as a log-like record carrying
//! the `(blockNumber, transactionIndex, logIndex)` position of the
//! originating log. That triple is the total order every point-in-time
//! query relies on. Raw on-chain payloads with shape constraints (the
//! executed-root-bundle balance arrays) are sanitized into typed structs
//! via `TryFrom` before they reach any state container.

use ethers::types::{Address, H256, I256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ChainId;

/// Position of a log within the chain, totally ordered.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventOrdinal {
    pub block_number: u64,
    pub transaction_index: u32,
    pub log_index: u32,
}

/// Log metadata shared by every ingested event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub block_number: u64,
    pub transaction_index: u32,
    pub log_index: u32,
    pub transaction_hash: H256,
}

impl EventMeta {
    pub fn ordinal(&self) -> EventOrdinal {
        EventOrdinal {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
        }
    }
}

/// A typed event payload paired with its log position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord<T> {
    pub meta: EventMeta,
    pub value: T,
}

impl<T> EventRecord<T> {
    pub fn new(meta: EventMeta, value: T) -> Self {
        Self { meta, value }
    }

    pub fn block_number(&self) -> u64 {
        self.meta.block_number
    }

    pub fn ordinal(&self) -> EventOrdinal {
        self.meta.ordinal()
    }
}

/// Sorts records ascending by `(block, tx, log)`. Ingest paths re-sort
/// defensively so reordered retries stay idempotent.
pub fn sort_events_ascending<T>(events: &mut [EventRecord<T>]) {
    events.sort_by_key(|e| e.ordinal());
}

/// Latest record with `block_number <= block`, scanning newest-first over
/// an ascending-ordered slice.
pub fn latest_at_or_before<T>(events: &[EventRecord<T>], block: u64) -> Option<&EventRecord<T>> {
    events.iter().rev().find(|e| e.block_number() <= block)
}

/// `UpdatedTokenConfig(address indexed key, string value)` payload. The
/// value is the raw JSON string exactly as stored on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenConfigUpdate {
    pub l1_token: Address,
    pub value: String,
}

/// `UpdatedGlobalConfig(bytes32 indexed key, string value)` payload. The
/// key is UTF-8 padded into `bytes32`; unknown keys are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalConfigUpdate {
    pub key: H256,
    pub value: String,
}

/// `SetPoolRebalanceRoute` payload: maps an L1 token to its counterpart
/// on one destination chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteUpdate {
    pub destination_chain_id: ChainId,
    pub l1_token: Address,
    pub destination_token: Address,
}

/// `CrossChainContractsSet` payload: registers the messaging adapter and
/// spoke pool deployed for one chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrossChainContractsUpdate {
    pub l2_chain_id: ChainId,
    pub adapter: Address,
    pub spoke_pool: Address,
}

/// `L1TokenEnabledForLiquidityProvision` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct L1TokenEnabled {
    pub l1_token: Address,
}

/// `ProposeRootBundle` payload. Evaluation block numbers are positional:
/// index `i` belongs to the chain at position `i` of the chain-index
/// list in force at the proposal block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposedRootBundle {
    pub challenge_period_end_timestamp: u64,
    pub pool_rebalance_leaf_count: u32,
    pub bundle_evaluation_block_numbers: Vec<u64>,
    pub pool_rebalance_root: H256,
    pub relayer_refund_root: H256,
    pub slow_relay_root: H256,
    pub proposer: Address,
}

/// `RootBundleDisputed` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisputedRootBundle {
    pub disputer: Address,
    pub request_time: u64,
}

/// `RootBundleCanceled` payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CancelledRootBundle {
    pub canceller: Address,
    pub request_time: u64,
}

/// Raw `RootBundleExecuted` payload before the balance-array split. The
/// on-chain `runningBalances` array is length `N` or `2N` for `N` L1
/// tokens; the second half, when present, carries incentive balances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawExecutedRootBundle {
    pub group_index: u32,
    pub leaf_id: u32,
    pub chain_id: ChainId,
    pub l1_tokens: Vec<Address>,
    pub bundle_lp_fees: Vec<U256>,
    pub net_send_amounts: Vec<I256>,
    pub running_balances: Vec<I256>,
    pub caller: Address,
}

/// Sanitized execution event with incentive balances split out. Both
/// balance vectors are exactly `l1_tokens.len()` long; incentive slots
/// are zero when the raw array carried no second half.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedRootBundleLeaf {
    pub group_index: u32,
    pub leaf_id: u32,
    pub chain_id: ChainId,
    pub l1_tokens: Vec<Address>,
    pub bundle_lp_fees: Vec<U256>,
    pub net_send_amounts: Vec<I256>,
    pub running_balances: Vec<I256>,
    pub incentive_balances: Vec<I256>,
    pub caller: Address,
}

/// Shape violations in raw on-chain payloads. These abort the enclosing
/// ingest batch rather than being skipped per-event.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventConversionError {
    #[error(
        "executed root bundle for chain {chain_id} carries {balances} running balances \
         for {tokens} l1 tokens (want N or 2N)"
    )]
    BalanceArity {
        chain_id: ChainId,
        tokens: usize,
        balances: usize,
    },
    #[error(
        "executed root bundle for chain {chain_id} has misaligned arrays: \
         {tokens} l1 tokens, {lp_fees} lp fees, {net_sends} net send amounts"
    )]
    ArrayMismatch {
        chain_id: ChainId,
        tokens: usize,
        lp_fees: usize,
        net_sends: usize,
    },
}

impl TryFrom<RawExecutedRootBundle> for ExecutedRootBundleLeaf {
    type Error = EventConversionError;

    fn try_from(raw: RawExecutedRootBundle) -> Result<Self, Self::Error> {
        let n = raw.l1_tokens.len();
        if raw.bundle_lp_fees.len() != n || raw.net_send_amounts.len() != n {
            return Err(EventConversionError::ArrayMismatch {
                chain_id: raw.chain_id,
                tokens: n,
                lp_fees: raw.bundle_lp_fees.len(),
                net_sends: raw.net_send_amounts.len(),
            });
        }
        let (running_balances, incentive_balances) = if raw.running_balances.len() == n {
            (raw.running_balances, vec![I256::zero(); n])
        } else if raw.running_balances.len() == 2 * n {
            let mut running = raw.running_balances;
            let incentive = running.split_off(n);
            (running, incentive)
        } else {
            return Err(EventConversionError::BalanceArity {
                chain_id: raw.chain_id,
                tokens: n,
                balances: raw.running_balances.len(),
            });
        };
        Ok(ExecutedRootBundleLeaf {
            group_index: raw.group_index,
            leaf_id: raw.leaf_id,
            chain_id: raw.chain_id,
            l1_tokens: raw.l1_tokens,
            bundle_lp_fees: raw.bundle_lp_fees,
            net_send_amounts: raw.net_send_amounts,
            running_balances,
            incentive_balances,
            caller: raw.caller,
        })
    }
}

/// Live `rootBundleProposal` view read from the hub contract. Pending
/// only while `unclaimed_pool_rebalance_leaf_count > 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivePendingBundle {
    pub pool_rebalance_root: H256,
    pub relayer_refund_root: H256,
    pub slow_relay_root: H256,
    pub proposer: Address,
    pub unclaimed_pool_rebalance_leaf_count: u32,
    pub challenge_period_end_timestamp: u64,
}

/// The live pending view paired with its originating proposal event.
/// Derived on each ledger update, never stored as an event itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRootBundle {
    pub pool_rebalance_root: H256,
    pub relayer_refund_root: H256,
    pub slow_relay_root: H256,
    pub proposer: Address,
    pub unclaimed_pool_rebalance_leaf_count: u32,
    pub challenge_period_end_timestamp: u64,
    pub bundle_evaluation_block_numbers: Vec<u64>,
    pub proposal_block_number: u64,
}
