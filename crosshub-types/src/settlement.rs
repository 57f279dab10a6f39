// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Settlement vocabulary: classified bundle inputs, accumulator maps,
//! and the leaf structs committed under merkle roots.

use std::collections::BTreeMap;

use ethers::types::{Address, I256, U256};
use serde::{Deserialize, Serialize};

use crate::ChainId;

/// Signed net obligation between the hub and each chain, per L1 token.
/// Positive means the hub owes the spoke.
pub type RunningBalances = BTreeMap<ChainId, BTreeMap<Address, I256>>;

/// Accumulated LP fees per repayment chain and L1 token.
pub type RealizedLpFees = BTreeMap<ChainId, BTreeMap<Address, U256>>;

/// Inclusive per-chain block range evaluated by one bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlockRange {
    pub chain_id: ChainId,
    pub start_block: u64,
    pub end_block: u64,
}

/// Latest executed running balance for one `(chain, l1 token)` slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenRunningBalance {
    pub running_balance: I256,
    pub incentive_balance: I256,
}

/// Aggregate of the fast fills repaid on one chain in one L2 token.
/// `refunds` carries the per-relayer breakdown for refund leaves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FillAggregate {
    pub total_refund_amount: U256,
    pub realized_lp_fees: U256,
    pub refunds: BTreeMap<Address, U256>,
}

/// A deposit-shaped record as classified upstream. The same struct
/// feeds the slow-fill, unexecutable-slow-fill, deposit, and expired
/// passes; each pass reads the fields relevant to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettlementDeposit {
    pub depositor: Address,
    pub origin_chain_id: ChainId,
    pub destination_chain_id: ChainId,
    pub input_token: Address,
    pub output_token: Address,
    pub input_amount: U256,
    /// Realized LP fee percentage, 1e18 fixed point.
    pub lp_fee_pct: U256,
    pub quote_timestamp: u64,
}

/// Already-classified settlement data for one bundle's block ranges.
/// Fast fills are keyed by repayment chain then repayment L2 token;
/// the deposit lists are keyed by destination chain (slow fills) or
/// origin chain (deposits, expired deposits).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleInputs {
    pub fast_fills: BTreeMap<ChainId, BTreeMap<Address, FillAggregate>>,
    pub slow_fills: BTreeMap<ChainId, Vec<SettlementDeposit>>,
    pub unexecutable_slow_fills: BTreeMap<ChainId, Vec<SettlementDeposit>>,
    pub deposits: BTreeMap<ChainId, Vec<SettlementDeposit>>,
    pub expired_deposits: BTreeMap<ChainId, Vec<SettlementDeposit>>,
}

/// One chain's settlement instruction within a pool-rebalance root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRebalanceLeaf {
    pub chain_id: ChainId,
    pub group_index: u32,
    pub leaf_id: u32,
    pub l1_tokens: Vec<Address>,
    pub bundle_lp_fees: Vec<U256>,
    pub net_send_amounts: Vec<I256>,
    pub running_balances: Vec<I256>,
}

impl PoolRebalanceLeaf {
    /// Parallel-array invariant: fees and net sends match the token
    /// count; running balances match it or carry a 2x incentive half.
    pub fn arrays_aligned(&self) -> bool {
        let n = self.l1_tokens.len();
        self.bundle_lp_fees.len() == n
            && self.net_send_amounts.len() == n
            && (self.running_balances.len() == n || self.running_balances.len() == 2 * n)
    }
}

/// Per-relayer repayment instruction for one chain and L2 token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerRefundLeaf {
    pub amount_to_return: U256,
    pub chain_id: ChainId,
    pub refund_amounts: Vec<U256>,
    pub leaf_id: u32,
    pub l2_token_address: Address,
    pub refund_addresses: Vec<Address>,
}

impl RelayerRefundLeaf {
    pub fn arrays_aligned(&self) -> bool {
        self.refund_amounts.len() == self.refund_addresses.len()
    }
}
