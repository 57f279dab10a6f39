// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic leaf construction. Every ordering rule here is
//! consensus-critical: two parties reconstructing the same bundle must
//! byte-match, so chains ascend, token addresses ascend, refunds order
//! by amount descending with address as the tiebreak, and leaf ids are
//! assigned only after the full set is ordered.

use std::collections::{BTreeMap, BTreeSet};

use ethers::types::{Address, I256, U256};

use crosshub_types::settlement::{
    BundleInputs, PoolRebalanceLeaf, RealizedLpFees, RelayerRefundLeaf, RunningBalances,
};
use crosshub_types::{ChainId, SpokeTargetBalance};

use crate::bundle::balances::apply_transfer_policy;
use crate::hub_ledger::HubLedgerState;

/// Builds pool-rebalance leaves from carried running balances. Chains
/// with more tokens than `max_per_leaf` split into several leaves;
/// `group_index` restarts per chain while `leaf_id` is global.
/// Refunds-only chains with no balances at all get one zero-valued
/// leaf. Returns the leaves and the post-transfer running balances.
pub(crate) fn build_pool_rebalance_leaves<F>(
    running_balances: &RunningBalances,
    realized_lp_fees: &RealizedLpFees,
    refunds_only_chains: &BTreeSet<ChainId>,
    spoke_target: F,
    max_per_leaf: usize,
) -> (Vec<PoolRebalanceLeaf>, RunningBalances)
where
    F: Fn(Address, ChainId) -> SpokeTargetBalance,
{
    let max_per_leaf = max_per_leaf.max(1);
    let mut leaves: Vec<PoolRebalanceLeaf> = Vec::new();
    let mut remaining: RunningBalances = BTreeMap::new();

    let mut chains: BTreeSet<ChainId> = running_balances.keys().copied().collect();
    chains.extend(refunds_only_chains.iter().copied());

    for chain_id in chains {
        let by_token = running_balances
            .get(&chain_id)
            .filter(|tokens| !tokens.is_empty());
        let Some(by_token) = by_token else {
            leaves.push(PoolRebalanceLeaf {
                chain_id,
                group_index: 0,
                leaf_id: leaves.len() as u32,
                l1_tokens: Vec::new(),
                bundle_lp_fees: Vec::new(),
                net_send_amounts: Vec::new(),
                running_balances: Vec::new(),
            });
            continue;
        };

        let tokens: Vec<Address> = by_token.keys().copied().collect();
        let mut group_index = 0u32;
        for chunk in tokens.chunks(max_per_leaf) {
            let mut leaf = PoolRebalanceLeaf {
                chain_id,
                group_index,
                leaf_id: leaves.len() as u32,
                l1_tokens: chunk.to_vec(),
                bundle_lp_fees: Vec::with_capacity(chunk.len()),
                net_send_amounts: Vec::with_capacity(chunk.len()),
                running_balances: Vec::with_capacity(chunk.len()),
            };
            for token in chunk {
                let balance = by_token.get(token).copied().unwrap_or_default();
                let outcome = apply_transfer_policy(balance, &spoke_target(*token, chain_id));
                leaf.bundle_lp_fees.push(
                    realized_lp_fees
                        .get(&chain_id)
                        .and_then(|fees| fees.get(token))
                        .copied()
                        .unwrap_or_default(),
                );
                leaf.net_send_amounts.push(outcome.net_send_amount);
                leaf.running_balances.push(outcome.remaining_balance);
                remaining
                    .entry(chain_id)
                    .or_default()
                    .insert(*token, outcome.remaining_balance);
            }
            leaves.push(leaf);
            group_index += 1;
        }
    }

    (leaves, remaining)
}

/// Builds relayer-refund leaves for one bundle. Refunds come from fast
/// fills and expired deposits, keyed by `(repayment chain, L2 token)`.
/// `amount_to_return` mirrors the pool leaf's negative net send for
/// the token and is carried by the first chunk only; tokens with a
/// negative net send but no refunds still get an instruction leaf.
pub(crate) fn build_relayer_refund_leaves(
    inputs: &BundleInputs,
    pool_leaves: &[PoolRebalanceLeaf],
    ledger: &HubLedgerState,
    hub_block: u64,
    max_refund_count: usize,
) -> Vec<RelayerRefundLeaf> {
    let max_refund_count = max_refund_count.max(1);

    // (chain, l2 token) -> payee -> owed amount.
    let mut combined: BTreeMap<(ChainId, Address), BTreeMap<Address, U256>> = BTreeMap::new();
    for (&chain_id, by_token) in &inputs.fast_fills {
        for (&l2_token, aggregate) in by_token {
            let refunds = combined.entry((chain_id, l2_token)).or_default();
            for (&relayer, &amount) in &aggregate.refunds {
                *refunds.entry(relayer).or_default() += amount;
            }
        }
    }
    for (&chain_id, deposits) in &inputs.expired_deposits {
        for deposit in deposits {
            let refunds = combined.entry((chain_id, deposit.input_token)).or_default();
            *refunds.entry(deposit.depositor).or_default() += deposit.input_amount;
        }
    }

    // Provisional leaves keyed for the final global ordering.
    let mut keyed: Vec<((ChainId, Address, u32), RelayerRefundLeaf)> = Vec::new();
    for ((chain_id, l2_token), refunds) in &combined {
        let mut entries: Vec<(Address, U256)> =
            refunds.iter().map(|(payee, amount)| (*payee, *amount)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let amount_to_return = ledger
            .l1_token_for_l2(*l2_token, *chain_id, hub_block)
            .map(|l1_token| amount_to_return_for(pool_leaves, *chain_id, l1_token))
            .unwrap_or_default();

        for (chunk_index, chunk) in entries.chunks(max_refund_count).enumerate() {
            keyed.push((
                (*chain_id, *l2_token, chunk_index as u32),
                RelayerRefundLeaf {
                    amount_to_return: if chunk_index == 0 {
                        amount_to_return
                    } else {
                        U256::zero()
                    },
                    chain_id: *chain_id,
                    refund_amounts: chunk.iter().map(|(_, amount)| *amount).collect(),
                    leaf_id: 0,
                    l2_token_address: *l2_token,
                    refund_addresses: chunk.iter().map(|(payee, _)| *payee).collect(),
                },
            ));
        }
    }

    // Tokens the spoke must return funds for even though no relayer is
    // owed anything this bundle.
    for leaf in pool_leaves {
        for (index, l1_token) in leaf.l1_tokens.iter().enumerate() {
            let net_send = leaf.net_send_amounts.get(index).copied().unwrap_or_default();
            if net_send >= I256::zero() {
                continue;
            }
            let Ok(l2_token) = ledger.l2_token_for_l1(*l1_token, leaf.chain_id, hub_block) else {
                continue;
            };
            if combined.contains_key(&(leaf.chain_id, l2_token)) {
                continue;
            }
            keyed.push((
                (leaf.chain_id, l2_token, 0),
                RelayerRefundLeaf {
                    amount_to_return: net_send.unsigned_abs(),
                    chain_id: leaf.chain_id,
                    refund_amounts: Vec::new(),
                    leaf_id: 0,
                    l2_token_address: l2_token,
                    refund_addresses: Vec::new(),
                },
            ));
        }
    }

    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed
        .into_iter()
        .enumerate()
        .map(|(index, (_, mut leaf))| {
            leaf.leaf_id = index as u32;
            leaf
        })
        .collect()
}

fn amount_to_return_for(
    pool_leaves: &[PoolRebalanceLeaf],
    chain_id: ChainId,
    l1_token: Address,
) -> U256 {
    let net_send = pool_leaves
        .iter()
        .filter(|leaf| leaf.chain_id == chain_id)
        .find_map(|leaf| {
            leaf.l1_tokens
                .iter()
                .position(|token| *token == l1_token)
                .and_then(|index| leaf.net_send_amounts.get(index))
                .copied()
        })
        .unwrap_or_default();
    if net_send < I256::zero() {
        net_send.unsigned_abs()
    } else {
        U256::zero()
    }
}
