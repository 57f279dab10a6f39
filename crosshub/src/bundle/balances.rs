// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Running-balance accumulation over classified bundle inputs, and the
//! transfer-threshold policy that turns an accumulated balance into a
//! net send amount.

use std::collections::BTreeSet;

use ethers::types::{Address, I256, U256};

use crosshub_types::settlement::{BundleInputs, RunningBalances};
use crosshub_types::{fixed_point_one, mul_div, ChainId, SpokeTargetBalance};

use crate::hub_ledger::HubLedgerState;

/// Balances and fee credits accumulated from one set of bundle inputs,
/// before prior-bundle carry-forward.
#[derive(Debug, Default)]
pub(crate) struct AccumulatedBalances {
    pub running_balances: RunningBalances,
    pub realized_lp_fees: crosshub_types::settlement::RealizedLpFees,
    /// Chains owed relayer refunds in a token with no pool-rebalance
    /// route. They get a zero-valued pool leaf so the refunds can still
    /// execute against the spoke's own balance.
    pub refunds_only_chains: BTreeSet<ChainId>,
}

/// Folds classified fills and deposits into per-`(chain, L1 token)`
/// running-balance deltas. Route resolution is pinned to `hub_block`.
pub(crate) fn accumulate_bundle_balances(
    inputs: &BundleInputs,
    ledger: &HubLedgerState,
    hub_block: u64,
) -> AccumulatedBalances {
    let mut acc = AccumulatedBalances::default();

    // Fast fills: the refunded relayers are owed the deposit minus the
    // LP fee, and the pool books the fee.
    for (&chain_id, by_token) in &inputs.fast_fills {
        for (&l2_token, aggregate) in by_token {
            match ledger.l1_token_for_l2(l2_token, chain_id, hub_block) {
                Ok(l1_token) => {
                    credit(
                        &mut acc.running_balances,
                        chain_id,
                        l1_token,
                        as_signed(aggregate.total_refund_amount),
                    );
                    let fees = acc
                        .realized_lp_fees
                        .entry(chain_id)
                        .or_default()
                        .entry(l1_token)
                        .or_default();
                    *fees += aggregate.realized_lp_fees;
                }
                Err(_) => {
                    acc.refunds_only_chains.insert(chain_id);
                }
            }
        }
    }

    // Slow fills: the destination spoke will pay the depositor the
    // amount net of the LP fee, so that much is earmarked there. No fee
    // is booked until a fill actually happens.
    for (&chain_id, deposits) in &inputs.slow_fills {
        for deposit in deposits {
            let Ok(l1_token) =
                ledger.l1_token_for_l2(deposit.input_token, deposit.origin_chain_id, hub_block)
            else {
                continue;
            };
            let net = as_signed(deposit.input_amount) - as_signed(lp_fee_amount(deposit));
            credit(&mut acc.running_balances, chain_id, l1_token, net);
        }
    }

    // Slow fills replaced by a fast fill before execution: reverse the
    // earmark from the bundle that scheduled them.
    for (&chain_id, deposits) in &inputs.unexecutable_slow_fills {
        for deposit in deposits {
            let Ok(l1_token) =
                ledger.l1_token_for_l2(deposit.input_token, deposit.origin_chain_id, hub_block)
            else {
                continue;
            };
            let net = as_signed(lp_fee_amount(deposit)) - as_signed(deposit.input_amount);
            credit(&mut acc.running_balances, chain_id, l1_token, net);
        }
    }

    // Deposits drain the origin spoke. Tokens with no rebalance route
    // never reach the pool and are left out entirely.
    for (&chain_id, deposits) in &inputs.deposits {
        for deposit in deposits {
            if let Ok(l1_token) = ledger.l1_token_for_l2(deposit.input_token, chain_id, hub_block)
            {
                credit(
                    &mut acc.running_balances,
                    chain_id,
                    l1_token,
                    -as_signed(deposit.input_amount),
                );
            }
        }
    }

    // Expired deposits are refunded in full to the depositor on the
    // origin chain.
    for (&chain_id, deposits) in &inputs.expired_deposits {
        for deposit in deposits {
            match ledger.l1_token_for_l2(deposit.input_token, chain_id, hub_block) {
                Ok(l1_token) => credit(
                    &mut acc.running_balances,
                    chain_id,
                    l1_token,
                    as_signed(deposit.input_amount),
                ),
                Err(_) => {
                    acc.refunds_only_chains.insert(chain_id);
                }
            }
        }
    }

    acc
}

/// Net send amount and leaf running balance for one accumulated
/// balance under a spoke's `{target, threshold}` policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetSendOutcome {
    pub net_send_amount: I256,
    pub remaining_balance: I256,
}

/// A surplus is always swept back to the hub. A deficit is funded only
/// once it reaches `threshold`, and then only down to `target`, so
/// small imbalances never trigger a canonical-bridge transfer.
pub fn apply_transfer_policy(
    running_balance: I256,
    policy: &SpokeTargetBalance,
) -> NetSendOutcome {
    if running_balance >= I256::zero() {
        return NetSendOutcome {
            net_send_amount: running_balance,
            remaining_balance: I256::zero(),
        };
    }
    let deficit = running_balance.unsigned_abs();
    if deficit < policy.threshold {
        return NetSendOutcome {
            net_send_amount: I256::zero(),
            remaining_balance: running_balance,
        };
    }
    let transfer_size = deficit.saturating_sub(policy.target);
    let net_send_amount = -as_signed(transfer_size);
    NetSendOutcome {
        net_send_amount,
        remaining_balance: running_balance - net_send_amount,
    }
}

pub(crate) fn lp_fee_amount(deposit: &crosshub_types::settlement::SettlementDeposit) -> U256 {
    mul_div(deposit.input_amount, deposit.lp_fee_pct, fixed_point_one())
}

pub(crate) fn credit(
    balances: &mut RunningBalances,
    chain_id: ChainId,
    l1_token: Address,
    delta: I256,
) {
    let entry = balances
        .entry(chain_id)
        .or_default()
        .entry(l1_token)
        .or_default();
    *entry += delta;
}

/// Amounts are bounded well below `I256::MAX` by token supplies.
pub(crate) fn as_signed(value: U256) -> I256 {
    I256::from_raw(value)
}
