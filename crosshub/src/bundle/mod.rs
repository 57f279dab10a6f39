// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bundle aggregation: classified settlement activity folds into
//! per-`(chain, L1 token)` running balances, prior-bundle balances are
//! carried forward (re-deriving the pending proposal's own root when
//! its balances exist nowhere on-chain yet), and the result commits as
//! bounded-size leaves under a Keccak-256 merkle root.

mod balances;
mod leaves;

use std::sync::Arc;

use ethers::types::H256;
use futures::future::BoxFuture;
use tracing::{debug, info};

use crosshub_types::settlement::{
    BundleInputs, ChainBlockRange, PoolRebalanceLeaf, RealizedLpFees, RelayerRefundLeaf,
    RunningBalances,
};

use crate::bundle::balances::accumulate_bundle_balances;
use crate::bundle::leaves::{build_pool_rebalance_leaves, build_relayer_refund_leaves};
use crate::error::{BundleError, BundleResult};
use crate::hub_ledger::HubLedgerState;
use crate::merkle::{build_pool_rebalance_tree, build_relayer_refund_tree, MerkleTree};
use crate::metrics::EngineMetrics;
use crate::settings::BundleSettings;
use crate::sources::BundleInputProvider;
use crate::sync::StateIndexer;

pub use balances::{apply_transfer_policy, NetSendOutcome};

/// A fully built pool-rebalance commitment.
#[derive(Clone, Debug)]
pub struct PoolRebalanceRoot {
    /// Post-transfer balances per `(chain, L1 token)`, exactly what an
    /// executed leaf would record on-chain.
    pub running_balances: RunningBalances,
    pub realized_lp_fees: RealizedLpFees,
    pub leaves: Vec<PoolRebalanceLeaf>,
    pub tree: MerkleTree,
}

impl PoolRebalanceRoot {
    pub fn root(&self) -> H256 {
        self.tree.root()
    }
}

/// A fully built relayer-refund commitment.
#[derive(Clone, Debug)]
pub struct RelayerRefundRoot {
    pub leaves: Vec<RelayerRefundLeaf>,
    pub tree: MerkleTree,
}

impl RelayerRefundRoot {
    pub fn root(&self) -> H256 {
        self.tree.root()
    }
}

/// Builds settlement roots from classified bundle inputs and the
/// reconstructed hub state.
pub struct BundleAggregator {
    input_provider: Arc<dyn BundleInputProvider>,
    settings: BundleSettings,
    metrics: Arc<EngineMetrics>,
}

impl BundleAggregator {
    pub fn new(
        input_provider: Arc<dyn BundleInputProvider>,
        settings: BundleSettings,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            input_provider,
            settings,
            metrics,
        }
    }

    /// Builds the pool-rebalance root for the bundle covering `ranges`.
    /// `inputs` must be the upstream classification of settlement
    /// activity inside exactly those ranges; `max_l1_tokens_per_leaf`
    /// falls back to `MAX_POOL_REBALANCE_LEAF_SIZE` from the config
    /// store when `None`.
    pub async fn build_pool_rebalance_root(
        &self,
        ledger: &HubLedgerState,
        ranges: &[ChainBlockRange],
        inputs: &BundleInputs,
        max_l1_tokens_per_leaf: Option<usize>,
    ) -> BundleResult<PoolRebalanceRoot> {
        self.metrics.bundle_builds.inc();
        let root = self
            .reconstruct(ledger, ranges, inputs, max_l1_tokens_per_leaf, 0)
            .await?;
        info!(
            "[BundleAggregator] Built pool rebalance root {:?} with {} leaves at hub block {}",
            root.root(),
            root.leaves.len(),
            hub_end_block(ledger, ranges)
        );
        Ok(root)
    }

    /// Builds the relayer-refund root matching `pool_leaves`.
    /// `max_refund_count` falls back to `MAX_RELAYER_REPAYMENT_LEAF_SIZE`
    /// from the config store when `None`.
    pub async fn build_relayer_refund_root(
        &self,
        ledger: &HubLedgerState,
        ranges: &[ChainBlockRange],
        inputs: &BundleInputs,
        pool_leaves: &[PoolRebalanceLeaf],
        max_refund_count: Option<usize>,
    ) -> BundleResult<RelayerRefundRoot> {
        let hub_block = hub_end_block(ledger, ranges);
        let max_refund_count = match max_refund_count {
            Some(count) => count,
            None => {
                let config = ledger.config_store().read().await;
                config.max_refund_count_for_block(hub_block)? as usize
            }
        };
        let leaves =
            build_relayer_refund_leaves(inputs, pool_leaves, ledger, hub_block, max_refund_count);
        let tree = build_relayer_refund_tree(&leaves)?;
        info!(
            "[BundleAggregator] Built relayer refund root {:?} with {} leaves at hub block {}",
            tree.root(),
            leaves.len(),
            hub_block
        );
        Ok(RelayerRefundRoot { leaves, tree })
    }

    /// One build level. `depth` is 0 for the requested bundle and grows
    /// by one per pending-proposal rebuild; the settings bound caps it
    /// so corrupted on-chain state cannot recurse forever.
    fn reconstruct<'a>(
        &'a self,
        ledger: &'a HubLedgerState,
        ranges: &'a [ChainBlockRange],
        inputs: &'a BundleInputs,
        max_l1_tokens_per_leaf: Option<usize>,
        depth: u32,
    ) -> BoxFuture<'a, BundleResult<PoolRebalanceRoot>> {
        Box::pin(async move {
            let hub_block = hub_end_block(ledger, ranges);
            let mut acc = accumulate_bundle_balances(inputs, ledger, hub_block);

            // Prior balances. When the last executed running balances
            // are authoritative for this bundle they are added per
            // accumulated key; building past an unevaluated pending
            // proposal first re-derives that proposal's root one bundle
            // range earlier.
            let previous = match pending_ranges_to_rebuild(ledger, hub_block).await {
                Some(previous_ranges) => {
                    if depth >= self.settings.max_reconstruction_depth {
                        return Err(BundleError::RecursionDepthExceeded(
                            self.settings.max_reconstruction_depth,
                        ));
                    }
                    debug!(
                        "[BundleAggregator] Rebuilding the pending proposal at depth {} to \
                         settle hub block {}",
                        depth + 1,
                        hub_block
                    );
                    self.metrics
                        .bundle_reconstruction_depth
                        .with_label_values(&[&(depth + 1).to_string()])
                        .inc();
                    let previous_inputs =
                        self.input_provider.bundle_inputs(&previous_ranges).await?;
                    Some(
                        self.reconstruct(
                            ledger,
                            &previous_ranges,
                            &previous_inputs,
                            max_l1_tokens_per_leaf,
                            depth + 1,
                        )
                        .await?,
                    )
                }
                None => None,
            };

            for (chain_id, by_token) in &mut acc.running_balances {
                for (l1_token, balance) in by_token.iter_mut() {
                    let last_executed = || {
                        ledger
                            .running_balance_before_block(hub_block, *chain_id, *l1_token)
                            .running_balance
                    };
                    *balance += match &previous {
                        // Keys the rebuilt bundle never touched fall
                        // back to their executed value.
                        Some(root) => root
                            .running_balances
                            .get(chain_id)
                            .and_then(|tokens| tokens.get(l1_token))
                            .copied()
                            .unwrap_or_else(last_executed),
                        None => last_executed(),
                    };
                }
            }

            let config = ledger.config_store().read().await;
            let max_per_leaf = match max_l1_tokens_per_leaf {
                Some(count) => count,
                None => config.max_l1_token_count_for_block(hub_block)? as usize,
            };
            let (leaves, remaining) = build_pool_rebalance_leaves(
                &acc.running_balances,
                &acc.realized_lp_fees,
                &acc.refunds_only_chains,
                |l1_token, chain_id| {
                    config.spoke_target_balances_for_block(l1_token, chain_id, hub_block)
                },
                max_per_leaf,
            );
            drop(config);

            let tree = build_pool_rebalance_tree(&leaves)?;
            Ok(PoolRebalanceRoot {
                running_balances: remaining,
                realized_lp_fees: acc.realized_lp_fees,
                leaves,
                tree,
            })
        })
    }
}

/// Hub-chain end block anchoring route, config and carry-forward
/// resolution for one bundle. Ranges that skip the hub chain anchor at
/// the widest end block instead.
fn hub_end_block(ledger: &HubLedgerState, ranges: &[ChainBlockRange]) -> u64 {
    ranges
        .iter()
        .find(|range| range.chain_id == ledger.hub_chain_id())
        .map(|range| range.end_block)
        .unwrap_or_else(|| {
            ranges
                .iter()
                .map(|range| range.end_block)
                .max()
                .unwrap_or_default()
        })
}

/// The pending proposal's implied ranges when the bundle ending at
/// `hub_block` builds on balances that exist only inside that
/// proposal's unexecuted root. `None` whenever executed balances are
/// authoritative instead: no proposal is pending, the build target is
/// the pending proposal itself, or the target matches a bundle already
/// validated on-chain.
async fn pending_ranges_to_rebuild(
    ledger: &HubLedgerState,
    hub_block: u64,
) -> Option<Vec<ChainBlockRange>> {
    let pending = ledger.pending_root_bundle()?;
    let proposal = ledger
        .proposed_root_bundles()
        .iter()
        .rev()
        .find(|candidate| candidate.block_number() == pending.proposal_block_number)?;

    let config = ledger.config_store().read().await;
    let pending_chains = config.chain_id_indices_for_block(pending.proposal_block_number);
    let pending_hub_end =
        ledger.bundle_end_block_for_chain(&proposal.value, ledger.hub_chain_id(), &pending_chains);
    if pending_hub_end == hub_block {
        return None;
    }
    let latest = ledger.latest_block_searched();
    let rebuilds_validated_bundle = ledger.proposed_root_bundles().iter().any(|candidate| {
        let chains = config.chain_id_indices_for_block(candidate.block_number());
        ledger.bundle_end_block_for_chain(&candidate.value, ledger.hub_chain_id(), &chains)
            == hub_block
            && ledger.is_root_bundle_valid(candidate, latest)
    });
    if rebuilds_validated_bundle {
        return None;
    }
    Some(ledger.implied_bundle_ranges(proposal, &pending_chains))
}
