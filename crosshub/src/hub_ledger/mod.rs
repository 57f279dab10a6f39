// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hub-pool ledger reconstruction: the token-route graph, the L1 token
//! registry, and the root-bundle proposal/dispute/execution state
//! machine.
//!
//! Queries that need the chain-index list take it as an argument; the
//! shared config-store handle is only consulted by the async fee path.
//! Validity of a proposal is always judged against an explicit horizon
//! block so historical questions stay answerable.

pub mod fees;

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::Address;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crosshub_types::events::{
    latest_at_or_before, sort_events_ascending, CancelledRootBundle, DisputedRootBundle,
    EventRecord, ExecutedRootBundleLeaf, PendingRootBundle, ProposedRootBundle,
};
use crosshub_types::settlement::{ChainBlockRange, TokenRunningBalance};
use crosshub_types::ChainId;

use crate::config_store::ConfigStoreState;
use crate::error::{IngestResult, LookupError, LookupResult};
use crate::metrics::EngineMetrics;
use crate::settings::LedgerSettings;
use crate::sources::{HubEventBatch, HubPoolEventSource};
use crate::sync::{StateIndexer, SyncCursor};

const COMPONENT: &str = "hub_ledger";

/// Shared, serialized-writer handle to the config store.
pub type SharedConfigStore = Arc<RwLock<ConfigStoreState>>;

/// One registered cross-chain deployment for a satellite chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CrossChainContracts {
    pub adapter: Address,
    pub spoke_pool: Address,
}

/// Reconstructed hub-pool state.
pub struct HubLedgerState {
    source: Arc<dyn HubPoolEventSource>,
    config_store: SharedConfigStore,
    settings: LedgerSettings,
    metrics: Arc<EngineMetrics>,
    cursor: SyncCursor,

    // l1 token -> destination chain -> dated destination-token entries.
    routes: HashMap<Address, HashMap<ChainId, Vec<EventRecord<Address>>>>,
    cross_chain_contracts: HashMap<ChainId, Vec<EventRecord<CrossChainContracts>>>,
    l1_tokens: Vec<Address>,

    proposals: Vec<EventRecord<ProposedRootBundle>>,
    disputes: Vec<EventRecord<DisputedRootBundle>>,
    cancellations: Vec<EventRecord<CancelledRootBundle>>,
    executions: Vec<EventRecord<ExecutedRootBundleLeaf>>,
    pending_bundle: Option<PendingRootBundle>,
}

impl HubLedgerState {
    pub fn new(
        source: Arc<dyn HubPoolEventSource>,
        config_store: SharedConfigStore,
        settings: LedgerSettings,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let cursor = SyncCursor::new(settings.deployment_block);
        Self {
            source,
            config_store,
            settings,
            metrics,
            cursor,
            routes: HashMap::new(),
            cross_chain_contracts: HashMap::new(),
            l1_tokens: Vec::new(),
            proposals: Vec::new(),
            disputes: Vec::new(),
            cancellations: Vec::new(),
            executions: Vec::new(),
            pending_bundle: None,
        }
    }

    pub fn hub_chain_id(&self) -> ChainId {
        self.settings.hub_chain_id
    }

    pub fn config_store(&self) -> &SharedConfigStore {
        &self.config_store
    }

    /// Folds one fetched batch into state. Execution events are
    /// sanitized first so a malformed balance array aborts the batch
    /// before anything is committed.
    pub fn apply(&mut self, batch: HubEventBatch) -> IngestResult<()> {
        let HubEventBatch {
            mut route_updates,
            mut cross_chain_contracts,
            mut l1_tokens_enabled,
            mut proposals,
            mut disputes,
            mut cancellations,
            mut executions,
        } = batch;
        sort_events_ascending(&mut route_updates);
        sort_events_ascending(&mut cross_chain_contracts);
        sort_events_ascending(&mut l1_tokens_enabled);
        sort_events_ascending(&mut proposals);
        sort_events_ascending(&mut disputes);
        sort_events_ascending(&mut cancellations);
        sort_events_ascending(&mut executions);

        let mut sanitized = Vec::with_capacity(executions.len());
        for record in executions {
            let meta = record.meta;
            let leaf = ExecutedRootBundleLeaf::try_from(record.value)?;
            sanitized.push(EventRecord::new(meta, leaf));
        }

        for record in route_updates {
            self.routes
                .entry(record.value.l1_token)
                .or_default()
                .entry(record.value.destination_chain_id)
                .or_default()
                .push(EventRecord::new(record.meta, record.value.destination_token));
            self.applied("route");
        }
        for record in cross_chain_contracts {
            self.cross_chain_contracts
                .entry(record.value.l2_chain_id)
                .or_default()
                .push(EventRecord::new(
                    record.meta,
                    CrossChainContracts {
                        adapter: record.value.adapter,
                        spoke_pool: record.value.spoke_pool,
                    },
                ));
            self.applied("cross_chain_contracts");
        }
        for record in l1_tokens_enabled {
            if !self.l1_tokens.contains(&record.value.l1_token) {
                self.l1_tokens.push(record.value.l1_token);
            }
            self.applied("l1_token_enabled");
        }
        for record in proposals {
            self.proposals.push(record);
            self.applied("proposal");
        }
        for record in disputes {
            self.disputes.push(record);
            self.applied("dispute");
        }
        for record in cancellations {
            self.cancellations.push(record);
            self.applied("cancellation");
        }
        for record in sanitized {
            self.executions.push(record);
            self.applied("execution");
        }
        Ok(())
    }

    fn applied(&self, kind: &str) {
        self.metrics
            .events_applied
            .with_label_values(&[COMPONENT, kind])
            .inc();
    }

    /// L2 counterpart of `l1_token` on `chain_id` as of `block`.
    pub fn l2_token_for_l1(
        &self,
        l1_token: Address,
        chain_id: ChainId,
        block: u64,
    ) -> LookupResult<Address> {
        self.routes
            .get(&l1_token)
            .and_then(|by_chain| by_chain.get(&chain_id))
            .and_then(|updates| latest_at_or_before(updates, block))
            .map(|record| record.value)
            .ok_or(LookupError::RouteNotFound {
                token: l1_token,
                chain_id,
                block,
            })
    }

    /// L1 token whose route maps to `l2_token` on `chain_id` as of
    /// `block`. Ambiguity across L1 tokens resolves to the mapping set
    /// most recently.
    pub fn l1_token_for_l2(
        &self,
        l2_token: Address,
        chain_id: ChainId,
        block: u64,
    ) -> LookupResult<Address> {
        let mut best: Option<(crosshub_types::EventOrdinal, Address)> = None;
        for (l1_token, by_chain) in &self.routes {
            let Some(updates) = by_chain.get(&chain_id) else {
                continue;
            };
            let newest_match = updates
                .iter()
                .rev()
                .find(|record| record.block_number() <= block && record.value == l2_token);
            if let Some(record) = newest_match {
                let ordinal = record.ordinal();
                if best.map_or(true, |(current, _)| ordinal > current) {
                    best = Some((ordinal, *l1_token));
                }
            }
        }
        best.map(|(_, l1_token)| l1_token)
            .ok_or(LookupError::RouteNotFound {
                token: l2_token,
                chain_id,
                block,
            })
    }

    /// Whether a pool-rebalance route maps `l2_token` on `chain_id`
    /// back to any L1 token as of `block`.
    pub fn has_route_for_l2(&self, l2_token: Address, chain_id: ChainId, block: u64) -> bool {
        self.l1_token_for_l2(l2_token, chain_id, block).is_ok()
    }

    /// Spoke pool deployed for `chain_id` as of `block`.
    pub fn spoke_pool_for_chain(&self, chain_id: ChainId, block: u64) -> LookupResult<Address> {
        self.cross_chain_contracts
            .get(&chain_id)
            .and_then(|updates| latest_at_or_before(updates, block))
            .map(|record| record.value.spoke_pool)
            .ok_or(LookupError::SpokePoolNotFound { chain_id, block })
    }

    /// Tokens ever enabled for liquidity provision, in first-seen order.
    pub fn l1_tokens(&self) -> &[Address] {
        &self.l1_tokens
    }

    pub fn proposed_root_bundles(&self) -> &[EventRecord<ProposedRootBundle>] {
        &self.proposals
    }

    pub fn executed_root_bundles(&self) -> &[EventRecord<ExecutedRootBundleLeaf>] {
        &self.executions
    }

    pub fn proposed_root_bundles_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Vec<&EventRecord<ProposedRootBundle>> {
        in_block_range(&self.proposals, from_block, to_block)
    }

    pub fn disputed_root_bundles_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Vec<&EventRecord<DisputedRootBundle>> {
        in_block_range(&self.disputes, from_block, to_block)
    }

    pub fn cancelled_root_bundles_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Vec<&EventRecord<CancelledRootBundle>> {
        in_block_range(&self.cancellations, from_block, to_block)
    }

    /// Executed leaves whose block lies in `[from_block, to_block]`.
    pub fn executed_leaves_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Vec<&EventRecord<ExecutedRootBundleLeaf>> {
        in_block_range(&self.executions, from_block, to_block)
    }

    /// The live pending proposal, present only while it has unclaimed
    /// leaves. Derived on each `update()` pass.
    pub fn pending_root_bundle(&self) -> Option<&PendingRootBundle> {
        self.pending_bundle.as_ref()
    }

    fn following_proposal(
        &self,
        proposal: &EventRecord<ProposedRootBundle>,
    ) -> Option<&EventRecord<ProposedRootBundle>> {
        self.proposals
            .iter()
            .find(|candidate| candidate.ordinal() > proposal.ordinal())
    }

    /// A proposal is fully executed iff it was never disputed or
    /// cancelled inside its window and the number of leaf executions
    /// strictly after its proposal block, up to the window horizon,
    /// matches its leaf count. The strict inequality is load-bearing:
    /// an execution can never share a block with its own proposal.
    pub fn is_root_bundle_valid(
        &self,
        proposal: &EventRecord<ProposedRootBundle>,
        latest_block: u64,
    ) -> bool {
        let horizon = match self.following_proposal(proposal) {
            Some(next) => next.block_number().min(latest_block),
            None => latest_block,
        };
        let challenged = self
            .disputes
            .iter()
            .map(EventRecord::ordinal)
            .chain(self.cancellations.iter().map(EventRecord::ordinal))
            .any(|ordinal| ordinal > proposal.ordinal() && ordinal.block_number <= horizon);
        if challenged {
            return false;
        }
        let executed = self
            .executions
            .iter()
            .filter(|record| {
                record.block_number() > proposal.block_number()
                    && record.block_number() <= horizon
            })
            .count();
        executed == proposal.value.pool_rebalance_leaf_count as usize
    }

    /// Newest fully executed proposal at or before `latest_block`.
    pub fn latest_fully_executed_root_bundle(
        &self,
        latest_block: u64,
    ) -> Option<&EventRecord<ProposedRootBundle>> {
        self.proposals.iter().rev().find(|proposal| {
            proposal.block_number() <= latest_block
                && self.is_root_bundle_valid(proposal, latest_block)
        })
    }

    /// Oldest fully executed proposal at or after `start_block`.
    pub fn earliest_fully_executed_root_bundle(
        &self,
        latest_block: u64,
        start_block: u64,
    ) -> Option<&EventRecord<ProposedRootBundle>> {
        self.proposals.iter().find(|proposal| {
            proposal.block_number() >= start_block
                && self.is_root_bundle_valid(proposal, latest_block)
        })
    }

    /// Nth fully executed proposal: negative `n` walks back from the
    /// latest, positive walks forward from the earliest, narrowing the
    /// search window by one found bundle per step.
    pub fn nth_fully_executed_root_bundle(
        &self,
        n: i64,
        start_block: Option<u64>,
        latest_block: u64,
    ) -> LookupResult<Option<&EventRecord<ProposedRootBundle>>> {
        if n == 0 {
            return Err(LookupError::InvalidArgument(
                "bundle offset n cannot be 0".to_string(),
            ));
        }
        let mut found = None;
        if n < 0 {
            let mut horizon = start_block.unwrap_or(latest_block);
            for _ in 0..n.unsigned_abs() {
                found = self.latest_fully_executed_root_bundle(horizon);
                let block = found.map_or(0, EventRecord::block_number);
                horizon = block.saturating_sub(1);
            }
        } else {
            let mut start = start_block.unwrap_or(0);
            for _ in 0..n {
                found = self.earliest_fully_executed_root_bundle(latest_block, start);
                let block = found.map_or(0, EventRecord::block_number);
                start = block + 1;
            }
        }
        Ok(found)
    }

    /// Last executed running balance for `(chain_id, l1_token)` at or
    /// before `block`; zeros when no execution mentions the pair.
    pub fn running_balance_before_block(
        &self,
        block: u64,
        chain_id: ChainId,
        l1_token: Address,
    ) -> TokenRunningBalance {
        self.executions
            .iter()
            .rev()
            .find(|record| {
                record.block_number() <= block
                    && record.value.chain_id == chain_id
                    && record.value.l1_tokens.contains(&l1_token)
            })
            .and_then(|record| {
                let index = record
                    .value
                    .l1_tokens
                    .iter()
                    .position(|token| *token == l1_token)?;
                Some(TokenRunningBalance {
                    running_balance: record.value.running_balances.get(index).copied()?,
                    incentive_balance: record
                        .value
                        .incentive_balances
                        .get(index)
                        .copied()
                        .unwrap_or_default(),
                })
            })
            .unwrap_or_default()
    }

    /// End block a proposal evaluated `chain_id` through. Zero when the
    /// chain is absent from the index list or the proposal predates the
    /// chain's slot.
    pub fn bundle_end_block_for_chain(
        &self,
        proposal: &ProposedRootBundle,
        chain_id: ChainId,
        chain_id_list: &[ChainId],
    ) -> u64 {
        chain_id_list
            .iter()
            .position(|candidate| *candidate == chain_id)
            .and_then(|index| proposal.bundle_evaluation_block_numbers.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// First block the next bundle must evaluate for `chain_id`: one
    /// past the latest fully executed bundle's end block, or zero when
    /// no bundle has been fully executed yet.
    pub fn next_bundle_start_block(
        &self,
        chain_id_list: &[ChainId],
        latest_block: u64,
        chain_id: ChainId,
    ) -> u64 {
        match self.latest_fully_executed_root_bundle(latest_block) {
            Some(proposal) => {
                self.bundle_end_block_for_chain(&proposal.value, chain_id, chain_id_list) + 1
            }
            None => 0,
        }
    }

    /// Per-chain block ranges a proposal implies, pairing evaluation
    /// end blocks with the index list in force at the proposal. Slots
    /// past the list are dropped; a zero previous end block starts the
    /// range at zero.
    pub fn implied_bundle_ranges(
        &self,
        proposal: &EventRecord<ProposedRootBundle>,
        chain_id_list: &[ChainId],
    ) -> Vec<ChainBlockRange> {
        let previous = self.latest_fully_executed_root_bundle(proposal.block_number());
        proposal
            .value
            .bundle_evaluation_block_numbers
            .iter()
            .enumerate()
            .filter_map(|(index, end_block)| {
                let chain_id = *chain_id_list.get(index)?;
                let start_block = previous
                    .and_then(|prev| prev.value.bundle_evaluation_block_numbers.get(index))
                    .filter(|prev_end| **prev_end > 0)
                    .map(|prev_end| prev_end + 1)
                    .unwrap_or(0);
                Some(ChainBlockRange {
                    chain_id,
                    start_block,
                    end_block: *end_block,
                })
            })
            .collect()
    }
}

fn in_block_range<T>(
    events: &[EventRecord<T>],
    from_block: u64,
    to_block: u64,
) -> Vec<&EventRecord<T>> {
    events
        .iter()
        .filter(|record| record.block_number() >= from_block && record.block_number() <= to_block)
        .collect()
}

#[async_trait::async_trait]
impl StateIndexer for HubLedgerState {
    fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    async fn update(&mut self) -> IngestResult<()> {
        let _timer = self
            .metrics
            .update_duration_sec
            .with_label_values(&[COMPONENT])
            .start_timer();
        let latest_block = self.source.latest_block().await?;
        if let Some((from_block, to_block)) = self.cursor.search_range(latest_block) {
            info!(
                "[HubLedger] Searching hub pool events in blocks [{}, {}]",
                from_block, to_block
            );
            let batch = self.source.hub_events(from_block, to_block).await?;
            self.apply(batch)?;
            self.cursor.advance(to_block);
            self.metrics
                .last_block_searched
                .with_label_values(&[COMPONENT])
                .set(to_block as i64);
        } else {
            debug!(
                "[HubLedger] No new blocks past {}",
                self.cursor.latest_block_searched
            );
        }

        // The live proposal view changes as leaves execute, so it is
        // refreshed even when no new logs arrived. The read is paired
        // with the newest proposal event carrying the same three roots;
        // a live read no indexed proposal explains is tolerated until
        // the ingest cursor catches up.
        let live = self.source.pending_bundle().await?;
        self.pending_bundle = match live {
            Some(live) if live.unclaimed_pool_rebalance_leaf_count > 0 => {
                let matched = self.proposals.iter().rev().find(|proposal| {
                    proposal.value.pool_rebalance_root == live.pool_rebalance_root
                        && proposal.value.relayer_refund_root == live.relayer_refund_root
                        && proposal.value.slow_relay_root == live.slow_relay_root
                });
                if matched.is_none() {
                    warn!(
                        "[HubLedger] Live pending proposal {:?} matches no indexed proposal \
                         through block {}",
                        live.pool_rebalance_root, self.cursor.latest_block_searched
                    );
                }
                matched.map(|proposal| PendingRootBundle {
                    pool_rebalance_root: live.pool_rebalance_root,
                    relayer_refund_root: live.relayer_refund_root,
                    slow_relay_root: live.slow_relay_root,
                    proposer: live.proposer,
                    unclaimed_pool_rebalance_leaf_count: live.unclaimed_pool_rebalance_leaf_count,
                    challenge_period_end_timestamp: live.challenge_period_end_timestamp,
                    bundle_evaluation_block_numbers: proposal
                        .value
                        .bundle_evaluation_block_numbers
                        .clone(),
                    proposal_block_number: proposal.block_number(),
                })
            }
            _ => None,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::test_utils::{
        dispute_event, execution_event, live_pending_bundle, meta, proposal_event, route_event,
        shared_config_store, MockHubPoolEventSource,
    };
    use crosshub_types::events::RawExecutedRootBundle;
    use ethers::types::{H256, I256, U256};

    fn new_ledger() -> HubLedgerState {
        HubLedgerState::new(
            Arc::new(MockHubPoolEventSource::default()),
            shared_config_store(),
            LedgerSettings::default(),
            Arc::new(EngineMetrics::new_for_testing()),
        )
    }

    fn l1_usdc() -> Address {
        Address::repeat_byte(0x11)
    }

    fn l2_usdc() -> Address {
        Address::repeat_byte(0x22)
    }

    #[test]
    fn route_resolution_is_point_in_time_in_both_directions() {
        let mut ledger = new_ledger();
        let newer_l2 = Address::repeat_byte(0x33);
        ledger
            .apply(HubEventBatch {
                route_updates: vec![
                    route_event(100, l1_usdc(), 10, l2_usdc()),
                    route_event(200, l1_usdc(), 10, newer_l2),
                ],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(ledger.l2_token_for_l1(l1_usdc(), 10, 150).unwrap(), l2_usdc());
        assert_eq!(ledger.l2_token_for_l1(l1_usdc(), 10, 200).unwrap(), newer_l2);
        assert_eq!(ledger.l1_token_for_l2(l2_usdc(), 10, 150).unwrap(), l1_usdc());
        assert!(matches!(
            ledger.l2_token_for_l1(l1_usdc(), 10, 99),
            Err(LookupError::RouteNotFound { block: 99, .. })
        ));
        assert!(ledger.l2_token_for_l1(l1_usdc(), 137, 300).is_err());
        assert!(ledger.has_route_for_l2(l2_usdc(), 10, 150));
        assert!(!ledger.has_route_for_l2(l2_usdc(), 10, 99));
    }

    #[test]
    fn reverse_lookup_prefers_the_most_recent_mapping() {
        let mut ledger = new_ledger();
        let other_l1 = Address::repeat_byte(0x44);
        // Two L1 tokens have historically mapped to the same L2 token;
        // the newer mapping wins.
        ledger
            .apply(HubEventBatch {
                route_updates: vec![
                    route_event(100, l1_usdc(), 10, l2_usdc()),
                    route_event(150, other_l1, 10, l2_usdc()),
                ],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ledger.l1_token_for_l2(l2_usdc(), 10, 300).unwrap(), other_l1);
        // Before the newer mapping existed, the older one applies.
        assert_eq!(ledger.l1_token_for_l2(l2_usdc(), 10, 120).unwrap(), l1_usdc());
    }

    #[test]
    fn l1_token_registry_deduplicates() {
        let mut ledger = new_ledger();
        let batch = HubEventBatch {
            l1_tokens_enabled: vec![
                EventRecord::new(meta(100, 0, 0), crosshub_types::events::L1TokenEnabled {
                    l1_token: l1_usdc(),
                }),
                EventRecord::new(meta(120, 0, 0), crosshub_types::events::L1TokenEnabled {
                    l1_token: l1_usdc(),
                }),
            ],
            ..Default::default()
        };
        ledger.apply(batch).unwrap();
        assert_eq!(ledger.l1_tokens(), &[l1_usdc()]);
    }

    #[test]
    fn execution_sharing_the_proposal_block_does_not_count() {
        let mut ledger = new_ledger();
        ledger
            .apply(HubEventBatch {
                proposals: vec![proposal_event(100, 1, vec![500])],
                executions: vec![execution_event(100, 10, vec![(l1_usdc(), 5)])],
                ..Default::default()
            })
            .unwrap();
        let proposal = &ledger.proposed_root_bundles()[0];
        assert!(!ledger.is_root_bundle_valid(proposal, 1_000));

        // The same execution one block later completes the bundle.
        let mut ledger = new_ledger();
        ledger
            .apply(HubEventBatch {
                proposals: vec![proposal_event(100, 1, vec![500])],
                executions: vec![execution_event(101, 10, vec![(l1_usdc(), 5)])],
                ..Default::default()
            })
            .unwrap();
        let proposal = &ledger.proposed_root_bundles()[0];
        assert!(ledger.is_root_bundle_valid(proposal, 1_000));
    }

    #[test]
    fn disputes_and_partial_execution_invalidate() {
        let mut ledger = new_ledger();
        ledger
            .apply(HubEventBatch {
                proposals: vec![
                    proposal_event(100, 2, vec![500]),
                    proposal_event(300, 1, vec![600]),
                ],
                disputes: vec![dispute_event(310)],
                executions: vec![
                    execution_event(110, 10, vec![(l1_usdc(), 1)]),
                    execution_event(120, 137, vec![(l1_usdc(), 2)]),
                ],
                ..Default::default()
            })
            .unwrap();
        let first = &ledger.proposed_root_bundles()[0];
        let second = &ledger.proposed_root_bundles()[1];
        // First proposal: both leaves executed before the next proposal.
        assert!(ledger.is_root_bundle_valid(first, 1_000));
        // Second proposal was disputed inside its window.
        assert!(!ledger.is_root_bundle_valid(second, 1_000));
        // A dispute after the first proposal's window does not taint it.
        assert_eq!(
            ledger
                .latest_fully_executed_root_bundle(1_000)
                .map(EventRecord::block_number),
            Some(100)
        );
    }

    #[test]
    fn nth_bundle_walks_in_both_directions() {
        let mut ledger = new_ledger();
        ledger
            .apply(HubEventBatch {
                proposals: vec![
                    proposal_event(100, 1, vec![500]),
                    proposal_event(200, 1, vec![600]),
                    proposal_event(300, 1, vec![700]),
                ],
                executions: vec![
                    execution_event(110, 10, vec![(l1_usdc(), 1)]),
                    execution_event(210, 10, vec![(l1_usdc(), 2)]),
                    execution_event(310, 10, vec![(l1_usdc(), 3)]),
                ],
                ..Default::default()
            })
            .unwrap();

        let latest = 1_000;
        assert!(matches!(
            ledger.nth_fully_executed_root_bundle(0, None, latest),
            Err(LookupError::InvalidArgument(_))
        ));
        let nth = |n| {
            ledger
                .nth_fully_executed_root_bundle(n, None, latest)
                .unwrap()
                .map(EventRecord::block_number)
        };
        assert_eq!(nth(-1), Some(300));
        assert_eq!(nth(-2), Some(200));
        assert_eq!(nth(-3), Some(100));
        assert_eq!(nth(-4), None);
        assert_eq!(nth(1), Some(100));
        assert_eq!(nth(2), Some(200));
        assert_eq!(nth(3), Some(300));
        assert_eq!(nth(4), None);
    }

    #[test]
    fn running_balances_split_incentive_halves() {
        let mut ledger = new_ledger();
        let other = Address::repeat_byte(0x55);
        let raw = RawExecutedRootBundle {
            group_index: 0,
            leaf_id: 0,
            chain_id: 10,
            l1_tokens: vec![l1_usdc(), other],
            bundle_lp_fees: vec![U256::zero(); 2],
            net_send_amounts: vec![I256::zero(); 2],
            running_balances: vec![
                I256::from(40),
                I256::from(-7),
                I256::from(4),
                I256::from(1),
            ],
            caller: Address::zero(),
        };
        ledger
            .apply(HubEventBatch {
                executions: vec![EventRecord::new(meta(150, 0, 0), raw)],
                ..Default::default()
            })
            .unwrap();

        let balance = ledger.running_balance_before_block(150, 10, other);
        assert_eq!(balance.running_balance, I256::from(-7));
        assert_eq!(balance.incentive_balance, I256::from(1));
        // Unknown pairs and earlier blocks yield zeros.
        assert_eq!(
            ledger.running_balance_before_block(149, 10, other),
            TokenRunningBalance::default()
        );
        assert_eq!(
            ledger.running_balance_before_block(150, 137, other),
            TokenRunningBalance::default()
        );
    }

    #[test]
    fn malformed_execution_aborts_without_partial_commit() {
        let mut ledger = new_ledger();
        let raw = RawExecutedRootBundle {
            group_index: 0,
            leaf_id: 0,
            chain_id: 10,
            l1_tokens: vec![l1_usdc()],
            bundle_lp_fees: vec![U256::zero()],
            net_send_amounts: vec![I256::zero()],
            running_balances: vec![I256::zero(), I256::zero(), I256::zero()],
            caller: Address::zero(),
        };
        let result = ledger.apply(HubEventBatch {
            route_updates: vec![route_event(100, l1_usdc(), 10, l2_usdc())],
            executions: vec![EventRecord::new(meta(150, 0, 0), raw)],
            ..Default::default()
        });
        assert!(matches!(result, Err(IngestError::MalformedEvent(_))));
        // The route in the same batch must not have been committed.
        assert!(ledger.l2_token_for_l1(l1_usdc(), 10, 200).is_err());
    }

    #[test]
    fn bundle_end_blocks_tolerate_short_proposals() {
        let ledger = new_ledger();
        let proposal = ProposedRootBundle {
            challenge_period_end_timestamp: 0,
            pool_rebalance_leaf_count: 1,
            bundle_evaluation_block_numbers: vec![500, 600],
            pool_rebalance_root: H256::zero(),
            relayer_refund_root: H256::zero(),
            slow_relay_root: H256::zero(),
            proposer: Address::zero(),
        };
        let chains = [1, 10, 137];
        assert_eq!(ledger.bundle_end_block_for_chain(&proposal, 1, &chains), 500);
        assert_eq!(ledger.bundle_end_block_for_chain(&proposal, 10, &chains), 600);
        // Chain indexed past the evaluation array, and chain not indexed.
        assert_eq!(ledger.bundle_end_block_for_chain(&proposal, 137, &chains), 0);
        assert_eq!(ledger.bundle_end_block_for_chain(&proposal, 999, &chains), 0);
    }

    #[test]
    fn next_bundle_start_follows_the_latest_validated_end() {
        let mut ledger = new_ledger();
        let chains = [1, 10];
        assert_eq!(ledger.next_bundle_start_block(&chains, 1_000, 10), 0);

        ledger
            .apply(HubEventBatch {
                proposals: vec![proposal_event(100, 1, vec![500, 480])],
                executions: vec![execution_event(110, 10, vec![(l1_usdc(), 1)])],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ledger.next_bundle_start_block(&chains, 1_000, 10), 481);
        assert_eq!(ledger.next_bundle_start_block(&chains, 1_000, 1), 501);
        // A chain outside the list restarts from one past zero.
        assert_eq!(ledger.next_bundle_start_block(&chains, 1_000, 42161), 1);
    }

    #[test]
    fn implied_ranges_follow_the_previous_bundle() {
        let mut ledger = new_ledger();
        ledger
            .apply(HubEventBatch {
                proposals: vec![
                    proposal_event(100, 1, vec![500, 0]),
                    proposal_event(300, 1, vec![900, 950]),
                ],
                executions: vec![execution_event(110, 10, vec![(l1_usdc(), 1)])],
                ..Default::default()
            })
            .unwrap();
        let second = ledger.proposed_root_bundles()[1].clone();
        let ranges = ledger.implied_bundle_ranges(&second, &[1, 10, 137]);
        assert_eq!(
            ranges,
            vec![
                ChainBlockRange { chain_id: 1, start_block: 501, end_block: 900 },
                // Previous end of zero means the chain had no history.
                ChainBlockRange { chain_id: 10, start_block: 0, end_block: 950 },
            ]
        );
    }

    #[tokio::test]
    async fn update_derives_the_pending_bundle() {
        let source = Arc::new(MockHubPoolEventSource::default());
        source.set_latest_block(400);
        source.push_batch(HubEventBatch {
            proposals: vec![
                proposal_event(300, 1, vec![700, 750]),
                proposal_event(350, 2, vec![800, 850]),
            ],
            ..Default::default()
        });
        source.set_pending_bundle(Some(live_pending_bundle(2)));
        let mut ledger = HubLedgerState::new(
            source.clone(),
            shared_config_store(),
            LedgerSettings::default(),
            Arc::new(EngineMetrics::new_for_testing()),
        );
        ledger.update().await.unwrap();

        // Both proposals carry the same roots; pairing takes the newest.
        let pending = ledger.pending_root_bundle().unwrap();
        assert_eq!(pending.proposal_block_number, 350);
        assert_eq!(pending.bundle_evaluation_block_numbers, vec![800, 850]);
        assert_eq!(pending.unclaimed_pool_rebalance_leaf_count, 2);
        assert_eq!(ledger.latest_block_searched(), 400);

        // Once every leaf is claimed the pending view disappears.
        source.set_pending_bundle(Some(live_pending_bundle(0)));
        ledger.update().await.unwrap();
        assert!(ledger.pending_root_bundle().is_none());
    }

    #[tokio::test]
    async fn unmatched_live_proposal_is_tolerated() {
        let source = Arc::new(MockHubPoolEventSource::default());
        source.set_latest_block(400);
        source.push_batch(HubEventBatch {
            proposals: vec![proposal_event(350, 2, vec![800, 850])],
            ..Default::default()
        });
        // The live read's roots belong to a proposal the indexer has
        // not ingested yet.
        let mut unknown = live_pending_bundle(2);
        unknown.pool_rebalance_root = H256::repeat_byte(0x77);
        source.set_pending_bundle(Some(unknown));
        let mut ledger = HubLedgerState::new(
            source,
            shared_config_store(),
            LedgerSettings::default(),
            Arc::new(EngineMetrics::new_for_testing()),
        );
        ledger.update().await.unwrap();
        assert!(ledger.pending_root_bundle().is_none());
    }

    #[test]
    fn range_accessors_clip_to_block_bounds() {
        let mut ledger = new_ledger();
        ledger
            .apply(HubEventBatch {
                proposals: vec![
                    proposal_event(100, 1, vec![500]),
                    proposal_event(200, 1, vec![600]),
                    proposal_event(300, 1, vec![700]),
                ],
                disputes: vec![dispute_event(210)],
                executions: vec![
                    execution_event(110, 10, vec![(l1_usdc(), 1)]),
                    execution_event(310, 10, vec![(l1_usdc(), 3)]),
                ],
                ..Default::default()
            })
            .unwrap();

        let proposals: Vec<u64> = ledger
            .proposed_root_bundles_in_range(150, 300)
            .iter()
            .map(|record| record.block_number())
            .collect();
        assert_eq!(proposals, vec![200, 300]);
        assert_eq!(ledger.disputed_root_bundles_in_range(0, 209).len(), 0);
        assert_eq!(ledger.disputed_root_bundles_in_range(0, 210).len(), 1);
        assert_eq!(ledger.cancelled_root_bundles_in_range(0, 1_000).len(), 0);
        let executed: Vec<u64> = ledger
            .executed_leaves_in_range(111, 1_000)
            .iter()
            .map(|record| record.block_number())
            .collect();
        assert_eq!(executed, vec![310]);
    }

    #[test]
    fn settings_expose_the_hub_chain() {
        let ledger = new_ledger();
        assert_eq!(ledger.hub_chain_id(), crosshub_types::HUB_CHAIN_ID);
    }
}
