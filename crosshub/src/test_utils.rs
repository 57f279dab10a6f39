// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hand-rolled mock collaborators and event builders shared by the
//! test modules. Mocks take `&self` and keep scripted state behind
//! mutexes so tests can hold them as `Arc`s next to the engine.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::types::{Address, H256, I256, U256};
use tokio::sync::RwLock;

use crosshub_types::events::{
    DisputedRootBundle, EventMeta, EventRecord, GlobalConfigUpdate, LivePendingBundle,
    ProposedRootBundle, RawExecutedRootBundle, RouteUpdate, TokenConfigUpdate,
};
use crosshub_types::settlement::{BundleInputs, ChainBlockRange, FillAggregate, SettlementDeposit};
use crosshub_types::{ChainId, GlobalConfigKey, RateModel, HUB_CHAIN_ID};

use crate::config_store::ConfigStoreState;
use crate::hub_ledger::SharedConfigStore;
use crate::metrics::EngineMetrics;
use crate::settings::ConfigStoreSettings;
use crate::sources::{
    BlockTimeResolver, BundleInputProvider, ConfigStoreEventBatch, ConfigStoreEventSource,
    EventSourceError, HubEventBatch, HubPoolEventSource, LpFeeModel, PoolUtilizationSource,
};

/// Installs the fmt subscriber once per process for tests that want
/// log output under `RUST_LOG`.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn meta(block: u64, tx: u32, log: u32) -> EventMeta {
    EventMeta {
        block_number: block,
        transaction_index: tx,
        log_index: log,
        transaction_hash: H256::zero(),
    }
}

pub fn token_event(block: u64, l1_token: Address, json: &str) -> EventRecord<TokenConfigUpdate> {
    EventRecord::new(
        meta(block, 0, 0),
        TokenConfigUpdate {
            l1_token,
            value: json.to_string(),
        },
    )
}

pub fn global_event(
    block: u64,
    key: GlobalConfigKey,
    value: &str,
) -> EventRecord<GlobalConfigUpdate> {
    EventRecord::new(
        meta(block, 0, 0),
        GlobalConfigUpdate {
            key: key.to_bytes32(),
            value: value.to_string(),
        },
    )
}

pub fn route_event(
    block: u64,
    l1_token: Address,
    destination_chain_id: ChainId,
    destination_token: Address,
) -> EventRecord<RouteUpdate> {
    EventRecord::new(
        meta(block, 0, 0),
        RouteUpdate {
            destination_chain_id,
            l1_token,
            destination_token,
        },
    )
}

/// Proposal with the fixed test roots the mock live reads use, so the
/// pending-bundle pairing in `update()` matches by default.
pub fn proposal_event(
    block: u64,
    leaf_count: u32,
    evaluation_blocks: Vec<u64>,
) -> EventRecord<ProposedRootBundle> {
    EventRecord::new(
        meta(block, 0, 0),
        ProposedRootBundle {
            challenge_period_end_timestamp: 0,
            pool_rebalance_leaf_count: leaf_count,
            bundle_evaluation_block_numbers: evaluation_blocks,
            pool_rebalance_root: H256::repeat_byte(1),
            relayer_refund_root: H256::repeat_byte(2),
            slow_relay_root: H256::repeat_byte(3),
            proposer: Address::zero(),
        },
    )
}

/// Live pending view matching [`proposal_event`]'s roots.
pub fn live_pending_bundle(unclaimed_leaves: u32) -> LivePendingBundle {
    LivePendingBundle {
        pool_rebalance_root: H256::repeat_byte(1),
        relayer_refund_root: H256::repeat_byte(2),
        slow_relay_root: H256::repeat_byte(3),
        proposer: Address::zero(),
        unclaimed_pool_rebalance_leaf_count: unclaimed_leaves,
        challenge_period_end_timestamp: 0,
    }
}

pub fn dispute_event(block: u64) -> EventRecord<DisputedRootBundle> {
    EventRecord::new(
        meta(block, 0, 0),
        DisputedRootBundle {
            disputer: Address::zero(),
            request_time: 0,
        },
    )
}

/// One executed leaf with an N-length balance array and zeroed fee and
/// net-send slots.
pub fn execution_event(
    block: u64,
    chain_id: ChainId,
    balances: Vec<(Address, i64)>,
) -> EventRecord<RawExecutedRootBundle> {
    let l1_tokens: Vec<Address> = balances.iter().map(|(token, _)| *token).collect();
    let running_balances: Vec<I256> = balances.iter().map(|(_, value)| I256::from(*value)).collect();
    let n = l1_tokens.len();
    EventRecord::new(
        meta(block, 0, 0),
        RawExecutedRootBundle {
            group_index: 0,
            leaf_id: 0,
            chain_id,
            l1_tokens,
            bundle_lp_fees: vec![U256::zero(); n],
            net_send_amounts: vec![I256::zero(); n],
            running_balances,
            caller: Address::zero(),
        },
    )
}

/// Deposit-shaped record; `lp_fee_percent` is whole percent (10 = 10%).
pub fn deposit(
    origin_chain_id: ChainId,
    destination_chain_id: ChainId,
    input_token: Address,
    amount: u64,
    lp_fee_percent: u64,
) -> SettlementDeposit {
    SettlementDeposit {
        depositor: Address::repeat_byte(0xde),
        origin_chain_id,
        destination_chain_id,
        input_token,
        output_token: input_token,
        input_amount: U256::from(amount),
        lp_fee_pct: U256::exp10(16) * U256::from(lp_fee_percent),
        quote_timestamp: 0,
    }
}

pub fn fill_aggregate(
    total_refund: u64,
    realized_lp_fees: u64,
    refunds: &[(Address, u64)],
) -> FillAggregate {
    FillAggregate {
        total_refund_amount: U256::from(total_refund),
        realized_lp_fees: U256::from(realized_lp_fees),
        refunds: refunds
            .iter()
            .map(|(payee, amount)| (*payee, U256::from(*amount)))
            .collect(),
    }
}

/// Empty config store wired to a mock source.
pub fn shared_config_store() -> SharedConfigStore {
    shared_config_store_with(Vec::new(), Vec::new())
}

/// Config store pre-loaded with fixture updates.
pub fn shared_config_store_with(
    token_events: Vec<EventRecord<TokenConfigUpdate>>,
    global_events: Vec<(EventRecord<GlobalConfigUpdate>, u64)>,
) -> SharedConfigStore {
    let mut store = ConfigStoreState::new(
        Arc::new(MockConfigStoreEventSource::default()),
        ConfigStoreSettings::default(),
        Arc::new(EngineMetrics::new_for_testing()),
    );
    let latest_block = token_events
        .iter()
        .map(EventRecord::block_number)
        .chain(global_events.iter().map(|(event, _)| event.block_number()))
        .max()
        .unwrap_or(0);
    let (global_config_updates, global_config_timestamps) = global_events.into_iter().unzip();
    store
        .apply(
            ConfigStoreEventBatch {
                token_config_updates: token_events,
                global_config_updates,
                global_config_timestamps,
            },
            latest_block,
        )
        .expect("fixture batches are well formed");
    Arc::new(RwLock::new(store))
}

/// Config-store log source serving scripted batches in push order and
/// recording every requested range.
#[derive(Default)]
pub struct MockConfigStoreEventSource {
    latest_block: AtomicU64,
    batches: Mutex<VecDeque<ConfigStoreEventBatch>>,
    requested_ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockConfigStoreEventSource {
    pub fn set_latest_block(&self, block: u64) {
        self.latest_block.store(block, Ordering::SeqCst);
    }

    pub fn push_batch(&self, batch: ConfigStoreEventBatch) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requested_ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigStoreEventSource for MockConfigStoreEventSource {
    async fn latest_block(&self) -> Result<u64, EventSourceError> {
        Ok(self.latest_block.load(Ordering::SeqCst))
    }

    async fn config_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<ConfigStoreEventBatch, EventSourceError> {
        self.requested_ranges
            .lock()
            .unwrap()
            .push((from_block, to_block));
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Hub-pool log source with a scriptable live pending-bundle read.
#[derive(Default)]
pub struct MockHubPoolEventSource {
    latest_block: AtomicU64,
    batches: Mutex<VecDeque<HubEventBatch>>,
    pending: Mutex<Option<LivePendingBundle>>,
    requested_ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockHubPoolEventSource {
    pub fn set_latest_block(&self, block: u64) {
        self.latest_block.store(block, Ordering::SeqCst);
    }

    pub fn push_batch(&self, batch: HubEventBatch) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn set_pending_bundle(&self, pending: Option<LivePendingBundle>) {
        *self.pending.lock().unwrap() = pending;
    }

    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requested_ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl HubPoolEventSource for MockHubPoolEventSource {
    async fn latest_block(&self) -> Result<u64, EventSourceError> {
        Ok(self.latest_block.load(Ordering::SeqCst))
    }

    async fn hub_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<HubEventBatch, EventSourceError> {
        self.requested_ranges
            .lock()
            .unwrap()
            .push((from_block, to_block));
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn pending_bundle(&self) -> Result<Option<LivePendingBundle>, EventSourceError> {
        Ok(*self.pending.lock().unwrap())
    }
}

/// Block/time resolver over an explicit timestamp -> block table.
#[derive(Default)]
pub struct MockBlockTimeResolver {
    blocks_by_timestamp: Mutex<HashMap<u64, u64>>,
    resolution_calls: AtomicUsize,
}

impl MockBlockTimeResolver {
    pub fn map_timestamp(&self, timestamp: u64, block: u64) {
        self.blocks_by_timestamp
            .lock()
            .unwrap()
            .insert(timestamp, block);
    }

    pub fn resolution_calls(&self) -> usize {
        self.resolution_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockTimeResolver for MockBlockTimeResolver {
    async fn block_for_timestamp(&self, timestamp: u64) -> Result<Option<u64>, EventSourceError> {
        self.resolution_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .blocks_by_timestamp
            .lock()
            .unwrap()
            .get(&timestamp)
            .copied())
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, EventSourceError> {
        Ok(self
            .blocks_by_timestamp
            .lock()
            .unwrap()
            .iter()
            .find(|(_, mapped)| **mapped == block)
            .map(|(timestamp, _)| *timestamp)
            .unwrap_or(0))
    }
}

/// Utilization source returning a fixed pre-relay level; post-relay
/// adds the relay amount on top so fee assertions stay arithmetic.
pub struct MockUtilizationSource {
    base: U256,
    pre_relay_calls: AtomicUsize,
    post_relay_calls: AtomicUsize,
}

impl MockUtilizationSource {
    pub fn new(base: U256) -> Self {
        Self {
            base,
            pre_relay_calls: AtomicUsize::new(0),
            post_relay_calls: AtomicUsize::new(0),
        }
    }

    pub fn pre_relay_calls(&self) -> usize {
        self.pre_relay_calls.load(Ordering::SeqCst)
    }

    pub fn post_relay_calls(&self) -> usize {
        self.post_relay_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolUtilizationSource for MockUtilizationSource {
    async fn utilization(
        &self,
        _l1_token: Address,
        _block: u64,
    ) -> Result<U256, EventSourceError> {
        self.pre_relay_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.base)
    }

    async fn utilization_post_relay(
        &self,
        _l1_token: Address,
        _block: u64,
        relay_amount: U256,
    ) -> Result<U256, EventSourceError> {
        self.post_relay_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.base + relay_amount)
    }
}

/// Curve stub: `R0 + (post - pre)`, so tests can assert exact fees.
pub struct TestFeeModel;

impl LpFeeModel for TestFeeModel {
    fn realized_lp_fee_pct(
        &self,
        model: &RateModel,
        utilization_before: U256,
        utilization_after: U256,
    ) -> U256 {
        model.r0 + (utilization_after - utilization_before)
    }
}

/// Classification collaborator serving scripted inputs keyed by the
/// hub chain's end block of the requested ranges.
#[derive(Default)]
pub struct MockBundleInputProvider {
    inputs_by_hub_end: Mutex<HashMap<u64, BundleInputs>>,
    requests: Mutex<Vec<Vec<ChainBlockRange>>>,
}

impl MockBundleInputProvider {
    pub fn set_inputs_for_hub_end(&self, hub_end_block: u64, inputs: BundleInputs) {
        self.inputs_by_hub_end
            .lock()
            .unwrap()
            .insert(hub_end_block, inputs);
    }

    pub fn requested_ranges(&self) -> Vec<Vec<ChainBlockRange>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BundleInputProvider for MockBundleInputProvider {
    async fn bundle_inputs(
        &self,
        ranges: &[ChainBlockRange],
    ) -> Result<BundleInputs, EventSourceError> {
        self.requests.lock().unwrap().push(ranges.to_vec());
        let hub_end = ranges
            .iter()
            .find(|range| range.chain_id == HUB_CHAIN_ID)
            .map(|range| range.end_block)
            .unwrap_or_default();
        Ok(self
            .inputs_by_hub_end
            .lock()
            .unwrap()
            .get(&hub_end)
            .cloned()
            .unwrap_or_default())
    }
}
