// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Versioned config-store reconstruction.
//!
//! Replays `UpdatedTokenConfig` and `UpdatedGlobalConfig` logs into
//! block-indexed update lists and answers point-in-time queries over
//! them. Individual malformed updates are skipped and logged, never
//! fatal; only collaborator failures and batch-shape violations abort
//! an update pass. Queries take a block (or timestamp) argument and
//! accept [`LATEST_BLOCK`] as the "current state" sentinel.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use ethers::types::Address;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crosshub_types::events::{
    latest_at_or_before, sort_events_ascending, EventRecord, GlobalConfigUpdate, TokenConfigUpdate,
};
use crosshub_types::{
    ChainId, GlobalConfigKey, RateModel, RouteKey, SpokeTargetBalance, TokenConfig,
    DEFAULT_CONFIG_STORE_VERSION, HUB_CHAIN_ID, PROTOCOL_DEFAULT_CHAIN_ID_INDICES,
    SUPPORTED_CONFIG_STORE_VERSION,
};

use crate::error::{IngestError, IngestResult, LookupError, LookupResult};
use crate::metrics::EngineMetrics;
use crate::settings::ConfigStoreSettings;
use crate::sources::{ConfigStoreEventBatch, ConfigStoreEventSource};
use crate::sync::{StateIndexer, SyncCursor};

const COMPONENT: &str = "config_store";

/// Strict well-formedness check for chain-id-list values: an array
/// literal of integers, optionally wrapped in quotes and outer
/// whitespace, no spaces inside the brackets.
static CHAIN_LIST_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*["']?\[(\d+(,\d+)*)?\]["']?\s*$"#).unwrap());

/// One accepted `VERSION` update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VersionUpdate {
    pub version: u64,
    pub timestamp: u64,
}

/// One accepted `LITE_CHAIN_ID_INDICES` update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiteChainListUpdate {
    pub chain_ids: Vec<ChainId>,
    pub timestamp: u64,
}

/// Chain-index list a chain implies for itself before the dynamic
/// `CHAIN_ID_INDICES` key existed: the full historical default when
/// the chain leads that list, else a singleton.
pub fn implicit_chain_id_indices(chain_id: ChainId) -> Vec<ChainId> {
    if chain_id == PROTOCOL_DEFAULT_CHAIN_ID_INDICES[0] {
        PROTOCOL_DEFAULT_CHAIN_ID_INDICES.to_vec()
    } else {
        vec![chain_id]
    }
}

type RouteModelMap = std::collections::BTreeMap<RouteKey, RateModel>;
type SpokeBalanceMap = std::collections::BTreeMap<ChainId, SpokeTargetBalance>;

/// Reconstructed config-store state. Append-only: update lists only
/// grow, and historical queries are answered by predecessor search
/// over the `(block, txIndex, logIndex)` order.
pub struct ConfigStoreState {
    source: Arc<dyn ConfigStoreEventSource>,
    settings: ConfigStoreSettings,
    metrics: Arc<EngineMetrics>,
    cursor: SyncCursor,

    rate_model_updates: HashMap<Address, Vec<EventRecord<RateModel>>>,
    route_rate_model_updates: HashMap<Address, Vec<EventRecord<RouteModelMap>>>,
    spoke_target_balance_updates: HashMap<Address, Vec<EventRecord<SpokeBalanceMap>>>,

    max_refund_count_updates: Vec<EventRecord<u64>>,
    max_l1_token_count_updates: Vec<EventRecord<u64>>,
    disabled_chain_updates: Vec<EventRecord<Vec<ChainId>>>,
    chain_id_indices_updates: Vec<EventRecord<Vec<ChainId>>>,
    lite_chain_updates: Vec<EventRecord<LiteChainListUpdate>>,
    // Newest-first: accepted versions strictly increase, so the head
    // is always the running maximum.
    version_updates: Vec<EventRecord<VersionUpdate>>,
}

impl ConfigStoreState {
    pub fn new(
        source: Arc<dyn ConfigStoreEventSource>,
        settings: ConfigStoreSettings,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let cursor = SyncCursor::new(settings.deployment_block);
        Self {
            source,
            settings,
            metrics,
            cursor,
            rate_model_updates: HashMap::new(),
            route_rate_model_updates: HashMap::new(),
            spoke_target_balance_updates: HashMap::new(),
            max_refund_count_updates: Vec::new(),
            max_l1_token_count_updates: Vec::new(),
            disabled_chain_updates: Vec::new(),
            chain_id_indices_updates: Vec::new(),
            lite_chain_updates: Vec::new(),
            version_updates: Vec::new(),
        }
    }

    /// Folds one fetched batch into state. `latest_block` is the top of
    /// the searched range and anchors the recent/historical logging
    /// split for skipped events. Re-sorts defensively so reordered
    /// retries are idempotent.
    pub fn apply(&mut self, batch: ConfigStoreEventBatch, latest_block: u64) -> IngestResult<()> {
        let ConfigStoreEventBatch {
            mut token_config_updates,
            global_config_updates,
            global_config_timestamps,
        } = batch;
        if global_config_updates.len() != global_config_timestamps.len() {
            return Err(IngestError::BatchShape {
                component: COMPONENT,
                events: global_config_updates.len(),
                timestamps: global_config_timestamps.len(),
            });
        }
        sort_events_ascending(&mut token_config_updates);
        // Pair before sorting so each update keeps its own timestamp.
        let mut global: Vec<(EventRecord<GlobalConfigUpdate>, u64)> = global_config_updates
            .into_iter()
            .zip(global_config_timestamps)
            .collect();
        global.sort_by_key(|(event, _)| event.ordinal());

        for event in token_config_updates {
            self.apply_token_config(event, latest_block);
        }
        for (event, timestamp) in global {
            self.apply_global_config(event, timestamp, latest_block);
        }
        Ok(())
    }

    fn apply_token_config(&mut self, event: EventRecord<TokenConfigUpdate>, latest_block: u64) {
        if self
            .settings
            .denied_update_hashes
            .contains(&event.meta.transaction_hash)
        {
            debug!(
                "[ConfigStore] Skipping denied token config update in tx {:?}",
                event.meta.transaction_hash
            );
            self.metrics
                .events_skipped
                .with_label_values(&[COMPONENT, "denied"])
                .inc();
            return;
        }
        let config = match TokenConfig::parse(&event.value.value) {
            Ok(config) => config,
            Err(err) => {
                self.skip(
                    event.block_number(),
                    latest_block,
                    "malformed_token_config",
                    format_args!("token {}: {}", event.value.l1_token, err),
                );
                return;
            }
        };
        let meta = event.meta;
        let token = event.value.l1_token;
        if let Some(rate_model) = config.rate_model {
            self.rate_model_updates
                .entry(token)
                .or_default()
                .push(EventRecord::new(meta, rate_model));
            self.applied("rate_model");
        }
        if let Some(routes) = config.route_rate_models {
            self.route_rate_model_updates
                .entry(token)
                .or_default()
                .push(EventRecord::new(meta, routes));
            self.applied("route_rate_model");
        }
        if let Some(balances) = config.spoke_target_balances {
            self.spoke_target_balance_updates
                .entry(token)
                .or_default()
                .push(EventRecord::new(meta, balances));
            self.applied("spoke_target_balances");
        }
    }

    fn apply_global_config(
        &mut self,
        event: EventRecord<GlobalConfigUpdate>,
        timestamp: u64,
        latest_block: u64,
    ) {
        let Some(key) = GlobalConfigKey::from_bytes32(&event.value.key) else {
            self.skip(
                event.block_number(),
                latest_block,
                "unknown_key",
                format_args!("unrecognized global config key {:?}", event.value.key),
            );
            return;
        };
        let meta = event.meta;
        let raw = event.value.value;
        match key {
            GlobalConfigKey::MaxRelayerRepaymentLeafSize => match raw.trim().parse::<u64>() {
                Ok(value) => {
                    self.max_refund_count_updates
                        .push(EventRecord::new(meta, value));
                    self.applied("max_refund_count");
                }
                Err(_) => self.skip_value(key, &raw, meta.block_number, latest_block),
            },
            GlobalConfigKey::MaxPoolRebalanceLeafSize => match raw.trim().parse::<u64>() {
                Ok(value) => {
                    self.max_l1_token_count_updates
                        .push(EventRecord::new(meta, value));
                    self.applied("max_l1_token_count");
                }
                Err(_) => self.skip_value(key, &raw, meta.block_number, latest_block),
            },
            GlobalConfigKey::Version => match raw.trim().parse::<u64>() {
                Ok(version) if version > self.highest_version() => {
                    self.version_updates
                        .insert(0, EventRecord::new(meta, VersionUpdate { version, timestamp }));
                    self.applied("version");
                }
                Ok(version) => self.skip(
                    meta.block_number,
                    latest_block,
                    "non_monotonic_version",
                    format_args!(
                        "version {} is not above the current {}",
                        version,
                        self.highest_version()
                    ),
                ),
                Err(_) => self.skip_value(key, &raw, meta.block_number, latest_block),
            },
            GlobalConfigKey::DisabledChains => match parse_disabled_chains(&raw) {
                Some(chains) => {
                    self.disabled_chain_updates
                        .push(EventRecord::new(meta, chains));
                    self.applied("disabled_chains");
                }
                None => self.skip_value(key, &raw, meta.block_number, latest_block),
            },
            GlobalConfigKey::ChainIdIndices => {
                let Some(list) = parse_chain_id_list(&raw) else {
                    self.skip_value(key, &raw, meta.block_number, latest_block);
                    return;
                };
                let baseline = self
                    .chain_id_indices_updates
                    .last()
                    .map(|record| record.value.as_slice())
                    .unwrap_or(&PROTOCOL_DEFAULT_CHAIN_ID_INDICES);
                let preserves_prefix = baseline.len() <= list.len()
                    && baseline.iter().zip(&list).all(|(a, b)| a == b);
                if !preserves_prefix {
                    self.skip(
                        meta.block_number,
                        latest_block,
                        "chain_indices_not_superset",
                        format_args!("{:?} does not extend {:?}", list, baseline),
                    );
                    return;
                }
                self.chain_id_indices_updates
                    .push(EventRecord::new(meta, list));
                self.applied("chain_id_indices");
            }
            GlobalConfigKey::LiteChainIdIndices => match parse_chain_id_list(&raw) {
                Some(chain_ids) => {
                    self.lite_chain_updates.push(EventRecord::new(
                        meta,
                        LiteChainListUpdate {
                            chain_ids,
                            timestamp,
                        },
                    ));
                    self.applied("lite_chain_id_indices");
                }
                None => self.skip_value(key, &raw, meta.block_number, latest_block),
            },
        }
    }

    fn applied(&self, kind: &str) {
        self.metrics
            .events_applied
            .with_label_values(&[COMPONENT, kind])
            .inc();
    }

    fn skip_value(&self, key: GlobalConfigKey, raw: &str, block: u64, latest_block: u64) {
        self.skip(
            block,
            latest_block,
            "malformed_value",
            format_args!("{} value {:?} failed validation", key, raw),
        );
    }

    /// Per-event skip. Recent events get `warn` since they may indicate
    /// a live misconfiguration; historical ones are expected noise.
    fn skip(&self, block: u64, latest_block: u64, reason: &'static str, detail: fmt::Arguments<'_>) {
        self.metrics
            .events_skipped
            .with_label_values(&[COMPONENT, reason])
            .inc();
        if block.saturating_add(self.settings.recent_block_window) >= latest_block {
            warn!("[ConfigStore] Skipping {} at block {}: {}", reason, block, detail);
        } else {
            debug!("[ConfigStore] Skipping {} at block {}: {}", reason, block, detail);
        }
    }

    fn highest_version(&self) -> u64 {
        self.version_updates
            .first()
            .map(|record| record.value.version)
            .unwrap_or(DEFAULT_CONFIG_STORE_VERSION)
    }

    /// Rate model in force for a transfer at `block`, preferring a
    /// route-specific override over the token default.
    pub fn rate_model_for_block(
        &self,
        l1_token: Address,
        origin_chain_id: ChainId,
        destination_chain_id: ChainId,
        block: u64,
    ) -> LookupResult<RateModel> {
        if let Some(updates) = self.route_rate_model_updates.get(&l1_token) {
            if let Some(record) = latest_at_or_before(updates, block) {
                let route = RouteKey::new(origin_chain_id, destination_chain_id);
                if let Some(model) = record.value.get(&route) {
                    return Ok(*model);
                }
            }
        }
        self.rate_model_updates
            .get(&l1_token)
            .and_then(|updates| latest_at_or_before(updates, block))
            .map(|record| record.value)
            .ok_or(LookupError::RateModelNotFound {
                l1_token,
                origin_chain_id,
                destination_chain_id,
                block,
            })
    }

    /// Chain-index list at `block`, falling back to the protocol's
    /// historical default before any accepted update.
    pub fn chain_id_indices_for_block(&self, block: u64) -> Vec<ChainId> {
        latest_at_or_before(&self.chain_id_indices_updates, block)
            .map(|record| record.value.clone())
            .unwrap_or_else(|| PROTOCOL_DEFAULT_CHAIN_ID_INDICES.to_vec())
    }

    /// Chains disabled at `block`; empty before any update.
    pub fn disabled_chains_for_block(&self, block: u64) -> Vec<ChainId> {
        latest_at_or_before(&self.disabled_chain_updates, block)
            .map(|record| record.value.clone())
            .unwrap_or_default()
    }

    /// Indexed chains minus the disabled set, in index-list order.
    pub fn enabled_chains_for_block(&self, block: u64) -> Vec<ChainId> {
        let disabled = self.disabled_chains_for_block(block);
        self.chain_id_indices_for_block(block)
            .into_iter()
            .filter(|chain_id| !disabled.contains(chain_id))
            .collect()
    }

    /// Chains enabled at any point within `[from_block, to_block]`:
    /// those enabled entering the range plus any a disabled-chains
    /// update inside the range left enabled. Ordered by the index list
    /// at `to_block`.
    pub fn enabled_chains_in_block_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> LookupResult<Vec<ChainId>> {
        if to_block < from_block {
            return Err(LookupError::InvalidArgument(format!(
                "invalid block range [{from_block}, {to_block}]"
            )));
        }
        let enabled_at_from = self.enabled_chains_for_block(from_block);
        let updates_in_range: Vec<&Vec<ChainId>> = self
            .disabled_chain_updates
            .iter()
            .filter(|record| {
                record.block_number() > from_block && record.block_number() <= to_block
            })
            .map(|record| &record.value)
            .collect();
        Ok(self
            .chain_id_indices_for_block(to_block)
            .into_iter()
            .filter(|chain_id| {
                enabled_at_from.contains(chain_id)
                    || updates_in_range
                        .iter()
                        .any(|disabled| !disabled.contains(chain_id))
            })
            .collect())
    }

    /// `MAX_RELAYER_REPAYMENT_LEAF_SIZE` at `block`. No default: a
    /// bundle cannot be sized without one.
    pub fn max_refund_count_for_block(&self, block: u64) -> LookupResult<u64> {
        latest_at_or_before(&self.max_refund_count_updates, block)
            .map(|record| record.value)
            .ok_or(LookupError::GlobalConfigNotFound {
                key: GlobalConfigKey::MaxRelayerRepaymentLeafSize,
                block,
            })
    }

    /// `MAX_POOL_REBALANCE_LEAF_SIZE` at `block`. No default.
    pub fn max_l1_token_count_for_block(&self, block: u64) -> LookupResult<u64> {
        latest_at_or_before(&self.max_l1_token_count_updates, block)
            .map(|record| record.value)
            .ok_or(LookupError::GlobalConfigNotFound {
                key: GlobalConfigKey::MaxPoolRebalanceLeafSize,
                block,
            })
    }

    /// `{target, threshold}` for a token on a chain at `block`;
    /// defaults to zeros when never configured.
    pub fn spoke_target_balances_for_block(
        &self,
        l1_token: Address,
        chain_id: ChainId,
        block: u64,
    ) -> SpokeTargetBalance {
        self.spoke_target_balance_updates
            .get(&l1_token)
            .and_then(|updates| latest_at_or_before(updates, block))
            .and_then(|record| record.value.get(&chain_id).copied())
            .unwrap_or_default()
    }

    pub fn version_for_block(&self, block: u64) -> u64 {
        self.version_updates
            .iter()
            .find(|record| record.block_number() <= block)
            .map(|record| record.value.version)
            .unwrap_or(DEFAULT_CONFIG_STORE_VERSION)
    }

    pub fn version_for_timestamp(&self, timestamp: u64) -> u64 {
        self.version_updates
            .iter()
            .find(|record| record.value.timestamp <= timestamp)
            .map(|record| record.value.version)
            .unwrap_or(DEFAULT_CONFIG_STORE_VERSION)
    }

    /// Whether this client understands the store's update semantics as
    /// of `timestamp`.
    pub fn has_supported_version_for_timestamp(&self, timestamp: u64) -> bool {
        self.version_for_timestamp(timestamp) <= SUPPORTED_CONFIG_STORE_VERSION
    }

    /// Lite-chain list at `block`; empty before any update.
    pub fn lite_chain_ids_for_block(&self, block: u64) -> Vec<ChainId> {
        latest_at_or_before(&self.lite_chain_updates, block)
            .map(|record| record.value.chain_ids.clone())
            .unwrap_or_default()
    }

    /// Lite-chain list at `timestamp`; empty before any update.
    pub fn lite_chain_ids_for_timestamp(&self, timestamp: u64) -> Vec<ChainId> {
        self.lite_chain_updates
            .iter()
            .rev()
            .find(|record| record.value.timestamp <= timestamp)
            .map(|record| record.value.chain_ids.clone())
            .unwrap_or_default()
    }

    pub fn is_lite_chain_at_timestamp(&self, chain_id: ChainId, timestamp: u64) -> bool {
        self.lite_chain_ids_for_timestamp(timestamp).contains(&chain_id)
    }
}

#[async_trait::async_trait]
impl StateIndexer for ConfigStoreState {
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
        let Some((from_block, to_block)) = self.cursor.search_range(latest_block) else {
            debug!(
                "[ConfigStore] No new blocks past {}",
                self.cursor.latest_block_searched
            );
            return Ok(());
        };
        info!(
            "[ConfigStore] Searching config updates in blocks [{}, {}]",
            from_block, to_block
        );
        let batch = self.source.config_events(from_block, to_block).await?;
        self.apply(batch, to_block)?;
        self.cursor.advance(to_block);
        self.metrics
            .last_block_searched
            .with_label_values(&[COMPONENT])
            .set(to_block as i64);
        Ok(())
    }
}

/// Strict chain-id-list decode: form-checked by regex, then quotes and
/// whitespace stripped before JSON decoding. All entries must be
/// positive and unique.
fn parse_chain_id_list(raw: &str) -> Option<Vec<ChainId>> {
    if !CHAIN_LIST_FORM.is_match(raw) {
        return None;
    }
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\'' | '"') && !c.is_whitespace())
        .collect();
    let chain_ids: Vec<ChainId> = serde_json::from_str(&cleaned).ok()?;
    if chain_ids.iter().any(|chain_id| *chain_id == 0) {
        return None;
    }
    let unique: HashSet<&ChainId> = chain_ids.iter().collect();
    if unique.len() != chain_ids.len() {
        return None;
    }
    Some(chain_ids)
}

/// Lenient disabled-chains decode: plain JSON array, dropping the hub
/// chain and any non-integer entry while keeping order. `None` only
/// when the value is not a JSON array at all.
fn parse_disabled_chains(raw: &str) -> Option<Vec<ChainId>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw.trim()).ok()?;
    Some(
        values
            .iter()
            .filter_map(serde_json::Value::as_u64)
            .filter(|chain_id| *chain_id != HUB_CHAIN_ID)
            .collect(),
    )
}
