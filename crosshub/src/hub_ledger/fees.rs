// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Batch realized-LP-fee computation.
//!
//! A batch of quote requests shares one pass over the collaborators:
//! distinct quote timestamps resolve to hub blocks concurrently,
//! distinct `(hub token, quote block)` pairs fetch pre-relay
//! utilization once (LRU-cached when the quote is old enough to be
//! immutable), and per-request post-relay utilization fans out under a
//! bounded-concurrency, order-preserving stream. Output order always
//! matches input order.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use ethers::types::{Address, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use lru::LruCache;
use tokio::sync::Mutex;

use crosshub_types::{fixed_point_one, mul_div, ChainId, RateModel};

use crate::error::{FeeError, FeeResult};
use crate::metrics::EngineMetrics;
use crate::settings::FeeSettings;
use crate::sources::{BlockTimeResolver, LpFeeModel, PoolUtilizationSource};

use super::HubLedgerState;

/// One fee quote to price.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LpFeeRequest {
    pub origin_chain_id: ChainId,
    pub payment_chain_id: ChainId,
    /// Token the depositor paid in, denominated on the origin chain.
    pub input_token: Address,
    pub input_amount: U256,
    pub quote_timestamp: u64,
}

/// Priced quote. `realized_lp_fee_pct` is 1e18 fixed point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RealizedLpFee {
    pub realized_lp_fee_pct: U256,
    pub quote_block: u64,
}

/// Collaborator bundle for fee computation, owning the utilization
/// cache. One engine is shared across batches.
pub struct RealizedLpFeeEngine {
    block_resolver: Arc<dyn BlockTimeResolver>,
    utilization: Arc<dyn PoolUtilizationSource>,
    fee_model: Arc<dyn LpFeeModel>,
    settings: FeeSettings,
    metrics: Arc<EngineMetrics>,
    cache: Mutex<LruCache<(Address, u64), U256>>,
}

impl RealizedLpFeeEngine {
    pub fn new(
        block_resolver: Arc<dyn BlockTimeResolver>,
        utilization: Arc<dyn PoolUtilizationSource>,
        fee_model: Arc<dyn LpFeeModel>,
        settings: FeeSettings,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let capacity = NonZeroUsize::new(settings.cache_capacity.max(1)).unwrap();
        Self {
            block_resolver,
            utilization,
            fee_model,
            settings,
            metrics,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Pre-relay utilization for `(l1_token, block)`. Served from the
    /// LRU only when the quote timestamp is at least
    /// `cache_safe_lag_secs` behind `current_time`; the gate is
    /// re-checked before the write so a value fetched for a fresh
    /// quote is never stored.
    async fn pre_relay_utilization(
        &self,
        l1_token: Address,
        block: u64,
        quote_timestamp: u64,
        current_time: u64,
    ) -> FeeResult<U256> {
        if self.is_cache_safe(quote_timestamp, current_time) {
            if let Some(value) = self.cache.lock().await.get(&(l1_token, block)) {
                self.metrics.utilization_cache_hits.inc();
                return Ok(*value);
            }
            self.metrics.utilization_cache_misses.inc();
        }
        let value = self.utilization.utilization(l1_token, block).await?;
        if self.is_cache_safe(quote_timestamp, current_time) {
            self.cache.lock().await.put((l1_token, block), value);
        }
        Ok(value)
    }

    fn is_cache_safe(&self, quote_timestamp: u64, current_time: u64) -> bool {
        current_time.saturating_sub(quote_timestamp) >= self.settings.cache_safe_lag_secs
    }
}

impl HubLedgerState {
    /// Prices a batch of deposits. Results are positionally aligned
    /// with `requests`; any collaborator failure fails the whole batch.
    pub async fn compute_realized_lp_fees(
        &self,
        engine: &RealizedLpFeeEngine,
        requests: &[LpFeeRequest],
        current_time: u64,
    ) -> FeeResult<Vec<RealizedLpFee>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        // Distinct quote timestamps -> hub blocks, resolved concurrently.
        let mut timestamps: Vec<u64> = requests.iter().map(|r| r.quote_timestamp).collect();
        timestamps.sort_unstable();
        timestamps.dedup();
        let resolved: Vec<(u64, u64)> = stream::iter(timestamps.into_iter().map(|timestamp| {
            let resolver = Arc::clone(&engine.block_resolver);
            async move {
                let block = resolver
                    .block_for_timestamp(timestamp)
                    .await?
                    .ok_or(FeeError::BlockResolution { timestamp })?;
                Ok::<_, FeeError>((timestamp, block))
            }
        }))
        .buffer_unordered(engine.settings.concurrency)
        .try_collect()
        .await?;
        let block_by_timestamp: HashMap<u64, u64> = resolved.into_iter().collect();

        // Quote block and hub-pool token per request, in input order.
        let mut jobs = Vec::with_capacity(requests.len());
        for request in requests {
            let quote_block = block_by_timestamp
                .get(&request.quote_timestamp)
                .copied()
                .ok_or(FeeError::BlockResolution {
                    timestamp: request.quote_timestamp,
                })?;
            let hub_token =
                self.l1_token_for_l2(request.input_token, request.origin_chain_id, quote_block)?;
            jobs.push((request, hub_token, quote_block));
        }

        // Pre-relay utilization once per distinct (token, block) pair.
        let mut pairs: HashMap<(Address, u64), u64> = HashMap::new();
        for (request, hub_token, quote_block) in &jobs {
            pairs
                .entry((*hub_token, *quote_block))
                .or_insert(request.quote_timestamp);
        }
        let fetched: Vec<((Address, u64), U256)> =
            stream::iter(pairs.into_iter().map(|((token, block), timestamp)| async move {
                let value = engine
                    .pre_relay_utilization(token, block, timestamp, current_time)
                    .await?;
                Ok::<_, FeeError>(((token, block), value))
            }))
            .buffer_unordered(engine.settings.concurrency)
            .try_collect()
            .await?;
        let pre_by_pair: HashMap<(Address, u64), U256> = fetched.into_iter().collect();

        // Post-relay utilization depends on the amount, so it runs per
        // request; `buffered` keeps completion order equal to input
        // order.
        let posts: Vec<U256> = stream::iter(jobs.iter().map(|(request, hub_token, quote_block)| {
            let utilization = Arc::clone(&engine.utilization);
            let hub_token = *hub_token;
            let quote_block = *quote_block;
            let input_amount = request.input_amount;
            async move {
                let value = utilization
                    .utilization_post_relay(hub_token, quote_block, input_amount)
                    .await?;
                Ok::<_, FeeError>(value)
            }
        }))
        .buffered(engine.settings.concurrency)
        .try_collect()
        .await?;

        let config_store = self.config_store().read().await;
        let mut fees = Vec::with_capacity(jobs.len());
        for ((request, hub_token, quote_block), post) in jobs.into_iter().zip(posts) {
            let pre = pre_by_pair
                .get(&(hub_token, quote_block))
                .copied()
                .unwrap_or_default();
            let model = config_store.rate_model_for_block(
                hub_token,
                request.origin_chain_id,
                request.payment_chain_id,
                quote_block,
            )?;
            let realized_lp_fee_pct = engine.fee_model.realized_lp_fee_pct(&model, pre, post);
            fees.push(RealizedLpFee {
                realized_lp_fee_pct,
                quote_block,
            });
        }
        Ok(fees)
    }
}

/// Piecewise-linear utilization curve. The annualized rate is the
/// average of the instantaneous rate over the utilization move (area
/// under the curve divided by the move), and the realized fee is its
/// pro-rata weekly slice.
#[derive(Clone, Copy, Debug, Default)]
pub struct UtilizationCurveModel;

const WEEKS_PER_YEAR: u64 = 52;

impl LpFeeModel for UtilizationCurveModel {
    fn realized_lp_fee_pct(
        &self,
        model: &RateModel,
        utilization_before: U256,
        utilization_after: U256,
    ) -> U256 {
        let apy = if utilization_after <= utilization_before {
            instantaneous_rate(model, utilization_before)
        } else {
            let area = area_under_curve(model, utilization_after)
                .saturating_sub(area_under_curve(model, utilization_before));
            mul_div(
                area,
                fixed_point_one(),
                utilization_after - utilization_before,
            )
        };
        apy / U256::from(WEEKS_PER_YEAR)
    }
}

/// Instantaneous annualized rate at utilization `u` (1e18 fixed point).
fn instantaneous_rate(model: &RateModel, u: U256) -> U256 {
    if u <= model.u_bar {
        model.r0.saturating_add(mul_div(model.r1, u, model.u_bar))
    } else {
        let above_kink = mul_div(
            model.r2,
            u - model.u_bar,
            fixed_point_one() - model.u_bar,
        );
        model
            .r0
            .saturating_add(model.r1)
            .saturating_add(above_kink)
    }
}

/// Integral of the instantaneous rate over `[0, x]`, 1e18 fixed point.
fn area_under_curve(model: &RateModel, x: U256) -> U256 {
    let one = fixed_point_one();
    let two = U256::from(2);
    let below = x.min(model.u_bar);
    // R0·x + R1·x²/(2·UBar), both terms rescaled to 1e18.
    let mut area = mul_div(model.r0, below, one).saturating_add(mul_div(
        model.r1,
        mul_div(below, below, model.u_bar),
        two * one,
    ));
    if x > model.u_bar {
        let span = x - model.u_bar;
        let base = model.r0.saturating_add(model.r1);
        area = area
            .saturating_add(mul_div(base, span, one))
            .saturating_add(mul_div(
                model.r2,
                mul_div(span, span, one - model.u_bar),
                two * one,
            ));
    }
    area
}
